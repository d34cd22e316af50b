//! Generator configuration: one record for every deployment variant, plus
//! checkpoint discovery.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, SynthError};
use crate::latent::LATENT_DIM;

/// Environment variable consulted last when searching for a checkpoint directory.
pub const CHECKPOINT_DIR_ENV: &str = "GAN_CHECKPOINT_DIR";

/// Slice lengths the WaveGAN layout supports.
pub const SUPPORTED_SLICE_LENS: [usize; 3] = [16384, 32768, 65536];

const CHECKPOINT_EXTENSIONS: [&str; 3] = ["safetensors", "pt", "pth"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    /// Accelerator when one is available, otherwise CPU.
    Auto,
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Full,
    /// F16 on accelerators (F32 on CPU). Samples are widened to F32 before
    /// leaving the network.
    Half,
}

/// Named deployment presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variant {
    #[default]
    Standard,
    /// Narrow network pinned to the CPU.
    CpuSafe,
    /// Wide network with batchnorm and half precision on GPU.
    FastGpu,
    /// Fixed seed, determinism requested from the backend.
    Deterministic,
    /// 16384-sample output.
    Short,
    Batchnorm,
}

impl Variant {
    pub const ALL: [Variant; 6] = [
        Variant::Standard,
        Variant::CpuSafe,
        Variant::FastGpu,
        Variant::Deterministic,
        Variant::Short,
        Variant::Batchnorm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Variant::Standard => "standard",
            Variant::CpuSafe => "cpu_safe",
            Variant::FastGpu => "fast_gpu",
            Variant::Deterministic => "deterministic",
            Variant::Short => "short",
            Variant::Batchnorm => "batchnorm",
        }
    }

    pub fn config(self) -> GeneratorConfig {
        let base = GeneratorConfig {
            variant: self,
            ..GeneratorConfig::default()
        };
        match self {
            Variant::Standard => base,
            Variant::CpuSafe => GeneratorConfig {
                width: 48,
                use_batchnorm: false,
                device: DevicePreference::Cpu,
                ..base
            },
            Variant::FastGpu => GeneratorConfig {
                width: 96,
                use_batchnorm: true,
                precision: Precision::Half,
                ..base
            },
            Variant::Deterministic => GeneratorConfig {
                determinism_seed: Some(42),
                ..base
            },
            Variant::Short => GeneratorConfig {
                slice_len: 16384,
                ..base
            },
            Variant::Batchnorm => GeneratorConfig {
                use_batchnorm: true,
                ..base
            },
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = SynthError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        match key.as_str() {
            "standard" | "base" => Ok(Variant::Standard),
            "cpu_safe" | "cpusafe" | "cpu" => Ok(Variant::CpuSafe),
            "fast_gpu" | "fastgpu" => Ok(Variant::FastGpu),
            "deterministic" => Ok(Variant::Deterministic),
            "short" => Ok(Variant::Short),
            "batchnorm" => Ok(Variant::Batchnorm),
            _ => Err(SynthError::InvalidInput(format!(
                "unknown generator variant '{s}'. Expected one of: {}",
                Variant::ALL.map(|v| v.name()).join(", ")
            ))),
        }
    }
}

/// Everything that distinguishes one generator deployment from another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub variant: Variant,
    /// Base channel width (`dim` in the WaveGAN layout).
    pub width: usize,
    pub kernel_len: usize,
    pub latent_dim: usize,
    pub use_batchnorm: bool,
    pub device: DevicePreference,
    pub precision: Precision,
    /// Seeds the backend RNG and every latent drawn by the service.
    pub determinism_seed: Option<u64>,
    /// Length of the final waveform.
    pub slice_len: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            variant: Variant::Standard,
            width: 64,
            kernel_len: 25,
            latent_dim: LATENT_DIM,
            use_batchnorm: false,
            device: DevicePreference::Auto,
            precision: Precision::Full,
            determinism_seed: None,
            slice_len: 65536,
        }
    }
}

impl GeneratorConfig {
    pub fn output_len(&self) -> usize {
        self.slice_len
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.determinism_seed = Some(seed);
        self
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_SLICE_LENS.contains(&self.slice_len) {
            return Err(SynthError::InvalidInput(format!(
                "unsupported slice length {} (supported: {:?})",
                self.slice_len, SUPPORTED_SLICE_LENS
            )));
        }
        if self.width == 0 || self.kernel_len < 4 || self.latent_dim == 0 {
            return Err(SynthError::InvalidInput(format!(
                "invalid generator shape: width={}, kernel_len={}, latent_dim={}",
                self.width, self.kernel_len, self.latent_dim
            )));
        }
        Ok(())
    }
}

/// Find a checkpoint relative to the current directory. See [`locate_checkpoint_in`].
pub fn locate_checkpoint(explicit: Option<&Path>, override_dir: Option<&Path>) -> Result<PathBuf> {
    let cwd = std::env::current_dir()
        .map_err(|e| SynthError::ModelLoad(format!("cannot read working directory: {e}")))?;
    let env_dir = std::env::var_os(CHECKPOINT_DIR_ENV).map(PathBuf::from);
    locate_checkpoint_in(&cwd, explicit, override_dir, env_dir.as_deref())
}

/// Resolve the checkpoint file.
///
/// An explicit file wins and must exist. Otherwise the first existing
/// directory among `override_dir`, `<base>/weights/checkpoints`,
/// `<base>/checkpoints` and `env_dir` is searched for the lexically first
/// `.safetensors`, `.pt` or `.pth` file.
pub fn locate_checkpoint_in(
    base: &Path,
    explicit: Option<&Path>,
    override_dir: Option<&Path>,
    env_dir: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(file) = explicit {
        let file = if file.is_absolute() { file.to_path_buf() } else { base.join(file) };
        if file.is_file() {
            return Ok(file);
        }
        return Err(SynthError::ModelLoad(format!(
            "checkpoint file not found: {}",
            file.display()
        )));
    }

    let candidates = [
        override_dir.map(Path::to_path_buf),
        Some(base.join("weights").join("checkpoints")),
        Some(base.join("checkpoints")),
        env_dir.map(Path::to_path_buf),
    ];

    for dir in candidates.into_iter().flatten() {
        if !dir.is_dir() {
            continue;
        }
        if let Some(file) = first_checkpoint_file(&dir)? {
            return Ok(file);
        }
    }

    Err(SynthError::ModelLoad(format!(
        "no checkpoint found. Set GAN_CHECKPOINT or {CHECKPOINT_DIR_ENV}, \
         or place weights under weights/checkpoints"
    )))
}

fn first_checkpoint_file(dir: &Path) -> Result<Option<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| SynthError::ModelLoad(format!("cannot read {}: {e}", dir.display())))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| CHECKPOINT_EXTENSIONS.contains(&e))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files.into_iter().next())
}
