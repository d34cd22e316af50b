//! WaveGAN generator on candle.
//!
//! Layout (width `d`, slice 65536): a linear projection of the latent to
//! `32d x 16`, then six stride-4 transposed convolutions halving the channel
//! count each time (`32d -> 16d -> ... -> d -> 1`), ReLU between stages and
//! `tanh` on the output. The 16384 slice starts from `16d` and stops after
//! `upconv4`; the 32768 slice uses stride 2 for `upconv5`.
//!
//! Checkpoint tensor names follow the PyTorch module tree: `z_project.*`,
//! `z_batchnorm.*`, `upconvN.conv.*`, `upconvN.batch_norm.*`.

use std::path::Path;

use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::{
    batch_norm, conv_transpose1d, linear, BatchNorm, BatchNormConfig, ConvTranspose1d,
    ConvTranspose1dConfig, Linear, ModuleT, VarBuilder,
};
use tracing::{debug, info, warn};

use crate::config::{DevicePreference, GeneratorConfig, Precision};
use crate::error::{Result, SynthError};
use crate::generator::{Generator, HookRegistry};
use crate::stage::STAGE_ORDER;

/// Samples per channel after the latent projection.
const PROJECTED_LEN: usize = 16;

struct UpConv {
    name: &'static str,
    conv: ConvTranspose1d,
    batch_norm: Option<BatchNorm>,
}

impl UpConv {
    fn load(
        name: &'static str,
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        config: &GeneratorConfig,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        // Exact `stride`x upsampling: (L - 1) * s - 2p + k + 1 == s * L
        let cfg = ConvTranspose1dConfig {
            padding: (config.kernel_len + 1 - stride) / 2,
            output_padding: 1,
            stride,
            ..Default::default()
        };
        let conv = conv_transpose1d(in_channels, out_channels, config.kernel_len, cfg, vb.pp("conv"))?;
        let batch_norm = if config.use_batchnorm {
            Some(batch_norm(out_channels, BatchNormConfig::default(), vb.pp("batch_norm"))?)
        } else {
            None
        };
        Ok(Self { name, conv, batch_norm })
    }

    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let x = self.conv.forward(x)?;
        match &self.batch_norm {
            Some(bn) => bn.forward_t(&x, false),
            None => Ok(x),
        }
    }
}

pub struct WaveGan {
    z_project: Linear,
    z_batchnorm: Option<BatchNorm>,
    upconvs: Vec<UpConv>,
    projected_channels: usize,
    latent_dim: usize,
    slice_len: usize,
    device: Device,
    dtype: DType,
    hooks: HookRegistry,
}

impl std::fmt::Debug for WaveGan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveGan")
            .field("stages", &self.stages())
            .field("slice_len", &self.slice_len)
            .field("device", &device_label(&self.device))
            .field("dtype", &self.dtype)
            .finish()
    }
}

impl WaveGan {
    /// Load a checkpoint for `config`. Seeds the backend first when the
    /// config asks for determinism.
    pub fn load(config: &GeneratorConfig, checkpoint: &Path) -> Result<Self> {
        config.validate().map_err(|e| SynthError::ModelLoad(e.to_string()))?;
        if !checkpoint.is_file() {
            return Err(SynthError::ModelLoad(format!(
                "checkpoint not found: {}",
                checkpoint.display()
            )));
        }

        let device = select_device(config.device)?;
        if let Some(seed) = config.determinism_seed {
            apply_determinism(&device, seed);
        }
        let dtype = compute_dtype(config.precision, &device);

        let is_pickle = matches!(
            checkpoint.extension().and_then(|e| e.to_str()),
            Some("pt") | Some("pth")
        );
        let vb = if is_pickle {
            VarBuilder::from_pth(checkpoint, dtype, &device)
        } else {
            // SAFETY: the checkpoint is opened read-only and is not modified
            // while the mapping is alive.
            unsafe { VarBuilder::from_mmaped_safetensors(&[checkpoint], dtype, &device) }
        }
        .map_err(|e| {
            SynthError::ModelLoad(format!("failed to read {}: {e}", checkpoint.display()))
        })?;

        let model = Self::from_var_builder(config, vb).map_err(|e| {
            SynthError::ModelLoad(format!(
                "checkpoint {} does not match the {} generator: {e}",
                checkpoint.display(),
                config.variant
            ))
        })?;
        info!(
            "Loaded WaveGAN generator from {} ({})",
            checkpoint.display(),
            model.describe()
        );
        Ok(model)
    }

    /// Build the network from already-resolved weights. Device and dtype are
    /// taken from the var builder.
    pub fn from_var_builder(config: &GeneratorConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let dim_mul = if config.slice_len == 16384 { 16 } else { 32 };
        let projected_channels = config.width * dim_mul;

        let z_project = linear(
            config.latent_dim,
            PROJECTED_LEN * projected_channels,
            vb.pp("z_project"),
        )?;
        let z_batchnorm = if config.use_batchnorm {
            Some(batch_norm(projected_channels, BatchNormConfig::default(), vb.pp("z_batchnorm"))?)
        } else {
            None
        };

        // upconv names are STAGE_ORDER[1..]; 16384 stops at upconv4
        let n_up = if config.slice_len == 16384 { 5 } else { 6 };
        let mut upconvs = Vec::with_capacity(n_up);
        let mut channels = projected_channels;
        for (i, &name) in STAGE_ORDER[1..=n_up].iter().enumerate() {
            let last = i + 1 == n_up;
            let out_channels = if last { 1 } else { channels / 2 };
            let stride = if last && config.slice_len == 32768 { 2 } else { 4 };
            upconvs.push(UpConv::load(name, channels, out_channels, stride, config, vb.pp(name))?);
            channels = out_channels;
        }

        Ok(Self {
            z_project,
            z_batchnorm,
            upconvs,
            projected_channels,
            latent_dim: config.latent_dim,
            slice_len: config.slice_len,
            device: vb.device().clone(),
            dtype: vb.dtype(),
            hooks: HookRegistry::new(),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    fn forward(&mut self, latent: &[f32]) -> Result<Tensor> {
        let stage_err =
            |stage: &'static str| move |e: candle_core::Error| SynthError::evaluation(Some(stage), e);

        let z = Tensor::from_slice(latent, (1, self.latent_dim), &self.device)
            .and_then(|z| z.to_dtype(self.dtype))
            .map_err(stage_err("z_project"))?;

        let mut x = self
            .z_project
            .forward(&z)
            .and_then(|x| x.reshape((1, self.projected_channels, PROJECTED_LEN)))
            .map_err(stage_err("z_project"))?;
        if let Some(bn) = &self.z_batchnorm {
            x = bn.forward_t(&x, false).map_err(stage_err("z_project"))?;
        }
        self.hooks.record("z_project", || first_channel(&x))?;
        x = x.relu().map_err(stage_err("z_project"))?;

        let n_up = self.upconvs.len();
        for i in 0..n_up {
            let name = self.upconvs[i].name;
            x = self.upconvs[i].forward(&x).map_err(stage_err(name))?;
            self.hooks.record(name, || first_channel(&x))?;
            let activated = if i + 1 == n_up { x.tanh() } else { x.relu() };
            x = activated.map_err(stage_err(name))?;
        }
        Ok(x)
    }
}

impl Generator for WaveGan {
    fn stages(&self) -> Vec<&'static str> {
        std::iter::once(STAGE_ORDER[0])
            .chain(self.upconvs.iter().map(|u| u.name))
            .collect()
    }

    fn input_dim(&self) -> usize {
        self.latent_dim
    }

    fn output_len(&self) -> usize {
        self.slice_len
    }

    fn run(&mut self, latent: &[f32]) -> Result<Vec<f32>> {
        if latent.len() != self.latent_dim {
            return Err(SynthError::InvalidInput(format!(
                "latent has {} values, generator expects {}",
                latent.len(),
                self.latent_dim
            )));
        }
        self.hooks.begin_pass();
        let out = self.forward(latent)?;
        first_channel(&out).map_err(|e| e.in_stage(crate::stage::FINAL_STAGE))
    }

    fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    fn describe(&self) -> String {
        format!(
            "{} stages, {} samples, device={}, dtype={:?}",
            self.upconvs.len() + 1,
            self.slice_len,
            device_label(&self.device),
            self.dtype
        )
    }
}

/// Batch 0, channel 0 as host F32. Half-precision activations are widened here,
/// before any sample reaches the codec.
fn first_channel(x: &Tensor) -> Result<Vec<f32>> {
    x.i((0, 0))
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.to_device(&Device::Cpu))
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(|e| SynthError::evaluation(None, e))
}

/// Resolve a device preference. `Auto` falls back to the CPU when no CUDA
/// device is present or candle was built without CUDA.
pub fn select_device(preference: DevicePreference) -> Result<Device> {
    match preference {
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Auto => match Device::cuda_if_available(0) {
            Ok(device) => Ok(device),
            Err(e) => {
                warn!("CUDA initialisation failed, using CPU: {e}");
                Ok(Device::Cpu)
            }
        },
    }
}

pub fn compute_dtype(precision: Precision, device: &Device) -> DType {
    match precision {
        Precision::Half if device.is_cuda() || device.is_metal() => DType::F16,
        _ => DType::F32,
    }
}

/// Seed the backend RNG and note whether bitwise determinism can be expected.
/// Neither step is fatal.
fn apply_determinism(device: &Device, seed: u64) {
    if let Err(e) = device.set_seed(seed) {
        debug!("backend RNG not seeded ({e}), continuing");
    }
    if !device.is_cpu() {
        debug!(
            "deterministic kernels are not guaranteed on {}, continuing",
            device_label(device)
        );
    }
}

pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}
