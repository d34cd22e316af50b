// Configuration for the server and the generator it hosts

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use gan_core::{GeneratorConfig, Variant};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    /// Root served under `/static`; generated artifacts live below it.
    pub static_dir: PathBuf,
    pub variant: Variant,
    pub checkpoint: Option<PathBuf>,
    pub checkpoint_dir: Option<PathBuf>,
    /// Overrides the variant's determinism seed.
    pub seed: Option<u64>,
    /// Load the generator before accepting requests.
    pub preload: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            rate_limit_per_minute: 60,
            request_timeout_secs: 300,
            cors_allowed_origins: None,
            static_dir: PathBuf::from("static"),
            variant: Variant::Standard,
            checkpoint: None,
            checkpoint_dir: None,
            seed: None,
            preload: false,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = lookup("PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        let rate_limit_per_minute = lookup("RATE_LIMIT_PER_MINUTE")
            .and_then(|v| v.parse().ok())
            .filter(|v: &u32| *v > 0)
            .unwrap_or(defaults.rate_limit_per_minute);

        let request_timeout_secs = lookup("REQUEST_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.request_timeout_secs);

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        let static_dir = lookup("STATIC_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.static_dir);

        let variant = match lookup("GAN_VARIANT").filter(|v| !v.trim().is_empty()) {
            Some(name) => name.parse::<Variant>().context("GAN_VARIANT")?,
            None => defaults.variant,
        };

        let seed = match lookup("GAN_SEED").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("GAN_SEED must be an unsigned integer, got '{raw}'"))?,
            ),
            None => None,
        };

        let preload = lookup("GAN_PRELOAD")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.preload);

        Ok(Self {
            port,
            rate_limit_per_minute,
            request_timeout_secs,
            cors_allowed_origins,
            static_dir,
            variant,
            checkpoint: lookup("GAN_CHECKPOINT")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            checkpoint_dir: lookup(gan_core::config::CHECKPOINT_DIR_ENV)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            seed,
            preload,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Where `/generate_file` and `/generate_layer_file` write.
    pub fn batch_dir(&self) -> PathBuf {
        self.static_dir.join("batch")
    }

    /// Parent of the per-request layer directories.
    pub fn evolution_dir(&self) -> PathBuf {
        self.static_dir.join("evolution")
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        let config = self.variant.config();
        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }
}
