//! WaveGAN synthesis with per-stage capture.
//!
//! [`SynthesisService`] owns a lazily loaded generator and turns a
//! categorical code into a waveform, or into one time-aligned WAV per
//! internal stage (`z_project`, `upconv0`..`upconv5`, `final`).

mod adapter;
pub mod config;
mod error;
pub mod generator;
mod latent;
mod resample;
mod service;
mod stage;
pub mod wav;
pub mod wavegan;

pub use adapter::GeneratorAdapter;
pub use config::{
    locate_checkpoint, locate_checkpoint_in, DevicePreference, GeneratorConfig, Precision, Variant,
};
pub use error::{Result, SynthError};
pub use generator::{CaptureScope, Generator, HookRegistry, HookToken};
pub use latent::{CategoricalCode, LatentVector, CODE_LEN, LATENT_DIM};
pub use resample::resample;
pub use service::{unique_run_name, GeneratorLoader, SynthesisService};
pub use stage::{
    stage_rank, CapturedStage, RawCapture, StageArtifact, SynthesisResult, FINAL_STAGE, STAGE_ORDER,
};
pub use wav::{encode_wav_bytes, peak_normalize, read_wav_file, write_wav_file, SAMPLE_RATE};
pub use wavegan::WaveGan;
