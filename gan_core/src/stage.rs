//! Captured intermediate stages and their persisted artifacts.

use std::path::PathBuf;

use serde::Serialize;

use crate::resample::resample;
use crate::wav::peak_normalize;

/// Name of the generator output stage.
pub const FINAL_STAGE: &str = "final";

/// Every stage name a generator may expose, in architectural order.
pub const STAGE_ORDER: [&str; 8] = [
    "z_project", "upconv0", "upconv1", "upconv2", "upconv3", "upconv4", "upconv5", FINAL_STAGE,
];

/// Position of `name` in [`STAGE_ORDER`], `None` for names outside the vocabulary.
pub fn stage_rank(name: &str) -> Option<usize> {
    STAGE_ORDER.iter().position(|s| *s == name)
}

/// One intermediate output, reduced to its first channel.
#[derive(Debug, Clone)]
pub struct CapturedStage {
    pub name: String,
    pub raw: Vec<f32>,
    pub raw_normalized: Vec<f32>,
    pub stretched_normalized: Vec<f32>,
}

impl CapturedStage {
    /// Derive the normalized and stretched forms of `raw`, stretching to `target_len`.
    pub fn new(name: impl Into<String>, raw: Vec<f32>, target_len: usize) -> Self {
        let raw_normalized = peak_normalize(&raw);
        let stretched_normalized = peak_normalize(&resample(&raw, target_len));
        Self {
            name: name.into(),
            raw,
            raw_normalized,
            stretched_normalized,
        }
    }

    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }

    pub fn stretched_len(&self) -> usize {
        self.stretched_normalized.len()
    }

    pub fn is_final(&self) -> bool {
        self.name == FINAL_STAGE
    }
}

/// Untouched output of one instrumented pass.
#[derive(Debug, Clone)]
pub struct RawCapture {
    pub waveform: Vec<f32>,
    /// Captured stages in architectural order, `final` excluded.
    pub stages: Vec<(&'static str, Vec<f32>)>,
}

/// Output of one forward evaluation.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub waveform: Vec<f32>,
    /// Architectural order, ending with the `final` stage.
    pub stages: Vec<CapturedStage>,
}

impl SynthesisResult {
    /// Normalize and stretch every captured stage to the waveform length and
    /// append the `final` stage.
    pub fn from_capture(capture: RawCapture) -> Self {
        let RawCapture { waveform, stages } = capture;
        let final_len = waveform.len();
        let mut captured: Vec<CapturedStage> = stages
            .into_iter()
            .map(|(name, raw)| CapturedStage::new(name, raw, final_len))
            .collect();
        captured.push(CapturedStage::new(FINAL_STAGE, waveform.clone(), final_len));
        Self {
            waveform,
            stages: captured,
        }
    }

    pub fn final_len(&self) -> usize {
        self.waveform.len()
    }

    pub fn stage(&self, name: &str) -> Option<&CapturedStage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Metadata of a stage written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageArtifact {
    pub name: String,
    pub raw_path: PathBuf,
    pub stretched_path: PathBuf,
    pub raw_len: usize,
    pub stretched_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_rank_follows_architecture() {
        assert_eq!(stage_rank("z_project"), Some(0));
        assert!(stage_rank("upconv4") < stage_rank("upconv5"));
        assert_eq!(stage_rank(FINAL_STAGE), Some(STAGE_ORDER.len() - 1));
        assert_eq!(stage_rank("conv_bogus"), None);
    }

    #[test]
    fn test_captured_stage_derives_lengths() {
        let raw: Vec<f32> = (0..16).map(|i| i as f32 / 32.0).collect();
        let stage = CapturedStage::new("z_project", raw, 64);
        assert_eq!(stage.raw_len(), 16);
        assert_eq!(stage.stretched_len(), 64);
        assert_eq!(stage.raw_normalized.iter().cloned().fold(0.0f32, f32::max), 1.0);
        assert_eq!(stage.stretched_normalized.iter().cloned().fold(0.0f32, f32::max), 1.0);
    }

    #[test]
    fn test_from_capture_appends_final_stage() {
        let capture = RawCapture {
            waveform: vec![0.5; 64],
            stages: vec![("z_project", vec![0.25; 16]), ("upconv0", vec![-0.5; 64])],
        };
        let result = SynthesisResult::from_capture(capture);
        assert_eq!(result.stage_names(), vec!["z_project", "upconv0", FINAL_STAGE]);
        assert_eq!(result.final_len(), 64);
        assert!(result.stages.iter().all(|s| s.stretched_len() == 64));
        assert_eq!(result.stage("z_project").unwrap().raw_len(), 16);
        assert_eq!(result.stages.last().unwrap().raw, result.waveform);
    }

    #[test]
    fn test_final_stage_raw_equals_stretched() {
        let raw = vec![0.2f32, -0.4, 0.1, 0.3];
        let stage = CapturedStage::new(FINAL_STAGE, raw.clone(), raw.len());
        assert!(stage.is_final());
        assert_eq!(stage.raw_normalized, stage.stretched_normalized);
    }
}
