use std::time::Instant;

use tracing::debug;

use crate::error::{Result, SynthError};
use crate::generator::{CaptureScope, Generator};
use crate::latent::LatentVector;
use crate::stage::{stage_rank, RawCapture, FINAL_STAGE};

/// Runs a [`Generator`] once per call, optionally capturing every stage it exposes.
pub struct GeneratorAdapter {
    generator: Box<dyn Generator>,
}

impl GeneratorAdapter {
    pub fn new(generator: Box<dyn Generator>) -> Self {
        Self { generator }
    }

    pub fn generator(&self) -> &dyn Generator {
        self.generator.as_ref()
    }

    /// Hookable stages in architectural order, followed by `final`.
    pub fn stage_names(&self) -> Vec<&'static str> {
        let mut names = self.ordered_points();
        names.push(FINAL_STAGE);
        names
    }

    pub fn output_len(&self) -> usize {
        self.generator.output_len()
    }

    fn ordered_points(&self) -> Vec<&'static str> {
        let mut points: Vec<&'static str> = self
            .generator
            .stages()
            .into_iter()
            .filter(|s| *s != FINAL_STAGE)
            .collect();
        points.sort_by_key(|s| stage_rank(s).unwrap_or(usize::MAX));
        points
    }

    fn check_latent(&self, latent: &LatentVector) -> Result<()> {
        let expected = self.generator.input_dim();
        if latent.len() != expected {
            return Err(SynthError::InvalidInput(format!(
                "latent has {} values, generator expects {}",
                latent.len(),
                expected
            )));
        }
        Ok(())
    }

    /// One forward pass without instrumentation.
    pub fn evaluate(&mut self, latent: &LatentVector) -> Result<Vec<f32>> {
        self.check_latent(latent)?;
        let started = Instant::now();
        let waveform = self.generator.run(latent.as_slice())?;
        debug!("evaluate: {} samples in {:?}", waveform.len(), started.elapsed());
        Ok(waveform)
    }

    /// One forward pass with every exposed stage captured. Stages come back
    /// raw, in architectural order and without `final`; stages the network
    /// does not expose are simply absent.
    pub fn evaluate_with_capture(&mut self, latent: &LatentVector) -> Result<RawCapture> {
        self.check_latent(latent)?;
        let points = self.ordered_points();
        let started = Instant::now();

        let (waveform, mut captured) = {
            let mut scope = CaptureScope::attach(self.generator.as_mut(), &points)?;
            let waveform = scope.run(latent.as_slice())?;
            (waveform, scope.take_captures())
        };
        debug!(
            "evaluate_with_capture: {} stages captured in {:?}",
            captured.len(),
            started.elapsed()
        );

        let stages = points
            .into_iter()
            .filter_map(|name| captured.remove(name).map(|raw| (name, raw)))
            .collect();
        Ok(RawCapture { waveform, stages })
    }
}
