//! Evaluation boundary between the synthesis pipeline and a generator network.
//!
//! A [`Generator`] runs one forward pass per [`Generator::run`] call and can
//! record the output of any of its named stages while a hook is attached to
//! it. Hooks are only ever attached through a [`CaptureScope`], which detaches
//! them again when it goes out of scope, whether or not the pass succeeded.

use std::collections::HashMap;

use crate::error::{Result, SynthError};

/// Handle returned by [`Generator::attach`]; pass it back to `detach`.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct HookToken(u64);

/// Attached hooks and the samples they captured during the current pass.
#[derive(Debug, Default)]
pub struct HookRegistry {
    next_id: u64,
    hooks: HashMap<u64, String>,
    captured: HashMap<String, Vec<f32>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, stage: &str) -> HookToken {
        let id = self.next_id;
        self.next_id += 1;
        self.hooks.insert(id, stage.to_string());
        HookToken(id)
    }

    pub fn detach(&mut self, token: HookToken) {
        self.hooks.remove(&token.0);
        if self.hooks.is_empty() {
            self.captured.clear();
        }
    }

    /// Number of hooks currently attached.
    pub fn attached(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_attached(&self, stage: &str) -> bool {
        self.hooks.values().any(|s| s == stage)
    }

    /// Drop anything captured by a previous pass.
    pub fn begin_pass(&mut self) {
        self.captured.clear();
    }

    /// Store the samples of `stage` if a hook is attached to it. `extract` is
    /// only invoked when something is listening.
    pub fn record<F>(&mut self, stage: &str, extract: F) -> Result<()>
    where
        F: FnOnce() -> Result<Vec<f32>>,
    {
        if self.is_attached(stage) {
            let samples = extract().map_err(|e| e.in_stage(stage))?;
            self.captured.insert(stage.to_string(), samples);
        }
        Ok(())
    }

    pub fn take_captures(&mut self) -> HashMap<String, Vec<f32>> {
        std::mem::take(&mut self.captured)
    }
}

/// A generator network with named, hookable internal stages.
pub trait Generator: Send {
    /// Hookable stages in architectural order, excluding `final`.
    fn stages(&self) -> Vec<&'static str>;

    /// Expected latent length.
    fn input_dim(&self) -> usize;

    /// Length of the final waveform.
    fn output_len(&self) -> usize;

    /// Single forward pass. Returns the first channel of the final output.
    fn run(&mut self, latent: &[f32]) -> Result<Vec<f32>>;

    fn hooks(&self) -> &HookRegistry;

    fn hooks_mut(&mut self) -> &mut HookRegistry;

    /// Human-readable description of the compute binding, for logs.
    fn describe(&self) -> String {
        "generator".to_string()
    }

    fn attach(&mut self, stage: &str) -> Result<HookToken> {
        if !self.stages().contains(&stage) {
            return Err(SynthError::UnknownStage(stage.to_string()));
        }
        Ok(self.hooks_mut().attach(stage))
    }

    fn detach(&mut self, token: HookToken) {
        self.hooks_mut().detach(token);
    }
}

/// Attached hooks on a generator, detached on drop.
pub struct CaptureScope<'a> {
    generator: &'a mut dyn Generator,
    tokens: Vec<HookToken>,
}

impl<'a> CaptureScope<'a> {
    /// Attach a hook to each of `stages`. If any attach fails, the hooks
    /// attached so far are released before returning.
    pub fn attach(generator: &'a mut dyn Generator, stages: &[&str]) -> Result<Self> {
        let mut scope = Self {
            generator,
            tokens: Vec::with_capacity(stages.len()),
        };
        for stage in stages {
            let token = scope.generator.attach(stage)?;
            scope.tokens.push(token);
        }
        Ok(scope)
    }

    pub fn run(&mut self, latent: &[f32]) -> Result<Vec<f32>> {
        self.generator.run(latent)
    }

    pub fn take_captures(&mut self) -> HashMap<String, Vec<f32>> {
        self.generator.hooks_mut().take_captures()
    }
}

impl Drop for CaptureScope<'_> {
    fn drop(&mut self) {
        for token in self.tokens.drain(..) {
            self.generator.detach(token);
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Deterministic stand-in network for pipeline tests.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    pub const FULL_STAGES: [&str; 7] = [
        "z_project", "upconv0", "upconv1", "upconv2", "upconv3", "upconv4", "upconv5",
    ];

    /// Stage `i` has `16 * 4^i` samples, all equal to `latent[99] * (i + 1)`.
    /// Stages are recorded in reverse so ordering has to come from the caller.
    pub struct MockGenerator {
        pub stage_names: Vec<&'static str>,
        pub input_dim: usize,
        pub output_len: usize,
        pub evaluations: Arc<AtomicUsize>,
        pub fail: bool,
        pub delay: Option<Duration>,
        /// Raised as the last step of `run`.
        pub finished: Option<Arc<AtomicBool>>,
        hooks: HookRegistry,
    }

    impl MockGenerator {
        pub fn new(stage_names: &[&'static str], output_len: usize) -> Self {
            Self {
                stage_names: stage_names.to_vec(),
                input_dim: crate::latent::LATENT_DIM,
                output_len,
                evaluations: Arc::new(AtomicUsize::new(0)),
                fail: false,
                delay: None,
                finished: None,
                hooks: HookRegistry::new(),
            }
        }

        pub fn full() -> Self {
            Self::new(&FULL_STAGES, 65536)
        }

        pub fn stage_len(index: usize) -> usize {
            16 * 4usize.pow(index as u32)
        }
    }

    impl Generator for MockGenerator {
        fn stages(&self) -> Vec<&'static str> {
            self.stage_names.clone()
        }

        fn input_dim(&self) -> usize {
            self.input_dim
        }

        fn output_len(&self) -> usize {
            self.output_len
        }

        fn run(&mut self, latent: &[f32]) -> Result<Vec<f32>> {
            self.evaluations.fetch_add(1, Ordering::SeqCst);
            self.hooks.begin_pass();
            let marker = latent[latent.len() - 1];
            for (i, name) in self.stage_names.clone().iter().enumerate().rev() {
                self.hooks.record(name, || {
                    Ok(vec![marker * (i as f32 + 1.0); Self::stage_len(i)])
                })?;
                if let Some(delay) = self.delay {
                    std::thread::sleep(delay);
                }
            }
            if self.fail {
                return Err(SynthError::evaluation(Some("upconv2"), "mock failure"));
            }
            let waveform = vec![marker; self.output_len];
            if let Some(finished) = &self.finished {
                finished.store(true, Ordering::SeqCst);
            }
            Ok(waveform)
        }

        fn hooks(&self) -> &HookRegistry {
            &self.hooks
        }

        fn hooks_mut(&mut self) -> &mut HookRegistry {
            &mut self.hooks
        }
    }
}
