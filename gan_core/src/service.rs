use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use tracing::{debug, info};

use crate::adapter::GeneratorAdapter;
use crate::config::GeneratorConfig;
use crate::error::{Result, SynthError};
use crate::generator::Generator;
use crate::latent::{CategoricalCode, LatentVector};
use crate::stage::{CapturedStage, StageArtifact, SynthesisResult};
use crate::wav::write_wav_file;
use crate::wavegan::WaveGan;

/// Builds the generator on first use.
pub type GeneratorLoader =
    Box<dyn Fn(&GeneratorConfig) -> Result<Box<dyn Generator>> + Send + Sync>;

/// Shared entry point for all synthesis requests.
///
/// The generator is built lazily by the first caller; concurrent first
/// callers block until it is ready and then reuse it. A failed load is not
/// remembered, so the next request retries after the operator fixes the
/// checkpoint. Only the forward pass runs under the evaluation mutex;
/// resampling, normalization and file writes happen after it is released.
pub struct SynthesisService {
    config: GeneratorConfig,
    loader: GeneratorLoader,
    handle: OnceLock<Mutex<GeneratorAdapter>>,
    init_lock: Mutex<()>,
}

impl std::fmt::Debug for SynthesisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisService")
            .field("config", &self.config)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl SynthesisService {
    /// Service backed by the WaveGAN checkpoint at `checkpoint`.
    pub fn new(config: GeneratorConfig, checkpoint: impl Into<PathBuf>) -> Self {
        let checkpoint = checkpoint.into();
        Self::with_loader(
            config,
            Box::new(move |cfg: &GeneratorConfig| {
                Ok(Box::new(WaveGan::load(cfg, &checkpoint)?) as Box<dyn Generator>)
            }),
        )
    }

    pub fn with_loader(config: GeneratorConfig, loader: GeneratorLoader) -> Self {
        Self {
            config,
            loader,
            handle: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.get().is_some()
    }

    /// Force the lazy load now.
    pub fn preload(&self) -> Result<()> {
        self.handle().map(|_| ())
    }

    fn handle(&self) -> Result<&Mutex<GeneratorAdapter>> {
        if let Some(handle) = self.handle.get() {
            return Ok(handle);
        }
        let _init = self
            .init_lock
            .lock()
            .map_err(|_| SynthError::ModelLoad("generator init lock poisoned".to_string()))?;
        if let Some(handle) = self.handle.get() {
            return Ok(handle);
        }

        let started = Instant::now();
        info!("Loading {} generator...", self.config.variant);
        let generator = (self.loader)(&self.config)?;
        info!(
            "Generator ready in {:.2}s: {}",
            started.elapsed().as_secs_f64(),
            generator.describe()
        );
        Ok(self
            .handle
            .get_or_init(|| Mutex::new(GeneratorAdapter::new(generator))))
    }

    fn lock_adapter(&self) -> Result<MutexGuard<'_, GeneratorAdapter>> {
        self.handle()?.lock().map_err(|_| {
            SynthError::evaluation(
                None,
                "generator lock poisoned by an earlier panic, restart the service",
            )
        })
    }

    /// Draw a latent for `code`. Uses `seed`, else the configured determinism
    /// seed, else fresh entropy.
    pub fn sample_latent(&self, code: &CategoricalCode, seed: Option<u64>) -> LatentVector {
        LatentVector::from_code_seeded(code, seed.or(self.config.determinism_seed))
    }

    /// Final waveform for `latent`.
    pub fn generate(&self, latent: &LatentVector) -> Result<Vec<f32>> {
        self.lock_adapter()?.evaluate(latent)
    }

    /// All stages for `latent`, in memory.
    pub fn evaluate_layers(&self, latent: &LatentVector) -> Result<SynthesisResult> {
        // guard is dropped at the end of this statement
        let capture = self.lock_adapter()?.evaluate_with_capture(latent)?;
        Ok(SynthesisResult::from_capture(capture))
    }

    /// Capture every stage and write `<name>_raw.wav` and
    /// `<name>_stretched.wav` for each into `output_dir`. The `final` stage
    /// is written once as `final_raw.wav` and reported under both paths.
    pub fn generate_with_layers(
        &self,
        latent: &LatentVector,
        output_dir: &Path,
    ) -> Result<(Vec<StageArtifact>, usize)> {
        fs::create_dir_all(output_dir).map_err(|e| SynthError::storage(output_dir, e))?;
        let result = self.evaluate_layers(latent)?;
        let final_len = result.final_len();

        let mut artifacts = Vec::with_capacity(result.stages.len());
        for stage in &result.stages {
            let artifact = write_stage(stage, output_dir).map_err(|e| e.in_stage(&stage.name))?;
            artifacts.push(artifact);
        }
        debug!("wrote {} stage artifacts to {}", artifacts.len(), output_dir.display());
        Ok((artifacts, final_len))
    }

    /// Generate from `code` and store the waveform as `gen_<uuid>.wav` in
    /// `output_dir`. Returns the file and the exact latent used.
    pub fn synthesize_and_store(
        &self,
        code: &CategoricalCode,
        output_dir: &Path,
    ) -> Result<(PathBuf, LatentVector)> {
        self.synthesize_and_store_seeded(code, output_dir, None)
    }

    pub fn synthesize_and_store_seeded(
        &self,
        code: &CategoricalCode,
        output_dir: &Path,
        seed: Option<u64>,
    ) -> Result<(PathBuf, LatentVector)> {
        let latent = self.sample_latent(code, seed);
        let path = self.store_latent(&latent, output_dir)?;
        Ok((path, latent))
    }

    /// Generate from an explicit `latent` and store the waveform as
    /// `gen_<uuid>.wav` in `output_dir`.
    pub fn store_latent(&self, latent: &LatentVector, output_dir: &Path) -> Result<PathBuf> {
        let audio = self.generate(latent)?;
        let path = output_dir.join(format!("gen_{}.wav", uuid::Uuid::new_v4().simple()));
        write_wav_file(&path, &audio, true)?;
        Ok(path)
    }

    /// Decompose `latent` into a fresh directory under `work_dir` and copy the
    /// stretched artifact of `stage` (case-insensitive) to
    /// `dest_dir/layer_<stage>_<id>.wav`. Returns the copy and every artifact
    /// the decomposition wrote.
    pub fn extract_stage(
        &self,
        latent: &LatentVector,
        stage: &str,
        work_dir: &Path,
        dest_dir: &Path,
    ) -> Result<(PathBuf, Vec<StageArtifact>)> {
        let target = stage.trim().to_ascii_lowercase();
        if target.is_empty() {
            return Err(SynthError::InvalidInput("stage name is empty".to_string()));
        }

        let run_dir = work_dir.join(unique_run_name());
        let (artifacts, _) = self.generate_with_layers(latent, &run_dir)?;
        let hit = artifacts
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(&target))
            .ok_or_else(|| SynthError::UnknownStage(target.clone()))?;

        fs::create_dir_all(dest_dir).map_err(|e| SynthError::storage(dest_dir, e))?;
        let short_id = &uuid::Uuid::new_v4().simple().to_string()[..6];
        let dest = dest_dir.join(format!("layer_{target}_{short_id}.wav"));
        fs::copy(&hit.stretched_path, &dest)
            .map_err(|e| SynthError::storage(&dest, e).in_stage(&hit.name))?;
        Ok((dest, artifacts))
    }
}

/// Directory name for one request's artifacts: `req_<millis>_<id>`.
pub fn unique_run_name() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("req_{millis}_{}", &id[..6])
}

fn write_stage(stage: &CapturedStage, dir: &Path) -> Result<StageArtifact> {
    let raw_path = dir.join(format!("{}_raw.wav", stage.name));
    write_wav_file(&raw_path, &stage.raw_normalized, false)?;

    let stretched_path = if stage.is_final() {
        raw_path.clone()
    } else {
        let path = dir.join(format!("{}_stretched.wav", stage.name));
        write_wav_file(&path, &stage.stretched_normalized, false)?;
        path
    };

    Ok(StageArtifact {
        name: stage.name.clone(),
        raw_path,
        stretched_path,
        raw_len: stage.raw_len(),
        stretched_len: stage.stretched_len(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::Variant;
    use crate::generator::mock::MockGenerator;
    use crate::stage::FINAL_STAGE;
    use crate::wav::read_wav_file;

    const ALTERNATING: [i64; 16] = [1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0];

    struct Counters {
        loads: Arc<AtomicUsize>,
        evaluations: Arc<AtomicUsize>,
    }

    fn mock_service(variant: Variant, delay: Option<Duration>) -> (SynthesisService, Counters) {
        let loads = Arc::new(AtomicUsize::new(0));
        let evaluations = Arc::new(AtomicUsize::new(0));
        let counters = Counters {
            loads: loads.clone(),
            evaluations: evaluations.clone(),
        };
        let service = SynthesisService::with_loader(
            variant.config(),
            Box::new(move |cfg: &GeneratorConfig| {
                loads.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                let mut generator = MockGenerator::full();
                generator.output_len = cfg.output_len();
                generator.evaluations = evaluations.clone();
                generator.delay = delay;
                Ok(Box::new(generator) as Box<dyn Generator>)
            }),
        );
        (service, counters)
    }

    fn marked(marker: f32) -> LatentVector {
        let mut values = [0.0f32; 100];
        values[99] = marker;
        LatentVector::from_slice(&values).unwrap()
    }

    #[test]
    fn test_lazy_load_happens_once() {
        let (service, counters) = mock_service(Variant::Standard, None);
        assert!(!service.is_loaded());
        assert_eq!(counters.loads.load(Ordering::SeqCst), 0);

        let wave = service.generate(&marked(0.5)).unwrap();
        assert_eq!(wave.len(), 65536);
        service.generate(&marked(0.5)).unwrap();

        assert!(service.is_loaded());
        assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
        assert_eq!(counters.evaluations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_first_calls_construct_once() {
        let (service, counters) = mock_service(Variant::Standard, None);
        let service = Arc::new(service);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = service.clone();
                std::thread::spawn(move || service.generate(&marked(i as f32 / 10.0)).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
        assert_eq!(counters.evaluations.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_failed_load_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let service = SynthesisService::with_loader(
            Variant::Standard.config(),
            Box::new(move |_cfg: &GeneratorConfig| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SynthError::ModelLoad("checkpoint missing".to_string()))
                } else {
                    Ok(Box::new(MockGenerator::full()) as Box<dyn Generator>)
                }
            }),
        );

        assert!(matches!(service.generate(&marked(0.1)), Err(SynthError::ModelLoad(_))));
        assert!(!service.is_loaded());
        assert!(service.generate(&marked(0.1)).is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_layer_requests_never_mix_stages() {
        let (service, _counters) = mock_service(Variant::Standard, Some(Duration::from_millis(1)));
        let service = Arc::new(service);
        let handles: Vec<_> = (1..=6)
            .map(|i| {
                let service = service.clone();
                std::thread::spawn(move || {
                    let marker = i as f32 / 10.0;
                    let result = service.evaluate_layers(&marked(marker)).unwrap();
                    (marker, result)
                })
            })
            .collect();

        for h in handles {
            let (marker, result) = h.join().unwrap();
            assert_eq!(result.stages.len(), 8);
            for (i, stage) in result.stages.iter().enumerate() {
                let expected = if stage.is_final() { marker } else { marker * (i as f32 + 1.0) };
                assert!(
                    stage.raw.iter().all(|&v| v == expected),
                    "stage {} of request {marker} carries foreign samples",
                    stage.name
                );
            }
        }
    }

    #[test]
    fn test_lock_is_free_while_stages_are_stretched() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let service = Arc::new(SynthesisService::with_loader(
            Variant::Standard.config(),
            Box::new(move |_cfg: &GeneratorConfig| {
                let mut generator = MockGenerator::full();
                generator.output_len = 1 << 20;
                generator.finished = Some(flag.clone());
                Ok(Box::new(generator) as Box<dyn Generator>)
            }),
        ));
        service.preload().unwrap();

        let worker = {
            let service = service.clone();
            std::thread::spawn(move || service.evaluate_layers(&marked(0.5)).map(|r| r.stages.len()))
        };
        while !finished.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }

        // the forward pass is over; stretching eight stages to 2^20 samples
        // must not keep other requests waiting
        let mutex = service.handle.get().unwrap();
        let mut free_polls = 0;
        while !worker.is_finished() {
            if mutex.try_lock().is_ok() {
                free_polls += 1;
            }
        }
        assert_eq!(worker.join().unwrap().unwrap(), 8);
        assert!(free_polls > 0, "evaluation lock held during post-processing");
    }

    #[test]
    fn test_generate_with_layers_writes_ordered_artifacts() {
        let (service, _) = mock_service(Variant::Standard, None);
        let dir = tempfile::tempdir().unwrap();

        let (artifacts, final_len) = service.generate_with_layers(&marked(0.4), dir.path()).unwrap();
        assert_eq!(final_len, 65536);
        let names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["z_project", "upconv0", "upconv1", "upconv2", "upconv3", "upconv4", "upconv5", "final"]
        );

        let z = &artifacts[0];
        assert_eq!(z.raw_len, 16);
        assert_eq!(z.stretched_len, final_len);
        assert_eq!(z.raw_path, dir.path().join("z_project_raw.wav"));
        assert_eq!(z.stretched_path, dir.path().join("z_project_stretched.wav"));
        let (raw, _) = read_wav_file(&z.raw_path).unwrap();
        let (stretched, _) = read_wav_file(&z.stretched_path).unwrap();
        assert_eq!(raw.len(), 16);
        assert_eq!(stretched.len(), final_len);
        assert!(raw.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_final_artifacts_are_byte_identical() {
        let (service, _) = mock_service(Variant::Short, None);
        let dir = tempfile::tempdir().unwrap();
        let (artifacts, final_len) = service.generate_with_layers(&marked(0.7), dir.path()).unwrap();
        assert_eq!(final_len, 16384);

        let last = artifacts.last().unwrap();
        assert_eq!(last.name, FINAL_STAGE);
        assert_eq!(last.raw_len, last.stretched_len);
        let raw = std::fs::read(&last.raw_path).unwrap();
        let stretched = std::fs::read(&last.stretched_path).unwrap();
        assert_eq!(raw, stretched);
    }

    #[test]
    fn test_storage_error_names_stage() {
        let (service, _) = mock_service(Variant::Standard, None);
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let err = service.generate_with_layers(&marked(0.1), &blocker).unwrap_err();
        assert!(matches!(err, SynthError::Storage { .. }));
    }

    #[test]
    fn test_synthesize_and_store_returns_latent_used() {
        let (service, _) = mock_service(Variant::Standard, None);
        let dir = tempfile::tempdir().unwrap();
        let code = CategoricalCode::from_values(&ALTERNATING).unwrap();

        let (path, latent) = service.synthesize_and_store(&code, dir.path()).unwrap();
        assert!(path.starts_with(dir.path()));
        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("gen_") && file_name.ends_with(".wav"));
        for (i, &bit) in ALTERNATING.iter().enumerate() {
            assert_eq!(latent.as_slice()[i], bit as f32);
        }
        let (samples, _) = read_wav_file(&path).unwrap();
        assert_eq!(samples.len(), 65536);
    }

    #[test]
    fn test_store_latent_uses_latent_verbatim() {
        let (service, counters) = mock_service(Variant::Short, None);
        let dir = tempfile::tempdir().unwrap();

        let path = service.store_latent(&marked(-0.5), dir.path()).unwrap();
        let (samples, _) = read_wav_file(&path).unwrap();
        assert_eq!(samples.len(), 16384);
        // constant waveform normalizes to full scale with the latent's sign
        assert!(samples.iter().all(|&v| (v + 1.0).abs() < 1e-3));
        assert_eq!(counters.evaluations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deterministic_variant_repeats_latent_and_output() {
        let (service, _) = mock_service(Variant::Deterministic, None);
        let dir = tempfile::tempdir().unwrap();
        let code = CategoricalCode::from_values(&ALTERNATING).unwrap();

        let (path_a, latent_a) = service.synthesize_and_store(&code, dir.path()).unwrap();
        let (path_b, latent_b) = service.synthesize_and_store(&code, dir.path()).unwrap();
        assert_ne!(path_a, path_b);
        assert_eq!(latent_a, latent_b);
        assert_eq!(std::fs::read(&path_a).unwrap(), std::fs::read(&path_b).unwrap());
    }

    #[test]
    fn test_invalid_code_never_reaches_generator() {
        let (_service, counters) = mock_service(Variant::Standard, None);
        let mut bad = ALTERNATING;
        bad[3] = 2;
        assert!(CategoricalCode::from_values(&bad).is_err());
        assert!(CategoricalCode::from_values(&ALTERNATING[..15]).is_err());
        assert_eq!(counters.loads.load(Ordering::SeqCst), 0);
        assert_eq!(counters.evaluations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_extract_stage_copies_stretched_artifact() {
        let (service, _) = mock_service(Variant::Standard, None);
        let work = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        let (path, artifacts) = service
            .extract_stage(&marked(0.3), "UpConv2", work.path(), dest.path())
            .unwrap();
        assert_eq!(artifacts.len(), 8);
        assert!(artifacts.iter().all(|a| a.raw_path.starts_with(work.path())));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("layer_upconv2_"));
        let (samples, _) = read_wav_file(&path).unwrap();
        assert_eq!(samples.len(), 65536);

        let err = service
            .extract_stage(&marked(0.3), "upconv9", work.path(), dest.path())
            .unwrap_err();
        assert!(matches!(err, SynthError::UnknownStage(ref s) if s == "upconv9"));
        assert!(matches!(
            service.extract_stage(&marked(0.3), "  ", work.path(), dest.path()),
            Err(SynthError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unique_run_names_differ() {
        assert_ne!(unique_run_name(), unique_run_name());
        assert!(unique_run_name().starts_with("req_"));
    }
}
