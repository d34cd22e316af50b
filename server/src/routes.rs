use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use gan_core::{
    encode_wav_bytes, unique_run_name, LatentVector, StageArtifact, FINAL_STAGE, SAMPLE_RATE,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::extract::AppJson;
use crate::metrics::{system_metrics, MetricsResponse, ModelStatus};
use crate::validation::{
    resolve_static_file, static_url, validate_categorical_code, validate_language, validate_latent,
    validate_layer_name,
};
use crate::AppState;

/// Either a categorical code, from which a latent is sampled, or an explicit
/// 100-value latent `z`. A code sent along with `z` overwrites its leading
/// values.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub categorical_code: Option<Vec<i64>>,
    #[serde(default)]
    pub z: Option<Vec<f32>>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct LayerRequest {
    pub categorical_code: Vec<i64>,
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct TranscribeRequest {
    pub file: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Serialize)]
pub struct GenerateFileResponse {
    pub file: String,
    pub z: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Vec<i64>>,
}

#[derive(Serialize)]
pub struct LayerInfo {
    pub name: String,
    pub raw_url: String,
    pub stretched_url: String,
    pub raw_len: usize,
    pub stretched_len: usize,
}

#[derive(Serialize)]
pub struct EvolutionResponse {
    pub final_len: usize,
    pub layers: Vec<LayerInfo>,
}

#[derive(Serialize)]
pub struct LayerFileResponse {
    pub file: String,
    pub categorical_code: Vec<i64>,
}

#[derive(Serialize)]
pub struct PredictResponse {
    pub latent: Vec<f32>,
    pub categorical_code: Vec<i64>,
    pub sample_rate: u32,
    pub final_len: usize,
    pub layers: Vec<LayerInfo>,
    pub transcription: Option<asr_core::Transcript>,
}

/// Run blocking synthesis work off the async runtime.
async fn run_blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> gan_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::InternalError(format!("Task join error: {e}")))?
        .map_err(ApiError::from)
}

/// Count the request and record its latency under `endpoint`.
fn track<T>(state: &AppState, endpoint: &str, started: Instant, result: &Result<T, ApiError>) {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    state.metrics.record(endpoint, started.elapsed(), result.is_ok());
}

/// Latent for a generate request. Rejected before the model is touched.
fn resolve_latent(state: &AppState, req: &GenerateRequest) -> Result<LatentVector, ApiError> {
    let code = req
        .categorical_code
        .as_deref()
        .map(validate_categorical_code)
        .transpose()?;
    match (req.z.as_deref(), code) {
        (Some(z), code) => {
            let latent = validate_latent(z)?;
            Ok(match code {
                Some(code) => latent.with_code(&code),
                None => latent,
            })
        }
        (None, Some(code)) => Ok(state.synth.sample_latent(&code, req.seed)),
        (None, None) => Err(ApiError::InvalidInput(
            "Provide 16 binary values in 'categorical_code' or 100 values in 'z'".to_string(),
        )),
    }
}

fn layer_info(state: &AppState, artifact: &StageArtifact) -> LayerInfo {
    LayerInfo {
        name: artifact.name.clone(),
        raw_url: static_url(&state.config.static_dir, &artifact.raw_path),
        stretched_url: static_url(&state.config.static_dir, &artifact.stretched_path),
        raw_len: artifact.raw_len,
        stretched_len: artifact.stretched_len,
    }
}

fn artifact_count(layers: &[StageArtifact]) -> usize {
    layers
        .iter()
        .map(|a| if a.name == FINAL_STAGE { 1 } else { 2 })
        .sum()
}

pub async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "gan-layers",
        "variant": state.synth.config().variant.name(),
        "loaded": state.synth.is_loaded(),
    }))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "ok": true }))
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let config = state.synth.config();
    Json(MetricsResponse {
        timestamp: chrono::Utc::now(),
        system: system_metrics(state.request_count.load(Ordering::Relaxed)),
        model: ModelStatus {
            variant: config.variant.name().to_string(),
            loaded: state.synth.is_loaded(),
            output_len: config.output_len(),
        },
        endpoints: state.metrics.endpoint_snapshots(),
        synthesis: state.metrics.synthesis.snapshot(),
    })
}

pub async fn generate(
    State(state): State<AppState>,
    AppJson(req): AppJson<GenerateRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let result = generate_wav(&state, req).await;
    track(&state, "generate", started, &result);
    result
}

async fn generate_wav(state: &AppState, req: GenerateRequest) -> Result<Response, ApiError> {
    let latent = resolve_latent(state, &req)?;

    let synth = state.synth.clone();
    let started = Instant::now();
    let audio = run_blocking(move || synth.generate(&latent)).await?;
    state.metrics.synthesis.record_evaluation(started.elapsed(), audio.len());

    let bytes = encode_wav_bytes(&audio, true)?;
    debug!("generate: {} samples, {} bytes", audio.len(), bytes.len());
    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav"),
            (header::CONTENT_DISPOSITION, "inline; filename=\"output.wav\""),
        ],
        bytes,
    )
        .into_response())
}

pub async fn generate_file(
    State(state): State<AppState>,
    AppJson(req): AppJson<GenerateRequest>,
) -> Result<Json<GenerateFileResponse>, ApiError> {
    let started = Instant::now();
    let result = store_generated(&state, req).await;
    track(&state, "generate_file", started, &result);
    result.map(Json)
}

async fn store_generated(
    state: &AppState,
    req: GenerateRequest,
) -> Result<GenerateFileResponse, ApiError> {
    let latent = resolve_latent(state, &req)?;
    let synth = state.synth.clone();
    let batch_dir = state.config.batch_dir();

    let started = Instant::now();
    let stored = latent.clone();
    let path = run_blocking(move || synth.store_latent(&stored, &batch_dir)).await?;
    state
        .metrics
        .synthesis
        .record_evaluation(started.elapsed(), state.synth.config().output_len());

    Ok(GenerateFileResponse {
        file: static_url(&state.config.static_dir, &path),
        z: latent.into_vec(),
        code: req.categorical_code,
    })
}

/// Decompose `latent` into a fresh directory under the evolution root.
async fn decompose(
    state: &AppState,
    latent: LatentVector,
) -> Result<(Vec<StageArtifact>, usize), ApiError> {
    let synth = state.synth.clone();
    let run_dir: PathBuf = state.config.evolution_dir().join(unique_run_name());
    let started = Instant::now();
    let (artifacts, final_len) =
        run_blocking(move || synth.generate_with_layers(&latent, &run_dir)).await?;
    state
        .metrics
        .synthesis
        .record_layers(started.elapsed(), final_len, artifact_count(&artifacts));
    Ok((artifacts, final_len))
}

pub async fn generate_evolution(
    State(state): State<AppState>,
    AppJson(req): AppJson<GenerateRequest>,
) -> Result<Json<EvolutionResponse>, ApiError> {
    let started = Instant::now();
    let result = evolution(&state, req).await;
    track(&state, "generate_evolution", started, &result);
    result.map(Json)
}

async fn evolution(state: &AppState, req: GenerateRequest) -> Result<EvolutionResponse, ApiError> {
    let latent = resolve_latent(state, &req)?;
    let (artifacts, final_len) = decompose(state, latent).await?;
    Ok(EvolutionResponse {
        final_len,
        layers: artifacts.iter().map(|a| layer_info(state, a)).collect(),
    })
}

pub async fn generate_layer_file(
    State(state): State<AppState>,
    AppJson(req): AppJson<LayerRequest>,
) -> Result<Json<LayerFileResponse>, ApiError> {
    let started = Instant::now();
    let result = layer_file(&state, req).await;
    track(&state, "generate_layer_file", started, &result);
    result.map(Json)
}

async fn layer_file(state: &AppState, req: LayerRequest) -> Result<LayerFileResponse, ApiError> {
    let code = validate_categorical_code(&req.categorical_code)?;
    let layer = validate_layer_name(req.layer.as_deref())?;
    let latent = state.synth.sample_latent(&code, req.seed);

    let synth = state.synth.clone();
    let work_dir = state.config.evolution_dir();
    let dest_dir = state.config.batch_dir();
    let started = Instant::now();
    let (path, artifacts) =
        run_blocking(move || synth.extract_stage(&latent, &layer, &work_dir, &dest_dir)).await?;
    state.metrics.synthesis.record_layers(
        started.elapsed(),
        state.synth.config().output_len(),
        artifact_count(&artifacts),
    );

    Ok(LayerFileResponse {
        file: static_url(&state.config.static_dir, &path),
        categorical_code: req.categorical_code,
    })
}

pub async fn transcribe_file(
    State(state): State<AppState>,
    AppJson(req): AppJson<TranscribeRequest>,
) -> Result<Json<asr_core::Transcript>, ApiError> {
    let started = Instant::now();
    let result = transcribe(&state, req).await;
    track(&state, "transcribe_file", started, &result);
    result.map(Json)
}

async fn transcribe(
    state: &AppState,
    req: TranscribeRequest,
) -> Result<asr_core::Transcript, ApiError> {
    let path = resolve_static_file(&state.config.static_dir, &req.file)?;
    if !tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
        return Err(ApiError::NotFound(format!("file not found: {}", req.file)));
    }
    let language = validate_language(req.language.as_deref())?;
    let asr = state.asr.clone().ok_or_else(|| {
        ApiError::ServiceUnavailable("no transcription backend configured".to_string())
    })?;

    let transcript = asr
        .transcribe(&path, language.as_deref())
        .await
        .map_err(ApiError::Transcription)?;
    info!(
        "Transcribed {}: {} segments, {} words",
        req.file,
        transcript.segments.len(),
        transcript.words.len()
    );
    Ok(transcript)
}

pub async fn predict(
    State(state): State<AppState>,
    AppJson(req): AppJson<PredictRequest>,
) -> Result<Json<PredictResponse>, ApiError> {
    let started = Instant::now();
    let result = predict_layers(&state, req).await;
    track(&state, "predict", started, &result);
    result.map(Json)
}

async fn predict_layers(state: &AppState, req: PredictRequest) -> Result<PredictResponse, ApiError> {
    let (code, latent) = LatentVector::random_with_code(req.seed);
    let (artifacts, final_len) = decompose(state, latent.clone()).await?;

    // upconv5 when the network has it, otherwise the deepest stage captured
    let source = artifacts
        .iter()
        .find(|a| a.name == "upconv5")
        .or_else(|| artifacts.iter().rev().find(|a| a.name != FINAL_STAGE));

    let transcription = match (&state.asr, source) {
        (Some(asr), Some(artifact)) => Some(
            asr.transcribe(&artifact.stretched_path, None)
                .await
                .map_err(ApiError::Transcription)?,
        ),
        _ => None,
    };

    Ok(PredictResponse {
        latent: latent.into_vec(),
        categorical_code: code.to_vec(),
        sample_rate: SAMPLE_RATE,
        final_len,
        layers: artifacts.iter().map(|a| layer_info(state, a)).collect(),
        transcription,
    })
}
