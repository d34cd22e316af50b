//! Common utilities for integration tests

use std::path::Path;
use std::sync::Arc;

use asr_core::{Segment, Transcriber, Transcript, Word};
use axum::{
    body::{to_bytes, Body, Bytes},
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use gan_core::{Generator, GeneratorConfig, SynthError, SynthesisService, Variant, WaveGan};
use serde_json::Value;
use server::{config::ServerConfig, router, AppState};
use tempfile::TempDir;
use tower::ServiceExt;

pub const ALTERNATING: [i64; 16] = [1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0];

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub static_dir: TempDir,
}

/// Transcriber that echoes the file name back as a one-word transcript.
pub struct EchoTranscriber;

#[async_trait::async_trait]
impl Transcriber for EchoTranscriber {
    async fn transcribe(&self, path: &Path, language: Option<&str>) -> anyhow::Result<Transcript> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let word = Word {
            start: 0.0,
            end: 1.0,
            text: name.clone(),
        };
        Ok(Transcript {
            language: Some(language.unwrap_or("en").to_string()),
            duration: 1.024,
            text: name.clone(),
            segments: vec![Segment {
                start: 0.0,
                end: 1.0,
                text: name,
                words: Some(vec![word.clone()]),
            }],
            words: vec![word],
        })
    }
}

/// Short-slice WaveGAN with random weights, narrow enough to run quickly on CPU.
pub fn tiny_service() -> SynthesisService {
    let config = Variant::Short.config().with_width(2);
    SynthesisService::with_loader(
        config,
        Box::new(|cfg: &GeneratorConfig| {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
            let model = WaveGan::from_var_builder(cfg, vb)
                .map_err(|e| SynthError::ModelLoad(e.to_string()))?;
            Ok(Box::new(model) as Box<dyn Generator>)
        }),
    )
}

pub fn create_test_app(asr: Option<Arc<dyn Transcriber>>) -> TestApp {
    let static_dir = tempfile::tempdir().expect("tempdir");
    let config = ServerConfig {
        static_dir: static_dir.path().to_path_buf(),
        variant: Variant::Short,
        ..ServerConfig::default()
    };
    let state = AppState::new(tiny_service(), asr, config);
    TestApp {
        router: router(state.clone()),
        state,
        static_dir,
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body)
}

pub async fn get(router: &Router, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
    send(router, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

pub async fn post_json(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap();
    let (status, _, bytes) = send(router, request).await;
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}
