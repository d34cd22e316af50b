pub mod config;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod routes;
pub mod validation;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use asr_core::Transcriber;
use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use gan_core::SynthesisService;
use tower_http::services::ServeDir;

use crate::config::ServerConfig;
use crate::metrics::AppMetrics;

#[derive(Clone)]
pub struct AppState {
    pub synth: Arc<SynthesisService>,
    pub asr: Option<Arc<dyn Transcriber>>,
    pub metrics: Arc<AppMetrics>,
    pub request_count: Arc<AtomicU64>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(
        synth: SynthesisService,
        asr: Option<Arc<dyn Transcriber>>,
        config: ServerConfig,
    ) -> Self {
        Self {
            synth: Arc::new(synth),
            asr,
            metrics: AppMetrics::new(),
            request_count: Arc::new(AtomicU64::new(0)),
            config,
        }
    }
}

/// Request ID middleware for tracing. Reuses the caller's id when present.
pub async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .cloned()
        .or_else(|| HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()).ok());

    if let Some(id) = &request_id {
        request.headers_mut().insert("x-request-id", id.clone());
    }
    let mut response = next.run(request).await;
    if let Some(id) = request_id {
        response.headers_mut().insert("x-request-id", id);
    }
    response
}

/// All routes, mounted at the root and again under `/api`, plus the
/// artifact directory under `/static`.
pub fn router(state: AppState) -> Router {
    let public_api = Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health_check))
        .route("/healthz", get(routes::health_check))
        .route("/generate", post(routes::generate))
        .route("/generate_file", post(routes::generate_file))
        .route("/generate_evolution", post(routes::generate_evolution))
        .route("/generate_layer_file", post(routes::generate_layer_file))
        .route("/transcribe_file", post(routes::transcribe_file))
        .route("/predict", post(routes::predict));

    // Metrics endpoint - consider adding authentication in production
    let metrics_api = Router::new().route("/metrics", get(routes::metrics_endpoint));

    let api = Router::new().merge(public_api).merge(metrics_api);
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .merge(api.clone()) // root paths
        .nest("/api", api) // /api prefix
        .nest_service("/static", static_files)
        .layer(middleware::from_fn(add_request_id))
        .with_state(state)
}
