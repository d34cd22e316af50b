use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use asr_core::{AsrConfig, Transcriber, WhisperApiClient};
use gan_core::{locate_checkpoint, SynthesisService};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tracing::{info, warn};

use server::config::ServerConfig;
use server::{metrics, router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let methods = [
        axum::http::Method::GET,
        axum::http::Method::POST,
        axum::http::Method::OPTIONS,
    ];
    let permissive = || {
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods.clone())
            .allow_headers(tower_http::cors::Any)
            .allow_credentials(false)
    };

    let Some(allowed_origins) = &config.cors_allowed_origins else {
        // Development: Allow all origins (with warning)
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        return permissive();
    };

    let origins: Vec<axum::http::HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
        return permissive();
    }

    info!("CORS configured for {} origin(s)", origins.len());
    CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::list(origins))
        .allow_methods(methods)
        .allow_headers(tower_http::cors::Any)
        .allow_credentials(false)
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting GAN layer server...");
    metrics::mark_start();

    let config = ServerConfig::from_env()?;
    let generator_config = config.generator_config();

    let checkpoint = locate_checkpoint(config.checkpoint.as_deref(), config.checkpoint_dir.as_deref())
        .context("cannot start without a generator checkpoint")?;
    info!(
        "Generator variant {} (output {} samples), checkpoint {}",
        generator_config.variant,
        generator_config.output_len(),
        checkpoint.display()
    );

    tokio::fs::create_dir_all(config.batch_dir()).await?;
    tokio::fs::create_dir_all(config.evolution_dir()).await?;

    let synth = SynthesisService::new(generator_config, checkpoint);

    let asr: Option<Arc<dyn Transcriber>> = match AsrConfig::from_env() {
        Some(asr_config) => Some(Arc::new(WhisperApiClient::new(asr_config)?)),
        None => {
            warn!("No ASR_API_KEY or OPENAI_API_KEY set, /transcribe_file is disabled");
            None
        }
    };

    let state = AppState::new(synth, asr, config.clone());
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, timeout={}s, static={}",
        config.port,
        config.rate_limit_per_minute,
        config.request_timeout_secs,
        config.static_dir.display()
    );

    if config.preload {
        let synth = state.synth.clone();
        tokio::task::spawn_blocking(move || synth.preload())
            .await
            .context("preload task failed")??;
    }

    // Rate limiting configuration
    // Using GlobalKeyExtractor to rate limit globally (all requests share the same limit)
    let replenish_ms = (60_000 / config.rate_limit_per_minute.max(1) as u64).max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(replenish_ms)
            .burst_size(config.rate_limit_per_minute)
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .context("invalid rate limit configuration")?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(&config))
        .into_inner();

    let app = router(state).layer(middleware_stack);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
