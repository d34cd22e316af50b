// Request and synthesis metrics

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Latency samples kept for percentiles
const LATENCY_WINDOW: usize = 1000;

/// Endpoints tracked individually
pub const TRACKED_ENDPOINTS: [&str; 6] = [
    "generate",
    "generate_file",
    "generate_evolution",
    "generate_layer_file",
    "transcribe_file",
    "predict",
];

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Pin the uptime origin. Later calls are no-ops.
pub fn mark_start() {
    let _ = START_TIME.get_or_init(Instant::now);
}

pub fn uptime_seconds() -> u64 {
    START_TIME.get().map(|start| start.elapsed().as_secs()).unwrap_or(0)
}

/// Per-endpoint counters
#[derive(Debug)]
pub struct EndpointMetrics {
    request_count: AtomicU64,
    error_count: AtomicU64,
    total_latency_ms: AtomicU64,
    min_latency_ms: AtomicU64,
    max_latency_ms: AtomicU64,
    latency_samples: Mutex<VecDeque<u64>>,
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            min_latency_ms: AtomicU64::new(u64::MAX),
            max_latency_ms: AtomicU64::new(0),
            latency_samples: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }
}

impl EndpointMetrics {
    pub fn record(&self, latency: Duration, ok: bool) {
        let latency_ms = latency.as_millis() as u64;
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_latency_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);
        if !ok {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut samples) = self.latency_samples.lock() {
            if samples.len() == LATENCY_WINDOW {
                samples.pop_front();
            }
            samples.push_back(latency_ms);
        }
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    fn percentile(sorted: &[u64], p: usize) -> u64 {
        if sorted.is_empty() {
            return 0;
        }
        let index = (sorted.len() * p / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn snapshot(&self) -> EndpointStats {
        let count = self.request_count();
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let mut sorted: Vec<u64> = self
            .latency_samples
            .lock()
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        sorted.sort_unstable();

        EndpointStats {
            request_count: count,
            error_count: self.error_count(),
            avg_latency_ms: if count == 0 { 0.0 } else { total as f64 / count as f64 },
            min_latency_ms: if count == 0 { 0 } else { self.min_latency_ms.load(Ordering::Relaxed) },
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: Self::percentile(&sorted, 50),
            p95_latency_ms: Self::percentile(&sorted, 95),
            p99_latency_ms: Self::percentile(&sorted, 99),
        }
    }
}

/// Generator-side counters
#[derive(Debug, Default)]
pub struct SynthesisMetrics {
    evaluations: AtomicU64,
    layer_runs: AtomicU64,
    artifacts_written: AtomicU64,
    total_synthesis_time_ms: AtomicU64,
    total_samples: AtomicU64,
}

impl SynthesisMetrics {
    /// One forward pass producing `samples` final samples.
    pub fn record_evaluation(&self, elapsed: Duration, samples: usize) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        self.total_synthesis_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.total_samples.fetch_add(samples as u64, Ordering::Relaxed);
    }

    /// One instrumented pass that wrote `artifacts` files.
    pub fn record_layers(&self, elapsed: Duration, samples: usize, artifacts: usize) {
        self.record_evaluation(elapsed, samples);
        self.layer_runs.fetch_add(1, Ordering::Relaxed);
        self.artifacts_written.fetch_add(artifacts as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SynthesisStats {
        let evaluations = self.evaluations.load(Ordering::Relaxed);
        let total = self.total_synthesis_time_ms.load(Ordering::Relaxed);
        SynthesisStats {
            evaluations,
            layer_runs: self.layer_runs.load(Ordering::Relaxed),
            artifacts_written: self.artifacts_written.load(Ordering::Relaxed),
            avg_synthesis_time_ms: if evaluations == 0 {
                0.0
            } else {
                total as f64 / evaluations as f64
            },
            total_samples: self.total_samples.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct AppMetrics {
    endpoints: BTreeMap<&'static str, EndpointMetrics>,
    pub synthesis: SynthesisMetrics,
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self {
            endpoints: TRACKED_ENDPOINTS
                .iter()
                .map(|&name| (name, EndpointMetrics::default()))
                .collect(),
            synthesis: SynthesisMetrics::default(),
        }
    }
}

impl AppMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Counters for `name`; untracked names are ignored.
    pub fn record(&self, name: &str, latency: Duration, ok: bool) {
        if let Some(endpoint) = self.endpoints.get(name) {
            endpoint.record(latency, ok);
        }
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointMetrics> {
        self.endpoints.get(name)
    }

    pub fn endpoint_snapshots(&self) -> BTreeMap<&'static str, EndpointStats> {
        self.endpoints
            .iter()
            .map(|(name, metrics)| (*name, metrics.snapshot()))
            .collect()
    }
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub model: ModelStatus,
    pub endpoints: BTreeMap<&'static str, EndpointStats>,
    pub synthesis: SynthesisStats,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub request_count: u64,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

#[derive(Serialize)]
pub struct ModelStatus {
    pub variant: String,
    pub loaded: bool,
    pub output_len: usize,
}

#[derive(Debug, Serialize)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct SynthesisStats {
    pub evaluations: u64,
    pub layer_runs: u64,
    pub artifacts_written: u64,
    pub avg_synthesis_time_ms: f64,
    pub total_samples: u64,
}

/// Host CPU and memory, plus the process-wide request count.
pub fn system_metrics(request_count: u64) -> SystemMetrics {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    SystemMetrics {
        cpu_usage_percent: system.global_cpu_info().cpu_usage(),
        memory_used_mb: memory_used / 1024 / 1024,
        memory_total_mb: memory_total / 1024 / 1024,
        memory_usage_percent,
        request_count,
        uptime_seconds: uptime_seconds(),
        system_load: load_average(),
    }
}

#[cfg(unix)]
fn load_average() -> Option<f64> {
    std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|s| s.split_whitespace().next().and_then(|v| v.parse().ok()))
}

#[cfg(not(unix))]
fn load_average() -> Option<f64> {
    None
}
