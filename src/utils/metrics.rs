use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::types::TextMetrics;

/// Most recent time-to-first-token samples kept for the percentiles
pub const MAX_TTFT_SAMPLES: usize = 1000;

/// Latency and throughput of one relayed stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamMetrics {
    pub token_count: u64,
    pub time_to_first_token: Duration,
    pub total_time: Duration,
    pub tokens_per_sec: f64,
}

impl StreamMetrics {
    /// Derive stream metrics from token arrival timestamps.
    ///
    /// TTFT is zero when no token ever arrived and throughput is zero when
    /// nothing was generated.
    pub fn compute(
        token_count: u64,
        start: Instant,
        first_token: Option<Instant>,
        end: Instant,
    ) -> Self {
        let time_to_first_token = first_token
            .map(|t| t.saturating_duration_since(start))
            .unwrap_or(Duration::ZERO);
        let total_time = end.saturating_duration_since(start);
        let seconds = total_time.as_secs_f64();
        let tokens_per_sec = if token_count > 0 && seconds > 0.0 {
            token_count as f64 / seconds
        } else {
            0.0
        };

        Self {
            token_count,
            time_to_first_token,
            total_time,
            tokens_per_sec,
        }
    }

    /// Rounded snapshot persisted with a text translation
    pub fn to_record(&self) -> TextMetrics {
        TextMetrics {
            token_count: self.token_count,
            time_to_first_token: round_to(self.time_to_first_token.as_secs_f64(), 3),
            total_time: round_to(self.total_time.as_secs_f64(), 3),
            tokens_per_sec: round_to(self.tokens_per_sec, 2),
        }
    }
}

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Service-wide counters.
///
/// Cheap to clone and safe to share across request handlers. Also serves as
/// the sink for best-effort failures that are never returned to a caller.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Text relay
    relays_started: AtomicUsize,
    relays_completed: AtomicUsize,
    relays_failed: AtomicUsize,
    tokens_streamed: AtomicU64,
    ttft_ms: RwLock<VecDeque<u64>>,

    // Document tasks
    tasks_submitted: AtomicUsize,
    tasks_succeeded: AtomicUsize,
    tasks_failed: AtomicUsize,
    tasks_cancelled: AtomicUsize,
    artifact_downloads: AtomicUsize,
    artifact_download_failures: AtomicUsize,

    // Translation log
    records_written: AtomicUsize,
    record_write_failures: AtomicUsize,

    endpoint_counters: DashMap<String, AtomicUsize>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                relays_started: AtomicUsize::new(0),
                relays_completed: AtomicUsize::new(0),
                relays_failed: AtomicUsize::new(0),
                tokens_streamed: AtomicU64::new(0),
                ttft_ms: RwLock::new(VecDeque::with_capacity(MAX_TTFT_SAMPLES)),
                tasks_submitted: AtomicUsize::new(0),
                tasks_succeeded: AtomicUsize::new(0),
                tasks_failed: AtomicUsize::new(0),
                tasks_cancelled: AtomicUsize::new(0),
                artifact_downloads: AtomicUsize::new(0),
                artifact_download_failures: AtomicUsize::new(0),
                records_written: AtomicUsize::new(0),
                record_write_failures: AtomicUsize::new(0),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    // Relay Metrics
    pub fn record_relay_started(&self) {
        self.inner.relays_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relay_completed(&self, stream: &StreamMetrics) {
        self.inner.relays_completed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .tokens_streamed
            .fetch_add(stream.token_count, Ordering::Relaxed);
        if stream.token_count > 0 {
            let mut samples = self.inner.ttft_ms.write();
            if samples.len() == MAX_TTFT_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(stream.time_to_first_token.as_millis() as u64);
        }
    }

    pub fn record_relay_failed(&self) {
        self.inner.relays_failed.fetch_add(1, Ordering::Relaxed);
    }

    // Task Metrics
    pub fn record_task_submitted(&self) {
        self.inner.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_succeeded(&self) {
        self.inner.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_failed(&self) {
        self.inner.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_cancelled(&self) {
        self.inner.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_artifact_download(&self, success: bool) {
        if success {
            self.inner.artifact_downloads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner
                .artifact_download_failures
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    // Log Metrics
    pub fn record_log_write(&self, success: bool) {
        if success {
            self.inner.records_written.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner
                .record_write_failures
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    // Endpoint Metrics
    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let ttft: Vec<u64> = self.inner.ttft_ms.read().iter().copied().collect();
        let ttft_avg_ms = avg(&ttft);
        let ttft_p50_ms = percentile(&ttft, 0.5);
        let ttft_p95_ms = percentile(&ttft, 0.95);

        let mut endpoint_requests: Vec<(String, usize)> = self
            .inner
            .endpoint_counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        endpoint_requests.sort();

        MetricsSnapshot {
            relays_started: self.inner.relays_started.load(Ordering::Relaxed),
            relays_completed: self.inner.relays_completed.load(Ordering::Relaxed),
            relays_failed: self.inner.relays_failed.load(Ordering::Relaxed),
            tokens_streamed: self.inner.tokens_streamed.load(Ordering::Relaxed),
            ttft_avg_ms,
            ttft_p50_ms,
            ttft_p95_ms,
            tasks_submitted: self.inner.tasks_submitted.load(Ordering::Relaxed),
            tasks_succeeded: self.inner.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: self.inner.tasks_failed.load(Ordering::Relaxed),
            tasks_cancelled: self.inner.tasks_cancelled.load(Ordering::Relaxed),
            artifact_downloads: self.inner.artifact_downloads.load(Ordering::Relaxed),
            artifact_download_failures: self
                .inner
                .artifact_download_failures
                .load(Ordering::Relaxed),
            records_written: self.inner.records_written.load(Ordering::Relaxed),
            record_write_failures: self.inner.record_write_failures.load(Ordering::Relaxed),
            endpoint_requests,
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = format!(
            r#"# HELP relays_started_total Text translation streams opened
# TYPE relays_started_total counter
relays_started_total {}

# HELP relays_completed_total Text translation streams finalized
# TYPE relays_completed_total counter
relays_completed_total {}

# HELP relays_failed_total Text translation streams ended by an error
# TYPE relays_failed_total counter
relays_failed_total {}

# HELP tokens_streamed_total Tokens forwarded to clients
# TYPE tokens_streamed_total counter
tokens_streamed_total {}

# HELP ttft_avg_ms Average time to first token in milliseconds
# TYPE ttft_avg_ms gauge
ttft_avg_ms {}

# HELP pdf_tasks_total Document tasks by outcome
# TYPE pdf_tasks_total counter
pdf_tasks_total{{outcome="submitted"}} {}
pdf_tasks_total{{outcome="succeeded"}} {}
pdf_tasks_total{{outcome="failed"}} {}
pdf_tasks_total{{outcome="cancelled"}} {}

# HELP artifact_downloads_total Result PDF downloads by outcome
# TYPE artifact_downloads_total counter
artifact_downloads_total{{outcome="ok"}} {}
artifact_downloads_total{{outcome="failed"}} {}

# HELP translation_records_total Translation log writes by outcome
# TYPE translation_records_total counter
translation_records_total{{outcome="ok"}} {}
translation_records_total{{outcome="failed"}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {}
"#,
            snapshot.relays_started,
            snapshot.relays_completed,
            snapshot.relays_failed,
            snapshot.tokens_streamed,
            snapshot.ttft_avg_ms,
            snapshot.tasks_submitted,
            snapshot.tasks_succeeded,
            snapshot.tasks_failed,
            snapshot.tasks_cancelled,
            snapshot.artifact_downloads,
            snapshot.artifact_download_failures,
            snapshot.records_written,
            snapshot.record_write_failures,
            snapshot.uptime_seconds,
        );

        if !snapshot.endpoint_requests.is_empty() {
            out.push_str("\n# HELP endpoint_requests_total Requests per endpoint\n");
            out.push_str("# TYPE endpoint_requests_total counter\n");
            for (endpoint, count) in &snapshot.endpoint_requests {
                out.push_str(&format!(
                    "endpoint_requests_total{{endpoint=\"{}\"}} {}\n",
                    endpoint, count
                ));
            }
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub relays_started: usize,
    pub relays_completed: usize,
    pub relays_failed: usize,
    pub tokens_streamed: u64,
    pub ttft_avg_ms: u64,
    pub ttft_p50_ms: u64,
    pub ttft_p95_ms: u64,
    pub tasks_submitted: usize,
    pub tasks_succeeded: usize,
    pub tasks_failed: usize,
    pub tasks_cancelled: usize,
    pub artifact_downloads: usize,
    pub artifact_download_failures: usize,
    pub records_written: usize,
    pub record_write_failures: usize,
    pub endpoint_requests: Vec<(String, usize)>,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
