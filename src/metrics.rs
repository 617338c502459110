//! Upload latency metrics and per-sequence identifiers.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Identifiers carried by the tracing span of one upload sequence.
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub trace_id: String,
    pub request_id: String,
    pub generation: u64,
}

impl RequestIds {
    pub fn new(generation: u64) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
            generation,
        }
    }
}

/// Records into `name` when finished. Dropping it without finishing records nothing.
pub struct Stopwatch {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl Stopwatch {
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        self.registry.record(self.name, elapsed);
        elapsed
    }
}

/// Most recent samples of one metric.
struct Window {
    samples: VecDeque<Duration>,
    capacity: usize,
    total: u64,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
        }
    }

    fn push(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.total += 1;
    }

    fn percentiles(&self, ps: &[f64]) -> Vec<Duration> {
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        ps.iter()
            .map(|p| {
                if sorted.is_empty() {
                    return Duration::ZERO;
                }
                let idx = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
                sorted[idx.min(sorted.len() - 1)]
            })
            .collect()
    }
}

pub struct MetricsRegistry {
    windows: Mutex<BTreeMap<&'static str, Window>>,
    capacity: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_capacity(512)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            windows: Mutex::new(BTreeMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, name: &'static str, sample: Duration) {
        self.windows
            .lock()
            .entry(name)
            .or_insert_with(|| Window::new(self.capacity))
            .push(sample);
        tracing::debug!(metric = name, elapsed_ms = sample.as_millis() as u64, "metric_recorded");
    }

    pub fn stopwatch(self: &Arc<Self>, name: &'static str) -> Stopwatch {
        Stopwatch {
            name,
            start: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    pub fn summary(&self) -> BTreeMap<&'static str, LatencySummary> {
        self.windows
            .lock()
            .iter()
            .map(|(&name, window)| {
                let p = window.percentiles(&[50.0, 95.0, 99.0]);
                let summary = LatencySummary {
                    p50_ms: p[0].as_secs_f64() * 1000.0,
                    p95_ms: p[1].as_secs_f64() * 1000.0,
                    p99_ms: p[2].as_secs_f64() * 1000.0,
                    count: window.total,
                };
                (name, summary)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    /// Samples recorded since start, including those evicted from the window.
    pub count: u64,
}

pub mod metric_names {
    pub const OCR_DONE: &str = "t_ocr_done";
    pub const DUPLICATE_CHECK: &str = "t_duplicate_check";
    pub const PERSIST_DONE: &str = "t_persist_done";
    pub const UPLOAD_TOTAL: &str = "t_upload_total";
    pub const CANCEL_LATENCY: &str = "cancel_latency";
}
