//! Per-engine latency histograms and event counters.
//!
//! Histograms keep the most recent samples only and report p50/p95/p99.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

const HISTOGRAM_WINDOW: usize = 1024;

/// Measures from creation until [`TimingSpan::finish`].
pub struct TimingSpan {
    metric: &'static str,
    started: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    /// Record the elapsed microseconds and return them.
    pub fn finish(self) -> f64 {
        let micros = self.started.elapsed().as_micros() as f64;
        self.registry.record(self.metric, micros);
        micros
    }
}

/// Sliding window of samples; the oldest is dropped once full.
#[derive(Default)]
struct Histogram {
    window: VecDeque<f64>,
}

impl Histogram {
    fn push(&mut self, sample: f64) {
        if self.window.len() == HISTOGRAM_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(sample);
    }

    /// Nearest-rank percentile, `p` in 0..=100.
    fn percentile(&self, p: f64) -> f64 {
        let Some(last) = self.window.len().checked_sub(1) else {
            return 0.0;
        };
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let rank = ((p / 100.0) * last as f64).round() as usize;
        sorted[rank.min(last)]
    }
}

#[derive(Default)]
struct Store {
    histograms: HashMap<&'static str, Histogram>,
    counters: HashMap<&'static str, u64>,
}

#[derive(Default)]
pub struct MetricsRegistry {
    store: Mutex<Store>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a latency sample in microseconds.
    pub fn record(&self, metric: &'static str, micros: f64) {
        self.store.lock().histograms.entry(metric).or_default().push(micros);
        tracing::trace!(metric, micros, "latency sample");
    }

    pub fn increment(&self, counter: &'static str) {
        *self.store.lock().counters.entry(counter).or_insert(0) += 1;
    }

    pub fn count(&self, counter: &str) -> u64 {
        self.store.lock().counters.get(counter).copied().unwrap_or(0)
    }

    pub fn span(self: &Arc<Self>, metric: &'static str) -> TimingSpan {
        TimingSpan {
            metric,
            started: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    /// Microseconds; 0 for a metric with no samples.
    pub fn percentile(&self, metric: &str, p: f64) -> f64 {
        self.store
            .lock()
            .histograms
            .get(metric)
            .map_or(0.0, |h| h.percentile(p))
    }

    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        self.store
            .lock()
            .histograms
            .iter()
            .map(|(&metric, h)| {
                let summary = MetricSummary {
                    p50_us: h.percentile(50.0),
                    p95_us: h.percentile(95.0),
                    p99_us: h.percentile(99.0),
                    count: h.window.len(),
                };
                (metric.to_string(), summary)
            })
            .collect()
    }

    pub fn counters(&self) -> HashMap<String, u64> {
        self.store
            .lock()
            .counters
            .iter()
            .map(|(&counter, &value)| (counter.to_string(), value))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub count: usize,
}

/// Metric names used across the crate.
pub mod metric_names {
    pub const RECOGNIZE_TOTAL: &str = "t_recognize_total";
    pub const RPC_RECOGNIZE: &str = "t_rpc_recognize";
    pub const NORMALIZE: &str = "t_normalize";
    pub const ENGINE_READY: &str = "t_engine_ready";

    pub const ENGINE_SPAWN_ATTEMPTS: &str = "engine_spawn_attempts";
    pub const ENGINE_RESTARTS: &str = "engine_restarts";
    pub const TRANSPORT_FAILURES: &str = "transport_failures";
    pub const CACHE_HITS: &str = "cache_hits";
    pub const CACHE_MISSES: &str = "cache_misses";
    pub const GATE_HELD: &str = "gate_held";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles() {
        let registry = MetricsRegistry::new();
        for v in 1..=100 {
            registry.record(metric_names::NORMALIZE, v as f64);
        }
        assert_eq!(registry.percentile(metric_names::NORMALIZE, 50.0), 51.0);
        assert_eq!(registry.percentile(metric_names::NORMALIZE, 99.0), 99.0);
        assert_eq!(registry.percentile("missing", 50.0), 0.0);
        assert_eq!(registry.summary()[metric_names::NORMALIZE].count, 100);
    }

    #[test]
    fn test_window_drops_oldest() {
        let registry = MetricsRegistry::new();
        for _ in 0..HISTOGRAM_WINDOW {
            registry.record(metric_names::NORMALIZE, 1_000.0);
        }
        for _ in 0..HISTOGRAM_WINDOW {
            registry.record(metric_names::NORMALIZE, 5.0);
        }
        assert_eq!(registry.percentile(metric_names::NORMALIZE, 99.0), 5.0);
        assert_eq!(registry.summary()[metric_names::NORMALIZE].count, HISTOGRAM_WINDOW);
    }

    #[test]
    fn test_counters() {
        let registry = MetricsRegistry::new();
        registry.increment(metric_names::CACHE_HITS);
        registry.increment(metric_names::CACHE_HITS);
        assert_eq!(registry.count(metric_names::CACHE_HITS), 2);
        assert_eq!(registry.count(metric_names::CACHE_MISSES), 0);
        assert_eq!(registry.counters().len(), 1);
    }

    #[test]
    fn test_span_records_sample() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.span(metric_names::RPC_RECOGNIZE).finish();
        assert_eq!(registry.summary()[metric_names::RPC_RECOGNIZE].count, 1);
    }
}
