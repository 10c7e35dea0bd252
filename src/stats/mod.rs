//! Metrics collection and periodic reporting.

pub mod http_server;
pub mod open_metric;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use open_metric::{Measurement, MeasurementType, Metric, OpenMetric};

struct Counter {
    name: String,
    value: Arc<AtomicI64>,
}

impl OpenMetric for Counter {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn metric_type(&self) -> String {
        "counter".into()
    }

    fn measurements(&self) -> Vec<Measurement> {
        vec![Measurement {
            labels: vec![],
            measurement: MeasurementType::Integer(self.value.load(Ordering::Relaxed)),
        }]
    }
}

/// Process-wide counter registry. Components increment their own named
/// counters (bad rows, flushes, replica failovers, ...) without needing a
/// handle threaded through every layer.
pub struct Registry {
    counters: Mutex<HashMap<String, Arc<AtomicI64>>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn counter(&self, name: &str) -> Arc<AtomicI64> {
        self.counters
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicI64::new(0)))
            .clone()
    }

    pub fn series_count(&self) -> usize {
        self.counters.lock().len()
    }

    /// Render every registered counter as Prometheus text exposition.
    pub fn render(&self) -> String {
        let snapshot: Vec<(String, i64)> = self
            .counters
            .lock()
            .iter()
            .map(|(name, value)| (name.clone(), value.load(Ordering::Relaxed)))
            .collect();

        let mut out = String::new();
        for (name, value) in snapshot {
            let metric = Metric::new(Counter { name, value: Arc::new(AtomicI64::new(value)) });
            out.push_str(&metric.to_string());
        }
        out
    }
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Periodically logs a one-line stats summary, mirroring the teacher's
/// background stats task rather than only exposing a pull-based `/metrics`.
pub struct StatsLogger {
    cancel: CancellationToken,
    push_interval: Duration,
}

impl StatsLogger {
    pub fn new(push_interval: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            push_interval,
        }
    }

    pub fn spawn(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        let push_interval = self.push_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(push_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        info!("stats: {} series tracked", registry().series_count());
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_counter_is_shared_across_lookups() {
        let registry = Registry::new();
        let a = registry.counter("bad_rows");
        let b = registry.counter("bad_rows");
        a.fetch_add(5, Ordering::Relaxed);
        assert_eq!(b.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_render_includes_counter_value() {
        let registry = Registry::new();
        registry.counter("flushes").fetch_add(3, Ordering::Relaxed);
        let rendered = registry.render();
        assert!(rendered.contains("flushes"));
        assert!(rendered.contains('3'));
    }
}
