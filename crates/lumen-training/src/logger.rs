use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Destination for scalar metrics.
pub trait MetricLogger: Send {
    fn log_metrics(&mut self, metrics: &BTreeMap<String, f64>, step: u64);
}

/// Keeps every logged value in memory, keyed by metric name.
///
/// Clones share the same storage, so a handle kept by the caller sees what a
/// trainer-owned clone records.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLogger {
    data: Arc<Mutex<BTreeMap<String, Vec<(u64, f64)>>>>,
}

impl InMemoryLogger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Pushes never leave the map half-written, so a poisoned lock is still usable.
    fn data(&self) -> MutexGuard<'_, BTreeMap<String, Vec<(u64, f64)>>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All `(step, value)` pairs logged under `key`, oldest first.
    #[must_use]
    pub fn values(&self, key: &str) -> Vec<(u64, f64)> {
        self.data().get(key).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn first(&self, key: &str) -> Option<f64> {
        self.values(key).first().map(|(_, v)| *v)
    }

    #[must_use]
    pub fn latest(&self, key: &str) -> Option<f64> {
        self.values(key).last().map(|(_, v)| *v)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data().keys().cloned().collect()
    }
}

impl MetricLogger for InMemoryLogger {
    fn log_metrics(&mut self, metrics: &BTreeMap<String, f64>, step: u64) {
        let mut data = self.data();
        for (key, value) in metrics {
            data.entry(key.clone()).or_default().push((step, *value));
        }
    }
}

/// Emits every metric as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleLogger;

impl MetricLogger for ConsoleLogger {
    fn log_metrics(&mut self, metrics: &BTreeMap<String, f64>, step: u64) {
        for (key, value) in metrics {
            info!(step, metric = %key, value, "metric");
        }
    }
}

/// Fans every call out to a list of loggers.
#[derive(Default)]
pub struct Loggers {
    destinations: Vec<Box<dyn MetricLogger>>,
}

impl Loggers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<L: MetricLogger + 'static>(&mut self, logger: L) {
        self.destinations.push(Box::new(logger));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }
}

impl MetricLogger for Loggers {
    fn log_metrics(&mut self, metrics: &BTreeMap<String, f64>, step: u64) {
        for logger in &mut self.destinations {
            logger.log_metrics(metrics, step);
        }
    }
}
