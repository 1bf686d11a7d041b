use crate::icl::dataset::IclBatch;
use crate::icl::metrics::{IclMetricKind, MetricState};
use crate::icl::IclTaskType;

/// A labelled dataloader paired with the metrics to compute over it.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluator {
    pub label: String,
    pub task_type: IclTaskType,
    pub batches: Vec<IclBatch>,
    pub metrics: Vec<IclMetricKind>,
}

impl Evaluator {
    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.batches.iter().map(IclBatch::len).sum()
    }

    /// Key under which `metric` is logged for this evaluator.
    #[must_use]
    pub fn metric_key(&self, metric: IclMetricKind) -> String {
        format!("metrics/{}/{}", self.label, metric.name())
    }

    #[must_use]
    pub fn metric_keys(&self) -> Vec<String> {
        self.metrics.iter().map(|m| self.metric_key(*m)).collect()
    }

    #[must_use]
    pub fn fresh_metrics(&self) -> Vec<MetricState> {
        self.metrics.iter().map(|m| MetricState::new(*m)).collect()
    }
}
