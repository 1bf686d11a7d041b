//! In-context-learning evaluation.
//!
//! - `dataset`: JSONL task rows, few-shot prompt assembly, batching
//! - `metrics`: accuracy metrics computed from model logits
//! - `evaluator`: a labelled set of batches plus the metrics to compute
//! - `builder`: turns `icl_tasks` config entries into evaluators and logger keys

pub mod builder;
pub mod dataset;
pub mod evaluator;
pub mod metrics;

use serde::{Deserialize, Serialize};

pub use builder::{build_evaluators, get_evaluators_from_config};
pub use dataset::{IclBatch, IclExamples, IclSample, LmExample, McExample, ScoredSequence};
pub use evaluator::Evaluator;
pub use metrics::{IclMetricKind, MetricState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IclTaskType {
    LanguageModeling,
    MultipleChoice,
}

impl std::fmt::Display for IclTaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LanguageModeling => f.write_str("language_modeling"),
            Self::MultipleChoice => f.write_str("multiple_choice"),
        }
    }
}
