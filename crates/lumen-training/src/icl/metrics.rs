use crate::error::{TrainingError, TrainingResult};
use crate::icl::dataset::{IclBatch, IclSample, ScoredSequence};
use crate::icl::IclTaskType;
use crate::model::{argmax, log_softmax, CausalLm};
use serde::{Deserialize, Serialize};

/// Metrics an ICL task can request. Names match the `metrics:` config entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IclMetricKind {
    InContextLearningLMAccuracy,
    InContextLearningMultipleChoiceAccuracy,
}

impl IclMetricKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InContextLearningLMAccuracy => "InContextLearningLMAccuracy",
            Self::InContextLearningMultipleChoiceAccuracy => "InContextLearningMultipleChoiceAccuracy",
        }
    }

    #[must_use]
    pub fn task_type(&self) -> IclTaskType {
        match self {
            Self::InContextLearningLMAccuracy => IclTaskType::LanguageModeling,
            Self::InContextLearningMultipleChoiceAccuracy => IclTaskType::MultipleChoice,
        }
    }
}

impl std::fmt::Display for IclMetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Running accuracy for one metric over one evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricState {
    pub kind: IclMetricKind,
    pub correct: u64,
    pub total: u64,
}

impl MetricState {
    #[must_use]
    pub fn new(kind: IclMetricKind) -> Self {
        Self { kind, correct: 0, total: 0 }
    }

    pub fn update(&mut self, model: &dyn CausalLm, batch: &IclBatch) -> TrainingResult<()> {
        for sample in &batch.samples {
            let hit = match (self.kind, sample) {
                (IclMetricKind::InContextLearningLMAccuracy, IclSample::LanguageModeling(seq)) => {
                    greedy_matches(model, seq)?
                }
                (IclMetricKind::InContextLearningMultipleChoiceAccuracy, IclSample::MultipleChoice { choices, gold }) => {
                    best_choice(model, choices)? == Some(*gold)
                }
                _ => {
                    return Err(TrainingError::InvalidConfig(format!(
                        "{} cannot score {} samples",
                        self.kind,
                        match sample {
                            IclSample::LanguageModeling(_) => IclTaskType::LanguageModeling,
                            IclSample::MultipleChoice { .. } => IclTaskType::MultipleChoice,
                        }
                    )));
                }
            };
            self.total += 1;
            if hit {
                self.correct += 1;
            }
        }
        Ok(())
    }

    /// Accuracy in `[0, 1]`; zero when nothing has been scored.
    #[must_use]
    pub fn compute(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64
    }
}

/// True when greedy decoding reproduces every scored continuation token.
fn greedy_matches(model: &dyn CausalLm, seq: &ScoredSequence) -> TrainingResult<bool> {
    let mut positions = seq.scored_positions();
    if positions.is_empty() {
        return Ok(false);
    }
    let logits = model.logits(&seq.input_ids)?;
    Ok(positions.all(|pos| argmax(&logits[pos - 1]) == seq.input_ids[pos] as usize))
}

fn mean_nll(model: &dyn CausalLm, seq: &ScoredSequence) -> TrainingResult<f64> {
    let logits = model.logits(&seq.input_ids)?;
    let positions = seq.scored_positions();
    if positions.is_empty() {
        return Ok(f64::INFINITY);
    }
    let count = positions.len();
    let total: f64 = positions
        .map(|pos| -f64::from(log_softmax(&logits[pos - 1])[seq.input_ids[pos] as usize]))
        .sum();
    Ok(total / count as f64)
}

/// Index of the choice with the lowest mean continuation NLL. Ties go to the
/// earliest choice. `None` when no choice has a scorable token.
fn best_choice(model: &dyn CausalLm, choices: &[ScoredSequence]) -> TrainingResult<Option<usize>> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, choice) in choices.iter().enumerate() {
        let nll = mean_nll(model, choice)?;
        if nll.is_finite() && best.is_none_or(|(_, b)| nll < b) {
            best = Some((idx, nll));
        }
    }
    Ok(best.map(|(idx, _)| idx))
}
