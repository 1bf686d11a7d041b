use crate::config::FormattingOptions;
use crate::error::{TrainingError, TrainingResult};
use crate::icl::IclTaskType;
use crate::tokenizer::Tokenizer;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

/// One `language_modeling` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmExample {
    pub context: String,
    pub continuation: String,
}

/// One `multiple_choice` row. `gold` indexes into `choices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McExample {
    pub query: String,
    pub choices: Vec<String>,
    pub gold: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IclExamples {
    LanguageModeling(Vec<LmExample>),
    MultipleChoice(Vec<McExample>),
}

impl IclExamples {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::LanguageModeling(rows) => rows.len(),
            Self::MultipleChoice(rows) => rows.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn task_type(&self) -> IclTaskType {
        match self {
            Self::LanguageModeling(_) => IclTaskType::LanguageModeling,
            Self::MultipleChoice(_) => IclTaskType::MultipleChoice,
        }
    }
}

/// Read a JSONL task file; every non-empty line is one row of `task_type`.
pub fn read_examples(path: &Path, task_type: IclTaskType) -> TrainingResult<IclExamples> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| TrainingError::Dataset(format!("failed to read {}: {}", path.display(), e)))?;

    let examples = match task_type {
        IclTaskType::LanguageModeling => {
            let rows: Vec<LmExample> = parse_jsonl(&contents, path)?;
            for (idx, row) in rows.iter().enumerate() {
                if row.continuation.is_empty() {
                    return Err(TrainingError::Dataset(format!(
                        "{} row {}: continuation is empty",
                        path.display(),
                        idx + 1
                    )));
                }
            }
            IclExamples::LanguageModeling(rows)
        }
        IclTaskType::MultipleChoice => {
            let rows: Vec<McExample> = parse_jsonl(&contents, path)?;
            for (idx, row) in rows.iter().enumerate() {
                if row.choices.is_empty() || row.choices.iter().any(String::is_empty) {
                    return Err(TrainingError::Dataset(format!(
                        "{} row {}: choices must be non-empty strings",
                        path.display(),
                        idx + 1
                    )));
                }
                if row.gold >= row.choices.len() {
                    return Err(TrainingError::Dataset(format!(
                        "{} row {}: gold index {} out of range for {} choices",
                        path.display(),
                        idx + 1,
                        row.gold,
                        row.choices.len()
                    )));
                }
            }
            IclExamples::MultipleChoice(rows)
        }
    };

    if examples.is_empty() {
        return Err(TrainingError::Dataset(format!("{} contains no rows", path.display())));
    }
    Ok(examples)
}

pub(crate) fn parse_jsonl<T: DeserializeOwned>(contents: &str, path: &Path) -> TrainingResult<Vec<T>> {
    let mut rows = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row = serde_json::from_str(line).map_err(|e| {
            TrainingError::Dataset(format!("failed to parse {} line {}: {}", path.display(), idx + 1, e))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// A tokenized prompt plus the token span the metric scores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredSequence {
    pub input_ids: Vec<u32>,
    pub continuation: Range<usize>,
}

impl ScoredSequence {
    /// Concatenate `context` and `continuation`, dropping tokens from the
    /// front when the result is longer than `max_seq_len`.
    #[must_use]
    pub fn new(context: Vec<u32>, continuation: Vec<u32>, max_seq_len: usize) -> Self {
        let mut input_ids = context;
        let mut start = input_ids.len();
        input_ids.extend(continuation);

        if input_ids.len() > max_seq_len {
            let overflow = input_ids.len() - max_seq_len;
            input_ids.drain(..overflow);
            start = start.saturating_sub(overflow);
        }

        let end = input_ids.len();
        Self { input_ids, continuation: start..end }
    }

    /// Positions whose token gets scored. Position 0 has nothing before it to
    /// predict from, so it is never scored.
    #[must_use]
    pub fn scored_positions(&self) -> Range<usize> {
        self.continuation.start.max(1)..self.continuation.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IclSample {
    LanguageModeling(ScoredSequence),
    MultipleChoice { choices: Vec<ScoredSequence>, gold: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IclBatch {
    pub samples: Vec<IclSample>,
}

impl IclBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

struct PromptFormat<'a> {
    options: &'a FormattingOptions,
}

impl PromptFormat<'_> {
    fn push_example(&self, preamble: &mut String, context: &str, continuation: &str) {
        if !preamble.is_empty() {
            preamble.push_str(&self.options.example_delimiter);
        }
        preamble.push_str(context);
        preamble.push_str(&self.options.continuation_delimiter);
        preamble.push_str(continuation);
    }

    fn query(&self, mut preamble: String, context: &str) -> String {
        if !preamble.is_empty() {
            preamble.push_str(&self.options.example_delimiter);
        }
        preamble.push_str(context);
        preamble.push_str(&self.options.continuation_delimiter);
        preamble
    }
}

/// Pick `num_fewshot` distinct rows other than `exclude`, in sampled order.
fn fewshot_indices(rng: &mut StdRng, len: usize, num_fewshot: usize, exclude: usize) -> TrainingResult<Vec<usize>> {
    if num_fewshot == 0 {
        return Ok(Vec::new());
    }
    let available = len.saturating_sub(1);
    if num_fewshot > available {
        return Err(TrainingError::Dataset(format!(
            "requested {num_fewshot} few-shot examples but only {available} other rows exist"
        )));
    }
    Ok(index::sample(rng, available, num_fewshot)
        .into_iter()
        .map(|i| if i >= exclude { i + 1 } else { i })
        .collect())
}

/// Every continuation token must be scored against at least one earlier
/// token, so the prompt needs a token and the continuation must fit beside it.
fn check_lengths(row: usize, context: &[u32], continuation: &[u32], max_seq_len: usize) -> TrainingResult<()> {
    if context.is_empty() {
        return Err(TrainingError::Dataset(format!("row {}: prompt context is empty", row + 1)));
    }
    if continuation.len() >= max_seq_len {
        return Err(TrainingError::Dataset(format!(
            "row {}: continuation has {} tokens, max_seq_len {} leaves no room for context",
            row + 1,
            continuation.len(),
            max_seq_len
        )));
    }
    Ok(())
}

/// Build one tokenized sample per row with `num_fewshot` in-context examples.
pub fn build_samples(
    examples: &IclExamples,
    num_fewshot: usize,
    tokenizer: &dyn Tokenizer,
    options: &FormattingOptions,
    max_seq_len: usize,
    seed: u64,
) -> TrainingResult<Vec<IclSample>> {
    let format = PromptFormat { options };
    let mut rng = StdRng::seed_from_u64(seed);
    let len = examples.len();
    let mut samples = Vec::with_capacity(len);

    for sample_idx in 0..len {
        let shots = fewshot_indices(&mut rng, len, num_fewshot, sample_idx)?;
        let mut preamble = options.prompt_string.clone();

        let sample = match examples {
            IclExamples::LanguageModeling(rows) => {
                for i in shots {
                    format.push_example(&mut preamble, &rows[i].context, &rows[i].continuation);
                }
                let row = &rows[sample_idx];
                let context = tokenizer.encode(&format.query(preamble, &row.context));
                let continuation = tokenizer.encode(&row.continuation);
                check_lengths(sample_idx, &context, &continuation, max_seq_len)?;
                IclSample::LanguageModeling(ScoredSequence::new(context, continuation, max_seq_len))
            }
            IclExamples::MultipleChoice(rows) => {
                for i in shots {
                    format.push_example(&mut preamble, &rows[i].query, &rows[i].choices[rows[i].gold]);
                }
                let row = &rows[sample_idx];
                let context = tokenizer.encode(&format.query(preamble, &row.query));
                let mut choices = Vec::with_capacity(row.choices.len());
                for choice in &row.choices {
                    let continuation = tokenizer.encode(choice);
                    check_lengths(sample_idx, &context, &continuation, max_seq_len)?;
                    choices.push(ScoredSequence::new(context.clone(), continuation, max_seq_len));
                }
                IclSample::MultipleChoice { choices, gold: row.gold }
            }
        };
        samples.push(sample);
    }

    Ok(samples)
}

#[must_use]
pub fn batch_samples(samples: Vec<IclSample>, batch_size: usize) -> Vec<IclBatch> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::new();
    let mut current = IclBatch::default();
    for sample in samples {
        current.samples.push(sample);
        if current.len() == batch_size {
            batches.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
