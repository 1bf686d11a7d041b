//! YAML run configuration.
//!
//! A run is described by one YAML document plus `dotted.key=value` overrides
//! from the command line. Overrides are applied to the raw YAML tree first,
//! then the tree is checked and deserialized into [`EvalConfig`] or
//! [`TrainConfig`].

use crate::callbacks::ResumptionStrategy;
use crate::error::{TrainingError, TrainingResult};
use crate::icl::{IclMetricKind, IclTaskType};
use crate::model::ModelKind;
use crate::optim::OptimizerConfig;
use crate::scheduler::SchedulerConfig;
use crate::tokenizer::TokenizerKind;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// Keys every ICL task descriptor must carry, in the order they are checked.
pub const REQUIRED_TASK_KEYS: [&str; 7] = [
    "dataset_uri",
    "type",
    "num_fewshot",
    "batch_size",
    "metrics",
    "formatting_options",
    "label",
];

/// Keys required inside a task's `formatting_options`.
pub const REQUIRED_FORMATTING_KEYS: [&str; 3] = ["prompt_string", "example_delimiter", "continuation_delimiter"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattingOptions {
    pub prompt_string: String,
    pub example_delimiter: String,
    pub continuation_delimiter: String,
}

/// Few-shot counts for a task. A single count or a list of counts; each count
/// produces its own evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumFewshot {
    One(usize),
    Many(Vec<usize>),
}

impl NumFewshot {
    #[must_use]
    pub fn counts(&self) -> Vec<usize> {
        match self {
            Self::One(n) => vec![*n],
            Self::Many(ns) => ns.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IclTaskConfig {
    pub label: String,
    pub dataset_uri: PathBuf,
    #[serde(rename = "type")]
    pub task_type: IclTaskType,
    pub num_fewshot: NumFewshot,
    pub batch_size: usize,
    pub metrics: Vec<IclMetricKind>,
    pub formatting_options: FormattingOptions,
}

impl IclTaskConfig {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.label.trim().is_empty() {
            return Err(TrainingError::InvalidConfig("icl task label must not be empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidConfig(format!("{}: batch_size must be >= 1", self.label)));
        }
        if self.num_fewshot.counts().is_empty() {
            return Err(TrainingError::InvalidConfig(format!("{}: num_fewshot must not be empty", self.label)));
        }
        if self.metrics.is_empty() {
            return Err(TrainingError::InvalidConfig(format!("{}: metrics must not be empty", self.label)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerArgs {
    pub max_seq_len: usize,
    #[serde(default)]
    pub vocab_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    #[serde(rename = "type")]
    pub kind: TokenizerKind,
    pub args: TokenizerArgs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: ModelKind,
    #[serde(default)]
    pub load_path: Option<PathBuf>,
    #[serde(default = "default_init_std")]
    pub init_std: f32,
}

fn default_init_std() -> f32 {
    0.02
}

fn default_eval_seed() -> u64 {
    1234
}

fn default_train_seed() -> u64 {
    17
}

fn default_log_interval() -> u64 {
    10
}

/// Configuration for `lumen eval`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    pub model: ModelConfig,
    pub tokenizer: TokenizerConfig,
    pub icl_tasks: Vec<IclTaskConfig>,
    #[serde(default = "default_eval_seed")]
    pub seed: u64,
}

impl EvalConfig {
    pub fn load(path: &Path, overrides: &[String]) -> TrainingResult<Self> {
        Self::from_value(load_config_value(path, overrides)?)
    }

    /// Check every task descriptor for required keys, then deserialize.
    pub fn from_value(value: Value) -> TrainingResult<Self> {
        let tasks = value
            .get("icl_tasks")
            .ok_or_else(|| TrainingError::InvalidConfig("icl_tasks is required".to_string()))?;
        let tasks = tasks
            .as_sequence()
            .ok_or_else(|| TrainingError::InvalidConfig("icl_tasks must be a list".to_string()))?;
        for (idx, task) in tasks.iter().enumerate() {
            validate_task(task, idx)?;
        }

        let cfg: Self = serde_yaml::from_value(value).map_err(|e| TrainingError::InvalidConfig(e.to_string()))?;
        for task in &cfg.icl_tasks {
            task.validate()?;
        }
        Ok(cfg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainLoaderConfig {
    pub dataset_uri: PathBuf,
    pub batch_size: usize,
}

/// Configuration for `lumen train`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub model: ModelConfig,
    pub tokenizer: TokenizerConfig,
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub train_loader: TrainLoaderConfig,
    pub max_steps: u64,
    #[serde(default = "default_train_seed")]
    pub seed: u64,
    /// Checkpoint to resume from (weights, optimizer state and timestamp).
    #[serde(default)]
    pub load_path: Option<PathBuf>,
    #[serde(default)]
    pub save_path: Option<PathBuf>,
    #[serde(default = "default_log_interval")]
    pub log_interval: u64,
    #[serde(default)]
    pub resumption: Vec<ResumptionStrategy>,
}

impl TrainConfig {
    pub fn load(path: &Path, overrides: &[String]) -> TrainingResult<Self> {
        Self::from_value(load_config_value(path, overrides)?)
    }

    pub fn from_value(value: Value) -> TrainingResult<Self> {
        let cfg: Self = serde_yaml::from_value(value).map_err(|e| TrainingError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.max_steps == 0 {
            return Err(TrainingError::InvalidConfig("max_steps must be >= 1".to_string()));
        }
        if self.train_loader.batch_size == 0 {
            return Err(TrainingError::InvalidConfig("train_loader.batch_size must be >= 1".to_string()));
        }
        if self.log_interval == 0 {
            return Err(TrainingError::InvalidConfig("log_interval must be >= 1".to_string()));
        }
        self.optimizer.validate()?;
        for strategy in &self.resumption {
            strategy.validate()?;
        }
        Ok(())
    }
}

/// Presence-only validation of one ICL task descriptor.
pub fn validate_task(task: &Value, index: usize) -> TrainingResult<()> {
    let Some(task) = task.as_mapping() else {
        return Err(TrainingError::InvalidConfig(format!("icl_tasks[{index}] must be a mapping")));
    };

    for key in REQUIRED_TASK_KEYS {
        let Some(entry) = task.get(key) else {
            return Err(TrainingError::MissingConfigKey { task: index, key: key.to_string() });
        };
        if key == "formatting_options" {
            let options = entry.as_mapping();
            for nested in REQUIRED_FORMATTING_KEYS {
                if !options.is_some_and(|o| o.contains_key(nested)) {
                    return Err(TrainingError::MissingConfigKey {
                        task: index,
                        key: format!("formatting_options.{nested}"),
                    });
                }
            }
        }
    }
    Ok(())
}

pub fn load_yaml(path: &Path) -> TrainingResult<Value> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        TrainingError::InvalidConfig(format!("failed to read config {}: {}", path.display(), e))
    })?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// Read a YAML file and apply `key=value` overrides on top of it.
pub fn load_config_value(path: &Path, overrides: &[String]) -> TrainingResult<Value> {
    let mut value = load_yaml(path)?;
    apply_overrides(&mut value, overrides)?;
    Ok(value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Apply CLI-style overrides (`a.b=1`, `icl_tasks.0.batch_size=8`,
/// `icl_tasks[1].label=x`) to a YAML tree. Later overrides win.
pub fn apply_overrides(root: &mut Value, overrides: &[String]) -> TrainingResult<()> {
    for raw in overrides {
        let (path, value) = raw
            .split_once('=')
            .ok_or_else(|| TrainingError::InvalidConfig(format!("override `{raw}` must look like key=value")))?;
        let segments = parse_path(path.trim())?;
        set_path(root, &segments, parse_override_value(value))?;
    }
    Ok(())
}

fn parse_override_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_path(path: &str) -> TrainingResult<Vec<Segment>> {
    if path.is_empty() {
        return Err(TrainingError::InvalidConfig("override key must not be empty".to_string()));
    }

    let mut segments = Vec::new();
    for part in path.split('.') {
        let (key, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if key.is_empty() && rest.is_empty() {
            return Err(TrainingError::InvalidConfig(format!("empty segment in override key `{path}`")));
        }
        if !key.is_empty() {
            segments.push(Segment::Key(key.to_string()));
        }
        while !rest.is_empty() {
            let close = rest
                .find(']')
                .ok_or_else(|| TrainingError::InvalidConfig(format!("unclosed `[` in override key `{path}`")))?;
            let idx = rest[1..close]
                .trim()
                .parse::<usize>()
                .map_err(|_| TrainingError::InvalidConfig(format!("bad list index in override key `{path}`")))?;
            segments.push(Segment::Index(idx));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(TrainingError::InvalidConfig(format!("malformed override key `{path}`")));
            }
        }
    }
    Ok(segments)
}

fn set_path(node: &mut Value, segments: &[Segment], value: Value) -> TrainingResult<()> {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return Ok(());
    };

    if node.is_null() {
        *node = match head {
            Segment::Key(_) => Value::Mapping(Mapping::new()),
            Segment::Index(_) => Value::Sequence(Vec::new()),
        };
    }

    match (node, head) {
        (Value::Mapping(map), Segment::Key(key)) => {
            let child = map.entry(Value::String(key.clone())).or_insert(Value::Null);
            set_path(child, rest, value)
        }
        (Value::Sequence(seq), Segment::Key(key)) => {
            let idx = key.parse::<usize>().map_err(|_| {
                TrainingError::InvalidConfig(format!("`{key}` addresses a list; use a numeric index"))
            })?;
            set_index(seq, idx, rest, value)
        }
        (Value::Sequence(seq), Segment::Index(idx)) => set_index(seq, *idx, rest, value),
        (_, Segment::Key(key)) => {
            Err(TrainingError::InvalidConfig(format!("cannot set `{key}` inside a non-mapping value")))
        }
        (_, Segment::Index(idx)) => {
            Err(TrainingError::InvalidConfig(format!("cannot index [{idx}] into a non-list value")))
        }
    }
}

fn set_index(seq: &mut [Value], idx: usize, rest: &[Segment], value: Value) -> TrainingResult<()> {
    let len = seq.len();
    let child = seq
        .get_mut(idx)
        .ok_or_else(|| TrainingError::InvalidConfig(format!("list index {idx} out of range (len {len})")))?;
    set_path(child, rest, value)
}
