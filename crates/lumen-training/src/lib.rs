//! Lumen Training
//!
//! Building blocks for small causal language model runs:
//! - Loading YAML run configs with dotted command-line overrides (`config`)
//! - Turning `icl_tasks` entries into in-context-learning evaluators (`icl`)
//! - A minimal trainer loop with lifecycle callbacks (`trainer`, `callbacks`)
//! - Resumption callbacks applied when restarting from a checkpoint
//!   (`callbacks::resumption`)

pub mod callbacks;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod icl;
pub mod logger;
pub mod model;
pub mod optim;
pub mod scheduler;
pub mod tokenizer;
pub mod trainer;

pub use callbacks::{Callback, Event, GlobalLrLowering, LayerFreezing, ResumptionStrategy};
pub use checkpoint::{load_checkpoint, save_checkpoint, Checkpoint, CheckpointArtifact, RunId};
pub use config::{apply_overrides, EvalConfig, IclTaskConfig, TrainConfig};
pub use data::{TextRow, TrainData};
pub use error::{TrainingError, TrainingResult};
pub use icl::{get_evaluators_from_config, Evaluator, IclMetricKind, IclTaskType};
pub use logger::{ConsoleLogger, InMemoryLogger, MetricLogger};
pub use model::{load_model, BigramLm, CausalLm, Parameter};
pub use optim::{Optimizer, ParamGroup};
pub use tokenizer::Tokenizer;
pub use trainer::{FitSummary, State, Timestamp, Trainer};
