use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("icl_tasks[{task}] is missing required key `{key}`")]
    MissingConfigKey { task: usize, key: String },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("optimizer error: {0}")]
    Optimizer(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("attempted to freeze layer not found in model: {name}\navailable layers: {available:?}")]
    UnknownLayer { name: String, available: Vec<String> },

    #[error("layer freezing ran but did not freeze any layers (requested {requested:?})")]
    NothingFrozen { requested: Vec<String> },

    #[error("callback `{callback}` failed: {message}")]
    Callback { callback: &'static str, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
