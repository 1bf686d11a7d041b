use crate::error::{TrainingError, TrainingResult};
use crate::model::{CausalLm, ModelKind, Parameter};
use crate::optim::Optimizer;
use crate::trainer::{State, Timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Identifier for one training run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCheckpoint {
    pub kind: ModelKind,
    pub vocab_size: usize,
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub timestamp: Timestamp,
    pub model: ModelCheckpoint,
    #[serde(default)]
    pub optimizers: Vec<Optimizer>,
}

impl Checkpoint {
    #[must_use]
    pub fn capture(run_id: RunId, state: &State) -> Self {
        Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            run_id,
            created_at: Utc::now(),
            timestamp: state.timestamp,
            model: ModelCheckpoint {
                kind: state.model.kind(),
                vocab_size: state.model.vocab_size(),
                parameters: state.model.named_parameters().to_vec(),
            },
            optimizers: state.optimizers.clone(),
        }
    }

    /// Copy parameter values into `model`. Gradient flags are left alone.
    pub fn restore_weights(&self, model: &mut dyn CausalLm) -> TrainingResult<()> {
        if self.model.kind != model.kind() {
            return Err(TrainingError::Checkpoint(format!(
                "checkpoint holds a {:?} model, config asks for {:?}",
                self.model.kind,
                model.kind()
            )));
        }
        if self.model.vocab_size != model.vocab_size() {
            return Err(TrainingError::Checkpoint(format!(
                "checkpoint vocab size {} does not match tokenizer vocab size {}",
                self.model.vocab_size,
                model.vocab_size()
            )));
        }

        for param in model.named_parameters_mut() {
            let saved = self
                .model
                .parameters
                .iter()
                .find(|p| p.name == param.name)
                .ok_or_else(|| TrainingError::Checkpoint(format!("checkpoint is missing parameter `{}`", param.name)))?;
            if saved.shape != param.shape || saved.data.len() != param.data.len() {
                return Err(TrainingError::Checkpoint(format!(
                    "shape mismatch for `{}`: checkpoint {:?}, model {:?}",
                    param.name, saved.shape, param.shape
                )));
            }
            param.data.clone_from(&saved.data);
        }
        Ok(())
    }

    /// Restore weights, optimizer state and timestamp for resuming a run.
    pub fn restore_state(&self, state: &mut State) -> TrainingResult<()> {
        self.restore_weights(state.model.as_mut())?;

        if self.optimizers.is_empty() {
            warn!("checkpoint has no optimizer state; keeping freshly built optimizers");
        } else {
            for optimizer in &self.optimizers {
                for name in optimizer.param_groups.iter().flat_map(|g| g.params.iter()) {
                    if state.model.parameter(name).is_none() {
                        return Err(TrainingError::Checkpoint(format!(
                            "checkpoint optimizer tracks unknown parameter `{name}`"
                        )));
                    }
                }
            }
            state.optimizers.clone_from(&self.optimizers);

            // Parameters frozen by the saved run come back trainable; give
            // them back to the optimizer unless a callback freezes them again.
            let untracked: Vec<String> = state
                .model
                .named_parameters()
                .iter()
                .filter(|p| p.requires_grad && !state.optimizers.iter().any(|o| o.tracks(&p.name)))
                .map(|p| p.name.clone())
                .collect();
            if !untracked.is_empty() {
                if let Some(group) = state.optimizers.first_mut().and_then(|o| o.param_groups.first_mut()) {
                    warn!(?untracked, "checkpoint optimizer does not track these trainable parameters; adding them to group 0");
                    group.params.extend(untracked);
                }
            }
        }

        state.timestamp = self.timestamp;
        Ok(())
    }
}

/// A checkpoint written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointArtifact {
    pub path: PathBuf,
    pub sha256: String,
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> TrainingResult<CheckpointArtifact> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(checkpoint)?;
    std::fs::write(path, json)?;

    Ok(CheckpointArtifact { path: path.to_path_buf(), sha256: sha256_file(path)? })
}

pub fn load_checkpoint(path: &Path) -> TrainingResult<Checkpoint> {
    let bytes = std::fs::read(path).map_err(|e| {
        TrainingError::Checkpoint(format!("failed to read checkpoint {}: {}", path.display(), e))
    })?;
    let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
    if checkpoint.format_version != CHECKPOINT_FORMAT_VERSION {
        return Err(TrainingError::Checkpoint(format!(
            "unsupported checkpoint format version {} (expected {})",
            checkpoint.format_version, CHECKPOINT_FORMAT_VERSION
        )));
    }
    Ok(checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BigramLm, BIGRAM_BIAS, BIGRAM_WEIGHT};
    use crate::optim::{OptimizerKind, ParamGroup};
    use tempfile::TempDir;

    fn state(seed: u64) -> State {
        let model = BigramLm::new(5, 0.02, seed).unwrap();
        let group = ParamGroup::new(vec![BIGRAM_WEIGHT.to_string()], 0.3, 0.0);
        State::new(Box::new(model), vec![Optimizer::new(OptimizerKind::Sgd { momentum: 0.9 }, vec![group])], 10)
    }

    #[test]
    fn test_round_trip_restores_weights_and_optimizers() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ckpts").join("latest.json");

        let mut saved = state(1);
        saved.timestamp.step = 4;
        saved.optimizers[0].param_groups[0].lr = 0.15;
        let artifact = save_checkpoint(&path, &Checkpoint::capture(RunId::new(), &saved)).unwrap();
        assert_eq!(artifact.sha256.len(), 64);

        let mut restored = state(2);
        load_checkpoint(&path).unwrap().restore_state(&mut restored).unwrap();

        assert_eq!(restored.timestamp.step, 4);
        assert_eq!(restored.optimizers[0].learning_rates(), vec![0.15]);
        assert_eq!(
            restored.model.parameter(BIGRAM_WEIGHT).unwrap().data,
            saved.model.parameter(BIGRAM_WEIGHT).unwrap().data
        );
    }

    #[test]
    fn test_restore_retracks_parameters_frozen_by_saved_run() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("frozen.json");

        // Saved run froze the bias: its optimizer only knows the weight.
        let mut saved = state(1);
        saved.model.parameter_mut(BIGRAM_BIAS).unwrap().requires_grad = false;
        save_checkpoint(&path, &Checkpoint::capture(RunId::new(), &saved)).unwrap();

        let mut resumed = state(2);
        load_checkpoint(&path).unwrap().restore_state(&mut resumed).unwrap();

        assert!(resumed.model.parameter(BIGRAM_BIAS).unwrap().requires_grad);
        assert!(resumed.optimizers[0].tracks(BIGRAM_BIAS));
        assert!(resumed.optimizers[0].tracks(BIGRAM_WEIGHT));
        assert_eq!(resumed.optimizers[0].param_groups.len(), 1);
    }

    #[test]
    fn test_vocab_mismatch_rejected() {
        let saved = state(1);
        let ckpt = Checkpoint::capture(RunId::new(), &saved);
        let mut other = BigramLm::new(7, 0.02, 0).unwrap();
        assert!(matches!(ckpt.restore_weights(&mut other), Err(TrainingError::Checkpoint(_))));
    }

    #[test]
    fn test_missing_checkpoint_file() {
        let temp = TempDir::new().unwrap();
        assert!(load_checkpoint(&temp.path().join("nope.json")).is_err());
    }
}
