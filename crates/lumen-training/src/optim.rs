//! Optimizers with torch-style parameter groups.

use crate::error::{TrainingError, TrainingResult};
use crate::model::{CausalLm, Gradients};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerName {
    Sgd,
    #[serde(rename = "adamw")]
    AdamW,
}

fn default_betas() -> [f64; 2] {
    [0.9, 0.999]
}

fn default_eps() -> f64 {
    1e-8
}

/// `optimizer:` section of a training config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub name: OptimizerName,
    pub lr: f64,
    #[serde(default)]
    pub weight_decay: f64,
    /// SGD only.
    #[serde(default)]
    pub momentum: f64,
    /// AdamW only.
    #[serde(default = "default_betas")]
    pub betas: [f64; 2],
    /// AdamW only.
    #[serde(default = "default_eps")]
    pub eps: f64,
}

impl OptimizerConfig {
    pub fn validate(&self) -> TrainingResult<()> {
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(TrainingError::InvalidConfig("optimizer.lr must be > 0".to_string()));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(TrainingError::InvalidConfig("optimizer.weight_decay must be >= 0".to_string()));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(TrainingError::InvalidConfig("optimizer.momentum must be in [0, 1)".to_string()));
        }
        if self.betas.iter().any(|b| !(0.0..1.0).contains(b)) {
            return Err(TrainingError::InvalidConfig("optimizer.betas must be in [0, 1)".to_string()));
        }
        Ok(())
    }

    /// One parameter group holding every trainable parameter of `model`.
    pub fn build(&self, model: &dyn CausalLm) -> TrainingResult<Optimizer> {
        self.validate()?;
        let kind = match self.name {
            OptimizerName::Sgd => OptimizerKind::Sgd { momentum: self.momentum },
            OptimizerName::AdamW => OptimizerKind::AdamW { betas: self.betas, eps: self.eps },
        };
        let params = model
            .named_parameters()
            .iter()
            .filter(|p| p.requires_grad)
            .map(|p| p.name.clone())
            .collect();
        Ok(Optimizer::new(kind, vec![ParamGroup::new(params, self.lr, self.weight_decay)]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Sgd { momentum: f64 },
    AdamW { betas: [f64; 2], eps: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGroup {
    /// Names of the parameters this group updates.
    pub params: Vec<String>,
    pub lr: f64,
    /// Base rate the scheduler scales from.
    pub initial_lr: f64,
    #[serde(default)]
    pub weight_decay: f64,
}

impl ParamGroup {
    #[must_use]
    pub fn new(params: Vec<String>, lr: f64, weight_decay: f64) -> Self {
        Self { params, lr, initial_lr: lr, weight_decay }
    }
}

/// Per-parameter optimizer state. SGD keeps its momentum buffer in `exp_avg`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamState {
    #[serde(default)]
    pub step: u64,
    #[serde(default)]
    pub exp_avg: Vec<f32>,
    #[serde(default)]
    pub exp_avg_sq: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimizer {
    pub kind: OptimizerKind,
    pub param_groups: Vec<ParamGroup>,
    #[serde(default)]
    pub state: BTreeMap<String, ParamState>,
}

impl Optimizer {
    #[must_use]
    pub fn new(kind: OptimizerKind, param_groups: Vec<ParamGroup>) -> Self {
        Self { kind, param_groups, state: BTreeMap::new() }
    }

    #[must_use]
    pub fn tracks(&self, name: &str) -> bool {
        self.param_groups.iter().any(|g| g.params.iter().any(|p| p == name))
    }

    #[must_use]
    pub fn learning_rates(&self) -> Vec<f64> {
        self.param_groups.iter().map(|g| g.lr).collect()
    }

    /// Apply one update to every tracked, trainable parameter that has a gradient.
    pub fn step(&mut self, model: &mut dyn CausalLm, grads: &Gradients) -> TrainingResult<()> {
        let kind = self.kind;
        for group in &self.param_groups {
            for name in &group.params {
                let Some(grad) = grads.get(name) else {
                    continue;
                };
                let param = model
                    .parameter_mut(name)
                    .ok_or_else(|| TrainingError::Optimizer(format!("optimizer tracks unknown parameter `{name}`")))?;
                if !param.requires_grad {
                    continue;
                }
                if grad.len() != param.data.len() {
                    return Err(TrainingError::Optimizer(format!(
                        "gradient for `{name}` has {} elements, parameter has {}",
                        grad.len(),
                        param.data.len()
                    )));
                }

                let state = self.state.entry(name.clone()).or_default();
                match kind {
                    OptimizerKind::Sgd { momentum } => {
                        sgd_update(&mut param.data, grad, state, group.lr, group.weight_decay, momentum);
                    }
                    OptimizerKind::AdamW { betas, eps } => {
                        adamw_update(&mut param.data, grad, state, group.lr, group.weight_decay, betas, eps);
                    }
                }
            }
        }
        Ok(())
    }
}

fn sgd_update(data: &mut [f32], grad: &[f32], state: &mut ParamState, lr: f64, weight_decay: f64, momentum: f64) {
    if momentum > 0.0 && state.exp_avg.len() != data.len() {
        state.exp_avg = vec![0.0; data.len()];
    }
    state.step += 1;

    let (lr, wd, mom) = (lr as f32, weight_decay as f32, momentum as f32);
    for (i, (p, g)) in data.iter_mut().zip(grad).enumerate() {
        let mut d = g + wd * *p;
        if mom > 0.0 {
            let buf = &mut state.exp_avg[i];
            *buf = mom * *buf + d;
            d = *buf;
        }
        *p -= lr * d;
    }
}

fn adamw_update(
    data: &mut [f32],
    grad: &[f32],
    state: &mut ParamState,
    lr: f64,
    weight_decay: f64,
    betas: [f64; 2],
    eps: f64,
) {
    if state.exp_avg.len() != data.len() {
        state.exp_avg = vec![0.0; data.len()];
        state.exp_avg_sq = vec![0.0; data.len()];
    }
    state.step += 1;

    let t = state.step as i32;
    let bias1 = (1.0 - betas[0].powi(t)) as f32;
    let bias2 = (1.0 - betas[1].powi(t)) as f32;
    let (b1, b2) = (betas[0] as f32, betas[1] as f32);
    let (lr, wd, eps) = (lr as f32, weight_decay as f32, eps as f32);

    for (i, (p, g)) in data.iter_mut().zip(grad).enumerate() {
        *p *= 1.0 - lr * wd;
        let m = &mut state.exp_avg[i];
        *m = b1 * *m + (1.0 - b1) * g;
        let v = &mut state.exp_avg_sq[i];
        *v = b2 * *v + (1.0 - b2) * g * g;
        let m_hat = state.exp_avg[i] / bias1;
        let v_hat = state.exp_avg_sq[i] / bias2;
        *p -= lr * m_hat / (v_hat.sqrt() + eps);
    }
}

/// Stop every optimizer from updating `name` and drop its optimizer state.
pub fn remove_param_from_optimizers(name: &str, optimizers: &mut [Optimizer]) {
    for optimizer in optimizers {
        for group in &mut optimizer.param_groups {
            group.params.retain(|p| p != name);
        }
        optimizer.state.remove(name);
    }
}
