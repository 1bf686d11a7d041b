//! Learning-rate schedules.
//!
//! Every schedule is a multiplier on each group's `initial_lr`:
//! `lr = initial_lr * factor(step)`. Anything that wants a lasting change to
//! the learning rate therefore has to scale `initial_lr`, not just `lr`.

use crate::optim::Optimizer;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum SchedulerConfig {
    #[default]
    Constant,
    Linear {
        #[serde(default)]
        alpha_f: f64,
        #[serde(default)]
        warmup_steps: u64,
    },
    Cosine {
        #[serde(default)]
        alpha_f: f64,
        #[serde(default)]
        warmup_steps: u64,
    },
}

impl SchedulerConfig {
    #[must_use]
    pub fn factor(&self, step: u64, max_steps: u64) -> f64 {
        let (alpha_f, warmup) = match self {
            Self::Constant => return 1.0,
            Self::Linear { alpha_f, warmup_steps } | Self::Cosine { alpha_f, warmup_steps } => {
                (*alpha_f, *warmup_steps)
            }
        };

        if step < warmup {
            return (step + 1) as f64 / warmup as f64;
        }

        let span = max_steps.saturating_sub(warmup).max(1);
        let frac = ((step - warmup) as f64 / span as f64).clamp(0.0, 1.0);
        match self {
            Self::Linear { .. } => 1.0 - (1.0 - alpha_f) * frac,
            Self::Cosine { .. } => alpha_f + (1.0 - alpha_f) * 0.5 * (1.0 + (PI * frac).cos()),
            Self::Constant => 1.0,
        }
    }

    /// Set every group's `lr` for the given step.
    pub fn apply(&self, optimizers: &mut [Optimizer], step: u64, max_steps: u64) {
        let factor = self.factor(step, max_steps);
        for optimizer in optimizers {
            for group in &mut optimizer.param_groups {
                group.lr = group.initial_lr * factor;
            }
        }
    }
}
