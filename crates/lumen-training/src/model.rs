//! Causal language models.
//!
//! The only registered model is a bigram LM: `logits[t] = W[x_t] + b`. It is
//! small enough to checkpoint as JSON and still has named parameters,
//! gradients and next-token logits, which is everything the evaluation and
//! resumption code needs from a model.

use crate::checkpoint::load_checkpoint;
use crate::config::ModelConfig;
use crate::error::{TrainingError, TrainingResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Per-parameter gradients keyed by parameter name.
pub type Gradients = BTreeMap<String, Vec<f32>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
    #[serde(default = "default_requires_grad")]
    pub requires_grad: bool,
}

fn default_requires_grad() -> bool {
    true
}

impl Parameter {
    #[must_use]
    pub fn zeros(name: &str, shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self { name: name.to_string(), shape, data: vec![0.0; len], requires_grad: true }
    }

    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.len()
    }
}

/// Registered model architectures. Selected by the `model.name` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Bigram,
}

pub trait CausalLm: Send {
    fn kind(&self) -> ModelKind;

    fn vocab_size(&self) -> usize;

    fn named_parameters(&self) -> &[Parameter];

    fn named_parameters_mut(&mut self) -> &mut [Parameter];

    /// Next-token logits for every position of `input_ids`.
    fn logits(&self, input_ids: &[u32]) -> TrainingResult<Vec<Vec<f32>>>;

    /// Mean next-token cross entropy over `sequences` and the gradients of
    /// every parameter that has `requires_grad` set.
    fn loss_and_grads(&self, sequences: &[Vec<u32>]) -> TrainingResult<(f64, Gradients)>;

    fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.named_parameters().iter().find(|p| p.name == name)
    }

    fn parameter_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.named_parameters_mut().iter_mut().find(|p| p.name == name)
    }
}

pub const BIGRAM_WEIGHT: &str = "transitions.weight";
pub const BIGRAM_BIAS: &str = "transitions.bias";

#[derive(Debug, Clone)]
pub struct BigramLm {
    vocab_size: usize,
    params: Vec<Parameter>,
}

impl BigramLm {
    const WEIGHT: usize = 0;
    const BIAS: usize = 1;

    pub fn new(vocab_size: usize, init_std: f32, seed: u64) -> TrainingResult<Self> {
        if vocab_size == 0 {
            return Err(TrainingError::Model("vocab_size must be >= 1".to_string()));
        }
        if !init_std.is_finite() || init_std < 0.0 {
            return Err(TrainingError::Model("init_std must be a finite, non-negative number".to_string()));
        }

        let mut weight = Parameter::zeros(BIGRAM_WEIGHT, vec![vocab_size, vocab_size]);
        if init_std > 0.0 {
            // Uniform with the requested standard deviation.
            let bound = init_std * 3f32.sqrt();
            let mut rng = StdRng::seed_from_u64(seed);
            for w in &mut weight.data {
                *w = rng.gen_range(-bound..bound);
            }
        }
        let bias = Parameter::zeros(BIGRAM_BIAS, vec![vocab_size]);

        Ok(Self { vocab_size, params: vec![weight, bias] })
    }

    fn check_token(&self, id: u32) -> TrainingResult<usize> {
        let idx = id as usize;
        if idx >= self.vocab_size {
            return Err(TrainingError::Model(format!(
                "token id {id} out of range for vocab of {}",
                self.vocab_size
            )));
        }
        Ok(idx)
    }

    fn row(&self, token: usize) -> Vec<f32> {
        let v = self.vocab_size;
        let weight = &self.params[Self::WEIGHT].data[token * v..(token + 1) * v];
        weight.iter().zip(&self.params[Self::BIAS].data).map(|(w, b)| w + b).collect()
    }
}

impl CausalLm for BigramLm {
    fn kind(&self) -> ModelKind {
        ModelKind::Bigram
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn named_parameters(&self) -> &[Parameter] {
        &self.params
    }

    fn named_parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.params
    }

    fn logits(&self, input_ids: &[u32]) -> TrainingResult<Vec<Vec<f32>>> {
        input_ids.iter().map(|id| Ok(self.row(self.check_token(*id)?))).collect()
    }

    fn loss_and_grads(&self, sequences: &[Vec<u32>]) -> TrainingResult<(f64, Gradients)> {
        let v = self.vocab_size;
        let weight_trainable = self.params[Self::WEIGHT].requires_grad;
        let bias_trainable = self.params[Self::BIAS].requires_grad;

        let mut grad_w = if weight_trainable { vec![0f32; v * v] } else { Vec::new() };
        let mut grad_b = if bias_trainable { vec![0f32; v] } else { Vec::new() };
        let mut total_loss = 0f64;
        let mut pairs = 0usize;

        for seq in sequences {
            for window in seq.windows(2) {
                let x = self.check_token(window[0])?;
                let y = self.check_token(window[1])?;
                let logp = log_softmax(&self.row(x));
                total_loss -= f64::from(logp[y]);
                pairs += 1;

                for (j, lp) in logp.iter().enumerate() {
                    let g = lp.exp() - if j == y { 1.0 } else { 0.0 };
                    if weight_trainable {
                        grad_w[x * v + j] += g;
                    }
                    if bias_trainable {
                        grad_b[j] += g;
                    }
                }
            }
        }

        if pairs == 0 {
            return Err(TrainingError::Model("batch contains no next-token pairs".to_string()));
        }

        let scale = 1.0 / pairs as f32;
        let mut grads = Gradients::new();
        if weight_trainable {
            grad_w.iter_mut().for_each(|g| *g *= scale);
            grads.insert(BIGRAM_WEIGHT.to_string(), grad_w);
        }
        if bias_trainable {
            grad_b.iter_mut().for_each(|g| *g *= scale);
            grads.insert(BIGRAM_BIAS.to_string(), grad_b);
        }
        Ok((total_loss / pairs as f64, grads))
    }
}

pub(crate) fn log_softmax(row: &[f32]) -> Vec<f32> {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = row.iter().map(|x| (x - max).exp()).sum();
    let log_sum = sum.ln() + max;
    row.iter().map(|x| x - log_sum).collect()
}

pub(crate) fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, x) in row.iter().enumerate() {
        if *x > row[best] {
            best = i;
        }
    }
    best
}

/// Build the configured model and, when `load_path` is set, load its weights.
pub fn load_model(cfg: &ModelConfig, vocab_size: usize, seed: u64) -> TrainingResult<Box<dyn CausalLm>> {
    let mut model: Box<dyn CausalLm> = match cfg.name {
        ModelKind::Bigram => Box::new(BigramLm::new(vocab_size, cfg.init_std, seed)?),
    };

    if let Some(path) = &cfg.load_path {
        let ckpt = load_checkpoint(path)?;
        ckpt.restore_weights(model.as_mut())?;
        info!(path = %path.display(), step = ckpt.timestamp.step, "loaded model weights");
    }

    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bigram_logits_shape() {
        let model = BigramLm::new(8, 0.02, 0).unwrap();
        let logits = model.logits(&[1, 2, 3]).unwrap();
        assert_eq!(logits.len(), 3);
        assert!(logits.iter().all(|row| row.len() == 8));
    }

    #[test]
    fn test_bigram_rejects_out_of_range_tokens() {
        let model = BigramLm::new(4, 0.02, 0).unwrap();
        assert!(model.logits(&[4]).is_err());
    }

    #[test]
    fn test_uniform_model_loss_is_log_vocab() {
        let model = BigramLm::new(4, 0.0, 0).unwrap();
        let (loss, grads) = model.loss_and_grads(&[vec![0, 1, 2, 3]]).unwrap();
        assert!((loss - 4f64.ln()).abs() < 1e-5);
        assert_eq!(grads[BIGRAM_WEIGHT].len(), 16);
        assert_eq!(grads[BIGRAM_BIAS].len(), 4);
    }

    #[test]
    fn test_frozen_parameters_get_no_gradient() {
        let mut model = BigramLm::new(4, 0.0, 0).unwrap();
        model.parameter_mut(BIGRAM_BIAS).unwrap().requires_grad = false;
        let (_, grads) = model.loss_and_grads(&[vec![0, 1]]).unwrap();
        assert!(grads.contains_key(BIGRAM_WEIGHT));
        assert!(!grads.contains_key(BIGRAM_BIAS));
    }

    #[test]
    fn test_single_token_batch_is_an_error() {
        let model = BigramLm::new(4, 0.0, 0).unwrap();
        assert!(model.loss_and_grads(&[vec![1]]).is_err());
    }

    #[test]
    fn test_log_softmax_normalizes() {
        let lp = log_softmax(&[1.0, 2.0, 3.0]);
        let total: f32 = lp.iter().map(|x| x.exp()).sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert_eq!(argmax(&lp), 2);
    }
}
