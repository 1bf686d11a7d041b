//! Callbacks that adjust a run once, at fit start, when it resumes from a
//! checkpoint.

use crate::callbacks::Callback;
use crate::error::{TrainingError, TrainingResult};
use crate::logger::MetricLogger;
use crate::optim::remove_param_from_optimizers;
use crate::trainer::State;
use serde::{Deserialize, Serialize};
use tracing::info;

/// The registered resumption strategies, selected by the `strategy` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ResumptionStrategy {
    LayerFreezing { layer_names: Vec<String> },
    GlobalLrLowering { lr_scale: f64 },
}

impl ResumptionStrategy {
    pub const NAMES: [&'static str; 2] = ["layer_freezing", "global_lr_lowering"];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::LayerFreezing { .. } => "layer_freezing",
            Self::GlobalLrLowering { .. } => "global_lr_lowering",
        }
    }

    pub fn validate(&self) -> TrainingResult<()> {
        match self {
            Self::LayerFreezing { layer_names } if layer_names.is_empty() => {
                Err(TrainingError::InvalidConfig("layer_freezing needs at least one layer name".to_string()))
            }
            Self::GlobalLrLowering { lr_scale } if !lr_scale.is_finite() || *lr_scale <= 0.0 => {
                Err(TrainingError::InvalidConfig("global_lr_lowering lr_scale must be > 0".to_string()))
            }
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn into_callback(self) -> Box<dyn Callback> {
        match self {
            Self::LayerFreezing { layer_names } => Box::new(LayerFreezing::new(layer_names)),
            Self::GlobalLrLowering { lr_scale } => Box::new(GlobalLrLowering::new(lr_scale)),
        }
    }
}

/// Multiplies every parameter group's `lr` and `initial_lr` by `lr_scale`.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalLrLowering {
    lr_scale: f64,
}

impl GlobalLrLowering {
    #[must_use]
    pub fn new(lr_scale: f64) -> Self {
        Self { lr_scale }
    }
}

impl Callback for GlobalLrLowering {
    fn name(&self) -> &'static str {
        "global_lr_lowering"
    }

    fn fit_start(&mut self, state: &mut State, _logger: &mut dyn MetricLogger) -> TrainingResult<()> {
        if state.optimizers.is_empty() {
            return Err(TrainingError::Callback {
                callback: self.name(),
                message: "optimizers must be defined".to_string(),
            });
        }

        let mut before = Vec::new();
        let mut after = Vec::new();
        for optimizer in &mut state.optimizers {
            for group in &mut optimizer.param_groups {
                before.push(group.lr);
                group.initial_lr *= self.lr_scale;
                group.lr *= self.lr_scale;
                after.push(group.lr);
            }
        }

        info!(?before, ?after, lr_scale = self.lr_scale, "lowered learning rates");
        Ok(())
    }
}

/// Turns off gradients for the named parameters and drops them from every
/// optimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerFreezing {
    layer_names: Vec<String>,
}

impl LayerFreezing {
    #[must_use]
    pub fn new(layer_names: Vec<String>) -> Self {
        Self { layer_names }
    }
}

impl Callback for LayerFreezing {
    fn name(&self) -> &'static str {
        "layer_freezing"
    }

    fn fit_start(&mut self, state: &mut State, _logger: &mut dyn MetricLogger) -> TrainingResult<()> {
        let available: Vec<String> = state.model.named_parameters().iter().map(|p| p.name.clone()).collect();
        if let Some(missing) = self.layer_names.iter().find(|l| !available.contains(l)) {
            return Err(TrainingError::UnknownLayer { name: missing.clone(), available });
        }

        let mut frozen = Vec::new();
        for param in state.model.named_parameters_mut() {
            if param.requires_grad && self.layer_names.contains(&param.name) {
                param.requires_grad = false;
                frozen.push(param.name.clone());
            }
        }
        for name in &frozen {
            remove_param_from_optimizers(name, &mut state.optimizers);
        }

        if frozen.is_empty() {
            return Err(TrainingError::NothingFrozen { requested: self.layer_names.clone() });
        }

        info!(?frozen, "froze layers");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::InMemoryLogger;
    use crate::model::{BigramLm, BIGRAM_BIAS, BIGRAM_WEIGHT};
    use crate::optim::{Optimizer, OptimizerKind, ParamGroup};

    fn sgd(groups: Vec<ParamGroup>) -> Optimizer {
        Optimizer::new(OptimizerKind::Sgd { momentum: 0.0 }, groups)
    }

    fn state_with(optimizers: Vec<Optimizer>) -> State {
        State::new(Box::new(BigramLm::new(4, 0.02, 0).unwrap()), optimizers, 10)
    }

    fn both_params() -> Vec<String> {
        vec![BIGRAM_WEIGHT.to_string(), BIGRAM_BIAS.to_string()]
    }

    fn run(strategy: ResumptionStrategy, state: &mut State) -> TrainingResult<()> {
        let mut logger = InMemoryLogger::new();
        strategy.into_callback().fit_start(state, &mut logger)
    }

    #[test]
    fn test_lr_lowering_scales_every_group() {
        let mut state = state_with(vec![
            sgd(vec![
                ParamGroup::new(vec![BIGRAM_WEIGHT.to_string()], 0.4, 0.0),
                ParamGroup::new(vec![BIGRAM_BIAS.to_string()], 0.2, 0.0),
            ]),
            sgd(vec![ParamGroup::new(both_params(), 1.0, 0.0)]),
        ]);

        run(ResumptionStrategy::GlobalLrLowering { lr_scale: 0.5 }, &mut state).unwrap();

        let groups: Vec<&ParamGroup> = state.optimizers.iter().flat_map(|o| &o.param_groups).collect();
        let expected = [0.2, 0.1, 0.5];
        for (group, want) in groups.iter().zip(expected) {
            assert!((group.lr - want).abs() < 1e-12);
            assert!((group.initial_lr - want).abs() < 1e-12);
        }
    }

    #[test]
    fn test_lr_lowering_composes() {
        let mut state = state_with(vec![sgd(vec![ParamGroup::new(both_params(), 0.8, 0.0)])]);

        run(ResumptionStrategy::GlobalLrLowering { lr_scale: 0.5 }, &mut state).unwrap();
        run(ResumptionStrategy::GlobalLrLowering { lr_scale: 0.25 }, &mut state).unwrap();

        let group = &state.optimizers[0].param_groups[0];
        assert!((group.lr - 0.8 * 0.5 * 0.25).abs() < 1e-12);
        assert!((group.initial_lr - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_lr_lowering_requires_optimizers() {
        let mut state = state_with(Vec::new());
        let err = run(ResumptionStrategy::GlobalLrLowering { lr_scale: 0.5 }, &mut state).unwrap_err();
        assert!(matches!(err, TrainingError::Callback { callback: "global_lr_lowering", .. }));
    }

    #[test]
    fn test_freezing_unknown_layer_lists_available() {
        let mut state = state_with(vec![sgd(vec![ParamGroup::new(both_params(), 0.1, 0.0)])]);
        let err = run(
            ResumptionStrategy::LayerFreezing { layer_names: vec![BIGRAM_BIAS.to_string(), "blocks.0.attn".to_string()] },
            &mut state,
        )
        .unwrap_err();

        match err {
            TrainingError::UnknownLayer { name, available } => {
                assert_eq!(name, "blocks.0.attn");
                assert_eq!(available, both_params());
            }
            other => panic!("unexpected error: {other}"),
        }
        // Validation happens before anything is frozen.
        assert!(state.model.parameter(BIGRAM_BIAS).unwrap().requires_grad);
    }

    #[test]
    fn test_freezing_disables_grad_and_untracks_everywhere() {
        let mut state = state_with(vec![
            sgd(vec![ParamGroup::new(both_params(), 0.1, 0.0)]),
            sgd(vec![
                ParamGroup::new(vec![BIGRAM_BIAS.to_string()], 0.1, 0.0),
                ParamGroup::new(vec![BIGRAM_WEIGHT.to_string()], 0.1, 0.0),
            ]),
        ]);

        run(ResumptionStrategy::LayerFreezing { layer_names: vec![BIGRAM_BIAS.to_string()] }, &mut state).unwrap();

        assert!(!state.model.parameter(BIGRAM_BIAS).unwrap().requires_grad);
        assert!(state.model.parameter(BIGRAM_WEIGHT).unwrap().requires_grad);
        for optimizer in &state.optimizers {
            assert!(!optimizer.tracks(BIGRAM_BIAS));
            assert!(optimizer.tracks(BIGRAM_WEIGHT));
        }
    }

    #[test]
    fn test_freezing_nothing_is_an_error() {
        let mut state = state_with(vec![sgd(vec![ParamGroup::new(both_params(), 0.1, 0.0)])]);
        let strategy = ResumptionStrategy::LayerFreezing { layer_names: vec![BIGRAM_BIAS.to_string()] };

        run(strategy.clone(), &mut state).unwrap();
        // Already frozen: the second pass matches zero trainable parameters.
        let err = run(strategy, &mut state).unwrap_err();
        assert!(matches!(err, TrainingError::NothingFrozen { .. }));

        let err = run(ResumptionStrategy::LayerFreezing { layer_names: Vec::new() }, &mut state).unwrap_err();
        assert!(matches!(err, TrainingError::NothingFrozen { .. }));
    }

    #[test]
    fn test_strategy_registry_parses_known_names_only() {
        let parsed: ResumptionStrategy = serde_yaml::from_str("strategy: global_lr_lowering\nlr_scale: 0.1").unwrap();
        assert_eq!(parsed, ResumptionStrategy::GlobalLrLowering { lr_scale: 0.1 });
        assert_eq!(parsed.name(), ResumptionStrategy::NAMES[1]);

        let parsed: Result<ResumptionStrategy, _> = serde_yaml::from_str("strategy: grad_clipping\nmax: 1.0");
        assert!(parsed.is_err());

        assert!(ResumptionStrategy::GlobalLrLowering { lr_scale: 0.0 }.validate().is_err());
        assert!(ResumptionStrategy::LayerFreezing { layer_names: Vec::new() }.validate().is_err());
    }
}
