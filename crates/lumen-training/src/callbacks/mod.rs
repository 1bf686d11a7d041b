//! Trainer lifecycle callbacks.
//!
//! A callback receives every [`Event`] together with mutable access to the
//! trainer [`State`]. The default `run_event` dispatches to one method per
//! event, all of which are no-ops unless overridden.

pub mod resumption;

use crate::error::TrainingResult;
use crate::logger::MetricLogger;
use crate::trainer::State;

pub use resumption::{GlobalLrLowering, LayerFreezing, ResumptionStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    FitStart,
    BatchEnd,
    FitEnd,
    EvalStart,
    EvalEnd,
}

pub trait Callback: Send {
    fn name(&self) -> &'static str;

    fn run_event(&mut self, event: Event, state: &mut State, logger: &mut dyn MetricLogger) -> TrainingResult<()> {
        match event {
            Event::FitStart => self.fit_start(state, logger),
            Event::BatchEnd => self.batch_end(state, logger),
            Event::FitEnd => self.fit_end(state, logger),
            Event::EvalStart => self.eval_start(state, logger),
            Event::EvalEnd => self.eval_end(state, logger),
        }
    }

    fn fit_start(&mut self, _state: &mut State, _logger: &mut dyn MetricLogger) -> TrainingResult<()> {
        Ok(())
    }

    fn batch_end(&mut self, _state: &mut State, _logger: &mut dyn MetricLogger) -> TrainingResult<()> {
        Ok(())
    }

    fn fit_end(&mut self, _state: &mut State, _logger: &mut dyn MetricLogger) -> TrainingResult<()> {
        Ok(())
    }

    fn eval_start(&mut self, _state: &mut State, _logger: &mut dyn MetricLogger) -> TrainingResult<()> {
        Ok(())
    }

    fn eval_end(&mut self, _state: &mut State, _logger: &mut dyn MetricLogger) -> TrainingResult<()> {
        Ok(())
    }
}
