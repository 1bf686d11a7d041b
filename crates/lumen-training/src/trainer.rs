use crate::callbacks::{Callback, Event};
use crate::data::TrainData;
use crate::error::TrainingResult;
use crate::icl::Evaluator;
use crate::logger::{Loggers, MetricLogger};
use crate::model::CausalLm;
use crate::optim::Optimizer;
use crate::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Training progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timestamp {
    /// Optimizer steps taken.
    pub step: u64,
    /// Sequences consumed.
    pub samples: u64,
}

/// Everything a callback may inspect or mutate.
pub struct State {
    pub model: Box<dyn CausalLm>,
    pub optimizers: Vec<Optimizer>,
    pub timestamp: Timestamp,
    pub max_steps: u64,
}

impl State {
    #[must_use]
    pub fn new(model: Box<dyn CausalLm>, optimizers: Vec<Optimizer>, max_steps: u64) -> Self {
        Self { model, optimizers, timestamp: Timestamp::default(), max_steps }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSummary {
    pub steps_run: u64,
    pub final_step: u64,
    pub last_loss: Option<f64>,
}

pub struct Trainer {
    state: State,
    callbacks: Vec<Box<dyn Callback>>,
    loggers: Loggers,
    scheduler: SchedulerConfig,
    log_interval: u64,
}

impl Trainer {
    #[must_use]
    pub fn new(state: State) -> Self {
        Self {
            state,
            callbacks: Vec::new(),
            loggers: Loggers::new(),
            scheduler: SchedulerConfig::Constant,
            log_interval: 10,
        }
    }

    #[must_use]
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    #[must_use]
    pub fn with_log_interval(mut self, log_interval: u64) -> Self {
        self.log_interval = log_interval.max(1);
        self
    }

    pub fn add_callback(&mut self, callback: Box<dyn Callback>) {
        self.callbacks.push(callback);
    }

    pub fn add_logger<L: MetricLogger + 'static>(&mut self, logger: L) {
        self.loggers.push(logger);
    }

    #[must_use]
    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    #[must_use]
    pub fn into_state(self) -> State {
        self.state
    }

    fn run_event(&mut self, event: Event) -> TrainingResult<()> {
        for callback in &mut self.callbacks {
            debug!(callback = callback.name(), ?event, "running callback");
            callback.run_event(event, &mut self.state, &mut self.loggers)?;
        }
        Ok(())
    }

    /// Run every evaluator and log `metrics/{label}/{metric}` for each of its
    /// metrics. Returns the logged values.
    pub fn eval(&mut self, evaluators: &[Evaluator]) -> TrainingResult<BTreeMap<String, f64>> {
        self.run_event(Event::EvalStart)?;

        let mut results = BTreeMap::new();
        for evaluator in evaluators {
            let mut metrics = evaluator.fresh_metrics();
            for batch in &evaluator.batches {
                for metric in &mut metrics {
                    metric.update(self.state.model.as_ref(), batch)?;
                }
            }

            let logged: BTreeMap<String, f64> = metrics
                .iter()
                .map(|m| (evaluator.metric_key(m.kind), m.compute()))
                .collect();
            debug!(label = %evaluator.label, samples = evaluator.num_samples(), "evaluated");
            self.loggers.log_metrics(&logged, self.state.timestamp.step);
            results.extend(logged);
        }

        self.run_event(Event::EvalEnd)?;
        Ok(results)
    }

    /// Train until `state.max_steps`. `FitStart` fires once before the first
    /// step, even when the timestamp is already at `max_steps`.
    pub fn fit(&mut self, data: &TrainData) -> TrainingResult<FitSummary> {
        self.run_event(Event::FitStart)?;

        let start_step = self.state.timestamp.step;
        let max_steps = self.state.max_steps;
        if start_step >= max_steps {
            info!(step = start_step, max_steps, "run already reached max_steps");
        }

        let mut last_loss = None;
        while self.state.timestamp.step < max_steps {
            let step = self.state.timestamp.step;
            let batch = data.batch_for_step(step);

            self.scheduler.apply(&mut self.state.optimizers, step, max_steps);
            let (loss, grads) = self.state.model.loss_and_grads(batch)?;
            for optimizer in &mut self.state.optimizers {
                optimizer.step(self.state.model.as_mut(), &grads)?;
            }

            self.state.timestamp.step += 1;
            self.state.timestamp.samples += batch.len() as u64;
            last_loss = Some(loss);

            let done = self.state.timestamp.step;
            if done % self.log_interval == 0 || done == max_steps {
                let mut metrics = BTreeMap::from([("loss/train/total".to_string(), loss)]);
                if let Some(group) = self.state.optimizers.first().and_then(|o| o.param_groups.first()) {
                    metrics.insert("lr-0".to_string(), group.lr);
                }
                self.loggers.log_metrics(&metrics, done);
                info!(step = done, max_steps, loss, "train");
            }

            self.run_event(Event::BatchEnd)?;
        }

        self.run_event(Event::FitEnd)?;
        Ok(FitSummary {
            steps_run: self.state.timestamp.step - start_step,
            final_step: self.state.timestamp.step,
            last_loss,
        })
    }
}
