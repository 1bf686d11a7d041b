use crate::config::{EvalConfig, IclTaskConfig};
use crate::error::{TrainingError, TrainingResult};
use crate::icl::dataset::{batch_samples, build_samples, read_examples};
use crate::icl::evaluator::Evaluator;
use crate::tokenizer::Tokenizer;
use tracing::{debug, info};

/// Build one evaluator per few-shot count of `task`, plus the metric keys
/// they will be logged under.
///
/// Evaluators are labelled `{label}/{n}-shot`; keys are
/// `metrics/{label}/{n}-shot/{metric}`.
pub fn build_evaluators(
    task: &IclTaskConfig,
    tokenizer: &dyn Tokenizer,
    max_seq_len: usize,
    seed: u64,
) -> TrainingResult<(Vec<Evaluator>, Vec<String>)> {
    task.validate()?;
    if let Some(metric) = task.metrics.iter().find(|m| m.task_type() != task.task_type) {
        return Err(TrainingError::InvalidConfig(format!(
            "{}: metric {} does not apply to {} tasks",
            task.label, metric, task.task_type
        )));
    }

    let examples = read_examples(&task.dataset_uri, task.task_type)?;
    debug!(label = %task.label, rows = examples.len(), "loaded icl dataset");

    let mut evaluators = Vec::new();
    let mut logger_keys = Vec::new();
    for num_fewshot in task.num_fewshot.counts() {
        let samples = build_samples(
            &examples,
            num_fewshot,
            tokenizer,
            &task.formatting_options,
            max_seq_len,
            seed,
        )?;
        let evaluator = Evaluator {
            label: format!("{}/{}-shot", task.label, num_fewshot),
            task_type: task.task_type,
            batches: batch_samples(samples, task.batch_size),
            metrics: task.metrics.clone(),
        };
        logger_keys.extend(evaluator.metric_keys());
        evaluators.push(evaluator);
    }

    Ok((evaluators, logger_keys))
}

/// Build every evaluator described by `cfg.icl_tasks`, in task order.
///
/// The first failing task aborts the whole build.
pub fn get_evaluators_from_config(cfg: &EvalConfig) -> TrainingResult<(Vec<Evaluator>, Vec<String>)> {
    let tokenizer = cfg.tokenizer.build()?;
    let max_seq_len = cfg.tokenizer.args.max_seq_len;

    let mut evaluators = Vec::new();
    let mut logger_keys = Vec::new();
    for task in &cfg.icl_tasks {
        let (built, keys) = build_evaluators(task, tokenizer.as_ref(), max_seq_len, cfg.seed)?;
        evaluators.extend(built);
        logger_keys.extend(keys);
    }

    info!(evaluators = evaluators.len(), metrics = logger_keys.len(), "built icl evaluators");
    Ok((evaluators, logger_keys))
}
