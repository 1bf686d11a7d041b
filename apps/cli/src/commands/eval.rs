//! `lumen eval`: build ICL evaluators from config and report their metrics.

use anyhow::{Context, Result};
use colored::Colorize;
use lumen_training::logger::{ConsoleLogger, InMemoryLogger};
use lumen_training::{get_evaluators_from_config, load_model, EvalConfig, State, Trainer};
use std::path::Path;
use std::time::Instant;

pub fn execute(config_path: &Path, overrides: &[String]) -> Result<()> {
    let cfg = EvalConfig::load(config_path, overrides)
        .with_context(|| format!("Failed to load eval config: {}", config_path.display()))?;

    let tokenizer = cfg.tokenizer.build().context("Failed to build tokenizer")?;
    let model = load_model(&cfg.model, tokenizer.vocab_size(), cfg.seed).context("Failed to load model")?;

    let (evaluators, logger_keys) = get_evaluators_from_config(&cfg).context("Failed to build ICL evaluators")?;

    let in_memory = InMemoryLogger::new();
    let mut trainer = Trainer::new(State::new(model, Vec::new(), 0));
    trainer.add_logger(in_memory.clone());
    trainer.add_logger(ConsoleLogger);

    let started = Instant::now();
    trainer.eval(&evaluators).context("Evaluation failed")?;
    let elapsed = started.elapsed().as_secs_f64();

    println!("{}", format!("Ran eval in: {elapsed} seconds").bold());
    for key in &logger_keys {
        if let Some(value) = in_memory.first(key) {
            println!("{}: {}", key.cyan(), value);
        }
    }
    Ok(())
}
