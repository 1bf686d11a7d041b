//! `lumen train`: fit a model, resuming from a checkpoint when configured.

use anyhow::{Context, Result};
use colored::Colorize;
use lumen_training::logger::ConsoleLogger;
use lumen_training::{load_checkpoint, load_model, save_checkpoint, Checkpoint, RunId, State, TrainConfig, TrainData, Trainer};
use std::path::Path;
use tracing::info;

pub fn execute(config_path: &Path, overrides: &[String]) -> Result<()> {
    let cfg = TrainConfig::load(config_path, overrides)
        .with_context(|| format!("Failed to load train config: {}", config_path.display()))?;

    let tokenizer = cfg.tokenizer.build().context("Failed to build tokenizer")?;
    let model = load_model(&cfg.model, tokenizer.vocab_size(), cfg.seed).context("Failed to load model")?;
    let optimizer = cfg.optimizer.build(model.as_ref()).context("Failed to build optimizer")?;
    let mut state = State::new(model, vec![optimizer], cfg.max_steps);

    if let Some(path) = &cfg.load_path {
        let ckpt = load_checkpoint(path).with_context(|| format!("Failed to read checkpoint: {}", path.display()))?;
        ckpt.restore_state(&mut state).context("Failed to restore checkpoint")?;
        info!(path = %path.display(), step = state.timestamp.step, run_id = %ckpt.run_id, "resuming");
    }

    let data = TrainData::from_jsonl(
        &cfg.train_loader.dataset_uri,
        tokenizer.as_ref(),
        cfg.tokenizer.args.max_seq_len,
        cfg.train_loader.batch_size,
    )
    .context("Failed to load training data")?;

    let mut trainer = Trainer::new(state).with_scheduler(cfg.scheduler.clone()).with_log_interval(cfg.log_interval);
    trainer.add_logger(ConsoleLogger);
    for strategy in cfg.resumption {
        info!(strategy = strategy.name(), "registering resumption callback");
        trainer.add_callback(strategy.into_callback());
    }

    let summary = trainer.fit(&data).context("Training failed")?;

    println!();
    println!("{}", "Training complete".bold().green());
    println!("  Steps run: {}", summary.steps_run);
    println!("  Final step: {}", summary.final_step);
    if let Some(loss) = summary.last_loss {
        println!("  Last loss: {loss:.4}");
    }

    if let Some(path) = &cfg.save_path {
        let ckpt = Checkpoint::capture(RunId::new(), trainer.state());
        let artifact =
            save_checkpoint(path, &ckpt).with_context(|| format!("Failed to write checkpoint: {}", path.display()))?;
        println!("  Checkpoint: {}", artifact.path.display().to_string().dimmed());
        println!("  sha256: {}", artifact.sha256.cyan());
    }
    println!();
    Ok(())
}
