//! Lumen CLI - evaluate and train small causal language models.
//!
//! `lumen eval` builds in-context-learning evaluators from a YAML run config
//! and prints their metrics. `lumen train` runs (or resumes) training and
//! writes a checkpoint.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "lumen", author, version, about = "Lumen - ICL evaluation and resumable training")]
struct Args {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[arg(
        short,
        long,
        default_value = "info",
        global = true,
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate a model on the configured ICL tasks
    ///
    /// Builds one evaluator per task and few-shot count, runs them, and prints
    /// every metric under its `metrics/{label}/{n}-shot/{metric}` key.
    Eval {
        /// YAML run config
        config: PathBuf,

        /// Dotted overrides applied on top of the YAML, e.g. `icl_tasks.0.batch_size=8`
        overrides: Vec<String>,
    },

    /// Train a model, optionally resuming from a checkpoint
    Train {
        /// YAML run config
        config: PathBuf,

        /// Dotted overrides applied on top of the YAML, e.g. `optimizer.lr=0.01`
        overrides: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // Logs go to stderr so stdout carries only command output.
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Eval { config, overrides } => commands::eval::execute(&config, &overrides),
        Command::Train { config, overrides } => commands::train::execute(&config, &overrides),
    }
}
