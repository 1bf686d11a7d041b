//! Integration tests for `lumen train`, including resumption.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn train_fixture(temp_dir: &TempDir) -> PathBuf {
    let dir = temp_dir.path();
    let data = dir.join("train.jsonl");
    std::fs::write(
        &data,
        "{\"text\": \"the cat sat on the mat\"}\n{\"text\": \"the dog sat on the log\"}\n",
    )
    .unwrap();

    let config = format!(
        r#"
model:
  name: bigram
tokenizer:
  type: byte
  args:
    max_seq_len: 16
optimizer:
  name: sgd
  lr: 0.5
scheduler:
  name: linear
  alpha_f: 0.1
  warmup_steps: 1
train_loader:
  dataset_uri: '{}'
  batch_size: 2
max_steps: 3
log_interval: 1
"#,
        data.display()
    );
    let path = dir.join("train.yaml");
    std::fs::write(&path, config).unwrap();
    path
}

fn run_train(config: &Path, overrides: &[String]) -> assert_cmd::assert::Assert {
    let mut cmd = Command::cargo_bin("lumen").unwrap();
    cmd.env("NO_COLOR", "1").arg("train").arg(config).args(overrides).assert()
}

#[test]
fn test_train_writes_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    let config = train_fixture(&temp_dir);
    let ckpt = temp_dir.path().join("ckpt").join("run1.json");

    run_train(&config, &[format!("save_path={}", ckpt.display())])
        .success()
        .stdout(predicate::str::contains("Training complete"))
        .stdout(predicate::str::contains("Steps run: 3"))
        .stdout(predicate::str::contains("sha256: "));

    assert!(ckpt.exists());
}

#[test]
fn test_train_resumes_with_resumption_callbacks() {
    let temp_dir = TempDir::new().unwrap();
    let config = train_fixture(&temp_dir);
    let first = temp_dir.path().join("first.json");
    let second = temp_dir.path().join("second.json");

    run_train(&config, &[format!("save_path={}", first.display())]).success();

    let contents = std::fs::read_to_string(&config).unwrap()
        + "resumption:\n  - strategy: global_lr_lowering\n    lr_scale: 0.1\n  - strategy: layer_freezing\n    layer_names: [transitions.bias]\n";
    std::fs::write(&config, contents).unwrap();

    run_train(
        &config,
        &[
            format!("load_path={}", first.display()),
            format!("save_path={}", second.display()),
            "max_steps=5".to_string(),
        ],
    )
    .success()
    .stdout(predicate::str::contains("Steps run: 2"))
    .stdout(predicate::str::contains("Final step: 5"));

    let saved = std::fs::read_to_string(&second).unwrap();
    assert!(saved.contains("\"step\": 5"));
}

#[test]
fn test_train_unknown_freeze_layer_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config = train_fixture(&temp_dir);
    let contents = std::fs::read_to_string(&config).unwrap()
        + "resumption:\n  - strategy: layer_freezing\n    layer_names: [blocks.0.attn]\n";
    std::fs::write(&config, contents).unwrap();

    run_train(&config, &[])
        .failure()
        .stderr(predicate::str::contains("attempted to freeze layer not found in model: blocks.0.attn"))
        .stdout(predicate::str::contains("Training complete").not());
}

#[test]
fn test_train_rejects_unknown_resumption_strategy() {
    let temp_dir = TempDir::new().unwrap();
    let config = train_fixture(&temp_dir);
    let contents = std::fs::read_to_string(&config).unwrap() + "resumption:\n  - strategy: grad_clipping\n";
    std::fs::write(&config, contents).unwrap();

    run_train(&config, &[]).failure().stderr(predicate::str::contains("invalid config"));
}
