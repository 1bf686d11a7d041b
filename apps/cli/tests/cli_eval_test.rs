//! Integration tests for `lumen eval`.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Writes two small datasets and an eval config that uses both.
fn eval_fixture(temp_dir: &TempDir) -> PathBuf {
    let dir = temp_dir.path();
    let lm = write(
        dir,
        "lm.jsonl",
        "{\"context\": \"The sky is\", \"continuation\": \" blue\"}\n\
         {\"context\": \"Grass is\", \"continuation\": \" green\"}\n\
         {\"context\": \"Snow is\", \"continuation\": \" white\"}\n",
    );
    let mc = write(
        dir,
        "mc.jsonl",
        "{\"query\": \"2 + 2 =\", \"choices\": [\" 4\", \" 5\"], \"gold\": 0}\n\
         {\"query\": \"3 + 3 =\", \"choices\": [\" 7\", \" 6\"], \"gold\": 1}\n\
         {\"query\": \"1 + 1 =\", \"choices\": [\" 2\", \" 3\"], \"gold\": 0}\n",
    );

    let config = format!(
        r#"
model:
  name: bigram
tokenizer:
  type: byte
  args:
    max_seq_len: 128
icl_tasks:
  - label: colors
    dataset_uri: '{}'
    type: language_modeling
    num_fewshot: [0, 1]
    batch_size: 2
    metrics: [InContextLearningLMAccuracy]
    formatting_options:
      prompt_string: ""
      example_delimiter: "\n"
      continuation_delimiter: ""
  - label: arithmetic
    dataset_uri: '{}'
    type: multiple_choice
    num_fewshot: 0
    batch_size: 2
    metrics: [InContextLearningMultipleChoiceAccuracy]
    formatting_options:
      prompt_string: "Answer the question."
      example_delimiter: "\n"
      continuation_delimiter: ""
"#,
        lm.display(),
        mc.display()
    );
    write(dir, "eval.yaml", &config)
}

#[test]
fn test_eval_prints_every_metric_key() {
    let temp_dir = TempDir::new().unwrap();
    let config = eval_fixture(&temp_dir);

    let mut cmd = Command::cargo_bin("lumen").unwrap();
    cmd.env("NO_COLOR", "1")
        .arg("eval")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Ran eval in:"))
        .stdout(predicate::str::contains("metrics/colors/0-shot/InContextLearningLMAccuracy"))
        .stdout(predicate::str::contains("metrics/colors/1-shot/InContextLearningLMAccuracy"))
        .stdout(predicate::str::contains("metrics/arithmetic/0-shot/InContextLearningMultipleChoiceAccuracy"));
}

#[test]
fn test_eval_applies_overrides() {
    let temp_dir = TempDir::new().unwrap();
    let config = eval_fixture(&temp_dir);

    let mut cmd = Command::cargo_bin("lumen").unwrap();
    cmd.env("NO_COLOR", "1")
        .arg("eval")
        .arg(&config)
        .arg("icl_tasks.1.num_fewshot=1")
        .assert()
        .success()
        .stdout(predicate::str::contains("metrics/arithmetic/1-shot/"))
        .stdout(predicate::str::contains("metrics/arithmetic/0-shot/").not());
}

#[test]
fn test_eval_rejects_task_missing_label() {
    let temp_dir = TempDir::new().unwrap();
    let config = eval_fixture(&temp_dir);
    let contents = std::fs::read_to_string(&config).unwrap().replace("  - label: arithmetic\n    dataset_uri", "  - dataset_uri");
    std::fs::write(&config, contents).unwrap();

    let mut cmd = Command::cargo_bin("lumen").unwrap();
    cmd.arg("eval")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("icl_tasks[1] is missing required key `label`"))
        .stdout(predicate::str::contains("Ran eval in").not());
}

#[test]
fn test_eval_missing_config_file() {
    let temp_dir = TempDir::new().unwrap();

    let mut cmd = Command::cargo_bin("lumen").unwrap();
    cmd.arg("eval")
        .arg(temp_dir.path().join("nope.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load eval config"));
}

#[test]
fn test_unknown_log_level_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = eval_fixture(&temp_dir);

    let mut cmd = Command::cargo_bin("lumen").unwrap();
    cmd.arg("--log-level")
        .arg("loud")
        .arg("eval")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value 'loud'"));
}

#[test]
fn test_eval_rejects_row_with_empty_prompt() {
    let temp_dir = TempDir::new().unwrap();
    let config = eval_fixture(&temp_dir);
    std::fs::write(
        temp_dir.path().join("lm.jsonl"),
        "{\"context\": \"Sky\", \"continuation\": \" blue\"}\n{\"context\": \"\", \"continuation\": \"z\"}\n",
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("lumen").unwrap();
    cmd.arg("eval")
        .arg(&config)
        .arg("icl_tasks.0.num_fewshot=0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("row 2: prompt context is empty"));
}
