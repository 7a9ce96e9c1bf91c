//! Integration tests for the full evaluation pipeline
//!
//! These run the same wiring as the `ckpt-eval` binary: file loader,
//! external evaluator command and JSONL metrics, driven from parsed CLI
//! flags.

#![cfg(unix)]


use anyhow::Result;
use clap::Parser;
use common::drop_checkpoint;
use scheduler::app::{self, Outcome};
use scheduler::cli::{Cli, RunMode};
use serde_json::Value;
use std::path::Path;

const EVAL_SCRIPT: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --epoch) epoch="$2"; shift ;;
    --output-dir) out="$2"; shift ;;
  esac
  shift
done
echo "evaluating epoch ${epoch:-none}" >&2
touch "$out/result.pkl"
echo "{\"accuracy\": 0.${epoch:-0}, \"images\": 500}"
"#;

fn cli(root: &Path, args: &[&str]) -> Cli {
    let root = root.to_str().unwrap().to_string();
    let mut argv = vec![
        "ckpt-eval".to_string(),
        "--output-root".to_string(),
        root,
        "--extra-tag".to_string(),
        "exp".to_string(),
        "--poll-interval-secs".to_string(),
        "0.01".to_string(),
        "--rank".to_string(),
        "0".to_string(),
        "--world-size".to_string(),
        "1".to_string(),
    ];
    argv.extend(args.iter().map(|s| s.to_string()));
    argv.extend(
        ["--", "sh", "-c", EVAL_SCRIPT, "eval"]
            .iter()
            .map(|s| s.to_string()),
    );
    Cli::try_parse_from(argv).unwrap()
}

fn metric_records(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect()
}

#[tokio::test]
async fn test_repeat_mode_pipeline() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ckpt_dir = dir.path().join("exp/ckpt");
    for epoch in ["2", "1"] {
        drop_checkpoint(&ckpt_dir, epoch);
    }

    let cli = cli(dir.path(), &["--eval-all", "--max-waiting-mins", "0"]);
    let mut config = cli.resolve_config()?;
    config.evaluator.settle_window = std::time::Duration::from_millis(10);

    let outcome = app::run(&config, &cli.mode()?, std::future::pending()).await?;
    assert_eq!(outcome, Outcome::Completed);

    let eval_dir = dir.path().join("exp/eval/eval_all_default/default");
    assert_eq!(std::fs::read_to_string(eval_dir.join("eval_list_test.txt"))?, "1\n2\n");
    assert!(eval_dir.join("epoch_1/test/result.pkl").exists());
    assert!(eval_dir.join("epoch_2/test/result.pkl").exists());

    let records = metric_records(&eval_dir.join("metrics_test.jsonl"))?;
    assert_eq!(records.len(), 4);
    assert_eq!(records[0]["epoch"], "1");
    assert_eq!(records[0]["metric"], "accuracy");
    assert_eq!(records[0]["value"], 0.1);
    assert_eq!(records[3]["metric"], "images");
    assert_eq!(records[3]["value"], 500.0);

    // A second invocation finds nothing new
    let outcome = app::run(&config, &cli.mode()?, std::future::pending()).await?;
    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(metric_records(&eval_dir.join("metrics_test.jsonl"))?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_single_mode_pipeline() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let checkpoint = drop_checkpoint(&dir.path().join("exp/ckpt"), "9");

    let cli = cli(
        dir.path(),
        &["--ckpt", checkpoint.to_str().unwrap(), "--eval-tag", "adhoc"],
    );
    let mut config = cli.resolve_config()?;
    config.evaluator.settle_window = std::time::Duration::ZERO;

    let mode = cli.mode()?;
    assert_eq!(mode, RunMode::Single(checkpoint.clone()));
    let outcome = app::run(&config, &mode, std::future::pending()).await?;
    assert_eq!(outcome, Outcome::Completed);

    let eval_dir = dir.path().join("exp/eval/epoch_9/test/adhoc");
    assert!(eval_dir.join("result.pkl").exists());
    assert!(!eval_dir.join("eval_list_test.txt").exists());
    let records = metric_records(&eval_dir.join("metrics_test.jsonl"))?;
    assert_eq!(records[0]["value"], 0.9);
    Ok(())
}

#[tokio::test]
async fn test_unreadable_checkpoint_is_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ckpt_dir = dir.path().join("exp/ckpt");
    std::fs::create_dir_all(&ckpt_dir)?;
    std::fs::write(ckpt_dir.join("checkpoint_epoch_1.pth"), b"")?;

    let cli = cli(dir.path(), &["--eval-all", "--max-waiting-mins", "0"]);
    let mut config = cli.resolve_config()?;
    config.evaluator.settle_window = std::time::Duration::ZERO;

    let err = app::run(&config, &cli.mode()?, std::future::pending())
        .await
        .unwrap_err();
    assert!(matches!(err, eval_core::Error::CheckpointLoad { .. }));

    let ledger = dir
        .path()
        .join("exp/eval/eval_all_default/default/eval_list_test.txt");
    assert_eq!(std::fs::read_to_string(ledger)?, "");
    Ok(())
}
