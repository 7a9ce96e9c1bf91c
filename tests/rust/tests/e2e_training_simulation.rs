//! End-to-end training simulation test
//!
//! A simulated trainer drops checkpoints into the checkpoint directory while
//! the scheduler idles, driven by a virtual clock:
//! - Checkpoints are picked up in epoch order as they appear
//! - Restarts never re-evaluate recorded epochs
//! - Crashed evaluations are retried by the next run
//! - Only the coordinator rank writes the ledger and reports


use anyhow::Result;
use checkpoint::{CheckpointScanner, EvaluationLedger, LedgerStore};
use common::{drop_checkpoint, init_logging, Harness, VirtualClock};
use eval_core::config::ScannerConfig;
use eval_core::{EpochId, Error};
use scheduler::{
    open_scope_ledger, CheckpointEvaluationScheduler, EvaluationScope, SchedulerReport,
    SchedulerSettings,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

struct Workspace {
    _dir: TempDir,
    ckpt_dir: PathBuf,
    eval_dir: PathBuf,
}

impl Workspace {
    fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        Ok(Self {
            ckpt_dir: dir.path().join("ckpt"),
            eval_dir: dir.path().join("eval"),
            _dir: dir,
        })
    }

    fn scope(&self) -> EvaluationScope {
        EvaluationScope::new("test", &self.eval_dir)
    }

    fn ledger_path(&self) -> PathBuf {
        self.scope().ledger_path()
    }

    async fn run(&self, harness: &Harness, settings: SchedulerSettings) -> eval_core::Result<SchedulerReport> {
        let ledger = open_scope_ledger(&self.ledger_path(), settings.is_coordinator)?;
        let scanner = CheckpointScanner::new(&self.ckpt_dir, &ScannerConfig::default())?;
        let mut scheduler = CheckpointEvaluationScheduler::new(
            scanner,
            ledger,
            self.scope(),
            settings,
            harness.collaborators(),
        );
        scheduler.run().await
    }
}

fn settings(poll_secs: u64, max_wait_secs: u64) -> SchedulerSettings {
    SchedulerSettings {
        poll_interval: Duration::from_secs(poll_secs),
        max_wait: Duration::from_secs(max_wait_secs),
        ..SchedulerSettings::default()
    }
}

fn epochs(report: &SchedulerReport) -> Vec<String> {
    report.evaluated.iter().map(ToString::to_string).collect()
}

fn ledger_epochs(path: &Path) -> Result<Vec<String>> {
    let ledger = EvaluationLedger::open_read_only(path)?;
    Ok(ledger.epochs().map(ToString::to_string).collect())
}

#[tokio::test]
async fn test_follows_a_running_trainer() -> Result<()> {
    init_logging();
    let ws = Workspace::new()?;

    // One checkpoint every 30s for the first two minutes
    let trainer_dir = ws.ckpt_dir.clone();
    let harness = Harness::new(VirtualClock::with(move |now| {
        let secs = now.as_secs();
        if secs % 30 == 0 && secs <= 120 {
            drop_checkpoint(&trainer_dir, &(secs / 30).to_string());
        }
    }));

    let report = ws.run(&harness, settings(30, 60)).await?;

    assert_eq!(epochs(&report), vec!["1", "2", "3", "4"]);
    assert_eq!(harness.evaluations.epochs(), vec!["1", "2", "3", "4"]);
    // 4 waits that found a checkpoint, then 30 + 30 + 30 > 60
    assert_eq!(report.idle_cycles, 7);
    assert_eq!(ledger_epochs(&ws.ledger_path())?, vec!["1", "2", "3", "4"]);
    assert_eq!(harness.reports.values.lock().len(), 4);
    tracing::info!(?report, "Trainer simulation finished");
    Ok(())
}

#[tokio::test]
async fn test_restart_is_idempotent() -> Result<()> {
    let ws = Workspace::new()?;
    for epoch in ["3", "1", "2"] {
        drop_checkpoint(&ws.ckpt_dir, epoch);
    }

    let harness = Harness::new(VirtualClock::new());
    let first = ws.run(&harness, settings(30, 0)).await?;
    assert_eq!(epochs(&first), vec!["1", "2", "3"]);

    let second = ws.run(&harness, settings(30, 0)).await?;
    assert!(second.evaluated.is_empty());

    drop_checkpoint(&ws.ckpt_dir, "4");
    let third = ws.run(&harness, settings(30, 0)).await?;
    assert_eq!(epochs(&third), vec!["4"]);

    assert_eq!(harness.evaluations.epochs(), vec!["1", "2", "3", "4"]);
    Ok(())
}

#[tokio::test]
async fn test_crashed_evaluation_is_retried_by_next_run() -> Result<()> {
    let ws = Workspace::new()?;
    for epoch in ["5", "6", "7", "8"] {
        drop_checkpoint(&ws.ckpt_dir, epoch);
    }

    let harness = Harness::new(VirtualClock::new());
    harness.evaluations.crash_on.lock().push("7".to_string());

    let err = ws.run(&harness, settings(30, 0)).await.unwrap_err();
    assert!(matches!(err, Error::Evaluation { .. }));
    assert_eq!(ledger_epochs(&ws.ledger_path())?, vec!["5", "6"]);

    harness.evaluations.crash_on.lock().clear();
    let report = ws.run(&harness, settings(30, 0)).await?;
    assert_eq!(epochs(&report), vec!["7", "8"]);
    Ok(())
}

#[tokio::test]
async fn test_unflushed_append_leaves_epoch_eligible() -> Result<()> {
    let ws = Workspace::new()?;
    drop_checkpoint(&ws.ckpt_dir, "6");
    drop_checkpoint(&ws.ckpt_dir, "7");

    // Killed halfway through appending "7\n"
    std::fs::create_dir_all(&ws.eval_dir)?;
    std::fs::write(ws.ledger_path(), "6\n7")?;

    let harness = Harness::new(VirtualClock::new());
    let report = ws.run(&harness, settings(30, 0)).await?;

    assert_eq!(epochs(&report), vec!["7"]);
    assert_eq!(std::fs::read_to_string(ws.ledger_path())?, "6\n7#\n7\n");

    let ledger = EvaluationLedger::open_read_only(ws.ledger_path())?;
    assert!(ledger.contains(&EpochId::from(7)));
    assert_eq!(ledger_epochs(&ws.ledger_path())?, vec!["6", "7"]);
    Ok(())
}

#[tokio::test]
async fn test_wait_budget_with_no_checkpoints() -> Result<()> {
    let ws = Workspace::new()?;
    let harness = Harness::new(VirtualClock::new());

    let report = ws.run(&harness, settings(30, 45)).await?;

    assert_eq!(report.idle_cycles, 2);
    assert_eq!(
        *harness.clock.sleeps.lock(),
        vec![Duration::from_secs(30), Duration::from_secs(30)]
    );
    assert!(harness.evaluations.epochs().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_only_coordinator_writes() -> Result<()> {
    let ws = Workspace::new()?;
    drop_checkpoint(&ws.ckpt_dir, "1");
    drop_checkpoint(&ws.ckpt_dir, "2");

    let worker = Harness::new(VirtualClock::new());
    let worker_report = ws
        .run(
            &worker,
            SchedulerSettings {
                is_coordinator: false,
                to_cpu: true,
                ..settings(30, 0)
            },
        )
        .await?;
    assert_eq!(epochs(&worker_report), vec!["1", "2"]);
    assert!(!ws.eval_dir.exists());
    assert!(worker.reports.values.lock().is_empty());

    let coordinator = Harness::new(VirtualClock::new());
    let report = ws
        .run(
            &coordinator,
            SchedulerSettings {
                to_cpu: true,
                ..settings(30, 0)
            },
        )
        .await?;
    assert_eq!(epochs(&report), vec!["1", "2"]);
    assert_eq!(std::fs::read_to_string(ws.ledger_path())?, "1\n2\n");
    assert!(ws.eval_dir.join("epoch_1/test").is_dir());
    assert_eq!(coordinator.reports.values.lock().len(), 2);
    Ok(())
}
