//! Checkpoint evaluation scheduler
//!
//! A small state machine driven one transition at a time:
//!
//! ```text
//!            found                     recorded
//! POLLING ───────────► EVALUATING ──────────────► POLLING
//!    │ nothing eligible
//!    ▼
//! IDLE_WAIT ── waited <= budget ──► POLLING
//!    │ waited > budget
//!    ▼
//! TERMINATED
//! ```
//!
//! An epoch is appended to the ledger only after its evaluation completed,
//! so a crash mid-evaluation leaves it eligible for the next run. Idle time
//! accumulates across consecutive waits and is reset by every successful
//! evaluation.

use checkpoint::{CheckpointScanner, EvaluationLedger, LedgerStore};
use eval_core::config::RetryConfig;
use eval_core::{CheckpointArtifact, EpochId, Error, EvalConfig, MetricMap, Result, SplitId};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::collaborators::{Collaborators, EvalRequest, LoadOptions};
use crate::layout::OutputLayout;

/// Scheduler inputs taken from the frozen configuration
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Minimum epoch eligible for evaluation
    pub start_epoch: f64,

    /// Sleep between polls when nothing is eligible
    pub poll_interval: Duration,

    /// Cumulative idle time after which the run ends
    pub max_wait: Duration,

    /// Retry policy for ledger appends
    pub retry: RetryConfig,

    /// Only the coordinator writes files and reports metrics
    pub is_coordinator: bool,

    /// Load weights to host memory
    pub to_cpu: bool,

    /// Forwarded to the evaluator
    pub save_to_file: bool,
}

impl SchedulerSettings {
    pub fn from_config(config: &EvalConfig) -> Self {
        Self {
            start_epoch: config.scheduler.start_epoch,
            poll_interval: config.scheduler.poll_interval,
            max_wait: config.scheduler.max_wait,
            retry: config.ledger.retry.clone(),
            is_coordinator: config.distributed.is_coordinator(),
            to_cpu: config.distributed.is_distributed(),
            save_to_file: config.output.save_to_file,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&EvalConfig::default())
    }
}

/// One dataset split and the directory its results go to
#[derive(Debug, Clone)]
pub struct EvaluationScope {
    pub split: SplitId,
    pub output_dir: PathBuf,
}

impl EvaluationScope {
    pub fn new(split: impl Into<SplitId>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            split: split.into(),
            output_dir: output_dir.into(),
        }
    }

    /// `epoch_<id>/<split>` below the output directory
    pub fn result_dir(&self, epoch: &EpochId) -> PathBuf {
        OutputLayout::epoch_result_dir(&self.output_dir, Some(epoch), &self.split)
    }

    pub fn ledger_path(&self) -> PathBuf {
        OutputLayout::ledger_path(&self.output_dir, &self.split)
    }
}

/// Scheduler state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerState {
    Polling,
    Evaluating(CheckpointArtifact),
    IdleWait,
    Terminated,
}

/// Summary of a finished run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerReport {
    /// Evaluated epochs in evaluation order
    pub evaluated: Vec<EpochId>,

    /// Number of idle sleeps taken
    pub idle_cycles: u32,

    /// Total time spent idle, never reset
    pub total_waited: Duration,
}

/// Open the ledger of a scope with the access this rank is allowed
pub fn open_scope_ledger(path: &Path, is_coordinator: bool) -> Result<EvaluationLedger> {
    if is_coordinator {
        EvaluationLedger::open_or_create(path)
    } else {
        EvaluationLedger::open_read_only(path)
    }
}

/// Polls a checkpoint directory and evaluates every new checkpoint once
pub struct CheckpointEvaluationScheduler<L: LedgerStore> {
    scanner: CheckpointScanner,
    ledger: L,
    scope: EvaluationScope,
    settings: SchedulerSettings,
    collaborators: Collaborators,
    state: SchedulerState,
    /// Idle time since the last successful evaluation
    total_waited: Duration,
    report: SchedulerReport,
}

impl<L: LedgerStore> CheckpointEvaluationScheduler<L> {
    pub fn new(
        scanner: CheckpointScanner,
        ledger: L,
        scope: EvaluationScope,
        settings: SchedulerSettings,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            scanner,
            ledger,
            scope,
            settings,
            collaborators,
            state: SchedulerState::Polling,
            total_waited: Duration::ZERO,
            report: SchedulerReport::default(),
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn scope(&self) -> &EvaluationScope {
        &self.scope
    }

    /// Idle time accumulated since the last successful evaluation
    pub fn total_waited(&self) -> Duration {
        self.total_waited
    }

    pub fn report(&self) -> &SchedulerReport {
        &self.report
    }

    /// Perform a single transition
    ///
    /// A fatal error leaves the scheduler in [`SchedulerState::Terminated`].
    pub async fn step(&mut self) -> Result<&SchedulerState> {
        let current = std::mem::replace(&mut self.state, SchedulerState::Terminated);

        self.state = match current {
            SchedulerState::Polling => self.poll()?,
            SchedulerState::Evaluating(candidate) => {
                self.evaluate(candidate).await?;
                SchedulerState::Polling
            }
            SchedulerState::IdleWait => self.idle_wait().await,
            SchedulerState::Terminated => SchedulerState::Terminated,
        };

        Ok(&self.state)
    }

    /// Run until the wait budget is exhausted or a fatal error occurs
    ///
    /// Buffered reporting state is flushed on both exits.
    #[instrument(skip(self), fields(split = %self.scope.split))]
    pub async fn run(&mut self) -> Result<SchedulerReport> {
        info!(
            checkpoint_dir = %self.scanner.directory().display(),
            ledger = %self.ledger.path().display(),
            start_epoch = self.settings.start_epoch,
            poll_interval_secs = self.settings.poll_interval.as_secs_f64(),
            max_wait_secs = self.settings.max_wait.as_secs_f64(),
            "Starting checkpoint evaluation loop"
        );

        let outcome = loop {
            match self.step().await {
                Ok(SchedulerState::Terminated) => break Ok(()),
                Ok(_) => {}
                Err(e) => break Err(e),
            }
        };
        self.flush_reporting();
        outcome?;

        info!(
            evaluated = self.report.evaluated.len(),
            idle_cycles = self.report.idle_cycles,
            waited_secs = self.report.total_waited.as_secs_f64(),
            "Checkpoint evaluation loop finished"
        );
        Ok(self.report.clone())
    }

    fn poll(&mut self) -> Result<SchedulerState> {
        match self
            .scanner
            .next_eligible(&self.ledger, self.settings.start_epoch)?
        {
            Some(candidate) => {
                debug!(epoch = %candidate.epoch, "Found unevaluated checkpoint");
                Ok(SchedulerState::Evaluating(candidate))
            }
            None => Ok(SchedulerState::IdleWait),
        }
    }

    #[instrument(skip_all, fields(epoch = %candidate.epoch))]
    async fn evaluate(&mut self, candidate: CheckpointArtifact) -> Result<()> {
        let started = Instant::now();
        info!(checkpoint = %candidate.path.display(), "Evaluating checkpoint");

        let options = LoadOptions {
            to_cpu: self.settings.to_cpu,
            load_head: true,
        };
        let model = self
            .collaborators
            .loader
            .load(&candidate.path, options)
            .await?;

        let result_dir = self.scope.result_dir(&candidate.epoch);
        if self.settings.is_coordinator {
            tokio::fs::create_dir_all(&result_dir).await?;
        }

        let metrics = self
            .collaborators
            .evaluator
            .run(EvalRequest {
                model: &model,
                split: &self.scope.split,
                epoch: Some(&candidate.epoch),
                output_dir: &result_dir,
                save_to_file: self.settings.save_to_file,
            })
            .await?;

        self.record_with_retry(&candidate.epoch).await?;

        if self.settings.is_coordinator {
            self.emit_metrics(&candidate.epoch, &metrics);
        }

        self.total_waited = Duration::ZERO;
        self.report.evaluated.push(candidate.epoch);
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            metrics = metrics.len(),
            "Checkpoint evaluated and recorded"
        );
        Ok(())
    }

    async fn record_with_retry(&mut self, epoch: &EpochId) -> Result<()> {
        let retry = self.settings.retry.clone();
        let mut attempt = 0u32;

        loop {
            let e = match self.ledger.record(epoch) {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if !e.is_retryable() {
                return Err(e);
            }
            if attempt >= retry.max_retries {
                return Err(Error::LedgerAppendExhausted {
                    epoch: epoch.to_string(),
                    attempts: attempt + 1,
                    message: e.to_string(),
                });
            }

            attempt += 1;
            let delay = retry.delay_for(attempt);
            warn!(
                epoch = %epoch,
                attempt,
                max_retries = retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Retrying ledger append"
            );
            self.collaborators.sleeper.sleep(delay).await;
        }
    }

    fn emit_metrics(&self, epoch: &EpochId, metrics: &MetricMap) {
        for (name, value) in metrics {
            if let Err(e) = self.collaborators.sink.emit(name, *value, epoch) {
                warn!(epoch = %epoch, metric = %name, error = %e, "Failed to report metric");
            }
        }
    }

    async fn idle_wait(&mut self) -> SchedulerState {
        let interval = self.settings.poll_interval;

        if self.settings.is_coordinator {
            self.flush_reporting();
            info!(
                "Waiting {}s for next check (progress: {:.1} / {:.1} minutes)",
                interval.as_secs_f64(),
                self.total_waited.as_secs_f64() / 60.0,
                self.settings.max_wait.as_secs_f64() / 60.0
            );
        }

        self.collaborators.sleeper.sleep(interval).await;
        self.total_waited += interval;
        self.report.idle_cycles += 1;
        self.report.total_waited += interval;

        if self.total_waited > self.settings.max_wait {
            info!(
                waited_secs = self.total_waited.as_secs_f64(),
                "Wait budget exhausted, no new checkpoints"
            );
            SchedulerState::Terminated
        } else {
            SchedulerState::Polling
        }
    }

    fn flush_reporting(&self) {
        if !self.settings.is_coordinator {
            return;
        }
        if let Err(e) = self.collaborators.sink.flush() {
            warn!(error = %e, "Failed to flush metrics");
        }
    }
}
