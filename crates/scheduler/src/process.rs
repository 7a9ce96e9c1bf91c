//! Evaluator backed by an external command
//!
//! The configured command is invoked once per evaluation with
//!
//! ```text
//! <command...> --checkpoint <path> --split <split> --output-dir <dir>
//!              [--epoch <id>] [--cpu] [--load-head] [--save-to-file]
//! ```
//!
//! and must print a JSON object of metric name to number as the last JSON
//! line on stdout. Stderr is passed through to the operator.

use async_trait::async_trait;
use eval_core::config::EvaluatorConfig;
use eval_core::{Error, MetricMap, Result};
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::collaborators::{EvalRequest, Evaluator};

#[derive(Debug, Clone)]
pub struct ProcessEvaluator {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessEvaluator {
    pub fn from_config(config: &EvaluatorConfig) -> Result<Self> {
        let Some((program, args)) = config.command.split_first() else {
            return Err(Error::InvalidConfig {
                message: "evaluator.command must name a program".to_string(),
            });
        };
        if program.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "evaluator.command program must not be empty".to_string(),
            });
        }

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: config.timeout,
        })
    }

    fn command(&self, request: &EvalRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--checkpoint")
            .arg(&request.model.checkpoint)
            .arg("--split")
            .arg(request.split)
            .arg("--output-dir")
            .arg(request.output_dir);

        if let Some(epoch) = request.epoch {
            cmd.arg("--epoch").arg(epoch.as_str());
        }
        if request.model.options.to_cpu {
            cmd.arg("--cpu");
        }
        if request.model.options.load_head {
            cmd.arg("--load-head");
        }
        if request.save_to_file {
            cmd.arg("--save-to-file");
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Evaluator for ProcessEvaluator {
    #[instrument(skip_all, fields(program = %self.program, split = %request.split))]
    async fn run(&self, request: EvalRequest<'_>) -> Result<MetricMap> {
        let label = request.epoch_label();
        let failed = |message: String| Error::Evaluation {
            epoch: label.clone(),
            message,
        };

        let child = self
            .command(&request)
            .spawn()
            .map_err(|e| failed(format!("failed to start {}: {}", self.program, e)))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| failed(format!("timed out after {:?}", limit)))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| failed(e.to_string()))?;

        if !output.status.success() {
            return Err(failed(format!("evaluator exited with {}", output.status)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let metrics = parse_metrics(&stdout).map_err(failed)?;
        debug!(epoch = %label, metrics = metrics.len(), "Evaluator finished");
        Ok(metrics)
    }
}

/// Extract the metric map from evaluator stdout
///
/// Uses the last line that starts with `{`. Non-numeric values are skipped.
pub fn parse_metrics(stdout: &str) -> std::result::Result<MetricMap, String> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .last()
        .ok_or_else(|| "evaluator printed no metrics object".to_string())?;

    let value: Value =
        serde_json::from_str(line).map_err(|e| format!("invalid metrics JSON: {e}"))?;
    let Value::Object(fields) = value else {
        return Err("metrics JSON is not an object".to_string());
    };

    let mut metrics = MetricMap::new();
    for (name, value) in fields {
        match value.as_f64() {
            Some(v) => {
                metrics.insert(name, v);
            }
            None => warn!(metric = %name, %value, "Skipping non-numeric metric"),
        }
    }
    Ok(metrics)
}
