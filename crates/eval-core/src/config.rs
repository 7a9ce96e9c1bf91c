//! Evaluation configuration types
//!
//! The configuration is built once at startup (file, then CLI overrides),
//! validated, and then only handed out by reference.

use crate::{Error, RankContext, Result, SplitId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main evaluation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Polling and budget settings
    pub scheduler: SchedulerConfig,

    /// Checkpoint discovery settings
    pub scanner: ScannerConfig,

    /// Ledger durability settings
    pub ledger: LedgerConfig,

    /// Output directory layout
    pub output: OutputConfig,

    /// Dataset scopes to evaluate
    pub dataset: DatasetConfig,

    /// External evaluator settings
    pub evaluator: EvaluatorConfig,

    /// Rank of this process in a distributed job
    pub distributed: RankContext,
}

impl EvalConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a TOML file
    ///
    /// Validation is left to the caller so that overrides can be applied
    /// first.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfig {
            message: format!("failed to read config file {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(Error::InvalidConfig {
                message: message.to_string(),
            })
        };

        if self.scheduler.poll_interval.is_zero() {
            return invalid("scheduler.poll_interval must be > 0");
        }
        if !self.scheduler.start_epoch.is_finite() || self.scheduler.start_epoch < 0.0 {
            return invalid("scheduler.start_epoch must be a finite number >= 0");
        }
        if self.scanner.name_prefix.is_empty() {
            return invalid("scanner.name_prefix must not be empty");
        }
        if self.scanner.extension.is_empty() {
            return invalid("scanner.extension must not be empty");
        }
        if self.scanner.optimizer_tag.is_empty() {
            return invalid("scanner.optimizer_tag must not be empty");
        }
        if self.dataset.splits.is_empty() {
            return invalid("dataset.splits must name at least one split");
        }
        if self.dataset.splits.iter().any(|s| s.trim().is_empty()) {
            return invalid("dataset.splits must not contain empty names");
        }
        if self.ledger.retry.backoff_multiplier < 1.0 {
            return invalid("ledger.retry.backoff_multiplier must be >= 1");
        }
        if self.distributed.world_size == 0 {
            return invalid("distributed.world_size must be >= 1");
        }
        if self.distributed.rank >= self.distributed.world_size {
            return invalid("distributed.rank must be < distributed.world_size");
        }

        Ok(())
    }

    /// Generate a TOML document with all default values
    pub fn default_toml() -> Result<String> {
        toml::to_string_pretty(&Self::default())
            .map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum epoch identifier eligible for evaluation
    pub start_epoch: f64,

    /// Sleep between polls when nothing is eligible
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,

    /// Cumulative idle time after which the scheduler gives up
    #[serde(with = "duration_secs")]
    pub max_wait: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            start_epoch: 0.0,
            poll_interval: Duration::from_secs(30),
            max_wait: Duration::from_secs(30 * 60),
        }
    }
}

/// Checkpoint scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Directory to scan; defaults to `<output.root>/<output.extra_tag>/ckpt`
    pub checkpoint_dir: Option<PathBuf>,

    /// Name fragment preceding the epoch token
    pub name_prefix: String,

    /// File extension of evaluable checkpoints
    pub extension: String,

    /// Marker identifying optimizer-state companion files
    pub optimizer_tag: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: None,
            name_prefix: "checkpoint_epoch_".to_string(),
            extension: "pth".to_string(),
            optimizer_tag: "optim".to_string(),
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Retry policy for appends that fail mid-run
    pub retry: RetryConfig,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Initial delay before first retry
    #[serde(with = "duration_secs")]
    pub initial_delay: Duration,

    /// Maximum delay between retries
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial_delay.min(self.max_delay);
        }
        let factor = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

/// Output layout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root of the experiment output tree
    pub root: PathBuf,

    /// Experiment tag, the first level below the root
    pub extra_tag: String,

    /// Evaluation tag namespacing one evaluation campaign
    pub eval_tag: Option<String>,

    /// Ask the evaluator to keep per-sample results on disk
    pub save_to_file: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("output"),
            extra_tag: "default".to_string(),
            eval_tag: Some("default".to_string()),
            save_to_file: false,
        }
    }
}

/// Dataset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Splits to evaluate; each gets its own ledger and reporting stream
    pub splits: Vec<SplitId>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            splits: vec!["test".to_string()],
        }
    }
}

/// External evaluator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Program and leading arguments of the evaluation command
    pub command: Vec<String>,

    /// Abort the evaluation command after this long
    #[serde(with = "duration_secs_opt")]
    pub timeout: Option<Duration>,

    /// A checkpoint must keep the same size for this long before loading
    #[serde(with = "duration_secs")]
    pub settle_window: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout: None,
            settle_window: Duration::from_secs(1),
        }
    }
}

/// Durations as (fractional) seconds
mod duration_secs {
    use serde::{self, de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

mod duration_secs_opt {
    use serde::{self, de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(D::Error::custom))
            .transpose()
    }
}
