//! Metrics sinks
//!
//! - [`JsonlMetricsSink`]: one JSON record per metric value, appended to a
//!   file that dashboards can tail
//! - [`LogMetricsSink`]: reports through the log
//! - [`FanoutSink`]: forwards to several sinks

use chrono::Utc;
use eval_core::{EpochId, Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::collaborators::MetricsSink;

#[derive(Debug, Serialize)]
struct MetricRecord<'a> {
    epoch: &'a EpochId,
    metric: &'a str,
    value: f64,
    timestamp: String,
}

/// Appends metric records to a JSON-lines file
///
/// Records are buffered until [`MetricsSink::flush`] is called.
pub struct JsonlMetricsSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlMetricsSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| sink_error(&path, e))?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonlMetricsSink {
    fn emit(&self, metric: &str, value: f64, epoch: &EpochId) -> Result<()> {
        let record = MetricRecord {
            epoch,
            metric,
            value,
            timestamp: Utc::now().to_rfc3339(),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        self.writer
            .lock()
            .write_all(&line)
            .map_err(|e| sink_error(&self.path, e))
    }

    fn flush(&self) -> Result<()> {
        self.writer
            .lock()
            .flush()
            .map_err(|e| sink_error(&self.path, e))
    }
}

impl Drop for JsonlMetricsSink {
    fn drop(&mut self) {
        if let Err(e) = self.writer.get_mut().flush() {
            warn!(path = %self.path.display(), error = %e, "Failed to flush metrics on drop");
        }
    }
}

/// Reports metrics as log events
#[derive(Debug, Clone, Default)]
pub struct LogMetricsSink {
    split: String,
}

impl LogMetricsSink {
    pub fn new(split: impl Into<String>) -> Self {
        Self {
            split: split.into(),
        }
    }
}

impl MetricsSink for LogMetricsSink {
    fn emit(&self, metric: &str, value: f64, epoch: &EpochId) -> Result<()> {
        info!(split = %self.split, epoch = %epoch, metric, value, "Metric");
        Ok(())
    }
}

/// Forwards every call to all inner sinks
///
/// All sinks are tried; the first error is returned.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn MetricsSink>>) -> Self {
        Self { sinks }
    }

    fn each(&self, f: impl Fn(&dyn MetricsSink) -> Result<()>) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = f(sink.as_ref()) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl MetricsSink for FanoutSink {
    fn emit(&self, metric: &str, value: f64, epoch: &EpochId) -> Result<()> {
        self.each(|sink| sink.emit(metric, value, epoch))
    }

    fn flush(&self) -> Result<()> {
        self.each(|sink| sink.flush())
    }
}

fn sink_error(path: &Path, e: std::io::Error) -> Error {
    Error::MetricsSink {
        message: format!("{}: {}", path.display(), e),
    }
}
