//! In-memory collaborators for unit tests

use crate::collaborators::{
    CheckpointLoader, Collaborators, EvalRequest, Evaluator, LoadOptions, LoadedModel,
    MetricsSink, Sleeper,
};
use async_trait::async_trait;
use eval_core::{EpochId, Error, MetricMap, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct FakeLoader {
    pub loads: Mutex<Vec<(PathBuf, LoadOptions)>>,
}

#[async_trait]
impl CheckpointLoader for FakeLoader {
    async fn load(&self, path: &Path, options: LoadOptions) -> Result<LoadedModel> {
        let bytes = std::fs::read(path).map_err(|e| Error::CheckpointLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if bytes.starts_with(b"corrupt") {
            return Err(Error::CheckpointLoad {
                path: path.display().to_string(),
                reason: "incompatible state dict".to_string(),
            });
        }
        self.loads.lock().push((path.to_path_buf(), options));
        Ok(LoadedModel {
            checkpoint: path.to_path_buf(),
            size_bytes: bytes.len() as u64,
            options,
        })
    }
}

/// Reports `accuracy = epoch / 100`; fails for epochs listed in `fail_on`
#[derive(Default)]
pub struct FakeEvaluator {
    pub runs: Mutex<Vec<(String, String, PathBuf)>>,
    pub fail_on: Vec<String>,
}

#[async_trait]
impl Evaluator for FakeEvaluator {
    async fn run(&self, request: EvalRequest<'_>) -> Result<MetricMap> {
        let label = request.epoch_label();
        if self.fail_on.contains(&label) {
            return Err(Error::Evaluation {
                epoch: label,
                message: "evaluator crashed".to_string(),
            });
        }
        self.runs.lock().push((
            label,
            request.split.to_string(),
            request.output_dir.to_path_buf(),
        ));

        let value = request.epoch.map(EpochId::value).unwrap_or(0.0);
        Ok(MetricMap::from([
            ("accuracy".to_string(), value / 100.0),
            ("loss".to_string(), 1.0),
        ]))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub emitted: Mutex<Vec<(String, f64, String)>>,
    pub flushes: Mutex<u32>,
    pub failing: bool,
}

impl MetricsSink for RecordingSink {
    fn emit(&self, metric: &str, value: f64, epoch: &EpochId) -> Result<()> {
        if self.failing {
            return Err(Error::MetricsSink {
                message: "dashboard unreachable".to_string(),
            });
        }
        self.emitted
            .lock()
            .push((metric.to_string(), value, epoch.to_string()));
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        *self.flushes.lock() += 1;
        if self.failing {
            return Err(Error::MetricsSink {
                message: "dashboard unreachable".to_string(),
            });
        }
        Ok(())
    }
}

type SleepHook = Box<dyn Fn(usize) + Send + Sync>;

/// Records requested sleeps without waiting; runs `hook` with the index of
/// each sleep so tests can act as the trainer
#[derive(Default)]
pub struct RecordingSleeper {
    pub sleeps: Mutex<Vec<Duration>>,
    hook: Option<SleepHook>,
}

impl RecordingSleeper {
    pub fn with_hook(hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            hook: Some(Box::new(hook)),
        }
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        let index = {
            let mut sleeps = self.sleeps.lock();
            sleeps.push(duration);
            sleeps.len() - 1
        };
        if let Some(hook) = &self.hook {
            hook(index);
        }
    }
}

pub struct Fakes {
    pub loader: Arc<FakeLoader>,
    pub evaluator: Arc<FakeEvaluator>,
    pub sink: Arc<RecordingSink>,
    pub sleeper: Arc<RecordingSleeper>,
}

impl Fakes {
    pub fn new() -> Self {
        Self::with(FakeEvaluator::default(), RecordingSink::default(), RecordingSleeper::default())
    }

    pub fn with(evaluator: FakeEvaluator, sink: RecordingSink, sleeper: RecordingSleeper) -> Self {
        Self {
            loader: Arc::new(FakeLoader::default()),
            evaluator: Arc::new(evaluator),
            sink: Arc::new(sink),
            sleeper: Arc::new(sleeper),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            loader: self.loader.clone(),
            evaluator: self.evaluator.clone(),
            sink: self.sink.clone(),
            sleeper: self.sleeper.clone(),
        }
    }

    pub fn evaluated(&self) -> Vec<String> {
        self.evaluator
            .runs
            .lock()
            .iter()
            .map(|(epoch, _, _)| epoch.clone())
            .collect()
    }
}

pub fn write_checkpoints(dir: &Path, epochs: &[&str]) {
    std::fs::create_dir_all(dir).unwrap();
    for epoch in epochs {
        std::fs::write(dir.join(format!("checkpoint_epoch_{epoch}.pth")), b"weights").unwrap();
    }
}
