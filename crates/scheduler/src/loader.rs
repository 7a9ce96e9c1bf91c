//! File-backed checkpoint loader
//!
//! The trainer may still be writing the newest checkpoint when it is first
//! seen. The loader waits until the file size is stable across one settle
//! window before handing the checkpoint to the evaluator.

use async_trait::async_trait;
use eval_core::{Error, Result};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

use crate::collaborators::{CheckpointLoader, LoadOptions, LoadedModel};

/// Give up on a checkpoint that keeps growing after this many windows
const MAX_SETTLE_ROUNDS: u32 = 10;

#[derive(Debug, Clone)]
pub struct FileCheckpointLoader {
    settle_window: Duration,
}

impl FileCheckpointLoader {
    pub fn new(settle_window: Duration) -> Self {
        Self { settle_window }
    }

    async fn settled_size(&self, path: &Path) -> Result<u64> {
        let mut size = file_size(path).await?;
        if self.settle_window.is_zero() {
            return Ok(size);
        }

        for round in 0..MAX_SETTLE_ROUNDS {
            tokio::time::sleep(self.settle_window).await;
            let current = file_size(path).await?;
            if current == size {
                return Ok(size);
            }
            debug!(round, previous = size, current, "Checkpoint still being written");
            size = current;
        }

        Err(load_error(
            path,
            format!(
                "file size did not settle within {} windows of {:?}",
                MAX_SETTLE_ROUNDS, self.settle_window
            ),
        ))
    }
}

impl Default for FileCheckpointLoader {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl CheckpointLoader for FileCheckpointLoader {
    #[instrument(level = "debug", skip(self, path), fields(path = %path.display()))]
    async fn load(&self, path: &Path, options: LoadOptions) -> Result<LoadedModel> {
        let size_bytes = self.settled_size(path).await?;
        if size_bytes == 0 {
            return Err(load_error(path, "checkpoint file is empty"));
        }

        // Make sure the weights can actually be read
        let mut header = [0u8; 1];
        let mut file = File::open(path).await.map_err(|e| load_error(path, e))?;
        file.read_exact(&mut header)
            .await
            .map_err(|e| load_error(path, e))?;

        debug!(size_bytes, ?options, "Checkpoint ready");
        Ok(LoadedModel {
            checkpoint: path.to_path_buf(),
            size_bytes,
            options,
        })
    }
}

async fn file_size(path: &Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| load_error(path, e))?;
    if !metadata.is_file() {
        return Err(load_error(path, "not a regular file"));
    }
    Ok(metadata.len())
}

fn load_error(path: &Path, reason: impl ToString) -> Error {
    Error::CheckpointLoad {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}
