//! Checkpoint directory scanner
//!
//! Lists checkpoint files written by the training process and orders them
//! by epoch. The directory is re-read on every call; files may appear or
//! disappear while a scan is running.

use eval_core::config::ScannerConfig;
use eval_core::{CheckpointArtifact, EpochId, Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, trace};

use crate::ledger::LedgerStore;

/// How a file name was interpreted by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactName {
    /// An evaluable checkpoint for the given epoch
    Checkpoint(EpochId),

    /// Optimizer-state companion of a checkpoint
    OptimizerState,

    /// Matches the naming pattern but carries no usable epoch
    Malformed,

    /// Not a checkpoint file at all
    Unrelated,
}

/// Scanner over a single checkpoint directory
#[derive(Debug, Clone)]
pub struct CheckpointScanner {
    /// Directory written by the training process
    directory: PathBuf,

    /// `<anything><prefix><token>.<ext>`
    pattern: Regex,

    /// Marker of optimizer-state files inside the epoch token
    optimizer_tag: String,
}

impl CheckpointScanner {
    /// Create a scanner for `directory` using the configured naming scheme
    pub fn new(directory: impl Into<PathBuf>, config: &ScannerConfig) -> Result<Self> {
        let expr = format!(
            r"^.*{}(?P<token>.+)\.{}$",
            regex::escape(&config.name_prefix),
            regex::escape(&config.extension)
        );
        let pattern = Regex::new(&expr).map_err(|e| Error::InvalidConfig {
            message: format!("invalid checkpoint naming pattern: {}", e),
        })?;

        Ok(Self {
            directory: directory.into(),
            pattern,
            optimizer_tag: config.optimizer_tag.clone(),
        })
    }

    /// Directory being scanned
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Interpret a file name
    pub fn classify(&self, file_name: &str) -> ArtifactName {
        let Some(captures) = self.pattern.captures(file_name) else {
            return ArtifactName::Unrelated;
        };
        let token = &captures["token"];

        if token.contains(&self.optimizer_tag) {
            return ArtifactName::OptimizerState;
        }

        match EpochId::parse(token) {
            Some(epoch) => ArtifactName::Checkpoint(epoch),
            None => ArtifactName::Malformed,
        }
    }

    /// List evaluable checkpoints in ascending epoch order
    ///
    /// A missing directory yields no candidates: the trainer may not have
    /// written its first checkpoint yet.
    #[instrument(level = "debug", skip(self), fields(dir = %self.directory.display()))]
    pub fn list_candidates(&self) -> Result<Vec<CheckpointArtifact>> {
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Checkpoint directory does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(Error::Scan {
                    path: self.directory.display().to_string(),
                    message: e.to_string(),
                })
            }
        };

        let mut candidates = Vec::new();
        let mut skipped = 0usize;

        // Entries can vanish between listing and inspection
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            match self.classify(name) {
                ArtifactName::Checkpoint(epoch) => {
                    candidates.push(CheckpointArtifact::new(path.clone(), epoch));
                }
                ArtifactName::OptimizerState | ArtifactName::Malformed => {
                    trace!(file = %name, "Skipping non-evaluable checkpoint file");
                    skipped += 1;
                }
                ArtifactName::Unrelated => {}
            }
        }

        candidates.sort();
        debug!(count = candidates.len(), skipped, "Scanned checkpoint directory");
        Ok(candidates)
    }

    /// First candidate at or above `floor` that the ledger has not seen
    pub fn next_eligible<L>(&self, ledger: &L, floor: f64) -> Result<Option<CheckpointArtifact>>
    where
        L: LedgerStore + ?Sized,
    {
        Ok(self
            .list_candidates()?
            .into_iter()
            .filter(|c| c.epoch.value() >= floor)
            .find(|c| !ledger.contains(&c.epoch)))
    }
}
