//! Append-only record of evaluated epochs
//!
//! One line per evaluated epoch, written only after the evaluation has
//! completed and flushed to disk before `record` returns. The whole file is
//! read into memory when the ledger is opened.

use eval_core::{EpochId, Error, Result};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Membership and append operations the scheduler needs from a ledger
pub trait LedgerStore: Send {
    /// Returns true if `epoch` has a durable record
    fn contains(&self, epoch: &EpochId) -> bool;

    /// Durably record `epoch` as evaluated
    fn record(&mut self, epoch: &EpochId) -> Result<()>;

    /// Location of the backing file
    fn path(&self) -> &Path;
}

/// Appended to an unterminated last line before the next record
const TORN_MARKER: &str = "#\n";

/// File-backed evaluation ledger
#[derive(Debug)]
pub struct EvaluationLedger {
    /// Ledger file location
    path: PathBuf,

    /// Epochs read at open time plus those recorded since
    entries: BTreeSet<EpochId>,

    /// Append handle; `None` for read-only ledgers
    file: Option<File>,

    /// The file ends in an unterminated fragment
    torn_tail: bool,
}

impl EvaluationLedger {
    /// Open the ledger for appending, creating an empty file if absent
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ledger_io(&path, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| ledger_io(&path, e))?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| ledger_io(&path, e))?;
        let (entries, torn_tail) = parse_entries(&path, &content);

        info!(
            path = %path.display(),
            entries = entries.len(),
            "Opened evaluation ledger"
        );

        Ok(Self {
            path,
            entries,
            file: Some(file),
            torn_tail,
        })
    }

    /// Open the ledger without write access; a missing file reads as empty
    ///
    /// Recorded epochs are tracked in memory only. Used by non-coordinator
    /// ranks, which must follow the coordinator's progress without writing.
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(ledger_io(&path, e)),
        };
        let (entries, torn_tail) = parse_entries(&path, &content);

        debug!(entries = entries.len(), "Opened evaluation ledger read-only");

        Ok(Self {
            path,
            entries,
            file: None,
            torn_tail,
        })
    }

    /// Returns true if records are written to disk
    pub fn is_writable(&self) -> bool {
        self.file.is_some()
    }

    /// Number of evaluated epochs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been evaluated yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evaluated epochs in ascending order
    pub fn epochs(&self) -> impl Iterator<Item = &EpochId> {
        self.entries.iter()
    }

    fn append_line(&mut self, epoch: &EpochId) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        let mut line = String::with_capacity(epoch.as_str().len() + TORN_MARKER.len() + 1);
        if self.torn_tail {
            // Spoil the fragment so it never parses as an epoch
            line.push_str(TORN_MARKER);
        }
        line.push_str(epoch.as_str());
        line.push('\n');

        // Assume the worst until the bytes are on disk
        self.torn_tail = true;
        file.write_all(line.as_bytes())
            .map_err(|e| ledger_io(&self.path, e))?;
        file.sync_data().map_err(|e| ledger_io(&self.path, e))?;
        self.torn_tail = false;
        Ok(())
    }
}

impl LedgerStore for EvaluationLedger {
    fn contains(&self, epoch: &EpochId) -> bool {
        self.entries.contains(epoch)
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
    fn record(&mut self, epoch: &EpochId) -> Result<()> {
        self.append_line(epoch)?;
        self.entries.insert(epoch.clone());
        debug!(epoch = %epoch, durable = self.is_writable(), "Recorded evaluated epoch");
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EvaluationLedger {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.sync_all() {
                warn!(path = %self.path.display(), error = %e, "Failed to sync ledger on close");
            }
        }
    }
}

/// Parse ledger content, returning the entries and whether the final line
/// is missing its terminator
fn parse_entries(path: &Path, content: &str) -> (BTreeSet<EpochId>, bool) {
    let mut entries = BTreeSet::new();
    let torn_tail = !content.is_empty() && !content.ends_with('\n');

    let complete = if torn_tail {
        match content.rfind('\n') {
            Some(pos) => &content[..=pos],
            None => "",
        }
    } else {
        content
    };

    if torn_tail {
        warn!(
            path = %path.display(),
            fragment = %content[complete.len()..].trim(),
            "Ignoring unterminated trailing ledger line"
        );
    }

    for (lineno, line) in complete.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match EpochId::parse(line) {
            Some(epoch) => {
                entries.insert(epoch);
            }
            None => warn!(
                path = %path.display(),
                line = lineno + 1,
                content = %line,
                "Skipping unparsable ledger line"
            ),
        }
    }

    (entries, torn_tail)
}

fn ledger_io(path: &Path, e: std::io::Error) -> Error {
    Error::LedgerIo {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}
