//! Core type definitions for the checkpoint evaluation scheduler

use crate::Error;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Dataset split identifier (e.g. "val", "test")
pub type SplitId = String;

/// Metric name to scalar value, ordered by name for stable reporting
pub type MetricMap = BTreeMap<String, f64>;

/// Epoch identifier parsed from a checkpoint name or a ledger line
///
/// Identifiers are usually integers, but comparison is done on the
/// floating-point value so that `"10"` and `"10.0"` name the same epoch.
/// The original text is kept for display, directory names and ledger lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EpochId {
    raw: String,
    value: f64,
}

impl EpochId {
    /// Parse an identifier, returning `None` for anything that is not a
    /// finite, non-negative number
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('-') {
            return None;
        }
        let value: f64 = raw.parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        Some(Self {
            raw: raw.to_string(),
            // normalize -0.0 so hashing and ordering agree
            value: if value == 0.0 { 0.0 } else { value },
        })
    }

    /// Take the last run of ASCII digits in `name` as the identifier
    pub fn from_last_number(name: &str) -> Option<Self> {
        let bytes = name.as_bytes();
        let end = bytes.iter().rposition(u8::is_ascii_digit)? + 1;
        let start = bytes[..end]
            .iter()
            .rposition(|b| !b.is_ascii_digit())
            .map(|pos| pos + 1)
            .unwrap_or(0);
        Self::parse(&name[start..end])
    }

    /// Numeric value used for ordering and membership
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Original textual form
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl From<u64> for EpochId {
    fn from(epoch: u64) -> Self {
        Self {
            raw: epoch.to_string(),
            value: epoch as f64,
        }
    }
}

impl FromStr for EpochId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| Error::Serialization(format!("invalid epoch identifier: {s:?}")))
    }
}

impl TryFrom<String> for EpochId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EpochId> for String {
    fn from(epoch: EpochId) -> Self {
        epoch.raw
    }
}

impl PartialEq for EpochId {
    fn eq(&self, other: &Self) -> bool {
        self.value.total_cmp(&other.value) == Ordering::Equal
    }
}

impl Eq for EpochId {}

impl PartialOrd for EpochId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EpochId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.total_cmp(&other.value)
    }
}

impl Hash for EpochId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.to_bits().hash(state);
    }
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A checkpoint file eligible for evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointArtifact {
    /// Location of the artifact
    pub path: PathBuf,

    /// Epoch identifier parsed from the file name
    pub epoch: EpochId,
}

impl CheckpointArtifact {
    /// Create a new artifact
    pub fn new(path: impl Into<PathBuf>, epoch: EpochId) -> Self {
        Self {
            path: path.into(),
            epoch,
        }
    }

    /// Path of the artifact
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PartialOrd for CheckpointArtifact {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ascending by epoch; equal epochs fall back to path order
impl Ord for CheckpointArtifact {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| self.path.cmp(&other.path))
    }
}

/// Position of this process in a (possibly) distributed evaluation job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RankContext {
    /// Rank of this process
    pub rank: u32,

    /// Number of participating processes
    pub world_size: u32,
}

impl RankContext {
    /// Single-process context (rank 0 of 1)
    pub fn single() -> Self {
        Self {
            rank: 0,
            world_size: 1,
        }
    }

    /// Create a new rank context
    pub fn new(rank: u32, world_size: u32) -> Self {
        Self { rank, world_size }
    }

    /// Returns true if this process owns durable writes and reporting
    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }

    /// Returns true if more than one process takes part in evaluation
    pub fn is_distributed(&self) -> bool {
        self.world_size > 1
    }
}

impl Default for RankContext {
    fn default() -> Self {
        Self::single()
    }
}
