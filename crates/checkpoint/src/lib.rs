//! Checkpoint discovery and evaluation bookkeeping
//!
//! Provides the directory scanner that turns checkpoint files into ordered
//! candidates, and the append-only ledger recording which epochs have been
//! evaluated.

pub mod ledger;
pub mod scanner;

pub use ledger::{EvaluationLedger, LedgerStore};
pub use scanner::{ArtifactName, CheckpointScanner};
