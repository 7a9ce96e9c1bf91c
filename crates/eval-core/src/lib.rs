//! Eval Core - Foundation for the checkpoint evaluation scheduler
//!
//! Provides core types, error handling, and configuration shared by the
//! checkpoint scanner, the evaluation ledger and the scheduler.

pub mod config;
pub mod error;
pub mod types;

pub use config::EvalConfig;
pub use error::{Error, Result};
pub use types::*;
