//! Persisted manifest state
//!
//! # Module Organization
//!
//! - [`types`] - The typed document: status, statistics, run records, ledger
//! - [`store`] - Locked read-modify-write with atomic replace and schema migration

pub mod store;
pub mod types;

pub use store::{migrate, parse_manifest, ManifestStore};
pub use types::{
    CategoryStats, JobRun, Manifest, RollbackPhase, RollbackRecord, RunOutcome, Stats, Status,
};
