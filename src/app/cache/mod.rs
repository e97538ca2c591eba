//! Cache directory management
//!
//! The cache is a tree of symlinks, one directory per category, each link
//! pointing at a real file on the backing library. This module creates,
//! re-points and removes those links atomically and inventories them for
//! statistics and health checks.
//!
//! # Module Organization
//!
//! - [`manager`] - Link operations, plan application and ledger reconciliation
//! - [`stats`] - Link inventory and usage statistics

pub mod manager;
pub mod stats;

pub use manager::{ApplyReport, CacheDirectory, LinkOutcome};
pub use stats::{format_bytes, CacheStats, CategoryUsage, DirectoryScanner, LinkInfo};
