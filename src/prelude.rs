//! Prelude module for the media cache library
//!
//! Re-exports the items most integrations need, so that
//! `use media_cache::prelude::*;` is enough to run a job.
//!
//! # Usage
//!
//! ```rust,no_run
//! use media_cache::prelude::*;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<()> {
//!     let ctx = JobContext::new(AppConfig::load(None).await?, None);
//!     run_monitor(&ctx, true, Trigger::Manual).await?;
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result};

// Configuration
pub use crate::config::AppConfig;

// Essential app components
pub use crate::app::{
    run_monitor, run_sweep, AdmissionEngine, Budget, CacheDirectory, CacheEntry, Candidate,
    Category, ConcurrencyGuard, JobContext, JobKind, JobOutcome, ManifestStore, Monitor,
    SourceScanner, Status, SweepPlan, Trigger,
};

// Standard library re-exports that are commonly needed
pub use std::path::{Path, PathBuf};

// Common external crate re-exports for convenience
pub use tokio;
