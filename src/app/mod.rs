//! Core application logic for the media cache
//!
//! Leaf-first: the scanner and popularity provider produce candidates, the
//! engine plans each category against its budget, the cache directory
//! manager applies plans to the symlink tree, and the manifest store keeps
//! status, statistics and the entry ledger. The job runner wires these
//! together under the concurrency guard.
//!
//! # Examples
//!
//! ```rust,no_run
//! use media_cache::app::{run_sweep, JobContext, JobKind, Trigger};
//! use media_cache::config::AppConfig;
//!
//! # async fn example() -> media_cache::Result<()> {
//! let config = AppConfig::load(None).await?;
//! let ctx = JobContext::new(config, None);
//!
//! if let Some(summary) = run_sweep(&ctx, JobKind::Sweep, Trigger::Manual).await?.completed() {
//!     println!("{}", summary.line());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod engine;
pub mod jobs;
pub mod lock;
pub mod logging;
pub mod manifest;
pub mod models;
pub mod monitor;
pub mod mount;
pub mod notify;
pub mod popularity;
pub mod preconditions;
pub mod rollback;
pub mod scanner;
pub mod schedule;

// Re-export main public API
pub use cache::{CacheDirectory, CacheStats, DirectoryScanner, LinkInfo};
pub use engine::{compare_candidates, AdmissionEngine, Decision, FsInspector, SweepPlan};
pub use jobs::{run_monitor, run_sweep, JobContext, JobOutcome, SkipCause, SweepSummary, Trigger};
pub use lock::{ConcurrencyGuard, JobLock, RetryPolicy};
pub use manifest::{Manifest, ManifestStore, Stats, Status};
pub use models::{Budget, CacheEntry, Candidate, Category, JobKind};
pub use monitor::{FullReport, Monitor, Recommendation};
pub use mount::{CommandMount, ConsumerMount, MountState};
pub use notify::{Notifier, WebhookNotifier};
pub use popularity::{HttpPopularity, PopularItem, PopularityProvider};
pub use rollback::{RollbackController, RollbackReport};
pub use scanner::{ScanFilter, SourceScanner};
pub use schedule::ScheduleControl;
