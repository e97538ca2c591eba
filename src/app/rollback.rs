//! Rollback controller
//!
//! Unwinds the cache in a fixed order:
//!
//! 1. `stopping-schedule`: status goes to `disabled` so scheduled jobs stop
//!    mutating, then the cron fragment is removed.
//! 2. `clearing-entries`: every category's links are removed and the ledger
//!    is emptied.
//! 3. `detaching-consumer-mount` (optional): the consumer stops seeing the
//!    cache root.
//! 4. `removed`: empty category directories are pruned and the status ends
//!    at `inactive`.
//!
//! Each phase is recorded in the manifest before it runs, and every step is
//! safe to repeat, so an interrupted rollback is finished by running it
//! again.

use chrono::Utc;
use tracing::{info, warn};

use crate::app::cache::CacheDirectory;
use crate::app::manifest::{ManifestStore, RollbackPhase, Status};
use crate::app::models::Category;
use crate::app::mount::ConsumerMount;
use crate::app::schedule::ScheduleControl;
use crate::errors::Result;

/// What a rollback did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// The cron fragment existed and was removed
    pub schedule_removed: bool,
    /// Links removed across all categories
    pub links_removed: usize,
    /// Empty directories pruned
    pub dirs_removed: usize,
    /// The consumer mount was detached
    pub mount_detached: bool,
}

impl RollbackReport {
    /// One-line summary for logs and notifications
    pub fn summary(&self) -> String {
        format!(
            "media cache rolled back: {} links removed, schedule {}, consumer mount {}",
            self.links_removed,
            if self.schedule_removed {
                "removed"
            } else {
                "not installed"
            },
            if self.mount_detached {
                "detached"
            } else {
                "left as is"
            }
        )
    }
}

/// Drives the rollback phases
pub struct RollbackController<'a> {
    store: &'a ManifestStore,
    cache: &'a CacheDirectory,
    schedule: &'a ScheduleControl,
    mount: &'a dyn ConsumerMount,
}

impl<'a> RollbackController<'a> {
    pub fn new(
        store: &'a ManifestStore,
        cache: &'a CacheDirectory,
        schedule: &'a ScheduleControl,
        mount: &'a dyn ConsumerMount,
    ) -> Self {
        Self {
            store,
            cache,
            schedule,
            mount,
        }
    }

    /// Run every phase; `detach_mount` must carry the operator's confirmation
    ///
    /// # Errors
    ///
    /// Manifest and schedule failures stop the rollback at the phase that
    /// failed. A failed detach is logged and the rollback continues.
    pub async fn run(&self, detach_mount: bool) -> Result<RollbackReport> {
        let mut report = RollbackReport::default();

        self.enter(RollbackPhase::StoppingSchedule, false).await?;
        self.store
            .update(|m| {
                if m.status != Status::Inactive {
                    m.status = Status::Disabled;
                }
            })
            .await?;
        report.schedule_removed = self.schedule.remove().await?;

        self.enter(RollbackPhase::ClearingEntries, false).await?;
        for category in Category::ALL {
            report.links_removed += self.cache.clear_category(category).await?;
        }
        self.cache.cleanup_temp_links().await;
        self.store.update(|m| m.entries.clear()).await?;

        if detach_mount {
            self.enter(RollbackPhase::DetachingConsumerMount, false)
                .await?;
            match self.mount.detach().await {
                Ok(()) => report.mount_detached = true,
                Err(e) => warn!("Consumer mount not detached: {}", e),
            }
        } else {
            info!("Leaving consumer mount in place");
        }

        report.dirs_removed = self
            .cache
            .remove_empty_dirs(self.cache.root(), true)
            .await?;

        let mount_detached = report.mount_detached;
        self.store
            .update(move |m| {
                m.status = Status::Inactive;
                m.record_rollback(RollbackPhase::Removed, Utc::now(), mount_detached);
            })
            .await?;
        info!("Rollback phase: {}", RollbackPhase::Removed);

        Ok(report)
    }

    async fn enter(&self, phase: RollbackPhase, mount_detached: bool) -> Result<()> {
        info!("Rollback phase: {}", phase);
        self.store
            .update(move |m| m.record_rollback(phase, Utc::now(), mount_detached))
            .await?;
        Ok(())
    }
}
