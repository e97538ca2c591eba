//! Typed manifest document
//!
//! One JSON document per cache holding the lifecycle status, the last known
//! statistics, per-job run records, the entry ledger and the rollback
//! progress. Statistics and the ledger are advisory; the link tree on disk is
//! always the ground truth.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::models::{CacheEntry, Category, JobKind};
use crate::constants::SCHEMA_VERSION;

/// Lifecycle status of the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Never populated
    #[default]
    NotInitialized,
    /// Populated and maintained by scheduled jobs
    Active,
    /// Torn down by rollback; only a manual sweep re-activates it
    Inactive,
    /// Operator switched it off; nothing mutates the cache
    Disabled,
}

impl Status {
    /// Whether a scheduled job may touch the filesystem
    pub fn allows_scheduled_mutation(&self) -> bool {
        matches!(self, Status::NotInitialized | Status::Active)
    }

    /// Whether a manually started sweep may touch the filesystem
    pub fn allows_manual_mutation(&self) -> bool {
        !matches!(self, Status::Disabled)
    }

    /// Status once a sweep has completed; a fresh or rolled-back cache
    /// becomes active
    pub fn after_sweep(self) -> Self {
        match self {
            Status::NotInitialized | Status::Inactive => Status::Active,
            other => other,
        }
    }

    /// Parse a status string, accepting legacy spellings
    pub fn from_legacy(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "not_initialized" | "not-initialized" | "uninitialized" | "" => {
                Some(Status::NotInitialized)
            }
            "active" | "enabled" | "running" => Some(Status::Active),
            "inactive" | "removed" | "rolled_back" => Some(Status::Inactive),
            "disabled" | "paused" => Some(Status::Disabled),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::NotInitialized => "not_initialized",
            Status::Active => "active",
            Status::Inactive => "inactive",
            Status::Disabled => "disabled",
        })
    }
}

/// Per-category statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryStats {
    pub links: usize,
    pub broken: usize,
    pub bytes: u64,
}

/// Last known aggregate statistics, refreshed by the monitor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    /// Links resolving to a regular file
    pub valid_links: usize,
    /// Links whose target does not resolve
    pub broken_links: usize,
    /// Sum of resolved target sizes
    pub total_bytes: u64,
    /// Per-category breakdown from the last sweep or full report
    pub categories: BTreeMap<Category, CategoryStats>,
    /// When these numbers were computed
    pub computed_at: Option<DateTime<Utc>>,
}

/// How a job run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Completed, possibly with per-item failures
    Success,
    /// Did nothing because of the cache status
    Skipped,
    /// Aborted
    Failed,
}

/// Record of a job's most recent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// One-line human summary
    #[serde(default)]
    pub summary: String,
}

/// Rollback state machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackPhase {
    StoppingSchedule,
    ClearingEntries,
    DetachingConsumerMount,
    Removed,
}

impl fmt::Display for RollbackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RollbackPhase::StoppingSchedule => "stopping-schedule",
            RollbackPhase::ClearingEntries => "clearing-entries",
            RollbackPhase::DetachingConsumerMount => "detaching-consumer-mount",
            RollbackPhase::Removed => "removed",
        })
    }
}

/// Progress of the last rollback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    /// Last phase reached
    pub phase: RollbackPhase,
    /// When that phase was reached
    pub at: DateTime<Utc>,
    /// Whether the consumer mount was detached
    #[serde(default)]
    pub mount_detached: bool,
}

/// The persisted manifest document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// Schema version
    pub version: u32,
    /// Lifecycle status
    pub status: Status,
    /// Last known statistics
    pub stats: Stats,
    /// Last write
    pub last_update: Option<DateTime<Utc>>,
    /// Most recent run of each job
    pub last_run: BTreeMap<JobKind, JobRun>,
    /// Entry ledger, sorted and unique by link path
    pub entries: Vec<CacheEntry>,
    /// Rollback progress, if one ever started
    pub rollback: Option<RollbackRecord>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            status: Status::NotInitialized,
            stats: Stats::default(),
            last_update: None,
            last_run: BTreeMap::new(),
            entries: Vec::new(),
            rollback: None,
        }
    }
}

impl Manifest {
    /// Ledger rows of one category
    pub fn entries_for(&self, category: Category) -> Vec<CacheEntry> {
        self.entries
            .iter()
            .filter(|e| e.category == category)
            .cloned()
            .collect()
    }

    /// Replace one category's rows, leaving the others untouched
    pub fn replace_category_entries(&mut self, category: Category, entries: Vec<CacheEntry>) {
        self.entries.retain(|e| e.category != category);
        self.entries
            .extend(entries.into_iter().filter(|e| e.category == category));
        self.normalize_entries();
    }

    /// Sort the ledger by link and drop duplicate links
    pub fn normalize_entries(&mut self) {
        self.entries.sort_by(|a, b| a.cache_link.cmp(&b.cache_link));
        self.entries.dedup_by(|a, b| a.cache_link == b.cache_link);
    }

    /// Aggregate ledger bytes of one category
    pub fn category_bytes(&self, category: Category) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.category == category)
            .map(|e| e.size_bytes)
            .sum()
    }

    /// Store a job's run record
    pub fn record_run(&mut self, job: JobKind, run: JobRun) {
        self.last_run.insert(job, run);
    }

    /// Store a rollback phase
    pub fn record_rollback(&mut self, phase: RollbackPhase, at: DateTime<Utc>, mount_detached: bool) {
        self.rollback = Some(RollbackRecord {
            phase,
            at,
            mount_detached,
        });
    }
}
