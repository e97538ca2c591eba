//! Core data types for the media cache
//!
//! Categories, cache entries, candidates and budgets. These are shared by the
//! scanner, the admission engine, the cache directory manager and the
//! manifest ledger.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Cache category; each has its own subdirectory, budget and retention rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Movies,
    Tv,
    Doc,
    Recent,
    Popular,
    Downloads,
}

impl Category {
    /// Every category, in directory order
    pub const ALL: [Category; 6] = [
        Category::Movies,
        Category::Tv,
        Category::Doc,
        Category::Recent,
        Category::Popular,
        Category::Downloads,
    ];

    /// Directory and config name
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Movies => "movies",
            Category::Tv => "tv",
            Category::Doc => "doc",
            Category::Recent => "recent",
            Category::Popular => "popular",
            Category::Downloads => "downloads",
        }
    }

    /// The job responsible for sweeping this category
    pub fn job(&self) -> JobKind {
        match self {
            Category::Recent | Category::Downloads => JobKind::Recent,
            _ => JobKind::Sweep,
        }
    }

    /// Categories swept by a job
    pub fn for_job(job: JobKind) -> Vec<Category> {
        Self::ALL.into_iter().filter(|c| c.job() == job).collect()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown category '{}', expected one of: {}",
                    s,
                    Self::ALL.map(|c| c.as_str()).join(", ")
                )
            })
    }
}

/// Independently scheduled job types; each one excludes only itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Admission sweep over the library categories
    Sweep,
    /// Recency sweep over recent additions and the incoming area
    Recent,
    /// Statistics refresh
    Monitor,
    /// Full teardown
    Rollback,
}

impl JobKind {
    /// Lock and log name
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Sweep => "sweep",
            JobKind::Recent => "recent",
            JobKind::Monitor => "monitor",
            JobKind::Rollback => "rollback",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One active symlink in the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Real file on the backing library; never owned by the cache
    pub source_path: PathBuf,
    /// Symlink path under the category directory
    pub cache_link: PathBuf,
    /// Category the entry is accounted against
    pub category: Category,
    /// Target size at admission time
    pub size_bytes: u64,
    /// When the entry was admitted
    pub added_at: DateTime<Utc>,
    /// Last sweep that confirmed the entry
    pub last_seen_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry admitted at `now`
    pub fn new(
        source_path: PathBuf,
        cache_link: PathBuf,
        category: Category,
        size_bytes: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source_path,
            cache_link,
            category,
            size_bytes,
            added_at: now,
            last_seen_at: now,
        }
    }

    /// Age of the entry relative to `now`
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.added_at)
    }

    /// Whether the entry has outlived a retention window of `days`
    pub fn is_expired(&self, retention_days: u32, now: DateTime<Utc>) -> bool {
        self.age(now) > Duration::days(i64::from(retention_days))
    }
}

/// A file eligible for admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Absolute path of the real file
    pub source_path: PathBuf,
    /// Path relative to the root it was found under; becomes the link path
    pub relative_path: PathBuf,
    /// Size, or `None` if the file could not be statted
    pub size_bytes: Option<u64>,
    /// Modification time, when known
    pub modified: Option<DateTime<Utc>>,
    /// Popularity rank (0 = most popular), when a ranked source supplied it
    pub rank: Option<u32>,
}

impl Candidate {
    /// Candidate from a scanned file
    pub fn new(source_path: PathBuf, relative_path: PathBuf, size_bytes: u64) -> Self {
        Self {
            source_path,
            relative_path,
            size_bytes: Some(size_bytes),
            modified: None,
            rank: None,
        }
    }

    /// Set the modification time
    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Set the popularity rank
    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = Some(rank);
        self
    }

    /// Link path for this candidate under `category_dir`
    pub fn link_path(&self, category_dir: &Path) -> PathBuf {
        category_dir.join(&self.relative_path)
    }
}

/// Whether `path` is a non-empty relative path made only of normal names
///
/// Link paths below a category directory must pass this, so that no `..`,
/// root or prefix component can move a link out of its directory.
pub fn is_plain_relative(path: &Path) -> bool {
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Per-category size and age limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    /// Maximum aggregate bytes of all entries
    pub max_bytes: u64,
    /// Maximum age of an entry before mandatory eviction
    pub retention_days: u32,
    /// Files above this size are never admitted
    pub max_file_bytes: u64,
}

impl Budget {
    /// Create a budget
    pub fn new(max_bytes: u64, retention_days: u32, max_file_bytes: u64) -> Self {
        Self {
            max_bytes,
            retention_days,
            max_file_bytes,
        }
    }

    /// Usage of `used` bytes as a percentage of the budget
    pub fn usage_percentage(&self, used: u64) -> f64 {
        if self.max_bytes == 0 {
            return 0.0;
        }
        used as f64 / self.max_bytes as f64 * 100.0
    }
}

/// Convert filesystem time to UTC, if the platform reports it
pub fn system_time_to_utc(time: std::io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}
