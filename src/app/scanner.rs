//! Source scanner
//!
//! Walks a library root and yields the media files matching an extension,
//! age and size filter. The walk is lazy and side-effect free: calling
//! [`SourceScanner::files`] again restarts it from the current filesystem
//! state. Symlinks are never followed or yielded, the cache's own
//! directories are pruned, and unreadable subtrees are skipped with a
//! warning instead of failing the scan.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::app::models::{system_time_to_utc, Candidate};
use crate::errors::{ScanError, ScanResult};

/// Filters applied to every scanned file
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    /// Lower-cased extensions without the dot; empty admits everything
    extensions: Vec<String>,
    /// Only files modified within this many days
    pub max_age_days: Option<u32>,
    /// Only files at least this large
    pub min_size_bytes: Option<u64>,
}

impl ScanFilter {
    /// Filter admitting the given extensions (case-insensitive, dot optional)
    pub fn with_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            ..Default::default()
        }
    }

    /// Restrict to files modified within `days`
    pub fn max_age_days(mut self, days: Option<u32>) -> Self {
        self.max_age_days = days;
        self
    }

    /// Restrict to files of at least `bytes`
    pub fn min_size_bytes(mut self, bytes: Option<u64>) -> Self {
        self.min_size_bytes = bytes;
        self
    }

    /// Whether the path has an admitted extension
    pub fn matches_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.extensions.iter().any(|allowed| *allowed == e)
            })
            .unwrap_or(false)
    }

    fn matches_size(&self, size: u64) -> bool {
        self.min_size_bytes.map_or(true, |min| size >= min)
    }

    fn matches_age(&self, modified: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match (self.max_age_days, modified) {
            (None, _) => true,
            // Unknown mtime cannot satisfy an age filter
            (Some(_), None) => false,
            (Some(days), Some(modified)) => now - modified <= Duration::days(i64::from(days)),
        }
    }
}

/// A file that passed every filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Absolute path
    pub path: PathBuf,
    /// Path relative to the scan root
    pub relative_path: PathBuf,
    /// Size in bytes
    pub size_bytes: u64,
    /// Modification time, when the platform reports it
    pub modified: Option<DateTime<Utc>>,
}

impl From<ScannedFile> for Candidate {
    fn from(file: ScannedFile) -> Self {
        let candidate = Candidate::new(file.path, file.relative_path, file.size_bytes);
        match file.modified {
            Some(modified) => candidate.with_modified(modified),
            None => candidate,
        }
    }
}

/// Walks one root directory
#[derive(Debug, Clone)]
pub struct SourceScanner {
    root: PathBuf,
    filter: ScanFilter,
    exclude: Vec<PathBuf>,
    now: DateTime<Utc>,
}

impl SourceScanner {
    /// Create a scanner for `root`
    pub fn new(root: impl Into<PathBuf>, filter: ScanFilter) -> Self {
        Self {
            root: root.into(),
            filter,
            exclude: Vec::new(),
            now: Utc::now(),
        }
    }

    /// Prune these directories (and everything below them) from the walk
    pub fn excluding<I>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.exclude.extend(paths);
        self
    }

    /// Evaluate the age filter against `now` instead of the wall clock
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Root being scanned
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the root, yielding matching files
    ///
    /// # Errors
    ///
    /// Returns `ScanError::RootNotFound` if the root is not a directory.
    /// Errors below the root are logged and skipped.
    pub fn files(&self) -> ScanResult<impl Iterator<Item = ScannedFile> + '_> {
        if !self.root.is_dir() {
            return Err(ScanError::RootNotFound {
                path: self.root.clone(),
            });
        }

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(move |entry| self.should_descend(entry));

        Ok(walker.filter_map(move |entry| match entry {
            Ok(entry) => self.accept(&entry),
            Err(e) => {
                warn!(
                    "Skipping unreadable path under {}: {}",
                    self.root.display(),
                    e
                );
                None
            }
        }))
    }

    /// Collect every match as an admission candidate
    pub fn candidates(&self) -> ScanResult<Vec<Candidate>> {
        Ok(self.files()?.map(Candidate::from).collect())
    }

    fn should_descend(&self, entry: &DirEntry) -> bool {
        if entry.depth() > 0 && is_hidden(entry) {
            return false;
        }
        !self
            .exclude
            .iter()
            .any(|excluded| entry.path().starts_with(excluded))
    }

    fn accept(&self, entry: &DirEntry) -> Option<ScannedFile> {
        // Symlinks report as symlinks here because links are not followed
        if !entry.file_type().is_file() {
            return None;
        }

        let path = entry.path();
        if !self.filter.matches_extension(path) {
            return None;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Skipping unstatable file {}: {}", path.display(), e);
                return None;
            }
        };

        let size = metadata.len();
        let modified = system_time_to_utc(metadata.modified());
        if !self.filter.matches_size(size) || !self.filter.matches_age(modified, self.now) {
            return None;
        }

        let relative_path = path.strip_prefix(&self.root).ok()?.to_path_buf();
        Some(ScannedFile {
            path: path.to_path_buf(),
            relative_path,
            size_bytes: size,
            modified,
        })
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}
