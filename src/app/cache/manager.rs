//! Cache directory manager with atomic link operations
//!
//! Owns the symlink tree under the cache root. Every operation is safe to
//! retry: admitting an existing correct link is a no-op, evicting a missing
//! link succeeds, and re-pointing goes through a temporary link plus
//! `rename(2)` so a concurrent reader sees either the old or the new target,
//! never a missing link. Source files are never written or removed.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::app::engine::SweepPlan;
use crate::app::models::{is_plain_relative, CacheEntry, Category};
use crate::constants::files;
use crate::errors::{CacheError, CacheResult};

use super::stats::{is_temp_link, DirectoryScanner, LinkInfo};

/// What `admit` had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Link created
    Created,
    /// Existing link re-pointed at a new target
    Replaced,
    /// Link already pointed at the target
    Unchanged,
}

/// Filesystem changes made while applying a plan
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Links created
    pub created: usize,
    /// Links re-pointed
    pub replaced: usize,
    /// Links removed
    pub removed: usize,
    /// Links that could not be created, re-pointed or removed
    pub failed: Vec<(PathBuf, String)>,
}

impl ApplyReport {
    /// Whether a link operation failed for this path
    pub fn failed_for(&self, link: &Path) -> bool {
        self.failed.iter().any(|(path, _)| path == link)
    }

    /// Total successful mutations
    pub fn mutations(&self) -> usize {
        self.created + self.replaced + self.removed
    }
}

/// Manages the symlink tree under the cache root
#[derive(Debug, Clone)]
pub struct CacheDirectory {
    root: PathBuf,
}

impl CacheDirectory {
    /// Open the cache root, creating it if necessary
    ///
    /// # Errors
    ///
    /// Returns `CacheError::DirectoryNotAccessible` if the root cannot be
    /// created
    pub async fn open(root: impl Into<PathBuf>) -> CacheResult<Self> {
        let root = root.into();
        Self::ensure_directory_exists(&root).await?;
        debug!("Opened cache directory: {}", root.display());
        Ok(Self { root })
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one category's links
    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.root.join(category.as_str())
    }

    /// Ensure a directory exists, creating it if necessary
    async fn ensure_directory_exists(path: &Path) -> CacheResult<()> {
        if !path.exists() {
            fs::create_dir_all(path).await.map_err(|e| {
                error!("Failed to create cache directory {}: {}", path.display(), e);
                CacheError::DirectoryNotAccessible {
                    path: path.to_path_buf(),
                }
            })?;
            debug!("Created cache directory: {}", path.display());
        }
        Ok(())
    }

    /// Create the symlink for `entry`
    ///
    /// No-op if the link already points at the source; an existing link to a
    /// different target is replaced atomically.
    ///
    /// # Errors
    ///
    /// Refuses links outside the entry's category directory, targets inside
    /// the cache root, and paths occupied by something other than a symlink.
    pub async fn admit(&self, entry: &CacheEntry) -> CacheResult<LinkOutcome> {
        let category_dir = self.category_dir(entry.category);
        let below = entry
            .cache_link
            .strip_prefix(&category_dir)
            .map_or(false, is_plain_relative);
        if !below {
            return Err(CacheError::OutsideCategory {
                link: entry.cache_link.clone(),
                category: entry.category,
            });
        }
        if entry
            .source_path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
        {
            return Err(CacheError::UnnormalizedTarget {
                target: entry.source_path.clone(),
            });
        }
        if entry.source_path.starts_with(&self.root) {
            return Err(CacheError::SelfReference {
                target: entry.source_path.clone(),
            });
        }

        let link = &entry.cache_link;
        match fs::symlink_metadata(link).await {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                let current = fs::read_link(link).await?;
                if current == entry.source_path {
                    debug!("Link already current: {}", link.display());
                    return Ok(LinkOutcome::Unchanged);
                }
                self.replace_link(link, &entry.source_path).await?;
                info!(
                    "Re-pointed {} from {} to {}",
                    link.display(),
                    current.display(),
                    entry.source_path.display()
                );
                Ok(LinkOutcome::Replaced)
            }
            Ok(_) => Err(CacheError::NotASymlink { path: link.clone() }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = link.parent() {
                    Self::ensure_directory_exists(parent).await?;
                }
                fs::symlink(&entry.source_path, link)
                    .await
                    .map_err(|source| CacheError::LinkFailed {
                        link: link.clone(),
                        target: entry.source_path.clone(),
                        source,
                    })?;
                debug!(
                    "Linked {} -> {}",
                    link.display(),
                    entry.source_path.display()
                );
                Ok(LinkOutcome::Created)
            }
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    /// Swap a link's target via a temporary link and rename
    async fn replace_link(&self, link: &Path, target: &Path) -> CacheResult<()> {
        let temp = temp_link_path(link);
        // A leftover from an interrupted run would make symlink() fail
        let _ = fs::remove_file(&temp).await;

        fs::symlink(target, &temp)
            .await
            .map_err(|source| CacheError::LinkFailed {
                link: temp.clone(),
                target: target.to_path_buf(),
                source,
            })?;

        if let Err(source) = fs::rename(&temp, link).await {
            let _ = fs::remove_file(&temp).await;
            return Err(CacheError::LinkFailed {
                link: link.to_path_buf(),
                target: target.to_path_buf(),
                source,
            });
        }
        Ok(())
    }

    /// Remove the symlink for `entry`; the source is never touched
    ///
    /// Returns `false` if the link was already gone.
    pub async fn evict(&self, entry: &CacheEntry) -> CacheResult<bool> {
        self.remove_link(&entry.cache_link).await
    }

    /// Remove one symlink under the cache root
    pub async fn remove_link(&self, link: &Path) -> CacheResult<bool> {
        match fs::symlink_metadata(link).await {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                fs::remove_file(link)
                    .await
                    .map_err(|source| CacheError::UnlinkFailed {
                        link: link.to_path_buf(),
                        source,
                    })?;
                debug!("Removed link {}", link.display());
                Ok(true)
            }
            Ok(_) => Err(CacheError::NotASymlink {
                path: link.to_path_buf(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::UnlinkFailed {
                link: link.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Apply a sweep plan: evictions first, then re-points and admissions
    ///
    /// Individual failures are logged and collected; they never abort the
    /// rest of the plan.
    pub async fn apply(&self, plan: &SweepPlan) -> ApplyReport {
        let mut report = ApplyReport::default();

        for (entry, reason) in plan.evictions() {
            match self.evict(entry).await {
                Ok(removed) => {
                    if removed {
                        report.removed += 1;
                    }
                    debug!("Evicted {} ({})", entry.cache_link.display(), reason);
                }
                Err(e) => {
                    warn!("Failed to evict {}: {}", entry.cache_link.display(), e);
                    report.failed.push((entry.cache_link.clone(), e.to_string()));
                }
            }
        }

        let targets = plan
            .repoints()
            .map(|(_, entry)| entry)
            .chain(plan.admissions());
        for entry in targets {
            match self.admit(entry).await {
                Ok(LinkOutcome::Created) => report.created += 1,
                Ok(LinkOutcome::Replaced) => report.replaced += 1,
                Ok(LinkOutcome::Unchanged) => {}
                Err(e) => {
                    warn!("Failed to link {}: {}", entry.cache_link.display(), e);
                    report.failed.push((entry.cache_link.clone(), e.to_string()));
                }
            }
        }

        info!(
            "Applied {} plan: {} created, {} re-pointed, {} removed, {} failed",
            plan.category,
            report.created,
            report.replaced,
            report.removed,
            report.failed.len()
        );
        report
    }

    /// Remove every symlink under the cache root whose target does not resolve
    ///
    /// Independent of any bookkeeping; returns the removed link paths.
    pub async fn sweep_broken(&self) -> CacheResult<Vec<PathBuf>> {
        let links = DirectoryScanner::scan_links(&self.root).await;
        let mut removed = Vec::new();

        for link in links.into_iter().filter(LinkInfo::is_broken) {
            match self.remove_link(&link.link).await {
                Ok(true) => {
                    debug!(
                        "Removed broken link {} -> {}",
                        link.link.display(),
                        link.target.display()
                    );
                    removed.push(link.link);
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to remove broken link {}: {}", link.link.display(), e),
            }
        }

        if !removed.is_empty() {
            info!("Removed {} broken links", removed.len());
        }
        Ok(removed)
    }

    /// Remove leftover temporary links from interrupted re-points
    ///
    /// Walks the whole cache root; only safe while no sweep job runs.
    pub async fn cleanup_temp_links(&self) -> usize {
        self.cleanup_temp_links_under(vec![self.root.clone()]).await
    }

    /// Remove leftover temporary links in `categories` only
    ///
    /// A job holds the locks for its own categories, so it may clean those
    /// and must leave the temporary links of a concurrent job alone.
    pub async fn cleanup_temp_links_in(&self, categories: &[Category]) -> usize {
        let dirs = categories.iter().map(|c| self.category_dir(*c)).collect();
        self.cleanup_temp_links_under(dirs).await
    }

    async fn cleanup_temp_links_under(&self, dirs: Vec<PathBuf>) -> usize {
        let stale: Vec<PathBuf> = tokio::task::spawn_blocking(move || {
            dirs.iter()
                .flat_map(|dir| {
                    WalkDir::new(dir)
                        .follow_links(false)
                        .into_iter()
                        .filter_map(|e| e.ok())
                        .filter(|e| e.path_is_symlink() && is_temp_link(e.path()))
                        .map(|e| e.into_path())
                        .collect::<Vec<_>>()
                })
                .collect()
        })
        .await
        .unwrap_or_default();

        let mut cleaned = 0;
        for path in stale {
            if fs::remove_file(&path).await.is_ok() {
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            info!("Cleaned up {} stale temporary links", cleaned);
        }
        cleaned
    }

    /// Every link in one category
    pub async fn list_links(&self, category: Category) -> Vec<LinkInfo> {
        DirectoryScanner::scan_links(&self.category_dir(category))
            .await
            .into_iter()
            .map(|mut info| {
                info.category = Some(category);
                info
            })
            .collect()
    }

    /// Every link in the cache
    pub async fn list_all_links(&self) -> Vec<LinkInfo> {
        DirectoryScanner::scan_links(&self.root).await
    }

    /// Remove every link in a category and prune its empty subdirectories
    ///
    /// Returns the number of links removed. Anything that is not a symlink is
    /// left in place with a warning.
    pub async fn clear_category(&self, category: Category) -> CacheResult<usize> {
        let mut removed = 0;
        for link in self.list_links(category).await {
            match self.remove_link(&link.link).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to remove {}: {}", link.link.display(), e),
            }
        }
        self.cleanup_temp_links_in(&[category]).await;
        self.remove_empty_dirs(&self.category_dir(category), true)
            .await?;

        info!("Cleared {} links from {}", removed, category);
        Ok(removed)
    }

    /// Remove empty directories below `dir`, deepest first
    ///
    /// With `keep_root`, `dir` itself is left even when empty.
    pub async fn remove_empty_dirs(&self, dir: &Path, keep_root: bool) -> CacheResult<usize> {
        if !dir.starts_with(&self.root) || !dir.is_dir() {
            return Ok(0);
        }

        let walk_root = dir.to_path_buf();
        let dirs: Vec<PathBuf> = tokio::task::spawn_blocking(move || {
            WalkDir::new(&walk_root)
                .follow_links(false)
                .contents_first(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_dir())
                .map(|e| e.into_path())
                .collect()
        })
        .await
        .unwrap_or_default();

        let mut removed = 0;
        for path in dirs {
            if keep_root && path == dir {
                continue;
            }
            // remove_dir only succeeds on empty directories
            if fs::remove_dir(&path).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Reconcile a category's ledger rows with the links actually on disk
    ///
    /// Rows without a link are dropped, links without a row are adopted with
    /// `added_at` taken from the link's mtime, and rows whose link now points
    /// elsewhere take the on-disk target and its size. Otherwise a row keeps
    /// the size recorded at admission. Broken links are kept so the engine
    /// can evict them with a reason.
    pub async fn reconcile(
        &self,
        category: Category,
        ledger: Vec<CacheEntry>,
        now: DateTime<Utc>,
    ) -> Vec<CacheEntry> {
        let mut by_link: HashMap<PathBuf, CacheEntry> = ledger
            .into_iter()
            .filter(|e| e.category == category)
            .map(|e| (e.cache_link.clone(), e))
            .collect();

        let mut entries = Vec::new();
        let mut adopted = 0;
        for link in self.list_links(category).await {
            let size = link.target_size.unwrap_or(0);
            let entry = match by_link.remove(&link.link) {
                Some(mut row) => {
                    if row.source_path != link.target {
                        debug!(
                            "Ledger row for {} points at {}, link points at {}",
                            link.link.display(),
                            row.source_path.display(),
                            link.target.display()
                        );
                        row.source_path = link.target.clone();
                        row.size_bytes = size;
                    }
                    row
                }
                None => {
                    adopted += 1;
                    let added_at = link.linked_at.unwrap_or(now);
                    let mut entry = CacheEntry::new(
                        link.target.clone(),
                        link.link.clone(),
                        category,
                        size,
                        added_at,
                    );
                    entry.last_seen_at = now;
                    entry
                }
            };
            entries.push(entry);
        }

        if !by_link.is_empty() {
            debug!(
                "Dropped {} ledger rows with no link in {}",
                by_link.len(),
                category
            );
        }
        if adopted > 0 {
            info!("Adopted {} untracked links in {}", adopted, category);
        }

        entries.sort_by(|a, b| a.cache_link.cmp(&b.cache_link));
        entries
    }
}

/// Temporary sibling path used while re-pointing `link`
fn temp_link_path(link: &Path) -> PathBuf {
    let name = link
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    link.with_file_name(format!(
        "{}{}-{}",
        files::TEMP_LINK_PREFIX,
        std::process::id(),
        name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::engine::{AdmissionEngine, FsInspector};
    use crate::app::models::{Budget, Candidate, JobKind};
    use chrono::Duration;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    struct Fixture {
        _library_dir: TempDir,
        _cache_dir: TempDir,
        library: PathBuf,
        cache: CacheDirectory,
    }

    async fn fixture() -> Fixture {
        let library_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let library = library_dir.path().to_path_buf();
        let cache = CacheDirectory::open(cache_dir.path().join("cache"))
            .await
            .unwrap();
        Fixture {
            _library_dir: library_dir,
            _cache_dir: cache_dir,
            library,
            cache,
        }
    }

    fn source(library: &Path, name: &str, len: usize) -> PathBuf {
        let path = library.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![1u8; len]).unwrap();
        path
    }

    fn entry(cache: &CacheDirectory, source: &Path, relative: &str) -> CacheEntry {
        CacheEntry::new(
            source.to_path_buf(),
            cache.category_dir(Category::Tv).join(relative),
            Category::Tv,
            std::fs::metadata(source).map(|m| m.len()).unwrap_or(0),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_admit_is_idempotent() {
        let f = fixture().await;
        let src = source(&f.library, "Show/e1.mkv", 10);
        let entry = entry(&f.cache, &src, "Show/e1.mkv");

        assert_eq!(f.cache.admit(&entry).await.unwrap(), LinkOutcome::Created);
        assert_eq!(f.cache.admit(&entry).await.unwrap(), LinkOutcome::Unchanged);
        assert_eq!(std::fs::read_link(&entry.cache_link).unwrap(), src);
    }

    #[tokio::test]
    async fn test_admit_replaces_link_pointing_elsewhere() {
        let f = fixture().await;
        let old = source(&f.library, "old/e1.mkv", 10);
        let new = source(&f.library, "new/e1.mkv", 20);

        f.cache.admit(&entry(&f.cache, &old, "e1.mkv")).await.unwrap();
        let outcome = f.cache.admit(&entry(&f.cache, &new, "e1.mkv")).await.unwrap();

        assert_eq!(outcome, LinkOutcome::Replaced);
        let link = f.cache.category_dir(Category::Tv).join("e1.mkv");
        assert_eq!(std::fs::read_link(&link).unwrap(), new);
        // No temporary link left behind
        let names: Vec<_> = std::fs::read_dir(f.cache.category_dir(Category::Tv))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn test_admit_refuses_unsafe_paths() {
        let f = fixture().await;
        let src = source(&f.library, "e1.mkv", 10);

        let mut outside = entry(&f.cache, &src, "e1.mkv");
        outside.cache_link = f.cache.category_dir(Category::Movies).join("e1.mkv");
        assert!(matches!(
            f.cache.admit(&outside).await,
            Err(CacheError::OutsideCategory { .. })
        ));

        let inner = f.cache.root().join("tv/other.mkv");
        let self_ref = CacheEntry::new(
            inner,
            f.cache.category_dir(Category::Tv).join("x.mkv"),
            Category::Tv,
            1,
            Utc::now(),
        );
        assert!(matches!(
            f.cache.admit(&self_ref).await,
            Err(CacheError::SelfReference { .. })
        ));

        let climbing = entry(&f.cache, &src, "../escaped.mkv");
        assert!(matches!(
            f.cache.admit(&climbing).await,
            Err(CacheError::OutsideCategory { .. })
        ));
        assert!(!f.cache.root().join("escaped.mkv").exists());

        let sneaky_source = CacheEntry::new(
            f.library.join("x/../../elsewhere.mkv"),
            f.cache.category_dir(Category::Tv).join("y.mkv"),
            Category::Tv,
            1,
            Utc::now(),
        );
        assert!(matches!(
            f.cache.admit(&sneaky_source).await,
            Err(CacheError::UnnormalizedTarget { .. })
        ));

        let occupied = entry(&f.cache, &src, "real.mkv");
        std::fs::create_dir_all(f.cache.category_dir(Category::Tv)).unwrap();
        std::fs::write(&occupied.cache_link, b"real file").unwrap();
        assert!(matches!(
            f.cache.admit(&occupied).await,
            Err(CacheError::NotASymlink { .. })
        ));
    }

    #[tokio::test]
    async fn test_evict_only_removes_link() {
        let f = fixture().await;
        let src = source(&f.library, "e1.mkv", 10);
        let entry = entry(&f.cache, &src, "e1.mkv");
        f.cache.admit(&entry).await.unwrap();

        assert!(f.cache.evict(&entry).await.unwrap());
        assert!(!f.cache.evict(&entry).await.unwrap());
        assert!(src.exists());
        assert!(std::fs::symlink_metadata(&entry.cache_link).is_err());
    }

    #[tokio::test]
    async fn test_sweep_broken_removes_dangling_links_anywhere() {
        let f = fixture().await;
        let keep = source(&f.library, "keep.mkv", 10);
        let gone = source(&f.library, "gone.mkv", 10);
        f.cache.admit(&entry(&f.cache, &keep, "keep.mkv")).await.unwrap();
        f.cache.admit(&entry(&f.cache, &gone, "deep/gone.mkv")).await.unwrap();
        let stray = f.cache.root().join("unknown/stray.mkv");
        std::fs::create_dir_all(stray.parent().unwrap()).unwrap();
        symlink(f.library.join("never.mkv"), &stray).unwrap();

        std::fs::remove_file(&gone).unwrap();
        let removed = f.cache.sweep_broken().await.unwrap();

        assert_eq!(removed.len(), 2);
        assert!(std::fs::symlink_metadata(&stray).is_err());
        assert_eq!(f.cache.list_all_links().await.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_category_prunes_dirs() {
        let f = fixture().await;
        for name in ["A/e1.mkv", "A/e2.mkv", "B/e1.mkv"] {
            let src = source(&f.library, name, 5);
            f.cache.admit(&entry(&f.cache, &src, name)).await.unwrap();
        }

        let removed = f.cache.clear_category(Category::Tv).await.unwrap();

        assert_eq!(removed, 3);
        let tv = f.cache.category_dir(Category::Tv);
        assert!(tv.is_dir());
        assert_eq!(std::fs::read_dir(&tv).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_temp_links() {
        let f = fixture().await;
        let src = source(&f.library, "e1.mkv", 5);
        let tv = f.cache.category_dir(Category::Tv);
        std::fs::create_dir_all(&tv).unwrap();
        symlink(&src, tv.join(".mc-tmp-99-e1.mkv")).unwrap();

        assert_eq!(f.cache.cleanup_temp_links().await, 1);
        assert_eq!(f.cache.cleanup_temp_links().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_temp_links_in_leaves_other_categories() {
        let f = fixture().await;
        let src = source(&f.library, "e1.mkv", 5);
        let tv = f.cache.category_dir(Category::Tv);
        let recent = f.cache.category_dir(Category::Recent);
        std::fs::create_dir_all(&tv).unwrap();
        std::fs::create_dir_all(&recent).unwrap();
        symlink(&src, tv.join(".mc-tmp-99-e1.mkv")).unwrap();
        symlink(&src, recent.join(".mc-tmp-98-e1.mkv")).unwrap();

        let sweep_categories = Category::for_job(JobKind::Sweep);
        assert_eq!(f.cache.cleanup_temp_links_in(&sweep_categories).await, 1);
        assert!(recent.join(".mc-tmp-98-e1.mkv").symlink_metadata().is_ok());
        assert!(tv.join(".mc-tmp-99-e1.mkv").symlink_metadata().is_err());
    }

    #[tokio::test]
    async fn test_reconcile_adopts_and_drops() {
        let f = fixture().await;
        let tracked = source(&f.library, "tracked.mkv", 10);
        let untracked = source(&f.library, "untracked.mkv", 20);
        let tracked_entry = entry(&f.cache, &tracked, "tracked.mkv");
        f.cache.admit(&tracked_entry).await.unwrap();
        f.cache
            .admit(&entry(&f.cache, &untracked, "untracked.mkv"))
            .await
            .unwrap();

        let missing_row = entry(&f.cache, &tracked, "vanished.mkv");
        let now = Utc::now();
        let entries = f
            .cache
            .reconcile(Category::Tv, vec![tracked_entry.clone(), missing_row], now)
            .await;

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], tracked_entry);
        assert_eq!(entries[1].source_path, untracked);
        assert_eq!(entries[1].size_bytes, 20);
    }

    #[tokio::test]
    async fn test_reconcile_keeps_admission_size() {
        let f = fixture().await;
        let growing = source(&f.library, "growing.mkv", 10);
        let row = entry(&f.cache, &growing, "growing.mkv");
        f.cache.admit(&row).await.unwrap();

        std::fs::write(&growing, vec![0u8; 60]).unwrap();
        let entries = f
            .cache
            .reconcile(Category::Tv, vec![row], Utc::now())
            .await;

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].size_bytes, 10);
    }

    #[tokio::test]
    async fn test_apply_plan_then_replan_is_noop() {
        let f = fixture().await;
        let candidates: Vec<Candidate> = ["a.mkv", "b.mkv", "c.mkv"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let src = source(&f.library, name, (i + 1) * 10);
                Candidate::new(src, PathBuf::from(name), ((i + 1) * 10) as u64)
            })
            .collect();
        let now = Utc::now();
        let engine = AdmissionEngine::new(
            Category::Tv,
            Budget::new(35, 30, 100),
            f.cache.category_dir(Category::Tv),
        )
        .at(now);

        let plan = engine.plan(Vec::new(), &candidates, &FsInspector);
        let report = f.cache.apply(&plan).await;
        assert_eq!(report.created, 2);
        assert!(report.failed.is_empty());

        let existing = f
            .cache
            .reconcile(Category::Tv, plan.entries.clone(), now)
            .await;
        let again = engine
            .at(now + Duration::minutes(5))
            .plan(existing, &candidates, &FsInspector);
        let report = f.cache.apply(&again).await;
        assert_eq!(report.mutations(), 0);
        assert_eq!(again.aggregate_bytes(), 30);
    }
}
