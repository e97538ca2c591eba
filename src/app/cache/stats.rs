//! Link inventory and cache usage statistics
//!
//! Walks the cache root once and reports every symlink found, whether it
//! resolves, and how large its target is. The monitor, the `usage` and
//! `health` commands and the sweep reconciliation all work from this
//! inventory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::app::models::{system_time_to_utc, Category};
use crate::constants::files;

/// One symlink found under the cache root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Path of the symlink itself
    pub link: PathBuf,
    /// Raw target as stored in the link
    pub target: PathBuf,
    /// Category directory the link lives in, if any
    pub category: Option<Category>,
    /// Size of the resolved target; `None` when the link is broken
    pub target_size: Option<u64>,
    /// Last access time of the resolved target
    pub accessed: Option<DateTime<Utc>>,
    /// Modification time of the link itself
    pub linked_at: Option<DateTime<Utc>>,
}

impl LinkInfo {
    /// Whether the target does not resolve to a regular file
    pub fn is_broken(&self) -> bool {
        self.target_size.is_none()
    }
}

/// Per-category usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryUsage {
    /// Links that resolve
    pub links: usize,
    /// Links that do not resolve
    pub broken: usize,
    /// Resolved target bytes
    pub bytes: u64,
}

/// Cache-wide usage summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Cache root directory
    pub cache_root: PathBuf,
    /// Links that resolve
    pub valid_links: usize,
    /// Links that do not resolve
    pub broken_links: usize,
    /// Sum of resolved target sizes
    pub total_bytes: u64,
    /// Breakdown by category directory
    pub by_category: BTreeMap<Category, CategoryUsage>,
}

impl CacheStats {
    /// Summarize a link inventory
    pub fn from_links(cache_root: &Path, links: &[LinkInfo]) -> Self {
        let mut stats = Self {
            cache_root: cache_root.to_path_buf(),
            ..Default::default()
        };

        for link in links {
            let usage = link
                .category
                .map(|c| stats.by_category.entry(c).or_default());
            match link.target_size {
                Some(size) => {
                    stats.valid_links += 1;
                    stats.total_bytes += size;
                    if let Some(usage) = usage {
                        usage.links += 1;
                        usage.bytes += size;
                    }
                }
                None => {
                    stats.broken_links += 1;
                    if let Some(usage) = usage {
                        usage.broken += 1;
                    }
                }
            }
        }

        stats
    }

    /// Usage of one category, zero if it holds nothing
    pub fn category(&self, category: Category) -> CategoryUsage {
        self.by_category.get(&category).copied().unwrap_or_default()
    }

    /// Format total size in human-readable format
    pub fn format_total_size(&self) -> String {
        format_bytes(self.total_bytes)
    }
}

/// Directory scanner for the link inventory
pub struct DirectoryScanner;

impl DirectoryScanner {
    /// Walk `root` and describe every symlink below it
    pub async fn scan_links(root: &Path) -> Vec<LinkInfo> {
        // Run the walk in a blocking task to avoid blocking the async runtime
        let root = root.to_path_buf();

        tokio::task::spawn_blocking(move || Self::scan_links_sync(&root))
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to scan cache directory: {}", e);
                Vec::new()
            })
    }

    /// Blocking implementation of [`Self::scan_links`]
    pub fn scan_links_sync(root: &Path) -> Vec<LinkInfo> {
        let mut links = Vec::new();

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable cache path: {}", e);
                    continue;
                }
            };

            if !entry.path_is_symlink() || is_temp_link(entry.path()) {
                continue;
            }

            if let Some(info) = Self::describe(root, entry.path()) {
                links.push(info);
            }
        }

        debug!("Found {} links under {}", links.len(), root.display());
        links
    }

    /// Describe a single symlink
    pub fn describe(root: &Path, link: &Path) -> Option<LinkInfo> {
        let target = match std::fs::read_link(link) {
            Ok(target) => target,
            Err(e) => {
                debug!("Cannot read link {}: {}", link.display(), e);
                return None;
            }
        };

        let linked_at = std::fs::symlink_metadata(link)
            .ok()
            .and_then(|m| system_time_to_utc(m.modified()));

        // metadata() follows the link
        let (target_size, accessed) = match std::fs::metadata(link) {
            Ok(metadata) if metadata.is_file() => {
                (Some(metadata.len()), system_time_to_utc(metadata.accessed()))
            }
            _ => (None, None),
        };

        Some(LinkInfo {
            link: link.to_path_buf(),
            target,
            category: category_of(root, link),
            target_size,
            accessed,
            linked_at,
        })
    }
}

/// Category of a path, from its first component below `root`
pub fn category_of(root: &Path, path: &Path) -> Option<Category> {
    path.strip_prefix(root)
        .ok()?
        .components()
        .next()?
        .as_os_str()
        .to_str()?
        .parse()
        .ok()
}

/// Whether a path is a leftover temporary link from an interrupted re-point
pub fn is_temp_link(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(files::TEMP_LINK_PREFIX))
        .unwrap_or(false)
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: u64 = 1024;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD as f64 && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD as f64;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
