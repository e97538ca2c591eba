//! Cache monitor
//!
//! `quick_stats` is one walk of the cache root, cheap enough to run every
//! minute. `full_report` adds per-category usage against budgets, recent
//! access counts from target atimes, the consumer mount state and a list of
//! recommendations derived from fixed thresholds.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::app::cache::{format_bytes, CacheDirectory, CacheStats, DirectoryScanner, LinkInfo};
use crate::app::manifest::{CategoryStats, Stats, Status};
use crate::app::models::{Budget, Category};
use crate::app::mount::{ConsumerMount, MountState};
use crate::config::{AppConfig, MonitorConfig};

/// Something the operator should look at
#[derive(Debug, Clone, PartialEq)]
pub enum Recommendation {
    /// An enabled category holds fewer entries than the threshold
    Underused {
        category: Category,
        entries: usize,
        threshold: usize,
    },
    /// More broken links than the threshold
    ManyBrokenLinks { count: usize, threshold: usize },
    /// The consumer does not see the cache
    NotAttached,
    /// A category is close to its budget
    NearBudget { category: Category, percent: f64 },
    /// The cache is switched off
    Disabled,
}

impl Recommendation {
    /// Warnings are worth a notification; the rest are informational
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Recommendation::ManyBrokenLinks { .. } | Recommendation::NotAttached
        )
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::Underused {
                category,
                entries,
                threshold,
            } => write!(
                f,
                "{} is underused ({} entries, expected at least {}); check its sources",
                category, entries, threshold
            ),
            Recommendation::ManyBrokenLinks { count, threshold } => write!(
                f,
                "{} broken links (threshold {}); run `media_cache health --fix`",
                count, threshold
            ),
            Recommendation::NotAttached => {
                f.write_str("cache is not attached to the media server; run `media_cache mount attach`")
            }
            Recommendation::NearBudget { category, percent } => write!(
                f,
                "{} is at {:.1}% of its budget; consider raising max_bytes",
                category, percent
            ),
            Recommendation::Disabled => {
                f.write_str("cache is disabled; run `media_cache enable` to resume scheduled jobs")
            }
        }
    }
}

/// One category in the full report
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryReport {
    pub category: Category,
    pub enabled: bool,
    pub links: usize,
    pub broken: usize,
    pub bytes: u64,
    pub budget: Budget,
    /// Targets accessed within the recent-access window
    pub recent_accesses: usize,
}

impl CategoryReport {
    /// Budget usage in percent
    pub fn usage_percent(&self) -> f64 {
        self.budget.usage_percentage(self.bytes)
    }
}

/// Output of [`Monitor::full_report`]
#[derive(Debug, Clone)]
pub struct FullReport {
    pub generated_at: DateTime<Utc>,
    pub status: Status,
    pub stats: CacheStats,
    pub categories: Vec<CategoryReport>,
    pub mount: MountState,
    pub recommendations: Vec<Recommendation>,
}

impl FullReport {
    /// Manifest statistics including the per-category breakdown
    pub fn manifest_stats(&self) -> Stats {
        let mut stats = to_manifest_stats(&self.stats, self.generated_at);
        stats.categories = self
            .categories
            .iter()
            .map(|c| {
                (
                    c.category,
                    CategoryStats {
                        links: c.links,
                        broken: c.broken,
                        bytes: c.bytes,
                    },
                )
            })
            .collect();
        stats
    }

    /// Whether any recommendation warrants a notification
    pub fn has_warnings(&self) -> bool {
        self.recommendations.iter().any(Recommendation::is_warning)
    }

    /// Short text for the notification channel
    pub fn summary(&self) -> String {
        let mut text = format!(
            "media cache: {} links, {} broken, {}",
            self.stats.valid_links,
            self.stats.broken_links,
            format_bytes(self.stats.total_bytes)
        );
        for recommendation in &self.recommendations {
            text.push_str(&format!("\n- {}", recommendation));
        }
        text
    }
}

/// Computes statistics from the link tree
#[derive(Debug, Clone)]
pub struct Monitor {
    cache: CacheDirectory,
    thresholds: MonitorConfig,
}

impl Monitor {
    pub fn new(cache: CacheDirectory, thresholds: MonitorConfig) -> Self {
        Self { cache, thresholds }
    }

    /// Valid/broken counts and resolved size from one walk of the cache root
    pub async fn quick_stats(&self) -> Stats {
        let links = self.cache.list_all_links().await;
        let stats = CacheStats::from_links(self.cache.root(), &links);
        debug!(
            "Quick stats: {} valid, {} broken, {}",
            stats.valid_links,
            stats.broken_links,
            stats.format_total_size()
        );
        to_manifest_stats(&stats, Utc::now())
    }

    /// Per-category breakdown, access counts, mount state and recommendations
    pub async fn full_report(
        &self,
        config: &AppConfig,
        status: Status,
        mount: &dyn ConsumerMount,
        now: DateTime<Utc>,
    ) -> FullReport {
        let links = DirectoryScanner::scan_links(self.cache.root()).await;
        let stats = CacheStats::from_links(self.cache.root(), &links);
        let window = Duration::days(i64::from(self.thresholds.recent_access_days));

        let categories: Vec<CategoryReport> = Category::ALL
            .into_iter()
            .map(|category| {
                let section = config.categories.get(category);
                let usage = stats.category(category);
                CategoryReport {
                    category,
                    enabled: section.enabled,
                    links: usage.links,
                    broken: usage.broken,
                    bytes: usage.bytes,
                    budget: section.budget(),
                    recent_accesses: recent_accesses(&links, category, now - window),
                }
            })
            .collect();

        let mount_state = match mount.status().await {
            Ok(state) => state,
            Err(e) => {
                warn!("Could not query consumer mount: {}", e);
                MountState::Unknown
            }
        };

        let recommendations =
            recommendations(&categories, &stats, mount_state, status, &self.thresholds);

        FullReport {
            generated_at: now,
            status,
            stats,
            categories,
            mount: mount_state,
            recommendations,
        }
    }
}

fn to_manifest_stats(stats: &CacheStats, at: DateTime<Utc>) -> Stats {
    Stats {
        valid_links: stats.valid_links,
        broken_links: stats.broken_links,
        total_bytes: stats.total_bytes,
        categories: Default::default(),
        computed_at: Some(at),
    }
}

fn recent_accesses(links: &[LinkInfo], category: Category, since: DateTime<Utc>) -> usize {
    links
        .iter()
        .filter(|l| l.category == Some(category))
        .filter(|l| l.accessed.map_or(false, |at| at >= since))
        .count()
}

/// Fixed-threshold recommendations
pub fn recommendations(
    categories: &[CategoryReport],
    stats: &CacheStats,
    mount: MountState,
    status: Status,
    thresholds: &MonitorConfig,
) -> Vec<Recommendation> {
    let mut out = Vec::new();

    if status == Status::Disabled {
        out.push(Recommendation::Disabled);
    }

    if stats.broken_links > thresholds.broken_link_threshold {
        out.push(Recommendation::ManyBrokenLinks {
            count: stats.broken_links,
            threshold: thresholds.broken_link_threshold,
        });
    }

    if mount == MountState::Detached {
        out.push(Recommendation::NotAttached);
    }

    for report in categories.iter().filter(|c| c.enabled) {
        if report.links < thresholds.underused_entry_threshold {
            out.push(Recommendation::Underused {
                category: report.category,
                entries: report.links,
                threshold: thresholds.underused_entry_threshold,
            });
        }
        let percent = report.usage_percent();
        if percent >= thresholds.near_budget_percent {
            out.push(Recommendation::NearBudget {
                category: report.category,
                percent,
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::mount::CommandMount;
    use crate::config::MountConfig;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn report(category: Category, links: usize, bytes: u64, max_bytes: u64) -> CategoryReport {
        CategoryReport {
            category,
            enabled: true,
            links,
            broken: 0,
            bytes,
            budget: Budget::new(max_bytes, 30, max_bytes),
            recent_accesses: 0,
        }
    }

    #[test]
    fn test_recommendations_thresholds() {
        let thresholds = MonitorConfig::default();
        let categories = vec![
            report(Category::Movies, 2, 10, 1_000),
            report(Category::Tv, 50, 960, 1_000),
            CategoryReport {
                enabled: false,
                ..report(Category::Doc, 0, 0, 1_000)
            },
        ];
        let stats = CacheStats {
            broken_links: thresholds.broken_link_threshold + 1,
            ..Default::default()
        };

        let recs = recommendations(
            &categories,
            &stats,
            MountState::Detached,
            Status::Disabled,
            &thresholds,
        );

        assert!(recs.contains(&Recommendation::Disabled));
        assert!(recs.contains(&Recommendation::NotAttached));
        assert!(recs.iter().any(|r| matches!(r, Recommendation::ManyBrokenLinks { .. })));
        assert!(recs.iter().any(|r| matches!(
            r,
            Recommendation::Underused { category: Category::Movies, entries: 2, .. }
        )));
        assert!(recs.iter().any(|r| matches!(
            r,
            Recommendation::NearBudget { category: Category::Tv, .. }
        )));
        // Disabled categories are not judged
        assert!(!recs.iter().any(|r| matches!(
            r,
            Recommendation::Underused { category: Category::Doc, .. }
        )));
    }

    #[test]
    fn test_healthy_cache_has_no_recommendations() {
        let thresholds = MonitorConfig::default();
        let categories = vec![report(Category::Tv, 20, 100, 1_000)];
        let recs = recommendations(
            &categories,
            &CacheStats::default(),
            MountState::Attached,
            Status::Active,
            &thresholds,
        );
        assert!(recs.is_empty());
    }

    #[tokio::test]
    async fn test_quick_stats_and_full_report() {
        let library = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let cache = CacheDirectory::open(cache_dir.path()).await.unwrap();

        let film = library.path().join("film.mkv");
        std::fs::write(&film, vec![0u8; 100]).unwrap();
        std::fs::create_dir_all(cache.category_dir(Category::Movies)).unwrap();
        symlink(&film, cache.category_dir(Category::Movies).join("film.mkv")).unwrap();
        symlink(
            library.path().join("gone.mkv"),
            cache.category_dir(Category::Movies).join("gone.mkv"),
        )
        .unwrap();

        let monitor = Monitor::new(cache.clone(), MonitorConfig::default());
        let quick = monitor.quick_stats().await;
        assert_eq!(quick.valid_links, 1);
        assert_eq!(quick.broken_links, 1);
        assert_eq!(quick.total_bytes, 100);
        assert!(quick.computed_at.is_some());

        let mount = CommandMount::from_config(&MountConfig {
            status_command: Some("false".to_string()),
            ..Default::default()
        });
        let full = monitor
            .full_report(&AppConfig::default(), Status::Active, &mount, Utc::now())
            .await;

        assert_eq!(full.mount, MountState::Detached);
        assert!(full.has_warnings());
        let movies = full
            .categories
            .iter()
            .find(|c| c.category == Category::Movies)
            .unwrap();
        assert_eq!((movies.links, movies.broken, movies.bytes), (1, 1, 100));
        let stats = full.manifest_stats();
        assert_eq!(stats.categories[&Category::Movies].links, 1);
        assert!(full.summary().contains("1 broken"));
    }
}
