//! Job runner
//!
//! Every invocation is a short-lived job: take the job's lock, check the
//! library, check the manifest status, produce candidates, plan each
//! category, apply the plan to the link tree, merge the category's ledger
//! rows into the manifest and refresh the statistics. Shared state is
//! re-opened per job; nothing survives between invocations.
//!
//! Lock contention is silent for scheduled and quick runs and an error for
//! manual ones. Per-item failures are logged and counted, never fatal.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::app::cache::{CacheDirectory, CacheStats, LinkInfo};
use crate::app::engine::{AdmissionEngine, FsInspector, SweepPlan};
use crate::app::lock::{ConcurrencyGuard, JobLock, RetryPolicy};
use crate::app::manifest::{CategoryStats, JobRun, ManifestStore, RunOutcome, Stats, Status};
use crate::app::models::{CacheEntry, Candidate, Category, JobKind};
use crate::app::monitor::{FullReport, Monitor};
use crate::app::mount::{CommandMount, ConsumerMount};
use crate::app::notify::{self, Notifier};
use crate::app::popularity::{ranked_candidates, HintResolver, HttpPopularity, PopularityProvider};
use crate::app::preconditions;
use crate::app::rollback::{RollbackController, RollbackReport};
use crate::app::scanner::{ScanFilter, SourceScanner};
use crate::app::schedule::ScheduleControl;
use crate::config::AppConfig;
use crate::errors::{LockError, Result, ScheduleResult};

/// Who started the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The operator, from a terminal
    Manual,
    /// The OS scheduler
    Scheduled,
}

impl Trigger {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Trigger::Scheduled)
    }
}

/// Why a job did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCause {
    /// Another run of the same job holds the lock
    AlreadyRunning,
    /// The cache status does not allow this run to mutate
    Status(Status),
}

/// Result of a job that may legitimately do nothing
#[derive(Debug, Clone)]
pub enum JobOutcome<T> {
    Completed(T),
    Skipped(SkipCause),
}

impl<T> JobOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            JobOutcome::Completed(value) => Some(value),
            JobOutcome::Skipped(_) => None,
        }
    }
}

/// Where a category's candidates came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Popularity,
    Scanner,
}

/// Outcome of one category in a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySummary {
    pub category: Category,
    pub source: CandidateSource,
    pub candidates: usize,
    pub admitted: usize,
    pub evicted: usize,
    pub repointed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Ledger bytes after the sweep
    pub bytes: u64,
    /// Entries after the sweep
    pub entries: usize,
    pub max_bytes: u64,
}

impl CategorySummary {
    fn from_plan(
        plan: &SweepPlan,
        source: CandidateSource,
        candidates: usize,
        failed: usize,
        entries: &[CacheEntry],
    ) -> Self {
        Self {
            category: plan.category,
            source,
            candidates,
            admitted: plan.admissions().count(),
            evicted: plan.evictions().count(),
            repointed: plan.repoints().count(),
            skipped: plan.skipped_count(),
            failed,
            bytes: entries.iter().map(|e| e.size_bytes).sum(),
            entries: entries.len(),
            max_bytes: plan.budget.max_bytes,
        }
    }

    /// Filesystem changes made for this category
    pub fn changes(&self) -> usize {
        self.admitted + self.evicted + self.repointed
    }
}

/// Outcome of a sweep job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub job: JobKind,
    /// Leftover temporary links removed
    pub temp_cleaned: usize,
    /// Broken links removed before planning
    pub broken_removed: usize,
    pub categories: Vec<CategorySummary>,
}

impl SweepSummary {
    /// Total filesystem changes
    pub fn mutations(&self) -> usize {
        self.broken_removed + self.categories.iter().map(CategorySummary::changes).sum::<usize>()
    }

    /// Total per-item failures
    pub fn failures(&self) -> usize {
        self.categories.iter().map(|c| c.failed).sum()
    }

    /// One-line summary for the run record
    pub fn line(&self) -> String {
        let (admitted, evicted, repointed) =
            self.categories.iter().fold((0, 0, 0), |(a, e, r), c| {
                (a + c.admitted, e + c.evicted, r + c.repointed)
            });
        format!(
            "{} admitted, {} evicted, {} re-pointed, {} broken removed, {} failed",
            admitted,
            evicted,
            repointed,
            self.broken_removed,
            self.failures()
        )
    }

    /// Multi-line text for the notification channel
    pub fn notification(&self) -> String {
        let mut text = format!("media cache {}: {}", self.job, self.line());
        for c in &self.categories {
            if c.changes() > 0 || c.failed > 0 {
                text.push_str(&format!(
                    "\n- {}: +{} -{} ~{} ({} failed), {} entries",
                    c.category, c.admitted, c.evicted, c.repointed, c.failed, c.entries
                ));
            }
        }
        text
    }
}

/// Result of the monitor job
#[derive(Debug, Clone)]
pub enum MonitorResult {
    Quick(Stats),
    Full(Box<FullReport>),
}

/// Consistency of the link tree against the ledger
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    /// Links on disk
    pub links: usize,
    /// Links whose target does not resolve
    pub broken: Vec<LinkInfo>,
    /// Links with no ledger row
    pub untracked: usize,
    /// Ledger rows with no link
    pub missing: usize,
    /// Broken links removed by `--fix`
    pub removed: usize,
    /// Temporary links removed by `--fix`
    pub temp_cleaned: usize,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.broken.is_empty() && self.untracked == 0 && self.missing == 0
    }
}

/// Everything a job needs, opened fresh per invocation
pub struct JobContext {
    config: AppConfig,
    config_file: Option<PathBuf>,
    guard: ConcurrencyGuard,
    store: ManifestStore,
    notifier: Box<dyn Notifier>,
    popularity: Option<Box<dyn PopularityProvider>>,
    mount: Box<dyn ConsumerMount>,
}

impl JobContext {
    /// Context wired from configuration
    pub fn new(config: AppConfig, config_file: Option<PathBuf>) -> Self {
        let guard = ConcurrencyGuard::new(config.lock_dir());
        let store = ManifestStore::new(config.manifest_path(), guard.clone());
        let notifier = notify::from_config(&config.notify);
        let popularity: Option<Box<dyn PopularityProvider>> =
            match HttpPopularity::from_config(&config.popularity) {
                Ok(provider) => provider.map(|p| Box::new(p) as Box<dyn PopularityProvider>),
                Err(e) => {
                    warn!("Popularity provider disabled: {}", e);
                    None
                }
            };
        let mount = Box::new(CommandMount::from_config(&config.mount));

        Self {
            config,
            config_file,
            guard,
            store,
            notifier,
            popularity,
            mount,
        }
    }

    /// Replace the notification channel
    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the popularity provider
    pub fn with_popularity(mut self, provider: Option<Box<dyn PopularityProvider>>) -> Self {
        self.popularity = provider;
        self
    }

    /// Replace the consumer mount
    pub fn with_mount(mut self, mount: Box<dyn ConsumerMount>) -> Self {
        self.mount = mount;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }

    pub fn mount(&self) -> &dyn ConsumerMount {
        self.mount.as_ref()
    }

    /// Open the cache root
    pub async fn cache(&self) -> Result<CacheDirectory> {
        Ok(CacheDirectory::open(&self.config.paths.cache_root).await?)
    }

    /// Cron fragment control for this binary
    pub fn schedule(&self) -> ScheduleResult<ScheduleControl> {
        ScheduleControl::new(&self.config.schedule, self.config_file.clone())
    }

    /// Take a job lock; contention is `None` when silent and an error otherwise
    fn lock(&self, job: JobKind, silent: bool) -> Result<Option<JobLock>> {
        match self.guard.try_acquire(job.as_str())? {
            Some(lock) => Ok(Some(lock)),
            None if silent => {
                info!("Job {} is already running, nothing to do", job);
                Ok(None)
            }
            None => Err(LockError::Held {
                job: job.to_string(),
                path: self.guard.lock_path(job.as_str()),
            }
            .into()),
        }
    }

    /// Take a job lock for an operator command
    fn lock_manual(&self, job: JobKind) -> Result<JobLock> {
        self.lock(job, false)?.ok_or_else(|| {
            LockError::Held {
                job: job.to_string(),
                path: self.guard.lock_path(job.as_str()),
            }
            .into()
        })
    }

    async fn candidates(
        &self,
        category: Category,
        cache_root: &Path,
        now: DateTime<Utc>,
    ) -> (CandidateSource, Vec<Candidate>) {
        let section = self.config.categories.get(category);
        let filter = ScanFilter::with_extensions(&self.config.library.extensions)
            .max_age_days(self.config.category_max_age(category))
            .min_size_bytes(section.min_size_bytes);
        let roots = self.config.category_sources(category);

        if category == Category::Popular {
            if let Some(provider) = &self.popularity {
                let resolver = HintResolver::new(&roots, filter.clone(), cache_root);
                if let Some(candidates) =
                    ranked_candidates(provider.as_ref(), self.config.popularity.limit, &resolver)
                        .await
                {
                    return (CandidateSource::Popularity, candidates);
                }
            }
        }

        (
            CandidateSource::Scanner,
            scan_roots(roots, filter, cache_root, now).await,
        )
    }

    async fn send(&self, text: &str) {
        notify::notify(self.notifier.as_ref(), text).await;
    }
}

/// Walk each root in a blocking task; a missing or unreadable root is skipped
async fn scan_roots(
    roots: Vec<PathBuf>,
    filter: ScanFilter,
    cache_root: &Path,
    now: DateTime<Utc>,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for root in roots {
        let scanner = SourceScanner::new(&root, filter.clone())
            .excluding([cache_root.to_path_buf()])
            .at(now);
        match tokio::task::spawn_blocking(move || scanner.candidates()).await {
            Ok(Ok(found)) => {
                debug!("Found {} candidates under {}", found.len(), root.display());
                candidates.extend(found);
            }
            Ok(Err(e)) => warn!("Skipping source: {}", e),
            Err(e) => warn!("Scan of {} did not complete: {}", root.display(), e),
        }
    }
    candidates
}

/// Run a sweep job over its categories
///
/// # Errors
///
/// Precondition failures, manual lock contention and manifest failures.
pub async fn run_sweep(
    ctx: &JobContext,
    job: JobKind,
    trigger: Trigger,
) -> Result<JobOutcome<SweepSummary>> {
    let Some(_lock) = ctx.lock(job, trigger.is_scheduled())? else {
        return Ok(JobOutcome::Skipped(SkipCause::AlreadyRunning));
    };

    preconditions::check_all(&ctx.config)?;

    let manifest = ctx.store.read().await?;
    let allowed = match trigger {
        Trigger::Scheduled => manifest.status.allows_scheduled_mutation(),
        Trigger::Manual => manifest.status.allows_manual_mutation(),
    };
    if !allowed {
        info!("Cache is {}, {} job does nothing", manifest.status, job);
        return Ok(JobOutcome::Skipped(SkipCause::Status(manifest.status)));
    }

    let started_at = Utc::now();
    let cache = ctx.cache().await?;
    let temp_cleaned = cache.cleanup_temp_links_in(&Category::for_job(job)).await;
    let broken_removed = cache.sweep_broken().await?.len();

    let mut summary = SweepSummary {
        job,
        temp_cleaned,
        broken_removed,
        categories: Vec::new(),
    };

    for category in Category::for_job(job) {
        let section = ctx.config.categories.get(category);
        if !section.enabled {
            debug!("Category {} is disabled, skipping", category);
            continue;
        }

        let now = Utc::now();
        let existing = cache
            .reconcile(category, manifest.entries_for(category), now)
            .await;
        let (source, candidates) = ctx.candidates(category, cache.root(), now).await;

        let plan = AdmissionEngine::new(category, section.budget(), cache.category_dir(category))
            .at(now)
            .plan(existing, &candidates, &FsInspector);
        let report = cache.apply(&plan).await;

        let entries: Vec<CacheEntry> = plan
            .entries
            .iter()
            .filter(|e| !report.failed_for(&e.cache_link))
            .cloned()
            .collect();
        let category_summary =
            CategorySummary::from_plan(&plan, source, candidates.len(), report.failed.len(), &entries);

        ctx.store
            .update(move |m| m.replace_category_entries(category, entries))
            .await?;

        info!(
            "{}: {} entries, {} of {} bytes",
            category, category_summary.entries, category_summary.bytes, category_summary.max_bytes
        );
        summary.categories.push(category_summary);
    }

    let quick = Monitor::new(cache.clone(), ctx.config.monitor.clone())
        .quick_stats()
        .await;
    let run = JobRun {
        started_at,
        finished_at: Utc::now(),
        outcome: RunOutcome::Success,
        summary: summary.line(),
    };
    let swept: Vec<(Category, CategoryStats)> = summary
        .categories
        .iter()
        .map(|c| {
            (
                c.category,
                CategoryStats {
                    links: c.entries,
                    broken: 0,
                    bytes: c.bytes,
                },
            )
        })
        .collect();
    ctx.store
        .update(move |m| {
            let mut stats = quick;
            stats.categories = std::mem::take(&mut m.stats.categories);
            stats.categories.extend(swept);
            m.stats = stats;
            m.status = m.status.after_sweep();
            m.record_run(job, run);
        })
        .await?;

    info!("Sweep {} finished: {}", job, summary.line());
    if summary.mutations() > 0 || summary.failures() > 0 {
        ctx.send(&summary.notification()).await;
    }

    Ok(JobOutcome::Completed(summary))
}

/// Run the monitor job
///
/// Quick runs refresh the stored statistics; full runs also build the
/// report. Scheduled runs do nothing unless the cache is active.
pub async fn run_monitor(
    ctx: &JobContext,
    quick: bool,
    trigger: Trigger,
) -> Result<JobOutcome<MonitorResult>> {
    let Some(_lock) = ctx.lock(JobKind::Monitor, quick || trigger.is_scheduled())? else {
        return Ok(JobOutcome::Skipped(SkipCause::AlreadyRunning));
    };

    let status = ctx.store.read().await?.status;
    if trigger.is_scheduled() && !status.allows_scheduled_mutation() {
        debug!("Cache is {}, monitor does nothing", status);
        return Ok(JobOutcome::Skipped(SkipCause::Status(status)));
    }

    let started_at = Utc::now();
    let cache = ctx.cache().await?;
    let monitor = Monitor::new(cache, ctx.config.monitor.clone());

    let (stats, result) = if quick {
        let stats = monitor.quick_stats().await;
        (stats.clone(), MonitorResult::Quick(stats))
    } else {
        let report = monitor
            .full_report(&ctx.config, status, ctx.mount(), Utc::now())
            .await;
        if report.has_warnings() {
            ctx.send(&report.summary()).await;
        }
        (report.manifest_stats(), MonitorResult::Full(Box::new(report)))
    };

    if status.allows_manual_mutation() {
        let run = JobRun {
            started_at,
            finished_at: Utc::now(),
            outcome: RunOutcome::Success,
            summary: format!(
                "{} valid, {} broken, {} bytes",
                stats.valid_links, stats.broken_links, stats.total_bytes
            ),
        };
        ctx.store
            .update(move |m| {
                let mut stats = stats;
                if stats.categories.is_empty() {
                    stats.categories = std::mem::take(&mut m.stats.categories);
                }
                m.stats = stats;
                m.record_run(JobKind::Monitor, run);
            })
            .await?;
    }

    Ok(JobOutcome::Completed(result))
}

/// Mark the cache active and install the schedule
///
/// Returns the cron fragment path when scheduling is managed here.
pub async fn enable(ctx: &JobContext) -> Result<Option<PathBuf>> {
    preconditions::check_all(&ctx.config)?;
    ctx.store.set_status(Status::Active).await?;
    Ok(ctx.schedule()?.install().await?)
}

/// Mark the cache disabled and remove the schedule
///
/// Links stay in place; scheduled jobs stop touching them.
pub async fn disable(ctx: &JobContext) -> Result<bool> {
    ctx.store.set_status(Status::Disabled).await?;
    Ok(ctx.schedule()?.remove().await?)
}

/// Remove every link of one category and its ledger rows
pub async fn clear(ctx: &JobContext, category: Category) -> Result<usize> {
    let _lock = ctx.lock_manual(category.job())?;
    let cache = ctx.cache().await?;
    let removed = cache.clear_category(category).await?;
    ctx.store
        .update(|m| m.replace_category_entries(category, Vec::new()))
        .await?;
    Ok(removed)
}

/// Cache-wide usage from one walk of the cache root
pub async fn usage(ctx: &JobContext) -> Result<CacheStats> {
    let cache = ctx.cache().await?;
    let links = cache.list_all_links().await;
    Ok(CacheStats::from_links(cache.root(), &links))
}

/// Largest ledger entries, optionally within one category
pub async fn top(
    ctx: &JobContext,
    limit: usize,
    category: Option<Category>,
) -> Result<Vec<CacheEntry>> {
    let mut entries: Vec<CacheEntry> = ctx
        .store
        .read()
        .await?
        .entries
        .into_iter()
        .filter(|e| category.map_or(true, |c| e.category == c))
        .collect();
    entries.sort_by(|a, b| {
        b.size_bytes
            .cmp(&a.size_bytes)
            .then_with(|| a.cache_link.cmp(&b.cache_link))
    });
    entries.truncate(limit);
    Ok(entries)
}

/// Compare the link tree with the ledger; with `fix`, repair both
///
/// Fixing takes the sweep and recent locks so no sweep runs concurrently.
pub async fn health(ctx: &JobContext, fix: bool) -> Result<HealthReport> {
    let cache = ctx.cache().await?;
    let manifest = ctx.store.read().await?;
    let links = cache.list_all_links().await;

    let tracked: std::collections::HashSet<&Path> =
        manifest.entries.iter().map(|e| e.cache_link.as_path()).collect();
    let on_disk: std::collections::HashSet<&Path> = links.iter().map(|l| l.link.as_path()).collect();

    let mut report = HealthReport {
        links: links.len(),
        broken: links.iter().filter(|l| l.is_broken()).cloned().collect(),
        untracked: on_disk.difference(&tracked).count(),
        missing: tracked.difference(&on_disk).count(),
        ..Default::default()
    };

    if !fix {
        return Ok(report);
    }

    repair(ctx, &cache, &mut report).await?;
    Ok(report)
}

/// Remove broken and temporary links, then rebuild the ledger from disk
///
/// The manifest is read only once both sweep locks are held, so rows
/// written by a sweep that finished in the meantime are kept.
async fn repair(
    ctx: &JobContext,
    cache: &CacheDirectory,
    report: &mut HealthReport,
) -> Result<()> {
    let _sweep = ctx.lock_manual(JobKind::Sweep)?;
    let _recent = ctx.lock_manual(JobKind::Recent)?;

    report.temp_cleaned = cache.cleanup_temp_links().await;
    report.removed = cache.sweep_broken().await?.len();

    let manifest = ctx.store.read().await?;
    let now = Utc::now();
    let mut reconciled = Vec::new();
    for category in Category::ALL {
        let entries = cache
            .reconcile(category, manifest.entries_for(category), now)
            .await;
        reconciled.push((category, entries));
    }
    ctx.store
        .update(move |m| {
            for (category, entries) in reconciled {
                m.replace_category_entries(category, entries);
            }
        })
        .await?;

    info!(
        "Health fix: {} broken links removed, ledger reconciled",
        report.removed
    );
    Ok(())
}

/// Run the rollback, waiting for running sweeps to finish first
pub async fn rollback(ctx: &JobContext, detach_mount: bool) -> Result<RollbackReport> {
    let _lock = ctx.lock_manual(JobKind::Rollback)?;
    let _sweep = ctx
        .guard
        .acquire_blocking(JobKind::Sweep.as_str(), RetryPolicy::default())
        .await?;
    let _recent = ctx
        .guard
        .acquire_blocking(JobKind::Recent.as_str(), RetryPolicy::default())
        .await?;

    let started_at = Utc::now();
    let cache = ctx.cache().await?;
    let schedule = ctx.schedule()?;
    let report = RollbackController::new(&ctx.store, &cache, &schedule, ctx.mount())
        .run(detach_mount)
        .await?;

    let run = JobRun {
        started_at,
        finished_at: Utc::now(),
        outcome: RunOutcome::Success,
        summary: report.summary(),
    };
    ctx.store
        .update(move |m| m.record_run(JobKind::Rollback, run))
        .await?;
    ctx.send(&report.summary()).await;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::popularity::{PopularItem, StaticPopularity};
    use crate::errors::{AppError, NotifyResult};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Notifier for Recorder {
        async fn send(&self, text: &str) -> NotifyResult<()> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct Fixture {
        temp: TempDir,
        config: AppConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let library = temp.path().join("library");
            std::fs::create_dir_all(library.join("tv")).unwrap();
            std::fs::create_dir_all(library.join("movies")).unwrap();

            let mut config = AppConfig::default();
            config.paths.cache_root = temp.path().join("cache");
            config.paths.state_dir = temp.path().join("state");
            config.library.roots = vec![library.clone()];
            config.categories.tv.sources = vec![library.join("tv")];
            config.categories.tv.max_bytes = 100;
            config.categories.tv.max_file_bytes = 100;
            config.categories.popular.enabled = false;

            Self { temp, config }
        }

        fn write(&self, relative: &str, size: usize) -> PathBuf {
            let path = self.temp.path().join("library").join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, vec![0u8; size]).unwrap();
            path
        }

        fn context(&self) -> (JobContext, Recorder) {
            let recorder = Recorder::default();
            let ctx = JobContext::new(self.config.clone(), None)
                .with_notifier(Box::new(recorder.clone()));
            (ctx, recorder)
        }
    }

    #[tokio::test]
    async fn test_sweep_fills_budget_then_is_idempotent() {
        let f = Fixture::new();
        f.write("tv/c.mkv", 40);
        f.write("tv/a.mkv", 40);
        f.write("tv/b.mkv", 30);
        f.write("tv/d.mkv", 10);
        let (ctx, recorder) = f.context();

        let first = run_sweep(&ctx, JobKind::Sweep, Trigger::Scheduled)
            .await
            .unwrap()
            .completed()
            .unwrap();
        let tv = first
            .categories
            .iter()
            .find(|c| c.category == Category::Tv)
            .unwrap();
        assert_eq!((tv.admitted, tv.entries, tv.bytes), (3, 3, 80));
        assert_eq!(recorder.0.lock().unwrap().len(), 1);

        let manifest = ctx.store().read().await.unwrap();
        assert_eq!(manifest.status, Status::Active);
        assert_eq!(manifest.category_bytes(Category::Tv), 80);
        assert_eq!(manifest.stats.valid_links, 3);
        assert!(manifest.last_run.contains_key(&JobKind::Sweep));

        let second = run_sweep(&ctx, JobKind::Sweep, Trigger::Scheduled)
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(second.mutations(), 0);
        let links = |entries: &[CacheEntry]| {
            entries
                .iter()
                .map(|e| (e.cache_link.clone(), e.source_path.clone(), e.added_at))
                .collect::<Vec<_>>()
        };
        assert_eq!(
            links(&ctx.store().read().await.unwrap().entries),
            links(&manifest.entries)
        );
        // Nothing changed, nothing sent
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_scheduled_sweep_does_nothing() {
        let f = Fixture::new();
        f.write("tv/a.mkv", 10);
        let (ctx, _) = f.context();
        ctx.store().set_status(Status::Disabled).await.unwrap();
        let before = ctx.store().read().await.unwrap();

        let outcome = run_sweep(&ctx, JobKind::Sweep, Trigger::Scheduled)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            JobOutcome::Skipped(SkipCause::Status(Status::Disabled))
        ));
        let after = ctx.store().read().await.unwrap();
        assert_eq!(after.stats, before.stats);
        assert!(after.entries.is_empty());
        assert!(!f.config.paths.cache_root.join("tv").exists());

        let quick = run_monitor(&ctx, true, Trigger::Scheduled).await.unwrap();
        assert!(matches!(quick, JobOutcome::Skipped(SkipCause::Status(_))));
    }

    #[tokio::test]
    async fn test_lock_contention_by_trigger() {
        let f = Fixture::new();
        let (ctx, _) = f.context();
        let _held = ctx.guard().acquire("sweep").unwrap();

        let scheduled = run_sweep(&ctx, JobKind::Sweep, Trigger::Scheduled)
            .await
            .unwrap();
        assert!(matches!(
            scheduled,
            JobOutcome::Skipped(SkipCause::AlreadyRunning)
        ));

        let manual = run_sweep(&ctx, JobKind::Sweep, Trigger::Manual).await;
        assert!(matches!(manual, Err(AppError::Lock(LockError::Held { .. }))));

        // Other jobs are not excluded
        assert!(run_sweep(&ctx, JobKind::Recent, Trigger::Manual)
            .await
            .unwrap()
            .completed()
            .is_some());
    }

    #[tokio::test]
    async fn test_missing_library_is_fatal_before_mutation() {
        let mut f = Fixture::new();
        f.config.library.roots.push(f.temp.path().join("unmounted"));
        let (ctx, _) = f.context();

        let result = run_sweep(&ctx, JobKind::Sweep, Trigger::Scheduled).await;

        assert!(matches!(result, Err(ref e) if e.is_precondition()));
        assert!(!ctx.store().path().exists());
    }

    #[tokio::test]
    async fn test_popular_uses_provider_or_falls_back() {
        let mut f = Fixture::new();
        f.config.categories.popular.enabled = true;
        f.config.categories.popular.max_bytes = 50;
        f.config.categories.popular.max_file_bytes = 50;
        f.write("movies/big.mkv", 30);
        f.write("movies/small.mkv", 20);
        f.write("movies/tiny.mkv", 5);

        let provider = StaticPopularity::new(vec![PopularItem {
            title: "Big".to_string(),
            category: None,
            path: PathBuf::from("movies/big.mkv"),
        }]);
        let (ctx, _) = f.context();
        let ctx = ctx.with_popularity(Some(Box::new(provider)));

        let summary = run_sweep(&ctx, JobKind::Sweep, Trigger::Manual)
            .await
            .unwrap()
            .completed()
            .unwrap();
        let popular = summary
            .categories
            .iter()
            .find(|c| c.category == Category::Popular)
            .unwrap();
        assert_eq!(popular.source, CandidateSource::Popularity);
        assert_eq!((popular.entries, popular.bytes), (1, 30));

        let (fallback, _) = f.context();
        let summary = run_sweep(&fallback, JobKind::Sweep, Trigger::Manual)
            .await
            .unwrap()
            .completed()
            .unwrap();
        let popular = summary
            .categories
            .iter()
            .find(|c| c.category == Category::Popular)
            .unwrap();
        assert_eq!(popular.source, CandidateSource::Scanner);
        // big.mkv stays; tiny.mkv and small.mkv do not both fit next to it
        assert!(popular.bytes <= 50);
    }

    #[tokio::test]
    async fn test_clear_top_and_health() {
        let f = Fixture::new();
        f.write("tv/a.mkv", 40);
        let doomed = f.write("tv/b.mkv", 30);
        let (ctx, _) = f.context();
        run_sweep(&ctx, JobKind::Sweep, Trigger::Manual).await.unwrap();

        let largest = top(&ctx, 1, Some(Category::Tv)).await.unwrap();
        assert_eq!(largest.len(), 1);
        assert_eq!(largest[0].size_bytes, 40);

        std::fs::remove_file(doomed).unwrap();
        let report = health(&ctx, false).await.unwrap();
        assert_eq!(report.broken.len(), 1);
        assert!(!report.is_healthy());

        let fixed = health(&ctx, true).await.unwrap();
        assert_eq!(fixed.removed, 1);
        assert!(health(&ctx, false).await.unwrap().is_healthy());

        assert_eq!(clear(&ctx, Category::Tv).await.unwrap(), 1);
        assert!(ctx.store().read().await.unwrap().entries.is_empty());
        assert_eq!(usage(&ctx).await.unwrap().valid_links, 0);
    }

    #[tokio::test]
    async fn test_health_fix_keeps_rows_from_a_finished_sweep() {
        let f = Fixture::new();
        f.write("tv/a.mkv", 40);
        let (ctx, _) = f.context();
        run_sweep(&ctx, JobKind::Sweep, Trigger::Manual).await.unwrap();
        let cache = ctx.cache().await.unwrap();
        let mut report = health(&ctx, false).await.unwrap();

        // A sweep lands between the report and the fix
        let late = f.write("tv/b.mkv", 10);
        run_sweep(&ctx, JobKind::Sweep, Trigger::Manual).await.unwrap();
        std::fs::write(&late, vec![0u8; 60]).unwrap();

        repair(&ctx, &cache, &mut report).await.unwrap();

        let manifest = ctx.store().read().await.unwrap();
        assert_eq!(manifest.entries.len(), 2);
        let row = manifest
            .entries
            .iter()
            .find(|e| e.source_path == late)
            .unwrap();
        assert_eq!(row.size_bytes, 10);
    }

    #[tokio::test]
    async fn test_monitor_records_stats() {
        let f = Fixture::new();
        f.write("tv/a.mkv", 40);
        let (ctx, _) = f.context();
        run_sweep(&ctx, JobKind::Sweep, Trigger::Manual).await.unwrap();

        let outcome = run_monitor(&ctx, true, Trigger::Scheduled).await.unwrap();
        match outcome.completed() {
            Some(MonitorResult::Quick(stats)) => assert_eq!(stats.total_bytes, 40),
            other => panic!("unexpected monitor result: {:?}", other),
        }

        let manifest = ctx.store().read().await.unwrap();
        assert_eq!(manifest.stats.total_bytes, 40);
        // Quick runs keep the per-category breakdown from the last sweep
        assert_eq!(manifest.stats.categories[&Category::Tv].bytes, 40);
        assert!(manifest.last_run.contains_key(&JobKind::Monitor));
    }

    #[tokio::test]
    async fn test_rollback_job() {
        let f = Fixture::new();
        f.write("tv/a.mkv", 40);
        let (ctx, recorder) = f.context();
        run_sweep(&ctx, JobKind::Sweep, Trigger::Manual).await.unwrap();

        let report = rollback(&ctx, false).await.unwrap();

        assert_eq!(report.links_removed, 1);
        let manifest = ctx.store().read().await.unwrap();
        assert_eq!(manifest.status, Status::Inactive);
        assert!(manifest.last_run.contains_key(&JobKind::Rollback));
        assert!(recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.contains("rolled back")));

        // Scheduled jobs stay off after a rollback
        assert!(matches!(
            run_sweep(&ctx, JobKind::Sweep, Trigger::Scheduled).await.unwrap(),
            JobOutcome::Skipped(SkipCause::Status(Status::Inactive))
        ));

        // A manual sweep repopulates and hands the cache back to the schedule
        run_sweep(&ctx, JobKind::Sweep, Trigger::Manual).await.unwrap();
        let manifest = ctx.store().read().await.unwrap();
        assert_eq!(manifest.status, Status::Active);
        assert_eq!(manifest.entries.len(), 1);
    }
}
