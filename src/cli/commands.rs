//! Command handlers for the media cache CLI
//!
//! This module implements the command handlers that turn parsed arguments
//! into job runs and print their outcome. Scheduled runs print nothing; cron
//! mails whatever a job writes to stdout.

use std::io::{self, Write};
use std::path::PathBuf;

use tracing::{info, warn};

use crate::app::cache::format_bytes;
use crate::app::jobs::{self, JobContext, JobOutcome, MonitorResult, SkipCause, SweepSummary};
use crate::app::monitor::FullReport;
use crate::app::models::Category;
use crate::cli::{ClearArgs, ConfigAction, MonitorArgs, MountAction, RollbackArgs, SweepArgs};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Handle the status command
pub async fn handle_status(ctx: &JobContext) -> Result<()> {
    let manifest = ctx.store().read().await?;

    println!("📦 Media Cache Status");
    println!("====================");
    println!("Status:      {}", manifest.status);
    println!("Cache root:  {}", ctx.config().paths.cache_root.display());
    println!("Manifest:    {}", ctx.store().path().display());
    match manifest.last_update {
        Some(at) => println!("Last update: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last update: never"),
    }
    println!(
        "Links:       {} valid, {} broken, {}",
        manifest.stats.valid_links,
        manifest.stats.broken_links,
        format_bytes(manifest.stats.total_bytes)
    );
    println!("Ledger:      {} entries", manifest.entries.len());

    if !manifest.last_run.is_empty() {
        println!();
        println!("Last runs:");
        for (job, run) in &manifest.last_run {
            println!(
                "  {:<9} {} {:?}: {}",
                job.as_str(),
                run.finished_at.format("%Y-%m-%d %H:%M"),
                run.outcome,
                run.summary
            );
        }
    }

    if let Some(rollback) = &manifest.rollback {
        println!();
        println!(
            "Last rollback reached '{}' at {}",
            rollback.phase,
            rollback.at.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

/// Handle the enable command
pub async fn handle_enable(ctx: &JobContext) -> Result<()> {
    let cron = jobs::enable(ctx).await?;
    println!("✅ Cache enabled");
    match cron {
        Some(path) => println!("   Schedule installed at {}", path.display()),
        None => println!("   No cron_file configured; schedule the jobs yourself"),
    }
    Ok(())
}

/// Handle the disable command
pub async fn handle_disable(ctx: &JobContext) -> Result<()> {
    let removed = jobs::disable(ctx).await?;
    println!("⏸️  Cache disabled; existing links stay in place");
    if removed {
        println!("   Schedule removed");
    }
    Ok(())
}

/// Handle the sweep command
pub async fn handle_sweep(ctx: &JobContext, args: SweepArgs) -> Result<()> {
    let trigger = args.trigger();
    for job in args.job.jobs() {
        info!("Executing {} job", job);
        match jobs::run_sweep(ctx, job, trigger).await? {
            JobOutcome::Completed(summary) if !trigger.is_scheduled() => print_sweep(&summary),
            JobOutcome::Completed(_) => {}
            JobOutcome::Skipped(cause) if !trigger.is_scheduled() => print_skip(job.as_str(), cause),
            JobOutcome::Skipped(_) => {}
        }
    }
    Ok(())
}

fn print_sweep(summary: &SweepSummary) {
    println!("🔄 {} sweep: {}", summary.job, summary.line());
    for c in &summary.categories {
        println!(
            "  {:<10} {:>4} entries  {:>10} / {:<10}  +{} -{} ~{}  {} skipped  {} failed",
            c.category.as_str(),
            c.entries,
            format_bytes(c.bytes),
            format_bytes(c.max_bytes),
            c.admitted,
            c.evicted,
            c.repointed,
            c.skipped,
            c.failed
        );
    }
}

fn print_skip(job: &str, cause: SkipCause) {
    match cause {
        SkipCause::AlreadyRunning => println!("ℹ️  {} is already running", job),
        SkipCause::Status(status) => {
            println!("ℹ️  Cache is {}; {} did nothing", status, job)
        }
    }
}

/// Handle the monitor command
pub async fn handle_monitor(ctx: &JobContext, args: MonitorArgs) -> Result<()> {
    let trigger = args.trigger();
    let outcome = jobs::run_monitor(ctx, args.quick, trigger).await?;
    if trigger.is_scheduled() {
        return Ok(());
    }

    match outcome {
        JobOutcome::Completed(MonitorResult::Quick(stats)) => {
            println!(
                "📊 {} valid links, {} broken, {}",
                stats.valid_links,
                stats.broken_links,
                format_bytes(stats.total_bytes)
            );
        }
        JobOutcome::Completed(MonitorResult::Full(report)) => print_report(&report),
        JobOutcome::Skipped(cause) => print_skip("monitor", cause),
    }
    Ok(())
}

fn print_report(report: &FullReport) {
    println!("📊 Media Cache Report");
    println!("====================");
    println!("Status:         {}", report.status);
    println!("Consumer mount: {}", report.mount);
    println!(
        "Links:          {} valid, {} broken, {}",
        report.stats.valid_links,
        report.stats.broken_links,
        report.stats.format_total_size()
    );
    println!();
    println!(
        "{:<10} {:>7} {:>6} {:>10} {:>10} {:>7} {:>7}",
        "category", "links", "broken", "size", "budget", "used", "recent"
    );
    for c in &report.categories {
        let name = if c.enabled {
            c.category.as_str().to_string()
        } else {
            format!("{} (off)", c.category)
        };
        println!(
            "{:<10} {:>7} {:>6} {:>10} {:>10} {:>6.1}% {:>7}",
            name,
            c.links,
            c.broken,
            format_bytes(c.bytes),
            format_bytes(c.budget.max_bytes),
            c.usage_percent(),
            c.recent_accesses
        );
    }

    if !report.recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for recommendation in &report.recommendations {
            let marker = if recommendation.is_warning() { "⚠️ " } else { "💡" };
            println!("  {} {}", marker, recommendation);
        }
    }
}

/// Handle the clear command
pub async fn handle_clear(ctx: &JobContext, args: ClearArgs) -> Result<()> {
    if !confirm(
        &format!("Remove every link in '{}'?", args.category),
        args.yes,
    )? {
        println!("Aborted");
        return Ok(());
    }

    let removed = jobs::clear(ctx, args.category).await?;
    println!("🧹 Removed {} links from {}", removed, args.category);
    Ok(())
}

/// Handle the usage command
pub async fn handle_usage(ctx: &JobContext) -> Result<()> {
    let stats = jobs::usage(ctx).await?;

    println!("💾 Cache Usage");
    println!("=============");
    println!("Location: {}", stats.cache_root.display());
    for category in Category::ALL {
        let usage = stats.category(category);
        let budget = ctx.config().categories.get(category).budget();
        println!(
            "  {:<10} {:>10} / {:<10} ({:>5.1}%)  {} links",
            category.as_str(),
            format_bytes(usage.bytes),
            format_bytes(budget.max_bytes),
            budget.usage_percentage(usage.bytes),
            usage.links
        );
    }
    println!("Total: {}", stats.format_total_size());
    Ok(())
}

/// Handle the health command
pub async fn handle_health(ctx: &JobContext, fix: bool) -> Result<()> {
    let report = jobs::health(ctx, fix).await?;

    println!("🩺 Cache Health");
    println!("==============");
    println!("Links on disk:      {}", report.links);
    println!("Broken links:       {}", report.broken.len());
    println!("Untracked links:    {}", report.untracked);
    println!("Missing links:      {}", report.missing);

    for link in report.broken.iter().take(20) {
        println!("  ✗ {} -> {}", link.link.display(), link.target.display());
    }
    if report.broken.len() > 20 {
        println!("  ... and {} more", report.broken.len() - 20);
    }

    if fix {
        println!();
        println!(
            "🔧 Removed {} broken links and {} temporary links; ledger reconciled",
            report.removed, report.temp_cleaned
        );
    } else if report.is_healthy() {
        println!("✅ No problems found");
    } else {
        println!("💡 Run 'media_cache health --fix' to repair");
    }
    Ok(())
}

/// Handle the top command
pub async fn handle_top(ctx: &JobContext, limit: usize, category: Option<Category>) -> Result<()> {
    let entries = jobs::top(ctx, limit, category).await?;
    if entries.is_empty() {
        println!("ℹ️  No cached entries");
        return Ok(());
    }

    for (i, entry) in entries.iter().enumerate() {
        println!(
            "{:>3}. {:>10}  {:<9} {}",
            i + 1,
            format_bytes(entry.size_bytes),
            entry.category.as_str(),
            entry.source_path.display()
        );
    }
    Ok(())
}

/// Handle the rollback command
pub async fn handle_rollback(ctx: &JobContext, args: RollbackArgs) -> Result<()> {
    println!("⚠️  Rollback removes every cache link and stops the schedule.");
    if !confirm("Continue with rollback?", args.yes)? {
        println!("Aborted");
        return Ok(());
    }

    let detach = args.detach_mount
        && confirm("Detach the consumer media server mount as well?", args.yes)?;

    let report = jobs::rollback(ctx, detach).await?;
    println!("✅ {}", report.summary());
    Ok(())
}

/// Handle mount control
pub async fn handle_mount(ctx: &JobContext, action: MountAction) -> Result<()> {
    match action {
        MountAction::Status => {
            println!("Consumer mount: {}", ctx.mount().status().await?);
        }
        MountAction::Attach { yes } => {
            if confirm("Attach the cache to the consumer media server?", yes)? {
                info!("Operator attaching consumer mount");
                ctx.mount().attach().await?;
                println!("✅ Consumer mount attached");
            }
        }
        MountAction::Detach { yes } => {
            if confirm("Detach the cache from the consumer media server?", yes)? {
                info!("Operator detaching consumer mount");
                ctx.mount().detach().await?;
                println!("✅ Consumer mount detached");
            }
        }
    }
    Ok(())
}

/// Handle configuration management
///
/// Runs before a context exists so `config init` works without a config.
pub async fn handle_config(action: ConfigAction, config: &AppConfig) -> Result<()> {
    match action {
        ConfigAction::Init { path } => {
            let path: PathBuf = match path {
                Some(path) => path,
                None => AppConfig::default_config_path()?,
            };
            if AppConfig::write_default(&path).await? {
                println!("✅ Wrote default configuration to {}", path.display());
            } else {
                println!("ℹ️  {} already exists; left unchanged", path.display());
            }
        }
        ConfigAction::Show => {
            let text = toml::to_string_pretty(config)
                .map_err(|e| AppError::generic(format!("cannot render configuration: {}", e)))?;
            println!("{}", text);
        }
    }
    Ok(())
}

/// Ask the operator; `--yes` answers for them, and without a terminal the
/// answer is no
fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    if !atty::is(atty::Stream::Stdin) {
        warn!("No terminal to confirm '{}'; pass --yes", prompt);
        println!("Not confirmed (no terminal); pass --yes to proceed");
        return Ok(false);
    }

    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;

    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(matches!(response.trim().to_lowercase().as_str(), "y" | "yes"))
}
