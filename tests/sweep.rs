//! End-to-end sweep behaviour against a temporary library

mod common;

use std::collections::HashSet;
use std::os::unix::fs::symlink;

use chrono::{Duration, Utc};
use media_cache::app::jobs::{
    run_sweep, CategorySummary, JobContext, JobOutcome, SkipCause, SweepSummary, Trigger,
};
use media_cache::app::manifest::Status;
use media_cache::app::models::{Category, JobKind};

use common::Library;

async fn sweep(ctx: &JobContext) -> SweepSummary {
    run_sweep(ctx, JobKind::Sweep, Trigger::Manual)
        .await
        .unwrap()
        .completed()
        .unwrap()
}

fn tv(summary: &SweepSummary) -> &CategorySummary {
    summary
        .categories
        .iter()
        .find(|c| c.category == Category::Tv)
        .unwrap()
}

/// Every ledger row has exactly one link, and the link resolves to the row's source
async fn assert_consistent(ctx: &JobContext, max_bytes: u64) {
    let manifest = ctx.store().read().await.unwrap();
    let mut seen = HashSet::new();
    for entry in &manifest.entries {
        assert!(seen.insert(entry.cache_link.clone()), "duplicate link");
        assert_eq!(std::fs::read_link(&entry.cache_link).unwrap(), entry.source_path);
        assert!(entry.source_path.exists());
    }
    assert!(manifest.category_bytes(Category::Tv) <= max_bytes);
}

#[tokio::test]
async fn test_admission_skips_what_does_not_fit() {
    let library = Library::new();
    // Equal sizes tie-break on newer mtime; write C first so A ranks ahead
    library.write("tv/C.mkv", 40);
    library.write("tv/A.mkv", 40);
    library.write("tv/B.mkv", 30);
    library.write("tv/D.mkv", 10);
    let ctx = library.context();

    let summary = sweep(&ctx).await;

    assert_eq!(tv(&summary).bytes, 80);
    assert_eq!(library.linked("tv"), vec!["A.mkv", "B.mkv", "D.mkv"]);
    assert_consistent(&ctx, 100).await;
    // Only the real files live under the library; nothing was copied
    assert!(library.root().join("tv/C.mkv").is_file());
}

#[tokio::test]
async fn test_repeated_sweeps_are_idempotent() {
    let library = Library::new();
    library.write("tv/Show/S01E01.mkv", 20);
    library.write("tv/Show/S01E02.mkv", 20);
    library.write("tv/Other/pilot.mp4", 30);
    let ctx = library.context();

    sweep(&ctx).await;
    let linked = library.linked("tv");
    let bytes = ctx.store().read().await.unwrap().category_bytes(Category::Tv);

    for _ in 0..3 {
        let summary = sweep(&ctx).await;
        assert_eq!(summary.mutations(), 0);
    }
    assert_eq!(library.linked("tv"), linked);
    assert_eq!(
        ctx.store().read().await.unwrap().category_bytes(Category::Tv),
        bytes
    );
}

#[tokio::test]
async fn test_ledger_keeps_size_from_admission() {
    let library = Library::new();
    let growing = library.write("tv/growing.mkv", 10);
    let ctx = library.context();
    sweep(&ctx).await;

    std::fs::write(&growing, vec![0u8; 60]).unwrap();
    let summary = sweep(&ctx).await;

    assert_eq!(summary.mutations(), 0);
    let manifest = ctx.store().read().await.unwrap();
    assert_eq!(manifest.entries[0].size_bytes, 10);
}

#[tokio::test]
async fn test_budget_holds_as_library_and_budget_change() {
    let mut library = Library::new();
    for i in 0..6 {
        library.write(&format!("tv/ep{}.mkv", i), 25);
    }
    let ctx = library.context();
    sweep(&ctx).await;
    assert_consistent(&ctx, 100).await;
    assert_eq!(library.linked("tv").len(), 4);

    // Oversized files never enter
    library.write("tv/huge.mkv", 150);
    sweep(&ctx).await;
    assert_consistent(&ctx, 100).await;
    assert!(!library.linked("tv").contains(&"huge.mkv".to_string()));

    // A smaller budget evicts down to the new limit
    library.config.categories.tv.max_bytes = 40;
    let shrunk = library.context();
    let summary = sweep(&shrunk).await;
    assert!(tv(&summary).evicted >= 3);
    assert_consistent(&shrunk, 40).await;
    assert_eq!(library.linked("tv").len(), 1);
}

#[tokio::test]
async fn test_sweep_heals_broken_links() {
    let library = Library::new();
    library.write("tv/a.mkv", 10);
    library.write("tv/b.mkv", 10);
    let gone = library.write("tv/c.mkv", 10);
    let ctx = library.context();
    sweep(&ctx).await;
    assert_eq!(library.linked("tv").len(), 3);

    // One source disappears, two stray broken links appear
    std::fs::remove_file(&gone).unwrap();
    let stray = library.cache_root().join("tv/Old Show");
    std::fs::create_dir_all(&stray).unwrap();
    symlink(library.root().join("tv/nope1.mkv"), stray.join("nope1.mkv")).unwrap();
    symlink(library.root().join("tv/nope2.mkv"), stray.join("nope2.mkv")).unwrap();

    let summary = sweep(&ctx).await;

    assert_eq!(summary.broken_removed, 3);
    assert_eq!(tv(&summary).admitted, 0);
    assert_eq!(library.linked("tv"), vec!["a.mkv", "b.mkv"]);
    assert_eq!(ctx.store().read().await.unwrap().entries.len(), 2);
    assert_consistent(&ctx, 100).await;
}

#[tokio::test]
async fn test_expired_entries_leave_then_return() {
    let library = Library::new();
    library.write("tv/a.mkv", 10);
    let ctx = library.context();
    sweep(&ctx).await;

    let old = Utc::now() - Duration::days(40);
    ctx.store()
        .update(move |m| {
            for entry in &mut m.entries {
                entry.added_at = old;
            }
        })
        .await
        .unwrap();

    let summary = sweep(&ctx).await;
    assert_eq!((tv(&summary).evicted, tv(&summary).admitted), (1, 0));
    assert!(library.linked("tv").is_empty());

    let summary = sweep(&ctx).await;
    assert_eq!(tv(&summary).admitted, 1);
    let manifest = ctx.store().read().await.unwrap();
    assert!(manifest.entries[0].added_at > old + Duration::days(39));
}

#[tokio::test]
async fn test_disabled_cache_is_left_alone() {
    let library = Library::new();
    library.write("tv/a.mkv", 10);
    let ctx = library.context();
    sweep(&ctx).await;

    ctx.store().set_status(Status::Disabled).await.unwrap();
    library.write("tv/b.mkv", 10);
    let before = ctx.store().read().await.unwrap();

    let outcome = run_sweep(&ctx, JobKind::Sweep, Trigger::Scheduled)
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        JobOutcome::Skipped(SkipCause::Status(Status::Disabled))
    ));
    assert_eq!(library.linked("tv"), vec!["a.mkv"]);
    let after = ctx.store().read().await.unwrap();
    assert_eq!(after.entries, before.entries);
    assert_eq!(after.last_update, before.last_update);
}
