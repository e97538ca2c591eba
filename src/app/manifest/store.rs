//! Manifest persistence
//!
//! Reads return the document on disk, or a default `not_initialized`
//! document if there is none. Updates are read-modify-write under the
//! manifest lock and land via temp file plus rename, so a crash never leaves
//! a truncated document and concurrent jobs serialize instead of racing.
//! Nothing is cached between calls.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::app::lock::{ConcurrencyGuard, RetryPolicy};
use crate::app::models::JobKind;
use crate::constants::{files, SCHEMA_VERSION};
use crate::errors::{ManifestError, ManifestResult};

use super::types::{JobRun, Manifest, Stats, Status};

/// Fields understood by the current schema
const KNOWN_FIELDS: &[&str] = &[
    "version",
    "status",
    "stats",
    "last_update",
    "last_run",
    "entries",
    "rollback",
];

/// Reads and atomically updates the manifest document
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
    guard: ConcurrencyGuard,
    policy: RetryPolicy,
}

impl ManifestStore {
    /// Store for the document at `path`, locking through `guard`
    pub fn new(path: impl Into<PathBuf>, guard: ConcurrencyGuard) -> Self {
        Self {
            path: path.into(),
            guard,
            policy: RetryPolicy::default(),
        }
    }

    /// Override the lock retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Document path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current document, or the default if none exists yet
    ///
    /// # Errors
    ///
    /// A document that exists but cannot be parsed or migrated is an error.
    pub async fn read(&self) -> ManifestResult<Manifest> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No manifest at {}, using defaults", self.path.display());
                return Ok(Manifest::default());
            }
            Err(source) => {
                return Err(ManifestError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        parse_manifest(&content)
    }

    /// Read, mutate and atomically write the document under the manifest lock
    ///
    /// Returns whatever the mutator returns. `last_update` is stamped on
    /// every write.
    pub async fn update<F, T>(&self, mutator: F) -> ManifestResult<T>
    where
        F: FnOnce(&mut Manifest) -> T,
    {
        let _lock = self
            .guard
            .acquire_blocking(files::MANIFEST_LOCK, self.policy)
            .await?;

        let mut manifest = self.read().await?;
        let result = mutator(&mut manifest);
        manifest.version = SCHEMA_VERSION;
        manifest.last_update = Some(Utc::now());
        manifest.normalize_entries();

        self.write_atomic(&manifest).await?;
        Ok(result)
    }

    /// Set the status
    pub async fn set_status(&self, status: Status) -> ManifestResult<Status> {
        self.update(|m| {
            let previous = m.status;
            m.status = status;
            previous
        })
        .await
        .map(|previous| {
            if previous != status {
                info!("Cache status changed: {} -> {}", previous, status);
            }
            previous
        })
    }

    /// Record a job's run
    pub async fn record_run(&self, job: JobKind, run: JobRun) -> ManifestResult<()> {
        self.update(|m| m.record_run(job, run)).await
    }

    /// Replace the stored statistics
    pub async fn store_stats(&self, stats: Stats) -> ManifestResult<()> {
        self.update(|m| m.stats = stats).await
    }

    async fn write_atomic(&self, manifest: &Manifest) -> ManifestResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|source| ManifestError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }

        let content = serde_json::to_vec_pretty(manifest)?;
        let temp_path = self.temp_path();

        let write = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&content).await?;
            file.write_all(b"\n").await?;
            file.sync_all().await
        };
        if let Err(source) = write.await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(ManifestError::Io {
                path: temp_path,
                source,
            });
        }

        if let Err(source) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(ManifestError::AtomicReplaceFailed {
                path: self.path.clone(),
                source,
            });
        }

        debug!("Wrote manifest {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| files::MANIFEST_FILE.to_string());
        self.path
            .with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
    }
}

/// Parse a manifest document of any supported schema version
pub fn parse_manifest(content: &str) -> ManifestResult<Manifest> {
    if content.trim().is_empty() {
        return Err(ManifestError::Corruption {
            reason: "document is empty".to_string(),
        });
    }

    let value: Value = serde_json::from_str(content)?;
    migrate(value)
}

/// Bring a parsed document up to the current schema
pub fn migrate(value: Value) -> ManifestResult<Manifest> {
    let Value::Object(object) = &value else {
        return Err(ManifestError::Corruption {
            reason: "document is not a JSON object".to_string(),
        });
    };

    let version = match object.get("version") {
        None => 1,
        Some(v) => v
            .as_u64()
            .map(|v| v as u32)
            .ok_or_else(|| ManifestError::Corruption {
                reason: format!("invalid version field: {}", v),
            })?,
    };

    if version > SCHEMA_VERSION {
        return Err(ManifestError::UnsupportedVersion {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    if version < 2 {
        info!("Migrating manifest from schema v{} to v{}", version, SCHEMA_VERSION);
        return migrate_v1(object);
    }

    for key in object.keys() {
        if !KNOWN_FIELDS.contains(&key.as_str()) {
            debug!("Dropping unknown manifest field '{}'", key);
        }
    }

    Ok(serde_json::from_value(value)?)
}

/// Version 1: flat keys, no ledger, free-form status strings
fn migrate_v1(object: &serde_json::Map<String, Value>) -> ManifestResult<Manifest> {
    let mut manifest = Manifest::default();

    if let Some(status) = object.get("status").and_then(Value::as_str) {
        manifest.status = Status::from_legacy(status).unwrap_or_else(|| {
            warn!("Unknown legacy status '{}', treating as not_initialized", status);
            Status::NotInitialized
        });
    }

    manifest.last_update = object.get("last_update").and_then(parse_timestamp);

    if let Some(stats) = object.get("stats").and_then(Value::as_object) {
        let count = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| stats.get(*k).and_then(Value::as_u64))
                .unwrap_or(0)
        };
        manifest.stats = Stats {
            valid_links: count(&["valid_links", "total_links", "links"]) as usize,
            broken_links: count(&["broken_links", "broken"]) as usize,
            total_bytes: count(&["total_bytes", "total_size", "size_bytes"]),
            computed_at: manifest.last_update,
            ..Default::default()
        };
    }

    // Legacy per-job timestamps, e.g. "last_sweep": "2024-01-01T00:00:00Z"
    for job in [JobKind::Sweep, JobKind::Recent, JobKind::Monitor] {
        let key = format!("last_{}", job.as_str());
        if let Some(at) = object.get(&key).and_then(parse_timestamp) {
            manifest.record_run(
                job,
                JobRun {
                    started_at: at,
                    finished_at: at,
                    outcome: super::types::RunOutcome::Success,
                    summary: "migrated from legacy manifest".to_string(),
                },
            );
        }
    }

    Ok(manifest)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _ => None,
    }
}
