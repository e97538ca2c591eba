//! Application constants for the media cache
//!
//! This module centralizes all constants used throughout the application,
//! organized by functional domain.

use std::time::Duration;

/// Environment variable names
pub mod env {
    /// Overrides `notify.webhook_url`
    pub const WEBHOOK_URL: &str = "MEDIA_CACHE_WEBHOOK_URL";

    /// Overrides `popularity.url`
    pub const POPULARITY_URL: &str = "MEDIA_CACHE_POPULARITY_URL";

    /// Log filter, same syntax as `RUST_LOG`
    pub const LOG: &str = "MEDIA_CACHE_LOG";
}

/// File and directory names under the state directory
pub mod files {
    /// Manifest document name
    pub const MANIFEST_FILE: &str = "manifest.json";

    /// Lock directory name
    pub const LOCK_DIR: &str = "locks";

    /// Log directory name
    pub const LOG_DIR: &str = "logs";

    /// Lock file extension
    pub const LOCK_EXTENSION: &str = "lock";

    /// Name of the lock serializing manifest updates
    pub const MANIFEST_LOCK: &str = "manifest";

    /// Prefix for temporary links created during atomic re-pointing
    pub const TEMP_LINK_PREFIX: &str = ".mc-tmp-";

    /// Application directory name under the OS config/data dirs
    pub const APP_DIR: &str = "media-cache";

    /// Config file name
    pub const CONFIG_FILE: &str = "config.toml";

    /// Project-local config file name
    pub const LOCAL_CONFIG_FILE: &str = "media-cache.toml";
}

/// Manifest schema constants
pub mod manifest {
    /// Current manifest schema version
    pub const SCHEMA_VERSION: u32 = 2;

    /// Maximum attempts when waiting for the manifest lock
    pub const LOCK_MAX_RETRIES: u32 = 40;

    /// Initial backoff when waiting for the manifest lock
    pub const LOCK_INITIAL_BACKOFF_MS: u64 = 25;

    /// Maximum backoff when waiting for the manifest lock
    pub const LOCK_MAX_BACKOFF_MS: u64 = 1000;
}

/// Scanner defaults
pub mod scan {
    /// Default media extensions admitted by the scanner
    pub const DEFAULT_EXTENSIONS: &[&str] = &[
        "mkv", "mp4", "m4v", "avi", "mov", "ts", "wmv", "webm", "mpg", "mpeg", "srt",
    ];
}

/// Category budget defaults
pub mod budgets {
    /// 1 GiB
    pub const GIB: u64 = 1024 * 1024 * 1024;

    /// Default per-category budget
    pub const DEFAULT_MAX_BYTES: u64 = 100 * GIB;

    /// Default per-file cap
    pub const DEFAULT_MAX_FILE_BYTES: u64 = 20 * GIB;

    /// Default retention window in days
    pub const DEFAULT_RETENTION_DAYS: u32 = 30;

    /// Default age filter for the recent and downloads categories
    pub const DEFAULT_RECENT_MAX_AGE_DAYS: u32 = 14;
}

/// Monitor thresholds
pub mod monitor {
    /// A category with fewer entries than this is reported as underused
    pub const UNDERUSED_ENTRY_THRESHOLD: usize = 5;

    /// More broken links than this triggers a recommendation
    pub const BROKEN_LINK_THRESHOLD: usize = 10;

    /// Budget usage at or above this percentage is reported as near full
    pub const NEAR_BUDGET_PERCENT: f64 = 95.0;

    /// Window for counting recently accessed entries
    pub const RECENT_ACCESS_DAYS: u32 = 7;
}

/// External collaborator limits
pub mod external {
    use super::Duration;

    /// Popularity provider request timeout
    pub const POPULARITY_TIMEOUT: Duration = Duration::from_secs(15);

    /// Maximum ranked titles requested from the popularity provider
    pub const POPULARITY_LIMIT: usize = 50;

    /// Notification attempts before giving up
    pub const NOTIFY_ATTEMPTS: u32 = 3;

    /// Fixed delay between notification attempts
    pub const NOTIFY_BACKOFF: Duration = Duration::from_secs(2);

    /// Per-attempt notification timeout
    pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

    /// Mount command timeout
    pub const MOUNT_TIMEOUT: Duration = Duration::from_secs(60);

    /// User agent for outbound requests
    pub const USER_AGENT: &str = concat!("media-cache/", env!("CARGO_PKG_VERSION"));
}

/// Log file rotation
pub mod logging {
    /// Rotate a job log once it grows past this size
    pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

    /// Rotated generations kept per job log
    pub const MAX_LOG_FILES: usize = 5;
}

/// Schedule defaults, in cron syntax
pub mod schedule {
    /// Admission sweep cadence
    pub const SWEEP_CRON: &str = "0 */6 * * *";

    /// Recency sweep cadence
    pub const RECENT_CRON: &str = "*/30 * * * *";

    /// Quick monitor cadence
    pub const MONITOR_CRON: &str = "* * * * *";
}

// Re-export commonly used constants at module level for convenience
pub use external::USER_AGENT;
pub use manifest::SCHEMA_VERSION;
