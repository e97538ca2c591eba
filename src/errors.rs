//! Error types for the media cache
//!
//! This module defines error types for all components of the application.
//! Errors are split by concern so that per-item failures (which are logged
//! and skipped) never get confused with precondition failures (which abort
//! a job before it mutates anything).

use std::path::PathBuf;
use thiserror::Error;

use crate::app::models::Category;

/// Precondition failures: fatal, detected before any mutation
#[derive(Error, Debug)]
pub enum PreconditionError {
    /// A library root is missing or not a directory
    #[error("Library root not reachable: {path}. Is the NAS mounted?")]
    LibraryNotMounted { path: PathBuf },

    /// The configured mount marker file is absent from a library root
    #[error("Mount marker {marker} missing under {root}. Is the NAS mounted?")]
    MountMarkerMissing { root: PathBuf, marker: String },

    /// The cache root lives inside a library root, which would self-reference
    #[error("Cache root {cache_root} must not be inside library root {library_root}")]
    CacheInsideLibrary {
        cache_root: PathBuf,
        library_root: PathBuf,
    },

    /// An external program required by the configuration is not installed
    #[error("Required external command not found: {program}")]
    CommandMissing { program: String },
}

/// Source scanning errors
#[derive(Error, Debug)]
pub enum ScanError {
    /// Root directory does not exist
    #[error("Scan root not found: {path}")]
    RootNotFound { path: PathBuf },

    /// I/O error while reading a file's metadata
    #[error("Failed to stat {path}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Manifest persistence errors
#[derive(Error, Debug)]
pub enum ManifestError {
    /// I/O error reading or writing the manifest
    #[error("I/O error on manifest {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON parsing error
    #[error("JSON parsing error in manifest")]
    JsonParse(#[from] serde_json::Error),

    /// Manifest corruption detected
    #[error("Manifest corruption detected: {reason}")]
    Corruption { reason: String },

    /// Manifest was written by a newer schema than this build understands
    #[error("Manifest schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Atomic replace failed
    #[error("Atomic manifest replace failed for {path}")]
    AtomicReplaceFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not take the manifest lock
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Cache directory errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache directory not found or inaccessible
    #[error("Cache directory not accessible: {path}")]
    DirectoryNotAccessible { path: PathBuf },

    /// Symlink creation failed
    #[error("Failed to create link {link} -> {target}")]
    LinkFailed {
        link: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Symlink removal failed
    #[error("Failed to remove link {link}")]
    UnlinkFailed {
        link: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A path that should be a symlink is a regular file or directory
    #[error("Refusing to touch non-symlink inside cache: {path}")]
    NotASymlink { path: PathBuf },

    /// Link target is itself inside the cache root
    #[error("Refusing to link {target}: target is inside the cache root")]
    SelfReference { target: PathBuf },

    /// Link target path carries `..` components
    #[error("Refusing to link {target}: path is not normalized")]
    UnnormalizedTarget { target: PathBuf },

    /// Link path escapes the category directory
    #[error("Link path {link} is outside category {category}")]
    OutsideCategory { link: PathBuf, category: Category },

    /// Generic I/O error
    #[error("Cache I/O error")]
    Io(#[from] std::io::Error),
}

/// Concurrency guard errors
#[derive(Error, Debug)]
pub enum LockError {
    /// Lock is held by another process
    #[error("Job '{job}' is already running (lock held: {path})")]
    Held { job: String, path: PathBuf },

    /// Lock was not acquired within the wait budget
    #[error("Timed out after {seconds} seconds waiting for lock {path}")]
    Timeout { path: PathBuf, seconds: u64 },

    /// Lock file could not be opened
    #[error("Failed to open lock file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Popularity provider errors
#[derive(Error, Debug)]
pub enum PopularityError {
    /// HTTP request failed
    #[error("Popularity request failed")]
    Http(#[from] reqwest::Error),

    /// Server returned error status
    #[error("Popularity server error: HTTP {status}")]
    ServerError { status: u16 },

    /// Request timed out
    #[error("Popularity request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },
}

/// Notification channel errors
#[derive(Error, Debug)]
pub enum NotifyError {
    /// HTTP request failed
    #[error("Notification request failed")]
    Http(#[from] reqwest::Error),

    /// Server returned error status
    #[error("Notification endpoint returned HTTP {status}")]
    ServerError { status: u16 },

    /// All attempts exhausted
    #[error("Notification not delivered after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Consumer mount errors
#[derive(Error, Debug)]
pub enum MountError {
    /// No command configured for the requested action
    #[error("No mount {action} command configured")]
    NotConfigured { action: &'static str },

    /// Command could not be spawned
    #[error("Failed to run mount command '{command}'")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Command exited non-zero
    #[error("Mount command '{command}' failed with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    /// Command exceeded its timeout
    #[error("Mount command '{command}' timed out after {seconds} seconds")]
    Timeout { command: String, seconds: u64 },
}

/// Schedule control errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    /// Cron fragment could not be written or removed
    #[error("Failed to update cron file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The running binary path could not be determined
    #[error("Cannot determine executable path for schedule entries")]
    NoExecutable(#[source] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Configuration file could not be read or written
    #[error("Failed to access configuration file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<String> },

    /// Could not determine the user config directory
    #[error("Could not determine user config directory")]
    NoConfigDir,
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Precondition error
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// Scan error
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Manifest error
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Lock error
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Popularity error
    #[error(transparent)]
    Popularity(#[from] PopularityError),

    /// Notification error
    #[error(transparent)]
    Notify(#[from] NotifyError),

    /// Mount error
    #[error(transparent)]
    Mount(#[from] MountError),

    /// Schedule error
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Whether this error was detected before any mutation took place
    pub fn is_precondition(&self) -> bool {
        matches!(self, AppError::Precondition(_) | AppError::Config(_))
    }

    /// Check if the error is transient and worth retrying on the next run
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Lock(LockError::Held { .. })
            | AppError::Lock(LockError::Timeout { .. })
            | AppError::Popularity(_)
            | AppError::Notify(_)
            | AppError::Mount(MountError::Timeout { .. }) => true,

            AppError::Precondition(_)
            | AppError::Config(_)
            | AppError::Manifest(ManifestError::Corruption { .. })
            | AppError::Manifest(ManifestError::UnsupportedVersion { .. }) => false,

            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Precondition(_) => "precondition",
            AppError::Scan(_) => "scan",
            AppError::Manifest(_) => "manifest",
            AppError::Cache(_) => "cache",
            AppError::Lock(_) => "lock",
            AppError::Popularity(_) => "popularity",
            AppError::Notify(_) => "notify",
            AppError::Mount(_) => "mount",
            AppError::Schedule(_) => "schedule",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Scan result type alias
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Manifest result type alias
pub type ManifestResult<T> = std::result::Result<T, ManifestError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Lock result type alias
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Popularity result type alias
pub type PopularityResult<T> = std::result::Result<T, PopularityError>;

/// Notification result type alias
pub type NotifyResult<T> = std::result::Result<T, NotifyError>;

/// Mount result type alias
pub type MountResult<T> = std::result::Result<T, MountError>;

/// Schedule result type alias
pub type ScheduleResult<T> = std::result::Result<T, ScheduleError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_classification() {
        let err = AppError::from(PreconditionError::LibraryNotMounted {
            path: PathBuf::from("/mnt/nas/movies"),
        });
        assert!(err.is_precondition());
        assert!(!err.is_recoverable());
        assert_eq!(err.category(), "precondition");
        assert!(err.to_string().contains("/mnt/nas/movies"));
    }

    #[test]
    fn test_lock_held_is_recoverable() {
        let err = AppError::from(LockError::Held {
            job: "sweep".to_string(),
            path: PathBuf::from("/var/lib/media-cache/locks/sweep.lock"),
        });
        assert!(err.is_recoverable());
        assert!(!err.is_precondition());
        assert_eq!(err.category(), "lock");
    }

    #[test]
    fn test_manifest_lock_error_wraps() {
        let err = ManifestError::from(LockError::Timeout {
            path: PathBuf::from("manifest.lock"),
            seconds: 30,
        });
        assert!(err.to_string().contains("30 seconds"));
    }
}
