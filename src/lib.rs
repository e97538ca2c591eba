//! Media Cache Library
//!
//! A bounded, tiered, symlink-based acceleration cache for a NAS-resident
//! media library. Files are promoted onto fast local storage as symlinks
//! under per-category budgets, never copied, and the whole cache can be
//! rolled back without touching the library.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use constants::*;

    #[test]
    fn test_constants_accessible() {
        assert_eq!(SCHEMA_VERSION, 2);
        assert_eq!(files::MANIFEST_FILE, "manifest.json");
        assert!(USER_AGENT.starts_with("media-cache/"));
    }

    #[test]
    fn test_error_types() {
        let lock_error = errors::LockError::Held {
            job: "sweep".to_string(),
            path: std::path::PathBuf::from("/var/lib/media-cache/locks/sweep.lock"),
        };
        let app_error = AppError::Lock(lock_error);

        assert_eq!(app_error.category(), "lock");
        assert!(app_error.is_recoverable());
        assert!(!app_error.is_precondition());
    }
}
