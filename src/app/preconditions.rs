//! Precondition checks run before any mutation
//!
//! A failure here is the only kind of error that turns into a non-zero exit:
//! the library is not reachable, the cache root would link into itself, or a
//! configured external command is missing.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::app::mount::CommandMount;
use crate::config::AppConfig;
use crate::errors::PreconditionError;

/// Every library root exists, is a directory and carries the mount marker
pub fn check_library(roots: &[PathBuf], marker: Option<&str>) -> Result<(), PreconditionError> {
    for root in roots {
        if !root.is_dir() {
            return Err(PreconditionError::LibraryNotMounted { path: root.clone() });
        }
        if let Some(marker) = marker {
            if !root.join(marker).exists() {
                return Err(PreconditionError::MountMarkerMissing {
                    root: root.clone(),
                    marker: marker.to_string(),
                });
            }
        }
        debug!("Library root available: {}", root.display());
    }
    Ok(())
}

/// The cache root does not live inside any library root
pub fn check_cache_placement(cache_root: &Path, roots: &[PathBuf]) -> Result<(), PreconditionError> {
    match roots.iter().find(|root| cache_root.starts_with(root)) {
        Some(root) => Err(PreconditionError::CacheInsideLibrary {
            cache_root: cache_root.to_path_buf(),
            library_root: root.clone(),
        }),
        None => Ok(()),
    }
}

/// Each program is on `PATH` or is an existing path
pub fn check_programs<I, S>(programs: I) -> Result<(), PreconditionError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for program in programs {
        let program = program.as_ref();
        if which::which(program).is_err() {
            return Err(PreconditionError::CommandMissing {
                program: program.to_string(),
            });
        }
    }
    Ok(())
}

/// Everything a mutating job needs
pub fn check_all(config: &AppConfig) -> Result<(), PreconditionError> {
    let roots = config.all_source_roots();
    check_library(&roots, config.library.mount_marker.as_deref())?;
    check_cache_placement(&config.paths.cache_root, &roots)?;
    check_programs(CommandMount::from_config(&config.mount).required_programs())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_library_checks() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();

        assert!(check_library(&[root.clone()], None).is_ok());
        assert!(matches!(
            check_library(&[root.clone()], Some(".mounted")),
            Err(PreconditionError::MountMarkerMissing { .. })
        ));

        std::fs::write(root.join(".mounted"), b"").unwrap();
        assert!(check_library(&[root.clone()], Some(".mounted")).is_ok());

        assert!(matches!(
            check_library(&[root.join("absent")], None),
            Err(PreconditionError::LibraryNotMounted { .. })
        ));
    }

    #[test]
    fn test_cache_placement() {
        let roots = vec![PathBuf::from("/mnt/nas/movies")];
        assert!(check_cache_placement(Path::new("/srv/cache"), &roots).is_ok());
        assert!(matches!(
            check_cache_placement(Path::new("/mnt/nas/movies/.cache"), &roots),
            Err(PreconditionError::CacheInsideLibrary { .. })
        ));
    }

    #[test]
    fn test_program_checks() {
        assert!(check_programs(["sh"]).is_ok());
        assert!(matches!(
            check_programs(["definitely-not-a-real-program-xyz"]),
            Err(PreconditionError::CommandMissing { .. })
        ));
    }
}
