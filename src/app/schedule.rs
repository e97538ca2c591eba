//! Schedule control
//!
//! Jobs are started by the OS scheduler, never by an in-process timer. When
//! `schedule.cron_file` is configured, enabling the cache writes a cron
//! fragment that invokes this binary in `--scheduled` mode, and disabling or
//! rolling back removes it. Without a cron file, scheduling is left to the
//! operator and these calls do nothing.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::config::ScheduleConfig;
use crate::errors::{ScheduleError, ScheduleResult};

const HEADER: &str = "# Managed by media_cache; removed by `media_cache disable` and `media_cache rollback`";

/// Writes and removes the cron fragment
#[derive(Debug, Clone)]
pub struct ScheduleControl {
    config: ScheduleConfig,
    executable: PathBuf,
    config_file: Option<PathBuf>,
}

impl ScheduleControl {
    /// Control for the running binary
    pub fn new(config: &ScheduleConfig, config_file: Option<PathBuf>) -> ScheduleResult<Self> {
        let executable = std::env::current_exe().map_err(ScheduleError::NoExecutable)?;
        Ok(Self::with_executable(config, executable, config_file))
    }

    /// Control invoking a specific executable
    pub fn with_executable(
        config: &ScheduleConfig,
        executable: PathBuf,
        config_file: Option<PathBuf>,
    ) -> Self {
        Self {
            config: config.clone(),
            executable,
            config_file,
        }
    }

    /// Cron fragment path, if scheduling is managed here
    pub fn cron_file(&self) -> Option<&Path> {
        self.config.cron_file.as_deref()
    }

    /// Fragment content
    pub fn render(&self) -> String {
        let mut invocation = self.executable.display().to_string();
        if let Some(config_file) = &self.config_file {
            invocation.push_str(&format!(" --config {}", config_file.display()));
        }
        let user = self
            .config
            .user
            .as_ref()
            .map(|u| format!("{} ", u))
            .unwrap_or_default();

        let mut content = format!("{}\nSHELL=/bin/sh\n", HEADER);
        for (cadence, args) in [
            (&self.config.sweep, "sweep --job sweep --scheduled"),
            (&self.config.recent, "sweep --job recent --scheduled"),
            (&self.config.monitor, "monitor --quick --scheduled"),
        ] {
            content.push_str(&format!("{} {}{} {}\n", cadence, user, invocation, args));
        }
        content
    }

    /// Write the fragment; returns its path, or `None` when unmanaged
    pub async fn install(&self) -> ScheduleResult<Option<PathBuf>> {
        let Some(path) = self.cron_file() else {
            debug!("No cron file configured; schedule is managed externally");
            return Ok(None);
        };

        let io_error = |source| ScheduleError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, self.render()).await.map_err(io_error)?;
        fs::rename(&temp_path, path).await.map_err(io_error)?;

        info!("Installed schedule at {}", path.display());
        Ok(Some(path.to_path_buf()))
    }

    /// Remove the fragment; `true` if one was removed
    pub async fn remove(&self) -> ScheduleResult<bool> {
        let Some(path) = self.cron_file() else {
            return Ok(false);
        };

        match fs::remove_file(path).await {
            Ok(()) => {
                info!("Removed schedule {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ScheduleError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Whether the fragment is present
    pub fn is_installed(&self) -> bool {
        self.cron_file().map(Path::exists).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn control(cron_file: Option<PathBuf>, user: Option<&str>) -> ScheduleControl {
        let config = ScheduleConfig {
            cron_file,
            user: user.map(String::from),
            ..Default::default()
        };
        ScheduleControl::with_executable(
            &config,
            PathBuf::from("/usr/local/bin/media_cache"),
            Some(PathBuf::from("/etc/media-cache/config.toml")),
        )
    }

    #[test]
    fn test_render_includes_every_job() {
        let content = control(None, Some("media")).render();
        assert!(content.contains(
            "0 */6 * * * media /usr/local/bin/media_cache --config /etc/media-cache/config.toml sweep --job sweep --scheduled"
        ));
        assert!(content.contains("sweep --job recent --scheduled"));
        assert!(content.contains("monitor --quick --scheduled"));
    }

    #[tokio::test]
    async fn test_install_and_remove_are_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let cron = temp_dir.path().join("cron.d/media-cache");
        let control = control(Some(cron.clone()), None);

        assert!(!control.is_installed());
        assert_eq!(control.install().await.unwrap(), Some(cron.clone()));
        assert_eq!(control.install().await.unwrap(), Some(cron.clone()));
        assert!(control.is_installed());

        assert!(control.remove().await.unwrap());
        assert!(!control.remove().await.unwrap());
        assert!(!cron.exists());
    }

    #[tokio::test]
    async fn test_unmanaged_schedule_is_noop() {
        let control = control(None, None);
        assert_eq!(control.install().await.unwrap(), None);
        assert!(!control.remove().await.unwrap());
        assert!(!control.is_installed());
    }
}
