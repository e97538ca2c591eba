//! Consumer mount control
//!
//! The cache root is exposed to the media server as a read-only mount. The
//! cache never edits the consumer's configuration; it only runs operator
//! supplied commands to query, attach or detach that mount, each bounded by
//! a timeout.

use std::fmt;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::MountConfig;
use crate::errors::{MountError, MountResult};

/// Attachment state of the consumer mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Attached,
    Detached,
    /// No status command configured
    Unknown,
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MountState::Attached => "attached",
            MountState::Detached => "detached",
            MountState::Unknown => "unknown",
        })
    }
}

/// Controls how the consumer sees the cache
#[async_trait]
pub trait ConsumerMount: Send + Sync {
    /// Current attachment state
    async fn status(&self) -> MountResult<MountState>;
    /// Expose the cache to the consumer
    async fn attach(&self) -> MountResult<()>;
    /// Withdraw the cache from the consumer
    async fn detach(&self) -> MountResult<()>;
}

/// Mount controlled by shell commands from configuration
#[derive(Debug, Clone)]
pub struct CommandMount {
    status_command: Option<String>,
    attach_command: Option<String>,
    detach_command: Option<String>,
    timeout: Duration,
}

impl CommandMount {
    pub fn from_config(config: &MountConfig) -> Self {
        Self {
            status_command: config.status_command.clone(),
            attach_command: config.attach_command.clone(),
            detach_command: config.detach_command.clone(),
            timeout: config.timeout,
        }
    }

    /// Programs the configured commands start with
    pub fn required_programs(&self) -> Vec<String> {
        [
            &self.status_command,
            &self.attach_command,
            &self.detach_command,
        ]
        .into_iter()
        .flatten()
        .filter_map(|cmd| cmd.split_whitespace().next().map(str::to_string))
        .collect()
    }

    /// Run a command through `sh -c` under the timeout
    async fn execute(&self, command: &str) -> MountResult<Output> {
        debug!("Running mount command: {}", command);
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MountError::Spawn {
                command: command.to_string(),
                source,
            })?;

        tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| MountError::Timeout {
                command: command.to_string(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|source| MountError::Spawn {
                command: command.to_string(),
                source,
            })
    }

    async fn run_checked(&self, command: &str) -> MountResult<()> {
        let output = self.execute(command).await?;
        if !output.status.success() {
            return Err(MountError::CommandFailed {
                command: command.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ConsumerMount for CommandMount {
    async fn status(&self) -> MountResult<MountState> {
        let Some(command) = &self.status_command else {
            return Ok(MountState::Unknown);
        };
        let output = self.execute(command).await?;
        Ok(if output.status.success() {
            MountState::Attached
        } else {
            MountState::Detached
        })
    }

    async fn attach(&self) -> MountResult<()> {
        let command = self
            .attach_command
            .as_deref()
            .ok_or(MountError::NotConfigured { action: "attach" })?;
        self.run_checked(command).await?;
        info!("Consumer mount attached");
        Ok(())
    }

    async fn detach(&self) -> MountResult<()> {
        let command = self
            .detach_command
            .as_deref()
            .ok_or(MountError::NotConfigured { action: "detach" })?;
        self.run_checked(command).await?;
        info!("Consumer mount detached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(status: Option<&str>, attach: Option<&str>, detach: Option<&str>) -> CommandMount {
        CommandMount::from_config(&MountConfig {
            status_command: status.map(String::from),
            attach_command: attach.map(String::from),
            detach_command: detach.map(String::from),
            timeout: Duration::from_secs(5),
        })
    }

    #[tokio::test]
    async fn test_status_from_exit_code() {
        assert_eq!(mount(Some("true"), None, None).status().await.unwrap(), MountState::Attached);
        assert_eq!(mount(Some("exit 3"), None, None).status().await.unwrap(), MountState::Detached);
        assert_eq!(mount(None, None, None).status().await.unwrap(), MountState::Unknown);
    }

    #[tokio::test]
    async fn test_attach_detach_errors() {
        let m = mount(None, Some("echo nope >&2; exit 1"), None);
        match m.attach().await {
            Err(MountError::CommandFailed { status, stderr, .. }) => {
                assert_eq!(status, 1);
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            m.detach().await,
            Err(MountError::NotConfigured { action: "detach" })
        ));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let mut m = mount(None, Some("sleep 5"), None);
        m.timeout = Duration::from_millis(100);
        assert!(matches!(m.attach().await, Err(MountError::Timeout { .. })));
    }

    #[test]
    fn test_required_programs() {
        let m = mount(Some("mountpoint -q /srv"), Some("systemctl start x"), None);
        assert_eq!(m.required_programs(), ["mountpoint", "systemctl"]);
    }
}
