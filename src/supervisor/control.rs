//! Terminate and launch: the side-effecting half of the host capabilities.

use super::host::HostTools;
use super::pipeline::{CommandStage, Pipeline};
use crate::error::{LauncherError, PipelineError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, warn};

#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Force-terminate every process running `image`.
    async fn terminate_image(&self, image: &str) -> Result<()>;

    /// Force-terminate one process.
    async fn terminate_pid(&self, pid: u32) -> Result<()>;

    /// Run a launcher artifact and wait only for the launcher itself.
    async fn launch(&self, name: &str, stage: &CommandStage) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SystemProcessControl {
    tools: HostTools,
    timeout: Duration,
}

impl SystemProcessControl {
    pub fn new(tools: HostTools, timeout: Duration) -> Self {
        Self { tools, timeout }
    }

    async fn terminate(&self, target: String, stage: CommandStage) -> Result<()> {
        info!(target = %target, command = %stage, "Terminating");
        match Pipeline::new([stage]).with_timeout(self.timeout).execute().await {
            Ok(_) => Ok(()),
            Err(failure) => match failure.error {
                PipelineError::Wait { code, stderr, .. } => Err(LauncherError::Terminate {
                    target,
                    reason: if stderr.trim().is_empty() {
                        match code {
                            Some(code) => format!("exit code {code}"),
                            None => "terminated by signal".to_string(),
                        }
                    } else {
                        stderr.trim().to_string()
                    },
                }),
                other => Err(other.into()),
            },
        }
    }
}

#[async_trait]
impl ProcessControl for SystemProcessControl {
    async fn terminate_image(&self, image: &str) -> Result<()> {
        self.terminate(image.to_string(), self.tools.terminate_image(image))
            .await
    }

    async fn terminate_pid(&self, pid: u32) -> Result<()> {
        self.terminate(format!("pid {pid}"), self.tools.terminate_pid(pid))
            .await
    }

    async fn launch(&self, name: &str, stage: &CommandStage) -> Result<()> {
        info!(service = %name, command = %stage, "Launching");

        // The launcher's children may inherit whatever we hand it, so nothing
        // is captured: a held pipe would never reach EOF.
        let mut cmd = stage.command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| LauncherError::Launch {
            name: name.to_string(),
            reason: format!("{}: {}", stage.program(), e),
        })?;

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                debug!(service = %name, "Launcher finished");
                Ok(())
            }
            Ok(Ok(status)) => Err(LauncherError::Launch {
                name: name.to_string(),
                reason: format!("{} exited with {}", stage.program(), status),
            }),
            Ok(Err(e)) => Err(LauncherError::Launch {
                name: name.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(service = %name, timeout = ?self.timeout, "Launcher still running, leaving it detached");
                Ok(())
            }
        }
    }
}
