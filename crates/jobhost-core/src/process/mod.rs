//! Process-backed worker host.
//!
//! Spawns the configured worker command as a child process and implements
//! the [`WorkerHost`] lifecycle over it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::host::{HostError, WorkerHost};

/// Specification of the worker process to supervise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Command to execute.
    #[serde(default)]
    pub command: String,

    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl WorkerSpec {
    /// Validate the specification.
    ///
    /// # Errors
    ///
    /// Returns a message describing the violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.command.is_empty() {
            return Err("worker.command must not be empty".to_string());
        }
        Ok(())
    }
}

/// [`WorkerHost`] implementation over a spawned child process.
#[derive(Debug)]
pub struct ProcessHost {
    spec: WorkerSpec,
    child: Mutex<Option<Child>>,
}

impl ProcessHost {
    /// Create a host for the given worker specification.
    #[must_use]
    pub fn new(spec: WorkerSpec) -> Self {
        Self {
            spec,
            child: Mutex::new(None),
        }
    }

    /// The worker specification this host spawns.
    #[must_use]
    pub const fn spec(&self) -> &WorkerSpec {
        &self.spec
    }
}

#[async_trait]
impl WorkerHost for ProcessHost {
    async fn start(&self) -> Result<(), HostError> {
        let mut slot = self.child.lock().await;
        if slot.is_some() {
            return Err(HostError::StartFailed(
                "worker process already running".to_string(),
            ));
        }

        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        if let Some(cwd) = &self.spec.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &self.spec.env {
            cmd.env(k, v);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| HostError::StartFailed(e.to_string()))?;

        let pid = child
            .id()
            .ok_or_else(|| HostError::StartFailed("failed to get process ID".to_string()))?;

        // A child that is already gone counts as a failed start, not as a
        // running worker.
        if let Ok(Some(status)) = child.try_wait() {
            return Err(HostError::StartFailed(format!(
                "worker exited during startup: {status}"
            )));
        }

        info!(pid, command = %self.spec.command, "worker process started");
        *slot = Some(child);
        Ok(())
    }

    async fn stop(&self) -> Result<(), HostError> {
        let mut slot = self.child.lock().await;
        match slot.take() {
            Some(mut child) => {
                let pid = child.id();
                child
                    .kill()
                    .await
                    .map_err(|e| HostError::StopFailed(e.to_string()))?;
                info!(pid, "worker process stopped");
                Ok(())
            },
            None => {
                debug!("stop requested with no worker process running");
                Ok(())
            },
        }
    }

    async fn dispose(&self) -> Result<(), HostError> {
        let mut slot = self.child.lock().await;
        if let Some(mut child) = slot.take() {
            // Best-effort reap of anything stop() did not get to.
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        Ok(())
    }
}
