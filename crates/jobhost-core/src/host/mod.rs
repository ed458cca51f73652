//! Worker host seam.
//!
//! The supervisor does not know how the worker is hosted; it drives the
//! [`WorkerHost`] capability. The production implementation spawns a child
//! process ([`crate::process::ProcessHost`]); tests inject mocks.

use async_trait::async_trait;

/// Worker host error.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The worker could not be started or initialized.
    #[error("failed to start worker host: {0}")]
    StartFailed(String),

    /// The worker could not be stopped cleanly.
    #[error("failed to stop worker host: {0}")]
    StopFailed(String),

    /// Worker resources could not be released.
    #[error("failed to dispose worker host: {0}")]
    DisposeFailed(String),
}

/// Capability interface over the hosted worker.
///
/// `stop` and `dispose` are best-effort from the controller's point of
/// view: their failures are logged and never block progress toward a
/// restartable or terminal state.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Bring up a fresh worker instance.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::StartFailed`] when the worker cannot be brought
    /// up; the failure counts toward the restart budget.
    async fn start(&self) -> Result<(), HostError>;

    /// Tear down the current worker instance.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::StopFailed`] on teardown problems.
    async fn stop(&self) -> Result<(), HostError>;

    /// Release any resources still held for the worker. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::DisposeFailed`] on cleanup problems.
    async fn dispose(&self) -> Result<(), HostError>;
}
