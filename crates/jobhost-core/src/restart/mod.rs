//! Restart policy and controller.
//!
//! The controller orchestrates stop -> dispose -> start cycles over the
//! worker host, applying a consecutive-failure counter against a retry
//! budget and escalating to the fatal shutdown path exactly once when the
//! budget is exhausted.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::health::format_thresholds;
use crate::host::WorkerHost;
use crate::lifecycle::{HostLifecycle, HostState, LifecycleError};
use crate::shutdown::ShutdownTrigger;

/// Default number of consecutive failed recovery cycles tolerated before
/// escalating to fatal shutdown.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 2;

/// Restart policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    /// Retry budget: consecutive failures tolerated before the fatal path.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

const fn default_max_consecutive_failures() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_FAILURES
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl RestartPolicy {
    /// Validate the policy.
    ///
    /// # Errors
    ///
    /// Returns a message describing the violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_consecutive_failures == 0 {
            return Err("restart.max_consecutive_failures must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Consecutive-failure tracking across restart cycles.
///
/// Reset to zero on any successful transition into Running, so transient
/// unhealthy episodes that self-resolve do not accumulate toward the
/// budget indefinitely.
#[derive(Debug, Clone, Default)]
pub struct RestartAttempt {
    /// Consecutive failed start/unhealthy episodes.
    pub consecutive_error_count: u32,

    /// Time of the most recent failure.
    pub last_error_at: Option<DateTime<Utc>>,
}

impl RestartAttempt {
    fn record_failure(&mut self) {
        self.consecutive_error_count += 1;
        self.last_error_at = Some(Utc::now());
    }

    fn reset(&mut self) {
        self.consecutive_error_count = 0;
        self.last_error_at = None;
    }
}

/// Orchestrates restart cycles and the fatal shutdown decision.
///
/// Every compound lifecycle mutation (initial start, unhealthy recovery,
/// external restart, external shutdown) is serialized through one internal
/// async mutex, so only one transition sequence is in flight at a time.
pub struct RestartController {
    lifecycle: Arc<HostLifecycle>,
    host: Arc<dyn WorkerHost>,
    trigger: ShutdownTrigger,
    policy: RestartPolicy,
    attempt: Mutex<RestartAttempt>,
}

impl RestartController {
    /// Create a controller over the given lifecycle, host, and trigger.
    #[must_use]
    pub fn new(
        lifecycle: Arc<HostLifecycle>,
        host: Arc<dyn WorkerHost>,
        trigger: ShutdownTrigger,
        policy: RestartPolicy,
    ) -> Self {
        Self {
            lifecycle,
            host,
            trigger,
            policy,
            attempt: Mutex::new(RestartAttempt::default()),
        }
    }

    /// The lifecycle this controller mutates.
    #[must_use]
    pub fn lifecycle(&self) -> &Arc<HostLifecycle> {
        &self.lifecycle
    }

    /// The configured restart policy.
    #[must_use]
    pub const fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    /// Snapshot of the consecutive-failure state.
    pub async fn attempt(&self) -> RestartAttempt {
        self.attempt.lock().await.clone()
    }

    /// Initial start: Default -> Starting -> Initialized -> Running.
    ///
    /// A start failure is recorded against the budget and retried through
    /// the same recovery loop as an unhealthy episode; budget exhaustion
    /// during initial start escalates to the fatal path.
    ///
    /// # Errors
    ///
    /// Returns a [`LifecycleError`] if the host is not in a startable
    /// state.
    pub async fn start_host(&self) -> Result<(), LifecycleError> {
        let mut attempt = self.attempt.lock().await;
        self.lifecycle.transition(HostState::Starting)?;
        info!("starting worker host");
        match self.host.start().await {
            Ok(()) => self.mark_running(&mut attempt),
            Err(error) => {
                error!(%error, "worker host failed to start");
                attempt.record_failure();
                self.lifecycle.transition(HostState::Error)?;
                self.recover(&mut attempt).await
            },
        }
    }

    /// Handle a sustained-unhealthy verdict from the health monitor.
    ///
    /// At most once per unhealthy episode: the guard is state-based, so a
    /// verdict delivered while a restart is already in progress (state
    /// Error/Stopping/...) is a no-op rather than a second cycle.
    ///
    /// # Errors
    ///
    /// Returns a [`LifecycleError`] only on an internal transition bug;
    /// policy failures (host start errors, budget exhaustion) are handled
    /// internally.
    pub async fn on_unhealthy(
        &self,
        exceeded: &BTreeSet<String>,
    ) -> Result<(), LifecycleError> {
        if self.lifecycle.state() != HostState::Running {
            debug!(
                state = %self.lifecycle.state(),
                "unhealthy verdict ignored: restart already in progress"
            );
            return Ok(());
        }

        let mut attempt = self.attempt.lock().await;
        // Re-check under the control lock: a racing teardown may have left
        // Running between the snapshot above and lock acquisition.
        if self.lifecycle.state() != HostState::Running {
            return Ok(());
        }

        self.lifecycle.transition(HostState::Error)?;
        attempt.record_failure();
        warn!(
            thresholds = %format_thresholds(exceeded),
            consecutive_failures = attempt.consecutive_error_count,
            "sustained high load; worker host entering error state"
        );
        self.recover(&mut attempt).await
    }

    /// External restart request.
    ///
    /// Routes through the same recovery cycle as an unhealthy episode but
    /// does not count toward the failure budget. Ignored unless the host is
    /// Running.
    ///
    /// # Errors
    ///
    /// Returns a [`LifecycleError`] on an internal transition bug.
    pub async fn request_restart(&self) -> Result<(), LifecycleError> {
        let mut attempt = self.attempt.lock().await;
        match self.lifecycle.state() {
            HostState::Running => {
                info!("external restart requested");
                self.lifecycle.transition(HostState::Error)?;
                self.recover(&mut attempt).await
            },
            state => {
                debug!(%state, "restart request ignored in current state");
                Ok(())
            },
        }
    }

    /// External (environment-initiated) shutdown: orderly teardown ending
    /// Offline, without firing the fatal trigger.
    ///
    /// # Errors
    ///
    /// Returns a [`LifecycleError`] on an internal transition bug.
    pub async fn shutdown(&self) -> Result<(), LifecycleError> {
        let _attempt = self.attempt.lock().await;
        match self.lifecycle.state() {
            HostState::Running | HostState::Error => {
                info!("external shutdown requested; stopping worker host");
                self.teardown().await?;
                self.lifecycle.transition(HostState::Offline)?;
                Ok(())
            },
            HostState::Stopped => {
                self.lifecycle.transition(HostState::Offline)?;
                Ok(())
            },
            state => {
                debug!(%state, "shutdown request ignored in current state");
                Ok(())
            },
        }
    }

    /// Recovery loop. Entered with the lifecycle in Error.
    ///
    /// Runs stop -> dispose -> start cycles while the consecutive-failure
    /// count stays within the budget; escalates to the fatal path once it
    /// exceeds the budget, so with budget N the (N+1)-th consecutive
    /// failure shuts the process down.
    async fn recover(&self, attempt: &mut RestartAttempt) -> Result<(), LifecycleError> {
        loop {
            if attempt.consecutive_error_count > self.policy.max_consecutive_failures {
                return self.fatal(attempt).await;
            }

            info!(
                consecutive_failures = attempt.consecutive_error_count,
                budget = self.policy.max_consecutive_failures,
                "restarting worker host"
            );
            self.teardown().await?;
            self.lifecycle.transition(HostState::Starting)?;
            match self.host.start().await {
                Ok(()) => return self.mark_running(attempt),
                Err(error) => {
                    error!(%error, "worker host failed to start");
                    attempt.record_failure();
                    self.lifecycle.transition(HostState::Error)?;
                },
            }
        }
    }

    /// Fatal path: fire the trigger once and finish Offline.
    ///
    /// The trigger fires strictly after the triggering verdict is durably
    /// recorded (state is Error) and after the budget check, so observers
    /// always see Error before Offline.
    async fn fatal(&self, attempt: &RestartAttempt) -> Result<(), LifecycleError> {
        error!(
            consecutive_failures = attempt.consecutive_error_count,
            budget = self.policy.max_consecutive_failures,
            "restart budget exhausted; escalating to fatal shutdown"
        );
        self.trigger.fire();
        self.teardown().await?;
        self.lifecycle.transition(HostState::Offline)?;
        Ok(())
    }

    /// Best-effort teardown: Stopping -> Stopped. Stop/dispose failures are
    /// logged and never block progress toward Stopped.
    async fn teardown(&self) -> Result<(), LifecycleError> {
        self.lifecycle.transition(HostState::Stopping)?;
        if let Err(error) = self.host.stop().await {
            warn!(%error, "teardown: failed to stop worker; continuing");
        }
        self.lifecycle.transition(HostState::Stopped)?;
        if let Err(error) = self.host.dispose().await {
            warn!(%error, "teardown: failed to dispose worker; continuing");
        }
        Ok(())
    }

    /// Initialized -> Running; resets the consecutive-failure counter.
    fn mark_running(&self, attempt: &mut RestartAttempt) -> Result<(), LifecycleError> {
        self.lifecycle.transition(HostState::Initialized)?;
        self.lifecycle.transition(HostState::Running)?;
        attempt.reset();
        info!("worker host running");
        Ok(())
    }
}
