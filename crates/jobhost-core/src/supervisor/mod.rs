//! Supervisor tick loop.
//!
//! One timer-driven task owns the health monitor and drives the restart
//! controller. The loop runs independently of any request-handling path,
//! takes a state snapshot at the top of every tick, and is cancelled by the
//! shutdown trigger or by teardown of the lifecycle itself. No failure
//! inside a tick escapes the loop: every tick completes and the next one is
//! scheduled.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::health::{HealthCheckConfig, HealthMonitor};
use crate::host::WorkerHost;
use crate::lifecycle::{HostLifecycle, HostState, LifecycleError};
use crate::restart::{RestartController, RestartPolicy};
use crate::sampler::LoadSampler;
use crate::shutdown::ShutdownTrigger;

/// Supervises the worker host: initial start, periodic health sampling,
/// restart/shutdown escalation.
pub struct Supervisor<S> {
    monitor: HealthMonitor<S>,
    lifecycle: Arc<HostLifecycle>,
    controller: Arc<RestartController>,
    trigger: ShutdownTrigger,
}

impl<S: LoadSampler> Supervisor<S> {
    /// Wire a supervisor over the given sampler and worker host.
    #[must_use]
    pub fn new(
        health: HealthCheckConfig,
        policy: RestartPolicy,
        sampler: S,
        host: Arc<dyn WorkerHost>,
    ) -> Self {
        let lifecycle = Arc::new(HostLifecycle::new());
        let trigger = ShutdownTrigger::new();
        let controller = Arc::new(RestartController::new(
            lifecycle.clone(),
            host,
            trigger.clone(),
            policy,
        ));
        let monitor = HealthMonitor::new(health, sampler);
        Self {
            monitor,
            lifecycle,
            controller,
            trigger,
        }
    }

    /// Handle for reading and observing the host state.
    #[must_use]
    pub fn lifecycle(&self) -> Arc<HostLifecycle> {
        self.lifecycle.clone()
    }

    /// Handle for external restart/shutdown requests.
    #[must_use]
    pub fn controller(&self) -> Arc<RestartController> {
        self.controller.clone()
    }

    /// Handle to the fatal shutdown signal.
    #[must_use]
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    /// Start the worker host and run the periodic health check loop until
    /// the host reaches a terminal or tearing-down state.
    ///
    /// # Errors
    ///
    /// Returns a [`LifecycleError`] only when the initial start hits an
    /// internal transition bug; monitor and controller failures during the
    /// loop are contained and logged.
    pub async fn run(mut self) -> Result<(), LifecycleError> {
        let config = self.monitor.config().clone();
        info!(
            interval = ?config.interval,
            window = ?config.window,
            threshold = config.threshold,
            budget = self.controller.policy().max_consecutive_failures,
            "host supervisor starting"
        );

        self.controller.start_host().await?;

        let mut shutdown_rx = self.trigger.subscribe();
        let mut state_rx = self.lifecycle.subscribe();
        let mut interval = tokio::time::interval(config.interval);
        // Leeway drift tolerance: a late tick is not "caught up" in a burst.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {},
                _ = shutdown_rx.changed() => {
                    info!("health check loop cancelled by shutdown trigger");
                    break;
                },
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // Fall through to the snapshot check below; a terminal
                    // transition ends the loop without waiting an interval.
                },
            }

            // Snapshot at the top of the tick: once teardown has begun, no
            // further samples are appended and no new cycle can start.
            let state = self.lifecycle.state();
            match state {
                HostState::Running => {},
                HostState::Stopping | HostState::Stopped | HostState::Offline => {
                    info!(%state, "health check loop stopping");
                    break;
                },
                // Start or recovery still in flight; the verdict is only
                // consulted in Running.
                _ => continue,
            }

            let verdict = self.monitor.sample(Instant::now());
            if verdict.newly_unhealthy {
                warn!(
                    threshold = config.threshold,
                    window = ?config.window,
                    unhealthy_samples = verdict.unhealthy_count,
                    "unhealthy threshold reached within window; initiating worker host restart"
                );
                if let Err(error) = self.controller.on_unhealthy(&verdict.exceeded).await {
                    error!(%error, "restart controller failed to handle unhealthy verdict");
                }
                // The recovery above changed the state; that change is not
                // a fresh wake-up signal for the next iteration.
                state_rx.mark_unchanged();
            }
        }

        info!(state = %self.lifecycle.state(), "host supervisor exiting");
        Ok(())
    }
}
