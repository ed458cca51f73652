//! Host lifecycle state machine.
//!
//! [`HostState`] is the authoritative state of the supervised worker host.
//! Transitions are validated against a single legality table and published
//! atomically through a watch channel, so concurrent readers always observe
//! a consistent value and subscribers see every transition in order.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// State of the supervised worker host.
///
/// Exactly one value at any instant. `Offline` is terminal: no transition
/// leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    /// Created but never started.
    Default,

    /// Start requested; the worker process is being brought up.
    Starting,

    /// The worker process came up; about to enter service.
    Initialized,

    /// In service. The only state in which the health monitor's verdict is
    /// consulted.
    Running,

    /// A start failure or sustained-unhealthy verdict was recorded.
    Error,

    /// Teardown of the current worker instance is in progress.
    Stopping,

    /// Teardown complete; the host may restart or go offline.
    Stopped,

    /// Terminal. The supervised process is gone for good.
    Offline,
}

impl HostState {
    /// Stable lower-case name, used in logs and status output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Starting => "starting",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Error => "error",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Offline => "offline",
        }
    }

    /// Whether no transition may leave this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Offline)
    }

    /// Transition legality table.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Default, Self::Starting)
                | (Self::Starting, Self::Initialized)
                | (Self::Starting, Self::Error)
                | (Self::Initialized, Self::Running)
                | (Self::Running, Self::Error)
                | (Self::Running, Self::Stopping)
                | (Self::Error, Self::Starting)
                | (Self::Error, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
                | (Self::Stopped, Self::Starting)
                | (Self::Stopped, Self::Offline)
        )
    }
}

impl Default for HostState {
    fn default() -> Self {
        Self::Default
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state machine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// The requested transition is not in the legality table.
    #[error("invalid host state transition: {from} -> {to}")]
    InvalidTransition {
        /// State the host was in.
        from: HostState,
        /// State the transition requested.
        to: HostState,
    },

    /// The host is in a terminal state.
    #[error("host state {0} is terminal")]
    Terminal(HostState),
}

/// Serialized-access boundary around the host state.
///
/// A transition validates against the current state and publishes the new
/// value while holding an internal lock, so only one transition is in
/// flight at a time. All other components read snapshots via [`state`] or
/// observe the ordered stream via [`subscribe`]; neither blocks on the
/// transition lock.
///
/// [`state`]: HostLifecycle::state
/// [`subscribe`]: HostLifecycle::subscribe
#[derive(Debug)]
pub struct HostLifecycle {
    tx: watch::Sender<HostState>,
    transition_lock: Mutex<()>,
}

impl HostLifecycle {
    /// Create a lifecycle in the `Default` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(HostState::Default),
            transition_lock: Mutex::new(()),
        }
    }

    /// Non-blocking snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> HostState {
        *self.tx.borrow()
    }

    /// Subscribe to state transitions.
    ///
    /// Every transition is observed through the receiver as a whole value;
    /// no observer ever sees a torn state between old and new.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HostState> {
        self.tx.subscribe()
    }

    /// Atomically transition to `to`, returning the previous state.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Terminal`] if the current state is
    /// terminal, or [`LifecycleError::InvalidTransition`] if the legality
    /// table rejects the move. The state is unchanged on error.
    pub fn transition(&self, to: HostState) -> Result<HostState, LifecycleError> {
        let _guard = self
            .transition_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let from = *self.tx.borrow();
        if from.is_terminal() {
            return Err(LifecycleError::Terminal(from));
        }
        if !from.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }

        self.tx.send_replace(to);
        debug!(%from, %to, "host state transition");
        Ok(from)
    }
}

impl Default for HostLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
