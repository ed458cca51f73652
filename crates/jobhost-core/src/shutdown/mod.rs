//! Shutdown trigger.
//!
//! One-shot, idempotent signal for the fatal teardown path. Double
//! invocation is tolerated (the second call is a no-op) since an external
//! caller may detect the shutdown condition independently.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{debug, error};

#[derive(Debug)]
struct Inner {
    fired: AtomicBool,
    tx: watch::Sender<bool>,
}

/// Cloneable handle to the process shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    inner: Arc<Inner>,
}

impl ShutdownTrigger {
    /// Create an unfired trigger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                fired: AtomicBool::new(false),
                tx: watch::Sender::new(false),
            }),
        }
    }

    /// Fire the trigger. At-most-once: only the first call has any effect.
    pub fn fire(&self) {
        if self.inner.fired.swap(true, Ordering::SeqCst) {
            debug!("shutdown trigger already fired; ignoring");
            return;
        }
        error!("shutdown triggered; terminating the supervised worker process for good");
        self.inner.tx.send_replace(true);
    }

    /// Whether the trigger has fired.
    #[must_use]
    pub fn fired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Subscribe to the firing. The receiver's value flips to `true` once,
    /// permanently.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.tx.subscribe()
    }
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}
