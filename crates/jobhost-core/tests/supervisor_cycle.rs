//! End-to-end supervisor scenarios under virtual time.
//!
//! These tests wire a real `Supervisor` over scripted collaborators and run
//! the tick loop with the tokio clock paused, so interval-driven scenarios
//! execute instantly and deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jobhost_core::health::HealthCheckConfig;
use jobhost_core::host::{HostError, WorkerHost};
use jobhost_core::lifecycle::HostState;
use jobhost_core::restart::RestartPolicy;
use jobhost_core::sampler::ScriptedSampler;
use jobhost_core::supervisor::Supervisor;

/// Worker host playing back scripted start results; an exhausted script
/// means every further start succeeds.
#[derive(Default)]
struct ScriptedHost {
    start_results: Mutex<VecDeque<Result<(), HostError>>>,
    start_calls: AtomicU32,
}

impl ScriptedHost {
    fn with_start_results(results: impl IntoIterator<Item = Result<(), HostError>>) -> Self {
        Self {
            start_results: Mutex::new(results.into_iter().collect()),
            start_calls: AtomicU32::new(0),
        }
    }

    fn starts(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerHost for ScriptedHost {
    async fn start(&self) -> Result<(), HostError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        match self.start_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(()),
        }
    }

    async fn stop(&self) -> Result<(), HostError> {
        Ok(())
    }

    async fn dispose(&self) -> Result<(), HostError> {
        Ok(())
    }
}

fn health_config() -> HealthCheckConfig {
    HealthCheckConfig {
        interval: Duration::from_millis(100),
        window: Duration::from_secs(1),
        threshold: 5,
    }
}

fn start_failed() -> Result<(), HostError> {
    Err(HostError::StartFailed("init failed".to_string()))
}

#[tokio::test(start_paused = true)]
async fn sustained_load_with_failing_restarts_ends_offline() {
    let mut sampler = ScriptedSampler::new();
    for _ in 0..5 {
        sampler.push_under_load(["memory", "connections"]);
    }

    // Initial start succeeds; every restart attempt fails, exhausting a
    // budget of 2 and escalating to the fatal path.
    let host = Arc::new(ScriptedHost::with_start_results([
        Ok(()),
        start_failed(),
        start_failed(),
        start_failed(),
    ]));
    let supervisor = Supervisor::new(
        health_config(),
        RestartPolicy {
            max_consecutive_failures: 2,
        },
        sampler,
        host.clone(),
    );
    let lifecycle = supervisor.lifecycle();
    let trigger = supervisor.shutdown_trigger();
    let mut fatal_rx = trigger.subscribe();

    let task = tokio::spawn(supervisor.run());

    tokio::time::timeout(Duration::from_secs(60), fatal_rx.changed())
        .await
        .expect("shutdown trigger should fire")
        .expect("trigger sender alive");

    task.await.expect("join").expect("supervisor run");
    assert_eq!(lifecycle.state(), HostState::Offline);
    assert!(trigger.fired());
    // Initial start plus exactly two failed restart attempts.
    assert_eq!(host.starts(), 3);
}

#[tokio::test(start_paused = true)]
async fn sporadic_load_below_threshold_keeps_running() {
    let mut sampler = ScriptedSampler::new();
    for _ in 0..4 {
        sampler.push_under_load(["memory"]);
    }
    // Script exhausted afterwards: every further sample is healthy.

    let host = Arc::new(ScriptedHost::default());
    let supervisor = Supervisor::new(
        health_config(),
        RestartPolicy::default(),
        sampler,
        host.clone(),
    );
    let lifecycle = supervisor.lifecycle();
    let controller = supervisor.controller();
    let trigger = supervisor.shutdown_trigger();

    let task = tokio::spawn(supervisor.run());

    // Roughly twenty ticks elapse; four high-load samples never reach the
    // threshold of five.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(lifecycle.state(), HostState::Running);
    assert_eq!(host.starts(), 1);
    assert!(!trigger.fired());

    controller.shutdown().await.expect("graceful shutdown");
    task.await.expect("join").expect("supervisor run");
    assert_eq!(lifecycle.state(), HostState::Offline);
    assert!(!trigger.fired());
}

#[tokio::test(start_paused = true)]
async fn sampler_failures_trigger_the_same_restart_as_load() {
    let mut sampler = ScriptedSampler::new();
    for _ in 0..5 {
        sampler.push_error("probe offline");
    }

    let host = Arc::new(ScriptedHost::default());
    let supervisor = Supervisor::new(
        health_config(),
        RestartPolicy::default(),
        sampler,
        host.clone(),
    );
    let lifecycle = supervisor.lifecycle();
    let controller = supervisor.controller();
    let trigger = supervisor.shutdown_trigger();

    let task = tokio::spawn(supervisor.run());

    // Five failed probes count as five unhealthy samples; the restart
    // succeeds and the host is forgiven.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(lifecycle.state(), HostState::Running);
    assert_eq!(host.starts(), 2);
    assert!(!trigger.fired());
    assert_eq!(controller.attempt().await.consecutive_error_count, 0);

    controller.shutdown().await.expect("graceful shutdown");
    task.await.expect("join").expect("supervisor run");
    assert_eq!(lifecycle.state(), HostState::Offline);
}
