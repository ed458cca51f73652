//! Host health monitoring.
//!
//! The monitor owns a sliding time window of high-load observations pulled
//! from a [`LoadSampler`] on each tick and decides, per sample, whether the
//! unhealthy-count threshold has been exceeded within the window. It only
//! reports a verdict; it never calls the shutdown path itself.

use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::sampler::{LoadSampler, LoadSignal};

/// Default health check interval.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(10);

/// Default sliding window over which unhealthy samples are counted.
pub const DEFAULT_HEALTH_WINDOW: Duration = Duration::from_secs(120);

/// Default number of unhealthy samples within the window required to
/// trigger an unhealthy verdict.
pub const DEFAULT_HEALTH_THRESHOLD: usize = 6;

/// Threshold name recorded when the sampler itself fails.
///
/// An unreachable sampler is itself a high-load signal, so a failed tick is
/// counted as unhealthy rather than silently skipped.
pub const SAMPLER_FAILURE_THRESHOLD: &str = "sampler_failure";

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Interval between health check ticks.
    #[serde(default = "default_interval")]
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Sliding window over which unhealthy samples are counted.
    #[serde(default = "default_window")]
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Unhealthy-sample count within the window required to trigger.
    #[serde(default = "default_threshold")]
    pub threshold: usize,
}

const fn default_interval() -> Duration {
    DEFAULT_HEALTH_INTERVAL
}

const fn default_window() -> Duration {
    DEFAULT_HEALTH_WINDOW
}

const fn default_threshold() -> usize {
    DEFAULT_HEALTH_THRESHOLD
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            window: default_window(),
            threshold: default_threshold(),
        }
    }
}

impl HealthCheckConfig {
    /// Validate the configured invariants.
    ///
    /// # Errors
    ///
    /// Returns a message describing the violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.threshold == 0 {
            return Err("health.threshold must be at least 1".to_string());
        }
        if self.interval.is_zero() {
            return Err("health.interval must be non-zero".to_string());
        }
        if self.window < self.interval {
            return Err(format!(
                "health.window ({:?}) must be at least health.interval ({:?})",
                self.window, self.interval
            ));
        }
        Ok(())
    }
}

/// A single timestamped observation retained in the window.
#[derive(Debug, Clone)]
struct HealthSample {
    at: Instant,
    under_load: bool,
    exceeded: Vec<String>,
}

/// Sliding window of timestamped load observations.
///
/// Samples are retained only while `now - timestamp <= window`; stale
/// entries are purged on each evaluation, so memory stays bounded by
/// `window / interval` for a long-running monitor.
#[derive(Debug)]
pub struct HealthWindow {
    window: Duration,
    samples: VecDeque<HealthSample>,
}

impl HealthWindow {
    /// Create an empty window of the given duration.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Append an observation.
    ///
    /// Timestamps are kept monotonically non-decreasing: an observation that
    /// would land before its predecessor is clamped to the predecessor's
    /// timestamp.
    pub fn record(&mut self, at: Instant, under_load: bool, exceeded: Vec<String>) {
        let at = match self.samples.back() {
            Some(last) if at < last.at => last.at,
            _ => at,
        };
        self.samples.push_back(HealthSample {
            at,
            under_load,
            exceeded,
        });
    }

    /// Purge entries older than the window relative to `now`.
    pub fn prune(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Count of retained high-load observations.
    #[must_use]
    pub fn unhealthy_count(&self) -> usize {
        self.samples.iter().filter(|s| s.under_load).count()
    }

    /// Distinct threshold names observed across the retained high-load
    /// samples.
    #[must_use]
    pub fn exceeded_thresholds(&self) -> BTreeSet<String> {
        self.samples
            .iter()
            .filter(|s| s.under_load)
            .flat_map(|s| s.exceeded.iter().cloned())
            .collect()
    }

    /// Number of retained samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Result of a single health check tick.
#[derive(Debug, Clone)]
pub struct HealthVerdict {
    /// Whether the unhealthy-count threshold is exceeded within the window.
    pub unhealthy: bool,

    /// Whether this tick crossed from healthy into unhealthy.
    pub newly_unhealthy: bool,

    /// Count of high-load samples currently in the window.
    pub unhealthy_count: usize,

    /// Distinct exceeded-threshold names across the window. Empty when the
    /// verdict is healthy.
    pub exceeded: BTreeSet<String>,
}

/// Sliding-window health monitor over an injected [`LoadSampler`].
#[derive(Debug)]
pub struct HealthMonitor<S> {
    config: HealthCheckConfig,
    sampler: S,
    window: HealthWindow,
    in_unhealthy_episode: bool,
}

impl<S: LoadSampler> HealthMonitor<S> {
    /// Create a monitor over the given sampler.
    #[must_use]
    pub fn new(config: HealthCheckConfig, sampler: S) -> Self {
        let window = HealthWindow::new(config.window);
        Self {
            config,
            sampler,
            window,
            in_unhealthy_episode: false,
        }
    }

    /// The monitor's configuration.
    #[must_use]
    pub const fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Pull the load signal and evaluate the window at `now`.
    ///
    /// The window is preserved across unhealthy verdicts (not cleared) so
    /// the next tick re-evaluates against the same rolling population; an
    /// abrupt reset would mask sustained pressure. When the verdict crosses
    /// into unhealthy for the first time in an episode, one diagnostic
    /// record is emitted naming the distinct thresholds observed across the
    /// window.
    pub fn sample(&mut self, now: Instant) -> HealthVerdict {
        let signal = match self.sampler.is_under_high_load() {
            Ok(signal) => signal,
            Err(error) => {
                warn!(%error, "load sampler failed; counting tick as high load");
                LoadSignal::under_load([SAMPLER_FAILURE_THRESHOLD])
            },
        };

        self.window.record(now, signal.under_load, signal.exceeded);
        self.window.prune(now);

        let unhealthy_count = self.window.unhealthy_count();
        let unhealthy = unhealthy_count >= self.config.threshold;
        let newly_unhealthy = unhealthy && !self.in_unhealthy_episode;
        let exceeded = if unhealthy {
            self.window.exceeded_thresholds()
        } else {
            BTreeSet::new()
        };

        if newly_unhealthy {
            warn!(
                unhealthy_samples = unhealthy_count,
                thresholds = %format_thresholds(&exceeded),
                "host is unhealthy: load thresholds exceeded within the window"
            );
        }
        self.in_unhealthy_episode = unhealthy;

        HealthVerdict {
            unhealthy,
            newly_unhealthy,
            unhealthy_count,
            exceeded,
        }
    }

    /// Verdict of the most recent evaluation. A window with zero samples is
    /// always healthy.
    #[must_use]
    pub const fn is_unhealthy(&self) -> bool {
        self.in_unhealthy_episode
    }
}

/// Render a threshold set for log output.
#[must_use]
pub fn format_thresholds(exceeded: &BTreeSet<String>) -> String {
    if exceeded.is_empty() {
        return "(none)".to_string();
    }
    exceeded.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::ScriptedSampler;

    fn config(interval_ms: u64, window_ms: u64, threshold: usize) -> HealthCheckConfig {
        HealthCheckConfig {
            interval: Duration::from_millis(interval_ms),
            window: Duration::from_millis(window_ms),
            threshold,
        }
    }

    #[test]
    fn empty_window_is_healthy() {
        let monitor = HealthMonitor::new(config(100, 1000, 5), ScriptedSampler::new());
        assert!(!monitor.is_unhealthy());
    }

    #[test]
    fn five_unhealthy_samples_within_window_trip_the_threshold() {
        let mut sampler = ScriptedSampler::new();
        for _ in 0..5 {
            sampler.push_under_load(["memory", "connections"]);
        }
        let mut monitor = HealthMonitor::new(config(100, 1000, 5), sampler);

        let base = Instant::now();
        for i in 0..4 {
            let verdict = monitor.sample(base + Duration::from_millis(100 * i));
            assert!(!verdict.unhealthy, "sample {i} must not trip early");
        }
        let verdict = monitor.sample(base + Duration::from_millis(400));
        assert!(verdict.unhealthy);
        assert!(verdict.newly_unhealthy);
        assert_eq!(verdict.unhealthy_count, 5);
        assert!(verdict.exceeded.contains("memory"));
        assert!(verdict.exceeded.contains("connections"));
    }

    #[test]
    fn crossing_is_reported_once_per_episode() {
        let mut sampler = ScriptedSampler::new();
        for _ in 0..6 {
            sampler.push_under_load(["threads"]);
        }
        let mut monitor = HealthMonitor::new(config(100, 1000, 5), sampler);

        let base = Instant::now();
        for i in 0..5 {
            monitor.sample(base + Duration::from_millis(100 * i));
        }
        assert!(monitor.is_unhealthy());

        // Still unhealthy on the next tick, but no longer "newly".
        let verdict = monitor.sample(base + Duration::from_millis(500));
        assert!(verdict.unhealthy);
        assert!(!verdict.newly_unhealthy);
    }

    #[test]
    fn samples_aging_out_of_the_window_keep_the_verdict_healthy() {
        let mut sampler = ScriptedSampler::new();
        for _ in 0..4 {
            sampler.push_under_load(["memory"]);
        }
        // 10 healthy samples follow, carrying past the window.
        let mut monitor = HealthMonitor::new(config(100, 1000, 5), sampler);

        let base = Instant::now();
        for i in 0..14 {
            let verdict = monitor.sample(base + Duration::from_millis(150 * i));
            assert!(!verdict.unhealthy, "sample {i} unexpectedly unhealthy");
        }
        assert!(!monitor.is_unhealthy());
        // The four high-load samples have aged out entirely.
        assert_eq!(monitor.window.unhealthy_count(), 0);
    }

    #[test]
    fn sampler_failures_count_as_unhealthy_samples() {
        let mut sampler = ScriptedSampler::new();
        for _ in 0..5 {
            sampler.push_error("probe offline");
        }
        let mut monitor = HealthMonitor::new(config(100, 1000, 5), sampler);

        let base = Instant::now();
        let mut last = None;
        for i in 0..5 {
            last = Some(monitor.sample(base + Duration::from_millis(100 * i)));
        }
        let verdict = last.unwrap();
        assert!(verdict.unhealthy);
        assert_eq!(verdict.unhealthy_count, 5);
        assert!(verdict.exceeded.contains(SAMPLER_FAILURE_THRESHOLD));
    }

    #[test]
    fn window_is_preserved_across_unhealthy_verdicts() {
        let mut sampler = ScriptedSampler::new();
        for _ in 0..6 {
            sampler.push_under_load(["memory"]);
        }
        let mut monitor = HealthMonitor::new(config(100, 1000, 5), sampler);

        let base = Instant::now();
        for i in 0..5 {
            monitor.sample(base + Duration::from_millis(100 * i));
        }
        let before = monitor.window.len();
        monitor.sample(base + Duration::from_millis(500));
        assert_eq!(monitor.window.len(), before + 1);
    }

    #[test]
    fn episode_rearms_after_recovery() {
        let mut sampler = ScriptedSampler::new();
        for _ in 0..5 {
            sampler.push_under_load(["memory"]);
        }
        sampler.push_healthy();
        for _ in 0..5 {
            sampler.push_under_load(["memory"]);
        }
        let mut monitor = HealthMonitor::new(config(100, 1000, 5), sampler);

        let base = Instant::now();
        for i in 0..5 {
            monitor.sample(base + Duration::from_millis(100 * i));
        }
        assert!(monitor.is_unhealthy());

        // A healthy sample past the window drains the first burst entirely.
        let verdict = monitor.sample(base + Duration::from_millis(2000));
        assert!(!verdict.unhealthy);

        // The second burst must cross again, as a fresh episode.
        let mut crossings = 0;
        for i in 0..5 {
            let verdict = monitor.sample(base + Duration::from_millis(2100 + 100 * i));
            if verdict.newly_unhealthy {
                crossings += 1;
            }
        }
        assert_eq!(crossings, 1);
    }

    #[test]
    fn config_validation_rejects_bad_invariants() {
        assert!(config(100, 1000, 0).validate().is_err());
        assert!(config(0, 1000, 5).validate().is_err());
        assert!(config(1000, 100, 5).validate().is_err());
        assert!(config(100, 100, 1).validate().is_ok());
        assert!(HealthCheckConfig::default().validate().is_ok());
    }

    #[test]
    fn config_roundtrips_through_humantime_strings() {
        let parsed: HealthCheckConfig =
            toml::from_str("interval = \"10s\"\nwindow = \"2m\"\nthreshold = 6\n").unwrap();
        assert_eq!(parsed, HealthCheckConfig::default());
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
