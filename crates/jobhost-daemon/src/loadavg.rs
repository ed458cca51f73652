//! Load-average sampler.
//!
//! Minimal production sampler: reads `/proc/loadavg` and reports high load
//! when the 1-minute average exceeds the configured threshold. Richer
//! samplers (memory, connection counts) plug into the same seam.

use std::path::PathBuf;

use jobhost_core::sampler::{LoadSampler, LoadSignal, SamplerError};

/// Threshold name reported when the 1-minute load average is exceeded.
pub const LOADAVG_THRESHOLD_NAME: &str = "loadavg_1m";

const PROC_LOADAVG: &str = "/proc/loadavg";

/// [`LoadSampler`] over the kernel's load average.
#[derive(Debug)]
pub struct LoadavgSampler {
    path: PathBuf,
    threshold: f64,
}

impl LoadavgSampler {
    /// Create a sampler tripping above the given 1-minute load average.
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self {
            path: PathBuf::from(PROC_LOADAVG),
            threshold,
        }
    }

    /// Default threshold: one unit of load per available CPU.
    #[must_use]
    pub fn default_threshold() -> f64 {
        std::thread::available_parallelism().map_or(1.0, |n| n.get() as f64)
    }
}

impl LoadSampler for LoadavgSampler {
    fn is_under_high_load(&mut self) -> Result<LoadSignal, SamplerError> {
        let raw = std::fs::read_to_string(&self.path)?;
        let one_minute = parse_one_minute_average(&raw)?;
        if one_minute > self.threshold {
            Ok(LoadSignal::under_load([LOADAVG_THRESHOLD_NAME]))
        } else {
            Ok(LoadSignal::healthy())
        }
    }
}

/// Parse the first field of a `/proc/loadavg` line.
fn parse_one_minute_average(raw: &str) -> Result<f64, SamplerError> {
    let field = raw
        .split_whitespace()
        .next()
        .ok_or_else(|| SamplerError::Malformed("empty loadavg output".to_string()))?;
    field
        .parse::<f64>()
        .map_err(|e| SamplerError::Malformed(format!("bad loadavg field '{field}': {e}")))
}
