//! Load sampling seam.
//!
//! The supervisor does not collect resource metrics itself; it consumes an
//! abstract "is under high load" signal through the [`LoadSampler`] trait.
//! Production samplers live with the daemon; tests inject the deterministic
//! [`ScriptedSampler`].

use std::collections::VecDeque;

/// A single load observation returned by a sampler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSignal {
    /// Whether the process is currently under high load.
    pub under_load: bool,

    /// Names of the thresholds that were exceeded. Diagnostic only; never
    /// used for decision logic.
    pub exceeded: Vec<String>,
}

impl LoadSignal {
    /// A healthy observation with no exceeded thresholds.
    #[must_use]
    pub const fn healthy() -> Self {
        Self {
            under_load: false,
            exceeded: Vec::new(),
        }
    }

    /// A high-load observation naming the exceeded thresholds.
    #[must_use]
    pub fn under_load<I, S>(exceeded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            under_load: true,
            exceeded: exceeded.into_iter().map(Into::into).collect(),
        }
    }
}

/// Sampler error.
#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    /// I/O error reading the underlying load source.
    #[error("failed to read load source: {0}")]
    Io(#[from] std::io::Error),

    /// The load source produced output the sampler could not interpret.
    #[error("malformed load source output: {0}")]
    Malformed(String),

    /// The sampler is not able to produce a signal right now.
    #[error("load sampler unavailable: {0}")]
    Unavailable(String),
}

/// Capability interface for load sampling.
///
/// Implementations are injected at construction. A sampler failure is never
/// silently dropped by the monitor: it is treated as a high-load observation
/// (an unreachable sampler is itself a high-load signal).
pub trait LoadSampler: Send {
    /// Evaluate current resource pressure.
    ///
    /// # Errors
    ///
    /// Returns a [`SamplerError`] when the load source cannot be read or
    /// interpreted.
    fn is_under_high_load(&mut self) -> Result<LoadSignal, SamplerError>;
}

/// Deterministic sampler for tests.
///
/// Plays back a scripted sequence of observations; once the script is
/// exhausted, every further sample is healthy.
#[derive(Debug, Default)]
pub struct ScriptedSampler {
    script: VecDeque<Result<LoadSignal, SamplerError>>,
}

impl ScriptedSampler {
    /// Create a sampler with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a healthy observation to the script.
    pub fn push_healthy(&mut self) -> &mut Self {
        self.script.push_back(Ok(LoadSignal::healthy()));
        self
    }

    /// Append a high-load observation naming the exceeded thresholds.
    pub fn push_under_load<I, S>(&mut self, exceeded: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script.push_back(Ok(LoadSignal::under_load(exceeded)));
        self
    }

    /// Append a sampler failure to the script.
    pub fn push_error(&mut self, reason: impl Into<String>) -> &mut Self {
        self.script
            .push_back(Err(SamplerError::Unavailable(reason.into())));
        self
    }

    /// Number of scripted observations not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl LoadSampler for ScriptedSampler {
    fn is_under_high_load(&mut self) -> Result<LoadSignal, SamplerError> {
        self.script.pop_front().unwrap_or(Ok(LoadSignal::healthy()))
    }
}
