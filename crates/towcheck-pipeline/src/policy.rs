//! Knobs for retries, pacing, and inconclusive carriers.

use std::time::Duration;

use rand::Rng;

use crate::PipelineError;

/// Ceiling for a single retry backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Bounded retry of transient verifier errors within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Verifier calls per carrier, including the first.
    pub max_attempts: u32,
    /// Backoff after the first failure; doubles after each further one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff after `failures` failed attempts: `backoff * 2^(failures-1)`,
    /// capped at [`MAX_BACKOFF`].
    pub fn delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << exp).min(MAX_BACKOFF)
    }
}

/// Random delay between verifier calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub min: Duration,
    pub max: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(3),
            max: Duration::from_secs(6),
        }
    }
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn next_delay(&self) -> Duration {
        if self.max > self.min {
            rand::rng().random_range(self.min..=self.max)
        } else {
            self.min
        }
    }
}

/// What happens to a carrier whose verification stays inconclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InconclusivePolicy {
    /// Record nothing; the carrier is retried on every later run.
    #[default]
    RetryNextRun,
    /// Record each inconclusive run; skip the carrier once it has this many.
    MaxRuns(u32),
}

impl InconclusivePolicy {
    pub fn from_max_runs(max_runs: Option<u32>) -> Self {
        match max_runs {
            Some(n) => Self::MaxRuns(n),
            None => Self::RetryNextRun,
        }
    }

    /// Whether inconclusive outcomes are written to the checkpoint.
    pub fn records(&self) -> bool {
        matches!(self, Self::MaxRuns(_))
    }

    /// Whether a carrier with `runs` recorded inconclusive runs is skipped.
    pub fn exhausted(&self, runs: u32) -> bool {
        match self {
            Self::RetryNextRun => false,
            Self::MaxRuns(n) => runs >= *n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub retry: RetryPolicy,
    pub pacing: Pacing,
    pub inconclusive: InconclusivePolicy,
    /// Log progress after this many processed carriers.
    pub progress_every: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            pacing: Pacing::default(),
            inconclusive: InconclusivePolicy::default(),
            progress_every: 10,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::Config("max attempts must be at least 1".into()));
        }
        if self.pacing.min > self.pacing.max {
            return Err(PipelineError::Config(format!(
                "pacing minimum {:?} exceeds maximum {:?}",
                self.pacing.min, self.pacing.max
            )));
        }
        if self.inconclusive == InconclusivePolicy::MaxRuns(0) {
            return Err(PipelineError::Config("inconclusive max runs must be at least 1".into()));
        }
        if self.progress_every == 0 {
            return Err(PipelineError::Config("progress interval must be at least 1".into()));
        }
        Ok(())
    }
}
