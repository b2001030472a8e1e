//! Run counters and the periodic progress line.

use std::time::{Duration, Instant};

use tracing::info;

/// Progress of one run over the carriers that were pending at its start.
pub struct RunStats {
    started: Instant,
    pending: usize,
    processed: usize,
    verified: usize,
}

impl RunStats {
    pub fn new(pending: usize) -> Self {
        Self {
            started: Instant::now(),
            pending,
            processed: 0,
            verified: 0,
        }
    }

    pub fn record(&mut self, verified: bool) {
        self.processed += 1;
        if verified {
            self.verified += 1;
        }
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn snapshot(&self) -> Progress {
        Progress::compute(self.processed, self.verified, self.pending, self.started.elapsed())
    }

    pub fn report(&self) {
        let p = self.snapshot();
        info!(
            processed = p.processed,
            remaining = p.remaining,
            verified = p.verified,
            hit_rate = %format!("{:.1}%", p.hit_rate * 100.0),
            per_minute = %format!("{:.1}", p.per_minute),
            eta = %p.eta.map(format_duration).unwrap_or_else(|| "-".into()),
            "progress"
        );
    }
}

/// Derived progress figures at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub processed: usize,
    pub remaining: usize,
    pub verified: usize,
    /// Verified share of processed carriers, 0.0 to 1.0.
    pub hit_rate: f64,
    pub per_minute: f64,
    pub eta: Option<Duration>,
}

impl Progress {
    pub fn compute(processed: usize, verified: usize, pending: usize, elapsed: Duration) -> Self {
        let remaining = pending.saturating_sub(processed);
        let hit_rate = if processed == 0 {
            0.0
        } else {
            verified as f64 / processed as f64
        };
        let minutes = elapsed.as_secs_f64() / 60.0;
        let per_minute = if minutes > 0.0 {
            processed as f64 / minutes
        } else {
            0.0
        };
        let eta = (per_minute > 0.0).then(|| {
            Duration::from_secs_f64(remaining as f64 / per_minute * 60.0)
        });
        Self {
            processed,
            remaining,
            verified,
            hit_rate,
            per_minute,
            eta,
        }
    }
}

/// `1h 05m`, `12m 30s`, or `45s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}
