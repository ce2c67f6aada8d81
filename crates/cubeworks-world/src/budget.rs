//! Per-tick time budget shared by all chunks for edge synchronisation.

use std::time::{Duration, Instant};

/// Wall-clock budget consumed by measured sections and refilled each tick.
#[derive(Debug, Clone)]
pub struct TimeBudget {
    /// Allowed time per tick.
    pub limit: Duration,
    spent: Duration,
    started: Option<Instant>,
}

impl TimeBudget {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            spent: Duration::ZERO,
            started: None,
        }
    }

    /// `true` while this tick's measured sections stayed under the limit.
    pub fn has_time_budget(&self) -> bool {
        self.spent < self.limit
    }

    pub fn start_measurement(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn stop_measurement(&mut self) {
        if let Some(started) = self.started.take() {
            self.spent += started.elapsed();
        }
    }

    pub fn spent(&self) -> Duration {
        self.spent
    }

    /// Refills the budget. Called at the start of every tick.
    pub fn reset(&mut self) {
        self.spent = Duration::ZERO;
        self.started = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
