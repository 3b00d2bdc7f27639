//! Request-wide deadline shared by every stage of one pipeline run.
//!
//! A [`Timeout`] is created once per request from the overall auction budget and
//! handed to each stage execution. Hook time slices are carved out of whatever is
//! left at the moment a group starts, so time consumed by earlier stages and by
//! the exchange itself is automatically accounted for.

use std::time::{Duration, Instant};

/// Wall-clock deadline for one request.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    start: Instant,
    deadline: Instant,
}

impl Timeout {
    /// Start a new deadline `budget` from now.
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        let start = Instant::now();
        Self {
            start,
            deadline: start + budget,
        }
    }

    /// Convenience constructor from a millisecond budget.
    #[must_use]
    pub fn from_millis(budget_ms: u64) -> Self {
        Self::new(Duration::from_millis(budget_ms))
    }

    /// Time left before the deadline, zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn remaining_ms(&self) -> u64 {
        u64::try_from(self.remaining().as_millis()).unwrap_or(u64::MAX)
    }

    fn elapsed_ms(&self) -> f64 {
        duration_ms(self.start, Instant::now())
    }

    /// Format a single-line log string.
    #[must_use]
    pub fn log_line(&self) -> String {
        format!(
            "Timeout: elapsed={:.1}ms remaining={}ms",
            self.elapsed_ms(),
            self.remaining_ms()
        )
    }
}

fn duration_ms(from: Instant, to: Instant) -> f64 {
    to.duration_since(from).as_secs_f64() * 1000.0
}
