//! # Fibonacci Backoff
//!
//! Backoff applied by the error policy when a reconcile returns an error to the
//! runtime. Only failures to record status reach the runtime; business failures
//! are turned into a requeue decision by the reconciler itself.
//!
//! The sequence is calculated in minutes: 1m, 1m, 2m, 3m, 5m, 8m, 10m (max).
//!
//! ```rust
//! use external_secrets_operator::controller::backoff::FibonacciBackoff;
//!
//! let mut backoff = FibonacciBackoff::new(1, 10);
//! assert_eq!(backoff.next_backoff_seconds(), 60);
//! assert_eq!(backoff.next_backoff_seconds(), 60);
//! assert_eq!(backoff.next_backoff_seconds(), 120);
//! ```

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    prev_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min_minutes` and capped at `max_minutes`
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result_seconds = self.current_minutes * 60;
        let next_minutes = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = std::cmp::min(next_minutes, self.max_minutes);
        result_seconds
    }

    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}

/// Backoff state for one primary resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10),
            error_count: 0,
        }
    }
}

impl BackoffState {
    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence_caps_at_max() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        let seq: Vec<u64> = (0..9).map(|_| backoff.next_backoff_seconds()).collect();
        assert_eq!(seq, vec![60, 60, 120, 180, 300, 480, 600, 600, 600]);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(120));
    }

    #[test]
    fn test_backoff_state_counts_and_resets() {
        let mut state = BackoffState::default();
        state.increment_error();
        state.increment_error();
        assert_eq!(state.error_count, 2);
        assert_eq!(state.backoff.next_backoff_seconds(), 60);
        state.reset();
        assert_eq!(state.error_count, 0);
        assert_eq!(state.backoff.next_backoff_seconds(), 60);
    }
}
