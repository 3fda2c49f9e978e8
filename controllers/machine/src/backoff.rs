//! # Fibonacci Backoff
//!
//! Provides a Fibonacci-based backoff for retrying failed reconciliations.
//! It grows more slowly than exponential backoff, so provisioning errors that
//! clear on their own (quota, transient API failures) are retried promptly
//! without hammering the compute API.
//!
//! Sequence with the controller defaults: 10s, 10s, 20s, 30s, 50s, 80s, 130s, 210s, 300s (max).

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Previous backoff value in seconds
    prev_seconds: u64,
    /// Current backoff value in seconds
    current_seconds: u64,
    /// Maximum backoff value in seconds
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with minimum and maximum values in seconds
    ///
    /// # Arguments
    ///
    /// * `min_seconds` - Used for the first two values
    /// * `max_seconds` - Caps the sequence
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_seconds;

        let next = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = std::cmp::min(next, self.max_seconds);

        Duration::from_secs(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(backoff: &mut FibonacciBackoff) -> u64 {
        backoff.next_backoff().as_secs()
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(10, 300);

        assert_eq!(secs(&mut backoff), 10);
        assert_eq!(secs(&mut backoff), 10);
        assert_eq!(secs(&mut backoff), 20);
        assert_eq!(secs(&mut backoff), 30);
        assert_eq!(secs(&mut backoff), 50);
        assert_eq!(secs(&mut backoff), 80);
        assert_eq!(secs(&mut backoff), 130);
        assert_eq!(secs(&mut backoff), 210);
        assert_eq!(secs(&mut backoff), 300);
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(10, 300);
        for _ in 0..9 {
            backoff.next_backoff();
        }

        // Next would be 510s (210 + 300), but stays at the cap
        assert_eq!(secs(&mut backoff), 300);
        assert_eq!(secs(&mut backoff), 300);
    }
}
