//! Detection-loop circuit breaker.
//!
//! Five consecutive cycle errors trip the breaker; while open (30s) no
//! new cycles start. Any successful cycle resets the error count.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const DEFAULT_THRESHOLD: u32 = 5;
const DEFAULT_OPEN_FOR: Duration = Duration::from_secs(30);

pub struct CircuitBreaker {
    consecutive_errors: AtomicU32,
    last_trip: Mutex<Option<Instant>>,
    threshold: u32,
    open_for: Duration,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_THRESHOLD, DEFAULT_OPEN_FOR)
    }

    pub fn with_settings(threshold: u32, open_for: Duration) -> Self {
        Self {
            consecutive_errors: AtomicU32::new(0),
            last_trip: Mutex::new(None),
            threshold: threshold.max(1),
            open_for,
        }
    }

    /// True while the breaker blocks new cycles.
    pub fn is_open(&self) -> bool {
        let last_trip = self.last_trip.lock().unwrap();
        match *last_trip {
            Some(at) => at.elapsed() < self.open_for,
            None => false,
        }
    }

    /// Record a failed cycle; trips the breaker at the threshold.
    pub fn record_error(&self) {
        let errors = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        if errors >= self.threshold {
            let mut last_trip = self.last_trip.lock().unwrap();
            let already_open = last_trip
                .map(|at| at.elapsed() < self.open_for)
                .unwrap_or(false);
            if !already_open {
                *last_trip = Some(Instant::now());
                warn!(
                    consecutive_errors = errors,
                    open_for_secs = self.open_for.as_secs(),
                    "detection circuit breaker tripped"
                );
            }
        }
    }

    /// Record a successful cycle; closes the breaker and resets the
    /// error count.
    pub fn record_success(&self) {
        let had_errors = self.consecutive_errors.swap(0, Ordering::SeqCst) > 0;
        let mut last_trip = self.last_trip.lock().unwrap();
        if last_trip.take().is_some() || had_errors {
            info!("detection circuit breaker reset");
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_at_threshold() {
        let breaker = CircuitBreaker::new();
        for _ in 0..4 {
            breaker.record_error();
        }
        assert!(!breaker.is_open());
        breaker.record_error(); // fifth
        assert!(breaker.is_open());
    }

    #[test]
    fn test_success_resets_counter() {
        let breaker = CircuitBreaker::new();
        for _ in 0..4 {
            breaker.record_error();
        }
        breaker.record_success();
        assert_eq!(breaker.consecutive_errors(), 0);
        // Four more after the reset still do not trip
        for _ in 0..4 {
            breaker.record_error();
        }
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_open_window_expires() {
        let breaker = CircuitBreaker::with_settings(1, Duration::from_millis(30));
        breaker.record_error();
        assert!(breaker.is_open());
        std::thread::sleep(Duration::from_millis(50));
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_success_closes_open_breaker() {
        let breaker = CircuitBreaker::with_settings(1, Duration::from_secs(60));
        breaker.record_error();
        assert!(breaker.is_open());
        breaker.record_success();
        assert!(!breaker.is_open());
    }
}
