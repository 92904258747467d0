//! Gas-spike detection.
//!
//! A per-chain rolling window of recently observed gas prices backs a
//! TTL-cached median. A candidate price is a spike when it exceeds 2×
//! the median — strictly: exactly 2.00× is NOT a spike. Comparison runs
//! in integer domain (`p × 100 > m × 200`) so no float rounding can
//! move the boundary.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Samples kept per chain.
const WINDOW_SIZE: usize = 10;

/// Cached median lifetime.
const MEDIAN_TTL: Duration = Duration::from_secs(60);

/// Below this many samples the baseline is noise; never report spikes.
const MIN_SAMPLES: usize = 3;

struct ChainWindow {
    samples: VecDeque<u128>,
    cached_median: Option<(u128, Instant)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpikeCheck {
    /// No baseline yet, or candidate within bounds.
    Ok,
    /// Candidate exceeded 2× the median.
    Spike {
        candidate_gwei: f64,
        median_gwei: f64,
        ratio: f64,
    },
}

pub struct GasSpikeDetector {
    windows: DashMap<String, ChainWindow>,
}

impl GasSpikeDetector {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Record an observed gas price (wei).
    pub fn record(&self, chain: &str, price_wei: u128) {
        let mut window = self.windows.entry(chain.to_string()).or_insert(ChainWindow {
            samples: VecDeque::with_capacity(WINDOW_SIZE),
            cached_median: None,
        });
        if window.samples.len() == WINDOW_SIZE {
            window.samples.pop_front();
        }
        window.samples.push_back(price_wei);
    }

    /// Median of the chain's window, recomputed at most once per TTL.
    fn median(&self, chain: &str) -> Option<u128> {
        let mut window = self.windows.get_mut(chain)?;
        if window.samples.len() < MIN_SAMPLES {
            return None;
        }
        if let Some((median, at)) = window.cached_median {
            if at.elapsed() < MEDIAN_TTL {
                return Some(median);
            }
        }
        let mut sorted: Vec<u128> = window.samples.iter().copied().collect();
        sorted.sort_unstable();
        let median = sorted[sorted.len() / 2];
        window.cached_median = Some((median, Instant::now()));
        Some(median)
    }

    /// Check a candidate price (wei) against the chain baseline.
    pub fn check(&self, chain: &str, candidate_wei: u128) -> SpikeCheck {
        let median = match self.median(chain) {
            Some(m) if m > 0 => m,
            _ => return SpikeCheck::Ok,
        };
        // Strict: exactly 2× is not a spike
        if candidate_wei.saturating_mul(100) > median.saturating_mul(200) {
            let candidate_gwei = candidate_wei as f64 / 1e9;
            let median_gwei = median as f64 / 1e9;
            SpikeCheck::Spike {
                candidate_gwei,
                median_gwei,
                ratio: candidate_wei as f64 / median as f64,
            }
        } else {
            SpikeCheck::Ok
        }
    }

    #[cfg(test)]
    fn expire_median_cache(&self, chain: &str) {
        if let Some(mut window) = self.windows.get_mut(chain) {
            window.cached_median = None;
        }
    }
}

impl Default for GasSpikeDetector {
    fn default() -> Self {
        Self::new()
    }
}
