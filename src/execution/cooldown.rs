//! Route-level cooldown with escalating backoff.
//!
//! A route that keeps failing pre-flight or submission is suppressed
//! for an escalating interval (initial × 5 per failure, capped) so the
//! pipeline stops hammering structurally dead spreads. A success clears
//! the entry instantly. Time-based rather than block-based: partitions
//! span chains with very different block times.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Escalation multiplier per failure.
const ESCALATION_FACTOR: u32 = 5;

/// Cooldown cap.
const MAX_COOLDOWN: Duration = Duration::from_secs(1_800);

/// Route identity on the execution side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteId {
    pub buy_chain: String,
    pub sell_chain: String,
    pub pair: String,
}

struct CooldownEntry {
    last_failure: Instant,
    cooldown: Duration,
    failure_count: u32,
}

pub struct RouteCooldown {
    entries: Mutex<HashMap<RouteId, CooldownEntry>>,
    initial: Duration,
}

impl RouteCooldown {
    /// `initial` is the first-failure suppression; zero disables the
    /// tracker entirely.
    pub fn new(initial: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            initial,
        }
    }

    pub fn is_suppressed(&self, route: &RouteId) -> bool {
        if self.initial.is_zero() {
            return false;
        }
        let entries = self.entries.lock().unwrap();
        entries
            .get(route)
            .map(|e| e.last_failure.elapsed() < e.cooldown)
            .unwrap_or(false)
    }

    /// Record a failure; creates or escalates the suppression.
    pub fn record_failure(&self, route: &RouteId) {
        if self.initial.is_zero() {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(route.clone()).or_insert(CooldownEntry {
            last_failure: Instant::now(),
            cooldown: Duration::ZERO,
            failure_count: 0,
        });
        entry.failure_count += 1;
        entry.last_failure = Instant::now();
        let factor = ESCALATION_FACTOR.saturating_pow(entry.failure_count.saturating_sub(1));
        entry.cooldown = self
            .initial
            .saturating_mul(factor)
            .min(MAX_COOLDOWN);
        debug!(
            pair = %route.pair,
            buy_chain = %route.buy_chain,
            sell_chain = %route.sell_chain,
            failures = entry.failure_count,
            cooldown_secs = entry.cooldown.as_secs(),
            "route suppressed"
        );
    }

    /// Record a success — instant reset.
    pub fn record_success(&self, route: &RouteId) {
        let mut entries = self.entries.lock().unwrap();
        if entries.remove(route).is_some() {
            info!(
                pair = %route.pair,
                buy_chain = %route.buy_chain,
                sell_chain = %route.sell_chain,
                "route cooldown reset"
            );
        }
    }

    /// Drop expired entries to bound memory.
    pub fn cleanup(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, e| e.last_failure.elapsed() < e.cooldown);
    }

    pub fn active_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> RouteId {
        RouteId {
            buy_chain: "ethereum".into(),
            sell_chain: "arbitrum".into(),
            pair: "WETH_USDC".into(),
        }
    }

    #[test]
    fn test_fresh_route_not_suppressed() {
        let cooldown = RouteCooldown::new(Duration::from_secs(30));
        assert!(!cooldown.is_suppressed(&route()));
    }

    #[test]
    fn test_failure_then_success_resets() {
        let cooldown = RouteCooldown::new(Duration::from_secs(30));
        cooldown.record_failure(&route());
        assert!(cooldown.is_suppressed(&route()));
        cooldown.record_success(&route());
        assert!(!cooldown.is_suppressed(&route()));
        assert_eq!(cooldown.active_count(), 0);
    }

    #[test]
    fn test_escalation_caps() {
        let cooldown = RouteCooldown::new(Duration::from_secs(30));
        let r = route();
        // 30 → 150 → 750 → 1800 (cap) → 1800
        for _ in 0..5 {
            cooldown.record_failure(&r);
        }
        let entries = cooldown.entries.lock().unwrap();
        assert_eq!(entries.get(&r).unwrap().cooldown, MAX_COOLDOWN);
    }

    #[test]
    fn test_routes_independent() {
        let cooldown = RouteCooldown::new(Duration::from_secs(30));
        cooldown.record_failure(&route());
        let other = RouteId {
            pair: "WBTC_USDC".into(),
            ..route()
        };
        assert!(!cooldown.is_suppressed(&other));
    }

    #[test]
    fn test_disabled_when_zero() {
        let cooldown = RouteCooldown::new(Duration::ZERO);
        cooldown.record_failure(&route());
        assert!(!cooldown.is_suppressed(&route()));
    }

    #[test]
    fn test_expired_entry_cleaned_up() {
        let cooldown = RouteCooldown::new(Duration::from_millis(5));
        cooldown.record_failure(&route());
        assert_eq!(cooldown.active_count(), 1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(!cooldown.is_suppressed(&route()));
        cooldown.cleanup();
        assert_eq!(cooldown.active_count(), 0);
    }
}
