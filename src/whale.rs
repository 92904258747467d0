//! Whale Activity Tracker
//!
//! Sliding-window aggregation of whale-wallet trades per base token.
//! The detector reads direction/volume summaries each cycle; a super
//! whale or a significant net flow additionally forces an immediate
//! detection cycle (the runtime wires the returned signal to the
//! detector's trigger).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::types::{
    now_ms, parse_token_string, DominantDirection, TradeDirection, WhaleActivitySummary,
    WhaleTransaction,
};

/// Rolling window length.
const DEFAULT_WINDOW_MS: u64 = 5 * 60 * 1000;

/// Single-trade USD value at or above which a trade is a super whale.
const DEFAULT_SUPER_THRESHOLD_USD: f64 = 500_000.0;

/// |net flow| above this forces a detection cycle and boosts confidence.
pub const SIGNIFICANT_FLOW_USD: f64 = 100_000.0;

/// Buy-ratio bounds for the dominant direction. Strict inequalities:
/// exactly 0.6 / 0.4 stay neutral.
const BULLISH_RATIO: f64 = 0.6;
const BEARISH_RATIO: f64 = 0.4;

#[derive(Debug, Clone, Copy)]
struct WhaleObservation {
    usd_value: f64,
    direction: TradeDirection,
    timestamp: u64,
}

/// Outcome of recording one whale trade.
#[derive(Debug, Clone)]
pub struct WhaleSignal {
    /// Base token the trade was keyed under.
    pub token: String,
    /// True when the trade must force an immediate detection cycle.
    pub force_detection: bool,
}

pub struct WhaleTracker {
    windows: Mutex<HashMap<String, VecDeque<WhaleObservation>>>,
    window_ms: u64,
    super_threshold_usd: f64,
}

impl WhaleTracker {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_WINDOW_MS, DEFAULT_SUPER_THRESHOLD_USD)
    }

    pub fn with_settings(window_ms: u64, super_threshold_usd: f64) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window_ms,
            super_threshold_usd,
        }
    }

    /// Record one whale trade and report whether it forces a cycle.
    pub fn record(&self, tx: &WhaleTransaction) -> WhaleSignal {
        let (token, _) = parse_token_string(&tx.token_string);
        let now = now_ms();

        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(token.clone()).or_default();
        Self::prune(window, now, self.window_ms);
        window.push_back(WhaleObservation {
            usd_value: tx.usd_value,
            direction: tx.direction,
            timestamp: tx.timestamp.min(now),
        });

        let summary = Self::summarize(window, self.super_threshold_usd);
        let super_whale = tx.usd_value >= self.super_threshold_usd;
        let significant_flow = summary.net_flow_usd.abs() > SIGNIFICANT_FLOW_USD;
        let force_detection = super_whale || significant_flow;

        if force_detection {
            info!(
                token = %token,
                usd_value = tx.usd_value,
                net_flow = summary.net_flow_usd,
                super_whale,
                "whale event forcing detection cycle"
            );
        } else {
            debug!(token = %token, usd_value = tx.usd_value, "whale trade recorded");
        }

        WhaleSignal {
            token,
            force_detection,
        }
    }

    /// Summary for one base token over the active window.
    pub fn activity_summary(&self, token: &str) -> WhaleActivitySummary {
        let now = now_ms();
        let mut windows = self.windows.lock().unwrap();
        match windows.get_mut(token) {
            Some(window) => {
                Self::prune(window, now, self.window_ms);
                Self::summarize(window, self.super_threshold_usd)
            }
            None => WhaleActivitySummary::empty(),
        }
    }

    /// Summaries for every token with live observations.
    pub fn summaries(&self) -> HashMap<String, WhaleActivitySummary> {
        let now = now_ms();
        let mut windows = self.windows.lock().unwrap();
        let mut out = HashMap::new();
        windows.retain(|_, window| {
            Self::prune(window, now, self.window_ms);
            !window.is_empty()
        });
        for (token, window) in windows.iter() {
            out.insert(
                token.clone(),
                Self::summarize(window, self.super_threshold_usd),
            );
        }
        out
    }

    pub fn clear(&self) {
        self.windows.lock().unwrap().clear();
    }

    fn prune(window: &mut VecDeque<WhaleObservation>, now: u64, window_ms: u64) {
        let cutoff = now.saturating_sub(window_ms);
        while window.front().map(|o| o.timestamp < cutoff).unwrap_or(false) {
            window.pop_front();
        }
    }

    fn summarize(
        window: &VecDeque<WhaleObservation>,
        super_threshold: f64,
    ) -> WhaleActivitySummary {
        let mut buy = 0.0;
        let mut sell = 0.0;
        let mut super_whales = 0u32;
        for obs in window {
            match obs.direction {
                TradeDirection::Buy => buy += obs.usd_value,
                TradeDirection::Sell => sell += obs.usd_value,
            }
            if obs.usd_value >= super_threshold {
                super_whales += 1;
            }
        }

        let total = buy + sell;
        let dominant = if total <= 0.0 {
            DominantDirection::Neutral
        } else {
            let ratio = buy / total;
            if ratio > BULLISH_RATIO {
                DominantDirection::Bullish
            } else if ratio < BEARISH_RATIO {
                DominantDirection::Bearish
            } else {
                DominantDirection::Neutral
            }
        };

        WhaleActivitySummary {
            buy_volume_usd: buy,
            sell_volume_usd: sell,
            net_flow_usd: buy - sell,
            super_whale_count: super_whales,
            dominant_direction: dominant,
        }
    }
}

impl Default for WhaleTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whale(token: &str, usd: f64, direction: TradeDirection) -> WhaleTransaction {
        WhaleTransaction {
            tx_hash: "0xabc".into(),
            wallet_address: "0xwallet".into(),
            chain: "ethereum".into(),
            venue: "uniswap".into(),
            pair_address: "0xpool".into(),
            token_string: token.to_string(),
            amount: 1.0,
            usd_value: usd,
            direction,
            price_impact: 0.0,
            timestamp: now_ms(),
        }
    }

    #[test]
    fn test_summary_volumes_and_net_flow() {
        let tracker = WhaleTracker::new();
        tracker.record(&whale("WETH/USDC", 50_000.0, TradeDirection::Buy));
        tracker.record(&whale("WETH/USDC", 20_000.0, TradeDirection::Sell));

        let s = tracker.activity_summary("WETH");
        assert_eq!(s.buy_volume_usd, 50_000.0);
        assert_eq!(s.sell_volume_usd, 20_000.0);
        assert_eq!(s.net_flow_usd, 30_000.0);
        assert_eq!(s.total_volume_usd(), 70_000.0);
    }

    #[test]
    fn test_dominant_direction_boundaries() {
        // 60/40 exactly → neutral (strict inequality)
        let tracker = WhaleTracker::new();
        tracker.record(&whale("AAVE_USDC", 60.0, TradeDirection::Buy));
        tracker.record(&whale("AAVE_USDC", 40.0, TradeDirection::Sell));
        assert_eq!(
            tracker.activity_summary("AAVE").dominant_direction,
            DominantDirection::Neutral
        );

        // 61/39 → bullish
        let tracker = WhaleTracker::new();
        tracker.record(&whale("AAVE_USDC", 61.0, TradeDirection::Buy));
        tracker.record(&whale("AAVE_USDC", 39.0, TradeDirection::Sell));
        assert_eq!(
            tracker.activity_summary("AAVE").dominant_direction,
            DominantDirection::Bullish
        );

        // 39/61 → bearish
        let tracker = WhaleTracker::new();
        tracker.record(&whale("AAVE_USDC", 39.0, TradeDirection::Buy));
        tracker.record(&whale("AAVE_USDC", 61.0, TradeDirection::Sell));
        assert_eq!(
            tracker.activity_summary("AAVE").dominant_direction,
            DominantDirection::Bearish
        );
    }

    #[test]
    fn test_empty_window_is_neutral() {
        let tracker = WhaleTracker::new();
        let s = tracker.activity_summary("NOPE");
        assert_eq!(s.dominant_direction, DominantDirection::Neutral);
        assert_eq!(s.total_volume_usd(), 0.0);
    }

    #[test]
    fn test_super_whale_counts_and_forces() {
        let tracker = WhaleTracker::new();
        let signal = tracker.record(&whale("WETH/USDC", 600_000.0, TradeDirection::Buy));
        assert!(signal.force_detection);
        assert_eq!(tracker.activity_summary("WETH").super_whale_count, 1);

        // Below the threshold on a quiet token: no force
        let signal = tracker.record(&whale("LINK/USDC", 10_000.0, TradeDirection::Buy));
        assert!(!signal.force_detection);
    }

    #[test]
    fn test_significant_net_flow_forces() {
        let tracker = WhaleTracker::new();
        // Three buys of 40k: net flow passes 100k on the third
        assert!(!tracker
            .record(&whale("OP_USDC", 40_000.0, TradeDirection::Buy))
            .force_detection);
        assert!(!tracker
            .record(&whale("OP_USDC", 40_000.0, TradeDirection::Buy))
            .force_detection);
        assert!(tracker
            .record(&whale("OP_USDC", 40_000.0, TradeDirection::Buy))
            .force_detection);
    }

    #[test]
    fn test_venue_prefixed_token_string() {
        let tracker = WhaleTracker::new();
        let signal = tracker.record(&whale("CAMELOT_WETH_USDC", 1_000.0, TradeDirection::Buy));
        assert_eq!(signal.token, "WETH");
        assert!(tracker.activity_summary("WETH").buy_volume_usd > 0.0);
    }

    #[test]
    fn test_old_observations_pruned() {
        let tracker = WhaleTracker::with_settings(1_000, DEFAULT_SUPER_THRESHOLD_USD);
        let mut old = whale("WETH/USDC", 50_000.0, TradeDirection::Buy);
        old.timestamp = now_ms().saturating_sub(10_000);
        tracker.record(&old);

        let s = tracker.activity_summary("WETH");
        assert_eq!(s.total_volume_usd(), 0.0);
        // Fully pruned tokens drop out of the bulk summaries
        assert!(tracker.summaries().is_empty());
    }
}
