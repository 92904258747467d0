//! Cross-Chain Detector
//!
//! Consumes indexed price snapshots (store), whale summaries (tracker)
//! and decoded pending intents (decoder) and emits qualifying
//! opportunities through the deduplicating publisher.
//!
//! Cycle discipline:
//!   - single-flight: a trigger while a cycle runs is skipped, not
//!     queued — the next tick sees fresher state anyway
//!   - circuit breaker: five consecutive cycle errors block detection
//!     for 30s
//!   - the in-cycle scan is one O(n) min/max pass per token pair,
//!     never a sort

mod breaker;
mod costs;

pub use breaker::CircuitBreaker;
pub use costs::{bridge_cost, chain_min_profit, route_gas_cost};

use alloy::primitives::{Address, U256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use crate::liquidity::{LiquidityProvider, LiquidityValidator};
use crate::publisher::OpportunityPublisher;
use crate::store::{IndexedSnapshot, PriceStore};
use crate::types::{
    chain_name, now_ms, ArbitrageOpportunity, DominantDirection, OpportunityKind,
    PendingSwapIntent, PricePoint, WhaleActivitySummary,
};
use crate::whale::{WhaleTracker, SIGNIFICANT_FLOW_USD};

/// Pending intents buffered between cycles are capped; oldest drop.
const PENDING_BUFFER_CAP: usize = 1_024;

/// Confidence multipliers, applied in this fixed order.
const BOOST_BULLISH: f64 = 1.15;
const BOOST_BEARISH: f64 = 0.85;
const BOOST_SUPER_WHALE: f64 = 1.25;
const BOOST_SIGNIFICANT_FLOW: f64 = 1.10;

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// USD notional the profit estimates are scaled to.
    pub trade_size_usd: f64,
    /// Partition-wide minimum price delta (fraction), from config.
    /// The per-chain table still applies on top.
    pub min_profit_fraction: f64,
    /// Candidates below this cache-only liquidity score are dropped.
    pub liquidity_score_floor: f64,
    /// Pending-intent enrichment keeps only counter-prices above this.
    pub pending_min_price_diff: f64,
    /// Intents expiring within this buffer are stale.
    pub deadline_buffer_secs: u64,
    /// Intents below this input amount (wei-equivalent) are noise.
    pub min_intent_amount_wei: U256,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            trade_size_usd: 10_000.0,
            min_profit_fraction: 0.003,
            liquidity_score_floor: 0.5,
            pending_min_price_diff: 0.005,
            deadline_buffer_secs: 30,
            // 0.01 ETH
            min_intent_amount_wei: U256::from(10_000_000_000_000_000u64),
        }
    }
}

/// Where execution liquidity for a (chain, token) route is probed.
struct AssetRoute {
    provider: LiquidityProvider,
    asset: Address,
    probe_amount: U256,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DetectorStats {
    pub detection_count: u64,
    pub skipped_count: u64,
    pub opportunities_found: u64,
    pub pending_enriched: u64,
    pub intents_rejected: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed { candidates: usize, published: usize },
    SkippedBusy,
    SkippedBreakerOpen,
}

pub struct CrossChainDetector {
    store: Arc<PriceStore>,
    whales: Arc<WhaleTracker>,
    liquidity: Arc<LiquidityValidator>,
    publisher: Arc<OpportunityPublisher>,
    settings: DetectorSettings,
    is_detecting: AtomicBool,
    breaker: CircuitBreaker,
    pending: Mutex<Vec<PendingSwapIntent>>,
    /// (chain, base symbol) → execution liquidity route.
    asset_routes: HashMap<(String, String), AssetRoute>,
    /// (chain id, token address) → symbol, for intent enrichment.
    token_symbols: HashMap<(u64, Address), String>,
    detection_count: AtomicU64,
    skipped_count: AtomicU64,
    opportunities_found: AtomicU64,
    pending_enriched: AtomicU64,
    intents_rejected: AtomicU64,
}

impl CrossChainDetector {
    pub fn new(
        store: Arc<PriceStore>,
        whales: Arc<WhaleTracker>,
        liquidity: Arc<LiquidityValidator>,
        publisher: Arc<OpportunityPublisher>,
        settings: DetectorSettings,
    ) -> Self {
        Self {
            store,
            whales,
            liquidity,
            publisher,
            settings,
            is_detecting: AtomicBool::new(false),
            breaker: CircuitBreaker::new(),
            pending: Mutex::new(Vec::new()),
            asset_routes: HashMap::new(),
            token_symbols: HashMap::new(),
            detection_count: AtomicU64::new(0),
            skipped_count: AtomicU64::new(0),
            opportunities_found: AtomicU64::new(0),
            pending_enriched: AtomicU64::new(0),
            intents_rejected: AtomicU64::new(0),
        }
    }

    /// Register where execution liquidity for a (chain, token) route is
    /// probed. Routes without an entry score the optimistic 1.0.
    pub fn register_asset_route(
        &mut self,
        chain: &str,
        symbol: &str,
        provider: LiquidityProvider,
        asset: Address,
        probe_amount: U256,
    ) {
        self.asset_routes.insert(
            (chain.to_string(), symbol.to_string()),
            AssetRoute {
                provider,
                asset,
                probe_amount,
            },
        );
    }

    /// Register a token address → symbol mapping used when enriching
    /// pending intents.
    pub fn register_token_symbol(&mut self, chain_id: u64, token: Address, symbol: &str) {
        self.token_symbols
            .insert((chain_id, token), symbol.to_string());
    }

    /// Queue a decoded pending intent for the next cycle.
    pub fn ingest_intent(&self, intent: PendingSwapIntent) {
        let mut pending = self.pending.lock().unwrap();
        if pending.len() >= PENDING_BUFFER_CAP {
            pending.remove(0);
        }
        pending.push(intent);
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            detection_count: self.detection_count.load(Ordering::Relaxed),
            skipped_count: self.skipped_count.load(Ordering::Relaxed),
            opportunities_found: self.opportunities_found.load(Ordering::Relaxed),
            pending_enriched: self.pending_enriched.load(Ordering::Relaxed),
            intents_rejected: self.intents_rejected.load(Ordering::Relaxed),
        }
    }

    /// Run one detection cycle. Triggers while a cycle is in flight are
    /// skipped, not queued.
    pub async fn run_cycle(&self, forced_by_whale: bool) -> CycleOutcome {
        if self.breaker.is_open() {
            self.skipped_count.fetch_add(1, Ordering::Relaxed);
            debug!("detection cycle skipped: circuit breaker open");
            return CycleOutcome::SkippedBreakerOpen;
        }
        if self
            .is_detecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.skipped_count.fetch_add(1, Ordering::Relaxed);
            debug!("detection cycle skipped: already detecting");
            return CycleOutcome::SkippedBusy;
        }

        let result = self.run_cycle_inner(forced_by_whale).await;
        // The guard clears on success and error alike
        self.is_detecting.store(false, Ordering::SeqCst);

        match result {
            Ok((candidates, published)) => {
                self.breaker.record_success();
                self.detection_count.fetch_add(1, Ordering::Relaxed);
                CycleOutcome::Completed {
                    candidates,
                    published,
                }
            }
            Err(e) => {
                self.breaker.record_error();
                error!(error = %e, "detection cycle failed");
                CycleOutcome::Completed {
                    candidates: 0,
                    published: 0,
                }
            }
        }
    }

    async fn run_cycle_inner(&self, forced_by_whale: bool) -> anyhow::Result<(usize, usize)> {
        let snapshot = self.store.indexed_snapshot();
        let summaries = self.whales.summaries();

        let mut candidates: Vec<ArbitrageOpportunity> = Vec::new();
        for pair in &snapshot.token_pairs {
            if let Some(op) = self.scan_pair(&snapshot, pair, &summaries, forced_by_whale) {
                candidates.push(op);
            }
        }

        let drained: Vec<PendingSwapIntent> =
            std::mem::take(&mut *self.pending.lock().unwrap());
        for intent in drained {
            match self.enrich_pending(&snapshot, &intent, forced_by_whale) {
                Some(op) => {
                    self.pending_enriched.fetch_add(1, Ordering::Relaxed);
                    candidates.push(op);
                }
                None => {
                    self.intents_rejected.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        // Whale-forced routes first, then by net profit
        candidates.sort_by(|a, b| {
            b.whale_triggered
                .cmp(&a.whale_triggered)
                .then_with(|| {
                    b.net_profit
                        .partial_cmp(&a.net_profit)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });

        let found = candidates.len();
        self.opportunities_found
            .fetch_add(found as u64, Ordering::Relaxed);

        let mut published = 0usize;
        for candidate in &candidates {
            if self.publisher.publish(candidate).await {
                published += 1;
            }
        }

        if found > 0 {
            info!(
                candidates = found,
                published,
                forced_by_whale,
                snapshot_version = snapshot.version,
                "detection cycle complete"
            );
        }
        Ok((found, published))
    }

    /// One O(n) min/max pass over a pair's price points.
    fn scan_pair(
        &self,
        snapshot: &IndexedSnapshot,
        pair: &str,
        summaries: &HashMap<String, WhaleActivitySummary>,
        forced_by_whale: bool,
    ) -> Option<ArbitrageOpportunity> {
        let points = snapshot.points_for(pair);
        let mut min: Option<&PricePoint> = None;
        let mut max: Option<&PricePoint> = None;
        for point in points {
            if !point.price.is_finite() || point.price <= 0.0 {
                continue;
            }
            if min.map(|m| point.price < m.price).unwrap_or(true) {
                min = Some(point);
            }
            if max.map(|m| point.price > m.price).unwrap_or(true) {
                max = Some(point);
            }
        }
        let (buy, sell) = (min?, max?);

        if sell.price - buy.price <= 0.0 {
            return None;
        }
        if buy.chain == sell.chain {
            return None;
        }

        let percentage_diff = (sell.price - buy.price) / buy.price;
        let threshold = chain_min_profit(&buy.chain).max(self.settings.min_profit_fraction);
        if percentage_diff < threshold {
            return None;
        }

        let bridge = bridge_cost(&buy.chain, &sell.chain);
        let gas = route_gas_cost(&buy.chain, &sell.chain);
        let gross_profit = percentage_diff * self.settings.trade_size_usd;
        let net_profit = gross_profit - bridge - gas;
        if net_profit <= 0.0 {
            debug!(pair, net_profit, "route unprofitable after costs");
            return None;
        }

        let base = pair.split('_').next().unwrap_or(pair);
        let score = self.liquidity_score(&buy.chain, base);
        if score < self.settings.liquidity_score_floor {
            debug!(pair, score, "route dropped on liquidity score");
            return None;
        }

        let confidence = Self::confidence(percentage_diff, summaries.get(base));
        let (token_in, token_out) = {
            let mut parts = pair.splitn(2, '_');
            (
                parts.next().unwrap_or_default().to_string(),
                parts.next().unwrap_or_default().to_string(),
            )
        };

        Some(ArbitrageOpportunity {
            id: String::new(),
            kind: OpportunityKind::CrossChain,
            buy_chain: buy.chain.clone(),
            sell_chain: sell.chain.clone(),
            buy_venue: buy.venue.clone(),
            sell_venue: sell.venue.clone(),
            token_in,
            token_out,
            normalized_pair: pair.to_string(),
            buy_price: buy.price,
            sell_price: sell.price,
            percentage_diff,
            bridge_required: true,
            bridge_cost: bridge,
            expected_profit: gross_profit,
            profit_percentage: percentage_diff * 100.0,
            net_profit,
            confidence,
            whale_triggered: forced_by_whale,
            timestamp: now_ms(),
            hops: None,
            source: None,
            pending_tx_hash: None,
            pending_deadline: None,
            pending_slippage: None,
            router_type: None,
        })
    }

    /// Base signal from the spread size, then the whale boosters in
    /// their fixed order, clamped to [0, 1].
    fn confidence(percentage_diff: f64, summary: Option<&WhaleActivitySummary>) -> f64 {
        let mut c = (0.5 + percentage_diff * 8.0).min(0.9);
        if let Some(s) = summary {
            c *= match s.dominant_direction {
                DominantDirection::Bullish => BOOST_BULLISH,
                DominantDirection::Bearish => BOOST_BEARISH,
                DominantDirection::Neutral => 1.0,
            };
            if s.super_whale_count > 0 {
                c *= BOOST_SUPER_WHALE;
            }
            if s.net_flow_usd.abs() > SIGNIFICANT_FLOW_USD {
                c *= BOOST_SIGNIFICANT_FLOW;
            }
        }
        c.clamp(0.0, 1.0)
    }

    /// Cache-only liquidity score for the buy side of a route.
    fn liquidity_score(&self, chain: &str, base_symbol: &str) -> f64 {
        match self
            .asset_routes
            .get(&(chain.to_string(), base_symbol.to_string()))
        {
            Some(route) => self.liquidity.estimate_liquidity_score(
                &route.provider,
                route.asset,
                route.probe_amount,
            ),
            // No registered execution route: optimistic, like C4
            None => 1.0,
        }
    }

    /// Enrich one pending intent against the snapshot. Stale or dust
    /// intents are rejected; otherwise the single best cross-chain
    /// counter-price above the threshold becomes a candidate.
    fn enrich_pending(
        &self,
        snapshot: &IndexedSnapshot,
        intent: &PendingSwapIntent,
        forced_by_whale: bool,
    ) -> Option<ArbitrageOpportunity> {
        let now_secs = now_ms() / 1_000;
        if intent.deadline <= now_secs + self.settings.deadline_buffer_secs {
            debug!(hash = %intent.hash, deadline = intent.deadline, "intent too close to deadline");
            return None;
        }
        if intent.amount_in < self.settings.min_intent_amount_wei {
            debug!(hash = %intent.hash, "intent below minimum size");
            return None;
        }

        let in_symbol = self
            .token_symbols
            .get(&(intent.chain_id, intent.token_in))?;
        let out_symbol = self
            .token_symbols
            .get(&(intent.chain_id, intent.token_out))?;

        // The snapshot indexes normalised pairs; try both orientations
        let pair = [
            format!("{}_{}", in_symbol, out_symbol),
            format!("{}_{}", out_symbol, in_symbol),
        ]
        .into_iter()
        .find(|p| !snapshot.points_for(p).is_empty())?;

        let local_chain = chain_name(intent.chain_id);
        let points = snapshot.points_for(&pair);
        let mut best: Option<(&PricePoint, &PricePoint, f64)> = None;
        for local in points.iter().filter(|p| p.chain == local_chain) {
            if !local.price.is_finite() || local.price <= 0.0 {
                continue;
            }
            for remote in points.iter().filter(|p| p.chain != local_chain) {
                if !remote.price.is_finite() || remote.price <= 0.0 {
                    continue;
                }
                let low = local.price.min(remote.price);
                let high = local.price.max(remote.price);
                let diff = (high - low) / low;
                if best.map(|(_, _, d)| diff > d).unwrap_or(true) {
                    best = Some((local, remote, diff));
                }
            }
        }
        let (local, remote, diff) = best?;
        if diff <= self.settings.pending_min_price_diff {
            return None;
        }

        let (buy, sell) = if local.price <= remote.price {
            (local, remote)
        } else {
            (remote, local)
        };

        let slippage_adjustment = if intent.slippage_tolerance > 0.03 {
            0.7
        } else if intent.slippage_tolerance > 0.01 {
            0.9
        } else {
            1.0
        };
        let confidence = 0.7 * slippage_adjustment;

        let cross_chain = buy.chain != sell.chain;
        let bridge = if cross_chain {
            bridge_cost(&buy.chain, &sell.chain)
        } else {
            0.0
        };
        let gas = route_gas_cost(&buy.chain, &sell.chain);
        let gross_profit = diff * self.settings.trade_size_usd;

        Some(ArbitrageOpportunity {
            id: format!("pending-{}", intent.hash),
            kind: if cross_chain {
                OpportunityKind::CrossChain
            } else {
                OpportunityKind::IntraChain
            },
            buy_chain: buy.chain.clone(),
            sell_chain: sell.chain.clone(),
            buy_venue: buy.venue.clone(),
            sell_venue: sell.venue.clone(),
            token_in: in_symbol.clone(),
            token_out: out_symbol.clone(),
            normalized_pair: pair.clone(),
            buy_price: buy.price,
            sell_price: sell.price,
            percentage_diff: diff,
            bridge_required: cross_chain,
            bridge_cost: bridge,
            expected_profit: gross_profit,
            profit_percentage: diff * 100.0,
            net_profit: gross_profit - bridge - gas,
            confidence,
            whale_triggered: forced_by_whale,
            timestamp: now_ms(),
            hops: None,
            source: Some("mempool".to_string()),
            pending_tx_hash: Some(intent.hash.clone()),
            pending_deadline: Some(intent.deadline),
            pending_slippage: Some(intent.slippage_tolerance),
            router_type: Some(intent.kind),
        })
    }

    #[cfg(test)]
    fn force_busy(&self, busy: bool) {
        self.is_detecting.store(busy, Ordering::SeqCst);
    }
}
