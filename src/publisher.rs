//! Opportunity Publisher
//!
//! Final gate between the detector and the bus. Dedupes by route (the
//! key is venue-agnostic on purpose — "same route, different DEX pair"
//! is the same opportunity), normalises candidates to the wire shape,
//! and appends with a stream cap hint.
//!
//! Within the dedupe TTL a route is published again only when its net
//! profit improves by the configured fraction.

use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bus::{streams, StreamBus};
use crate::types::{now_ms, ArbitrageOpportunity, OpportunityKind};

const DEFAULT_DEDUPE_TTL: Duration = Duration::from_secs(5);
const DEFAULT_MIN_PROFIT_IMPROVEMENT: f64 = 0.10;
const DEFAULT_MAX_CACHE_SIZE: usize = 1_000;

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub dedupe_ttl: Duration,
    pub min_profit_improvement: f64,
    pub max_cache_size: usize,
    pub stream_cap: usize,
    /// USD notional used to scale expectedProfit into token terms.
    pub default_trade_size_usd: f64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            dedupe_ttl: DEFAULT_DEDUPE_TTL,
            min_profit_improvement: DEFAULT_MIN_PROFIT_IMPROVEMENT,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            stream_cap: crate::bus::DEFAULT_STREAM_CAP,
            default_trade_size_usd: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DedupeEntry {
    last_net_profit: f64,
    first_seen_at: u64,
}

pub struct OpportunityPublisher {
    bus: Arc<dyn StreamBus>,
    cache: Mutex<HashMap<u64, DedupeEntry>>,
    config: PublisherConfig,
    published: AtomicU64,
    deduped: AtomicU64,
}

impl OpportunityPublisher {
    pub fn new(bus: Arc<dyn StreamBus>, config: PublisherConfig) -> Self {
        Self {
            bus,
            cache: Mutex::new(HashMap::new()),
            config,
            published: AtomicU64::new(0),
            deduped: AtomicU64::new(0),
        }
    }

    /// Venue-agnostic route key: source chain, target chain, normalised
    /// token pair.
    fn dedupe_key(op: &ArbitrageOpportunity) -> u64 {
        let mut hasher = DefaultHasher::new();
        op.buy_chain.hash(&mut hasher);
        "|".hash(&mut hasher);
        op.sell_chain.hash(&mut hasher);
        "|".hash(&mut hasher);
        op.normalized_pair.hash(&mut hasher);
        hasher.finish()
    }

    /// Publish one opportunity. Returns true iff the record reached the
    /// bus.
    pub async fn publish(&self, op: &ArbitrageOpportunity) -> bool {
        let key = Self::dedupe_key(op);
        let now = now_ms();
        let ttl_ms = self.config.dedupe_ttl.as_millis() as u64;

        // Dedupe decision, remembering the prior state so a failed
        // append can roll the entry back.
        let previous: Option<DedupeEntry>;
        {
            let mut cache = self.cache.lock().unwrap();
            previous = cache.get(&key).copied();

            if let Some(entry) = previous {
                if now.saturating_sub(entry.first_seen_at) < ttl_ms {
                    let improvement = if entry.last_net_profit > 0.0 {
                        (op.net_profit - entry.last_net_profit) / entry.last_net_profit
                    } else if op.net_profit > entry.last_net_profit {
                        // Any gain over a non-positive baseline is 100%
                        1.0
                    } else {
                        0.0
                    };
                    if improvement < self.config.min_profit_improvement {
                        self.deduped.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            pair = %op.normalized_pair,
                            buy_chain = %op.buy_chain,
                            sell_chain = %op.sell_chain,
                            improvement,
                            "opportunity deduped"
                        );
                        return false;
                    }
                    // Improved: update profit, keep the original window
                    cache.insert(
                        key,
                        DedupeEntry {
                            last_net_profit: op.net_profit,
                            first_seen_at: entry.first_seen_at,
                        },
                    );
                } else {
                    cache.insert(
                        key,
                        DedupeEntry {
                            last_net_profit: op.net_profit,
                            first_seen_at: now,
                        },
                    );
                }
            } else {
                cache.insert(
                    key,
                    DedupeEntry {
                        last_net_profit: op.net_profit,
                        first_seen_at: now,
                    },
                );
            }

            if cache.len() > self.config.max_cache_size {
                Self::trim_oldest(&mut cache, self.config.max_cache_size);
            }
        }

        let wire = self.to_wire(op);
        let stream = match wire.kind {
            OpportunityKind::Statistical => streams::STATISTICAL_OPPORTUNITIES,
            _ => streams::OPPORTUNITIES,
        };
        let payload = match serde_json::to_string(&wire) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "opportunity serialization failed");
                self.rollback(key, previous);
                return false;
            }
        };

        match self.bus.append(stream, &payload, self.config.stream_cap).await {
            Ok(record_id) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                info!(
                    id = %wire.id,
                    stream,
                    record_id = %record_id,
                    net_profit = wire.net_profit,
                    confidence = wire.confidence,
                    "opportunity published"
                );
                true
            }
            Err(e) => {
                warn!(error = %e, stream, "bus append failed");
                self.rollback(key, previous);
                false
            }
        }
    }

    fn rollback(&self, key: u64, previous: Option<DedupeEntry>) {
        let mut cache = self.cache.lock().unwrap();
        match previous {
            Some(entry) => {
                cache.insert(key, entry);
            }
            None => {
                cache.remove(&key);
            }
        }
    }

    /// Enrich a candidate into its wire shape. Pending enrichments
    /// arrive with their `pending-<hash>` id already set and keep it.
    fn to_wire(&self, op: &ArbitrageOpportunity) -> ArbitrageOpportunity {
        let mut wire = op.clone();
        if wire.id.is_empty() {
            let prefix = match wire.kind {
                OpportunityKind::Statistical => "statistical",
                _ => "cross-chain",
            };
            let suffix: u32 = rand::thread_rng().gen();
            wire.id = format!("{}-{}-{:08x}", prefix, now_ms(), suffix);
        }
        if wire.token_in.is_empty() || wire.token_out.is_empty() {
            let (base, quote) = crate::types::parse_token_string(&wire.normalized_pair);
            wire.token_in = base;
            wire.token_out = quote;
        }
        wire.bridge_required = wire.buy_chain != wire.sell_chain;
        if !wire.bridge_required {
            wire.bridge_cost = 0.0;
        }
        // Expected profit in token terms, scaled off the source price
        if wire.buy_price > 0.0 && wire.buy_price.is_finite() {
            let amount_in_tokens = self.config.default_trade_size_usd / wire.buy_price;
            wire.expected_profit = wire.percentage_diff * amount_in_tokens;
        }
        wire.profit_percentage = wire.percentage_diff * 100.0;
        if wire.timestamp == 0 {
            wire.timestamp = now_ms();
        }
        wire
    }

    /// Trim oldest-first until the cache fits.
    fn trim_oldest(cache: &mut HashMap<u64, DedupeEntry>, max: usize) {
        let excess = cache.len().saturating_sub(max);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(u64, u64)> = cache
            .iter()
            .map(|(k, e)| (e.first_seen_at, *k))
            .collect();
        by_age.sort_unstable();
        for (_, key) in by_age.into_iter().take(excess) {
            cache.remove(&key);
        }
    }

    /// Drop expired dedupe entries.
    pub fn cleanup(&self) {
        let now = now_ms();
        let ttl_ms = self.config.dedupe_ttl.as_millis() as u64;
        let mut cache = self.cache.lock().unwrap();
        cache.retain(|_, entry| now.saturating_sub(entry.first_seen_at) < ttl_ms);
    }

    /// Wipe the dedupe cache and counters.
    pub fn clear(&self) {
        self.cache.lock().unwrap().clear();
        self.published.store(0, Ordering::Relaxed);
        self.deduped.store(0, Ordering::Relaxed);
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn deduped_count(&self) -> u64 {
        self.deduped.load(Ordering::Relaxed)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}
