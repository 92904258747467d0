//! Price Data Store
//!
//! Hierarchical (chain → venue → pair key) map of the most recent
//! confirmed price per pool, with:
//!   - a cached pair counter (no O(n) traversal on `pair_count()`)
//!   - a 53-bit mutation version with safe wraparound to 1
//!   - deterministic cleanup every N updates (stale prices dropped,
//!     empty venue/chain nodes pruned)
//!   - a version-checked cached snapshot: `indexed_snapshot()` is O(1)
//!     between mutations and rebuilds at most once per version
//!
//! Readers always observe either the previous snapshot Arc entirely or
//! the new one entirely; snapshots are immutable after publication.

mod normalize;
mod snapshot;

pub use normalize::{normalize_pair, NormalizedPairCache};
pub use snapshot::IndexedSnapshot;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::types::{now_ms, PricePoint, PriceUpdate};

/// 53-bit ceiling for the snapshot version counter.
pub const MAX_SNAPSHOT_VERSION: u64 = (1u64 << 53) - 1;

/// Headroom before the ceiling at which the counter wraps back to 1.
const VERSION_RESET_MARGIN: u64 = 1_000;

/// Cleanup cadence: runs after this many accepted updates.
const DEFAULT_CLEANUP_EVERY: u64 = 100;

/// Updates older than this are dropped by cleanup.
const DEFAULT_MAX_AGE_MS: u64 = 5 * 60 * 1000;

type ChainMap = HashMap<String, HashMap<String, HashMap<String, PriceUpdate>>>;

struct StoreInner {
    price_data: ChainMap,
    /// Cached count of live pairs; adjusted on insert/delete.
    pair_count: usize,
    /// Advances on every mutation; wraps to 1 near the 53-bit ceiling.
    version: u64,
    cached_snapshot: Option<Arc<IndexedSnapshot>>,
    /// Version the cached snapshot was built at; -1 forces a rebuild.
    cached_version: i64,
    updates_since_cleanup: u64,
    norm_cache: NormalizedPairCache,
    rejected_updates: u64,
}

/// Thread-safe price store. One instance per partition, shared via Arc.
pub struct PriceStore {
    inner: RwLock<StoreInner>,
    cleanup_every: u64,
    max_age_ms: u64,
}

impl PriceStore {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_CLEANUP_EVERY, DEFAULT_MAX_AGE_MS)
    }

    pub fn with_settings(cleanup_every: u64, max_age_ms: u64) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                price_data: HashMap::new(),
                pair_count: 0,
                version: 0,
                cached_snapshot: None,
                cached_version: -1,
                updates_since_cleanup: 0,
                norm_cache: NormalizedPairCache::new(),
                rejected_updates: 0,
            }),
            cleanup_every: cleanup_every.max(1),
            max_age_ms,
        }
    }

    /// Upsert one confirmed price. Invalid prices (zero, negative, NaN)
    /// are rejected and counted, never stored.
    pub fn handle_price_update(&self, update: PriceUpdate) -> bool {
        if !update.has_valid_price() {
            let mut inner = self.inner.write().unwrap();
            inner.rejected_updates += 1;
            debug!(
                chain = %update.chain,
                venue = %update.venue,
                pair = %update.pair_key,
                price = update.price,
                "rejected price update"
            );
            return false;
        }

        let mut inner = self.inner.write().unwrap();
        let venue_map = inner
            .price_data
            .entry(update.chain.clone())
            .or_default()
            .entry(update.venue.clone())
            .or_default();
        let is_new = !venue_map.contains_key(&update.pair_key);
        venue_map.insert(update.pair_key.clone(), update);
        if is_new {
            inner.pair_count += 1;
        }
        Self::bump_version(&mut inner);

        inner.updates_since_cleanup += 1;
        if inner.updates_since_cleanup >= self.cleanup_every {
            self.cleanup_locked(&mut inner, now_ms());
        }
        true
    }

    /// Drop stale updates and prune empty nodes. Bumps the version only
    /// when something was removed.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.inner.write().unwrap();
        self.cleanup_locked(&mut inner, now_ms())
    }

    fn cleanup_locked(&self, inner: &mut StoreInner, now: u64) -> usize {
        inner.updates_since_cleanup = 0;
        let cutoff = now.saturating_sub(self.max_age_ms);
        let mut removed = 0usize;

        // Key sets are materialised up front so node removal cannot
        // invalidate the iteration.
        let chains: Vec<String> = inner.price_data.keys().cloned().collect();
        for chain in chains {
            let venues: Vec<String> = match inner.price_data.get(&chain) {
                Some(m) => m.keys().cloned().collect(),
                None => continue,
            };
            for venue in venues {
                let pairs: Vec<String> = match inner
                    .price_data
                    .get(&chain)
                    .and_then(|c| c.get(&venue))
                {
                    Some(m) => m.keys().cloned().collect(),
                    None => continue,
                };
                for pair in pairs {
                    let stale = inner
                        .price_data
                        .get(&chain)
                        .and_then(|c| c.get(&venue))
                        .and_then(|v| v.get(&pair))
                        .map(|u| u.timestamp < cutoff)
                        .unwrap_or(false);
                    if stale {
                        if let Some(venue_map) = inner
                            .price_data
                            .get_mut(&chain)
                            .and_then(|c| c.get_mut(&venue))
                        {
                            venue_map.remove(&pair);
                            inner.pair_count = inner.pair_count.saturating_sub(1);
                            removed += 1;
                        }
                    }
                }
                let venue_empty = inner
                    .price_data
                    .get(&chain)
                    .and_then(|c| c.get(&venue))
                    .map(|v| v.is_empty())
                    .unwrap_or(false);
                if venue_empty {
                    if let Some(chain_map) = inner.price_data.get_mut(&chain) {
                        chain_map.remove(&venue);
                    }
                }
            }
            let chain_empty = inner
                .price_data
                .get(&chain)
                .map(|c| c.is_empty())
                .unwrap_or(false);
            if chain_empty {
                inner.price_data.remove(&chain);
            }
        }

        if removed > 0 {
            Self::bump_version(inner);
            debug!(removed, pair_count = inner.pair_count, "price store cleanup");
        }
        removed
    }

    /// Advance the version, wrapping to 1 (never 0) near the 53-bit
    /// ceiling. On wrap the cached version is poisoned so the next
    /// snapshot rebuilds.
    fn bump_version(inner: &mut StoreInner) {
        inner.version += 1;
        if inner.version > MAX_SNAPSHOT_VERSION - VERSION_RESET_MARGIN {
            info!(
                old_version = inner.version,
                "snapshot version wrapped to 1"
            );
            inner.version = 1;
            inner.cached_version = -1;
        }
    }

    /// Current indexed snapshot. O(1) when the store has not mutated
    /// since the last build; cache hits do not log.
    pub fn indexed_snapshot(&self) -> Arc<IndexedSnapshot> {
        {
            let inner = self.inner.read().unwrap();
            if let Some(snap) = &inner.cached_snapshot {
                if inner.cached_version == inner.version as i64 {
                    return Arc::clone(snap);
                }
            }
        }

        let mut inner = self.inner.write().unwrap();
        // Double-check: another writer may have rebuilt while we waited.
        if let Some(snap) = &inner.cached_snapshot {
            if inner.cached_version == inner.version as i64 {
                return Arc::clone(snap);
            }
        }

        let snap = Arc::new(Self::build_snapshot(&mut inner));
        inner.cached_version = snap.version as i64;
        inner.cached_snapshot = Some(Arc::clone(&snap));
        debug!(
            version = snap.version,
            pairs = snap.token_pairs.len(),
            points = snap.raw.len(),
            "rebuilt indexed snapshot"
        );
        snap
    }

    fn build_snapshot(inner: &mut StoreInner) -> IndexedSnapshot {
        let mut snap = IndexedSnapshot::empty(inner.version, now_ms());

        // Borrow juggling: the normalised-pair cache and the price map
        // both live in `inner`, so collect the work list first.
        let mut entries: Vec<(String, String, String, PriceUpdate)> = Vec::new();
        for (chain, venues) in &inner.price_data {
            for (venue, pairs) in venues {
                for (pair_key, update) in pairs {
                    entries.push((
                        chain.clone(),
                        venue.clone(),
                        pair_key.clone(),
                        update.clone(),
                    ));
                }
            }
        }

        for (chain, venue, pair_key, update) in entries {
            let price = update.price;
            snap.raw.push(update);
            let update_ref = snap.raw.len() - 1;

            if let Some(normalized) = inner.norm_cache.get_or_compute(&pair_key) {
                snap.by_token.entry(normalized).or_default().push(PricePoint {
                    chain,
                    venue,
                    pair_key,
                    price,
                    update_ref,
                });
            }
        }

        // Only pairs visible on ≥2 distinct chains are detection input
        snap.token_pairs = snap
            .by_token
            .iter()
            .filter(|(_, points)| {
                if points.len() < 2 {
                    return false;
                }
                let mut chains: Vec<&str> =
                    points.iter().map(|p| p.chain.as_str()).collect();
                chains.sort_unstable();
                chains.dedup();
                chains.len() >= 2
            })
            .map(|(pair, _)| pair.clone())
            .collect();
        snap.token_pairs.sort_unstable();
        snap
    }

    /// Drop everything, including the normalised-pair cache.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.price_data.clear();
        inner.pair_count = 0;
        inner.cached_snapshot = None;
        inner.cached_version = -1;
        inner.updates_since_cleanup = 0;
        inner.norm_cache.clear();
        Self::bump_version(&mut inner);
    }

    pub fn chains(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        let mut chains: Vec<String> = inner.price_data.keys().cloned().collect();
        chains.sort_unstable();
        chains
    }

    pub fn pair_count(&self) -> usize {
        self.inner.read().unwrap().pair_count
    }

    pub fn version(&self) -> u64 {
        self.inner.read().unwrap().version
    }

    pub fn rejected_updates(&self) -> u64 {
        self.inner.read().unwrap().rejected_updates
    }

    #[cfg(test)]
    fn force_version(&self, version: u64) {
        self.inner.write().unwrap().version = version;
    }
}

impl Default for PriceStore {
    fn default() -> Self {
        Self::new()
    }
}
