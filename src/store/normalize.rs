//! Normalised token-pair computation.
//!
//! Cross-chain matching needs `CAMELOT_WETH_USDC` (arbitrum) and
//! `uniswap_v3_WETH_USDC` (ethereum) to land on the same key. The
//! normalised form is `BASE_QUOTE` with venue prefixes stripped and each
//! symbol canonicalised (bridged-token suffixes collapse onto the native
//! symbol, e.g. `WETH.e` == `WETH`).
//!
//! The computation runs once per pair key per store lifetime; the memo
//! cache is bounded and evicts its oldest fifth when full.

use std::collections::HashMap;

use crate::types::parse_token_string;

/// Cache bound. Beyond this, the oldest 20% of entries are evicted.
const DEFAULT_CAPACITY: usize = 10_000;

/// Fraction of entries dropped on overflow.
const EVICT_FRACTION: f64 = 0.20;

/// Canonicalise one token symbol for cross-chain matching.
/// Uppercases and strips bridged-variant suffixes (`.e`, `.b`).
fn canonical_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    for suffix in [".E", ".B"] {
        if let Some(stripped) = upper.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    upper
}

/// Compute the normalised pair for a pair key, or None when the key has
/// no usable base symbol.
pub fn normalize_pair(pair_key: &str) -> Option<String> {
    let (base, quote) = parse_token_string(pair_key);
    let base = canonical_symbol(&base);
    if base.is_empty() {
        return None;
    }
    Some(format!("{}_{}", base, canonical_symbol(&quote)))
}

/// LRU-ish memo of `pair_key → Option<normalised pair>`. Not a strict
/// LRU: entries age by insertion sequence, and eviction drops the oldest
/// fifth in one pass rather than tracking per-access recency.
pub struct NormalizedPairCache {
    entries: HashMap<String, (Option<String>, u64)>,
    seq: u64,
    capacity: usize,
}

impl NormalizedPairCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            seq: 0,
            capacity: capacity.max(1),
        }
    }

    /// Memoised [`normalize_pair`].
    pub fn get_or_compute(&mut self, pair_key: &str) -> Option<String> {
        if let Some((cached, _)) = self.entries.get(pair_key) {
            return cached.clone();
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        let computed = normalize_pair(pair_key);
        self.seq += 1;
        self.entries
            .insert(pair_key.to_string(), (computed.clone(), self.seq));
        computed
    }

    /// Drop the oldest 20% of entries (by insertion sequence).
    fn evict_oldest(&mut self) {
        let drop_count = ((self.entries.len() as f64 * EVICT_FRACTION).ceil() as usize).max(1);
        let mut by_age: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|(k, (_, seq))| (*seq, k.clone()))
            .collect();
        by_age.sort_unstable_by_key(|(seq, _)| *seq);
        for (_, key) in by_age.into_iter().take(drop_count) {
            self.entries.remove(&key);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.seq = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for NormalizedPairCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_venue_prefix() {
        assert_eq!(
            normalize_pair("CAMELOT_WETH_USDC"),
            Some("WETH_USDC".to_string())
        );
        assert_eq!(
            normalize_pair("uniswap_v3_WETH_USDC"),
            Some("WETH_USDC".to_string())
        );
    }

    #[test]
    fn test_normalize_bridged_variants_match() {
        // Avalanche bridged WETH.e must land on the native key
        assert_eq!(
            normalize_pair("TRADERJOE_WETH.e_USDC"),
            Some("WETH_USDC".to_string())
        );
        assert_eq!(normalize_pair("WETH/USDC"), Some("WETH_USDC".to_string()));
    }

    #[test]
    fn test_normalize_empty_base() {
        assert_eq!(normalize_pair(""), None);
    }

    #[test]
    fn test_cache_memoises() {
        let mut cache = NormalizedPairCache::new();
        let a = cache.get_or_compute("CAMELOT_WETH_USDC");
        let b = cache.get_or_compute("CAMELOT_WETH_USDC");
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_evicts_oldest_fifth() {
        let mut cache = NormalizedPairCache::with_capacity(10);
        for i in 0..10 {
            cache.get_or_compute(&format!("VENUE_TOK{}_USDC", i));
        }
        assert_eq!(cache.len(), 10);

        // Next insert overflows: 20% of 10 = 2 oldest evicted, then +1
        cache.get_or_compute("VENUE_TOK10_USDC");
        assert_eq!(cache.len(), 9);
    }

    #[test]
    fn test_cache_clear() {
        let mut cache = NormalizedPairCache::new();
        cache.get_or_compute("A_B");
        cache.clear();
        assert!(cache.is_empty());
    }
}
