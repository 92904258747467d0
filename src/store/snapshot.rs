//! Indexed price snapshot.
//!
//! A snapshot is immutable once published and shared as
//! `Arc<IndexedSnapshot>`; detection cycles iterate it without locking.

use std::collections::HashMap;

use crate::types::{PricePoint, PriceUpdate};

/// Point-in-time, indexed view of the price store.
#[derive(Debug)]
pub struct IndexedSnapshot {
    /// Epoch-ms build time.
    pub timestamp: u64,
    /// Store version this snapshot was built at.
    pub version: u64,
    /// Shallow copies of every live update, in iteration order.
    pub raw: Vec<PriceUpdate>,
    /// Normalised pair → price points across all chains/venues.
    pub by_token: HashMap<String, Vec<PricePoint>>,
    /// Normalised pairs present on ≥2 distinct chains.
    pub token_pairs: Vec<String>,
}

impl IndexedSnapshot {
    pub fn empty(version: u64, timestamp: u64) -> Self {
        Self {
            timestamp,
            version,
            raw: Vec::new(),
            by_token: HashMap::new(),
            token_pairs: Vec::new(),
        }
    }

    /// Price points for one cross-chain-eligible pair.
    pub fn points_for(&self, normalized_pair: &str) -> &[PricePoint] {
        self.by_token
            .get(normalized_pair)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The update a price point was derived from.
    pub fn update_for(&self, point: &PricePoint) -> Option<&PriceUpdate> {
        self.raw.get(point.update_ref)
    }
}
