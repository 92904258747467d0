// Core data structures shared across the pipeline.
// Wire shapes (serde) use camelCase to match the bus records.

use alloy::primitives::{Address, B256, U256};
use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Current time as epoch milliseconds (wire timestamp convention).
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

// ── Chain identification ────────────────────────────────────────────

/// Canonical chain name ↔ chain id table.
/// Every chain the pipeline can partition over. Lookups never fail:
/// unknown ids resolve to "unknown" rather than an absent value.
static CHAIN_TABLE: Lazy<Vec<(&'static str, u64)>> = Lazy::new(|| {
    vec![
        ("ethereum", 1),
        ("optimism", 10),
        ("bsc", 56),
        ("polygon", 137),
        ("fantom", 250),
        ("base", 8453),
        ("arbitrum", 42161),
        ("avalanche", 43114),
    ]
});

static CHAIN_BY_ID: Lazy<HashMap<u64, &'static str>> =
    Lazy::new(|| CHAIN_TABLE.iter().map(|(n, id)| (*id, *n)).collect());

static CHAIN_BY_NAME: Lazy<HashMap<&'static str, u64>> =
    Lazy::new(|| CHAIN_TABLE.iter().map(|(n, id)| (*n, *id)).collect());

/// Resolve a chain id to its canonical name. Unknown ids map to "unknown".
pub fn chain_name(chain_id: u64) -> &'static str {
    CHAIN_BY_ID.get(&chain_id).copied().unwrap_or("unknown")
}

/// Resolve a canonical chain name (case-insensitive) to its chain id.
pub fn chain_id_of(name: &str) -> Option<u64> {
    CHAIN_BY_NAME.get(name.to_lowercase().as_str()).copied()
}

// ── Serde helpers for U256 wire encoding ────────────────────────────

/// U256 fields serialise as base-10 strings on the bus (reserves, amounts,
/// gas). Hex would also round-trip but the wire convention is decimal.
pub mod u256_string {
    use alloy::primitives::U256;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<U256, D::Error> {
        let s = String::deserialize(de)?;
        U256::from_str_radix(s.trim(), 10).map_err(serde::de::Error::custom)
    }
}

/// Optional-U256 variant of [`u256_string`].
pub mod u256_string_opt {
    use alloy::primitives::U256;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<U256>, ser: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => ser.serialize_some(&v.to_string()),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<U256>, D::Error> {
        let s: Option<String> = Option::deserialize(de)?;
        match s {
            Some(s) => U256::from_str_radix(s.trim(), 10)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

// ── Price ingress ───────────────────────────────────────────────────

/// A confirmed pool price update from a per-chain collector.
///
/// `pair_key` is venue-prefixed (`VENUE_TOKEN0_TOKEN1`) or the wire form
/// `TOKEN0/TOKEN1`. Reserves are unbounded integers carried as decimal
/// strings on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub chain: String,
    pub venue: String,
    pub pair_key: String,
    pub token0: String,
    pub token1: String,
    #[serde(with = "u256_string")]
    pub reserve0: U256,
    #[serde(with = "u256_string")]
    pub reserve1: U256,
    pub price: f64,
    pub block_number: u64,
    pub timestamp: u64,
    #[serde(default)]
    pub latency_ms: u64,
}

impl PriceUpdate {
    /// Ingress validity: a zero, negative, or NaN price is rejected.
    pub fn has_valid_price(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// Per-snapshot view of one price. Lifetime == snapshot lifetime;
/// `update_ref` indexes into the snapshot's `raw` vec.
#[derive(Debug, Clone)]
pub struct PricePoint {
    pub chain: String,
    pub venue: String,
    pub pair_key: String,
    pub price: f64,
    pub update_ref: usize,
}

// ── Whale ingress ───────────────────────────────────────────────────

/// Trade direction of a whale transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Buy,
    Sell,
}

/// A whale-wallet trade observed on some venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhaleTransaction {
    pub tx_hash: String,
    pub wallet_address: String,
    pub chain: String,
    pub venue: String,
    pub pair_address: String,
    /// Accepts `A/B`, `A_B`, or venue-prefixed `VENUE_..._A_B`.
    pub token_string: String,
    pub amount: f64,
    pub usd_value: f64,
    pub direction: TradeDirection,
    #[serde(default)]
    pub price_impact: f64,
    pub timestamp: u64,
}

/// Aggregate whale pressure for one token over the active window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DominantDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for DominantDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DominantDirection::Bullish => write!(f, "bullish"),
            DominantDirection::Bearish => write!(f, "bearish"),
            DominantDirection::Neutral => write!(f, "neutral"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhaleActivitySummary {
    pub buy_volume_usd: f64,
    pub sell_volume_usd: f64,
    pub net_flow_usd: f64,
    pub super_whale_count: u32,
    pub dominant_direction: DominantDirection,
}

impl WhaleActivitySummary {
    pub fn total_volume_usd(&self) -> f64 {
        self.buy_volume_usd + self.sell_volume_usd
    }

    pub fn empty() -> Self {
        Self {
            buy_volume_usd: 0.0,
            sell_volume_usd: 0.0,
            net_flow_usd: 0.0,
            super_whale_count: 0,
            dominant_direction: DominantDirection::Neutral,
        }
    }
}

// ── Token-string parsing ────────────────────────────────────────────

/// Split a token string into `(base, quote)`.
///
/// Accepted shapes: `A/B`, `A_B`, `VENUE_..._A_B` (last two `_` segments),
/// bare `A` (quote defaults to USDC). Never fails: empty input yields
/// `("", "USDC")`.
pub fn parse_token_string(s: &str) -> (String, String) {
    if s.contains('/') {
        let mut parts = s.splitn(2, '/');
        let base = parts.next().unwrap_or("").to_string();
        let quote = parts.next().unwrap_or("");
        let quote = if quote.is_empty() { "USDC" } else { quote };
        (base, quote.to_string())
    } else if s.contains('_') {
        let parts: Vec<&str> = s.split('_').collect();
        (
            parts[parts.len() - 2].to_string(),
            parts[parts.len() - 1].to_string(),
        )
    } else {
        (s.to_string(), "USDC".to_string())
    }
}

// ── Pending swap intents (decoder output) ───────────────────────────

/// Router family a pending swap was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouterKind {
    #[serde(rename = "uniswapV2")]
    UniswapV2,
    #[serde(rename = "uniswapV3")]
    UniswapV3,
    #[serde(rename = "sushiswap")]
    Sushiswap,
    #[serde(rename = "pancakeswap")]
    Pancakeswap,
    #[serde(rename = "curve")]
    Curve,
    #[serde(rename = "oneInch")]
    OneInch,
    #[serde(rename = "unknown")]
    Unknown,
}

impl fmt::Display for RouterKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Keep in sync with the serde renames above (wire names)
        let s = match self {
            RouterKind::UniswapV2 => "uniswapV2",
            RouterKind::UniswapV3 => "uniswapV3",
            RouterKind::Sushiswap => "sushiswap",
            RouterKind::Pancakeswap => "pancakeswap",
            RouterKind::Curve => "curve",
            RouterKind::OneInch => "oneInch",
            RouterKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Attached when token resolution was deferred (unknown Curve pool,
/// 1inch pool-address hints). Downstream resolves via an on-chain query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolResolutionHint {
    pub pool_address: Address,
    pub i_index: i128,
    pub j_index: i128,
    pub tokens_resolved: bool,
}

/// Canonical decoded pending swap. Invariants: `path[0] == token_in`,
/// `path[last] == token_out`; flash-loan round-trip paths additionally
/// close the loop (`path[last] == path[0]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSwapIntent {
    pub hash: String,
    pub router: String,
    #[serde(rename = "type")]
    pub kind: RouterKind,
    pub token_in: Address,
    pub token_out: Address,
    #[serde(with = "u256_string")]
    pub amount_in: U256,
    #[serde(with = "u256_string")]
    pub expected_amount_out: U256,
    pub path: Vec<Address>,
    pub slippage_tolerance: f64,
    pub deadline: u64,
    pub sender: String,
    #[serde(with = "u256_string")]
    pub gas_price: U256,
    #[serde(default, with = "u256_string_opt")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default, with = "u256_string_opt")]
    pub max_priority_fee_per_gas: Option<U256>,
    pub nonce: u64,
    pub chain_id: u64,
    pub first_seen: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_hint: Option<PoolResolutionHint>,
}

// ── Opportunities ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpportunityKind {
    #[serde(rename = "cross-chain")]
    CrossChain,
    #[serde(rename = "intra-chain")]
    IntraChain,
    #[serde(rename = "statistical")]
    Statistical,
}

/// One hop of an N-hop (statistical) route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hop {
    pub dex: Option<String>,
    pub router: Option<Address>,
    pub token_in: Address,
    pub token_out: Address,
}

/// An arbitrage candidate produced by the detector and enriched by the
/// publisher into its wire shape. Profit figures are USD.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrageOpportunity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OpportunityKind,
    pub buy_chain: String,
    pub sell_chain: String,
    pub buy_venue: String,
    pub sell_venue: String,
    pub token_in: String,
    pub token_out: String,
    /// Normalised pair the route was detected on (`A_B`).
    pub normalized_pair: String,
    pub buy_price: f64,
    pub sell_price: f64,
    /// Fractional price delta, e.g. 0.012 for 1.2%.
    pub percentage_diff: f64,
    pub bridge_required: bool,
    pub bridge_cost: f64,
    pub expected_profit: f64,
    pub profit_percentage: f64,
    pub net_profit: f64,
    pub confidence: f64,
    #[serde(default)]
    pub whale_triggered: bool,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hops: Option<Vec<Hop>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_deadline: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_slippage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_type: Option<RouterKind>,
}

/// One quote to obtain during pre-flight. `amount_in == 0` chains the
/// previous quote's output into this hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub router: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
}

/// Hash identifiers reused across the execution path.
pub type TxHash = B256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_name_roundtrip() {
        assert_eq!(chain_name(1), "ethereum");
        assert_eq!(chain_name(42161), "arbitrum");
        assert_eq!(chain_name(8453), "base");
        assert_eq!(chain_name(999999), "unknown");
        assert_eq!(chain_id_of("Ethereum"), Some(1));
        assert_eq!(chain_id_of("AVALANCHE"), Some(43114));
        assert_eq!(chain_id_of("near"), None);
    }

    #[test]
    fn test_parse_token_string_slash() {
        assert_eq!(
            parse_token_string("WETH/USDC"),
            ("WETH".to_string(), "USDC".to_string())
        );
        // Missing quote defaults to USDC
        assert_eq!(
            parse_token_string("WETH/"),
            ("WETH".to_string(), "USDC".to_string())
        );
    }

    #[test]
    fn test_parse_token_string_underscore() {
        assert_eq!(
            parse_token_string("WETH_USDC"),
            ("WETH".to_string(), "USDC".to_string())
        );
        // Venue-prefixed
        assert_eq!(
            parse_token_string("CAMELOT_WETH_USDC"),
            ("WETH".to_string(), "USDC".to_string())
        );
        // Version-prefixed
        assert_eq!(
            parse_token_string("uniswap_v3_WETH_USDC"),
            ("WETH".to_string(), "USDC".to_string())
        );
    }

    #[test]
    fn test_parse_token_string_bare_and_empty() {
        assert_eq!(
            parse_token_string("WETH"),
            ("WETH".to_string(), "USDC".to_string())
        );
        assert_eq!(parse_token_string(""), ("".to_string(), "USDC".to_string()));
    }

    #[test]
    fn test_price_update_validity() {
        let mut u = PriceUpdate {
            chain: "ethereum".into(),
            venue: "uniswap".into(),
            pair_key: "UNISWAP_WETH_USDC".into(),
            token0: "WETH".into(),
            token1: "USDC".into(),
            reserve0: U256::from(1u64),
            reserve1: U256::from(2500u64),
            price: 2500.0,
            block_number: 1,
            timestamp: now_ms(),
            latency_ms: 0,
        };
        assert!(u.has_valid_price());
        u.price = 0.0;
        assert!(!u.has_valid_price());
        u.price = -1.0;
        assert!(!u.has_valid_price());
        u.price = f64::NAN;
        assert!(!u.has_valid_price());
    }

    #[test]
    fn test_intent_u256_wire_roundtrip() {
        let intent = PendingSwapIntent {
            hash: "0xabc".into(),
            router: "0xdef".into(),
            kind: RouterKind::UniswapV2,
            token_in: Address::ZERO,
            token_out: Address::ZERO,
            amount_in: U256::from(123456789u64),
            expected_amount_out: U256::from(987654321u64),
            path: vec![Address::ZERO, Address::ZERO],
            slippage_tolerance: 0.005,
            deadline: 1_700_000_000,
            sender: "0x1".into(),
            gas_price: U256::from(30_000_000_000u64),
            max_fee_per_gas: Some(U256::from(40_000_000_000u64)),
            max_priority_fee_per_gas: None,
            nonce: 7,
            chain_id: 1,
            first_seen: now_ms(),
            pool_hint: None,
        };

        let json = serde_json::to_string(&intent).unwrap();
        // Amounts travel as decimal strings
        assert!(json.contains("\"amountIn\":\"123456789\""));
        assert!(json.contains("\"type\":\"uniswapV2\""));

        let back: PendingSwapIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.amount_in, intent.amount_in);
        assert_eq!(back.max_fee_per_gas, intent.max_fee_per_gas);
        assert_eq!(back.nonce, 7);
    }
}
