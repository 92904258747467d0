//! Mempool Swap Decoder Registry
//!
//! Classifies raw pending transactions by 4-byte selector and routes
//! them to a family decoder (V2-style, V3-style, Curve, 1inch). The
//! output is a canonical [`PendingSwapIntent`]; anything undecodable
//! collapses to `None` — a family decoder never panics and never
//! propagates an error.
//!
//! The unknown-selector fast exit is the hot path: ≥90% of pending
//! traffic is not a swap we care about.

mod curve;
mod oneinch;
mod v2;
mod v3;

pub use curve::CurvePoolRegistry;
pub use v3::decode_packed_path;

use alloy::primitives::{Address, U256};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::trace;

use crate::types::{now_ms, PendingSwapIntent, RouterKind};

/// Default slippage tolerance attached to decoded intents (0.5%).
/// Curve overrides with a min_dy-derived estimate.
pub const DEFAULT_SLIPPAGE: f64 = 0.005;

/// The 1inch ETH sentinel (0xEeee…EEeE), resolved to the chain's
/// wrapped native before an intent is emitted.
pub const ETH_SENTINEL: Address = Address::new([0xEE; 20]);

/// Wrapped-native token per canonical chain.
static WRAPPED_NATIVE: Lazy<HashMap<u64, Address>> = Lazy::new(|| {
    let mut m = HashMap::new();
    let mut put = |chain_id: u64, hex: &str| {
        if let Ok(addr) = hex.parse::<Address>() {
            m.insert(chain_id, addr);
        }
    };
    put(1, "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"); // WETH
    put(10, "0x4200000000000000000000000000000000000006"); // WETH (OP)
    put(56, "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c"); // WBNB
    put(137, "0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270"); // WMATIC
    put(250, "0x21be370D5312f44cB42ce377BC9b8a0cEF1A4C83"); // WFTM
    put(8453, "0x4200000000000000000000000000000000000006"); // WETH (Base)
    put(42161, "0x82aF49447D8a07e3bd95BD0d56f35241523fBab1"); // WETH (Arb)
    put(43114, "0xB31f66AA3C1e785363F0875A1B74E27b85FD66c7"); // WAVAX
    m
});

/// Wrapped-native token address for a chain, when known.
pub fn wrapped_native(chain_id: u64) -> Option<Address> {
    WRAPPED_NATIVE.get(&chain_id).copied()
}

// ── Raw pending transaction (wire shape) ────────────────────────────

/// A pending transaction as delivered by the mempool feed. Quantities
/// are JSON-RPC hex strings; `input` is 0x-prefixed calldata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPendingTx {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub input: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub gas_price: Option<String>,
    #[serde(default)]
    pub max_fee_per_gas: Option<String>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// Parse a JSON-RPC quantity (`0x`-hex, or plain decimal from older
/// feeds). None/empty/garbage all parse to None.
pub(crate) fn parse_quantity(raw: Option<&str>) -> Option<U256> {
    let s = raw?.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        U256::from_str_radix(hex, 16).ok()
    } else {
        U256::from_str_radix(s, 10).ok()
    }
}

// ── ABI word helpers ────────────────────────────────────────────────
//
// Family decoders read calldata as 32-byte words. Dynamic values
// (arrays, bytes) are reached through their offset words.

pub(crate) fn word(data: &[u8], index: usize) -> Option<&[u8]> {
    let start = index.checked_mul(32)?;
    let end = start.checked_add(32)?;
    data.get(start..end)
}

pub(crate) fn word_u256(data: &[u8], index: usize) -> Option<U256> {
    word(data, index).map(U256::from_be_slice)
}

pub(crate) fn word_address(data: &[u8], index: usize) -> Option<Address> {
    let w = word(data, index)?;
    // Address words are left-padded with zeros
    if w[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(Address::from_slice(&w[12..]))
}

pub(crate) fn word_u64(data: &[u8], index: usize) -> Option<u64> {
    let v = word_u256(data, index)?;
    if v > U256::from(u64::MAX) {
        return None;
    }
    Some(v.to::<u64>())
}

/// Signed 128-bit word (Curve StableSwap indices).
pub(crate) fn word_i128(data: &[u8], index: usize) -> Option<i128> {
    let w = word(data, index)?;
    let negative = w[0] & 0x80 != 0;
    let expected_pad = if negative { 0xFF } else { 0x00 };
    if w[..16].iter().any(|b| *b != expected_pad) {
        return None;
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&w[16..]);
    Some(i128::from_be_bytes(buf))
}

/// Resolve the offset word at `index` to a byte position in `data`.
pub(crate) fn dyn_offset(data: &[u8], index: usize) -> Option<usize> {
    let v = word_u256(data, index)?;
    if v > U256::from(data.len()) {
        return None;
    }
    Some(v.to::<usize>())
}

/// Read an `address[]` at an absolute byte offset.
pub(crate) fn address_array_at(data: &[u8], offset: usize) -> Option<Vec<Address>> {
    let tail = data.get(offset..)?;
    let len = word_u64(tail, 0)? as usize;
    if len > 64 {
        // No real swap path has dozens of hops; reject runaway lengths
        return None;
    }
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        out.push(word_address(tail, 1 + i)?);
    }
    Some(out)
}

/// Read a `uint256[]` at an absolute byte offset.
pub(crate) fn u256_array_at(data: &[u8], offset: usize) -> Option<Vec<U256>> {
    let tail = data.get(offset..)?;
    let len = word_u64(tail, 0)? as usize;
    if len > 64 {
        return None;
    }
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        out.push(word_u256(tail, 1 + i)?);
    }
    Some(out)
}

/// Read a `bytes` at an absolute byte offset.
pub(crate) fn bytes_at(data: &[u8], offset: usize) -> Option<Vec<u8>> {
    let tail = data.get(offset..)?;
    let len = word_u64(tail, 0)? as usize;
    tail.get(32..32 + len).map(|b| b.to_vec())
}

// ── Family plumbing ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterFamily {
    V2,
    V3,
    Curve,
    OneInch,
}

impl RouterFamily {
    /// Router kind to report when the router address is not registered.
    fn default_kind(self) -> RouterKind {
        match self {
            RouterFamily::V2 => RouterKind::UniswapV2,
            RouterFamily::V3 => RouterKind::UniswapV3,
            RouterFamily::Curve => RouterKind::Curve,
            RouterFamily::OneInch => RouterKind::OneInch,
        }
    }
}

/// Everything a family decoder needs besides the calldata.
pub(crate) struct DecodeContext<'a> {
    pub tx: &'a RawPendingTx,
    pub chain_id: u64,
    pub kind: RouterKind,
}

impl DecodeContext<'_> {
    /// Gas fields cover both legacy and EIP-1559 transactions: the
    /// effective `gas_price` falls back to `max_fee_per_gas`.
    pub fn gas_price(&self) -> U256 {
        parse_quantity(self.tx.gas_price.as_deref())
            .or_else(|| parse_quantity(self.tx.max_fee_per_gas.as_deref()))
            .unwrap_or(U256::ZERO)
    }

    pub fn max_fee_per_gas(&self) -> Option<U256> {
        parse_quantity(self.tx.max_fee_per_gas.as_deref())
    }

    pub fn max_priority_fee_per_gas(&self) -> Option<U256> {
        parse_quantity(self.tx.max_priority_fee_per_gas.as_deref())
    }

    pub fn nonce(&self) -> u64 {
        parse_quantity(self.tx.nonce.as_deref())
            .filter(|n| *n <= U256::from(u64::MAX))
            .map(|n| n.to::<u64>())
            .unwrap_or(0)
    }

    /// Native value attached to the transaction (ETH-leg input amount).
    pub fn value(&self) -> U256 {
        parse_quantity(self.tx.value.as_deref()).unwrap_or(U256::ZERO)
    }

    /// Assemble the common intent fields around a decoded swap body.
    pub fn intent(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        expected_amount_out: U256,
        path: Vec<Address>,
        slippage_tolerance: f64,
        deadline: u64,
    ) -> PendingSwapIntent {
        PendingSwapIntent {
            hash: self.tx.hash.clone(),
            router: self.tx.to.clone().unwrap_or_default(),
            kind: self.kind,
            token_in,
            token_out,
            amount_in,
            expected_amount_out,
            path,
            slippage_tolerance,
            deadline,
            sender: self.tx.from.clone(),
            gas_price: self.gas_price(),
            max_fee_per_gas: self.max_fee_per_gas(),
            max_priority_fee_per_gas: self.max_priority_fee_per_gas(),
            nonce: self.nonce(),
            chain_id: self.chain_id,
            first_seen: now_ms(),
            pool_hint: None,
        }
    }
}

// ── Registry ────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct DecoderStats {
    pub decoded: u64,
    pub unknown_selector: u64,
    pub decode_failures: u64,
}

/// Selector-indexed, chain-aware decoder registry.
pub struct DecoderRegistry {
    /// Lowercase `0x`-selector → family.
    by_selector: HashMap<&'static str, RouterFamily>,
    /// chain id → router address (lowercase) → specific kind.
    by_chain_router: HashMap<u64, HashMap<String, RouterKind>>,
    /// Any-chain router → kind convenience map.
    by_router: HashMap<String, RouterKind>,
    /// Whether the case-insensitive selector retry is still worth
    /// doing. Cleared after the first miss that contains no uppercase
    /// hex — feeds are consistent about casing.
    case_retry_enabled: AtomicBool,
    curve_pools: CurvePoolRegistry,
    decoded: AtomicU64,
    unknown: AtomicU64,
    failures: AtomicU64,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        let mut by_selector = HashMap::new();
        for sel in v2::SELECTORS {
            by_selector.insert(*sel, RouterFamily::V2);
        }
        for sel in v3::SELECTORS {
            by_selector.insert(*sel, RouterFamily::V3);
        }
        for sel in curve::SELECTORS {
            by_selector.insert(*sel, RouterFamily::Curve);
        }
        for sel in oneinch::SELECTORS {
            by_selector.insert(*sel, RouterFamily::OneInch);
        }
        Self {
            by_selector,
            by_chain_router: HashMap::new(),
            by_router: HashMap::new(),
            case_retry_enabled: AtomicBool::new(true),
            curve_pools: CurvePoolRegistry::new(),
            decoded: AtomicU64::new(0),
            unknown: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Register a router for a specific chain.
    pub fn register_router(&mut self, chain_id: u64, router: Address, kind: RouterKind) {
        self.by_chain_router
            .entry(chain_id)
            .or_default()
            .insert(format!("{:#x}", router), kind);
    }

    /// Register a router independent of chain.
    pub fn register_router_any_chain(&mut self, router: Address, kind: RouterKind) {
        self.by_router.insert(format!("{:#x}", router), kind);
    }

    /// Register a Curve pool's coin list for token resolution.
    pub fn register_curve_pool(&mut self, chain_id: u64, pool: Address, coins: Vec<Address>) {
        self.curve_pools.register(chain_id, pool, coins);
    }

    /// Decode one pending transaction. None means "not a swap we
    /// recognise" — the overwhelmingly common outcome.
    pub fn decode(&self, tx: &RawPendingTx, chain_id: u64) -> Option<PendingSwapIntent> {
        let input = tx.input.as_str();
        if input.len() < 10 || !input.starts_with("0x") {
            return None;
        }
        let selector = &input[..10];

        let family = match self.lookup_selector(selector) {
            Some(f) => f,
            None => {
                self.unknown.fetch_add(1, Ordering::Relaxed);
                trace!(selector, "unknown selector");
                return None;
            }
        };

        let kind = self.resolve_kind(tx, chain_id, family);
        let ctx = DecodeContext { tx, chain_id, kind };
        let data = alloy::hex::decode(&input[10..]).ok()?;
        let selector_lower = selector.to_ascii_lowercase();

        let result = match family {
            RouterFamily::V2 => v2::decode(&ctx, &selector_lower, &data),
            RouterFamily::V3 => v3::decode(&ctx, &selector_lower, &data),
            RouterFamily::Curve => curve::decode(&ctx, &selector_lower, &data, &self.curve_pools),
            RouterFamily::OneInch => oneinch::decode(&ctx, &selector_lower, &data),
        };

        match &result {
            Some(intent) => {
                self.decoded.fetch_add(1, Ordering::Relaxed);
                trace!(hash = %intent.hash, kind = %intent.kind, "decoded pending swap");
            }
            None => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    /// Direct selector lookup with the documented one-shot
    /// case-insensitive retry.
    fn lookup_selector(&self, selector: &str) -> Option<RouterFamily> {
        if let Some(family) = self.by_selector.get(selector) {
            return Some(*family);
        }
        if self.case_retry_enabled.load(Ordering::Relaxed) {
            if selector.bytes().any(|b| b.is_ascii_uppercase()) {
                return self
                    .by_selector
                    .get(selector.to_ascii_lowercase().as_str())
                    .copied();
            }
            // This feed never sends uppercase; stop checking
            self.case_retry_enabled.store(false, Ordering::Relaxed);
        }
        None
    }

    /// Specific router kind via chain map, then the any-chain map,
    /// then the family default.
    fn resolve_kind(&self, tx: &RawPendingTx, chain_id: u64, family: RouterFamily) -> RouterKind {
        let router = match &tx.to {
            Some(to) => to.to_lowercase(),
            None => return family.default_kind(),
        };
        self.by_chain_router
            .get(&chain_id)
            .and_then(|m| m.get(&router))
            .or_else(|| self.by_router.get(&router))
            .copied()
            .unwrap_or_else(|| family.default_kind())
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            decoded: self.decoded.load(Ordering::Relaxed),
            unknown_selector: self.unknown.load(Ordering::Relaxed),
            decode_failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_unknown_selector_fast_exit() {
        let registry = DecoderRegistry::new();
        let tx = raw_tx("0xdeadbeef".to_string());
        assert!(registry.decode(&tx, 1).is_none());
        assert_eq!(registry.stats().unknown_selector, 1);
    }

    #[test]
    fn test_short_input_rejected() {
        let registry = DecoderRegistry::new();
        assert!(registry.decode(&raw_tx("0x".into()), 1).is_none());
        assert!(registry.decode(&raw_tx("0x38ed17".into()), 1).is_none());
        assert!(registry.decode(&raw_tx("not-hex-at-all".into()), 1).is_none());
    }

    #[test]
    fn test_uppercase_selector_retried_once() {
        let registry = DecoderRegistry::new();
        // Uppercase variant of swapExactTokensForTokens, with valid body
        let token_a = Address::repeat_byte(0x11);
        let token_b = Address::repeat_byte(0x22);
        let words = [
            word_of_u64(1_000),        // amountIn
            word_of_u64(990),          // amountOutMin
            word_of_u64(5 * 32),       // path offset
            word_of_address(Address::repeat_byte(0x33)), // to
            word_of_u64(1_800_000_000), // deadline
            word_of_u64(2),            // path len
            word_of_address(token_a),
            word_of_address(token_b),
        ];
        let lower = calldata("0x38ed1739", &words);
        let upper = format!("0x38ED1739{}", &lower[10..]);

        let decoded = registry.decode(&raw_tx(upper), 1);
        assert!(decoded.is_some());

        // A lowercase miss disables the retry; later uppercase misses
        // now fast-exit instead of matching.
        assert!(registry.decode(&raw_tx("0xaabbccdd00".into()), 1).is_none());
        let upper_again = format!("0x38ED1739{}", &lower[10..]);
        assert!(registry.decode(&raw_tx(upper_again), 1).is_none());
    }

    #[test]
    fn test_router_kind_resolution() {
        let mut registry = DecoderRegistry::new();
        let sushi_router = Address::repeat_byte(0xBB);
        registry.register_router(1, sushi_router, RouterKind::Sushiswap);

        let token_a = Address::repeat_byte(0x11);
        let token_b = Address::repeat_byte(0x22);
        let words = [
            word_of_u64(1_000),
            word_of_u64(990),
            word_of_u64(5 * 32),
            word_of_address(Address::repeat_byte(0x33)),
            word_of_u64(1_800_000_000),
            word_of_u64(2),
            word_of_address(token_a),
            word_of_address(token_b),
        ];
        let mut tx = raw_tx(calldata("0x38ed1739", &words));
        tx.to = Some(format!("{:#x}", sushi_router));

        let intent = registry.decode(&tx, 1).unwrap();
        assert_eq!(intent.kind, RouterKind::Sushiswap);

        // Same router on another chain falls back to the family default
        let intent = registry.decode(&tx, 137).unwrap();
        assert_eq!(intent.kind, RouterKind::UniswapV2);
    }

    #[test]
    fn test_parse_quantity_forms() {
        assert_eq!(parse_quantity(Some("0x10")), Some(U256::from(16u64)));
        assert_eq!(parse_quantity(Some("16")), Some(U256::from(16u64)));
        assert_eq!(parse_quantity(Some("")), None);
        assert_eq!(parse_quantity(Some("0xzz")), None);
        assert_eq!(parse_quantity(None), None);
    }

    #[test]
    fn test_word_helpers() {
        let mut data = Vec::new();
        data.extend_from_slice(&word_of_u64(7));
        data.extend_from_slice(&word_of_address(Address::repeat_byte(0x42)));
        assert_eq!(word_u256(&data, 0), Some(U256::from(7u64)));
        assert_eq!(word_address(&data, 1), Some(Address::repeat_byte(0x42)));
        // Address with dirty padding rejected
        let mut bad = word_of_address(Address::repeat_byte(0x42));
        bad[0] = 1;
        assert_eq!(word_address(&bad, 0), None);
        assert_eq!(word_u256(&data, 2), None);
    }

    #[test]
    fn test_word_i128_sign_handling() {
        let mut pos = [0u8; 32];
        pos[31] = 2;
        assert_eq!(word_i128(&pos, 0), Some(2));

        let neg = [0xFFu8; 32]; // -1 two's complement
        assert_eq!(word_i128(&neg, 0), Some(-1));

        let mut dirty = [0u8; 32];
        dirty[5] = 1; // not a valid int128 padding
        assert_eq!(word_i128(&dirty, 0), None);
    }
}
