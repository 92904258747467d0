//! Curve pool decoder (StableSwap + CryptoSwap).
//!
//! Curve swaps are calls on the pool itself, indexed by coin position
//! rather than token address. StableSwap variants take `int128`
//! indices, CryptoSwap `uint256`; both expose `exchange` and
//! `exchange_underlying`, plus a `use_eth` boolean variant.
//!
//! Token resolution consults a per-chain pool→coins registry. Unknown
//! pools still produce an intent: both tokens are set to the pool
//! address as a resolvable-via-on-chain-query placeholder, with the
//! raw indices attached as structured metadata.
//!
//! Supported Function Selectors:
//!   0x3df02124 — exchange(int128,int128,uint256,uint256)
//!   0xa6417ed6 — exchange_underlying(int128,int128,uint256,uint256)
//!   0x5b41b908 — exchange(uint256,uint256,uint256,uint256)
//!   0x65b2489b — exchange_underlying(uint256,uint256,uint256,uint256)
//!   0xa64833a0 — exchange(uint256,uint256,uint256,uint256,bool)

use alloy::primitives::{Address, U256};
use std::collections::HashMap;

use super::{word_i128, word_u256, DecodeContext, DEFAULT_SLIPPAGE};
use crate::types::{now_ms, PendingSwapIntent, PoolResolutionHint};

const STABLE_EXCHANGE: &str = "0x3df02124";
const STABLE_EXCHANGE_UNDERLYING: &str = "0xa6417ed6";
const CRYPTO_EXCHANGE: &str = "0x5b41b908";
const CRYPTO_EXCHANGE_UNDERLYING: &str = "0x65b2489b";
const CRYPTO_EXCHANGE_ETH: &str = "0xa64833a0";

pub(super) const SELECTORS: &[&str] = &[
    STABLE_EXCHANGE,
    STABLE_EXCHANGE_UNDERLYING,
    CRYPTO_EXCHANGE,
    CRYPTO_EXCHANGE_UNDERLYING,
    CRYPTO_EXCHANGE_ETH,
];

/// Curve calls carry no deadline; give intents an hour.
const CURVE_DEADLINE_SECS: u64 = 3_600;

/// Per-chain registry of Curve pool coin lists.
pub struct CurvePoolRegistry {
    pools: HashMap<(u64, Address), Vec<Address>>,
}

impl CurvePoolRegistry {
    pub fn new() -> Self {
        Self {
            pools: HashMap::new(),
        }
    }

    pub fn register(&mut self, chain_id: u64, pool: Address, coins: Vec<Address>) {
        self.pools.insert((chain_id, pool), coins);
    }

    pub fn coins(&self, chain_id: u64, pool: Address) -> Option<&[Address]> {
        self.pools.get(&(chain_id, pool)).map(|v| v.as_slice())
    }
}

impl Default for CurvePoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn u256_to_f64(v: U256) -> f64 {
    v.to_string().parse::<f64>().unwrap_or(f64::INFINITY)
}

/// Stable-pool slippage approximation: `max(0, 1 − min_dy/dx)` with
/// both sides treated as same-decimals. Degenerate inputs fall back to
/// the family default.
fn approximate_slippage(dx: U256, min_dy: U256) -> f64 {
    if dx.is_zero() {
        return DEFAULT_SLIPPAGE;
    }
    let ratio = u256_to_f64(min_dy) / u256_to_f64(dx);
    if !ratio.is_finite() {
        return DEFAULT_SLIPPAGE;
    }
    (1.0 - ratio).max(0.0)
}

pub(super) fn decode(
    ctx: &DecodeContext,
    selector: &str,
    data: &[u8],
    pools: &CurvePoolRegistry,
) -> Option<PendingSwapIntent> {
    // Coin indices: int128 for StableSwap, uint256 for CryptoSwap
    let (i, j) = match selector {
        STABLE_EXCHANGE | STABLE_EXCHANGE_UNDERLYING => {
            (word_i128(data, 0)?, word_i128(data, 1)?)
        }
        CRYPTO_EXCHANGE | CRYPTO_EXCHANGE_UNDERLYING | CRYPTO_EXCHANGE_ETH => {
            let i = word_u256(data, 0)?;
            let j = word_u256(data, 1)?;
            if i > U256::from(i128::MAX as u128) || j > U256::from(i128::MAX as u128) {
                return None;
            }
            (i.to::<u128>() as i128, j.to::<u128>() as i128)
        }
        _ => return None,
    };
    let dx = word_u256(data, 2)?;
    let min_dy = word_u256(data, 3)?;
    // CRYPTO_EXCHANGE_ETH carries a trailing use_eth bool; the intent
    // shape is identical so it decodes the same way.

    // The pool is the callee
    let pool: Address = ctx.tx.to.as_deref()?.parse().ok()?;

    let resolved = if i >= 0 && j >= 0 {
        pools.coins(ctx.chain_id, pool).and_then(|coins| {
            let token_in = coins.get(i as usize)?;
            let token_out = coins.get(j as usize)?;
            Some((*token_in, *token_out))
        })
    } else {
        None
    };

    let deadline = now_ms() / 1_000 + CURVE_DEADLINE_SECS;
    let slippage = approximate_slippage(dx, min_dy);

    let mut intent = match resolved {
        Some((token_in, token_out)) => ctx.intent(
            token_in,
            token_out,
            dx,
            min_dy,
            vec![token_in, token_out],
            slippage,
            deadline,
        ),
        None => {
            // Unknown pool: placeholder tokens, resolvable downstream
            let mut intent =
                ctx.intent(pool, pool, dx, min_dy, vec![pool, pool], slippage, deadline);
            intent.pool_hint = Some(PoolResolutionHint {
                pool_address: pool,
                i_index: i,
                j_index: j,
                tokens_resolved: false,
            });
            intent
        }
    };
    intent.router = format!("{:#x}", pool);
    Some(intent)
}
