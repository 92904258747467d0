//! 1inch AggregatorV5 decoder.
//!
//! `swap` carries explicit src/dst tokens in its description struct.
//! The `unoswap`/`uniswapV3Swap` families instead encode the route as a
//! `uint256[] pools` array: each element packs the pool address in the
//! lower 160 bits with a direction flag in bit 255. Those methods yield
//! pool-address token HINTS (the executor resolves actual tokens via an
//! on-chain lookup), flagged through the intent's pool metadata.
//!
//! The 1inch ETH sentinel resolves to the chain's wrapped native.
//!
//! Supported Function Selectors:
//!   0x12aa3caf — swap(address,(address,address,address,address,uint256,uint256,uint256),bytes,bytes)
//!   0x0502b1c5 — unoswap(address,uint256,uint256,uint256[])
//!   0xf78dc253 — unoswapTo(address,address,uint256,uint256,uint256[])
//!   0xe449022e — uniswapV3Swap(uint256,uint256,uint256[])
//!   0xbc80f1a8 — uniswapV3SwapTo(address,uint256,uint256,uint256[])
//!   0x84bd6d29 — clipperSwap(address,address,address,uint256,uint256,uint256,bytes32,bytes32)

use alloy::primitives::{Address, U256};

use super::{
    dyn_offset, u256_array_at, word_address, word_u256, word_u64, wrapped_native, DecodeContext,
    DEFAULT_SLIPPAGE, ETH_SENTINEL,
};
use crate::types::{now_ms, PendingSwapIntent, PoolResolutionHint};

const SWAP: &str = "0x12aa3caf";
const UNOSWAP: &str = "0x0502b1c5";
const UNOSWAP_TO: &str = "0xf78dc253";
const UNISWAP_V3_SWAP: &str = "0xe449022e";
const UNISWAP_V3_SWAP_TO: &str = "0xbc80f1a8";
const CLIPPER_SWAP: &str = "0x84bd6d29";

pub(super) const SELECTORS: &[&str] = &[
    SWAP,
    UNOSWAP,
    UNOSWAP_TO,
    UNISWAP_V3_SWAP,
    UNISWAP_V3_SWAP_TO,
    CLIPPER_SWAP,
];

/// Aggregator calls carry no deadline.
const ONEINCH_DEADLINE_SECS: u64 = 3_600;

/// Pool word → pool address (lower 160 bits). Bit 255 is the direction
/// flag; it does not affect the address extraction.
fn pool_address(pool_word: U256) -> Address {
    let masked: U256 = pool_word & ((U256::from(1u64) << 160) - U256::from(1u64));
    Address::from_slice(&masked.to_be_bytes::<32>()[12..])
}

/// Resolve the ETH sentinel to the chain's wrapped native. Chains we
/// have no wrapped-native entry for keep the sentinel as-is.
fn resolve_sentinel(token: Address, chain_id: u64) -> Address {
    if token == ETH_SENTINEL {
        wrapped_native(chain_id).unwrap_or(token)
    } else {
        token
    }
}

fn default_deadline() -> u64 {
    now_ms() / 1_000 + ONEINCH_DEADLINE_SECS
}

pub(super) fn decode(ctx: &DecodeContext, selector: &str, data: &[u8]) -> Option<PendingSwapIntent> {
    match selector {
        SWAP => decode_swap(ctx, data),
        UNOSWAP => decode_unoswap(ctx, data, 0),
        UNOSWAP_TO => decode_unoswap(ctx, data, 1),
        UNISWAP_V3_SWAP => decode_v3_pools(ctx, data, 0),
        UNISWAP_V3_SWAP_TO => decode_v3_pools(ctx, data, 1),
        CLIPPER_SWAP => decode_clipper(ctx, data),
        _ => None,
    }
}

/// swap(executor, desc, permit, data) — desc is a static tuple encoded
/// inline: (srcToken, dstToken, srcReceiver, dstReceiver, amount,
/// minReturnAmount, flags).
fn decode_swap(ctx: &DecodeContext, data: &[u8]) -> Option<PendingSwapIntent> {
    let src = word_address(data, 1)?;
    let dst = word_address(data, 2)?;
    let amount = word_u256(data, 5)?;
    let min_return = word_u256(data, 6)?;

    let token_in = resolve_sentinel(src, ctx.chain_id);
    let token_out = resolve_sentinel(dst, ctx.chain_id);

    Some(ctx.intent(
        token_in,
        token_out,
        amount,
        min_return,
        vec![token_in, token_out],
        DEFAULT_SLIPPAGE,
        default_deadline(),
    ))
}

/// unoswap(srcToken, amount, minReturn, pools) — plus the `To` variant
/// with a leading recipient. The last pool's address is the tokenOut
/// resolution hint.
fn decode_unoswap(ctx: &DecodeContext, data: &[u8], shift: usize) -> Option<PendingSwapIntent> {
    let src = word_address(data, shift)?;
    let amount = word_u256(data, shift + 1)?;
    let min_return = word_u256(data, shift + 2)?;
    let pools = u256_array_at(data, dyn_offset(data, shift + 3)?)?;
    let last_pool = pool_address(*pools.last()?);

    let token_in = resolve_sentinel(src, ctx.chain_id);
    let mut intent = ctx.intent(
        token_in,
        last_pool,
        amount,
        min_return,
        vec![token_in, last_pool],
        DEFAULT_SLIPPAGE,
        default_deadline(),
    );
    intent.pool_hint = Some(PoolResolutionHint {
        pool_address: last_pool,
        i_index: 0,
        j_index: 0,
        tokens_resolved: false,
    });
    Some(intent)
}

/// uniswapV3Swap(amount, minReturn, pools) — both endpoints are pool
/// hints: first pool for tokenIn, last pool for tokenOut.
fn decode_v3_pools(ctx: &DecodeContext, data: &[u8], shift: usize) -> Option<PendingSwapIntent> {
    let amount = word_u256(data, shift)?;
    let min_return = word_u256(data, shift + 1)?;
    let pools = u256_array_at(data, dyn_offset(data, shift + 2)?)?;
    let first_pool = pool_address(*pools.first()?);
    let last_pool = pool_address(*pools.last()?);

    let mut intent = ctx.intent(
        first_pool,
        last_pool,
        amount,
        min_return,
        vec![first_pool, last_pool],
        DEFAULT_SLIPPAGE,
        default_deadline(),
    );
    intent.pool_hint = Some(PoolResolutionHint {
        pool_address: last_pool,
        i_index: 0,
        j_index: 0,
        tokens_resolved: false,
    });
    Some(intent)
}

/// clipperSwap(clipperExchange, srcToken, dstToken, inputAmount,
/// outputAmount, goodUntil, r, vs) — explicit tokens, and the only
/// aggregator method with a deadline (goodUntil).
fn decode_clipper(ctx: &DecodeContext, data: &[u8]) -> Option<PendingSwapIntent> {
    let src = word_address(data, 1)?;
    let dst = word_address(data, 2)?;
    let amount = word_u256(data, 3)?;
    let output = word_u256(data, 4)?;
    let good_until = word_u64(data, 5)?;

    let token_in = resolve_sentinel(src, ctx.chain_id);
    let token_out = resolve_sentinel(dst, ctx.chain_id);

    Some(ctx.intent(
        token_in,
        token_out,
        amount,
        output,
        vec![token_in, token_out],
        DEFAULT_SLIPPAGE,
        good_until,
    ))
}
