//! V2-style router decoder (Uniswap V2, SushiSwap, PancakeSwap V2).
//!
//! Nine router methods: exact-in and exact-out for token/token plus the
//! four ETH-leg variants, and the three fee-on-transfer forms. ETH legs
//! carry the input amount in `tx.value`, not the calldata.
//!
//! Supported Function Selectors:
//!   0x38ed1739 — swapExactTokensForTokens
//!   0x8803dbee — swapTokensForExactTokens
//!   0x7ff36ab5 — swapExactETHForTokens
//!   0x4a25d94a — swapTokensForExactETH
//!   0x18cbafe5 — swapExactTokensForETH
//!   0xfb3bdb41 — swapETHForExactTokens
//!   0x5c11d795 — swapExactTokensForTokensSupportingFeeOnTransferTokens
//!   0xb6f9de95 — swapExactETHForTokensSupportingFeeOnTransferTokens
//!   0x791ac947 — swapExactTokensForETHSupportingFeeOnTransferTokens

use super::{address_array_at, dyn_offset, word_u256, word_u64, DecodeContext, DEFAULT_SLIPPAGE};
use crate::types::PendingSwapIntent;

const SWAP_EXACT_TOKENS_FOR_TOKENS: &str = "0x38ed1739";
const SWAP_TOKENS_FOR_EXACT_TOKENS: &str = "0x8803dbee";
const SWAP_EXACT_ETH_FOR_TOKENS: &str = "0x7ff36ab5";
const SWAP_TOKENS_FOR_EXACT_ETH: &str = "0x4a25d94a";
const SWAP_EXACT_TOKENS_FOR_ETH: &str = "0x18cbafe5";
const SWAP_ETH_FOR_EXACT_TOKENS: &str = "0xfb3bdb41";
const SWAP_EXACT_TOKENS_FOR_TOKENS_FOT: &str = "0x5c11d795";
const SWAP_EXACT_ETH_FOR_TOKENS_FOT: &str = "0xb6f9de95";
const SWAP_EXACT_TOKENS_FOR_ETH_FOT: &str = "0x791ac947";

pub(super) const SELECTORS: &[&str] = &[
    SWAP_EXACT_TOKENS_FOR_TOKENS,
    SWAP_TOKENS_FOR_EXACT_TOKENS,
    SWAP_EXACT_ETH_FOR_TOKENS,
    SWAP_TOKENS_FOR_EXACT_ETH,
    SWAP_EXACT_TOKENS_FOR_ETH,
    SWAP_ETH_FOR_EXACT_TOKENS,
    SWAP_EXACT_TOKENS_FOR_TOKENS_FOT,
    SWAP_EXACT_ETH_FOR_TOKENS_FOT,
    SWAP_EXACT_TOKENS_FOR_ETH_FOT,
];

/// Decoded amount semantics per method variant.
enum Variant {
    /// (amountIn, amountOutMin, path, to, deadline)
    ExactIn,
    /// (amountOut, amountInMax, path, to, deadline)
    ExactOut,
    /// (amountOutMin, path, to, deadline), amountIn = tx.value
    EthIn,
    /// (amountOut, path, to, deadline), amountIn = tx.value
    EthInExactOut,
}

pub(super) fn decode(ctx: &DecodeContext, selector: &str, data: &[u8]) -> Option<PendingSwapIntent> {
    let variant = match selector {
        SWAP_EXACT_TOKENS_FOR_TOKENS
        | SWAP_EXACT_TOKENS_FOR_ETH
        | SWAP_EXACT_TOKENS_FOR_TOKENS_FOT
        | SWAP_EXACT_TOKENS_FOR_ETH_FOT => Variant::ExactIn,
        SWAP_TOKENS_FOR_EXACT_TOKENS | SWAP_TOKENS_FOR_EXACT_ETH => Variant::ExactOut,
        SWAP_EXACT_ETH_FOR_TOKENS | SWAP_EXACT_ETH_FOR_TOKENS_FOT => Variant::EthIn,
        SWAP_ETH_FOR_EXACT_TOKENS => Variant::EthInExactOut,
        _ => return None,
    };

    let (amount_in, expected_out, path_slot, deadline_slot) = match variant {
        Variant::ExactIn => (
            word_u256(data, 0)?,
            word_u256(data, 1)?,
            2usize,
            4usize,
        ),
        Variant::ExactOut => (
            // amountInMax caps the spend; amountOut is the exact target
            word_u256(data, 1)?,
            word_u256(data, 0)?,
            2,
            4,
        ),
        Variant::EthIn => (ctx.value(), word_u256(data, 0)?, 1, 3),
        Variant::EthInExactOut => (ctx.value(), word_u256(data, 0)?, 1, 3),
    };

    let path = address_array_at(data, dyn_offset(data, path_slot)?)?;
    if path.len() < 2 {
        return None;
    }
    let deadline = word_u64(data, deadline_slot)?;

    let token_in = path[0];
    let token_out = *path.last()?;

    Some(ctx.intent(
        token_in,
        token_out,
        amount_in,
        expected_out,
        path,
        DEFAULT_SLIPPAGE,
        deadline,
    ))
}
