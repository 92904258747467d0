//! V3-style router decoder (Uniswap V3, PancakeSwap V3).
//!
//! Two router generations share the family: the original SwapRouter
//! (deadline inside the params struct) and the "02" router (no deadline
//! field — we substitute now+3600s). Single-hop methods carry explicit
//! token fields; multi-hop methods carry a packed path:
//!
//!   token(20) | fee(3) | token(20) [| fee(3) | token(20) ...]
//!
//! Each extra hop adds 23 bytes. `exactOutput` paths are REVERSED
//! (first token is the output).
//!
//! Supported Function Selectors:
//!   SwapRouter:
//!     0x414bf389 — exactInputSingle
//!     0xc04b8d59 — exactInput
//!     0xdb3e2198 — exactOutputSingle
//!     0xf28c0498 — exactOutput
//!   SwapRouter02:
//!     0x04e45aaf — exactInputSingle (no deadline)
//!     0xb858183f — exactInput (no deadline)
//!     0x5023b4df — exactOutputSingle (no deadline)
//!     0x09b81346 — exactOutput (no deadline)

use alloy::primitives::Address;

use super::{
    bytes_at, dyn_offset, word_address, word_u256, word_u64, DecodeContext, DEFAULT_SLIPPAGE,
};
use crate::types::{now_ms, PendingSwapIntent};

const EXACT_INPUT_SINGLE: &str = "0x414bf389";
const EXACT_INPUT: &str = "0xc04b8d59";
const EXACT_OUTPUT_SINGLE: &str = "0xdb3e2198";
const EXACT_OUTPUT: &str = "0xf28c0498";
const EXACT_INPUT_SINGLE_02: &str = "0x04e45aaf";
const EXACT_INPUT_02: &str = "0xb858183f";
const EXACT_OUTPUT_SINGLE_02: &str = "0x5023b4df";
const EXACT_OUTPUT_02: &str = "0x09b81346";

pub(super) const SELECTORS: &[&str] = &[
    EXACT_INPUT_SINGLE,
    EXACT_INPUT,
    EXACT_OUTPUT_SINGLE,
    EXACT_OUTPUT,
    EXACT_INPUT_SINGLE_02,
    EXACT_INPUT_02,
    EXACT_OUTPUT_SINGLE_02,
    EXACT_OUTPUT_02,
];

/// Deadline substitute for the 02 router (seconds).
const ROUTER_02_DEADLINE_SECS: u64 = 3_600;

/// Minimum packed path: token + fee + token.
const MIN_PATH_BYTES: usize = 43;

/// Bytes added per additional hop (fee + token).
const HOP_BYTES: usize = 23;

/// Decode a packed V3 path into its token addresses.
/// Rejects paths shorter than 43 bytes or misaligned lengths.
pub fn decode_packed_path(path: &[u8]) -> Option<Vec<Address>> {
    if path.len() < MIN_PATH_BYTES {
        return None;
    }
    if (path.len() - 20) % HOP_BYTES != 0 {
        return None;
    }
    let hops = (path.len() - 20) / HOP_BYTES;
    let mut tokens = Vec::with_capacity(hops + 1);
    let mut pos = 0usize;
    for _ in 0..=hops {
        tokens.push(Address::from_slice(path.get(pos..pos + 20)?));
        pos += HOP_BYTES;
    }
    Some(tokens)
}

fn substitute_deadline() -> u64 {
    now_ms() / 1_000 + ROUTER_02_DEADLINE_SECS
}

pub(super) fn decode(ctx: &DecodeContext, selector: &str, data: &[u8]) -> Option<PendingSwapIntent> {
    match selector {
        EXACT_INPUT_SINGLE => decode_single(ctx, data, true, false),
        EXACT_OUTPUT_SINGLE => decode_single(ctx, data, true, true),
        EXACT_INPUT_SINGLE_02 => decode_single(ctx, data, false, false),
        EXACT_OUTPUT_SINGLE_02 => decode_single(ctx, data, false, true),
        EXACT_INPUT => decode_path_method(ctx, data, true, false),
        EXACT_OUTPUT => decode_path_method(ctx, data, true, true),
        EXACT_INPUT_02 => decode_path_method(ctx, data, false, false),
        EXACT_OUTPUT_02 => decode_path_method(ctx, data, false, true),
        _ => None,
    }
}

/// Single-hop struct: (tokenIn, tokenOut, fee, recipient, [deadline,]
/// amountA, amountB, sqrtPriceLimitX96). For exact-out methods amountA
/// is the exact output and amountB the input cap.
fn decode_single(
    ctx: &DecodeContext,
    data: &[u8],
    has_deadline: bool,
    exact_out: bool,
) -> Option<PendingSwapIntent> {
    let token_in = word_address(data, 0)?;
    let token_out = word_address(data, 1)?;
    // word 2 is the fee tier; unused in the intent
    let (deadline, amount_a_slot) = if has_deadline {
        (word_u64(data, 4)?, 5usize)
    } else {
        (substitute_deadline(), 4usize)
    };
    let amount_a = word_u256(data, amount_a_slot)?;
    let amount_b = word_u256(data, amount_a_slot + 1)?;

    let (amount_in, expected_out) = if exact_out {
        (amount_b, amount_a)
    } else {
        (amount_a, amount_b)
    };

    Some(ctx.intent(
        token_in,
        token_out,
        amount_in,
        expected_out,
        vec![token_in, token_out],
        DEFAULT_SLIPPAGE,
        deadline,
    ))
}

/// Multi-hop struct behind one offset word:
/// (bytes path, recipient, [deadline,] amountA, amountB).
fn decode_path_method(
    ctx: &DecodeContext,
    data: &[u8],
    has_deadline: bool,
    exact_out: bool,
) -> Option<PendingSwapIntent> {
    let struct_offset = dyn_offset(data, 0)?;
    let tuple = data.get(struct_offset..)?;

    let path_offset = dyn_offset(tuple, 0)?;
    let path_bytes = bytes_at(tuple, path_offset)?;
    let mut tokens = decode_packed_path(&path_bytes)?;
    if exact_out {
        // exactOutput paths run output→input; flip to intent order
        tokens.reverse();
    }

    let (deadline, amount_a_slot) = if has_deadline {
        (word_u64(tuple, 2)?, 3usize)
    } else {
        (substitute_deadline(), 2usize)
    };
    let amount_a = word_u256(tuple, amount_a_slot)?;
    let amount_b = word_u256(tuple, amount_a_slot + 1)?;

    let (amount_in, expected_out) = if exact_out {
        (amount_b, amount_a)
    } else {
        (amount_a, amount_b)
    };

    let token_in = *tokens.first()?;
    let token_out = *tokens.last()?;

    Some(ctx.intent(
        token_in,
        token_out,
        amount_in,
        expected_out,
        tokens,
        DEFAULT_SLIPPAGE,
        deadline,
    ))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::DecoderRegistry;
    use super::*;
    use alloy::primitives::U256;

    fn packed_path(tokens: &[Address], fee: u32) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, token) in tokens.iter().enumerate() {
            if i > 0 {
                out.extend_from_slice(&fee.to_be_bytes()[1..]); // 3-byte fee
            }
            out.extend_from_slice(token.as_slice());
        }
        out
    }

    #[test]
    fn test_decode_packed_path_three_tokens() {
        let tokens = [
            Address::repeat_byte(0x01),
            Address::repeat_byte(0x02),
            Address::repeat_byte(0x03),
        ];
        let path = packed_path(&tokens, 500);
        assert_eq!(path.len(), 66);
        let decoded = decode_packed_path(&path).unwrap();
        assert_eq!(decoded, tokens.to_vec());
    }

    #[test]
    fn test_decode_packed_path_rejects_misalignment() {
        let tokens = [Address::repeat_byte(0x01), Address::repeat_byte(0x02)];
        let mut path = packed_path(&tokens, 500);
        assert!(decode_packed_path(&path).is_some());

        // Too short
        assert!(decode_packed_path(&path[..42]).is_none());
        // Misaligned (one stray byte)
        path.push(0x00);
        assert!(decode_packed_path(&path).is_none());
        // Empty
        assert!(decode_packed_path(&[]).is_none());
    }

    #[test]
    fn test_exact_input_single_original_router() {
        let registry = DecoderRegistry::new();
        let token_in = Address::repeat_byte(0x0A);
        let token_out = Address::repeat_byte(0x0B);
        let words = [
            word_of_address(token_in),
            word_of_address(token_out),
            word_of_u64(500), // fee
            word_of_address(Address::repeat_byte(0x33)),
            word_of_u64(1_800_000_000), // deadline
            word_of_u64(1_000),
            word_of_u64(990),
            word_of_u64(0), // sqrtPriceLimitX96
        ];
        let tx = raw_tx(calldata("0x414bf389", &words));
        let intent = registry.decode(&tx, 1).unwrap();

        assert_eq!(intent.token_in, token_in);
        assert_eq!(intent.token_out, token_out);
        assert_eq!(intent.amount_in, U256::from(1_000u64));
        assert_eq!(intent.expected_amount_out, U256::from(990u64));
        assert_eq!(intent.deadline, 1_800_000_000);
        assert_eq!(intent.path, vec![token_in, token_out]);
    }

    #[test]
    fn test_exact_input_single_02_substitutes_deadline() {
        let registry = DecoderRegistry::new();
        let words = [
            word_of_address(Address::repeat_byte(0x0A)),
            word_of_address(Address::repeat_byte(0x0B)),
            word_of_u64(3_000),
            word_of_address(Address::repeat_byte(0x33)),
            word_of_u64(2_000),
            word_of_u64(1_980),
            word_of_u64(0),
        ];
        let tx = raw_tx(calldata("0x04e45aaf", &words));
        let intent = registry.decode(&tx, 1).unwrap();

        assert_eq!(intent.amount_in, U256::from(2_000u64));
        let now_secs = crate::types::now_ms() / 1_000;
        assert!(intent.deadline >= now_secs + 3_500);
        assert!(intent.deadline <= now_secs + 3_700);
    }

    #[test]
    fn test_exact_input_multi_hop() {
        let registry = DecoderRegistry::new();
        let tokens = [
            Address::repeat_byte(0x0A),
            Address::repeat_byte(0x0B),
            Address::repeat_byte(0x0C),
        ];
        let path = packed_path(&tokens, 500);

        // struct offset + (path_offset, recipient, deadline, amountIn, amountOutMin) + path
        let mut body = Vec::new();
        body.extend_from_slice(&word_of_u64(32)); // struct offset
        body.extend_from_slice(&word_of_u64(5 * 32)); // path offset within tuple
        body.extend_from_slice(&word_of_address(Address::repeat_byte(0x33)));
        body.extend_from_slice(&word_of_u64(1_800_000_000));
        body.extend_from_slice(&word_of_u64(5_000));
        body.extend_from_slice(&word_of_u64(4_900));
        body.extend_from_slice(&word_of_u64(path.len() as u64));
        body.extend_from_slice(&path);
        // pad path to a word boundary
        while body.len() % 32 != 0 {
            body.push(0);
        }

        let input = format!("0xc04b8d59{}", alloy::hex::encode(&body));
        let intent = registry.decode(&raw_tx(input), 1).unwrap();

        assert_eq!(intent.path, tokens.to_vec());
        assert_eq!(intent.token_in, tokens[0]);
        assert_eq!(intent.token_out, tokens[2]);
        assert_eq!(intent.amount_in, U256::from(5_000u64));
    }

    #[test]
    fn test_exact_output_reverses_path() {
        let registry = DecoderRegistry::new();
        // exactOutput path runs output→input
        let tokens = [Address::repeat_byte(0x0C), Address::repeat_byte(0x0A)];
        let path = packed_path(&tokens, 500);

        let mut body = Vec::new();
        body.extend_from_slice(&word_of_u64(32));
        body.extend_from_slice(&word_of_u64(5 * 32));
        body.extend_from_slice(&word_of_address(Address::repeat_byte(0x33)));
        body.extend_from_slice(&word_of_u64(1_800_000_000));
        body.extend_from_slice(&word_of_u64(500)); // amountOut (exact)
        body.extend_from_slice(&word_of_u64(520)); // amountInMaximum
        body.extend_from_slice(&word_of_u64(path.len() as u64));
        body.extend_from_slice(&path);
        while body.len() % 32 != 0 {
            body.push(0);
        }

        let input = format!("0xf28c0498{}", alloy::hex::encode(&body));
        let intent = registry.decode(&raw_tx(input), 1).unwrap();

        // Reversed: intent runs input→output
        assert_eq!(intent.token_in, Address::repeat_byte(0x0A));
        assert_eq!(intent.token_out, Address::repeat_byte(0x0C));
        assert_eq!(intent.amount_in, U256::from(520u64));
        assert_eq!(intent.expected_amount_out, U256::from(500u64));
    }

    #[test]
    fn test_garbage_path_collapses_to_none() {
        let registry = DecoderRegistry::new();
        let mut body = Vec::new();
        body.extend_from_slice(&word_of_u64(32));
        body.extend_from_slice(&word_of_u64(5 * 32));
        body.extend_from_slice(&word_of_address(Address::repeat_byte(0x33)));
        body.extend_from_slice(&word_of_u64(1_800_000_000));
        body.extend_from_slice(&word_of_u64(5_000));
        body.extend_from_slice(&word_of_u64(4_900));
        body.extend_from_slice(&word_of_u64(10)); // path of 10 bytes — invalid
        body.extend_from_slice(&[0xAB; 10]);
        while body.len() % 32 != 0 {
            body.push(0);
        }

        let input = format!("0xc04b8d59{}", alloy::hex::encode(&body));
        assert!(registry.decode(&raw_tx(input), 1).is_none());
    }
}
