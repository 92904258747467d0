//! Centralized Contract Definitions
//!
//! The Solidity interfaces the pre-flight path touches, defined with
//! alloy's `sol!` macro. Calldata is built via `SolCall::abi_encode`
//! and results decoded with `abi_decode_returns`, so the interfaces
//! work against the erased `ChainRpc` handle.

use alloy::sol;

// ── ERC20 ─────────────────────────────────────────────────────────────

sol! {
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

// ── V2-style router (sequential quote fallback) ──────────────────────

sol! {
    interface IUniswapV2Router02 {
        function getAmountsOut(uint256 amountIn, address[] calldata path) external view returns (uint256[] memory amounts);
    }
}

// ── Batched quoter (single-call pre-flight simulation) ───────────────
//
// Deployed per chain where available. `simulateArbitragePath` walks the
// whole route in one eth_call; a hop with amountIn == 0 consumes the
// previous hop's output.

sol! {
    struct QuotePathStep {
        address router;
        address tokenIn;
        address tokenOut;
        uint256 amountIn;
    }

    interface IBatchQuoter {
        function simulateArbitragePath(QuotePathStep[] calldata steps, uint256 flashLoanAmount, uint256 feeBps)
            external
            returns (uint256 finalAmountOut, uint256 expectedProfit, bool allSuccess);
    }
}
