//! Batched quoter contract client.
//!
//! Where the batch-quoter contract is deployed, a whole arbitrage path
//! is simulated in ONE eth_call (`simulateArbitragePath`). The manager
//! falls back to sequential per-hop quotes when the contract is absent
//! or the batched call reports failure.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::contracts::{IBatchQuoter, QuotePathStep};
use crate::rpc::{with_timeout, ChainRpc, RpcError};
use crate::types::QuoteRequest;

/// Result of one batched path simulation.
#[derive(Debug, Clone)]
pub struct BatchQuoteOutcome {
    pub final_amount_out: U256,
    pub expected_profit: U256,
    pub all_success: bool,
}

pub struct BatchQuoterService {
    chain: String,
    contract: Address,
    rpc: Arc<dyn ChainRpc>,
    timeout: Duration,
}

impl BatchQuoterService {
    pub fn new(chain: &str, contract: Address, rpc: Arc<dyn ChainRpc>, timeout: Duration) -> Self {
        Self {
            chain: chain.to_string(),
            contract,
            rpc,
            timeout,
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Simulate the full path in one call.
    pub async fn simulate_path(
        &self,
        requests: &[QuoteRequest],
        flash_loan_amount: U256,
        fee_bps: u64,
    ) -> Result<BatchQuoteOutcome, RpcError> {
        let steps: Vec<QuotePathStep> = requests
            .iter()
            .map(|r| QuotePathStep {
                router: r.router,
                tokenIn: r.token_in,
                tokenOut: r.token_out,
                amountIn: r.amount_in,
            })
            .collect();

        let call = IBatchQuoter::simulateArbitragePathCall {
            steps,
            flashLoanAmount: flash_loan_amount,
            feeBps: U256::from(fee_bps),
        };
        let data = Bytes::from(call.abi_encode());

        let raw = with_timeout(self.timeout, self.rpc.call(self.contract, data)).await?;
        let ret = IBatchQuoter::simulateArbitragePathCall::abi_decode_returns(&raw)
            .map_err(|e| RpcError::Transport(format!("simulateArbitragePath decode: {}", e)))?;

        debug!(
            chain = %self.chain,
            final_out = %ret.finalAmountOut,
            profit = %ret.expectedProfit,
            all_success = ret.allSuccess,
            "batched path simulated"
        );
        Ok(BatchQuoteOutcome {
            final_amount_out: ret.finalAmountOut,
            expected_profit: ret.expectedProfit,
            all_success: ret.allSuccess,
        })
    }
}
