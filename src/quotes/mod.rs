//! Batched Quote Manager
//!
//! Translates a bus opportunity into the quote requests pre-flight
//! needs (standard 2-hop or N-hop flash-loan round trip), then obtains
//! the quotes: one batched contract call where deployed, otherwise a
//! sequential per-hop fallback. Every RPC leg is timeout-wrapped.
//!
//! Flash-loan fee math stays in the integer domain:
//! `fee = amount × fee_bps / 10000`.

mod batch_quoter;

pub use batch_quoter::{BatchQuoteOutcome, BatchQuoterService};

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::contracts::IUniswapV2Router02;
use crate::rpc::{with_timeout, ChainRpc};
use crate::types::{u256_string, QuoteRequest};

/// Aave-V3-like flash loan premium.
pub const DEFAULT_FLASH_LOAN_FEE_BPS: u64 = 9;

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("missing {leg} dex on opportunity")]
    MissingDex { leg: &'static str },
    #[error("no router for dex {dex} on chain {chain}")]
    MissingRouter { chain: String, dex: String },
    #[error("hop {index} has neither router nor dex")]
    UnresolvableHop { index: usize },
    #[error("path does not return to the input token (flash-loan round trip)")]
    PathNotClosed,
    #[error("no rpc handle for chain {chain}")]
    MissingRpc { chain: String },
}

/// One hop of an executable route from the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecHop {
    pub dex: Option<String>,
    pub router: Option<Address>,
    pub token_in: Address,
    pub token_out: Address,
}

/// Execution-side view of a bus opportunity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutableOpportunity {
    pub chain: String,
    pub token_in: Address,
    pub token_out: Address,
    #[serde(with = "u256_string")]
    pub amount_in: U256,
    #[serde(default)]
    pub buy_dex: Option<String>,
    #[serde(default)]
    pub sell_dex: Option<String>,
    #[serde(default)]
    pub buy_router: Option<Address>,
    #[serde(default)]
    pub sell_router: Option<Address>,
    #[serde(default)]
    pub hops: Option<Vec<ExecHop>>,
}

/// (chain, dex) → router address.
#[derive(Debug, Default, Clone)]
pub struct RouterDirectory {
    routers: HashMap<(String, String), Address>,
}

impl RouterDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, chain: &str, dex: &str, router: Address) {
        self.routers
            .insert((chain.to_string(), dex.to_string()), router);
    }

    pub fn resolve(&self, chain: &str, dex: &str) -> Option<Address> {
        self.routers
            .get(&(chain.to_string(), dex.to_string()))
            .copied()
    }
}

/// Build the quote request list for an opportunity.
///
/// 2-hop: buy leg in→out for the full amount, sell leg out→in chained
/// (`amount_in == 0`). N-hop: each hop resolves its router and chains
/// off the previous output; the final hop must close the loop back to
/// the input token.
pub fn build_quote_requests(
    op: &ExecutableOpportunity,
    routers: &RouterDirectory,
) -> Result<Vec<QuoteRequest>, QuoteError> {
    if let Some(hops) = &op.hops {
        let mut requests = Vec::with_capacity(hops.len());
        for (index, hop) in hops.iter().enumerate() {
            let router = match (hop.router, &hop.dex) {
                (Some(router), _) => router,
                (None, Some(dex)) => routers.resolve(&op.chain, dex).ok_or_else(|| {
                    QuoteError::MissingRouter {
                        chain: op.chain.clone(),
                        dex: dex.clone(),
                    }
                })?,
                (None, None) => return Err(QuoteError::UnresolvableHop { index }),
            };
            requests.push(QuoteRequest {
                router,
                token_in: hop.token_in,
                token_out: hop.token_out,
                amount_in: if index == 0 { op.amount_in } else { U256::ZERO },
            });
        }
        match requests.last() {
            Some(last) if last.token_out == op.token_in => Ok(requests),
            Some(_) => Err(QuoteError::PathNotClosed),
            None => Err(QuoteError::PathNotClosed),
        }
    } else {
        let resolve_leg = |leg: &'static str,
                           explicit: Option<Address>,
                           dex: &Option<String>|
         -> Result<Address, QuoteError> {
            if let Some(router) = explicit {
                return Ok(router);
            }
            let dex = dex.as_ref().ok_or(QuoteError::MissingDex { leg })?;
            routers
                .resolve(&op.chain, dex)
                .ok_or_else(|| QuoteError::MissingRouter {
                    chain: op.chain.clone(),
                    dex: dex.clone(),
                })
        };
        let buy_router = resolve_leg("buy", op.buy_router, &op.buy_dex)?;
        let sell_router = resolve_leg("sell", op.sell_router, &op.sell_dex)?;

        Ok(vec![
            QuoteRequest {
                router: buy_router,
                token_in: op.token_in,
                token_out: op.token_out,
                amount_in: op.amount_in,
            },
            QuoteRequest {
                router: sell_router,
                token_in: op.token_out,
                token_out: op.token_in,
                // chained from the buy leg's output
                amount_in: U256::ZERO,
            },
        ])
    }
}

/// Quoted profit for one opportunity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedProfit {
    pub expected_profit: U256,
    pub flash_loan_fee: U256,
}

#[derive(Debug, Clone)]
pub struct QuoteManagerConfig {
    pub batch_enabled: bool,
    pub quote_timeout: Duration,
    pub flash_loan_fee_bps: u64,
}

impl Default for QuoteManagerConfig {
    fn default() -> Self {
        Self {
            batch_enabled: true,
            quote_timeout: crate::rpc::DEFAULT_RPC_TIMEOUT,
            flash_loan_fee_bps: DEFAULT_FLASH_LOAN_FEE_BPS,
        }
    }
}

pub struct BatchQuoteManager {
    rpcs: HashMap<String, Arc<dyn ChainRpc>>,
    /// Batch-quoter contract deployments, by chain.
    deployments: HashMap<String, Address>,
    /// One service instance per chain, constructed on first use.
    quoters: DashMap<String, Arc<BatchQuoterService>>,
    routers: RouterDirectory,
    config: QuoteManagerConfig,
}

impl BatchQuoteManager {
    pub fn new(
        rpcs: HashMap<String, Arc<dyn ChainRpc>>,
        deployments: HashMap<String, Address>,
        routers: RouterDirectory,
        config: QuoteManagerConfig,
    ) -> Self {
        Self {
            rpcs,
            deployments,
            quoters: DashMap::new(),
            routers,
            config,
        }
    }

    pub fn routers(&self) -> &RouterDirectory {
        &self.routers
    }

    /// Per-chain quoter, cached. One `.get()` on the hot path; the
    /// entry API makes concurrent construction idempotent.
    fn quoter_for(&self, chain: &str) -> Option<Arc<BatchQuoterService>> {
        if let Some(existing) = self.quoters.get(chain) {
            return Some(existing.clone());
        }
        let contract = *self.deployments.get(chain)?;
        let rpc = self.rpcs.get(chain)?.clone();
        let timeout = self.config.quote_timeout;
        // Double-check via entry: a concurrent caller may have
        // constructed while we resolved the deployment
        let entry = self
            .quoters
            .entry(chain.to_string())
            .or_insert_with(|| {
                Arc::new(BatchQuoterService::new(chain, contract, rpc, timeout))
            });
        Some(entry.clone())
    }

    fn flash_loan_fee(&self, amount: U256) -> U256 {
        amount.saturating_mul(U256::from(self.config.flash_loan_fee_bps)) / U256::from(10_000u64)
    }

    /// Quote an opportunity end to end. Build failures are hard errors;
    /// quoting failures degrade to `Ok(None)`.
    pub async fn estimate_profit(
        &self,
        op: &ExecutableOpportunity,
    ) -> Result<Option<QuotedProfit>, QuoteError> {
        let requests = build_quote_requests(op, &self.routers)?;

        if self.config.batch_enabled {
            if let Some(quoter) = self.quoter_for(&op.chain) {
                match quoter
                    .simulate_path(&requests, op.amount_in, self.config.flash_loan_fee_bps)
                    .await
                {
                    Ok(outcome) if outcome.all_success => {
                        return Ok(Some(QuotedProfit {
                            expected_profit: outcome.expected_profit,
                            flash_loan_fee: self.flash_loan_fee(op.amount_in),
                        }));
                    }
                    Ok(_) => {
                        warn!(chain = %op.chain, "Batched simulation failed, using fallback");
                    }
                    Err(e) => {
                        warn!(chain = %op.chain, error = %e, "BatchQuoter error, using fallback");
                    }
                }
            }
        }

        self.sequential_quotes(op, &requests).await
    }

    /// Sequential fallback: one on-chain quote per hop, each wrapped
    /// with a timeout, chaining outputs into zero-amount hops.
    async fn sequential_quotes(
        &self,
        op: &ExecutableOpportunity,
        requests: &[QuoteRequest],
    ) -> Result<Option<QuotedProfit>, QuoteError> {
        let rpc = self
            .rpcs
            .get(&op.chain)
            .ok_or_else(|| QuoteError::MissingRpc {
                chain: op.chain.clone(),
            })?;

        let mut carried = op.amount_in;
        for (index, request) in requests.iter().enumerate() {
            let amount_in = if request.amount_in.is_zero() {
                carried
            } else {
                request.amount_in
            };
            let call = IUniswapV2Router02::getAmountsOutCall {
                amountIn: amount_in,
                path: vec![request.token_in, request.token_out],
            };
            let raw = match with_timeout(
                self.config.quote_timeout,
                rpc.call(request.router, Bytes::from(call.abi_encode())),
            )
            .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(chain = %op.chain, hop = index, error = %e, "sequential quote failed");
                    return Ok(None);
                }
            };
            let amounts = match IUniswapV2Router02::getAmountsOutCall::abi_decode_returns(&raw) {
                Ok(amounts) => amounts,
                Err(e) => {
                    warn!(chain = %op.chain, hop = index, error = %e, "quote decode failed");
                    return Ok(None);
                }
            };
            carried = match amounts.last() {
                Some(out) if !out.is_zero() => *out,
                _ => {
                    debug!(chain = %op.chain, hop = index, "hop quoted zero output");
                    return Ok(None);
                }
            };
        }

        if carried <= op.amount_in {
            debug!(chain = %op.chain, final_out = %carried, "round trip not profitable");
            return Ok(None);
        }
        Ok(Some(QuotedProfit {
            expected_profit: carried - op.amount_in,
            flash_loan_fee: self.flash_loan_fee(op.amount_in),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockRpc;
    use crate::rpc::RpcError;

    fn token(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn directory() -> RouterDirectory {
        let mut d = RouterDirectory::new();
        d.register("arbitrum", "uniswap", token(0xA1));
        d.register("arbitrum", "sushiswap", token(0xA2));
        d
    }

    fn two_hop() -> ExecutableOpportunity {
        ExecutableOpportunity {
            chain: "arbitrum".into(),
            token_in: token(0x01),
            token_out: token(0x02),
            amount_in: U256::from(1_000_000u64),
            buy_dex: Some("uniswap".into()),
            sell_dex: Some("sushiswap".into()),
            buy_router: None,
            sell_router: None,
            hops: None,
        }
    }

    #[test]
    fn test_build_two_hop_requests() {
        let requests = build_quote_requests(&two_hop(), &directory()).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].router, token(0xA1));
        assert_eq!(requests[0].amount_in, U256::from(1_000_000u64));
        assert_eq!(requests[0].token_in, token(0x01));
        assert_eq!(requests[0].token_out, token(0x02));
        // Sell leg chains from the buy output
        assert_eq!(requests[1].router, token(0xA2));
        assert_eq!(requests[1].amount_in, U256::ZERO);
        assert_eq!(requests[1].token_in, token(0x02));
        assert_eq!(requests[1].token_out, token(0x01));
    }

    #[test]
    fn test_build_missing_dex_and_router_errors() {
        let mut op = two_hop();
        op.sell_dex = None;
        assert!(matches!(
            build_quote_requests(&op, &directory()),
            Err(QuoteError::MissingDex { leg: "sell" })
        ));

        let mut op = two_hop();
        op.buy_dex = Some("unknown-dex".into());
        assert!(matches!(
            build_quote_requests(&op, &directory()),
            Err(QuoteError::MissingRouter { .. })
        ));
    }

    fn n_hop() -> ExecutableOpportunity {
        let mut op = two_hop();
        op.buy_dex = None;
        op.sell_dex = None;
        op.hops = Some(vec![
            ExecHop {
                dex: Some("uniswap".into()),
                router: None,
                token_in: token(0x01),
                token_out: token(0x02),
            },
            ExecHop {
                dex: None,
                router: Some(token(0xA3)),
                token_in: token(0x02),
                token_out: token(0x03),
            },
            ExecHop {
                dex: Some("sushiswap".into()),
                router: None,
                token_in: token(0x03),
                token_out: token(0x01),
            },
        ]);
        op
    }

    #[test]
    fn test_build_n_hop_requests() {
        let requests = build_quote_requests(&n_hop(), &directory()).unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].amount_in, U256::from(1_000_000u64));
        assert_eq!(requests[1].amount_in, U256::ZERO);
        assert_eq!(requests[1].router, token(0xA3)); // explicit hop router
        assert_eq!(requests[2].amount_in, U256::ZERO);
    }

    #[test]
    fn test_build_n_hop_must_close_loop() {
        let mut op = n_hop();
        if let Some(hops) = &mut op.hops {
            hops.last_mut().unwrap().token_out = token(0x09);
        }
        assert!(matches!(
            build_quote_requests(&op, &directory()),
            Err(QuoteError::PathNotClosed)
        ));
    }

    #[test]
    fn test_build_n_hop_unresolvable_hop() {
        let mut op = n_hop();
        if let Some(hops) = &mut op.hops {
            hops[1].router = None;
            hops[1].dex = None;
        }
        assert!(matches!(
            build_quote_requests(&op, &directory()),
            Err(QuoteError::UnresolvableHop { index: 1 })
        ));
    }

    fn manager(rpc: Arc<MockRpc>, deployed: bool, batch_enabled: bool) -> BatchQuoteManager {
        let mut rpcs: HashMap<String, Arc<dyn ChainRpc>> = HashMap::new();
        rpcs.insert("arbitrum".into(), rpc);
        let mut deployments = HashMap::new();
        if deployed {
            deployments.insert("arbitrum".to_string(), token(0xB0));
        }
        BatchQuoteManager::new(
            rpcs,
            deployments,
            directory(),
            QuoteManagerConfig {
                batch_enabled,
                ..Default::default()
            },
        )
    }

    /// ABI-encode (uint256 finalOut, uint256 profit, bool allSuccess).
    fn batch_return(final_out: u64, profit: u64, all_success: bool) -> Bytes {
        let mut out = vec![0u8; 96];
        out[..32].copy_from_slice(&U256::from(final_out).to_be_bytes::<32>());
        out[32..64].copy_from_slice(&U256::from(profit).to_be_bytes::<32>());
        if all_success {
            out[95] = 1;
        }
        Bytes::from(out)
    }

    /// ABI-encode a uint256[] return (offset, len, values).
    fn amounts_return(values: &[u64]) -> Bytes {
        let mut out = Vec::new();
        out.extend_from_slice(&U256::from(32u64).to_be_bytes::<32>());
        out.extend_from_slice(&U256::from(values.len() as u64).to_be_bytes::<32>());
        for v in values {
            out.extend_from_slice(&U256::from(*v).to_be_bytes::<32>());
        }
        Bytes::from(out)
    }

    #[tokio::test]
    async fn test_batch_path_success() {
        let rpc = Arc::new(MockRpc::new("arbitrum"));
        rpc.push_call_response(Ok(batch_return(1_000_900, 900, true)));
        let manager = manager(rpc, true, true);

        let profit = manager.estimate_profit(&two_hop()).await.unwrap().unwrap();
        assert_eq!(profit.expected_profit, U256::from(900u64));
        // 1_000_000 × 9 / 10_000
        assert_eq!(profit.flash_loan_fee, U256::from(900u64));
    }

    #[tokio::test]
    async fn test_batch_failure_falls_back_to_sequential() {
        let rpc = Arc::new(MockRpc::new("arbitrum"));
        // Batch call reports allSuccess=false…
        rpc.push_call_response(Ok(batch_return(0, 0, false)));
        // …then the two sequential quotes succeed
        rpc.push_call_response(Ok(amounts_return(&[1_000_000, 400_000])));
        rpc.push_call_response(Ok(amounts_return(&[400_000, 1_000_500])));
        let manager = manager(rpc, true, true);

        let profit = manager.estimate_profit(&two_hop()).await.unwrap().unwrap();
        assert_eq!(profit.expected_profit, U256::from(500u64));
    }

    #[tokio::test]
    async fn test_batch_error_falls_back_to_sequential() {
        let rpc = Arc::new(MockRpc::new("arbitrum"));
        rpc.push_call_response(Err(RpcError::Transport("boom".into())));
        rpc.push_call_response(Ok(amounts_return(&[1_000_000, 400_000])));
        rpc.push_call_response(Ok(amounts_return(&[400_000, 1_000_200])));
        let manager = manager(rpc, true, true);

        let profit = manager.estimate_profit(&two_hop()).await.unwrap().unwrap();
        assert_eq!(profit.expected_profit, U256::from(200u64));
    }

    #[tokio::test]
    async fn test_no_deployment_uses_sequential() {
        let rpc = Arc::new(MockRpc::new("arbitrum"));
        rpc.push_call_response(Ok(amounts_return(&[1_000_000, 400_000])));
        rpc.push_call_response(Ok(amounts_return(&[400_000, 1_000_100])));
        let manager = manager(rpc.clone(), false, true);

        let profit = manager.estimate_profit(&two_hop()).await.unwrap().unwrap();
        assert_eq!(profit.expected_profit, U256::from(100u64));
        // Exactly the two sequential calls — no batch attempt
        assert!(rpc.call_responses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unprofitable_round_trip_is_none() {
        let rpc = Arc::new(MockRpc::new("arbitrum"));
        rpc.push_call_response(Ok(amounts_return(&[1_000_000, 400_000])));
        rpc.push_call_response(Ok(amounts_return(&[400_000, 999_000])));
        let manager = manager(rpc, false, true);

        assert!(manager.estimate_profit(&two_hop()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sequential_quote_failure_is_none() {
        let rpc = Arc::new(MockRpc::new("arbitrum"));
        rpc.push_call_response(Ok(amounts_return(&[1_000_000, 400_000])));
        rpc.push_call_response(Err(RpcError::Timeout(Duration::from_secs(5))));
        let manager = manager(rpc, false, true);

        assert!(manager.estimate_profit(&two_hop()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_quoter_cache_is_per_chain_and_idempotent() {
        let rpc = Arc::new(MockRpc::new("arbitrum"));
        let manager = manager(rpc, true, true);

        let a = manager.quoter_for("arbitrum").unwrap();
        let b = manager.quoter_for("arbitrum").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.chain(), "arbitrum");
        assert!(manager.quoter_for("base").is_none());
    }
}
