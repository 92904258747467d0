//! Chain RPC boundary.
//!
//! Per-chain transport internals (websocket subscriptions, retries,
//! endpoint rotation) live outside this crate. The pipeline sees a
//! [`ChainRpc`] handle with the few methods pre-flight needs, and every
//! call site wraps the future in [`with_timeout`] so a stalled endpoint
//! can never wedge a detection cycle.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::contracts::IERC20;
use alloy::sol_types::SolCall;

/// Default timeout for quote/liquidity calls.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone)]
pub enum RpcError {
    #[error("rpc timeout after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("execution reverted: 0x{}", alloy::hex::encode(.0))]
    Reverted(Vec<u8>),
}

impl RpcError {
    /// Timeouts and transport failures are retryable at the caller's
    /// policy; reverts are not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, RpcError::Reverted(_))
    }
}

/// The provider handle the pipeline consumes. One instance per chain,
/// shared read-only across components.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Canonical chain name this handle serves.
    fn chain(&self) -> &str;

    /// `eth_call` against a deployed contract.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError>;

    /// ERC20 `balanceOf(holder)` convenience (the liquidity validator's
    /// only on-chain read).
    async fn token_balance(&self, token: Address, holder: Address) -> Result<U256, RpcError>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<u128, RpcError>;

    /// Pending-inclusive transaction count for nonce seeding.
    async fn transaction_count(&self, sender: Address) -> Result<u64, RpcError>;

    /// Submit a signed transaction; returns its hash.
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, RpcError>;
}

/// Wrap an RPC future with an explicit timeout. The sleep side of the
/// race is dropped as soon as the call resolves.
pub async fn with_timeout<T, F>(dur: Duration, fut: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    match tokio::time::timeout(dur, fut).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout(dur)),
    }
}

/// Production handle backed by an alloy provider (HTTP or WS, erased).
pub struct AlloyRpc {
    chain: String,
    provider: DynProvider,
}

impl AlloyRpc {
    /// Connect over HTTP. WS endpoints are owned by the ingress
    /// collectors, not the pre-flight path.
    pub fn connect_http(chain: &str, url: &str) -> Result<Self, RpcError> {
        let parsed = url
            .parse()
            .map_err(|e| RpcError::Transport(format!("invalid RPC URL: {}", e)))?;
        let provider = ProviderBuilder::new().connect_http(parsed);
        Ok(Self {
            chain: chain.to_string(),
            provider: provider.erased(),
        })
    }
}

#[async_trait]
impl ChainRpc for AlloyRpc {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let tx = TransactionRequest::default().with_to(to).with_input(data);
        self.provider
            .call(tx)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }

    async fn token_balance(&self, token: Address, holder: Address) -> Result<U256, RpcError> {
        let data = IERC20::balanceOfCall { account: holder }.abi_encode();
        let raw = self.call(token, Bytes::from(data)).await?;
        IERC20::balanceOfCall::abi_decode_returns(&raw)
            .map_err(|e| RpcError::Transport(format!("balanceOf decode: {}", e)))
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }

    async fn transaction_count(&self, sender: Address) -> Result<u64, RpcError> {
        self.provider
            .get_transaction_count(sender)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, RpcError> {
        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(*pending.tx_hash())
    }
}

#[cfg(test)]
pub mod mock {
    //! Scriptable RPC stub for pre-flight tests.

    use super::*;
    use dashmap::DashMap;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    pub struct MockRpc {
        chain: String,
        pub balances: DashMap<(Address, Address), U256>,
        pub call_responses: Mutex<VecDeque<Result<Bytes, RpcError>>>,
        pub gas_price_wei: AtomicU64,
        pub nonces: DashMap<Address, u64>,
        /// Artificial latency applied to every balance fetch.
        pub balance_delay: Option<Duration>,
        pub balance_fetches: AtomicU64,
        pub sent: Mutex<Vec<Bytes>>,
    }

    impl MockRpc {
        pub fn new(chain: &str) -> Self {
            Self {
                chain: chain.to_string(),
                balances: DashMap::new(),
                call_responses: Mutex::new(VecDeque::new()),
                gas_price_wei: AtomicU64::new(30_000_000_000),
                nonces: DashMap::new(),
                balance_delay: None,
                balance_fetches: AtomicU64::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn push_call_response(&self, resp: Result<Bytes, RpcError>) {
            self.call_responses.lock().unwrap().push_back(resp);
        }
    }

    #[async_trait]
    impl ChainRpc for MockRpc {
        fn chain(&self) -> &str {
            &self.chain
        }

        async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes, RpcError> {
            match self.call_responses.lock().unwrap().pop_front() {
                Some(resp) => resp,
                None => Err(RpcError::Transport("no scripted response".into())),
            }
        }

        async fn token_balance(&self, token: Address, holder: Address) -> Result<U256, RpcError> {
            self.balance_fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.balance_delay {
                tokio::time::sleep(delay).await;
            }
            self.balances
                .get(&(token, holder))
                .map(|v| *v)
                .ok_or_else(|| RpcError::Transport("no balance scripted".into()))
        }

        async fn gas_price(&self) -> Result<u128, RpcError> {
            Ok(self.gas_price_wei.load(Ordering::SeqCst) as u128)
        }

        async fn transaction_count(&self, sender: Address) -> Result<u64, RpcError> {
            Ok(self.nonces.get(&sender).map(|v| *v).unwrap_or(0))
        }

        async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, RpcError> {
            self.sent.lock().unwrap().push(raw);
            Ok(B256::ZERO)
        }
    }
}
