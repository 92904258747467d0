//! Liquidity Validator
//!
//! On-chain balance pre-filter for candidate routes. Answers one
//! question: does the provider's pool hold enough of the asset to cover
//! the trade (with a safety margin)?
//!
//! This is a PRE-FILTER, not an authority — execution still simulates.
//! So the failure posture is graceful-true: timeout, transport error, or
//! a missing provider handle all return `true` with a warning rather
//! than blocking the pipeline on transient RPC weather.
//!
//! Concurrent checks on the same (protocol, chain, asset) share one RPC
//! round-trip via a per-key in-flight shared future; failures propagate
//! to every waiter.

use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::rpc::{with_timeout, ChainRpc, RpcError};
use crate::types::now_ms;

/// Cached balances live this long.
const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Balance must cover amount × this margin.
const DEFAULT_SAFETY_MARGIN: f64 = 1.10;

/// A liquidity source the validator can interrogate: some protocol's
/// pool on some chain. The RPC handle is optional — partitions may run
/// with providers for only a subset of their chains.
#[derive(Clone)]
pub struct LiquidityProvider {
    pub protocol: String,
    pub chain: String,
    /// Account whose asset balance backs the liquidity.
    pub pool: Address,
    pub rpc: Option<Arc<dyn ChainRpc>>,
}

type LiquidityKey = (String, String, Address);

#[derive(Debug, Clone)]
pub struct LiquidityRecord {
    pub available: U256,
    pub expires_at: u64,
    pub last_check_successful: bool,
}

type InflightFetch = Shared<BoxFuture<'static, Result<U256, RpcError>>>;

pub struct LiquidityValidator {
    cache: DashMap<LiquidityKey, LiquidityRecord>,
    inflight: Mutex<HashMap<LiquidityKey, InflightFetch>>,
    ttl: Duration,
    safety_margin_x100: u64,
    rpc_timeout: Duration,
}

impl LiquidityValidator {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_TTL, DEFAULT_SAFETY_MARGIN, crate::rpc::DEFAULT_RPC_TIMEOUT)
    }

    pub fn with_settings(ttl: Duration, safety_margin: f64, rpc_timeout: Duration) -> Self {
        let margin = if safety_margin.is_finite() && safety_margin >= 1.0 {
            safety_margin
        } else {
            DEFAULT_SAFETY_MARGIN
        };
        Self {
            cache: DashMap::new(),
            inflight: Mutex::new(HashMap::new()),
            ttl,
            safety_margin_x100: (margin * 100.0).round() as u64,
            rpc_timeout,
        }
    }

    fn key(provider: &LiquidityProvider, asset: Address) -> LiquidityKey {
        (provider.protocol.clone(), provider.chain.clone(), asset)
    }

    /// True iff the provider can cover `amount × safety_margin`, or the
    /// check could not be performed (graceful-true).
    pub async fn check_liquidity(
        &self,
        provider: &LiquidityProvider,
        asset: Address,
        amount: U256,
        ctx: &str,
    ) -> bool {
        let key = Self::key(provider, asset);

        if let Some(cached) = self.cached_liquidity_key(&key) {
            return self.covers(cached, amount);
        }

        let rpc = match &provider.rpc {
            Some(rpc) => Arc::clone(rpc),
            None => {
                warn!(
                    protocol = %provider.protocol,
                    chain = %provider.chain,
                    ctx,
                    "no provider handle for liquidity check, assuming sufficient"
                );
                return true;
            }
        };

        let fetch = self.join_or_start_fetch(&key, rpc, asset, provider.pool);
        let result = fetch.await;

        // All bookkeeping happens after the await so a cancelled caller
        // can never leave the cache half-written.
        self.inflight.lock().unwrap().remove(&key);

        match result {
            Ok(balance) => {
                self.cache.insert(
                    key,
                    LiquidityRecord {
                        available: balance,
                        expires_at: now_ms() + self.ttl.as_millis() as u64,
                        last_check_successful: true,
                    },
                );
                let ok = self.covers(balance, amount);
                debug!(
                    protocol = %provider.protocol,
                    chain = %provider.chain,
                    %balance,
                    %amount,
                    ok,
                    ctx,
                    "liquidity check"
                );
                ok
            }
            Err(e) => {
                if let Some(mut record) = self.cache.get_mut(&key) {
                    record.last_check_successful = false;
                }
                warn!(
                    protocol = %provider.protocol,
                    chain = %provider.chain,
                    error = %e,
                    ctx,
                    "liquidity check failed, assuming sufficient"
                );
                true
            }
        }
    }

    /// Join the in-flight fetch for this key or start one. At most one
    /// RPC round-trip runs per cache-miss per key.
    fn join_or_start_fetch(
        &self,
        key: &LiquidityKey,
        rpc: Arc<dyn ChainRpc>,
        asset: Address,
        pool: Address,
    ) -> InflightFetch {
        let mut inflight = self.inflight.lock().unwrap();
        if let Some(existing) = inflight.get(key) {
            return existing.clone();
        }
        let timeout = self.rpc_timeout;
        let fetch: InflightFetch = async move {
            with_timeout(timeout, rpc.token_balance(asset, pool)).await
        }
        .boxed()
        .shared();
        inflight.insert(key.clone(), fetch.clone());
        fetch
    }

    fn covers(&self, balance: U256, amount: U256) -> bool {
        let required = amount
            .saturating_mul(U256::from(self.safety_margin_x100))
            / U256::from(100u64);
        balance >= required
    }

    /// Fresh cached balance for `(provider, asset)`, or None past expiry.
    pub fn cached_liquidity(&self, provider: &LiquidityProvider, asset: Address) -> Option<U256> {
        self.cached_liquidity_key(&Self::key(provider, asset))
    }

    fn cached_liquidity_key(&self, key: &LiquidityKey) -> Option<U256> {
        let record = self.cache.get(key)?;
        if record.expires_at <= now_ms() {
            return None;
        }
        Some(record.available)
    }

    /// Cache-only score in [0, 1]. Unknown liquidity scores 1.0 (the
    /// graceful posture); known-thin liquidity scores down.
    pub fn estimate_liquidity_score(
        &self,
        provider: &LiquidityProvider,
        asset: Address,
        amount: U256,
    ) -> f64 {
        let balance = match self.cached_liquidity(provider, asset) {
            Some(b) => b,
            None => return 1.0,
        };
        if amount.is_zero() {
            return 1.0;
        }
        // Tiered in the integer domain: b = balance / amount
        if balance >= amount.saturating_mul(U256::from(2u64)) {
            1.0
        } else if balance.saturating_mul(U256::from(10u64))
            >= amount.saturating_mul(U256::from(11u64))
        {
            0.9
        } else if balance >= amount {
            0.7
        } else {
            0.3
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

impl Default for LiquidityValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockRpc;
    use std::sync::atomic::Ordering;

    fn provider(rpc: Option<Arc<MockRpc>>) -> LiquidityProvider {
        LiquidityProvider {
            protocol: "aave-v3".into(),
            chain: "arbitrum".into(),
            pool: Address::repeat_byte(0xAA),
            rpc: rpc.map(|r| r as Arc<dyn ChainRpc>),
        }
    }

    fn asset() -> Address {
        Address::repeat_byte(0x01)
    }

    #[tokio::test]
    async fn test_sufficient_balance_passes() {
        let rpc = Arc::new(MockRpc::new("arbitrum"));
        rpc.balances
            .insert((asset(), Address::repeat_byte(0xAA)), U256::from(1_100u64));
        let validator = LiquidityValidator::new();

        // 1100 >= 1000 * 1.10 exactly
        assert!(
            validator
                .check_liquidity(&provider(Some(rpc.clone())), asset(), U256::from(1_000u64), "test")
                .await
        );
        // 1100 < 1001 * 1.10
        validator.clear_cache();
        assert!(
            !validator
                .check_liquidity(&provider(Some(rpc)), asset(), U256::from(1_001u64), "test")
                .await
        );
    }

    #[tokio::test]
    async fn test_cache_hit_skips_rpc() {
        let rpc = Arc::new(MockRpc::new("arbitrum"));
        rpc.balances
            .insert((asset(), Address::repeat_byte(0xAA)), U256::from(10_000u64));
        let validator = LiquidityValidator::new();
        let p = provider(Some(rpc.clone()));

        assert!(validator.check_liquidity(&p, asset(), U256::from(100u64), "a").await);
        assert!(validator.check_liquidity(&p, asset(), U256::from(100u64), "b").await);
        assert_eq!(rpc.balance_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_checks_coalesce() {
        let mut rpc = MockRpc::new("arbitrum");
        rpc.balance_delay = Some(Duration::from_millis(50));
        let rpc = Arc::new(rpc);
        rpc.balances
            .insert((asset(), Address::repeat_byte(0xAA)), U256::from(10_000u64));
        let validator = Arc::new(LiquidityValidator::new());
        let p = provider(Some(rpc.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let validator = Arc::clone(&validator);
            let p = p.clone();
            handles.push(tokio::spawn(async move {
                validator.check_liquidity(&p, asset(), U256::from(100u64), "spawn").await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        // One fetch served every caller
        assert_eq!(rpc.balance_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_graceful_true_on_rpc_error() {
        // No balance scripted → transport error → graceful-true
        let rpc = Arc::new(MockRpc::new("arbitrum"));
        let validator = LiquidityValidator::new();
        assert!(
            validator
                .check_liquidity(&provider(Some(rpc)), asset(), U256::from(u64::MAX), "err")
                .await
        );
    }

    #[tokio::test]
    async fn test_graceful_true_on_missing_provider() {
        let validator = LiquidityValidator::new();
        assert!(
            validator
                .check_liquidity(&provider(None), asset(), U256::from(1u64), "none")
                .await
        );
    }

    #[tokio::test]
    async fn test_graceful_true_on_timeout() {
        let mut rpc = MockRpc::new("arbitrum");
        rpc.balance_delay = Some(Duration::from_millis(200));
        let rpc = Arc::new(rpc);
        rpc.balances
            .insert((asset(), Address::repeat_byte(0xAA)), U256::from(1u64));
        let validator = LiquidityValidator::with_settings(
            DEFAULT_TTL,
            DEFAULT_SAFETY_MARGIN,
            Duration::from_millis(10),
        );
        // Balance (1) would fail the check, but the timeout wins first
        assert!(
            validator
                .check_liquidity(&provider(Some(rpc)), asset(), U256::from(1_000u64), "slow")
                .await
        );
    }

    #[tokio::test]
    async fn test_ttl_expiry_refetches() {
        let rpc = Arc::new(MockRpc::new("arbitrum"));
        rpc.balances
            .insert((asset(), Address::repeat_byte(0xAA)), U256::from(10_000u64));
        let validator = LiquidityValidator::with_settings(
            Duration::from_millis(0),
            DEFAULT_SAFETY_MARGIN,
            Duration::from_secs(5),
        );
        let p = provider(Some(rpc.clone()));

        validator.check_liquidity(&p, asset(), U256::from(100u64), "1").await;
        validator.check_liquidity(&p, asset(), U256::from(100u64), "2").await;
        // Zero TTL: both calls fetched
        assert_eq!(rpc.balance_fetches.load(Ordering::SeqCst), 2);
        assert!(validator.cached_liquidity(&p, asset()).is_none());
    }

    #[tokio::test]
    async fn test_score_tiers() {
        let rpc = Arc::new(MockRpc::new("arbitrum"));
        rpc.balances
            .insert((asset(), Address::repeat_byte(0xAA)), U256::from(1_000u64));
        let validator = LiquidityValidator::new();
        let p = provider(Some(rpc));

        // Nothing cached yet → optimistic 1.0
        assert_eq!(validator.estimate_liquidity_score(&p, asset(), U256::from(100u64)), 1.0);

        validator.check_liquidity(&p, asset(), U256::from(100u64), "warm").await;
        // b = 1000/500 = 2.0
        assert_eq!(validator.estimate_liquidity_score(&p, asset(), U256::from(500u64)), 1.0);
        // b ≈ 1.25
        assert_eq!(validator.estimate_liquidity_score(&p, asset(), U256::from(800u64)), 0.9);
        // b ≈ 1.05
        assert_eq!(validator.estimate_liquidity_score(&p, asset(), U256::from(950u64)), 0.7);
        // b < 1
        assert_eq!(validator.estimate_liquidity_score(&p, asset(), U256::from(2_000u64)), 0.3);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let rpc = Arc::new(MockRpc::new("arbitrum"));
        rpc.balances
            .insert((asset(), Address::repeat_byte(0xAA)), U256::from(1_000u64));
        let validator = LiquidityValidator::new();
        let p = provider(Some(rpc));
        validator.check_liquidity(&p, asset(), U256::from(100u64), "warm").await;
        assert_eq!(validator.cache_len(), 1);
        validator.clear_cache();
        assert_eq!(validator.cache_len(), 0);
    }
}
