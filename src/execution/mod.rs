//! Simulation & Submission Gate
//!
//! Every would-be submission passes the same gauntlet, in order:
//!
//!   1. should-simulate policy (profit threshold + staleness)
//!   2. pre-submission simulation — a predicted revert ABORTS; a
//!      simulation *provider* failure degrades gracefully and proceeds
//!   3. provider health
//!   4. gas-spike detection against the chain's rolling median
//!   5. route cooldown (escalating backoff on repeat failures)
//!   6. nonce discipline: a pre-allocated nonce is used verbatim, else
//!      the chain's nonce manager allocates exactly once
//!
//! The output is a nonce-safe prepared transaction for the downstream
//! submitter, or a typed `ERR_*` string explaining which gate failed.

mod cooldown;
mod gas;
mod nonce;

pub use cooldown::{RouteCooldown, RouteId};
pub use gas::{GasSpikeDetector, SpikeCheck};
pub use nonce::NonceManager;

use alloy::primitives::{keccak256, Address, Bytes, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::rpc::ChainRpc;
use crate::types::now_ms;

/// Simulate only above this expected profit.
const DEFAULT_SIMULATION_PROFIT_THRESHOLD_USD: f64 = 50.0;

/// Opportunities older than this skip simulation (and likely execution).
const DEFAULT_STALENESS_BOUND_MS: u64 = 5_000;

/// Default first-failure route suppression.
const DEFAULT_ROUTE_COOLDOWN: Duration = Duration::from_secs(30);

// ── Simulation seam ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub success: bool,
    pub would_revert: bool,
    pub revert_reason: Option<String>,
    pub gas_used: Option<u64>,
    pub provider: String,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[async_trait]
pub trait SimulationService: Send + Sync {
    /// Whether this transaction is worth a simulation round-trip.
    fn should_simulate(&self, expected_profit_usd: f64, opportunity_age_ms: u64) -> bool;

    async fn simulate(&self, chain: &str, plan: &TxPlan) -> SimulationResult;
}

/// Default policy: profit threshold AND freshness bound.
pub struct ThresholdSimulationPolicy;

impl ThresholdSimulationPolicy {
    pub fn should_simulate(expected_profit_usd: f64, opportunity_age_ms: u64) -> bool {
        expected_profit_usd >= DEFAULT_SIMULATION_PROFIT_THRESHOLD_USD
            && opportunity_age_ms < DEFAULT_STALENESS_BOUND_MS
    }
}

pub trait ProviderHealth: Send + Sync {
    fn is_provider_healthy(&self, chain: &str) -> bool;
}

/// Health source that trusts every chain (bus-less local runs, tests).
pub struct AlwaysHealthy;

impl ProviderHealth for AlwaysHealthy {
    fn is_provider_healthy(&self, _chain: &str) -> bool {
        true
    }
}

// ── Transaction plan / prepared transaction ─────────────────────────

/// What the execution strategy wants to send.
#[derive(Debug, Clone)]
pub struct TxPlan {
    pub chain: String,
    pub sender: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: u64,
    /// Candidate gas price in wei.
    pub gas_price_wei: u128,
    /// Pre-allocated nonce (batch flows); None allocates.
    pub nonce: Option<u64>,
    pub expected_profit_usd: f64,
    /// When the opportunity was detected (epoch ms).
    pub opportunity_timestamp: u64,
    pub route: Option<RouteId>,
}

impl TxPlan {
    pub fn age_ms(&self) -> u64 {
        now_ms().saturating_sub(self.opportunity_timestamp)
    }
}

/// A gate-approved transaction, nonce assigned, ready to sign and send.
#[derive(Debug, Clone)]
pub struct PreparedTx {
    pub chain: String,
    pub sender: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price_wei: u128,
    pub nonce: u64,
    /// Simulation gas hint, when a simulation ran.
    pub gas_used_hint: Option<u64>,
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("ERR_SIMULATION_REVERT: {reason}")]
    SimulationRevert { reason: String },
    #[error("ERR_PROVIDER_UNHEALTHY: {chain}")]
    ProviderUnhealthy { chain: String },
    #[error("ERR_GAS_SPIKE: {candidate_gwei} gwei vs baseline {median_gwei} gwei ({ratio:.2}x)")]
    GasSpike {
        candidate_gwei: f64,
        median_gwei: f64,
        ratio: f64,
    },
    #[error("ERR_GAS_PRICE_INVALID: {detail}")]
    InvalidGasPrice { detail: String },
    #[error("ERR_ROUTE_COOLDOWN: {pair} {buy_chain}->{sell_chain}")]
    RouteSuppressed {
        pair: String,
        buy_chain: String,
        sell_chain: String,
    },
    #[error("ERR_NONCE: {0}")]
    Nonce(String),
    #[error("ERR_NO_PROVIDER: {chain}")]
    MissingRpc { chain: String },
}

/// Outcome of one gate pass.
#[derive(Debug)]
pub struct GateOutcome {
    pub success: bool,
    pub tx: Option<PreparedTx>,
    pub error: Option<String>,
}

impl GateOutcome {
    fn ok(tx: PreparedTx) -> Self {
        Self {
            success: true,
            tx: Some(tx),
            error: None,
        }
    }

    fn fail(err: GateError) -> Self {
        Self {
            success: false,
            tx: None,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GateMetrics {
    pub simulations_performed: u64,
    pub simulations_skipped: u64,
    pub simulation_predicted_reverts: u64,
    pub simulation_errors: u64,
    pub gas_spike_aborts: u64,
    pub prepared: u64,
}

pub struct SubmissionGate {
    rpcs: HashMap<String, Arc<dyn ChainRpc>>,
    simulation: Option<Arc<dyn SimulationService>>,
    health: Arc<dyn ProviderHealth>,
    gas: GasSpikeDetector,
    nonces: NonceManager,
    cooldown: RouteCooldown,
    /// Optional env-driven ceiling, gwei. Already NaN-checked at
    /// config load; re-checked here because comparisons against NaN
    /// are silently false.
    max_gas_price_gwei: Option<f64>,
    /// 4-byte selector → symbolic error name for expected contract
    /// errors.
    error_selectors: HashMap<[u8; 4], String>,
    simulations_performed: AtomicU64,
    simulations_skipped: AtomicU64,
    simulation_predicted_reverts: AtomicU64,
    simulation_errors: AtomicU64,
    gas_spike_aborts: AtomicU64,
    prepared: AtomicU64,
}

impl SubmissionGate {
    pub fn new(
        rpcs: HashMap<String, Arc<dyn ChainRpc>>,
        simulation: Option<Arc<dyn SimulationService>>,
        health: Arc<dyn ProviderHealth>,
        max_gas_price_gwei: Option<f64>,
    ) -> Self {
        Self {
            rpcs,
            simulation,
            health,
            gas: GasSpikeDetector::new(),
            nonces: NonceManager::new(),
            cooldown: RouteCooldown::new(DEFAULT_ROUTE_COOLDOWN),
            max_gas_price_gwei: max_gas_price_gwei.filter(|v| v.is_finite()),
            error_selectors: HashMap::new(),
            simulations_performed: AtomicU64::new(0),
            simulations_skipped: AtomicU64::new(0),
            simulation_predicted_reverts: AtomicU64::new(0),
            simulation_errors: AtomicU64::new(0),
            gas_spike_aborts: AtomicU64::new(0),
            prepared: AtomicU64::new(0),
        }
    }

    /// Register an expected contract error, e.g.
    /// `"InsufficientProfit()"`.
    pub fn register_error_signature(&mut self, signature: &str) {
        let hash = keccak256(signature.as_bytes());
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&hash[..4]);
        self.error_selectors.insert(selector, signature.to_string());
    }

    /// Symbolic name for a revert payload, when the selector is one of
    /// the registered expected errors.
    pub fn explain_revert(&self, revert_data: &[u8]) -> Option<&str> {
        if revert_data.len() < 4 {
            return None;
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&revert_data[..4]);
        self.error_selectors.get(&selector).map(|s| s.as_str())
    }

    /// Feed an observed chain gas price into the spike baseline.
    pub fn observe_gas_price(&self, chain: &str, price_wei: u128) {
        self.gas.record(chain, price_wei);
    }

    /// Report the downstream submission result so the route cooldown
    /// can escalate or reset.
    pub fn record_route_result(&self, route: &RouteId, success: bool) {
        if success {
            self.cooldown.record_success(route);
        } else {
            self.cooldown.record_failure(route);
        }
    }

    pub fn metrics(&self) -> GateMetrics {
        GateMetrics {
            simulations_performed: self.simulations_performed.load(Ordering::Relaxed),
            simulations_skipped: self.simulations_skipped.load(Ordering::Relaxed),
            simulation_predicted_reverts: self.simulation_predicted_reverts.load(Ordering::Relaxed),
            simulation_errors: self.simulation_errors.load(Ordering::Relaxed),
            gas_spike_aborts: self.gas_spike_aborts.load(Ordering::Relaxed),
            prepared: self.prepared.load(Ordering::Relaxed),
        }
    }

    /// Run the full gauntlet for one plan.
    pub async fn prepare(&self, plan: &TxPlan) -> GateOutcome {
        // 1 + 2: simulation
        let gas_used_hint = match self.maybe_simulate(plan).await {
            Ok(hint) => hint,
            Err(e) => return GateOutcome::fail(e),
        };

        // 3: provider health
        if !self.health.is_provider_healthy(&plan.chain) {
            debug!(chain = %plan.chain, "submission blocked: provider unhealthy");
            return GateOutcome::fail(GateError::ProviderUnhealthy {
                chain: plan.chain.clone(),
            });
        }

        // 4: gas ceiling + spike detection
        if let Some(ceiling_gwei) = self.max_gas_price_gwei {
            let candidate_gwei = plan.gas_price_wei as f64 / 1e9;
            if !candidate_gwei.is_finite() {
                return GateOutcome::fail(GateError::InvalidGasPrice {
                    detail: "candidate gas price is not finite".into(),
                });
            }
            if candidate_gwei > ceiling_gwei {
                return GateOutcome::fail(GateError::InvalidGasPrice {
                    detail: format!(
                        "{} gwei above configured ceiling {} gwei",
                        candidate_gwei, ceiling_gwei
                    ),
                });
            }
        }
        if let SpikeCheck::Spike {
            candidate_gwei,
            median_gwei,
            ratio,
        } = self.gas.check(&plan.chain, plan.gas_price_wei)
        {
            self.gas_spike_aborts.fetch_add(1, Ordering::Relaxed);
            warn!(
                chain = %plan.chain,
                candidate_gwei,
                median_gwei,
                ratio,
                "submission blocked: gas spike"
            );
            return GateOutcome::fail(GateError::GasSpike {
                candidate_gwei,
                median_gwei,
                ratio,
            });
        }

        // 5: route cooldown
        if let Some(route) = &plan.route {
            if self.cooldown.is_suppressed(route) {
                return GateOutcome::fail(GateError::RouteSuppressed {
                    pair: route.pair.clone(),
                    buy_chain: route.buy_chain.clone(),
                    sell_chain: route.sell_chain.clone(),
                });
            }
        }

        // 6: nonce discipline
        let nonce = match plan.nonce {
            // Pre-allocated (batch flow): used verbatim, never re-allocated
            Some(nonce) => nonce,
            None => {
                let rpc = match self.rpcs.get(&plan.chain) {
                    Some(rpc) => rpc,
                    None => {
                        return GateOutcome::fail(GateError::MissingRpc {
                            chain: plan.chain.clone(),
                        })
                    }
                };
                match self
                    .nonces
                    .allocate(&plan.chain, plan.sender, rpc.as_ref())
                    .await
                {
                    Ok(nonce) => nonce,
                    Err(e) => return GateOutcome::fail(GateError::Nonce(e.to_string())),
                }
            }
        };

        self.prepared.fetch_add(1, Ordering::Relaxed);
        info!(
            chain = %plan.chain,
            nonce,
            gas_price_gwei = plan.gas_price_wei as f64 / 1e9,
            simulated = gas_used_hint.is_some(),
            "transaction cleared submission gate"
        );
        GateOutcome::ok(PreparedTx {
            chain: plan.chain.clone(),
            sender: plan.sender,
            to: plan.to,
            data: plan.data.clone(),
            value: plan.value,
            gas_limit: plan.gas_limit,
            gas_price_wei: plan.gas_price_wei,
            nonce,
            gas_used_hint,
        })
    }

    /// Gates 1 and 2. Exactly one of performed/skipped increments per
    /// call. Returns the simulation gas hint on success.
    async fn maybe_simulate(&self, plan: &TxPlan) -> Result<Option<u64>, GateError> {
        let simulation = match &self.simulation {
            Some(s) => s,
            None => {
                self.simulations_skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };
        if !simulation.should_simulate(plan.expected_profit_usd, plan.age_ms()) {
            self.simulations_skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        self.simulations_performed.fetch_add(1, Ordering::Relaxed);
        let result = simulation.simulate(&plan.chain, plan).await;

        if result.would_revert {
            self.simulation_predicted_reverts
                .fetch_add(1, Ordering::Relaxed);
            let reason = result
                .revert_reason
                .unwrap_or_else(|| "unknown".to_string());
            return Err(GateError::SimulationRevert { reason });
        }
        if !result.success {
            // Simulation infrastructure failed, not the transaction:
            // degrade gracefully and proceed
            self.simulation_errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                chain = %plan.chain,
                provider = %result.provider,
                error = result.error.as_deref().unwrap_or("unknown"),
                "simulation provider failed, proceeding unsimulated"
            );
            return Ok(None);
        }
        Ok(result.gas_used)
    }
}
