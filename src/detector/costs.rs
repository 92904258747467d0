//! Table-driven cost model for cross-chain routes.
//!
//! All figures are USD. The tables are deliberately coarse — they feed
//! a pre-filter, and execution re-quotes everything on-chain.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Per-chain minimum price delta (fraction) before a route is worth
/// scoring. Ethereum sits strictly above every L2: mainnet gas makes
/// thin spreads unexecutable there.
static CHAIN_MIN_PROFIT: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("ethereum", 0.002),
        ("bsc", 0.001),
        ("polygon", 0.001),
        ("arbitrum", 0.001),
        ("optimism", 0.001),
        ("base", 0.001),
        ("avalanche", 0.001),
        ("fantom", 0.001),
    ])
});

const UNKNOWN_CHAIN_MIN_PROFIT: f64 = 0.0015;

/// Route-specific bridge base costs. Missing routes use the default.
static BRIDGE_COSTS: Lazy<HashMap<(&'static str, &'static str), f64>> = Lazy::new(|| {
    HashMap::from([
        (("ethereum", "arbitrum"), 15.0),
        (("arbitrum", "ethereum"), 15.0),
        (("ethereum", "optimism"), 15.0),
        (("optimism", "ethereum"), 15.0),
        (("ethereum", "base"), 15.0),
        (("base", "ethereum"), 15.0),
        (("ethereum", "polygon"), 12.0),
        (("polygon", "ethereum"), 12.0),
        (("ethereum", "bsc"), 18.0),
        (("bsc", "ethereum"), 18.0),
        (("arbitrum", "optimism"), 8.0),
        (("optimism", "arbitrum"), 8.0),
        (("arbitrum", "base"), 8.0),
        (("base", "arbitrum"), 8.0),
        (("optimism", "base"), 8.0),
        (("base", "optimism"), 8.0),
        (("polygon", "arbitrum"), 10.0),
        (("arbitrum", "polygon"), 10.0),
    ])
});

const DEFAULT_BRIDGE_COST: f64 = 20.0;

/// Per-chain gas estimate for one settlement leg.
static GAS_ESTIMATES: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("ethereum", 8.0),
        ("bsc", 1.5),
        ("polygon", 1.0),
        ("arbitrum", 2.0),
        ("optimism", 2.0),
        ("base", 2.0),
        ("avalanche", 2.0),
        ("fantom", 1.0),
    ])
});

const UNKNOWN_CHAIN_GAS: f64 = 3.0;

pub fn chain_min_profit(chain: &str) -> f64 {
    CHAIN_MIN_PROFIT
        .get(chain)
        .copied()
        .unwrap_or(UNKNOWN_CHAIN_MIN_PROFIT)
}

/// Bridge base cost for a route.
pub fn bridge_cost(buy_chain: &str, sell_chain: &str) -> f64 {
    BRIDGE_COSTS
        .get(&(buy_chain, sell_chain))
        .copied()
        .unwrap_or(DEFAULT_BRIDGE_COST)
}

/// Source + destination settlement gas for a route.
pub fn route_gas_cost(buy_chain: &str, sell_chain: &str) -> f64 {
    let leg = |chain: &str| GAS_ESTIMATES.get(chain).copied().unwrap_or(UNKNOWN_CHAIN_GAS);
    leg(buy_chain) + leg(sell_chain)
}
