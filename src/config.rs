//! Partition configuration
//! Env-driven (.env supported). Each deployable partition owns a chain
//! subset; everything else hangs off that.

use std::collections::HashMap;
use thiserror::Error;

/// Default health port when HEALTH_CHECK_PORT is absent or invalid.
pub const DEFAULT_HEALTH_PORT: u16 = 3001;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env {0}")]
    MissingEnv(&'static str),
    #[error("PARTITION_CHAINS is empty")]
    EmptyChains,
    #[error("REDIS_URL must use redis:// or rediss:// (got {0})")]
    BadBusUrl(String),
    #[error("{key} is not a finite number: {value}")]
    NotFinite { key: &'static str, value: String },
    #[error("public Solana RPC endpoint is not allowed in production")]
    PublicEndpointInProduction,
}

#[derive(Debug, Clone)]
pub struct PartitionConfig {
    pub partition_id: String,
    pub region: String,
    pub instance_id: String,
    /// Lowercased, trimmed chain subset.
    pub chains: Vec<String>,
    /// True when the subset includes solana-devnet.
    pub devnet: bool,
    pub production: bool,
    pub health_check_port: u16,
    /// Required outside the test environment.
    pub redis_url: Option<String>,
    pub cross_region_health: bool,
    /// Percent, e.g. 0.3 = 0.3%. "0" is preserved as zero.
    pub min_profit_threshold: f64,
    pub cross_chain_enabled: bool,
    pub triangular_enabled: bool,
    pub max_triangular_depth: u32,
    pub opportunity_expiry_ms: u64,
    pub trade_size_usd: f64,
    pub max_gas_price_gwei: Option<f64>,
    /// chain → HTTP RPC endpoint.
    pub rpc_urls: HashMap<String, String>,
    /// chain → websocket endpoint (ingress collectors).
    pub ws_urls: HashMap<String, String>,
}

impl PartitionConfig {
    /// Consumer name for the partition's bus group.
    pub fn consumer_name(&self) -> String {
        format!("cross-chain-detector-{}", self.instance_id)
    }
}

/// Load the partition config from the environment.
pub fn load_config() -> Result<PartitionConfig, ConfigError> {
    dotenv::dotenv().ok();
    load_config_from(&env_lookup)
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Testable loader over an arbitrary key→value source.
pub fn load_config_from(
    get: &dyn Fn(&str) -> Option<String>,
) -> Result<PartitionConfig, ConfigError> {
    let chains: Vec<String> = get("PARTITION_CHAINS")
        .ok_or(ConfigError::MissingEnv("PARTITION_CHAINS"))?
        .split(',')
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();
    if chains.is_empty() {
        return Err(ConfigError::EmptyChains);
    }
    let devnet = chains.iter().any(|c| c == "solana-devnet");

    let environment = get("DEPLOY_ENV")
        .or_else(|| get("NODE_ENV"))
        .unwrap_or_else(|| "development".to_string());
    let production = environment == "production";
    let test_env = environment == "test";

    let redis_url = get("REDIS_URL");
    match &redis_url {
        Some(url) => {
            if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
                return Err(ConfigError::BadBusUrl(redact_secrets(url)));
            }
        }
        None if !test_env => return Err(ConfigError::MissingEnv("REDIS_URL")),
        None => {}
    }

    let health_check_port = get("HEALTH_CHECK_PORT")
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|p| (1..=65_535).contains(p))
        .map(|p| p as u16)
        .unwrap_or(DEFAULT_HEALTH_PORT);

    let partition_id = get("PARTITION_ID").unwrap_or_else(|| format!("partition-{}", chains.join("-")));
    let region = get("REGION_ID").unwrap_or_else(|| "default".to_string());
    let instance_id = get("INSTANCE_ID").unwrap_or_else(|| partition_id.clone());

    // "false" disables; any other value (or absence) enables
    let cross_region_health = get("ENABLE_CROSS_REGION_HEALTH")
        .map(|v| v != "false")
        .unwrap_or(true);
    let cross_chain_enabled = get("CROSS_CHAIN_ENABLED")
        .map(|v| v != "false")
        .unwrap_or(true);
    let triangular_enabled = get("TRIANGULAR_ENABLED")
        .map(|v| v != "false")
        .unwrap_or(true);

    let min_profit_threshold = parse_finite(get("MIN_PROFIT_THRESHOLD"), "MIN_PROFIT_THRESHOLD", 0.3)?;
    let trade_size_usd = parse_finite(get("TRADE_SIZE_USD"), "TRADE_SIZE_USD", 10_000.0)?;

    let max_gas_price_gwei = match get("MAX_GAS_PRICE_GWEI") {
        Some(raw) => {
            let parsed: f64 = raw
                .parse()
                .map_err(|_| ConfigError::NotFinite {
                    key: "MAX_GAS_PRICE_GWEI",
                    value: raw.clone(),
                })?;
            if !parsed.is_finite() {
                return Err(ConfigError::NotFinite {
                    key: "MAX_GAS_PRICE_GWEI",
                    value: raw,
                });
            }
            Some(parsed)
        }
        None => None,
    };

    let max_triangular_depth = get("MAX_TRIANGULAR_DEPTH")
        .and_then(|v| v.parse().ok())
        .unwrap_or(3);
    let opportunity_expiry_ms = get("OPPORTUNITY_EXPIRY_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1_000);

    let mut rpc_urls = HashMap::new();
    let mut ws_urls = HashMap::new();
    for chain in &chains {
        let upper = chain.to_uppercase().replace('-', "_");
        if let Some(url) = get(&format!("{}_RPC_URL", upper)) {
            rpc_urls.insert(chain.clone(), url);
        }
        if let Some(url) = get(&format!("{}_WS_URL", upper)) {
            ws_urls.insert(chain.clone(), url);
        }
    }

    Ok(PartitionConfig {
        partition_id,
        region,
        instance_id,
        chains,
        devnet,
        production,
        health_check_port,
        redis_url,
        cross_region_health,
        min_profit_threshold,
        cross_chain_enabled,
        triangular_enabled,
        max_triangular_depth,
        opportunity_expiry_ms,
        trade_size_usd,
        max_gas_price_gwei,
        rpc_urls,
        ws_urls,
    })
}

fn parse_finite(
    raw: Option<String>,
    key: &'static str,
    default: f64,
) -> Result<f64, ConfigError> {
    match raw {
        Some(raw) => {
            let parsed: f64 = raw.parse().map_err(|_| ConfigError::NotFinite {
                key,
                value: raw.clone(),
            })?;
            // NaN compares false against everything downstream
            if !parsed.is_finite() {
                return Err(ConfigError::NotFinite { key, value: raw });
            }
            Ok(parsed)
        }
        None => Ok(default),
    }
}

/// Redact credentials in an RPC URL before it reaches any log line:
/// api-key style query values and long hex path segments.
pub fn redact_secrets(url: &str) -> String {
    let (base, query) = match url.split_once('?') {
        Some((b, q)) => (b, Some(q)),
        None => (url, None),
    };

    // Long hex path segments are almost always project keys
    let redacted_base: Vec<String> = base
        .split('/')
        .map(|segment| {
            let is_hexish = segment.len() >= 20
                && segment.chars().all(|c| c.is_ascii_hexdigit() || c == '-' || c == '_');
            if is_hexish {
                "***REDACTED***".to_string()
            } else {
                segment.to_string()
            }
        })
        .collect();
    let mut out = redacted_base.join("/");

    if let Some(query) = query {
        let redacted_query: Vec<String> = query
            .split('&')
            .map(|param| match param.split_once('=') {
                Some((k, _)) if k.to_lowercase().contains("key") || k.to_lowercase().contains("token") => {
                    format!("{}=***REDACTED***", k)
                }
                _ => param.to_string(),
            })
            .collect();
        out.push('?');
        out.push_str(&redacted_query.join("&"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_minimal_config() {
        let source = env(&[
            ("PARTITION_CHAINS", " Ethereum , arbitrum "),
            ("REDIS_URL", "redis://localhost:6379"),
        ]);
        let config = load_config_from(&source).unwrap();
        assert_eq!(config.chains, vec!["ethereum", "arbitrum"]);
        assert!(!config.devnet);
        assert_eq!(config.health_check_port, DEFAULT_HEALTH_PORT);
        assert_eq!(config.min_profit_threshold, 0.3);
        assert!(config.cross_chain_enabled);
        assert_eq!(config.max_triangular_depth, 3);
        assert_eq!(config.opportunity_expiry_ms, 1_000);
    }

    #[test]
    fn test_missing_chains_fails() {
        let source = env(&[("REDIS_URL", "redis://localhost")]);
        assert!(matches!(
            load_config_from(&source),
            Err(ConfigError::MissingEnv("PARTITION_CHAINS"))
        ));
    }

    #[test]
    fn test_redis_url_required_outside_test_env() {
        let source = env(&[("PARTITION_CHAINS", "ethereum")]);
        assert!(matches!(
            load_config_from(&source),
            Err(ConfigError::MissingEnv("REDIS_URL"))
        ));

        let source = env(&[("PARTITION_CHAINS", "ethereum"), ("NODE_ENV", "test")]);
        assert!(load_config_from(&source).unwrap().redis_url.is_none());
    }

    #[test]
    fn test_redis_scheme_enforced() {
        let source = env(&[
            ("PARTITION_CHAINS", "ethereum"),
            ("REDIS_URL", "http://localhost:6379"),
        ]);
        assert!(matches!(
            load_config_from(&source),
            Err(ConfigError::BadBusUrl(_))
        ));

        let source = env(&[
            ("PARTITION_CHAINS", "ethereum"),
            ("REDIS_URL", "rediss://secure:6380"),
        ]);
        assert!(load_config_from(&source).is_ok());
    }

    #[test]
    fn test_zero_threshold_preserved() {
        let source = env(&[
            ("PARTITION_CHAINS", "ethereum"),
            ("REDIS_URL", "redis://localhost"),
            ("MIN_PROFIT_THRESHOLD", "0"),
        ]);
        assert_eq!(load_config_from(&source).unwrap().min_profit_threshold, 0.0);
    }

    #[test]
    fn test_nan_threshold_rejected() {
        let source = env(&[
            ("PARTITION_CHAINS", "ethereum"),
            ("REDIS_URL", "redis://localhost"),
            ("MIN_PROFIT_THRESHOLD", "NaN"),
        ]);
        assert!(matches!(
            load_config_from(&source),
            Err(ConfigError::NotFinite { .. })
        ));

        let source = env(&[
            ("PARTITION_CHAINS", "ethereum"),
            ("REDIS_URL", "redis://localhost"),
            ("MAX_GAS_PRICE_GWEI", "NaN"),
        ]);
        assert!(matches!(
            load_config_from(&source),
            Err(ConfigError::NotFinite { .. })
        ));
    }

    #[test]
    fn test_feature_toggles() {
        let source = env(&[
            ("PARTITION_CHAINS", "ethereum"),
            ("REDIS_URL", "redis://localhost"),
            ("CROSS_CHAIN_ENABLED", "false"),
            ("ENABLE_CROSS_REGION_HEALTH", "false"),
            ("TRIANGULAR_ENABLED", "yes"),
        ]);
        let config = load_config_from(&source).unwrap();
        assert!(!config.cross_chain_enabled);
        assert!(!config.cross_region_health);
        // Anything except the literal "false" enables
        assert!(config.triangular_enabled);
    }

    #[test]
    fn test_health_port_bounds() {
        let source = env(&[
            ("PARTITION_CHAINS", "ethereum"),
            ("REDIS_URL", "redis://localhost"),
            ("HEALTH_CHECK_PORT", "0"),
        ]);
        assert_eq!(
            load_config_from(&source).unwrap().health_check_port,
            DEFAULT_HEALTH_PORT
        );

        let source = env(&[
            ("PARTITION_CHAINS", "ethereum"),
            ("REDIS_URL", "redis://localhost"),
            ("HEALTH_CHECK_PORT", "8088"),
        ]);
        assert_eq!(load_config_from(&source).unwrap().health_check_port, 8088);
    }

    #[test]
    fn test_per_chain_rpc_urls() {
        let source = env(&[
            ("PARTITION_CHAINS", "ethereum,solana-devnet"),
            ("REDIS_URL", "redis://localhost"),
            ("ETHEREUM_RPC_URL", "https://eth.example/abc"),
            ("SOLANA_DEVNET_RPC_URL", "https://devnet.example"),
        ]);
        let config = load_config_from(&source).unwrap();
        assert!(config.devnet);
        assert_eq!(
            config.rpc_urls.get("ethereum").map(String::as_str),
            Some("https://eth.example/abc")
        );
        assert_eq!(
            config.rpc_urls.get("solana-devnet").map(String::as_str),
            Some("https://devnet.example")
        );
    }

    #[test]
    fn test_redact_api_key_query() {
        let url = "https://mainnet.helius-rpc.com/?api-key=super-secret-123";
        assert_eq!(
            redact_secrets(url),
            "https://mainnet.helius-rpc.com/?api-key=***REDACTED***"
        );
    }

    #[test]
    fn test_redact_hex_path_segment() {
        let url = "https://eth-mainnet.g.alchemy.com/v2/0123456789abcdef01234567";
        assert_eq!(
            redact_secrets(url),
            "https://eth-mainnet.g.alchemy.com/v2/***REDACTED***"
        );
    }

    #[test]
    fn test_redact_leaves_plain_urls_alone() {
        let url = "wss://ethereum-rpc.publicnode.com";
        assert_eq!(redact_secrets(url), url);
    }
}
