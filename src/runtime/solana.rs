//! Solana RPC endpoint selection.
//!
//! Priority: explicit URL → Helius (API key) → Triton (API key) →
//! PublicNode fallback. Production partitions are refused the public
//! fallback at startup — a shared public endpoint cannot sustain the
//! subscription load and fails in ways that look like detection bugs.

use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolanaRpcSource {
    Explicit,
    Helius,
    Triton,
    PublicNode,
}

#[derive(Debug, Clone)]
pub struct SolanaRpcSelection {
    pub url: String,
    pub source: SolanaRpcSource,
}

/// Selection inputs, decoupled from the process environment.
#[derive(Debug, Default, Clone)]
pub struct SolanaRpcInputs {
    pub explicit_url: Option<String>,
    pub devnet_url: Option<String>,
    pub helius_api_key: Option<String>,
    pub triton_api_key: Option<String>,
}

impl SolanaRpcInputs {
    pub fn from_env() -> Self {
        let get = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            explicit_url: get("SOLANA_RPC_URL"),
            devnet_url: get("SOLANA_DEVNET_RPC_URL"),
            helius_api_key: get("HELIUS_API_KEY"),
            triton_api_key: get("TRITON_API_KEY"),
        }
    }
}

pub fn select_rpc(
    inputs: &SolanaRpcInputs,
    devnet: bool,
    production: bool,
) -> Result<SolanaRpcSelection, ConfigError> {
    let explicit = if devnet {
        inputs.devnet_url.as_ref().or(inputs.explicit_url.as_ref())
    } else {
        inputs.explicit_url.as_ref()
    };
    if let Some(url) = explicit {
        return Ok(SolanaRpcSelection {
            url: url.clone(),
            source: SolanaRpcSource::Explicit,
        });
    }

    if let Some(key) = &inputs.helius_api_key {
        let host = if devnet {
            "devnet.helius-rpc.com"
        } else {
            "mainnet.helius-rpc.com"
        };
        return Ok(SolanaRpcSelection {
            url: format!("https://{}/?api-key={}", host, key),
            source: SolanaRpcSource::Helius,
        });
    }

    if let Some(key) = &inputs.triton_api_key {
        let host = if devnet {
            "api.devnet.rpcpool.com"
        } else {
            "api.mainnet.rpcpool.com"
        };
        return Ok(SolanaRpcSelection {
            url: format!("https://{}/{}", host, key),
            source: SolanaRpcSource::Triton,
        });
    }

    if production {
        return Err(ConfigError::PublicEndpointInProduction);
    }
    Ok(SolanaRpcSelection {
        url: if devnet {
            "https://solana-devnet-rpc.publicnode.com".to_string()
        } else {
            "https://solana-rpc.publicnode.com".to_string()
        },
        source: SolanaRpcSource::PublicNode,
    })
}
