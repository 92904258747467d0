// Partition entry point: config → component graph → ingress loops,
// with a structured config-error exit for bad startup state.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crosschain_arb::bus::{InMemoryBus, RedisStreamBus, StreamBus};
use crosschain_arb::runtime::Partition;

#[derive(Parser, Debug)]
#[command(name = "crosschain-arb", about = "Cross-venue arbitrage detection partition")]
struct Cli {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = match crosschain_arb::load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "fatal config validation error");
            std::process::exit(1);
        }
    };

    let bus: Arc<dyn StreamBus> = match &config.redis_url {
        Some(url) => match RedisStreamBus::connect(url).await {
            Ok(bus) => Arc::new(bus),
            Err(e) => {
                error!(error = %e, "bus connection failed");
                std::process::exit(1);
            }
        },
        // Test environment only (REDIS_URL is required elsewhere)
        None => Arc::new(InMemoryBus::new()),
    };

    let partition = match Partition::build(config, bus) {
        Ok(partition) => partition,
        Err(e) => {
            error!(error = %e, "fatal startup error");
            std::process::exit(1);
        }
    };
    partition.run().await?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    partition.shutdown().await;
    Ok(())
}
