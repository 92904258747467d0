//! Cross-venue arbitrage detection pipeline.
//!
//! Ingests confirmed pool prices, pending (mempool) swap intents and
//! whale-wallet trades across many chains, and emits de-duplicated
//! arbitrage opportunities onto a durable bus for downstream execution.
//! Includes the execution pre-flight core: batched quotes, liquidity
//! validation and the simulation-gated submission path.

pub mod bus;
pub mod config;
pub mod contracts;
pub mod decoder;
pub mod detector;
pub mod execution;
pub mod liquidity;
pub mod publisher;
pub mod quotes;
pub mod rpc;
pub mod runtime;
pub mod store;
pub mod types;
pub mod whale;

// Re-export commonly used types
pub use config::{load_config, PartitionConfig};
pub use decoder::DecoderRegistry;
pub use detector::CrossChainDetector;
pub use publisher::OpportunityPublisher;
pub use runtime::Partition;
pub use store::PriceStore;
pub use types::{ArbitrageOpportunity, PendingSwapIntent, PriceUpdate, WhaleTransaction};
