//! Partitioned runtime scaffold.
//!
//! One partition process owns a chain subset: it builds the component
//! graph (store, trackers, detector, publisher, decoder, pre-flight),
//! subscribes to the ingress streams new-only, drives the detection
//! ticker, and owns graceful shutdown. Shutdown is idempotent and runs
//! in reverse: stop subscribers, flush the publisher, clear caches,
//! drop providers.

pub mod solana;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bus::{streams, StreamBus, CONSUMER_GROUP, START_ID_NEW_ONLY};
use crate::config::{redact_secrets, PartitionConfig};
use crate::decoder::{wrapped_native, DecoderRegistry};
use crate::detector::{CrossChainDetector, DetectorSettings};
use crate::execution::{AlwaysHealthy, SubmissionGate};
use crate::liquidity::LiquidityValidator;
use crate::publisher::{OpportunityPublisher, PublisherConfig};
use crate::quotes::{BatchQuoteManager, QuoteManagerConfig, RouterDirectory};
use crate::rpc::{AlloyRpc, ChainRpc};
use crate::store::PriceStore;
use crate::whale::WhaleTracker;

/// Group-read batch size.
const READ_BATCH: usize = 128;

/// Group-read block duration; also the shutdown latency bound for a
/// quiet stream.
const READ_BLOCK: Duration = Duration::from_millis(500);

/// Periodic stats summary cadence.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Wrapped-native symbols per canonical chain, registered into the
/// detector's enrichment index at startup.
const NATIVE_SYMBOLS: &[(u64, &str)] = &[
    (1, "WETH"),
    (10, "WETH"),
    (56, "WBNB"),
    (137, "WMATIC"),
    (250, "WFTM"),
    (8453, "WETH"),
    (42161, "WETH"),
    (43114, "WAVAX"),
];

pub struct Partition {
    config: PartitionConfig,
    bus: Arc<dyn StreamBus>,
    store: Arc<PriceStore>,
    whales: Arc<WhaleTracker>,
    liquidity: Arc<LiquidityValidator>,
    publisher: Arc<OpportunityPublisher>,
    detector: Arc<CrossChainDetector>,
    decoder: Arc<DecoderRegistry>,
    gate: Arc<SubmissionGate>,
    quotes: Arc<BatchQuoteManager>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Partition {
    /// Build the component graph for a chain subset.
    pub fn build(config: PartitionConfig, bus: Arc<dyn StreamBus>) -> anyhow::Result<Self> {
        info!(
            partition = %config.partition_id,
            region = %config.region,
            chains = ?config.chains,
            "building partition"
        );

        // EVM provider handles; Solana chains select their endpoint
        // separately and have no eth-style handle here
        let mut rpcs: HashMap<String, Arc<dyn ChainRpc>> = HashMap::new();
        for chain in &config.chains {
            if chain.starts_with("solana") {
                let inputs = solana::SolanaRpcInputs::from_env();
                let selection = solana::select_rpc(&inputs, config.devnet, config.production)?;
                info!(
                    chain = %chain,
                    source = ?selection.source,
                    url = %redact_secrets(&selection.url),
                    "solana rpc selected"
                );
                continue;
            }
            match config.rpc_urls.get(chain) {
                Some(url) => {
                    info!(chain = %chain, url = %redact_secrets(url), "connecting provider");
                    let rpc = AlloyRpc::connect_http(chain, url)?;
                    rpcs.insert(chain.clone(), Arc::new(rpc));
                }
                None => {
                    warn!(chain = %chain, "no RPC URL configured; pre-flight degrades gracefully");
                }
            }
        }

        let store = Arc::new(PriceStore::new());
        let whales = Arc::new(WhaleTracker::new());
        let liquidity = Arc::new(LiquidityValidator::new());
        let publisher = Arc::new(OpportunityPublisher::new(
            bus.clone(),
            PublisherConfig {
                default_trade_size_usd: config.trade_size_usd,
                ..Default::default()
            },
        ));

        let settings = DetectorSettings {
            trade_size_usd: config.trade_size_usd,
            // env threshold is percent
            min_profit_fraction: config.min_profit_threshold / 100.0,
            ..Default::default()
        };
        let mut detector = CrossChainDetector::new(
            store.clone(),
            whales.clone(),
            liquidity.clone(),
            publisher.clone(),
            settings,
        );
        for (chain_id, symbol) in NATIVE_SYMBOLS {
            if let Some(token) = wrapped_native(*chain_id) {
                detector.register_token_symbol(*chain_id, token, symbol);
            }
        }
        let detector = Arc::new(detector);

        // Family selector tables cover the canonical routers; chain
        // router and Curve pool registrations arrive with deployment
        // config
        let decoder = Arc::new(DecoderRegistry::new());

        let gate = Arc::new(SubmissionGate::new(
            rpcs.clone(),
            None,
            Arc::new(AlwaysHealthy),
            config.max_gas_price_gwei,
        ));
        let quotes = Arc::new(BatchQuoteManager::new(
            rpcs,
            HashMap::new(),
            RouterDirectory::new(),
            QuoteManagerConfig::default(),
        ));

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            bus,
            store,
            whales,
            liquidity,
            publisher,
            detector,
            decoder,
            gate,
            quotes,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &Arc<PriceStore> {
        &self.store
    }

    pub fn detector(&self) -> &Arc<CrossChainDetector> {
        &self.detector
    }

    pub fn decoder(&self) -> &Arc<DecoderRegistry> {
        &self.decoder
    }

    pub fn gate(&self) -> &Arc<SubmissionGate> {
        &self.gate
    }

    pub fn quotes(&self) -> &Arc<BatchQuoteManager> {
        &self.quotes
    }

    /// Subscribe to the ingress streams (new-only) and start the
    /// detection ticker.
    pub async fn run(&self) -> anyhow::Result<()> {
        let consumer = self.config.consumer_name();
        for stream in [
            streams::PRICE_UPDATES,
            streams::PENDING_OPPORTUNITIES,
            streams::WHALE_TRANSACTIONS,
        ] {
            self.bus
                .ensure_group(stream, CONSUMER_GROUP, START_ID_NEW_ONLY)
                .await?;
        }

        let mut tasks = self.tasks.lock().unwrap();

        // Price updates → store
        {
            let bus = self.bus.clone();
            let store = self.store.clone();
            let consumer = consumer.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        read = bus.read_group(
                            streams::PRICE_UPDATES, CONSUMER_GROUP, &consumer, READ_BATCH, READ_BLOCK,
                        ) => match read {
                            Ok(records) => {
                                for record in records {
                                    if let Some(update) = crate::bus::parse_price_update(&record.payload) {
                                        store.handle_price_update(update);
                                    }
                                    let _ = bus.ack(streams::PRICE_UPDATES, CONSUMER_GROUP, &record.id).await;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "price stream read failed");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                            }
                        },
                    }
                }
            }));
        }

        // Pending intents → detector buffer
        {
            let bus = self.bus.clone();
            let detector = self.detector.clone();
            let consumer = consumer.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        read = bus.read_group(
                            streams::PENDING_OPPORTUNITIES, CONSUMER_GROUP, &consumer, READ_BATCH, READ_BLOCK,
                        ) => match read {
                            Ok(records) => {
                                for record in records {
                                    if let Some(intent) = crate::bus::parse_pending_intent(&record.payload) {
                                        detector.ingest_intent(intent);
                                    }
                                    let _ = bus.ack(streams::PENDING_OPPORTUNITIES, CONSUMER_GROUP, &record.id).await;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "pending stream read failed");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                            }
                        },
                    }
                }
            }));
        }

        // Whale trades → tracker, forcing immediate cycles on big flow
        {
            let bus = self.bus.clone();
            let whales = self.whales.clone();
            let detector = self.detector.clone();
            let detection_enabled = self.config.cross_chain_enabled;
            let consumer = consumer.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        read = bus.read_group(
                            streams::WHALE_TRANSACTIONS, CONSUMER_GROUP, &consumer, READ_BATCH, READ_BLOCK,
                        ) => match read {
                            Ok(records) => {
                                for record in records {
                                    if let Some(tx) = crate::bus::parse_whale_transaction(&record.payload) {
                                        let signal = whales.record(&tx);
                                        if signal.force_detection && detection_enabled {
                                            // Coalesces with a running cycle via the
                                            // detector's single-flight guard
                                            detector.run_cycle(true).await;
                                        }
                                    }
                                    let _ = bus.ack(streams::WHALE_TRANSACTIONS, CONSUMER_GROUP, &record.id).await;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "whale stream read failed");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                            }
                        },
                    }
                }
            }));
        }

        // Regular detection ticker
        if self.config.cross_chain_enabled {
            let detector = self.detector.clone();
            let tick = Duration::from_millis(self.config.opportunity_expiry_ms.max(100));
            let mut shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(tick);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = interval.tick() => {
                            detector.run_cycle(false).await;
                        }
                    }
                }
            }));
        } else {
            info!("cross-chain detection disabled by config");
        }

        // Periodic structured stats summary
        {
            let detector = self.detector.clone();
            let decoder = self.decoder.clone();
            let publisher = self.publisher.clone();
            let gate = self.gate.clone();
            let store = self.store.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(STATS_INTERVAL);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // Skip the immediate first tick
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = interval.tick() => {
                            let d = detector.stats();
                            let dec = decoder.stats();
                            let g = gate.metrics();
                            info!(
                                cycles = d.detection_count,
                                cycles_skipped = d.skipped_count,
                                opportunities = d.opportunities_found,
                                published = publisher.published_count(),
                                deduped = publisher.deduped_count(),
                                decoded = dec.decoded,
                                unknown_selectors = dec.unknown_selector,
                                simulations = g.simulations_performed,
                                gas_spike_aborts = g.gas_spike_aborts,
                                pairs = store.pair_count(),
                                "partition stats"
                            );
                        }
                    }
                }
            }));
        }

        info!(
            partition = %self.config.partition_id,
            consumer = %consumer,
            port = self.config.health_check_port,
            "partition running"
        );
        Ok(())
    }

    /// Idempotent graceful shutdown: stop subscribers, flush the
    /// publisher, clear caches.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(partition = %self.config.partition_id, "shutting down");
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            if tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .is_err()
            {
                error!("task did not stop within grace period");
            }
        }

        self.publisher.cleanup();
        self.publisher.clear();
        self.liquidity.clear_cache();
        self.store.clear();
        info!(partition = %self.config.partition_id, "shutdown complete");
    }
}
