//! Durable message bus (Redis Streams).
//!
//! The pipeline reads three ingress streams and writes two egress
//! streams. Every record is one JSON payload under a `data` field;
//! appends are size-capped with approximate trimming (`XADD MAXLEN ~`)
//! so a stalled consumer can never grow a stream without bound.
//!
//! The [`StreamBus`] trait keeps the transport swappable; tests and
//! bus-less local runs use [`InMemoryBus`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::types::{PendingSwapIntent, PriceUpdate, WhaleTransaction};

pub mod streams {
    pub const PRICE_UPDATES: &str = "stream:price-updates";
    pub const PENDING_OPPORTUNITIES: &str = "stream:pending-opportunities";
    pub const WHALE_TRANSACTIONS: &str = "stream:whale-transactions";
    pub const OPPORTUNITIES: &str = "stream:opportunities";
    pub const STATISTICAL_OPPORTUNITIES: &str = "stream:statistical-opportunities";
}

/// Consumer group shared by every partition instance.
pub const CONSUMER_GROUP: &str = "cross-chain-detector";

/// New-only start id for ingress subscriptions.
pub const START_ID_NEW_ONLY: &str = "$";

/// Default approximate stream cap.
pub const DEFAULT_STREAM_CAP: usize = 10_000;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus transport error: {0}")]
    Transport(String),
}

/// One record read from a stream.
#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub id: String,
    pub payload: String,
}

#[async_trait]
pub trait StreamBus: Send + Sync {
    /// Append a record; `cap_hint` bounds the stream length
    /// (approximate trim).
    async fn append(&self, stream: &str, record: &str, cap_hint: usize)
        -> Result<String, BusError>;

    /// Idempotently create the consumer group at `start_id`.
    async fn ensure_group(&self, stream: &str, group: &str, start_id: &str)
        -> Result<(), BusError>;

    /// Blocking group read of new records for this consumer.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamRecord>, BusError>;

    /// Acknowledge a processed record.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BusError>;
}

// ── Redis implementation ────────────────────────────────────────────

pub struct RedisStreamBus {
    connection: redis::aio::MultiplexedConnection,
}

impl RedisStreamBus {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client =
            redis::Client::open(url).map_err(|e| BusError::Transport(e.to_string()))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl StreamBus for RedisStreamBus {
    async fn append(
        &self,
        stream: &str,
        record: &str,
        cap_hint: usize,
    ) -> Result<String, BusError> {
        let mut con = self.connection.clone();
        redis::cmd("XADD")
            .arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(cap_hint)
            .arg("*")
            .arg("data")
            .arg(record)
            .query_async::<_, String>(&mut con)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))
    }

    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        start_id: &str,
    ) -> Result<(), BusError> {
        let mut con = self.connection.clone();
        let result = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(start_id)
            .arg("MKSTREAM")
            .query_async::<_, ()>(&mut con)
            .await;
        match result {
            Ok(()) => Ok(()),
            // Re-creation on restart is expected
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(BusError::Transport(e.to_string())),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamRecord>, BusError> {
        use redis::streams::StreamReadReply;

        let mut con = self.connection.clone();
        let reply: StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut con)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;

        let mut records = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                match entry.map.get("data") {
                    Some(value) => match redis::from_redis_value::<String>(value) {
                        Ok(payload) => records.push(StreamRecord {
                            id: entry.id.clone(),
                            payload,
                        }),
                        Err(e) => warn!(stream, id = %entry.id, error = %e, "undecodable bus record"),
                    },
                    None => warn!(stream, id = %entry.id, "bus record missing data field"),
                }
            }
        }
        Ok(records)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BusError> {
        let mut con = self.connection.clone();
        redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id)
            .query_async::<_, ()>(&mut con)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))
    }
}

// ── In-memory implementation (tests, bus-less local runs) ───────────

#[derive(Default)]
struct MemStream {
    seq: u64,
    entries: Vec<(String, String)>,
}

pub struct InMemoryBus {
    streams: Mutex<HashMap<String, MemStream>>,
    /// group cursor: (stream, group) → index of next unread entry
    cursors: Mutex<HashMap<(String, String), usize>>,
    notify: Notify,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    /// All payloads currently held by a stream (test helper).
    pub fn payloads(&self, stream: &str) -> Vec<String> {
        self.streams
            .lock()
            .unwrap()
            .get(stream)
            .map(|s| s.entries.iter().map(|(_, p)| p.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, stream: &str) -> usize {
        self.streams
            .lock()
            .unwrap()
            .get(stream)
            .map(|s| s.entries.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamBus for InMemoryBus {
    async fn append(
        &self,
        stream: &str,
        record: &str,
        cap_hint: usize,
    ) -> Result<String, BusError> {
        let id = {
            let mut streams = self.streams.lock().unwrap();
            let entry = streams.entry(stream.to_string()).or_default();
            entry.seq += 1;
            let id = format!("{}-0", entry.seq);
            entry.entries.push((id.clone(), record.to_string()));
            if entry.entries.len() > cap_hint {
                let excess = entry.entries.len() - cap_hint;
                entry.entries.drain(0..excess);
            }
            id
        };
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        start_id: &str,
    ) -> Result<(), BusError> {
        // Lock order matches read_group: streams, then cursors
        let start = if start_id == START_ID_NEW_ONLY {
            self.streams
                .lock()
                .unwrap()
                .get(stream)
                .map(|s| s.entries.len())
                .unwrap_or(0)
        } else {
            0
        };
        let mut cursors = self.cursors.lock().unwrap();
        cursors
            .entry((stream.to_string(), group.to_string()))
            .or_insert(start);
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamRecord>, BusError> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            {
                let streams = self.streams.lock().unwrap();
                let mut cursors = self.cursors.lock().unwrap();
                let key = (stream.to_string(), group.to_string());
                let cursor = cursors.entry(key.clone()).or_insert(0);
                if let Some(s) = streams.get(stream) {
                    if *cursor < s.entries.len() {
                        let upto = (*cursor + count).min(s.entries.len());
                        let out = s.entries[*cursor..upto]
                            .iter()
                            .map(|(id, payload)| StreamRecord {
                                id: id.clone(),
                                payload: payload.clone(),
                            })
                            .collect();
                        *cursor = upto;
                        return Ok(out);
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout_at(deadline, self.notify.notified()).await;
        }
    }

    async fn ack(&self, _stream: &str, _group: &str, _id: &str) -> Result<(), BusError> {
        Ok(())
    }
}

// ── Wire records & consumer-boundary validation ─────────────────────

/// Envelope around a decoded pending swap on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingIntentEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub intent: PendingSwapIntent,
    pub published_at: u64,
}

impl PendingIntentEnvelope {
    pub fn new(intent: PendingSwapIntent, published_at: u64) -> Self {
        Self {
            kind: "pending".to_string(),
            intent,
            published_at,
        }
    }
}

/// Parse and validate a price-update record. Invalid prices are dropped
/// here, before the store sees them.
pub fn parse_price_update(payload: &str) -> Option<PriceUpdate> {
    let update: PriceUpdate = match serde_json::from_str(payload) {
        Ok(u) => u,
        Err(e) => {
            debug!(error = %e, "malformed price-update record");
            return None;
        }
    };
    if !update.has_valid_price() {
        debug!(pair = %update.pair_key, price = update.price, "price-update rejected at ingress");
        return None;
    }
    Some(update)
}

/// Parse and validate a pending-intent record per the wire rules:
/// `type == "pending"`, non-empty hash/router/sender, positive chain id
/// and deadline, non-negative slippage, and a path of at least two hops.
pub fn parse_pending_intent(payload: &str) -> Option<PendingSwapIntent> {
    let envelope: PendingIntentEnvelope = match serde_json::from_str(payload) {
        Ok(e) => e,
        Err(e) => {
            debug!(error = %e, "malformed pending-intent record");
            return None;
        }
    };
    if envelope.kind != "pending" {
        debug!(kind = %envelope.kind, "pending-intent record with wrong type");
        return None;
    }
    let intent = envelope.intent;
    if intent.hash.is_empty() || intent.router.is_empty() || intent.sender.is_empty() {
        debug!("pending-intent record with empty identity fields");
        return None;
    }
    if intent.chain_id == 0 || intent.deadline == 0 {
        debug!(hash = %intent.hash, "pending-intent record with zero chainId/deadline");
        return None;
    }
    if !intent.slippage_tolerance.is_finite() || intent.slippage_tolerance < 0.0 {
        debug!(hash = %intent.hash, "pending-intent record with bad slippage");
        return None;
    }
    if intent.path.len() < 2 {
        debug!(hash = %intent.hash, "pending-intent record with short path");
        return None;
    }
    Some(intent)
}

/// Parse a whale-transaction record.
pub fn parse_whale_transaction(payload: &str) -> Option<WhaleTransaction> {
    match serde_json::from_str::<WhaleTransaction>(payload) {
        Ok(tx) => Some(tx),
        Err(e) => {
            debug!(error = %e, "malformed whale-transaction record");
            None
        }
    }
}
