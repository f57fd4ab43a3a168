//! Storage Consumer (C7): one pull-loop per (stream, subject-filter),
//! batching into [`crate::batch::Batch`] and writing through
//! [`crate::client::StoreClient`]. Acks only follow a successful write;
//! an insert failure leaves the batch's messages unacked so the bus
//! redelivers them (up to the consumer's `max_deliver`).

use crate::batch::{Ackable, Batch};
use crate::client::StoreClient;
use crate::error::StoreError;
use crate::table::{BatchConfig, Table, default_batch_config};
use async_trait::async_trait;
use futures::StreamExt;
use marketline_data::model::CanonicalRecord;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// One pulled message, abstracted away from the concrete bus client so the
/// batching/flush logic can be exercised without a live NATS server.
#[async_trait]
pub trait PullSource: Send + Sync {
    /// Wait up to `timeout` for the next message. `None` means the wait
    /// elapsed with nothing delivered - the caller should consider
    /// flushing whatever is already batched.
    async fn next(&mut self, timeout: Duration) -> Result<Option<(CanonicalRecord, Box<dyn Ackable>)>, StoreError>;
}

struct NatsAck(async_nats::jetstream::Message);

#[async_trait]
impl Ackable for NatsAck {
    async fn ack(&self) {
        if let Err(error) = self.0.ack().await {
            warn!(%error, "failed to ack message after successful write");
        }
    }
}

/// [`PullSource`] backed by a live `async-nats` JetStream pull consumer.
pub struct NatsPullSource {
    consumer: async_nats::jetstream::consumer::PullConsumer,
}

impl NatsPullSource {
    pub fn new(consumer: async_nats::jetstream::consumer::PullConsumer) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl PullSource for NatsPullSource {
    async fn next(&mut self, timeout: Duration) -> Result<Option<(CanonicalRecord, Box<dyn Ackable>)>, StoreError> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(1)
            .expires(timeout)
            .messages()
            .await
            .map_err(|error| StoreError::Pull {
                stream: "unknown".to_string(),
                source: marketline_bus::BusError::Fetch(error.to_string()),
            })?;

        let Some(message) = messages.next().await else {
            return Ok(None);
        };
        let message = message.map_err(|error| StoreError::Pull {
            stream: "unknown".to_string(),
            source: marketline_bus::BusError::Fetch(error.to_string()),
        })?;

        let record: CanonicalRecord = serde_json::from_slice(&message.payload).map_err(|error| StoreError::Insert(format!(
            "malformed payload on subject {}: {error}",
            message.subject
        )))?;

        Ok(Some((record, Box::new(NatsAck(message)))))
    }
}

async fn flush_once<C: StoreClient>(table: Table, batch: &mut Batch, store: &Arc<C>) {
    if batch.is_empty() {
        return;
    }
    let pending = batch.take();
    let rows: Vec<(CanonicalRecord, String)> = pending
        .iter()
        .map(|row| (row.record.clone(), marketline_bus::dedup_id_for(&row.record).unwrap_or_default()))
        .collect();

    match store.insert_batch(table, &rows).await {
        Ok(()) => {
            for row in pending {
                row.ack.ack().await;
            }
        }
        Err(error) => {
            error!(table = table.name(), %error, rows = rows.len(), "batch insert failed, leaving unacked for redelivery");
        }
    }
}

/// Run one table's pull-loop until `shutdown` fires. On shutdown, drains
/// and flushes whatever is already batched before returning - this is the
/// per-table half of `stop(grace)` (spec §4.8); the caller is responsible
/// for bounding how long it waits on this future by `grace`.
pub async fn run_table_consumer<C, S>(
    table: Table,
    config: BatchConfig,
    mut source: S,
    store: Arc<C>,
    shutdown: Arc<Notify>,
) where
    C: StoreClient,
    S: PullSource,
{
    let mut batch = Batch::new();
    info!(table = table.name(), ?config, "storage consumer starting");

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!(table = table.name(), "storage consumer stopping, flushing in-flight batch");
                flush_once(table, &mut batch, &store).await;
                return;
            }
            pulled = source.next(config.batch_timeout) => {
                match pulled {
                    Ok(Some((record, ack))) => {
                        batch.push(record, ack);
                        if batch.should_flush(config) {
                            flush_once(table, &mut batch, &store).await;
                        }
                    }
                    Ok(None) => {
                        if batch.should_flush(config) {
                            flush_once(table, &mut batch, &store).await;
                        }
                    }
                    Err(error) => {
                        warn!(table = table.name(), %error, "pull failed, backing off");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        }
    }
}

/// Supervises one `run_table_consumer` task per table (spec §5: "the
/// Storage Consumer runs one pull-loop per (stream, subject-filter) plus
/// one batch-writer task per table" - here the two are the same task,
/// since each table owns exactly one subject-filter).
pub struct StorageConsumer {
    shutdown: Arc<Notify>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl StorageConsumer {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(Notify::new()),
            tasks: Vec::new(),
        }
    }

    /// Spawn one pull-loop per table using `make_source` to build each
    /// table's [`PullSource`] (so the caller controls how consumers are
    /// bound to streams/subject-filters via [`marketline_bus::BusBindings`]).
    pub fn start<C, S, F>(&mut self, store: Arc<C>, mut make_source: F)
    where
        C: StoreClient + 'static,
        S: PullSource + 'static,
        F: FnMut(Table) -> S,
    {
        for table in Table::ALL {
            let source = make_source(table);
            let config = default_batch_config(table);
            let store = store.clone();
            let shutdown = self.shutdown.clone();
            self.tasks.push(tokio::spawn(run_table_consumer(table, config, source, store, shutdown)));
        }
    }

    /// Signal every table's pull-loop to flush and stop, waiting up to
    /// `grace` for all of them to finish.
    pub async fn stop(&mut self, grace: Duration) {
        self.shutdown.notify_waiters();
        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);
        for task in self.tasks.drain(..) {
            tokio::select! {
                _ = task => {}
                _ = &mut deadline => {
                    warn!("storage consumer shutdown grace period elapsed with tasks still running");
                    return;
                }
            }
        }
    }
}

impl Default for StorageConsumer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StoreConfig;
    use chrono::Utc;
    use marketline_data::model::{Liquidation, Side};
    use marketline_instrument::{ExchangeId, MarketType, Symbol};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::collections::VecDeque;

    struct CountingAck(Arc<AtomicU64>);

    #[async_trait]
    impl Ackable for CountingAck {
        async fn ack(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct FixedSource {
        queue: StdMutex<VecDeque<CanonicalRecord>>,
        acked: Arc<AtomicU64>,
    }

    #[async_trait]
    impl PullSource for FixedSource {
        async fn next(&mut self, _timeout: Duration) -> Result<Option<(CanonicalRecord, Box<dyn Ackable>)>, StoreError> {
            let mut queue = self.queue.lock().unwrap();
            Ok(queue.pop_front().map(|record| {
                let ack: Box<dyn Ackable> = Box::new(CountingAck(self.acked.clone()));
                (record, ack)
            }))
        }
    }

    struct RecordingStore {
        inserted: AtomicU64,
        fail: bool,
    }

    #[async_trait]
    impl StoreClient for RecordingStore {
        async fn insert_batch(&self, _table: Table, rows: &[(CanonicalRecord, String)]) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Insert("simulated".into()));
            }
            self.inserted.fetch_add(rows.len() as u64, Ordering::Relaxed);
            Ok(())
        }

        async fn health(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn liquidation() -> CanonicalRecord {
        CanonicalRecord::from(Liquidation {
            exchange_id: ExchangeId::BinanceDerivatives,
            market_type: MarketType::Perpetual,
            symbol: Symbol::new("BTC", "USDT"),
            side: Side::Sell,
            price: dec!(1),
            quantity: dec!(1),
            value: dec!(1),
            event_ts: Utc::now(),
            collected_at: Utc::now(),
        })
    }

    #[test]
    fn store_config_defaults_match_spec_ports() {
        let config = StoreConfig::default();
        assert_eq!(config.native_port, 9000);
        assert_eq!(config.http_port, 8123);
    }

    #[tokio::test]
    async fn successful_write_acks_every_pulled_message() {
        let acked = Arc::new(AtomicU64::new(0));
        let mut queue = VecDeque::new();
        queue.push_back(liquidation());
        queue.push_back(liquidation());
        let source = FixedSource {
            queue: StdMutex::new(queue),
            acked: acked.clone(),
        };
        let store = Arc::new(RecordingStore {
            inserted: AtomicU64::new(0),
            fail: false,
        });
        let config = BatchConfig {
            batch_size: 2,
            batch_timeout: Duration::from_millis(50),
        };

        let mut batch = Batch::new();
        for _ in 0..2 {
            let mut s = source.queue.lock().unwrap();
            let record = s.pop_front().unwrap();
            drop(s);
            batch.push(record, Box::new(CountingAck(acked.clone())));
        }
        assert!(batch.should_flush(config));
        flush_once(Table::Liquidations, &mut batch, &store).await;

        assert_eq!(store.inserted.load(Ordering::Relaxed), 2);
        assert_eq!(acked.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn failed_write_does_not_ack() {
        let acked = Arc::new(AtomicU64::new(0));
        let store = Arc::new(RecordingStore {
            inserted: AtomicU64::new(0),
            fail: true,
        });
        let mut batch = Batch::new();
        batch.push(liquidation(), Box::new(CountingAck(acked.clone())));

        flush_once(Table::Liquidations, &mut batch, &store).await;

        assert_eq!(acked.load(Ordering::Relaxed), 0);
    }
}
