//! Publisher (C5): maps canonical records to bus subjects and publishes
//! them with per-type delivery mode, applying the backpressure contract of
//! [`crate::queue`].
//!
//! One [`Publisher`] worker drains one session's [`OutboundQueue`]; the
//! pool of workers described in spec §5 is just one of these per session,
//! spawned by the caller (the control plane).

use crate::dedup::dedup_id_for;
use crate::error::BusError;
use crate::queue::OutboundQueue;
use crate::subject::{delivery_mode_for, subject_for, DeliveryMode};
use async_trait::async_trait;
use marketline_data::model::CanonicalRecord;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, warn};

/// Bus publish operations the Publisher needs, independent of the concrete
/// client (NATS JetStream vs a test double). Durable publishes carry a
/// client-supplied dedup id for the bus's server-side dedup window (spec
/// §4.6); best-effort publishes do not wait for an ack.
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn publish_durable(&self, subject: &str, payload: Vec<u8>, dedup_id: &str) -> Result<(), BusError>;

    async fn publish_best_effort(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(100);
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(5);
const MAX_PUBLISH_RETRIES: u32 = 5;

#[derive(Debug, Default)]
pub struct PublisherMetrics {
    pub published: AtomicU64,
    pub dropped_permanent: AtomicU64,
    pub retried: AtomicU64,
}

/// Drains one session's [`OutboundQueue`] in FIFO order, publishing every
/// record through `client` with its type's delivery mode.
pub struct Publisher<C> {
    client: Arc<C>,
    queue: Arc<OutboundQueue>,
    metrics: Arc<PublisherMetrics>,
}

impl<C> Publisher<C>
where
    C: BusClient,
{
    pub fn new(client: Arc<C>, queue: Arc<OutboundQueue>) -> Self {
        Self {
            client,
            queue,
            metrics: Arc::new(PublisherMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<PublisherMetrics> {
        self.metrics.clone()
    }

    /// Run the drain loop forever (or until the queue's owner stops feeding
    /// it and the process shuts the worker task down externally).
    pub async fn run(&self) {
        loop {
            let record = self.queue.dequeue().await;
            self.publish_one(record).await;
        }
    }

    async fn publish_one(&self, record: CanonicalRecord) {
        let subject = subject_for(&record);
        let payload = match serde_json::to_vec(&record) {
            Ok(payload) => payload,
            Err(error) => {
                error!(%error, "failed to encode canonical record, dropping");
                self.metrics.dropped_permanent.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if payload.len() > MAX_PAYLOAD_BYTES {
            warn!(subject, size = payload.len(), "payload exceeds max bus payload size, dropping");
            self.metrics.dropped_permanent.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mode = delivery_mode_for(&record);
        let mut attempt = 0;
        loop {
            let result = match mode {
                DeliveryMode::Durable => {
                    let dedup_id = dedup_id_for(&record).unwrap_or_else(|| subject.clone());
                    self.client.publish_durable(&subject, payload.clone(), &dedup_id).await
                }
                DeliveryMode::BestEffort => self.client.publish_best_effort(&subject, payload.clone()).await,
            };

            match result {
                Ok(()) => {
                    self.metrics.published.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(error) if error.is_permanent_drop() => {
                    warn!(subject, %error, "permanent publish failure, dropping record");
                    self.metrics.dropped_permanent.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(error) => {
                    attempt += 1;
                    if attempt > MAX_PUBLISH_RETRIES {
                        error!(subject, %error, attempt, "exhausted publish retries, dropping record");
                        self.metrics.dropped_permanent.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    self.metrics.retried.fetch_add(1, Ordering::Relaxed);
                    let backoff = std::cmp::min(RETRY_BACKOFF_BASE * 2u32.pow(attempt.min(6)), RETRY_BACKOFF_MAX);
                    warn!(subject, %error, attempt, ?backoff, "transient publish failure, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketline_data::model::Trade;
    use marketline_instrument::{ExchangeId, MarketType, Symbol};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct RecordingClient {
        durable: Mutex<Vec<String>>,
        fail_first: AtomicU64,
    }

    #[async_trait]
    impl BusClient for RecordingClient {
        async fn publish_durable(&self, subject: &str, _payload: Vec<u8>, _dedup_id: &str) -> Result<(), BusError> {
            if self.fail_first.fetch_sub(1, Ordering::Relaxed) > 0 {
                return Err(BusError::ConnectionLost("simulated".into()));
            }
            self.durable.lock().unwrap().push(subject.to_string());
            Ok(())
        }

        async fn publish_best_effort(&self, subject: &str, _payload: Vec<u8>) -> Result<(), BusError> {
            self.durable.lock().unwrap().push(subject.to_string());
            Ok(())
        }
    }

    fn trade() -> CanonicalRecord {
        CanonicalRecord::from(Trade {
            exchange_id: ExchangeId::BinanceSpot,
            market_type: MarketType::Spot,
            symbol: Symbol::new("BTC", "USDT"),
            trade_id: "1".into(),
            price: dec!(1),
            quantity: dec!(1),
            quote_quantity: dec!(1),
            side: marketline_data::model::Side::Buy,
            is_buyer_maker: false,
            event_ts: Utc::now(),
            collected_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn publishes_and_drains_queue() {
        let client = Arc::new(RecordingClient {
            durable: Mutex::new(vec![]),
            fail_first: AtomicU64::new(0),
        });
        let queue = Arc::new(OutboundQueue::new(10));
        queue.enqueue(trade()).await;

        let publisher = Publisher::new(client.clone(), queue);
        publisher.publish_one(publisher.queue.dequeue().await).await;

        assert_eq!(client.durable.lock().unwrap().len(), 1);
        assert_eq!(publisher.metrics().published.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_succeeds() {
        let client = Arc::new(RecordingClient {
            durable: Mutex::new(vec![]),
            fail_first: AtomicU64::new(2),
        });
        let queue = Arc::new(OutboundQueue::new(10));
        let publisher = Publisher::new(client.clone(), queue);

        publisher.publish_one(trade()).await;

        assert_eq!(client.durable.lock().unwrap().len(), 1);
        assert_eq!(publisher.metrics().retried.load(Ordering::Relaxed), 2);
    }
}
