//! Per-session bounded outbound queue: a session enters "slow" state once
//! its queue is full. What happens next depends on the data type being
//! enqueued, not the queue itself - trades/liquidations and order-book
//! deltas apply backpressure back to the session's read path (block);
//! order-book snapshot-polling drops the oldest entry instead, since it is
//! high-rate and replayable by the next snapshot tick.

use marketline_data::model::{CanonicalRecord, UpdateType};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::warn;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BackpressurePolicy {
    /// Block the enqueuer (ultimately the session's read loop) until space
    /// frees up. Never drops.
    Block,
    /// Drop the oldest queued record to make room, incrementing a counter.
    DropOldest,
}

/// Trades and liquidations block, order-book deltas block (drop is
/// forbidden for those), order-book snapshot-polling drops oldest. Other
/// durable types are treated as blocking like the rest, since nothing
/// marks them as droppable.
pub fn backpressure_policy_for(record: &CanonicalRecord) -> BackpressurePolicy {
    match record {
        CanonicalRecord::OrderbookSnapshot(_) => BackpressurePolicy::DropOldest,
        CanonicalRecord::OrderbookUpdate(update) if update.update_type == UpdateType::Snapshot => {
            BackpressurePolicy::DropOldest
        }
        _ => BackpressurePolicy::Block,
    }
}

#[derive(Debug, Default)]
pub struct QueueMetrics {
    pub dropped_oldest: AtomicU64,
    pub high_water_slow_transitions: AtomicU64,
}

/// One session's bounded outbound queue. A single [`Publisher`](crate::publisher::Publisher)
/// worker drains it in FIFO order.
pub struct OutboundQueue {
    items: Mutex<VecDeque<CanonicalRecord>>,
    capacity: usize,
    not_full: Notify,
    not_empty: Notify,
    metrics: Arc<QueueMetrics>,
    was_slow: std::sync::atomic::AtomicBool,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            not_full: Notify::new(),
            not_empty: Notify::new(),
            metrics: Arc::new(QueueMetrics::default()),
            was_slow: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn metrics(&self) -> Arc<QueueMetrics> {
        self.metrics.clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_slow(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Enqueue one record, applying its type's backpressure policy. Returns
    /// once the record is either queued or (for [`BackpressurePolicy::DropOldest`])
    /// has displaced the oldest entry.
    pub async fn enqueue(&self, record: CanonicalRecord) {
        let policy = backpressure_policy_for(&record);
        match policy {
            BackpressurePolicy::DropOldest => {
                let mut items = self.items.lock();
                if items.len() >= self.capacity {
                    items.pop_front();
                    self.metrics.dropped_oldest.fetch_add(1, Ordering::Relaxed);
                }
                items.push_back(record);
                drop(items);
                self.not_empty.notify_one();
            }
            BackpressurePolicy::Block => {
                loop {
                    {
                        let mut items = self.items.lock();
                        if items.len() < self.capacity {
                            items.push_back(record);
                            drop(items);
                            self.not_empty.notify_one();
                            return;
                        }
                        if !self.was_slow.swap(true, Ordering::Relaxed) {
                            self.metrics
                                .high_water_slow_transitions
                                .fetch_add(1, Ordering::Relaxed);
                            warn!("outbound queue full, session entering slow state, applying backpressure");
                        }
                    }
                    self.not_full.notified().await;
                }
            }
        }
    }

    /// Pop the next record in FIFO order, waiting if the queue is empty.
    pub async fn dequeue(&self) -> CanonicalRecord {
        loop {
            {
                let mut items = self.items.lock();
                if let Some(item) = items.pop_front() {
                    drop(items);
                    self.was_slow.store(false, Ordering::Relaxed);
                    self.not_full.notify_one();
                    return item;
                }
            }
            self.not_empty.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketline_data::model::{Liquidation, OrderBookSnapshot, Side};
    use marketline_instrument::{ExchangeId, MarketType, Symbol};
    use rust_decimal_macros::dec;

    fn liquidation() -> CanonicalRecord {
        CanonicalRecord::from(Liquidation {
            exchange_id: ExchangeId::BinanceDerivatives,
            market_type: MarketType::Perpetual,
            symbol: Symbol::new("BTC", "USDT"),
            side: Side::Sell,
            price: dec!(45000),
            quantity: dec!(1),
            value: dec!(45000),
            event_ts: Utc::now(),
            collected_at: Utc::now(),
        })
    }

    fn snapshot() -> CanonicalRecord {
        CanonicalRecord::from(OrderBookSnapshot {
            exchange_id: ExchangeId::OkxSpot,
            market_type: MarketType::Spot,
            symbol: Symbol::new("ETH", "USDT"),
            bids: vec![],
            asks: vec![],
            last_update_id: 1,
            event_ts: Utc::now(),
            depth_levels: 0,
            collected_at: Utc::now(),
        })
    }

    #[test]
    fn liquidation_blocks_snapshot_drops_oldest() {
        assert_eq!(backpressure_policy_for(&liquidation()), BackpressurePolicy::Block);
        assert_eq!(backpressure_policy_for(&snapshot()), BackpressurePolicy::DropOldest);
    }

    #[tokio::test]
    async fn drop_oldest_policy_evicts_front_on_overflow() {
        let queue = OutboundQueue::new(2);
        queue.enqueue(snapshot()).await;
        queue.enqueue(snapshot()).await;
        queue.enqueue(snapshot()).await;

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.metrics().dropped_oldest.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = OutboundQueue::new(10);
        queue.enqueue(liquidation()).await;
        queue.enqueue(liquidation()).await;

        let _first = queue.dequeue().await;
        assert_eq!(queue.len(), 1);
    }
}
