//! In-memory batch accumulator (spec §4.7): one per table, flushed on
//! `batch_size` rows or `batch_timeout` age, whichever comes first.
//! Messages are only acked by [`crate::consumer`] after the batch they
//! belong to has been durably written.

use crate::table::BatchConfig;
use async_trait::async_trait;
use marketline_data::model::CanonicalRecord;
use tokio::time::Instant;

/// One pulled message's ack handle, abstracted so the batcher and its
/// tests don't depend on a concrete bus client.
#[async_trait]
pub trait Ackable: Send + Sync {
    async fn ack(&self);
}

pub struct PendingRow {
    pub record: CanonicalRecord,
    pub ack: Box<dyn Ackable>,
}

/// Accumulates rows for one table between flushes.
pub struct Batch {
    rows: Vec<PendingRow>,
    opened_at: Instant,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            opened_at: Instant::now(),
        }
    }

    pub fn push(&mut self, record: CanonicalRecord, ack: Box<dyn Ackable>) {
        self.rows.push(PendingRow { record, ack });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn should_flush(&self, config: BatchConfig) -> bool {
        if self.rows.is_empty() {
            return false;
        }
        self.rows.len() >= config.batch_size || self.opened_at.elapsed() >= config.batch_timeout
    }

    /// Drain the batch for a write attempt, resetting the age clock. The
    /// caller is responsible for acking every row only after the write
    /// succeeds - on failure, the caller must not have dropped the rows,
    /// so `take` is only called once the write is about to happen.
    pub fn take(&mut self) -> Vec<PendingRow> {
        self.opened_at = Instant::now();
        std::mem::take(&mut self.rows)
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketline_data::model::{Liquidation, Side};
    use marketline_instrument::{ExchangeId, MarketType, Symbol};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct NoopAck;

    #[async_trait]
    impl Ackable for NoopAck {
        async fn ack(&self) {}
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
    fn flushes_on_batch_size() {
        let mut batch = Batch::new();
        let config = BatchConfig {
            batch_size: 2,
            batch_timeout: Duration::from_secs(60),
        };
        assert!(!batch.should_flush(config));
        batch.push(liquidation(), Box::new(NoopAck));
        assert!(!batch.should_flush(config));
        batch.push(liquidation(), Box::new(NoopAck));
        assert!(batch.should_flush(config));

        let drained = batch.take();
        assert_eq!(drained.len(), 2);
        assert!(batch.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_on_timeout_even_below_batch_size() {
        let mut batch = Batch::new();
        let config = BatchConfig {
            batch_size: 500,
            batch_timeout: Duration::from_millis(100),
        };
        batch.push(liquidation(), Box::new(NoopAck));
        assert!(!batch.should_flush(config));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(batch.should_flush(config));
    }
}
