//! Bit-exact bus subject naming:
//! `<data_type>.<exchange_id>.<market_type>.<symbol>`, underscores inside
//! `data_type`, no hyphenated legacy forms (`funding-rate`) and no
//! `-data.` suffix.

use marketline_data::model::CanonicalRecord;

/// Delivery mode per data type: durable vs best-effort, and which logical
//  stream the subject belongs to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DeliveryMode {
    /// JetStream-equivalent durable publish, routed to `MARKET_DATA`.
    Durable,
    /// High-rate, replayable-by-cadence best-effort publish, routed to
    /// `ORDERBOOK_SNAP`.
    BestEffort,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LogicalStream {
    MarketData,
    OrderbookSnap,
}

/// Build the canonical subject for one record, plus the delivery mode and
/// logical stream it must be published through.
pub fn subject_for(record: &CanonicalRecord) -> String {
    format!(
        "{}.{}.{}.{}",
        record.data_type(),
        record.exchange_id().as_str(),
        record.market_type().as_str(),
        record.symbol()
    )
}

/// Delivery mode is data-type specific, and for order books additionally
/// depends on whether the record is a delta update (durable) or a
/// snapshot-polling emission (best-effort).
pub fn delivery_mode_for(record: &CanonicalRecord) -> DeliveryMode {
    match record {
        CanonicalRecord::OrderbookSnapshot(_) => DeliveryMode::BestEffort,
        CanonicalRecord::OrderbookUpdate(update) => match update.update_type {
            marketline_data::model::UpdateType::Snapshot => DeliveryMode::BestEffort,
            marketline_data::model::UpdateType::Delta => DeliveryMode::Durable,
        },
        _ => DeliveryMode::Durable,
    }
}

pub fn logical_stream_for(mode: DeliveryMode) -> LogicalStream {
    match mode {
        DeliveryMode::Durable => LogicalStream::MarketData,
        DeliveryMode::BestEffort => LogicalStream::OrderbookSnap,
    }
}

impl LogicalStream {
    pub fn name(&self) -> &'static str {
        match self {
            LogicalStream::MarketData => "MARKET_DATA",
            LogicalStream::OrderbookSnap => "ORDERBOOK_SNAP",
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

    fn trade() -> Trade {
        Trade {
            exchange_id: ExchangeId::BinanceSpot,
            market_type: MarketType::Spot,
            symbol: Symbol::new("BTC", "USDT"),
            trade_id: "12345".into(),
            price: dec!(45000.50),
            quantity: dec!(0.1),
            quote_quantity: dec!(4500.05),
            side: marketline_data::model::Side::Buy,
            is_buyer_maker: false,
            event_ts: Utc::now(),
            collected_at: Utc::now(),
        }
    }

    #[test]
    fn binance_trade_subject_matches_bit_exact_scheme() {
        let record = CanonicalRecord::from(trade());
        assert_eq!(subject_for(&record), "trade.binance_spot.spot.BTC-USDT");
        assert_eq!(delivery_mode_for(&record), DeliveryMode::Durable);
    }

    #[test]
    fn subject_never_contains_hyphen_in_data_type_segment() {
        let record = CanonicalRecord::from(trade());
        let subject = subject_for(&record);
        let data_type_segment = subject.split('.').next().unwrap();
        assert!(!data_type_segment.contains('-'));
    }
}
