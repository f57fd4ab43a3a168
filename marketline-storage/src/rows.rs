//! Wire row types for the columnar store: one per table, mirroring the
//! matching [`CanonicalRecord`] variant's fields plus a `dedup_key` column
//! (spec §4.7's per-table dedup keys, built by [`marketline_bus::dedup_id_for`])
//! that the store's `ReplacingMergeTree`-equivalent engine collapses on.
//! Decimals travel as strings, as they do over the bus, to avoid lossy
//! float round-tripping through the wire format.

use chrono::{DateTime, Utc};
use clickhouse::Row;
use marketline_data::model::{
    CanonicalRecord, FundingRate, Liquidation, LsrAllAccount, LsrTopPosition, OpenInterest, OrderBookSnapshot,
    OrderBookUpdate, Trade, UpdateType, VolatilityIndex,
};
use serde::Serialize;

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

#[derive(Debug, Clone, Serialize, Row)]
pub struct TradeRow {
    pub dedup_key: String,
    pub exchange_id: String,
    pub market_type: String,
    pub symbol: String,
    pub trade_id: String,
    pub price: String,
    pub quantity: String,
    pub quote_quantity: String,
    pub side: String,
    pub is_buyer_maker: bool,
    pub event_ts: i64,
    pub collected_at: i64,
}

impl TradeRow {
    pub fn from_trade(trade: &Trade, dedup_key: String) -> Self {
        Self {
            dedup_key,
            exchange_id: trade.exchange_id.as_str().to_string(),
            market_type: trade.market_type.as_str().to_string(),
            symbol: trade.symbol.to_string(),
            trade_id: trade.trade_id.clone(),
            price: trade.price.to_string(),
            quantity: trade.quantity.to_string(),
            quote_quantity: trade.quote_quantity.to_string(),
            side: trade.side.to_string(),
            is_buyer_maker: trade.is_buyer_maker,
            event_ts: millis(trade.event_ts),
            collected_at: millis(trade.collected_at),
        }
    }
}

/// Covers both `OrderbookSnapshot` and `OrderbookUpdate`; `kind`
/// distinguishes them and `last_update_id`/`prev_last_update_id` are
/// `0` for snapshot rows (snapshots don't carry a previous-id invariant).
#[derive(Debug, Clone, Serialize, Row)]
pub struct OrderbookRow {
    pub dedup_key: String,
    pub exchange_id: String,
    pub market_type: String,
    pub symbol: String,
    pub kind: String,
    pub bids_or_changes_json: String,
    pub asks_or_changes_json: String,
    pub first_update_id: u64,
    pub last_update_id: u64,
    pub prev_last_update_id: u64,
    pub event_ts: i64,
    pub collected_at: i64,
}

impl OrderbookRow {
    pub fn from_snapshot(snapshot: &OrderBookSnapshot, dedup_key: String) -> Self {
        Self {
            dedup_key,
            exchange_id: snapshot.exchange_id.as_str().to_string(),
            market_type: snapshot.market_type.as_str().to_string(),
            symbol: snapshot.symbol.to_string(),
            kind: "snapshot".to_string(),
            bids_or_changes_json: serde_json::to_string(&snapshot.bids).unwrap_or_default(),
            asks_or_changes_json: serde_json::to_string(&snapshot.asks).unwrap_or_default(),
            first_update_id: snapshot.last_update_id,
            last_update_id: snapshot.last_update_id,
            prev_last_update_id: 0,
            event_ts: millis(snapshot.event_ts),
            collected_at: millis(snapshot.collected_at),
        }
    }

    pub fn from_update(update: &OrderBookUpdate, dedup_key: String) -> Self {
        Self {
            dedup_key,
            exchange_id: update.exchange_id.as_str().to_string(),
            market_type: update.market_type.as_str().to_string(),
            symbol: update.symbol.to_string(),
            kind: match update.update_type {
                UpdateType::Delta => "delta".to_string(),
                UpdateType::Snapshot => "snapshot".to_string(),
            },
            bids_or_changes_json: serde_json::to_string(&update.bid_changes).unwrap_or_default(),
            asks_or_changes_json: serde_json::to_string(&update.ask_changes).unwrap_or_default(),
            first_update_id: update.first_update_id,
            last_update_id: update.last_update_id,
            prev_last_update_id: update.prev_last_update_id,
            event_ts: millis(update.event_ts),
            collected_at: millis(update.collected_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Row)]
pub struct FundingRateRow {
    pub dedup_key: String,
    pub exchange_id: String,
    pub market_type: String,
    pub symbol: String,
    pub funding_rate: String,
    pub next_funding_time: i64,
    pub mark_price: String,
    pub index_price: String,
    pub funding_interval_secs: i64,
    pub event_ts: i64,
    pub collected_at: i64,
}

impl FundingRateRow {
    pub fn from_record(r: &FundingRate, dedup_key: String) -> Self {
        Self {
            dedup_key,
            exchange_id: r.exchange_id.as_str().to_string(),
            market_type: r.market_type.as_str().to_string(),
            symbol: r.symbol.to_string(),
            funding_rate: r.funding_rate.to_string(),
            next_funding_time: millis(r.next_funding_time),
            mark_price: r.mark_price.to_string(),
            index_price: r.index_price.to_string(),
            funding_interval_secs: r.funding_interval.num_seconds(),
            event_ts: millis(r.event_ts),
            collected_at: millis(r.collected_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Row)]
pub struct OpenInterestRow {
    pub dedup_key: String,
    pub exchange_id: String,
    pub market_type: String,
    pub symbol: String,
    pub open_interest: String,
    pub open_interest_value: String,
    pub event_ts: i64,
    pub collected_at: i64,
}

impl OpenInterestRow {
    pub fn from_record(r: &OpenInterest, dedup_key: String) -> Self {
        Self {
            dedup_key,
            exchange_id: r.exchange_id.as_str().to_string(),
            market_type: r.market_type.as_str().to_string(),
            symbol: r.symbol.to_string(),
            open_interest: r.open_interest.to_string(),
            open_interest_value: r.open_interest_value.to_string(),
            event_ts: millis(r.event_ts),
            collected_at: millis(r.collected_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Row)]
pub struct LiquidationRow {
    pub dedup_key: String,
    pub exchange_id: String,
    pub market_type: String,
    pub symbol: String,
    pub side: String,
    pub price: String,
    pub quantity: String,
    pub value: String,
    pub event_ts: i64,
    pub collected_at: i64,
}

impl LiquidationRow {
    pub fn from_record(r: &Liquidation, dedup_key: String) -> Self {
        Self {
            dedup_key,
            exchange_id: r.exchange_id.as_str().to_string(),
            market_type: r.market_type.as_str().to_string(),
            symbol: r.symbol.to_string(),
            side: r.side.to_string(),
            price: r.price.to_string(),
            quantity: r.quantity.to_string(),
            value: r.value.to_string(),
            event_ts: millis(r.event_ts),
            collected_at: millis(r.collected_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Row)]
pub struct LsrRow {
    pub dedup_key: String,
    pub exchange_id: String,
    pub market_type: String,
    pub symbol: String,
    pub long_ratio: String,
    pub short_ratio: String,
    pub long_short_ratio: String,
    pub event_ts: i64,
    pub collected_at: i64,
}

impl LsrRow {
    pub fn from_top_position(r: &LsrTopPosition, dedup_key: String) -> Self {
        Self {
            dedup_key,
            exchange_id: r.exchange_id.as_str().to_string(),
            market_type: r.market_type.as_str().to_string(),
            symbol: r.symbol.to_string(),
            long_ratio: r.long_ratio.to_string(),
            short_ratio: r.short_ratio.to_string(),
            long_short_ratio: r.long_short_ratio.to_string(),
            event_ts: millis(r.event_ts),
            collected_at: millis(r.collected_at),
        }
    }

    pub fn from_all_account(r: &LsrAllAccount, dedup_key: String) -> Self {
        Self {
            dedup_key,
            exchange_id: r.exchange_id.as_str().to_string(),
            market_type: r.market_type.as_str().to_string(),
            symbol: r.symbol.to_string(),
            long_ratio: r.long_ratio.to_string(),
            short_ratio: r.short_ratio.to_string(),
            long_short_ratio: r.long_short_ratio.to_string(),
            event_ts: millis(r.event_ts),
            collected_at: millis(r.collected_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Row)]
pub struct VolatilityIndexRow {
    pub dedup_key: String,
    pub exchange_id: String,
    pub market_type: String,
    pub symbol: String,
    pub index_value: String,
    pub event_ts: i64,
    pub collected_at: i64,
}

impl VolatilityIndexRow {
    pub fn from_record(r: &VolatilityIndex, dedup_key: String) -> Self {
        Self {
            dedup_key,
            exchange_id: r.exchange_id.as_str().to_string(),
            market_type: r.market_type.as_str().to_string(),
            symbol: r.symbol.to_string(),
            index_value: r.index_value.to_string(),
            event_ts: millis(r.event_ts),
            collected_at: millis(r.collected_at),
        }
    }
}

/// Dispatch a canonical record to its row type, serialized to a JSON line
/// (`JSONEachRow`) for the write path. Both the native-protocol insert and
/// the HTTP fallback insert share this encoding.
pub fn to_json_line(record: &CanonicalRecord, dedup_key: String) -> serde_json::Result<String> {
    let value = match record {
        CanonicalRecord::Trade(r) => serde_json::to_value(TradeRow::from_trade(r, dedup_key))?,
        CanonicalRecord::OrderbookSnapshot(r) => serde_json::to_value(OrderbookRow::from_snapshot(r, dedup_key))?,
        CanonicalRecord::OrderbookUpdate(r) => serde_json::to_value(OrderbookRow::from_update(r, dedup_key))?,
        CanonicalRecord::FundingRate(r) => serde_json::to_value(FundingRateRow::from_record(r, dedup_key))?,
        CanonicalRecord::OpenInterest(r) => serde_json::to_value(OpenInterestRow::from_record(r, dedup_key))?,
        CanonicalRecord::Liquidation(r) => serde_json::to_value(LiquidationRow::from_record(r, dedup_key))?,
        CanonicalRecord::LsrTopPosition(r) => serde_json::to_value(LsrRow::from_top_position(r, dedup_key))?,
        CanonicalRecord::LsrAllAccount(r) => serde_json::to_value(LsrRow::from_all_account(r, dedup_key))?,
        CanonicalRecord::VolatilityIndex(r) => serde_json::to_value(VolatilityIndexRow::from_record(r, dedup_key))?,
    };
    serde_json::to_string(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketline_instrument::{ExchangeId, MarketType, Symbol};
    use rust_decimal_macros::dec;

    #[test]
    fn trade_row_carries_decimals_as_strings() {
        let trade = Trade {
            exchange_id: ExchangeId::BinanceSpot,
            market_type: MarketType::Spot,
            symbol: Symbol::new("BTC", "USDT"),
            trade_id: "1".into(),
            price: dec!(45000.5),
            quantity: dec!(0.25),
            quote_quantity: dec!(11250.125),
            side: marketline_data::model::Side::Buy,
            is_buyer_maker: false,
            event_ts: Utc::now(),
            collected_at: Utc::now(),
        };
        let row = TradeRow::from_trade(&trade, "k".into());
        assert_eq!(row.price, "45000.5");
        assert_eq!(row.quantity, "0.25");
    }
}
