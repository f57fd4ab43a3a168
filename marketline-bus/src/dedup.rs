//! Client-supplied dedup ids (spec §4.6/§4.7/§8 P5): the bus's
//! server-side dedup window and the Storage Consumer's own dedup-at-write
//! both key off the same id, keeping one definition of "what makes two
//! deliveries of the same record the same record" for the whole pipeline.

use marketline_data::model::{CanonicalRecord, UpdateType};

/// Default snapshot-polling cadence used to round `event_ts` for the
/// order-book snapshot dedup key (spec §9 Open Questions: "this is a
/// choice, not a venue-given property"). Matches the default
/// `snapshot_interval_ms` (spec §4.3.1/§4.8).
pub const DEFAULT_SNAPSHOT_POLL_MS: i64 = 1000;

/// Build the dedup id the bus publishes with (`Nats-Msg-Id`) and the
/// Storage Consumer re-derives at write time (spec §4.7's per-table dedup
/// keys). `None` for record kinds that do not require dedup (durable
/// best-effort paths still benefit from one, so this only returns `None`
/// for nothing today - kept as `Option` so a future non-deduped type has
/// somewhere to opt out without changing the signature).
pub fn dedup_id_for(record: &CanonicalRecord) -> Option<String> {
    match record {
        CanonicalRecord::Trade(trade) => Some(format!(
            "trade|{}|{}|{}|{}",
            trade.exchange_id.as_str(),
            trade.market_type.as_str(),
            trade.symbol,
            trade.trade_id
        )),
        CanonicalRecord::OrderbookUpdate(update) if update.update_type == UpdateType::Delta => {
            Some(format!(
                "orderbook_delta|{}|{}|{}|{}",
                update.exchange_id.as_str(),
                update.market_type.as_str(),
                update.symbol,
                update.last_update_id
            ))
        }
        CanonicalRecord::OrderbookUpdate(update) => Some(snapshot_poll_key(
            update.exchange_id.as_str(),
            update.market_type.as_str(),
            &update.symbol.to_string(),
            update.event_ts,
        )),
        CanonicalRecord::OrderbookSnapshot(snapshot) => Some(snapshot_poll_key(
            snapshot.exchange_id.as_str(),
            snapshot.market_type.as_str(),
            &snapshot.symbol.to_string(),
            snapshot.event_ts,
        )),
        other => Some(format!(
            "{}|{}|{}|{}|{}",
            other.data_type(),
            other.exchange_id().as_str(),
            other.market_type().as_str(),
            other.symbol(),
            other.event_ts().timestamp_millis()
        )),
    }
}

fn snapshot_poll_key(exchange_id: &str, market_type: &str, symbol: &str, event_ts: chrono::DateTime<chrono::Utc>) -> String {
    let rounded = (event_ts.timestamp_millis() / DEFAULT_SNAPSHOT_POLL_MS) * DEFAULT_SNAPSHOT_POLL_MS;
    format!("orderbook_snapshot|{exchange_id}|{market_type}|{symbol}|{rounded}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use marketline_data::model::{OrderBookSnapshot, Trade};
    use marketline_instrument::{ExchangeId, MarketType, Symbol};
    use rust_decimal_macros::dec;

    #[test]
    fn trade_dedup_id_is_keyed_by_trade_id() {
        let trade = Trade {
            exchange_id: ExchangeId::BinanceSpot,
            market_type: MarketType::Spot,
            symbol: Symbol::new("BTC", "USDT"),
            trade_id: "12345".into(),
            price: dec!(1),
            quantity: dec!(1),
            quote_quantity: dec!(1),
            side: marketline_data::model::Side::Buy,
            is_buyer_maker: false,
            event_ts: Utc::now(),
            collected_at: Utc::now(),
        };
        let record = CanonicalRecord::from(trade);
        let id = dedup_id_for(&record).unwrap();
        assert!(id.contains("12345"));
        assert_eq!(dedup_id_for(&record), Some(id));
    }

    #[test]
    fn snapshot_dedup_id_rounds_to_polling_interval() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let first = base + chrono::Duration::milliseconds(50);
        let second = base + chrono::Duration::milliseconds(950);

        let snap = |ts| {
            CanonicalRecord::from(OrderBookSnapshot {
                exchange_id: ExchangeId::OkxSpot,
                market_type: MarketType::Spot,
                symbol: Symbol::new("ETH", "USDT"),
                bids: vec![],
                asks: vec![],
                last_update_id: 1,
                event_ts: ts,
                depth_levels: 0,
                collected_at: ts,
            })
        };

        assert_eq!(dedup_id_for(&snap(first)), dedup_id_for(&snap(second)));
    }
}
