//! Deribit derivatives adapter (JSON-RPC subscription channel). Both
//! perpetual and options markets are served from one endpoint; subscriptions
//! are sent as post-connect `public/subscribe` JSON-RPC frames.

use super::{parse_decimal_field, ChannelKind, ChannelSubscription, DepthFrame, ExchangeAdapter, NormalizeError};
use crate::books::InboundDelta;
use crate::error::DataError;
use crate::model::{CanonicalRecord, OrderBookLevel, OrderBookSnapshot, Side, Trade};
use chrono::{DateTime, TimeZone, Utc};
use marketline_instrument::{ExchangeId, MarketType, Symbol};
use marketline_integration::protocol::http::{RestClient, RestRequest};
use marketline_integration::protocol::websocket::{KeepAlivePolicy, WsMessage};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::time::Duration;
use url::Url;

const PUBLIC_WS_URL: &str = "wss://www.deribit.com/ws/api/v2";

/// `BTC-PERPETUAL` is retained only as `MarketType::Perpetual` with
/// `Symbol` `BTC`; any other instrument name (options) is carried unchanged
/// as both base and quote of a synthetic canonical symbol so the shape
/// invariant (`Symbol` is always `BASE-QUOTE`) still holds. Spec §9 flags
/// that options normalization beyond this is unspecified.
pub fn canonicalize_instrument(instrument: &str) -> (MarketType, Symbol) {
    if let Some(base) = instrument.strip_suffix("-PERPETUAL") {
        (MarketType::Perpetual, Symbol::new(base, "PERPETUAL"))
    } else {
        (MarketType::Options, Symbol::new(instrument, "OPT"))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeribitAdapter;

impl DeribitAdapter {
    fn trade_channel(symbol: &Symbol) -> String {
        format!("trades.{}.100ms", Self::instrument_name(symbol))
    }

    fn book_channel(symbol: &Symbol) -> String {
        format!("book.{}.100ms", Self::instrument_name(symbol))
    }

    fn instrument_name(symbol: &Symbol) -> String {
        if symbol.quote() == "PERPETUAL" {
            format!("{}-PERPETUAL", symbol.base())
        } else {
            symbol.base().to_string()
        }
    }
}

impl ExchangeAdapter for DeribitAdapter {
    fn exchange_id(&self) -> ExchangeId {
        ExchangeId::DeribitDerivatives
    }

    fn default_market_type(&self) -> MarketType {
        MarketType::Perpetual
    }

    fn connect_url(&self, _subscriptions: &[ChannelSubscription]) -> Result<Url, url::ParseError> {
        Url::parse(PUBLIC_WS_URL)
    }

    fn subscribe(&self, subscriptions: &[ChannelSubscription]) -> Vec<WsMessage> {
        let channels: Vec<String> = subscriptions
            .iter()
            .map(|sub| match sub.channel {
                ChannelKind::Trade => Self::trade_channel(&sub.symbol),
                ChannelKind::OrderBookL2 => Self::book_channel(&sub.symbol),
                // This venue's liquidations are never subscribed to over the
                // trade/book channel list; ingester wiring sources them from
                // Binance's forceOrder stream instead.
                ChannelKind::Liquidation => Self::trade_channel(&sub.symbol),
            })
            .collect();

        vec![WsMessage::text(
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "public/subscribe",
                "params": {"channels": channels},
            })
            .to_string(),
        )]
    }

    fn parse_frame(
        &self,
        frame: &WsMessage,
        collected_at: DateTime<Utc>,
    ) -> Result<Vec<CanonicalRecord>, NormalizeError> {
        let text = frame
            .to_text()
            .map_err(|error| NormalizeError::MalformedFrame(error.to_string()))?;
        let raw: Value = serde_json::from_str(text)
            .map_err(|error| NormalizeError::MalformedFrame(error.to_string()))?;

        let Some(channel) = raw
            .pointer("/params/channel")
            .and_then(Value::as_str)
        else {
            return Ok(Vec::new());
        };
        if !channel.starts_with("trades.") {
            return Ok(Vec::new());
        }

        let Some(data) = raw.pointer("/params/data").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        data.iter()
            .map(|entry| self.parse_trade(entry, collected_at).map(CanonicalRecord::Trade))
            .collect()
    }

    fn parse_depth_frame(&self, frame: &WsMessage) -> Result<Vec<DepthFrame>, NormalizeError> {
        let Ok(text) = frame.to_text() else {
            return Ok(Vec::new());
        };
        let Ok(raw) = serde_json::from_str::<Value>(text) else {
            return Ok(Vec::new());
        };

        let Some(channel) = raw.pointer("/params/channel").and_then(Value::as_str) else {
            return Ok(Vec::new());
        };
        if !channel.starts_with("book.") {
            return Ok(Vec::new());
        }

        let Some(data) = raw.pointer("/params/data") else {
            return Ok(Vec::new());
        };

        let instrument = data
            .get("instrument_name")
            .and_then(Value::as_str)
            .ok_or_else(|| NormalizeError::MalformedFrame("missing instrument_name".into()))?;
        let (_, symbol) = canonicalize_instrument(instrument);

        let change_id = data
            .get("change_id")
            .and_then(Value::as_u64)
            .ok_or_else(|| NormalizeError::MalformedFrame("missing change_id".into()))?;
        let prev_change_id = data.get("prev_change_id").and_then(Value::as_u64);
        let event_ts = data
            .get("timestamp")
            .and_then(Value::as_i64)
            .map(millis_to_ts)
            .unwrap_or_else(Utc::now);

        let bid_changes = parse_levels(data.get("bids"))?;
        let ask_changes = parse_levels(data.get("asks"))?;

        Ok(vec![DepthFrame {
            symbol,
            delta: InboundDelta {
                bid_changes,
                ask_changes,
                first_update_id: prev_change_id.unwrap_or(change_id),
                last_update_id: change_id,
                prev_update_id: prev_change_id,
                event_ts,
            },
        }])
    }

    fn keepalive_policy(&self) -> KeepAlivePolicy {
        KeepAlivePolicy {
            ping_interval: Some(Duration::from_secs(30)),
            ping_message: Some(WsMessage::text(
                serde_json::json!({"jsonrpc": "2.0", "id": 0, "method": "public/test"}).to_string(),
            )),
            inactivity_timeout: Some(Duration::from_secs(5 * 60)),
        }
    }
}

impl DeribitAdapter {
    fn parse_trade(&self, entry: &Value, collected_at: DateTime<Utc>) -> Result<Trade, NormalizeError> {
        let instrument = entry
            .get("instrument_name")
            .and_then(Value::as_str)
            .ok_or_else(|| NormalizeError::MalformedFrame("missing instrument_name".into()))?;
        let (market_type, symbol) = canonicalize_instrument(instrument);

        let price = parse_decimal_field("price", entry.get("price").unwrap_or(&Value::Null))?;
        let quantity = parse_decimal_field("amount", entry.get("amount").unwrap_or(&Value::Null))?;
        let direction = entry.get("direction").and_then(Value::as_str).unwrap_or("buy");
        let side = if direction == "sell" { Side::Sell } else { Side::Buy };
        let is_buyer_maker = side == Side::Sell;

        let event_ts = entry
            .get("timestamp")
            .and_then(Value::as_i64)
            .map(millis_to_ts)
            .unwrap_or_else(Utc::now);
        let trade_id = entry
            .get("trade_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Trade {
            exchange_id: ExchangeId::DeribitDerivatives,
            market_type,
            symbol,
            trade_id,
            price,
            quantity,
            quote_quantity: price * quantity,
            side,
            is_buyer_maker,
            event_ts,
            collected_at,
        })
    }
}

fn parse_levels(value: Option<&Value>) -> Result<Vec<OrderBookLevel>, NormalizeError> {
    let Some(array) = value.and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    array
        .iter()
        .map(|level| {
            let level = level
                .as_array()
                .ok_or_else(|| NormalizeError::MalformedFrame("level is not an array".into()))?;
            // Deribit format: [action, price, amount]; action is ignored here,
            // amount==0 already maps onto the removal convention downstream.
            let price = parse_decimal_field("price", level.get(1).unwrap_or(&Value::Null))?;
            let quantity = parse_decimal_field("amount", level.get(2).unwrap_or(&Value::Null))?;
            Ok(OrderBookLevel::new(price, quantity))
        })
        .collect()
}

fn millis_to_ts(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

#[derive(Debug, Serialize, Deserialize)]
struct BookSummaryQuery {
    instrument_name: String,
    depth: usize,
}

impl RestRequest for BookSummaryQuery {
    type Response = DeribitBookResponse;
    type QueryParams = Self;

    fn path(&self) -> Cow<'static, str> {
        Cow::Borrowed("/api/v2/public/get_order_book")
    }

    fn query_params(&self) -> Option<&Self::QueryParams> {
        Some(self)
    }
}

#[derive(Debug, Deserialize)]
struct DeribitBookResponse {
    result: DeribitBookResult,
}

#[derive(Debug, Deserialize)]
struct DeribitBookResult {
    bids: Vec<(Decimal, Decimal)>,
    asks: Vec<(Decimal, Decimal)>,
    change_id: u64,
    timestamp: i64,
}

pub async fn fetch_depth_snapshot(
    client: &RestClient,
    symbol: &Symbol,
    depth: usize,
) -> Result<OrderBookSnapshot, DataError> {
    let instrument_name = DeribitAdapter::instrument_name(symbol);
    let request = BookSummaryQuery {
        instrument_name,
        depth,
    };
    let response = client.execute(request).await?;
    let market_type = if symbol.quote() == "PERPETUAL" {
        MarketType::Perpetual
    } else {
        MarketType::Options
    };

    Ok(OrderBookSnapshot {
        exchange_id: ExchangeId::DeribitDerivatives,
        market_type,
        symbol: symbol.clone(),
        bids: response
            .result
            .bids
            .into_iter()
            .map(|(price, qty)| OrderBookLevel::new(price, qty))
            .collect(),
        asks: response
            .result
            .asks
            .into_iter()
            .map(|(price, qty)| OrderBookLevel::new(price, qty))
            .collect(),
        last_update_id: response.result.change_id,
        event_ts: millis_to_ts(response.result.timestamp),
        depth_levels: depth,
        collected_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_perpetual_to_base_symbol() {
        let (market_type, symbol) = canonicalize_instrument("BTC-PERPETUAL");
        assert_eq!(market_type, MarketType::Perpetual);
        assert_eq!(symbol.base(), "BTC");
    }

    #[test]
    fn carries_options_instrument_unchanged() {
        let (market_type, symbol) = canonicalize_instrument("BTC-25OCT24-60000-C");
        assert_eq!(market_type, MarketType::Options);
        assert_eq!(symbol.base(), "BTC-25OCT24-60000-C");
    }

    #[test]
    fn parses_trade_direction_into_side() {
        let adapter = DeribitAdapter;
        let frame = WsMessage::text(
            r#"{"params":{"channel":"trades.BTC-PERPETUAL.100ms","data":[{"instrument_name":"BTC-PERPETUAL","trade_id":"1","price":50000,"amount":10,"direction":"sell","timestamp":1672515782136}]}}"#,
        );
        let records = adapter.parse_frame(&frame, Utc::now()).unwrap();
        let CanonicalRecord::Trade(trade) = &records[0] else {
            panic!("expected trade");
        };
        assert_eq!(trade.side, Side::Sell);
    }
}
