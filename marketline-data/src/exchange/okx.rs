//! OKX spot/derivatives adapter. Subscriptions are sent as post-connect
//! frames; the server closes idle connections after 30s, so the client
//! sends a bare `"ping"` string every 25s (spec §4.1).

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

const PUBLIC_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// `BTC-USDT` is already canonical; `BTC-USDT-SWAP` drops the `-SWAP` suffix.
pub fn canonicalize_symbol(native: &str) -> Option<Symbol> {
    let stripped = native
        .strip_suffix("-SWAP")
        .or_else(|| native.strip_suffix("-PERPETUAL"))
        .unwrap_or(native);
    let mut parts = stripped.split('-');
    let (Some(base), Some(quote)) = (parts.next(), parts.next()) else {
        return None;
    };
    Some(Symbol::new(base, quote))
}

#[derive(Debug, Clone, Copy)]
pub struct OkxAdapter {
    exchange_id: ExchangeId,
}

impl OkxAdapter {
    pub fn spot() -> Self {
        Self {
            exchange_id: ExchangeId::OkxSpot,
        }
    }

    pub fn derivatives() -> Self {
        Self {
            exchange_id: ExchangeId::OkxDerivatives,
        }
    }

    fn inst_id(&self, symbol: &Symbol) -> String {
        if matches!(self.exchange_id, ExchangeId::OkxDerivatives) {
            format!("{}-{}-SWAP", symbol.base(), symbol.quote())
        } else {
            format!("{}-{}", symbol.base(), symbol.quote())
        }
    }

    fn channel_name(channel: ChannelKind) -> &'static str {
        match channel {
            ChannelKind::Trade => "trades",
            ChannelKind::OrderBookL2 => "books-l2-tbt",
            ChannelKind::Liquidation => "liquidation-orders",
        }
    }
}

impl ExchangeAdapter for OkxAdapter {
    fn exchange_id(&self) -> ExchangeId {
        self.exchange_id
    }

    fn default_market_type(&self) -> MarketType {
        if matches!(self.exchange_id, ExchangeId::OkxDerivatives) {
            MarketType::Perpetual
        } else {
            MarketType::Spot
        }
    }

    fn connect_url(&self, _subscriptions: &[ChannelSubscription]) -> Result<Url, url::ParseError> {
        Url::parse(PUBLIC_WS_URL)
    }

    fn subscribe(&self, subscriptions: &[ChannelSubscription]) -> Vec<WsMessage> {
        let args: Vec<Value> = subscriptions
            .iter()
            .map(|sub| {
                serde_json::json!({
                    "channel": Self::channel_name(sub.channel),
                    "instId": self.inst_id(&sub.symbol),
                })
            })
            .collect();

        vec![WsMessage::text(
            serde_json::json!({"op": "subscribe", "args": args}).to_string(),
        )]
    }

    fn parse_frame(
        &self,
        frame: &WsMessage,
        collected_at: DateTime<Utc>,
    ) -> Result<Vec<CanonicalRecord>, NormalizeError> {
        if matches!(frame.to_text(), Ok("ping") | Ok("pong")) {
            return Ok(Vec::new());
        }
        let text = frame
            .to_text()
            .map_err(|error| NormalizeError::MalformedFrame(error.to_string()))?;
        let raw: Value = serde_json::from_str(text)
            .map_err(|error| NormalizeError::MalformedFrame(error.to_string()))?;

        let Some(channel) = raw.get("arg").and_then(|arg| arg.get("channel")).and_then(Value::as_str) else {
            return Ok(Vec::new());
        };
        if channel != "trades" {
            return Ok(Vec::new());
        }

        let Some(data) = raw.get("data").and_then(Value::as_array) else {
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

        let Some(channel) = raw.get("arg").and_then(|arg| arg.get("channel")).and_then(Value::as_str) else {
            return Ok(Vec::new());
        };
        if channel != "books-l2-tbt" {
            return Ok(Vec::new());
        }
        let Some(inst_id) = raw.get("arg").and_then(|arg| arg.get("instId")).and_then(Value::as_str) else {
            return Ok(Vec::new());
        };
        let symbol = canonicalize_symbol(inst_id)
            .ok_or_else(|| NormalizeError::UnknownChannel(inst_id.to_string()))?;

        let Some(data) = raw.get("data").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        data.iter()
            .map(|entry| {
                let seq_id = entry
                    .get("seqId")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| NormalizeError::MalformedFrame("missing seqId".into()))?;
                let prev_seq_id = entry
                    .get("prevSeqId")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<u64>().ok());
                let event_ts = entry
                    .get("ts")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<i64>().ok())
                    .map(millis_to_ts)
                    .unwrap_or_else(Utc::now);

                let bid_changes = parse_levels(entry.get("bids"))?;
                let ask_changes = parse_levels(entry.get("asks"))?;

                Ok(DepthFrame {
                    symbol: symbol.clone(),
                    delta: InboundDelta {
                        bid_changes,
                        ask_changes,
                        first_update_id: prev_seq_id.unwrap_or(seq_id),
                        last_update_id: seq_id,
                        prev_update_id: prev_seq_id,
                        event_ts,
                    },
                })
            })
            .collect()
    }

    fn keepalive_policy(&self) -> KeepAlivePolicy {
        KeepAlivePolicy {
            ping_interval: Some(Duration::from_secs(25)),
            ping_message: Some(WsMessage::text("ping")),
            inactivity_timeout: Some(Duration::from_secs(5 * 60)),
        }
    }
}

impl OkxAdapter {
    fn parse_trade(&self, entry: &Value, collected_at: DateTime<Utc>) -> Result<Trade, NormalizeError> {
        let inst_id = entry
            .get("instId")
            .and_then(Value::as_str)
            .ok_or_else(|| NormalizeError::MalformedFrame("missing instId".into()))?;
        let symbol = canonicalize_symbol(inst_id)
            .ok_or_else(|| NormalizeError::UnknownChannel(inst_id.to_string()))?;

        let price = parse_decimal_field("px", entry.get("px").unwrap_or(&Value::Null))?;
        let quantity = parse_decimal_field("sz", entry.get("sz").unwrap_or(&Value::Null))?;
        let side_raw = entry.get("side").and_then(Value::as_str).unwrap_or("buy");
        let side = if side_raw == "sell" { Side::Sell } else { Side::Buy };
        // Convention: the aggressor side is reported directly; the
        // counter-party resting order was therefore the maker.
        let is_buyer_maker = side == Side::Sell;

        let event_ts = entry
            .get("ts")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i64>().ok())
            .map(millis_to_ts)
            .unwrap_or_else(Utc::now);
        let trade_id = entry
            .get("tradeId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Trade {
            exchange_id: self.exchange_id,
            market_type: self.default_market_type(),
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
            let price = parse_decimal_field("price", level.first().unwrap_or(&Value::Null))?;
            let quantity = parse_decimal_field("quantity", level.get(1).unwrap_or(&Value::Null))?;
            Ok(OrderBookLevel::new(price, quantity))
        })
        .collect()
}

fn millis_to_ts(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

#[derive(Debug, Serialize, Deserialize)]
struct BooksQuery {
    #[serde(rename = "instId")]
    inst_id: String,
    sz: String,
}

impl RestRequest for BooksQuery {
    type Response = OkxBooksResponse;
    type QueryParams = Self;

    fn path(&self) -> Cow<'static, str> {
        Cow::Borrowed("/api/v5/market/books")
    }

    fn query_params(&self) -> Option<&Self::QueryParams> {
        Some(self)
    }
}

#[derive(Debug, Deserialize)]
struct OkxBooksResponse {
    data: Vec<OkxBooksData>,
}

#[derive(Debug, Deserialize)]
struct OkxBooksData {
    bids: Vec<(Decimal, Decimal, Decimal, Decimal)>,
    asks: Vec<(Decimal, Decimal, Decimal, Decimal)>,
    ts: String,
    #[serde(rename = "seqId")]
    seq_id: u64,
}

pub async fn fetch_depth_snapshot(
    client: &RestClient,
    exchange_id: ExchangeId,
    symbol: &Symbol,
    depth: usize,
) -> Result<OrderBookSnapshot, DataError> {
    let request = BooksQuery {
        inst_id: OkxAdapter { exchange_id }.inst_id(symbol),
        sz: depth.to_string(),
    };
    let response = client.execute(request).await?;
    let entry = response
        .data
        .into_iter()
        .next()
        .ok_or_else(|| DataError::FatalInvariant {
            exchange_id,
            symbol: symbol.clone(),
            reason: "empty books response".into(),
        })?;

    let event_ts = entry
        .ts
        .parse::<i64>()
        .ok()
        .map(millis_to_ts)
        .unwrap_or_else(Utc::now);

    let market_type = if matches!(exchange_id, ExchangeId::OkxDerivatives) {
        MarketType::Perpetual
    } else {
        MarketType::Spot
    };

    Ok(OrderBookSnapshot {
        exchange_id,
        market_type,
        symbol: symbol.clone(),
        bids: entry
            .bids
            .into_iter()
            .map(|(price, qty, ..)| OrderBookLevel::new(price, qty))
            .collect(),
        asks: entry
            .asks
            .into_iter()
            .map(|(price, qty, ..)| OrderBookLevel::new(price, qty))
            .collect(),
        last_update_id: entry.seq_id,
        event_ts,
        depth_levels: depth,
        collected_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_swap_suffix() {
        assert_eq!(canonicalize_symbol("BTC-USDT-SWAP"), Some(Symbol::new("BTC", "USDT")));
        assert_eq!(canonicalize_symbol("BTC-USDT"), Some(Symbol::new("BTC", "USDT")));
    }

    #[test]
    fn parses_trade_and_derives_maker_flag() {
        let adapter = OkxAdapter::spot();
        let frame = WsMessage::text(
            r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"instId":"BTC-USDT","tradeId":"1","px":"50000","sz":"1","side":"sell","ts":"1672515782136"}]}"#,
        );
        let records = adapter.parse_frame(&frame, Utc::now()).unwrap();
        let CanonicalRecord::Trade(trade) = &records[0] else {
            panic!("expected trade");
        };
        assert_eq!(trade.side, Side::Sell);
        assert!(trade.is_buyer_maker);
    }

    #[test]
    fn depth_gap_is_detectable_from_seq_ids() {
        let adapter = OkxAdapter::spot();
        let frame = WsMessage::text(
            r#"{"arg":{"channel":"books-l2-tbt","instId":"BTC-USDT"},"data":[{"seqId":"103","prevSeqId":"101","ts":"1672515782136","bids":[["100.0","1"]],"asks":[]}]}"#,
        );
        let frames = adapter.parse_depth_frame(&frame).unwrap();
        assert_eq!(frames[0].delta.prev_update_id, Some(101));
        assert_eq!(frames[0].delta.last_update_id, 103);
    }
}
