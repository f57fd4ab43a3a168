//! Binance spot/derivatives adapter. Subscriptions are embedded in the
//! combined-stream URL; the server forces a close every 24h and expects a
//! pong within 60s of a ping (handled by proactive reconnect, §4.1.1, not by
//! this adapter).

use super::{parse_decimal_field, unwrap_combined_stream_envelope, ChannelKind, ChannelSubscription, DepthFrame, ExchangeAdapter, NormalizeError};
use crate::books::InboundDelta;
use crate::error::DataError;
use crate::model::{CanonicalRecord, Liquidation, OrderBookLevel, OrderBookSnapshot, Side, Trade};
use chrono::{DateTime, TimeZone, Utc};
use marketline_instrument::{ExchangeId, MarketType, Symbol};
use marketline_integration::protocol::http::{RestClient, RestRequest};
use marketline_integration::protocol::websocket::{KeepAlivePolicy, WsMessage};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::borrow::Cow;
use std::time::Duration;
use url::Url;

/// Known quote-asset suffixes, longest first so `BTCUSDT` splits as
/// `BTC`/`USDT` rather than a shorter spurious match.
const QUOTE_ASSETS: &[&str] = &["USDT", "USDC", "BUSD", "FDUSD", "TUSD", "BTC", "ETH", "BNB"];

/// Split a Binance-native symbol (`BTCUSDT`) into canonical `BTC-USDT`.
pub fn canonicalize_symbol(native: &str) -> Option<Symbol> {
    let upper = native.to_ascii_uppercase();
    QUOTE_ASSETS
        .iter()
        .filter(|quote| upper.ends_with(**quote) && upper.len() > quote.len())
        .max_by_key(|quote| quote.len())
        .map(|quote| {
            let base = &upper[..upper.len() - quote.len()];
            Symbol::new(base, *quote)
        })
}

#[derive(Debug, Clone, Copy)]
pub struct BinanceAdapter {
    exchange_id: ExchangeId,
}

impl BinanceAdapter {
    pub fn spot() -> Self {
        Self {
            exchange_id: ExchangeId::BinanceSpot,
        }
    }

    pub fn derivatives() -> Self {
        Self {
            exchange_id: ExchangeId::BinanceDerivatives,
        }
    }

    fn is_derivatives(&self) -> bool {
        matches!(self.exchange_id, ExchangeId::BinanceDerivatives)
    }

    fn base_host(&self) -> &'static str {
        if self.is_derivatives() {
            "fstream.binance.com"
        } else {
            "stream.binance.com:9443"
        }
    }

    fn stream_name(channel: ChannelKind, symbol: &Symbol) -> String {
        let native = format!("{}{}", symbol.base(), symbol.quote()).to_ascii_lowercase();
        match channel {
            ChannelKind::Trade => format!("{native}@trade"),
            ChannelKind::OrderBookL2 => format!("{native}@depth@100ms"),
            ChannelKind::Liquidation => format!("{native}@forceOrder"),
        }
    }
}

impl ExchangeAdapter for BinanceAdapter {
    fn exchange_id(&self) -> ExchangeId {
        self.exchange_id
    }

    fn default_market_type(&self) -> MarketType {
        if self.is_derivatives() {
            MarketType::Perpetual
        } else {
            MarketType::Spot
        }
    }

    fn connect_url(&self, subscriptions: &[ChannelSubscription]) -> Result<Url, url::ParseError> {
        let streams = subscriptions
            .iter()
            .map(|sub| Self::stream_name(sub.channel, &sub.symbol))
            .collect::<Vec<_>>()
            .join("/");
        Url::parse(&format!("wss://{}/stream?streams={streams}", self.base_host()))
    }

    fn subscribe(&self, _subscriptions: &[ChannelSubscription]) -> Vec<WsMessage> {
        // Subscriptions are embedded in the connect URL; nothing to send
        // post-connect. Recorded subscriptions are re-applied on reconnect
        // by rebuilding the connect URL, not by resending frames.
        Vec::new()
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
        let value = unwrap_combined_stream_envelope(raw);

        match value.get("e").and_then(Value::as_str) {
            Some("trade") => Ok(vec![CanonicalRecord::Trade(self.parse_trade(&value, collected_at)?)]),
            Some("forceOrder") => Ok(vec![CanonicalRecord::Liquidation(
                self.parse_liquidation(&value, collected_at)?,
            )]),
            _ => Ok(Vec::new()),
        }
    }

    fn parse_depth_frame(&self, frame: &WsMessage) -> Result<Vec<DepthFrame>, NormalizeError> {
        let text = frame
            .to_text()
            .map_err(|error| NormalizeError::MalformedFrame(error.to_string()))?;
        let raw: Value = serde_json::from_str(text)
            .map_err(|error| NormalizeError::MalformedFrame(error.to_string()))?;
        let value = unwrap_combined_stream_envelope(raw);

        if value.get("e").and_then(Value::as_str) != Some("depthUpdate") {
            return Ok(Vec::new());
        }

        let native_symbol = value
            .get("s")
            .and_then(Value::as_str)
            .ok_or_else(|| NormalizeError::MalformedFrame("missing symbol".into()))?;
        let symbol = canonicalize_symbol(native_symbol)
            .ok_or_else(|| NormalizeError::UnknownChannel(native_symbol.to_string()))?;

        let first_update_id = value
            .get("U")
            .and_then(Value::as_u64)
            .ok_or_else(|| NormalizeError::MalformedFrame("missing U".into()))?;
        let last_update_id = value
            .get("u")
            .and_then(Value::as_u64)
            .ok_or_else(|| NormalizeError::MalformedFrame("missing u".into()))?;
        // Derivatives streams carry `pu` (previous final update id); spot does not.
        let prev_update_id = value.get("pu").and_then(Value::as_u64);
        let event_ts = value
            .get("E")
            .and_then(Value::as_i64)
            .map(millis_to_ts)
            .unwrap_or_else(Utc::now);

        let bid_changes = parse_levels(value.get("b"))?;
        let ask_changes = parse_levels(value.get("a"))?;

        Ok(vec![DepthFrame {
            symbol,
            delta: InboundDelta {
                bid_changes,
                ask_changes,
                first_update_id,
                last_update_id,
                prev_update_id,
                event_ts,
            },
        }])
    }

    fn keepalive_policy(&self) -> KeepAlivePolicy {
        KeepAlivePolicy {
            ping_interval: Some(Duration::from_secs(20)),
            ping_message: None,
            inactivity_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl BinanceAdapter {
    fn parse_trade(&self, value: &Value, collected_at: DateTime<Utc>) -> Result<Trade, NormalizeError> {
        let native_symbol = value
            .get("s")
            .and_then(Value::as_str)
            .ok_or_else(|| NormalizeError::MalformedFrame("missing symbol".into()))?;
        let symbol = canonicalize_symbol(native_symbol)
            .ok_or_else(|| NormalizeError::UnknownChannel(native_symbol.to_string()))?;

        let price = parse_decimal_field("p", value.get("p").unwrap_or(&Value::Null))?;
        let quantity = parse_decimal_field("q", value.get("q").unwrap_or(&Value::Null))?;
        let is_buyer_maker = value.get("m").and_then(Value::as_bool).unwrap_or(false);
        let event_ts = value
            .get("T")
            .and_then(Value::as_i64)
            .map(millis_to_ts)
            .unwrap_or_else(Utc::now);
        let trade_id = value
            .get("t")
            .map(|v| v.to_string())
            .unwrap_or_default();

        Ok(Trade {
            exchange_id: self.exchange_id,
            market_type: self.default_market_type(),
            symbol,
            trade_id,
            price,
            quantity,
            quote_quantity: price * quantity,
            side: if is_buyer_maker { Side::Sell } else { Side::Buy },
            is_buyer_maker,
            event_ts,
            collected_at,
        })
    }

    /// `forceOrder` carries the liquidated order nested under `"o"` (spec
    /// §4.2 Liquidation); side is the order's own side, not the aggressor
    /// convention `parse_trade` derives from `m`.
    fn parse_liquidation(&self, value: &Value, collected_at: DateTime<Utc>) -> Result<Liquidation, NormalizeError> {
        let order = value
            .get("o")
            .ok_or_else(|| NormalizeError::MalformedFrame("missing liquidation order payload".into()))?;
        let native_symbol = order
            .get("s")
            .and_then(Value::as_str)
            .ok_or_else(|| NormalizeError::MalformedFrame("missing symbol".into()))?;
        let symbol = canonicalize_symbol(native_symbol)
            .ok_or_else(|| NormalizeError::UnknownChannel(native_symbol.to_string()))?;

        let side = match order.get("S").and_then(Value::as_str) {
            Some("SELL") => Side::Sell,
            _ => Side::Buy,
        };
        let price = parse_decimal_field("ap", order.get("ap").unwrap_or(&Value::Null))?;
        let quantity = parse_decimal_field("q", order.get("q").unwrap_or(&Value::Null))?;
        let event_ts = order
            .get("T")
            .and_then(Value::as_i64)
            .map(millis_to_ts)
            .unwrap_or_else(Utc::now);

        Ok(Liquidation {
            exchange_id: self.exchange_id,
            market_type: self.default_market_type(),
            symbol,
            side,
            price,
            quantity,
            value: price * quantity,
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
        .map(|pair| {
            let pair = pair
                .as_array()
                .ok_or_else(|| NormalizeError::MalformedFrame("level is not a pair".into()))?;
            let price = parse_decimal_field("price", pair.first().unwrap_or(&Value::Null))?;
            let quantity = parse_decimal_field("quantity", pair.get(1).unwrap_or(&Value::Null))?;
            Ok(OrderBookLevel::new(price, quantity))
        })
        .collect()
}

fn millis_to_ts(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

#[derive(Debug, Deserialize)]
struct DepthSnapshotQuery {
    symbol: String,
    limit: usize,
}

impl RestRequest for DepthSnapshotQuery {
    type Response = BinanceDepthSnapshot;
    type QueryParams = Self;

    fn path(&self) -> Cow<'static, str> {
        Cow::Borrowed("/api/v3/depth")
    }

    fn query_params(&self) -> Option<&Self::QueryParams> {
        Some(self)
    }
}

impl serde::Serialize for DepthSnapshotQuery {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("DepthSnapshotQuery", 2)?;
        state.serialize_field("symbol", &self.symbol)?;
        state.serialize_field("limit", &self.limit)?;
        state.end()
    }
}

#[derive(Debug, Deserialize)]
struct BinanceDepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<(Decimal, Decimal)>,
    asks: Vec<(Decimal, Decimal)>,
}

async fn fetch_depth_snapshot(
    client: &RestClient,
    exchange_id: ExchangeId,
    market_type: MarketType,
    symbol: &Symbol,
    depth: usize,
) -> Result<OrderBookSnapshot, DataError> {
    let request = DepthSnapshotQuery {
        symbol: format!("{}{}", symbol.base(), symbol.quote()),
        limit: depth,
    };
    let response = client.execute(request).await?;
    let now = Utc::now();
    Ok(OrderBookSnapshot {
        exchange_id,
        market_type,
        symbol: symbol.clone(),
        bids: response
            .bids
            .into_iter()
            .map(|(price, qty)| OrderBookLevel::new(price, qty))
            .collect(),
        asks: response
            .asks
            .into_iter()
            .map(|(price, qty)| OrderBookLevel::new(price, qty))
            .collect(),
        last_update_id: response.last_update_id,
        event_ts: now,
        depth_levels: depth,
        collected_at: now,
    })
}

pub async fn fetch_spot_depth_snapshot(
    client: &RestClient,
    symbol: &Symbol,
    depth: usize,
) -> Result<OrderBookSnapshot, DataError> {
    fetch_depth_snapshot(client, ExchangeId::BinanceSpot, MarketType::Spot, symbol, depth).await
}

pub async fn fetch_futures_depth_snapshot(
    client: &RestClient,
    symbol: &Symbol,
    depth: usize,
) -> Result<OrderBookSnapshot, DataError> {
    fetch_depth_snapshot(
        client,
        ExchangeId::BinanceDerivatives,
        MarketType::Perpetual,
        symbol,
        depth,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_spot_symbol() {
        assert_eq!(canonicalize_symbol("BTCUSDT"), Some(Symbol::new("BTC", "USDT")));
        assert_eq!(canonicalize_symbol("ETHBTC"), Some(Symbol::new("ETH", "BTC")));
    }

    #[test]
    fn canonicalization_is_idempotent_on_already_split_parts() {
        let once = canonicalize_symbol("BTCUSDT").unwrap();
        let twice = canonicalize_symbol(&format!("{}{}", once.base(), once.quote())).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn parses_trade_happy_path() {
        let adapter = BinanceAdapter::spot();
        let frame = WsMessage::text(
            r#"{"stream":"btcusdt@trade","data":{"e":"trade","s":"BTCUSDT","t":12345,"p":"45000.50","q":"0.1","T":1672515782136,"m":false}}"#,
        );
        let records = adapter.parse_frame(&frame, Utc::now()).unwrap();
        assert_eq!(records.len(), 1);
        let CanonicalRecord::Trade(trade) = &records[0] else {
            panic!("expected trade");
        };
        assert_eq!(trade.symbol, Symbol::new("BTC", "USDT"));
        assert_eq!(trade.price.to_string(), "45000.50");
        assert_eq!(trade.side, Side::Buy);
        assert!(!trade.is_buyer_maker);
    }

    #[test]
    fn parses_depth_update_with_explicit_prev_id_for_futures() {
        let adapter = BinanceAdapter::derivatives();
        let frame = WsMessage::text(
            r#"{"e":"depthUpdate","E":1672515782136,"s":"BTCUSDT","U":100,"u":110,"pu":99,"b":[["100.0","1.5"]],"a":[]}"#,
        );
        let frames = adapter.parse_depth_frame(&frame).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].delta.prev_update_id, Some(99));
        assert_eq!(frames[0].delta.last_update_id, 110);
    }

    #[test]
    fn parses_force_order_into_liquidation() {
        let adapter = BinanceAdapter::derivatives();
        let frame = WsMessage::text(
            r#"{"stream":"btcusdt@forceOrder","data":{"e":"forceOrder","E":1672515782136,"o":{"s":"BTCUSDT","S":"SELL","ap":"44950.10","q":"0.5","T":1672515782100}}}"#,
        );
        let records = adapter.parse_frame(&frame, Utc::now()).unwrap();
        assert_eq!(records.len(), 1);
        let CanonicalRecord::Liquidation(liquidation) = &records[0] else {
            panic!("expected liquidation");
        };
        assert_eq!(liquidation.symbol, Symbol::new("BTC", "USDT"));
        assert_eq!(liquidation.side, Side::Sell);
        assert_eq!(liquidation.price.to_string(), "44950.10");
        assert_eq!(liquidation.quantity.to_string(), "0.5");
        assert_eq!(liquidation.value, liquidation.price * liquidation.quantity);
    }

    #[test]
    fn unknown_channel_is_dropped_not_panicking() {
        let adapter = BinanceAdapter::spot();
        let frame = WsMessage::text(r#"{"e":"markPriceUpdate"}"#);
        assert!(adapter.parse_frame(&frame, Utc::now()).unwrap().is_empty());
    }
}
