//! Per-venue adapters: a small `connect` / `subscribe` / `parse_frame` /
//! `keepalive_policy` interface implemented once per venue, rather than a
//! deep generic `Connector<Channel, Market, Subscriber, ...>` hierarchy.
//! Shared helpers (the combined-stream envelope unwrap, numeric parsing)
//! live as free functions so venues compose them instead of inheriting them.

pub mod binance;
pub mod deribit;
pub mod okx;

use crate::model::CanonicalRecord;
use chrono::{DateTime, Utc};
use marketline_integration::protocol::websocket::{KeepAlivePolicy, WsMessage};
use marketline_instrument::{ExchangeId, MarketType, Symbol};
use rust_decimal::Decimal;
use serde_json::Value;
use url::Url;

/// Data the OrderBook Manager and Normalizer care about, independent of the
/// wire channel name a venue uses for it.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ChannelKind {
    Trade,
    OrderBookL2,
    Liquidation,
}

#[derive(Debug, Clone)]
pub struct ChannelSubscription {
    pub channel: ChannelKind,
    pub symbol: Symbol,
}

/// Recoverable per-frame failure: the frame is dropped, a counter is
/// incremented, the session stays up.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NormalizeError {
    #[error("unknown channel or instrument: {0}")]
    UnknownChannel(String),
    #[error("malformed numeric field '{field}': {value}")]
    MalformedNumeric { field: &'static str, value: String },
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

impl NormalizeError {
    pub fn drop_reason(&self) -> &'static str {
        match self {
            NormalizeError::UnknownChannel(_) => "unknown_channel",
            NormalizeError::MalformedNumeric { .. } => "malformed_numeric",
            NormalizeError::MalformedFrame(_) => "malformed_frame",
        }
    }
}

/// One venue's WebSocket dialect: URL construction, keep-alive behaviour,
/// subscription framing and frame decoding into canonical records.
pub trait ExchangeAdapter: Send + Sync {
    fn exchange_id(&self) -> ExchangeId;

    fn default_market_type(&self) -> MarketType;

    /// Build the connect URL for a session carrying `subscriptions`.
    ///
    /// Venues that embed subscriptions in the URL itself (Binance combined
    /// streams) encode them here; venues that subscribe via post-connect
    /// frames (OKX, Deribit) return a fixed base URL regardless of
    /// `subscriptions`.
    fn connect_url(&self, subscriptions: &[ChannelSubscription]) -> Result<Url, url::ParseError>;

    /// Post-connect subscription frames, empty for URL-embedded venues.
    fn subscribe(&self, subscriptions: &[ChannelSubscription]) -> Vec<WsMessage>;

    /// Decode one inbound WebSocket frame into zero or more canonical
    /// records (trades, funding rate, liquidations, ...). Order-book depth
    /// frames are excluded here and routed through [`Self::parse_depth_frame`]
    /// instead, since they must pass through the OrderBook Manager's
    /// sequencing before becoming a [`CanonicalRecord`].
    fn parse_frame(
        &self,
        frame: &WsMessage,
        collected_at: DateTime<Utc>,
    ) -> Result<Vec<CanonicalRecord>, NormalizeError>;

    /// Decode one inbound depth frame into zero or more [`DepthFrame`]s for
    /// the symbol(s) it carries, for the OrderBook Manager to sequence.
    /// Returns an empty vec for frames that are not depth updates.
    fn parse_depth_frame(
        &self,
        frame: &WsMessage,
    ) -> Result<Vec<DepthFrame>, NormalizeError>;

    fn keepalive_policy(&self) -> KeepAlivePolicy;
}

/// One venue order-book delta or full-replace frame, tagged with the symbol
/// it belongs to so the caller can route it to the right [`SymbolBook`]
/// (`crate::books::SymbolBook`).
#[derive(Debug, Clone)]
pub struct DepthFrame {
    pub symbol: Symbol,
    pub delta: crate::books::InboundDelta,
}

/// Single-point combined-stream envelope unwrap shared by every venue:
/// `{"stream": ..., "data": {...}}` unwraps to the inner object; a frame
/// whose `data` field is absent or a list passes through unchanged.
/// Applying this twice is a no-op.
pub fn unwrap_combined_stream_envelope(value: Value) -> Value {
    match value {
        Value::Object(ref map) => match map.get("data") {
            Some(Value::Object(_)) => map.get("data").cloned().unwrap_or(value.clone()),
            _ => value,
        },
        other => other,
    }
}

/// Parse a venue's price/quantity string field into a [`Decimal`], mapping
/// failures to [`NormalizeError::MalformedNumeric`] rather than panicking.
pub fn parse_decimal_field(field: &'static str, value: &Value) -> Result<Decimal, NormalizeError> {
    let raw = value
        .as_str()
        .map(str::to_owned)
        .or_else(|| value.as_f64().map(|v| v.to_string()))
        .ok_or_else(|| NormalizeError::MalformedNumeric {
            field,
            value: value.to_string(),
        })?;

    raw.parse::<Decimal>()
        .map_err(|_| NormalizeError::MalformedNumeric { field, value: raw })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_unwrap_is_idempotent() {
        let wrapped = json!({"stream": "btcusdt@trade", "data": {"e": "trade"}});
        let once = unwrap_combined_stream_envelope(wrapped);
        let twice = unwrap_combined_stream_envelope(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once, json!({"e": "trade"}));
    }

    #[test]
    fn envelope_unwrap_passes_through_when_data_is_not_an_object() {
        let passthrough = json!({"arg": {"channel": "trades"}, "data": [{"e": "trade"}]});
        assert_eq!(
            unwrap_combined_stream_envelope(passthrough.clone()),
            passthrough
        );
    }

    #[test]
    fn envelope_unwrap_passes_through_when_no_data_field() {
        let bare = json!({"e": "trade", "s": "BTCUSDT"});
        assert_eq!(unwrap_combined_stream_envelope(bare.clone()), bare);
    }
}
