//! The canonical record schema every venue adapter normalizes into. Every
//! record here is an immutable value object: once built by the Normalizer or
//! OrderBook Manager it is never mutated, only cloned downstream to the
//! Publisher.

use chrono::{DateTime, Utc};
use marketline_instrument::{ExchangeId, MarketType, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggressor side of a trade, derived per-venue from maker/taker or explicit
/// direction fields.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Deserialize, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

/// Whether an `OrderBookUpdate` carries a full top-N picture or an
/// incremental set of price-level changes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Deserialize, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Snapshot,
    Delta,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    /// `quantity == 0` means "remove this level" in a delta; never holds in
    /// a rendered snapshot (zero-quantity levels are dropped before emit).
    pub quantity: Decimal,
}

impl OrderBookLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    pub fn is_removal(&self) -> bool {
        self.quantity.is_zero()
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Trade {
    pub exchange_id: ExchangeId,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub trade_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub quote_quantity: Decimal,
    pub side: Side,
    pub is_buyer_maker: bool,
    pub event_ts: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
}

/// Dedup key: `(exchange_id, market_type, symbol, trade_id)` must map to
/// exactly one durably observable row regardless of redelivery count.
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TradeDedupKey {
    pub exchange_id: ExchangeId,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub trade_id: String,
}

impl Trade {
    pub fn dedup_key(&self) -> TradeDedupKey {
        TradeDedupKey {
            exchange_id: self.exchange_id,
            market_type: self.market_type,
            symbol: self.symbol.clone(),
            trade_id: self.trade_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct OrderBookSnapshot {
    pub exchange_id: ExchangeId,
    pub market_type: MarketType,
    pub symbol: Symbol,
    /// Descending by price.
    pub bids: Vec<OrderBookLevel>,
    /// Ascending by price.
    pub asks: Vec<OrderBookLevel>,
    pub last_update_id: u64,
    pub event_ts: DateTime<Utc>,
    pub depth_levels: usize,
    pub collected_at: DateTime<Utc>,
}

impl OrderBookSnapshot {
    /// Best bid must sit strictly below best ask when both sides are
    /// non-empty.
    pub fn is_crossed(&self) -> bool {
        match (self.bids.first(), self.asks.first()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct OrderBookUpdate {
    pub exchange_id: ExchangeId,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub bid_changes: Vec<OrderBookLevel>,
    pub ask_changes: Vec<OrderBookLevel>,
    pub first_update_id: u64,
    pub last_update_id: u64,
    pub prev_last_update_id: u64,
    pub update_type: UpdateType,
    pub event_ts: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct FundingRate {
    pub exchange_id: ExchangeId,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub funding_rate: Decimal,
    pub next_funding_time: DateTime<Utc>,
    pub mark_price: Decimal,
    pub index_price: Decimal,
    pub funding_interval: chrono::Duration,
    pub event_ts: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct OpenInterest {
    pub exchange_id: ExchangeId,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub open_interest: Decimal,
    pub open_interest_value: Decimal,
    pub event_ts: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Liquidation {
    pub exchange_id: ExchangeId,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub value: Decimal,
    pub event_ts: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct LsrTopPosition {
    pub exchange_id: ExchangeId,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub long_ratio: Decimal,
    pub short_ratio: Decimal,
    pub long_short_ratio: Decimal,
    pub event_ts: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct LsrAllAccount {
    pub exchange_id: ExchangeId,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub long_ratio: Decimal,
    pub short_ratio: Decimal,
    pub long_short_ratio: Decimal,
    pub event_ts: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct VolatilityIndex {
    pub exchange_id: ExchangeId,
    pub market_type: MarketType,
    pub symbol: Symbol,
    pub index_value: Decimal,
    pub event_ts: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
}

/// Tagged sum type over every canonical record kind, with a fixed, typed
/// schema per variant. This is what `normalize()` produces and the
/// Publisher consumes.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, derive_more::From)]
#[serde(tag = "data_type", rename_all = "snake_case")]
pub enum CanonicalRecord {
    Trade(Trade),
    OrderbookSnapshot(OrderBookSnapshot),
    OrderbookUpdate(OrderBookUpdate),
    FundingRate(FundingRate),
    OpenInterest(OpenInterest),
    Liquidation(Liquidation),
    LsrTopPosition(LsrTopPosition),
    LsrAllAccount(LsrAllAccount),
    VolatilityIndex(VolatilityIndex),
}

impl CanonicalRecord {
    /// The `<data_type>` segment of the bus subject.
    pub fn data_type(&self) -> &'static str {
        match self {
            CanonicalRecord::Trade(_) => "trade",
            CanonicalRecord::OrderbookSnapshot(_) | CanonicalRecord::OrderbookUpdate(_) => {
                "orderbook"
            }
            CanonicalRecord::FundingRate(_) => "funding_rate",
            CanonicalRecord::OpenInterest(_) => "open_interest",
            CanonicalRecord::Liquidation(_) => "liquidation",
            CanonicalRecord::LsrTopPosition(_) => "lsr_top_position",
            CanonicalRecord::LsrAllAccount(_) => "lsr_all_account",
            CanonicalRecord::VolatilityIndex(_) => "volatility_index",
        }
    }

    pub fn exchange_id(&self) -> ExchangeId {
        match self {
            CanonicalRecord::Trade(r) => r.exchange_id,
            CanonicalRecord::OrderbookSnapshot(r) => r.exchange_id,
            CanonicalRecord::OrderbookUpdate(r) => r.exchange_id,
            CanonicalRecord::FundingRate(r) => r.exchange_id,
            CanonicalRecord::OpenInterest(r) => r.exchange_id,
            CanonicalRecord::Liquidation(r) => r.exchange_id,
            CanonicalRecord::LsrTopPosition(r) => r.exchange_id,
            CanonicalRecord::LsrAllAccount(r) => r.exchange_id,
            CanonicalRecord::VolatilityIndex(r) => r.exchange_id,
        }
    }

    pub fn market_type(&self) -> MarketType {
        match self {
            CanonicalRecord::Trade(r) => r.market_type,
            CanonicalRecord::OrderbookSnapshot(r) => r.market_type,
            CanonicalRecord::OrderbookUpdate(r) => r.market_type,
            CanonicalRecord::FundingRate(r) => r.market_type,
            CanonicalRecord::OpenInterest(r) => r.market_type,
            CanonicalRecord::Liquidation(r) => r.market_type,
            CanonicalRecord::LsrTopPosition(r) => r.market_type,
            CanonicalRecord::LsrAllAccount(r) => r.market_type,
            CanonicalRecord::VolatilityIndex(r) => r.market_type,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        match self {
            CanonicalRecord::Trade(r) => &r.symbol,
            CanonicalRecord::OrderbookSnapshot(r) => &r.symbol,
            CanonicalRecord::OrderbookUpdate(r) => &r.symbol,
            CanonicalRecord::FundingRate(r) => &r.symbol,
            CanonicalRecord::OpenInterest(r) => &r.symbol,
            CanonicalRecord::Liquidation(r) => &r.symbol,
            CanonicalRecord::LsrTopPosition(r) => &r.symbol,
            CanonicalRecord::LsrAllAccount(r) => &r.symbol,
            CanonicalRecord::VolatilityIndex(r) => &r.symbol,
        }
    }

    pub fn event_ts(&self) -> DateTime<Utc> {
        match self {
            CanonicalRecord::Trade(r) => r.event_ts,
            CanonicalRecord::OrderbookSnapshot(r) => r.event_ts,
            CanonicalRecord::OrderbookUpdate(r) => r.event_ts,
            CanonicalRecord::FundingRate(r) => r.event_ts,
            CanonicalRecord::OpenInterest(r) => r.event_ts,
            CanonicalRecord::Liquidation(r) => r.event_ts,
            CanonicalRecord::LsrTopPosition(r) => r.event_ts,
            CanonicalRecord::LsrAllAccount(r) => r.event_ts,
            CanonicalRecord::VolatilityIndex(r) => r.event_ts,
        }
    }

    pub fn collected_at(&self) -> DateTime<Utc> {
        match self {
            CanonicalRecord::Trade(r) => r.collected_at,
            CanonicalRecord::OrderbookSnapshot(r) => r.collected_at,
            CanonicalRecord::OrderbookUpdate(r) => r.collected_at,
            CanonicalRecord::FundingRate(r) => r.collected_at,
            CanonicalRecord::OpenInterest(r) => r.collected_at,
            CanonicalRecord::Liquidation(r) => r.collected_at,
            CanonicalRecord::LsrTopPosition(r) => r.collected_at,
            CanonicalRecord::LsrAllAccount(r) => r.collected_at,
            CanonicalRecord::VolatilityIndex(r) => r.collected_at,
        }
    }
}

/// A price-ordered book rendered from an [`OrderBookSnapshot`] plus any
/// number of applied [`OrderBookUpdate`]s, used by tests verifying book
/// consistency without re-deriving the OrderBook Manager's internal state.
#[derive(Debug, Clone, Default)]
pub struct RenderedBook {
    pub bids: BTreeMap<Decimal, Decimal>,
    pub asks: BTreeMap<Decimal, Decimal>,
}

impl RenderedBook {
    pub fn from_snapshot(snapshot: &OrderBookSnapshot) -> Self {
        let mut book = Self::default();
        for level in &snapshot.bids {
            book.bids.insert(level.price, level.quantity);
        }
        for level in &snapshot.asks {
            book.asks.insert(level.price, level.quantity);
        }
        book
    }

    pub fn apply(&mut self, update: &OrderBookUpdate) {
        for level in &update.bid_changes {
            if level.is_removal() {
                self.bids.remove(&level.price);
            } else {
                self.bids.insert(level.price, level.quantity);
            }
        }
        for level in &update.ask_changes {
            if level.is_removal() {
                self.asks.remove(&level.price);
            } else {
                self.asks.insert(level.price, level.quantity);
            }
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// No negative quantity anywhere in the rendered book.
    pub fn has_negative_quantity(&self) -> bool {
        self.bids.values().any(|q| q.is_sign_negative())
            || self.asks.values().any(|q| q.is_sign_negative())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_update(first: u64, last: u64, prev_last: u64) -> OrderBookUpdate {
        OrderBookUpdate {
            exchange_id: ExchangeId::BinanceSpot,
            market_type: MarketType::Spot,
            symbol: Symbol::new("BTC", "USDT"),
            bid_changes: vec![OrderBookLevel::new(dec!(100), dec!(1))],
            ask_changes: vec![],
            first_update_id: first,
            last_update_id: last,
            prev_last_update_id: prev_last,
            update_type: UpdateType::Delta,
            event_ts: Utc::now(),
            collected_at: Utc::now(),
        }
    }

    #[test]
    fn rendered_book_applies_delta_removals() {
        let snapshot = OrderBookSnapshot {
            exchange_id: ExchangeId::BinanceSpot,
            market_type: MarketType::Spot,
            symbol: Symbol::new("BTC", "USDT"),
            bids: vec![OrderBookLevel::new(dec!(100), dec!(1))],
            asks: vec![OrderBookLevel::new(dec!(101), dec!(1))],
            last_update_id: 1,
            event_ts: Utc::now(),
            depth_levels: 1,
            collected_at: Utc::now(),
        };
        let mut book = RenderedBook::from_snapshot(&snapshot);
        assert_eq!(book.best_bid(), Some(dec!(100)));

        let mut removal = sample_update(2, 2, 1);
        removal.bid_changes = vec![OrderBookLevel::new(dec!(100), dec!(0))];
        book.apply(&removal);

        assert_eq!(book.best_bid(), None);
        assert!(!book.has_negative_quantity());
    }

    #[test]
    fn snapshot_is_crossed_when_bid_not_below_ask() {
        let mut snapshot = OrderBookSnapshot {
            exchange_id: ExchangeId::OkxSpot,
            market_type: MarketType::Spot,
            symbol: Symbol::new("ETH", "USDT"),
            bids: vec![OrderBookLevel::new(dec!(100), dec!(1))],
            asks: vec![OrderBookLevel::new(dec!(99), dec!(1))],
            last_update_id: 1,
            event_ts: Utc::now(),
            depth_levels: 1,
            collected_at: Utc::now(),
        };
        assert!(snapshot.is_crossed());

        snapshot.asks[0].price = dec!(101);
        assert!(!snapshot.is_crossed());
    }

    #[test]
    fn canonical_record_data_type_matches_subject_scheme() {
        let trade = CanonicalRecord::from(Trade {
            exchange_id: ExchangeId::DeribitDerivatives,
            market_type: MarketType::Perpetual,
            symbol: Symbol::new("BTC", "PERPETUAL"),
            trade_id: "1".into(),
            price: dec!(1),
            quantity: dec!(1),
            quote_quantity: dec!(1),
            side: Side::Buy,
            is_buyer_maker: false,
            event_ts: Utc::now(),
            collected_at: Utc::now(),
        });
        assert_eq!(trade.data_type(), "trade");
    }
}
