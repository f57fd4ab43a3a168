//! Per-symbol order-book state machine (spec §4.3): maintains a full book
//! from snapshot+delta, enforces the sequence invariant, and emits
//! sequence-consistent [`OrderBookUpdate`]/[`OrderBookSnapshot`] records.
//!
//! Each [`SymbolBook`] is exclusively owned by the worker that drives it
//! (spec §5 "no locking is required on the per-symbol maps"); other
//! components read book contents only via the canonical records it emits.

use super::{
    map::{Asks, Bids},
    sequencer::{ContinuityFields, SequenceValidator},
    strategy::DepthStrategy,
};
use crate::error::DataError;
use crate::model::{OrderBookLevel, OrderBookSnapshot, OrderBookUpdate, UpdateType};
use chrono::{DateTime, Utc};
use marketline_instrument::{ExchangeId, MarketType, Symbol};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::warn;

/// One venue delta as received, prior to the manager assigning the
/// canonical `prev_last_update_id` it will emit.
#[derive(Debug, Clone)]
pub struct InboundDelta {
    pub bid_changes: Vec<OrderBookLevel>,
    pub ask_changes: Vec<OrderBookLevel>,
    pub first_update_id: u64,
    pub last_update_id: u64,
    pub prev_update_id: Option<u64>,
    pub event_ts: DateTime<Utc>,
}

impl InboundDelta {
    fn continuity_fields(&self) -> ContinuityFields {
        ContinuityFields {
            first_update_id: self.first_update_id,
            last_update_id: self.last_update_id,
            prev_update_id: self.prev_update_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BookState {
    Init,
    Syncing,
    Synced,
    Rebuilding,
    Failed,
}

const DEFAULT_DELTA_BUFFER_CAPACITY: usize = 1000;
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const REBUILD_WINDOW: Duration = Duration::from_secs(10 * 60);
const REBUILD_CAP: usize = 5;

/// What the manager asks its caller to do after feeding it an event.
#[derive(Debug, Clone)]
pub enum BookAction {
    /// Nothing to publish yet (still buffering during sync).
    None,
    /// A validated record ready for the Publisher.
    Emit(Box<BookEmission>),
    /// The book needs a fresh REST/in-band snapshot; the caller (which owns
    /// the injected snapshot client, not this manager) must fetch one and
    /// call [`SymbolBook::on_snapshot`].
    RequestSnapshot { depth: usize },
    /// The symbol exceeded its rebuild cap within the trailing window and is
    /// now quarantined; an operator-visible alert must be raised.
    Quarantined,
}

#[derive(Debug, Clone)]
pub enum BookEmission {
    Snapshot(OrderBookSnapshot),
    Update(OrderBookUpdate),
}

pub struct SymbolBook {
    exchange_id: ExchangeId,
    market_type: MarketType,
    symbol: Symbol,
    sequencer: Box<dyn SequenceValidator>,
    strategy: DepthStrategy,
    state: BookState,
    bids: Bids,
    asks: Asks,
    last_update_id: u64,
    last_emitted_last_update_id: Option<u64>,
    pending: VecDeque<InboundDelta>,
    pending_capacity: usize,
    overflow_count: u64,
    last_message_at: Instant,
    rebuilds: VecDeque<Instant>,
}

impl std::fmt::Debug for SymbolBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolBook")
            .field("exchange_id", &self.exchange_id)
            .field("symbol", &self.symbol)
            .field("state", &self.state)
            .field("last_update_id", &self.last_update_id)
            .finish()
    }
}

impl SymbolBook {
    pub fn new(
        exchange_id: ExchangeId,
        market_type: MarketType,
        symbol: Symbol,
        sequencer: Box<dyn SequenceValidator>,
        strategy: DepthStrategy,
    ) -> Self {
        Self {
            exchange_id,
            market_type,
            symbol,
            sequencer,
            strategy,
            state: BookState::Init,
            bids: Bids::default(),
            asks: Asks::default(),
            last_update_id: 0,
            last_emitted_last_update_id: None,
            pending: VecDeque::new(),
            pending_capacity: DEFAULT_DELTA_BUFFER_CAPACITY,
            overflow_count: 0,
            last_message_at: Instant::now(),
            rebuilds: VecDeque::new(),
        }
    }

    pub fn state(&self) -> BookState {
        self.state
    }

    pub fn strategy(&self) -> DepthStrategy {
        self.strategy
    }

    /// Strategy switching (spec §4.3.1): resets the state machine to INIT.
    pub fn set_strategy(&mut self, strategy: DepthStrategy) {
        self.strategy = strategy;
        self.reset_to_init();
    }

    fn reset_to_init(&mut self) {
        self.state = BookState::Init;
        self.bids = Bids::default();
        self.asks = Asks::default();
        self.pending.clear();
        self.last_emitted_last_update_id = None;
    }

    /// Feed one venue delta. Returns the action the caller must take.
    pub fn on_delta(&mut self, delta: InboundDelta, now: Instant) -> Result<BookAction, DataError> {
        self.last_message_at = now;

        match self.state {
            BookState::Init => {
                self.state = BookState::Syncing;
                self.buffer(delta);
                Ok(BookAction::RequestSnapshot {
                    depth: self.strategy.snapshot_depth,
                })
            }
            BookState::Syncing | BookState::Rebuilding => {
                self.buffer(delta);
                Ok(BookAction::None)
            }
            BookState::Synced => {
                let fields = delta.continuity_fields();
                if !self.sequencer.validates_continuity(fields, self.last_update_id) {
                    return Ok(self.trigger_rebuild(now));
                }
                if delta.last_update_id <= self.last_update_id {
                    // Re-delivery of an already-applied id: idempotent no-op.
                    return Ok(BookAction::None);
                }
                Ok(self.apply_and_emit(delta))
            }
            BookState::Failed => Err(DataError::Quarantined {
                exchange_id: self.exchange_id,
                symbol: self.symbol.clone(),
            }),
        }
    }

    /// Feed a freshly-fetched or venue-pushed snapshot with id `snapshot_id`.
    pub fn on_snapshot(
        &mut self,
        levels: (Vec<OrderBookLevel>, Vec<OrderBookLevel>),
        snapshot_id: u64,
        event_ts: DateTime<Utc>,
        collected_at: DateTime<Utc>,
    ) -> BookAction {
        let (bids, asks) = levels;
        self.bids.replace_from(&bids);
        self.asks.replace_from(&asks);
        self.last_update_id = snapshot_id;
        self.last_emitted_last_update_id = None;

        // Discard buffered deltas whose last_update_id <= snapshot_id (spec §4.3 step 3).
        while matches!(self.pending.front(), Some(d) if d.last_update_id <= snapshot_id) {
            self.pending.pop_front();
        }

        if let Some(first) = self.pending.front() {
            if !self
                .sequencer
                .validates_initial_delta(snapshot_id, first.continuity_fields())
            {
                self.pending.clear();
                self.state = BookState::Syncing;
                return BookAction::RequestSnapshot {
                    depth: self.strategy.snapshot_depth,
                };
            }
        }

        self.state = BookState::Synced;
        let snapshot = OrderBookSnapshot {
            exchange_id: self.exchange_id,
            market_type: self.market_type,
            symbol: self.symbol.clone(),
            bids: self.bids.top_n(self.strategy.publish_depth),
            asks: self.asks.top_n(self.strategy.publish_depth),
            last_update_id: snapshot_id,
            event_ts,
            depth_levels: self.strategy.snapshot_depth,
            collected_at,
        };

        // Drain and apply any deltas retained across the resync window.
        while let Some(buffered) = self.pending.pop_front() {
            self.apply_levels(&buffered);
            self.last_update_id = buffered.last_update_id;
        }

        BookAction::Emit(Box::new(BookEmission::Snapshot(snapshot)))
    }

    /// Inactivity/no-frame-received check (spec §4.3 "Inactivity > 5 min
    /// without any frame: trigger rebuild").
    pub fn check_inactivity(&mut self, now: Instant) -> BookAction {
        if matches!(self.state, BookState::Synced)
            && now.duration_since(self.last_message_at) > INACTIVITY_TIMEOUT
        {
            self.trigger_rebuild(now)
        } else {
            BookAction::None
        }
    }

    fn buffer(&mut self, delta: InboundDelta) {
        if self.pending.len() >= self.pending_capacity {
            self.pending.pop_front();
            self.overflow_count += 1;
        }
        self.pending.push_back(delta);
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    fn apply_levels(&mut self, delta: &InboundDelta) {
        for level in &delta.bid_changes {
            self.bids.apply(level.price, level.quantity);
        }
        for level in &delta.ask_changes {
            self.asks.apply(level.price, level.quantity);
        }
    }

    fn apply_and_emit(&mut self, delta: InboundDelta) -> BookAction {
        self.apply_levels(&delta);
        self.last_update_id = delta.last_update_id;

        let prev_last_update_id = self.last_emitted_last_update_id.unwrap_or(delta.first_update_id.saturating_sub(1));
        self.last_emitted_last_update_id = Some(delta.last_update_id);

        let update = OrderBookUpdate {
            exchange_id: self.exchange_id,
            market_type: self.market_type,
            symbol: self.symbol.clone(),
            bid_changes: delta.bid_changes,
            ask_changes: delta.ask_changes,
            first_update_id: delta.first_update_id,
            last_update_id: delta.last_update_id,
            prev_last_update_id,
            update_type: UpdateType::Delta,
            event_ts: delta.event_ts,
            collected_at: Utc::now(),
        };
        BookAction::Emit(Box::new(BookEmission::Update(update)))
    }

    /// Snapshot-polling mode emission (spec §4.3 "Emission mode").
    pub fn poll_snapshot(&self, event_ts: DateTime<Utc>, collected_at: DateTime<Utc>) -> OrderBookSnapshot {
        OrderBookSnapshot {
            exchange_id: self.exchange_id,
            market_type: self.market_type,
            symbol: self.symbol.clone(),
            bids: self.bids.top_n(self.strategy.publish_depth),
            asks: self.asks.top_n(self.strategy.publish_depth),
            last_update_id: self.last_update_id,
            event_ts,
            depth_levels: self.strategy.publish_depth,
            collected_at,
        }
    }

    fn trigger_rebuild(&mut self, now: Instant) -> BookAction {
        while matches!(self.rebuilds.front(), Some(t) if now.duration_since(*t) > REBUILD_WINDOW) {
            self.rebuilds.pop_front();
        }
        self.rebuilds.push_back(now);

        if self.rebuilds.len() > REBUILD_CAP {
            self.state = BookState::Failed;
            warn!(
                exchange_id = %self.exchange_id,
                symbol = %self.symbol,
                "order book exceeded rebuild cap, quarantining symbol"
            );
            return BookAction::Quarantined;
        }

        self.state = BookState::Rebuilding;
        self.pending.clear();
        BookAction::RequestSnapshot {
            depth: self.strategy.snapshot_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::books::sequencer::BinanceSequencer;
    use crate::books::strategy::DepthStrategyName;
    use rust_decimal_macros::dec;

    fn book() -> SymbolBook {
        SymbolBook::new(
            ExchangeId::BinanceSpot,
            MarketType::Spot,
            Symbol::new("BTC", "USDT"),
            Box::new(BinanceSequencer),
            DepthStrategyName::MarketMaking.resolve(ExchangeId::BinanceSpot),
        )
    }

    fn delta(first: u64, last: u64) -> InboundDelta {
        InboundDelta {
            bid_changes: vec![OrderBookLevel::new(dec!(100), dec!(1))],
            ask_changes: vec![],
            first_update_id: first,
            last_update_id: last,
            prev_update_id: None,
            event_ts: Utc::now(),
        }
    }

    #[test]
    fn first_delta_requests_snapshot_and_buffers() {
        let mut book = book();
        let action = book.on_delta(delta(1, 5), Instant::now()).unwrap();
        assert!(matches!(action, BookAction::RequestSnapshot { .. }));
        assert_eq!(book.state(), BookState::Syncing);
    }

    #[test]
    fn snapshot_then_steady_state_deltas_emit_in_sequence() {
        let mut book = book();
        book.on_delta(delta(101, 110), Instant::now()).unwrap();

        let action = book.on_snapshot(
            (vec![OrderBookLevel::new(dec!(100), dec!(1))], vec![]),
            100,
            Utc::now(),
            Utc::now(),
        );
        assert!(matches!(action, BookAction::Emit(_)));
        assert_eq!(book.state(), BookState::Synced);

        let action = book.on_delta(delta(111, 120), Instant::now()).unwrap();
        let BookAction::Emit(emission) = action else {
            panic!("expected emission");
        };
        let BookEmission::Update(update) = *emission else {
            panic!("expected update");
        };
        assert_eq!(update.prev_last_update_id, 110);
        assert_eq!(update.last_update_id, 120);
    }

    #[test]
    fn gap_triggers_rebuild_without_emission() {
        let mut book = book();
        book.on_delta(delta(101, 110), Instant::now()).unwrap();
        book.on_snapshot(
            (vec![OrderBookLevel::new(dec!(100), dec!(1))], vec![]),
            100,
            Utc::now(),
            Utc::now(),
        );

        let action = book.on_delta(delta(115, 120), Instant::now()).unwrap();
        assert!(matches!(action, BookAction::RequestSnapshot { .. }));
        assert_eq!(book.state(), BookState::Rebuilding);
    }

    #[test]
    fn duplicate_last_update_id_is_ignored() {
        let mut book = book();
        book.on_delta(delta(101, 110), Instant::now()).unwrap();
        book.on_snapshot(
            (vec![OrderBookLevel::new(dec!(100), dec!(1))], vec![]),
            110,
            Utc::now(),
            Utc::now(),
        );
        let action = book.on_delta(delta(101, 110), Instant::now()).unwrap();
        assert!(matches!(action, BookAction::None));
    }

    #[test]
    fn rebuild_cap_quarantines_symbol() {
        let mut book = book();
        book.on_delta(delta(101, 110), Instant::now()).unwrap();
        book.on_snapshot(
            (vec![OrderBookLevel::new(dec!(100), dec!(1))], vec![]),
            100,
            Utc::now(),
            Utc::now(),
        );

        let now = Instant::now();
        let mut last_action = BookAction::None;
        for i in 0..6 {
            last_action = book.on_delta(delta(500 + i, 500 + i), now).unwrap();
        }
        assert!(matches!(last_action, BookAction::Quarantined));
        assert_eq!(book.state(), BookState::Failed);

        let err = book.on_delta(delta(1, 1), now).unwrap_err();
        assert!(matches!(err, DataError::Quarantined { .. }));
    }
}
