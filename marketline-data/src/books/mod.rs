//! OrderBook Manager (C3): per-symbol full book reconstruction from
//! snapshot+delta streams, sequence invariant enforcement and emission.

pub mod manager;
pub mod map;
pub mod sequencer;
pub mod strategy;

pub use manager::{BookAction, BookEmission, BookState, InboundDelta, SymbolBook};
pub use sequencer::SequenceValidator;
pub use strategy::{DepthStrategy, DepthStrategyName};

use crate::error::DataError;
use crate::snapshot_client::SnapshotClient;
use fnv::FnvHashMap;
use marketline_instrument::{ExchangeId, MarketType, Symbol};
use std::time::Instant;
use tracing::{error, warn};

/// Owns the order-book state for a shard of (exchange, symbol) pairs routed
/// to this worker by the hash-sharded dispatch described in spec §5. No
/// locking: this manager is the sole owner of every [`SymbolBook`] in its
/// shard.
pub struct OrderBookManager<Snap> {
    books: FnvHashMap<(ExchangeId, Symbol), SymbolBook>,
    snapshot_client: Snap,
}

impl<Snap> OrderBookManager<Snap>
where
    Snap: SnapshotClient,
{
    pub fn new(snapshot_client: Snap) -> Self {
        Self {
            books: FnvHashMap::default(),
            snapshot_client,
        }
    }

    pub fn register(
        &mut self,
        exchange_id: ExchangeId,
        market_type: MarketType,
        symbol: Symbol,
        sequencer: Box<dyn SequenceValidator>,
        strategy: DepthStrategy,
    ) {
        self.books.insert(
            (exchange_id, symbol.clone()),
            SymbolBook::new(exchange_id, market_type, symbol, sequencer, strategy),
        );
    }

    pub fn unsubscribe(&mut self, exchange_id: ExchangeId, symbol: &Symbol) {
        self.books.remove(&(exchange_id, symbol.clone()));
    }

    /// Feed one inbound delta for `(exchange_id, symbol)`, resolving any
    /// `RequestSnapshot` action via the injected [`SnapshotClient`] before
    /// returning the resulting emission, if any.
    pub async fn on_delta(
        &mut self,
        exchange_id: ExchangeId,
        symbol: &Symbol,
        delta: InboundDelta,
    ) -> Result<Option<BookEmission>, DataError> {
        let Some(book) = self.books.get_mut(&(exchange_id, symbol.clone())) else {
            warn!(%exchange_id, %symbol, "delta for unregistered symbol, dropping");
            return Ok(None);
        };

        let action = book.on_delta(delta, Instant::now())?;
        self.resolve(exchange_id, symbol, action).await
    }

    async fn resolve(
        &mut self,
        exchange_id: ExchangeId,
        symbol: &Symbol,
        action: BookAction,
    ) -> Result<Option<BookEmission>, DataError> {
        match action {
            BookAction::None => Ok(None),
            BookAction::Emit(emission) => Ok(Some(*emission)),
            BookAction::Quarantined => {
                error!(%exchange_id, %symbol, "order book quarantined, operator action required");
                Ok(None)
            }
            BookAction::RequestSnapshot { depth } => {
                let snapshot = self
                    .snapshot_client
                    .fetch_snapshot(exchange_id, symbol, depth)
                    .await?;
                let Some(book) = self.books.get_mut(&(exchange_id, symbol.clone())) else {
                    return Ok(None);
                };
                let action = book.on_snapshot(
                    (snapshot.bids, snapshot.asks),
                    snapshot.last_update_id,
                    snapshot.event_ts,
                    snapshot.collected_at,
                );
                Box::pin(self.resolve(exchange_id, symbol, action)).await
            }
        }
    }

    /// Periodic inactivity sweep; call on a timer (spec §4.3 "Inactivity >
    /// 5 min without any frame: trigger rebuild").
    pub async fn sweep_inactivity(&mut self) {
        let keys: Vec<_> = self.books.keys().cloned().collect();
        for (exchange_id, symbol) in keys {
            let Some(book) = self.books.get_mut(&(exchange_id, symbol.clone())) else {
                continue;
            };
            let action = book.check_inactivity(Instant::now());
            if let Err(error) = self.resolve(exchange_id, &symbol, action).await {
                error!(%exchange_id, %symbol, ?error, "inactivity sweep rebuild failed");
            }
        }
    }
}
