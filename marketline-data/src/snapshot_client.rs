//! Injected REST snapshot client (spec §9 redesign: "Book manager requests
//! REST snapshots via an injected snapshot client, not by reaching back into
//! the Session Manager"). Breaks the Session Manager <-> OrderBook Manager
//! cycle the teacher's `Connector`/`StreamSelector` machinery allowed.

use crate::error::DataError;
use crate::model::OrderBookSnapshot;
use marketline_instrument::{ExchangeId, Symbol};
use marketline_integration::protocol::http::RestClient;
use std::future::Future;

/// Fetches a point-in-time order-book snapshot for `(exchange_id, symbol)`
/// at or below `depth` levels per side.
pub trait SnapshotClient: Send + Sync {
    fn fetch_snapshot(
        &self,
        exchange_id: ExchangeId,
        symbol: &Symbol,
        depth: usize,
    ) -> impl Future<Output = Result<OrderBookSnapshot, DataError>> + Send;
}

/// One [`SnapshotClient`] per venue, dispatched by [`ExchangeId`]. Each venue
/// adapter supplies its own REST snapshot request shape against a shared
/// [`RestClient`].
///
/// `Clone`: every shard's [`crate::books::OrderBookManager`] takes its
/// `Snap` by value, so the control plane clones one set of venue REST
/// clients across however many normalizer shards it spawns.
#[derive(Clone)]
pub struct VenueSnapshotClients {
    pub binance: RestClient,
    pub okx: RestClient,
    pub deribit: RestClient,
}

impl SnapshotClient for VenueSnapshotClients {
    async fn fetch_snapshot(
        &self,
        exchange_id: ExchangeId,
        symbol: &Symbol,
        depth: usize,
    ) -> Result<OrderBookSnapshot, DataError> {
        match exchange_id {
            ExchangeId::BinanceSpot => {
                crate::exchange::binance::fetch_spot_depth_snapshot(&self.binance, symbol, depth).await
            }
            ExchangeId::BinanceDerivatives => {
                crate::exchange::binance::fetch_futures_depth_snapshot(&self.binance, symbol, depth).await
            }
            ExchangeId::OkxSpot | ExchangeId::OkxDerivatives => {
                crate::exchange::okx::fetch_depth_snapshot(&self.okx, exchange_id, symbol, depth).await
            }
            ExchangeId::DeribitDerivatives => {
                crate::exchange::deribit::fetch_depth_snapshot(&self.deribit, symbol, depth).await
            }
        }
    }
}
