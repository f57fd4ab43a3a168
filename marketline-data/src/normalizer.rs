//! Normalizer (C2): decodes session frames into canonical records and
//! order-book deltas. Workers are sharded per `(ExchangeId, Symbol)` so
//! ordering is preserved within a symbol without any locking - each shard
//! owns its own [`OrderBookManager`] slice (spec §5).

use crate::books::{BookEmission, OrderBookManager};
use crate::error::DataError;
use crate::exchange::{DepthFrame, ExchangeAdapter};
use crate::model::CanonicalRecord;
use crate::session::SessionEvent;
use crate::snapshot_client::SnapshotClient;
use chrono::Utc;
use futures::StreamExt;
use marketline_instrument::{ExchangeId, Symbol};
use marketline_integration::channel::{ChannelTxDroppable, Tx, UnboundedRx};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::warn;

/// Route `(exchange_id, symbol)` to one of `shard_count` normalizer
/// workers. The same pair always maps to the same shard, which is what
/// gives per-symbol ordering without locking.
pub fn shard_for(exchange_id: ExchangeId, symbol: &Symbol, shard_count: usize) -> usize {
    let mut hasher = fnv::FnvHasher::default();
    exchange_id.hash(&mut hasher);
    symbol.hash(&mut hasher);
    (hasher.finish() as usize) % shard_count.max(1)
}

/// Drains one shard's session-event channel, decoding frames via `adapter`
/// and feeding depth frames through `books`, emitting every resulting
/// [`CanonicalRecord`] on `out`. Runs until the channel closes (the
/// session(s) feeding this shard have shut down) or a session explicitly
/// signals [`SessionEvent::Closed`].
pub async fn run_worker<Snap, ChannelTx>(adapter: Arc<dyn ExchangeAdapter>, mut rx: UnboundedRx<SessionEvent>, mut books: OrderBookManager<Snap>, mut out: ChannelTxDroppable<ChannelTx>)
where
    Snap: SnapshotClient,
    ChannelTx: Tx<Item = CanonicalRecord>,
{
    let exchange_id = adapter.exchange_id();

    while let Some(event) = rx.next().await {
        match event {
            SessionEvent::Frame(frame) => {
                match adapter.parse_frame(&frame, Utc::now()) {
                    Ok(records) => {
                        for record in records {
                            out.send(record);
                        }
                    }
                    Err(error) => {
                        warn!(%exchange_id, reason = error.drop_reason(), %error, "dropping unparseable frame");
                    }
                }

                match adapter.parse_depth_frame(&frame) {
                    Ok(depth_frames) => {
                        for depth_frame in depth_frames {
                            if let Err(error) = handle_depth_frame(exchange_id, &mut books, depth_frame, &mut out).await {
                                warn!(%exchange_id, %error, "order book update failed");
                            }
                        }
                    }
                    Err(error) => {
                        warn!(%exchange_id, reason = error.drop_reason(), %error, "dropping unparseable depth frame");
                    }
                }
            }
            SessionEvent::Reconnecting | SessionEvent::Reconnected { .. } => {
                // Session-level transitions; health reporting is owned by
                // whoever holds the shared `HealthRegistry`, not this worker.
            }
            SessionEvent::Closed => return,
        }
    }
}

async fn handle_depth_frame<Snap, ChannelTx>(exchange_id: ExchangeId, books: &mut OrderBookManager<Snap>, depth_frame: DepthFrame, out: &mut ChannelTxDroppable<ChannelTx>) -> Result<(), DataError>
where
    Snap: SnapshotClient,
    ChannelTx: Tx<Item = CanonicalRecord>,
{
    if let Some(emission) = books.on_delta(exchange_id, &depth_frame.symbol, depth_frame.delta).await? {
        out.send(match emission {
            BookEmission::Snapshot(snapshot) => CanonicalRecord::from(snapshot),
            BookEmission::Update(update) => CanonicalRecord::from(update),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketline_instrument::ExchangeId;

    #[test]
    fn same_symbol_always_maps_to_the_same_shard() {
        let symbol = Symbol::new("BTC", "USDT");
        let first = shard_for(ExchangeId::BinanceSpot, &symbol, 8);
        let second = shard_for(ExchangeId::BinanceSpot, &symbol, 8);
        assert_eq!(first, second);
        assert!(first < 8);
    }

    #[test]
    fn shard_count_of_zero_does_not_panic() {
        let symbol = Symbol::new("ETH", "USDT");
        let shard = shard_for(ExchangeId::OkxSpot, &symbol, 0);
        assert_eq!(shard, 0);
    }
}
