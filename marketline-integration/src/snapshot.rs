use derive_more::{Constructor, From};
use serde::{Deserialize, Serialize};

/// Marks a value as having been sourced from a point-in-time snapshot rather
/// than an incremental update, so callers can tell the two apart without a
/// separate enum at every call site.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor, From,
)]
pub struct Snapshot<T>(pub T);

impl<T> Snapshot<T> {
    pub fn value(&self) -> &T {
        &self.0
    }

    pub fn map<F, N>(self, op: F) -> Snapshot<N>
    where
        F: FnOnce(T) -> N,
    {
        let Self(item) = self;
        Snapshot(op(item))
    }
}

/// Pairs an initial [`Snapshot`] with the stream of updates that follow it;
/// used by the OrderBook Manager's initial synchronisation to carry
/// the snapshot and the buffered deltas retained past it together.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct SnapUpdates<Snap, Updates> {
    pub snapshot: Snap,
    pub updates: Updates,
}
