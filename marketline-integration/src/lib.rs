//! Transport plumbing shared by every crate in the workspace: the channel
//! primitives that decouple a session's read loop from its consumer, a
//! priority-aware rate limiter, the `Snapshot`/`SnapUpdates` wrappers used
//! wherever a stream begins from a point-in-time state, and the WebSocket /
//! REST clients venue adapters are built on top of.
//!
//! Nothing in this crate knows about a specific exchange, market type, or
//! wire format - those live in `marketline-data`.

pub mod channel;
pub mod error;
pub mod protocol;
pub mod rate_limit;
pub mod snapshot;

pub use channel::{Channel, ChannelState, ChannelTxDroppable, Tx, UnboundedRx, UnboundedTx};
pub use error::{TransportError, Unrecoverable};
pub use rate_limit::{Priority, RateLimiter};
pub use snapshot::{SnapUpdates, Snapshot};
