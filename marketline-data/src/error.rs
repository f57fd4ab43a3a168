//! Component-level error kinds for session management, normalization and
//! order-book reconstruction. Maps onto the abstract error kinds of spec §7:
//! `TransientNetworkError`/`ProtocolError` are carried by
//! [`marketline_integration::error::TransportError`] and wrapped here;
//! `SequenceGapError`, `ConfigError`, `RateLimitError` and
//! `FatalInvariantViolation` are first-class variants since the components
//! that raise them (OrderBook Manager, Session Manager, Poller) live in this
//! crate.

use marketline_instrument::{ExchangeId, Symbol};
use marketline_integration::error::TransportError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("failed to reach venue endpoint: {0}")]
    Connect(#[source] TransportError),

    #[error("venue rejected the session handshake: {0}")]
    Auth(String),

    #[error("session spec references an unknown channel: {0}")]
    Config(String),

    #[error(
        "order book sequence invariant broken for {exchange_id}/{symbol}: expected prev_last_update_id {expected}, got {actual}"
    )]
    SequenceGap {
        exchange_id: ExchangeId,
        symbol: Symbol,
        expected: u64,
        actual: u64,
    },

    #[error("venue signalled a rate limit, retry after {retry_after:?}")]
    RateLimit { retry_after: Option<Duration> },

    #[error("fatal invariant violation for {exchange_id}/{symbol}: {reason}")]
    FatalInvariant {
        exchange_id: ExchangeId,
        symbol: Symbol,
        reason: String,
    },

    #[error("symbol {exchange_id}/{symbol} quarantined after exceeding the rebuild cap")]
    Quarantined {
        exchange_id: ExchangeId,
        symbol: Symbol,
    },
}

impl From<TransportError> for DataError {
    fn from(error: TransportError) -> Self {
        DataError::Connect(error)
    }
}
