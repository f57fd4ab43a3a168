/// Implemented by transport errors so a generic caller (eg/ [`crate::channel::ChannelTxDroppable`])
/// can decide whether to keep retrying or give up.
pub trait Unrecoverable {
    fn is_unrecoverable(&self) -> bool;
}

/// Transport-level error shared by every venue adapter's WebSocket session and
/// REST polling client.
///
/// Maps onto the `TransientNetworkError`/`ProtocolError`/`ConfigError`
/// abstract kinds at the transport boundary; component-specific error kinds
/// (`SequenceGapError`, `BusError`, `StoreError`, ...) are defined in the
/// crates that own those components and wrap a [`TransportError`] via `#[from]`
/// where relevant.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to parse URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("WebSocket connect failed: {0}")]
    WsConnect(#[source] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("WebSocket handshake rejected (auth): {0}")]
    WsAuth(String),

    #[error("WebSocket transport error: {0}")]
    WsTransport(#[source] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("unknown channel/subscription requested: {0}")]
    UnknownChannel(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request timed out after {0:?}")]
    HttpTimeout(std::time::Duration),

    #[error("failed to deserialise response body: {error}")]
    DeserialiseBinary {
        #[source]
        error: serde_json::Error,
        payload: Vec<u8>,
    },

    #[error("venue signalled a rate limit: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WsConnect(Box::new(error))
    }
}

impl Unrecoverable for TransportError {
    fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            TransportError::UrlParse(_)
                | TransportError::WsAuth(_)
                | TransportError::UnknownChannel(_)
        )
    }
}
