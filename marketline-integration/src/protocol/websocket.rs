use crate::error::TransportError;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use url::Url;

/// Re-export of the underlying WebSocket message type so venue adapters
/// don't need a direct `tokio-tungstenite` dependency of their own.
pub type WsMessage = tungstenite::Message;

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Venue-declared keep-alive contract.
///
/// `ping_interval` is `None` for venues that rely purely on the protocol-level
/// pong (none of Binance/OKX/Deribit as specified, but the type stays generic
/// so a future venue adapter can opt out).
#[derive(Debug, Clone)]
pub struct KeepAlivePolicy {
    pub ping_interval: Option<Duration>,
    pub ping_message: Option<WsMessage>,
    /// If no frame (of any kind) is received within this window, the session
    /// is considered dead and reconnect is triggered (OKX: 5 min).
    pub inactivity_timeout: Option<Duration>,
}

impl KeepAlivePolicy {
    pub fn none() -> Self {
        Self {
            ping_interval: None,
            ping_message: None,
            inactivity_timeout: None,
        }
    }
}

/// Connect a plain (non-authenticated) WebSocket session to `url`.
///
/// On success the caller owns the split `WsStream` and drives its own
/// read/write loops (one read loop, one write loop per session).
pub async fn connect(url: &Url) -> Result<WsStream, TransportError> {
    let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|error| match error {
            tungstenite::Error::Http(ref response)
                if response.status().is_client_error() && response.status().as_u16() == 401
                    || response.status().as_u16() == 403 =>
            {
                TransportError::WsAuth(format!("handshake rejected: {}", response.status()))
            }
            other => TransportError::from(other),
        })?;

    if response.status().is_client_error() {
        return Err(TransportError::WsAuth(format!(
            "handshake rejected: {}",
            response.status()
        )));
    }

    Ok(stream)
}

/// Send a single message over an already-connected `WsStream`.
pub async fn send(stream: &mut WsStream, message: WsMessage) -> Result<(), TransportError> {
    stream
        .send(message)
        .await
        .map_err(|error| TransportError::WsTransport(Box::new(error)))
}

/// Drain any buffered outbound frames and perform a graceful close.
pub async fn close(mut stream: WsStream) -> Result<(), TransportError> {
    stream
        .close(None)
        .await
        .map_err(|error| TransportError::WsTransport(Box::new(error)))
}

/// Pull the next text/binary frame, skipping ping/pong/close control frames
/// transparently (tokio-tungstenite answers pings automatically).
pub async fn next_frame(stream: &mut WsStream) -> Option<Result<WsMessage, TransportError>> {
    loop {
        match stream.next().await? {
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => continue,
            Ok(message) => return Some(Ok(message)),
            Err(error) => return Some(Err(TransportError::WsTransport(Box::new(error)))),
        }
    }
}
