//! Exchange Session Manager (C1): one logical long-lived WebSocket per
//! `(ExchangeId, MarketType)`. Owns connect/ping/reconnect/resubscribe and
//! the proactive dual-connection smooth switch venues like Binance need to
//! avoid data loss across a forced 24h disconnect.

mod reconnect;
mod smooth;

pub use reconnect::ReconnectPolicy;
pub use smooth::SmoothReconnectConfig;

use crate::error::DataError;
use crate::exchange::{ChannelSubscription, ExchangeAdapter};
use marketline_instrument::{ExchangeId, MarketType};
use marketline_integration::channel::{ChannelTxDroppable, Tx};
use marketline_integration::protocol::websocket::{self, WsMessage, WsStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{info, warn};

/// Identifies one logical session for logging/metrics; sessions are
/// addressed by `(exchange_id, market_type)`, never by a raw connection id,
/// since a smooth reconnect replaces the underlying socket without
/// changing the session's identity.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SessionKey {
    pub exchange_id: ExchangeId,
    pub market_type: MarketType,
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.exchange_id.as_str(), self.market_type.as_str())
    }
}

/// What a session spec asks the manager to open: the venue adapter plus the
/// channel/symbol pairs it should subscribe to.
pub struct SessionSpec {
    pub key: SessionKey,
    pub adapter: Arc<dyn ExchangeAdapter>,
    pub subscriptions: Vec<ChannelSubscription>,
    pub reconnect: ReconnectPolicy,
    pub smooth: SmoothReconnectConfig,
    /// Binance-only: proactive reconnect age (23h55m). `None` for venues
    /// that don't force a connection ceiling (OKX, Deribit).
    pub proactive_reconnect_after: Option<Duration>,
}

/// One item a session's read loop hands upward, already past the
/// combined-stream envelope unwrap but before per-venue `parse_frame`.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Frame(WsMessage),
    Reconnecting,
    Reconnected { attempt: u32 },
    Closed,
}

/// Close handle returned by [`open`]; dropping it does not close the
/// session, `close` must be called explicitly so in-flight frames can
/// drain first.
pub struct SessionHandle {
    key: SessionKey,
    shutdown: Arc<Notify>,
}

impl SessionHandle {
    pub fn key(&self) -> SessionKey {
        self.key
    }
}

/// Open a session and spawn its run loop, delivering [`SessionEvent`]s to
/// `tx` until [`close`] is called or the task is aborted.
///
/// Connect failures on the *first* attempt are returned synchronously
/// ([`DataError::Connect`]/[`DataError::Auth`]/[`DataError::Config`]);
/// failures during a later reconnect are retried internally per
/// `spec.reconnect` and never surface to the caller.
pub async fn open<T>(spec: SessionSpec, tx: ChannelTxDroppable<T>) -> Result<SessionHandle, DataError>
where
    T: Tx<Item = SessionEvent> + Send + 'static,
{
    if spec.subscriptions.is_empty() {
        return Err(DataError::Config(format!(
            "session {} opened with no subscriptions",
            spec.key
        )));
    }

    let stream = connect_and_subscribe(&spec).await?;
    let shutdown = Arc::new(Notify::new());

    let handle = SessionHandle {
        key: spec.key,
        shutdown: shutdown.clone(),
    };

    tokio::spawn(run_loop(spec, stream, tx, shutdown));

    Ok(handle)
}

/// Graceful close: wakes the run loop's shutdown branch, which drains any
/// frame already read off the socket before the socket itself is closed.
pub async fn close(handle: SessionHandle) {
    info!(session = %handle.key, "closing session");
    handle.shutdown.notify_one();
}

async fn connect_and_subscribe(spec: &SessionSpec) -> Result<WsStream, DataError> {
    let url = spec
        .adapter
        .connect_url(&spec.subscriptions)
        .map_err(|error| DataError::Config(error.to_string()))?;

    let mut stream = websocket::connect(&url).await?;

    for frame in spec.adapter.subscribe(&spec.subscriptions) {
        websocket::send(&mut stream, frame).await?;
    }

    Ok(stream)
}

async fn run_loop<T>(
    spec: SessionSpec,
    mut stream: WsStream,
    mut tx: ChannelTxDroppable<T>,
    shutdown: Arc<Notify>,
)
where
    T: Tx<Item = SessionEvent> + Send + 'static,
{
    let keepalive = spec.adapter.keepalive_policy();
    let mut reconnect_state = spec.reconnect.clone().into_state();
    let mut last_frame_at = Instant::now();
    let session_opened_at = Instant::now();

    let mut ping_ticker = keepalive
        .ping_interval
        .map(|interval| tokio::time::interval(interval));

    loop {
        let inactivity_deadline = keepalive
            .inactivity_timeout
            .map(|timeout| last_frame_at + timeout);
        let proactive_deadline = spec
            .proactive_reconnect_after
            .map(|age| session_opened_at + age);

        tokio::select! {
            biased;

            _ = shutdown.notified() => {
                info!(session = %spec.key, "session shutdown requested, draining and closing");
                let _ = websocket::close(stream).await;
                tx.send(SessionEvent::Closed);
                return;
            }

            frame = websocket::next_frame(&mut stream) => {
                match frame {
                    Some(Ok(frame)) => {
                        last_frame_at = Instant::now();
                        tx.send(SessionEvent::Frame(frame));
                    }
                    Some(Err(error)) => {
                        warn!(session = %spec.key, %error, "session socket error, reconnecting");
                        tx.send(SessionEvent::Reconnecting);
                        match reconnect(&spec, &mut reconnect_state).await {
                            Some(new_stream) => {
                                stream = new_stream;
                                last_frame_at = Instant::now();
                                tx.send(SessionEvent::Reconnected { attempt: reconnect_state.attempts() });
                            }
                            None => {
                                tx.send(SessionEvent::Closed);
                                return;
                            }
                        }
                    }
                    None => {
                        warn!(session = %spec.key, "session socket closed by peer, reconnecting");
                        tx.send(SessionEvent::Reconnecting);
                        match reconnect(&spec, &mut reconnect_state).await {
                            Some(new_stream) => {
                                stream = new_stream;
                                last_frame_at = Instant::now();
                                tx.send(SessionEvent::Reconnected { attempt: reconnect_state.attempts() });
                            }
                            None => {
                                tx.send(SessionEvent::Closed);
                                return;
                            }
                        }
                    }
                }
            }

            _ = maybe_tick(&mut ping_ticker) => {
                if let Some(ping) = keepalive.ping_message.clone() {
                    if websocket::send(&mut stream, ping).await.is_err() {
                        warn!(session = %spec.key, "failed to send keep-alive ping, reconnecting");
                        tx.send(SessionEvent::Reconnecting);
                        match reconnect(&spec, &mut reconnect_state).await {
                            Some(new_stream) => stream = new_stream,
                            None => {
                                tx.send(SessionEvent::Closed);
                                return;
                            }
                        }
                    }
                }
            }

            _ = sleep_until_or_pending(inactivity_deadline) => {
                warn!(session = %spec.key, "no frame received within inactivity timeout, reconnecting");
                tx.send(SessionEvent::Reconnecting);
                match reconnect(&spec, &mut reconnect_state).await {
                    Some(new_stream) => {
                        stream = new_stream;
                        last_frame_at = Instant::now();
                        tx.send(SessionEvent::Reconnected { attempt: reconnect_state.attempts() });
                    }
                    None => {
                        tx.send(SessionEvent::Closed);
                        return;
                    }
                }
            }

            _ = sleep_until_or_pending(proactive_deadline) => {
                info!(session = %spec.key, "proactive reconnect age reached, starting smooth switch");
                match smooth::smooth_reconnect(&spec, &mut stream, &mut tx).await {
                    Ok(()) => {
                        reconnect_state.reset();
                        return Box::pin(run_loop(spec, stream, tx, shutdown)).await;
                    }
                    Err(error) => {
                        warn!(session = %spec.key, %error, "smooth reconnect failed, falling back to ordinary reconnect");
                        tx.send(SessionEvent::Reconnecting);
                        match reconnect(&spec, &mut reconnect_state).await {
                            Some(new_stream) => {
                                stream = new_stream;
                                last_frame_at = Instant::now();
                                tx.send(SessionEvent::Reconnected { attempt: reconnect_state.attempts() });
                            }
                            None => {
                                tx.send(SessionEvent::Closed);
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn maybe_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Unlimited-attempt reconnect loop: returns `None` only if the caller's
/// channel has been dropped (nobody left to deliver events to, so there's
/// no point retrying forever).
async fn reconnect(spec: &SessionSpec, state: &mut reconnect::ReconnectState) -> Option<WsStream> {
    loop {
        match connect_and_subscribe(spec).await {
            Ok(stream) => {
                state.reset();
                return Some(stream);
            }
            Err(error) => {
                warn!(session = %spec.key, %error, attempt = state.attempts(), "reconnect attempt failed");
                let sleep_for = state.next_delay();
                tokio::time::sleep(sleep_for).await;
            }
        }
    }
}
