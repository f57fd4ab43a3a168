//! Smooth reconnection (spec §4.1.1): bring up a second WebSocket fully
//! live before tearing down the first, so a proactive or forced reconnect
//! never drops a frame. Used for Binance's 24h forced disconnect; any
//! venue can opt in by setting `proactive_reconnect_after`.

use super::{connect_and_subscribe, SessionEvent, SessionSpec};
use crate::error::DataError;
use marketline_integration::channel::{ChannelTxDroppable, Tx};
use marketline_integration::protocol::websocket::{self, WsMessage, WsStream};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct SmoothReconnectConfig {
    /// Ring buffer capacity while the old socket is the only live one;
    /// overflow discards the oldest frame and increments a counter.
    pub buffer_capacity: usize,
    /// Fixed window after the new socket is up during which both sockets
    /// may deliver frames.
    pub overlap: Duration,
    /// Hard ceiling on the whole dual-connection window; past this the
    /// caller falls back to an ordinary (single-connection) reconnect.
    pub max_dual_connection: Duration,
}

impl Default for SmoothReconnectConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            overlap: Duration::from_secs(2),
            max_dual_connection: Duration::from_secs(30),
        }
    }
}

struct RingBuffer {
    frames: VecDeque<WsMessage>,
    capacity: usize,
    overflow_count: u64,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            overflow_count: 0,
        }
    }

    fn push(&mut self, frame: WsMessage) {
        if self.frames.len() >= self.capacity {
            self.frames.pop_front();
            self.overflow_count += 1;
        }
        self.frames.push_back(frame);
    }
}

/// Run the dual-connection switch against the caller's `old_stream`. On
/// success `old_stream` is replaced with the new, now-primary socket and
/// every frame buffered during the switch has already been forwarded to
/// `tx` in receive order.
pub async fn smooth_reconnect<T>(
    spec: &SessionSpec,
    old_stream: &mut WsStream,
    tx: &mut ChannelTxDroppable<T>,
) -> Result<(), DataError>
where
    T: Tx<Item = SessionEvent> + Send + 'static,
{
    let deadline = Instant::now() + spec.smooth.max_dual_connection;
    let mut buffer = RingBuffer::new(spec.smooth.buffer_capacity);

    let mut new_stream = {
        let connect_fut = connect_and_subscribe(spec);
        tokio::pin!(connect_fut);

        loop {
            tokio::select! {
                biased;

                result = &mut connect_fut => break result?,

                frame = websocket::next_frame(old_stream) => {
                    buffer_frame(&mut buffer, frame, spec);
                }

                _ = tokio::time::sleep_until(deadline) => {
                    return Err(DataError::Config(
                        "smooth reconnect exceeded max dual-connection duration before the new socket came up".into(),
                    ));
                }
            }
        }
    };

    let overlap_deadline = Instant::now() + spec.smooth.overlap;
    loop {
        if Instant::now() >= overlap_deadline {
            break;
        }
        if Instant::now() >= deadline {
            let _ = websocket::close(new_stream).await;
            return Err(DataError::Config(
                "smooth reconnect exceeded max dual-connection duration during overlap".into(),
            ));
        }

        tokio::select! {
            biased;

            frame = websocket::next_frame(old_stream) => {
                buffer_frame(&mut buffer, frame, spec);
            }

            frame = websocket::next_frame(&mut new_stream) => {
                buffer_frame(&mut buffer, frame, spec);
            }

            _ = tokio::time::sleep_until(overlap_deadline) => break,
        }
    }

    if buffer.overflow_count > 0 {
        warn!(
            session = %spec.key,
            dropped = buffer.overflow_count,
            "smooth reconnect ring buffer overflowed, oldest frames were discarded"
        );
    }

    for frame in buffer.frames.drain(..) {
        tx.send(SessionEvent::Frame(frame));
    }

    let old = std::mem::replace(old_stream, new_stream);
    let _ = websocket::close(old).await;
    tx.send(SessionEvent::Reconnected { attempt: 0 });

    Ok(())
}

fn buffer_frame(
    buffer: &mut RingBuffer,
    frame: Option<Result<WsMessage, marketline_integration::error::TransportError>>,
    spec: &SessionSpec,
) {
    match frame {
        Some(Ok(frame)) => buffer.push(frame),
        Some(Err(error)) => {
            warn!(session = %spec.key, %error, "socket error during smooth reconnect window, ignoring");
        }
        None => {
            warn!(session = %spec.key, "a socket closed during the smooth reconnect window");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_drops_oldest_on_overflow() {
        let mut buffer = RingBuffer::new(2);
        buffer.push(WsMessage::text("a"));
        buffer.push(WsMessage::text("b"));
        buffer.push(WsMessage::text("c"));

        assert_eq!(buffer.frames.len(), 2);
        assert_eq!(buffer.overflow_count, 1);
        assert_eq!(buffer.frames[0], WsMessage::text("b"));
        assert_eq!(buffer.frames[1], WsMessage::text("c"));
    }
}
