//! `BusError` (spec §7): distinguishes retryable (connection) forms from
//! terminal (auth/config) forms. Retryable forms are retried with backoff
//! by the caller; terminal forms mark the owning component unhealthy.

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to connect to bus server(s): {0}")]
    Connect(#[source] async_nats::ConnectError),

    #[error("bus connection lost: {0}")]
    ConnectionLost(String),

    #[error("publish failed: {0}")]
    Publish(#[source] async_nats::jetstream::context::PublishError),

    #[error("stream/consumer configuration rejected: {0}")]
    Config(String),

    #[error("failed to fetch pull-consumer batch: {0}")]
    Fetch(String),

    #[error("failed to ack message: {0}")]
    Ack(String),

    #[error("message payload too large for subject '{subject}': {size} bytes")]
    PayloadTooLarge { subject: String, size: usize },

    #[error("malformed subject: {0}")]
    MalformedSubject(String),
}

impl BusError {
    /// Retryable forms are transport/connection issues the caller should
    /// back off and retry; terminal forms (auth, malformed config/subject,
    /// payload too large) mark the component unhealthy / drop the record.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BusError::Connect(_) | BusError::ConnectionLost(_) | BusError::Fetch(_) | BusError::Ack(_)
        )
    }

    /// Permanent failures (payload too large, malformed subject) drop the
    /// record with an error counter rather than retrying forever.
    pub fn is_permanent_drop(&self) -> bool {
        matches!(self, BusError::PayloadTooLarge { .. } | BusError::MalformedSubject(_))
    }
}
