//! `StoreError` (spec §7): the same retryable/terminal split as
//! `BusError`. On a retryable error the current batch is not acked,
//! guaranteeing bus redelivery; on a terminal error the consumer marks
//! itself unhealthy.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to connect to store: {0}")]
    Connect(String),

    #[error("store connection lost mid-write: {0}")]
    ConnectionLost(String),

    #[error("native protocol insert failed, falling back to HTTP: {0}")]
    NativeProtocolFailed(String),

    #[error("insert failed: {0}")]
    Insert(String),

    #[error("store rejected configuration/schema: {0}")]
    Config(String),

    #[error("failed to pull from bus stream '{stream}': {source}")]
    Pull {
        stream: String,
        #[source]
        source: marketline_bus::BusError,
    },
}

impl StoreError {
    /// Retryable forms leave the batch unacked so the bus redelivers it;
    /// terminal forms (bad schema/config) mark the consumer unhealthy
    /// instead of retrying forever.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Connect(_)
            | StoreError::ConnectionLost(_)
            | StoreError::NativeProtocolFailed(_)
            | StoreError::Insert(_) => true,
            StoreError::Pull { source, .. } => source.is_retryable(),
            StoreError::Config(_) => false,
        }
    }
}
