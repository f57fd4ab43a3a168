//! Bus Bindings (C6): idempotent stream/consumer provisioning against the
//! external durable bus. Invoked once at startup by the Publisher and the
//! Storage Consumer so both can assume a known topology (spec §4.6).

use crate::error::BusError;
use async_nats::jetstream::{
    self,
    consumer::{AckPolicy, DeliverPolicy, pull::Config as PullConsumerConfig},
    stream::{Config as StreamConfig, DiscardPolicy, RetentionPolicy},
};
use std::time::Duration;
use tracing::{info, warn};

/// Logical stream declarations (spec §4.6).
pub fn market_data_stream_config(retention: Duration, dedup_window: Duration) -> StreamConfig {
    StreamConfig {
        name: "MARKET_DATA".to_string(),
        subjects: vec![
            "trade.>".to_string(),
            "funding_rate.>".to_string(),
            "liquidation.>".to_string(),
            "open_interest.>".to_string(),
            "lsr_top_position.>".to_string(),
            "lsr_all_account.>".to_string(),
            "volatility_index.>".to_string(),
        ],
        retention: RetentionPolicy::Limits,
        discard: DiscardPolicy::Old,
        max_age: retention,
        duplicate_window: dedup_window,
        ..Default::default()
    }
}

pub fn orderbook_snap_stream_config(retention: Duration, dedup_window: Duration) -> StreamConfig {
    StreamConfig {
        name: "ORDERBOOK_SNAP".to_string(),
        subjects: vec!["orderbook.>".to_string()],
        retention: RetentionPolicy::Limits,
        discard: DiscardPolicy::Old,
        max_age: retention,
        duplicate_window: dedup_window,
        ..Default::default()
    }
}

/// Per-consumer overrides (spec §4.6/§4.8: deliver policy, ack policy,
/// ack wait, max deliver, max ack pending). Pull-based only; no push
/// `deliver_subject` is ever set.
#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    pub durable_name: String,
    pub filter_subject: String,
    pub ack_wait: Duration,
    pub max_deliver: i64,
    pub max_ack_pending: i64,
}

impl Default for ConsumerSpec {
    fn default() -> Self {
        Self {
            durable_name: String::new(),
            filter_subject: String::new(),
            ack_wait: Duration::from_secs(60),
            max_deliver: 3,
            max_ack_pending: 2000,
        }
    }
}

impl ConsumerSpec {
    fn into_pull_config(self) -> PullConsumerConfig {
        PullConsumerConfig {
            durable_name: Some(self.durable_name),
            filter_subject: self.filter_subject,
            deliver_policy: DeliverPolicy::Last,
            ack_policy: AckPolicy::Explicit,
            ack_wait: self.ack_wait,
            max_deliver: self.max_deliver,
            max_ack_pending: self.max_ack_pending,
            ..Default::default()
        }
    }
}

/// Narrowest dedup window the bus is ever allowed to be reconciled down to,
/// even if a drifted/updated config on the server tries to go lower (spec
/// §4.6: "the dedup window is never narrowed below the configured
/// minimum").
#[derive(Debug, Clone, Copy)]
pub struct ToleranceConfig {
    pub min_dedup_window: Duration,
}

/// Idempotent provisioning against an external JetStream-compatible bus.
pub struct BusBindings {
    context: jetstream::Context,
}

impl BusBindings {
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            context: jetstream::new(client),
        }
    }

    /// Create or update a stream to match `desired`. Existing config is
    /// fetched first; drift that would narrow the dedup window below
    /// `tolerance.min_dedup_window` is corrected rather than applied
    /// verbatim, and reported - it never aborts startup.
    pub async fn ensure_stream(
        &self,
        desired: StreamConfig,
        tolerance: ToleranceConfig,
    ) -> Result<(), BusError> {
        let mut desired = desired;
        if desired.duplicate_window < tolerance.min_dedup_window {
            warn!(
                stream = desired.name,
                requested = ?desired.duplicate_window,
                minimum = ?tolerance.min_dedup_window,
                "requested dedup window below configured minimum, clamping"
            );
            desired.duplicate_window = tolerance.min_dedup_window;
        }

        match self.context.get_stream(&desired.name).await {
            Ok(mut existing) => {
                let current = existing.info().await.map_err(|error| BusError::Config(error.to_string()))?;
                if stream_config_drifted(&current.config, &desired) {
                    warn!(stream = desired.name, "stream config drift detected, updating to desired config");
                }
                self.context
                    .update_stream(desired)
                    .await
                    .map_err(|error| BusError::Config(error.to_string()))?;
            }
            Err(_) => {
                info!(stream = %desired.name, "stream does not exist, creating");
                self.context
                    .create_stream(desired)
                    .await
                    .map_err(|error| BusError::Config(error.to_string()))?;
            }
        }
        Ok(())
    }

    /// Create or update a pull consumer on `stream_name` to match `spec`.
    pub async fn ensure_pull_consumer(&self, stream_name: &str, spec: ConsumerSpec) -> Result<(), BusError> {
        let stream = self
            .context
            .get_stream(stream_name)
            .await
            .map_err(|error| BusError::Config(error.to_string()))?;

        let durable_name = spec.durable_name.clone();
        let config = spec.into_pull_config();

        stream
            .get_or_create_consumer(&durable_name, config)
            .await
            .map_err(|error| BusError::Config(error.to_string()))?;

        Ok(())
    }
}

fn stream_config_drifted(current: &StreamConfig, desired: &StreamConfig) -> bool {
    current.subjects != desired.subjects
        || current.max_age != desired.max_age
        || current.duplicate_window != desired.duplicate_window
}

/// [`crate::publisher::BusClient`] backed by a real `async-nats` connection.
/// Durable publishes go through the JetStream context with a `Nats-Msg-Id`
/// header so the server's dedup window (provisioned by [`BusBindings`]) can
/// fold retried publishes; best-effort publishes go through core NATS and
/// do not wait on a stream ack.
pub struct NatsBusClient {
    client: async_nats::Client,
    context: jetstream::Context,
}

impl NatsBusClient {
    pub fn new(client: async_nats::Client) -> Self {
        let context = jetstream::new(client.clone());
        Self { client, context }
    }
}

#[async_trait::async_trait]
impl crate::publisher::BusClient for NatsBusClient {
    async fn publish_durable(&self, subject: &str, payload: Vec<u8>, dedup_id: &str) -> Result<(), BusError> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", dedup_id);

        let ack_future = self
            .context
            .publish_with_headers(subject.to_string(), headers, payload.into())
            .await
            .map_err(|error| BusError::Publish(error))?;

        ack_future.await.map_err(|error| BusError::Publish(error))?;
        Ok(())
    }

    async fn publish_best_effort(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|error| BusError::ConnectionLost(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_data_stream_carries_every_durable_subject() {
        let config = market_data_stream_config(Duration::from_secs(48 * 3600), Duration::from_secs(120));
        assert!(config.subjects.contains(&"trade.>".to_string()));
        assert!(config.subjects.contains(&"lsr_all_account.>".to_string()));
        assert_eq!(config.duplicate_window, Duration::from_secs(120));
    }

    #[test]
    fn orderbook_snap_stream_is_isolated_from_market_data() {
        let config = orderbook_snap_stream_config(Duration::from_secs(24 * 3600), Duration::from_secs(60));
        assert_eq!(config.subjects, vec!["orderbook.>".to_string()]);
    }

    #[test]
    fn consumer_spec_defaults_to_pull_explicit_ack() {
        let spec = ConsumerSpec {
            durable_name: "trades-consumer".into(),
            filter_subject: "trade.>".into(),
            ..Default::default()
        };
        let config = spec.into_pull_config();
        assert_eq!(config.deliver_policy, DeliverPolicy::Last);
        assert_eq!(config.ack_policy, AckPolicy::Explicit);
        assert_eq!(config.max_deliver, 3);
        assert_eq!(config.max_ack_pending, 2000);
    }
}
