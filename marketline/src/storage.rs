//! Storage role wiring (C6 + C7): provisions the durable bus topology,
//! then opens one pull consumer per destination [`Table`] and drains it
//! into the columnar store via [`StorageConsumer`].

use async_trait::async_trait;
use marketline_bus::bindings::{ConsumerSpec, ToleranceConfig};
use marketline_bus::{BusBindings, bindings};
use marketline_control::lifecycle::Component;
use marketline_storage::client::StoreConfig;
use marketline_storage::consumer::NatsPullSource;
use marketline_storage::{ClickHouseStoreClient, StorageConsumer, Table};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

const DEFAULT_MARKET_DATA_RETENTION: Duration = Duration::from_secs(48 * 3600);
const DEFAULT_MARKET_DATA_DEDUP: Duration = Duration::from_secs(120);
const DEFAULT_ORDERBOOK_RETENTION: Duration = Duration::from_secs(24 * 3600);
const DEFAULT_ORDERBOOK_DEDUP: Duration = Duration::from_secs(60);
const MIN_DEDUP_WINDOW: Duration = Duration::from_secs(30);

struct StorageComponent {
    consumer: Mutex<StorageConsumer>,
}

#[async_trait]
impl Component for StorageComponent {
    fn name(&self) -> &'static str {
        "storage_consumer"
    }

    async fn stop(&self, grace: Duration) {
        self.consumer.lock().await.stop(grace).await;
    }
}

fn stream_for_table(table: Table) -> &'static str {
    match table {
        Table::Orderbooks => "ORDERBOOK_SNAP",
        _ => "MARKET_DATA",
    }
}

/// Provision the bus topology and start the storage consumer, registering
/// it with `runtime` so `stop(grace)` drains it alongside every other
/// component.
pub async fn start(runtime: &mut marketline_control::Runtime) -> Result<(), Box<dyn std::error::Error>> {
    let config = runtime.config.clone();
    let server = config
        .bus
        .servers
        .first()
        .cloned()
        .unwrap_or_else(|| "localhost:4222".to_string());
    let nats_client = async_nats::connect(&server).await?;
    let bindings = BusBindings::new(nats_client.clone());

    let market_data_override = config.bus.stream_overrides.get("MARKET_DATA");
    let orderbook_override = config.bus.stream_overrides.get("ORDERBOOK_SNAP");

    let market_data_retention = market_data_override
        .and_then(|o| o.retention_secs)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_MARKET_DATA_RETENTION);
    let market_data_dedup = market_data_override
        .and_then(|o| o.dedup_window_secs)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_MARKET_DATA_DEDUP);
    let orderbook_retention = orderbook_override
        .and_then(|o| o.retention_secs)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_ORDERBOOK_RETENTION);
    let orderbook_dedup = orderbook_override
        .and_then(|o| o.dedup_window_secs)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_ORDERBOOK_DEDUP);

    let tolerance = ToleranceConfig {
        min_dedup_window: MIN_DEDUP_WINDOW,
    };

    bindings
        .ensure_stream(
            bindings::market_data_stream_config(market_data_retention, market_data_dedup),
            tolerance,
        )
        .await?;
    bindings
        .ensure_stream(
            bindings::orderbook_snap_stream_config(orderbook_retention, orderbook_dedup),
            tolerance,
        )
        .await?;

    for table in Table::ALL {
        let durable_name = format!("storage-{}", table.name());
        let overrides = config.consumers.get(table.name());
        let spec = ConsumerSpec {
            durable_name: durable_name.clone(),
            filter_subject: table.subject_filter().to_string(),
            ack_wait: overrides
                .and_then(|o| o.ack_wait_ms)
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_secs(60)),
            max_deliver: overrides.and_then(|o| o.max_deliver).unwrap_or(3),
            max_ack_pending: overrides.and_then(|o| o.max_ack_pending).unwrap_or(2000),
        };
        bindings.ensure_pull_consumer(stream_for_table(table), spec).await?;
    }

    let store_config = StoreConfig {
        host: config.storage.host.clone(),
        native_port: config.storage.port,
        http_port: 8123,
        user: config.storage.user.clone(),
        password: config.storage.password.clone(),
        database: config.storage.database.clone(),
    };
    let store = Arc::new(ClickHouseStoreClient::new(store_config));

    let jetstream = async_nats::jetstream::new(nats_client);
    let mut sources = std::collections::HashMap::new();
    for table in Table::ALL {
        let stream_name = stream_for_table(table);
        let durable_name = format!("storage-{}", table.name());
        let stream = jetstream.get_stream(stream_name).await?;
        let pull_consumer = stream.get_consumer(&durable_name).await?;
        sources.insert(table.name(), NatsPullSource::new(pull_consumer));
    }

    let mut consumer = StorageConsumer::new();
    consumer.start(store.clone(), move |table| {
        sources
            .remove(table.name())
            .expect("a pull source was provisioned for every table above")
    });

    info!("storage consumer started for every table");
    runtime.register(Arc::new(StorageComponent {
        consumer: Mutex::new(consumer),
    }));
    Ok(())
}
