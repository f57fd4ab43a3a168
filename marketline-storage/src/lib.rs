//! Storage Consumer (C7): pulls canonical records off the bus, batches
//! them per destination table, and writes them to the columnar analytical
//! store, acking only after a successful write. One-way dependency on
//! [`marketline_bus`] and [`marketline_data`] - this crate never publishes.

pub mod batch;
pub mod client;
pub mod consumer;
pub mod error;
pub mod rows;
pub mod table;

pub use client::{ClickHouseStoreClient, ClientMetrics, StoreClient, StoreConfig};
pub use consumer::{NatsPullSource, PullSource, StorageConsumer};
pub use error::StoreError;
pub use table::{BatchConfig, Table, default_batch_config, table_for};
