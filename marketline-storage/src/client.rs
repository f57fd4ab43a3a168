//! Columnar store client (spec §4.7/§6): inserts batches using the store's
//! native fast protocol, falling back to an HTTP-equivalent path on
//! transient protocol failure. The fallback is semantically identical,
//! just slower - a counter tracks how often it's taken.

use crate::error::StoreError;
use crate::rows::to_json_line;
use crate::table::Table;
use async_trait::async_trait;
use marketline_data::model::CanonicalRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn insert_batch(&self, table: Table, rows: &[(CanonicalRecord, String)]) -> Result<(), StoreError>;

    async fn health(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct ClientMetrics {
    pub fallback_hits: AtomicU64,
    pub rows_written: AtomicU64,
}

/// Connection parameters (spec §4.8 `storage.host/port/user/password/database`).
/// `http_port` backs the HTTP-equivalent fallback path and the `SELECT 1`
/// health probe; `native_port` backs the primary fast write path.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub native_port: u16,
    pub http_port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            native_port: 9000,
            http_port: 8123,
            user: "default".to_string(),
            password: String::new(),
            database: "marketline".to_string(),
        }
    }
}

pub struct ClickHouseStoreClient {
    native: clickhouse::Client,
    http: reqwest::Client,
    http_base_url: String,
    metrics: ClientMetrics,
}

impl ClickHouseStoreClient {
    pub fn new(config: StoreConfig) -> Self {
        let native = clickhouse::Client::default()
            .with_url(format!("http://{}:{}", config.host, config.native_port))
            .with_user(&config.user)
            .with_password(&config.password)
            .with_database(&config.database);

        Self {
            native,
            http: reqwest::Client::new(),
            http_base_url: format!("http://{}:{}", config.host, config.http_port),
            metrics: ClientMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    async fn insert_native(&self, table: Table, rows: &[(CanonicalRecord, String)]) -> Result<(), StoreError> {
        let mut insert = self
            .native
            .insert(table.name())
            .map_err(|error| StoreError::NativeProtocolFailed(error.to_string()))?;

        for (record, dedup_key) in rows {
            let line = to_json_line(record, dedup_key.clone())
                .map_err(|error| StoreError::NativeProtocolFailed(error.to_string()))?;
            let value: serde_json::Value = serde_json::from_str(&line)
                .map_err(|error| StoreError::NativeProtocolFailed(error.to_string()))?;
            insert
                .write(&value)
                .await
                .map_err(|error| StoreError::NativeProtocolFailed(error.to_string()))?;
        }

        insert.end().await.map_err(|error| StoreError::NativeProtocolFailed(error.to_string()))
    }

    async fn insert_http_fallback(&self, table: Table, rows: &[(CanonicalRecord, String)]) -> Result<(), StoreError> {
        let mut body = String::new();
        for (record, dedup_key) in rows {
            let line = to_json_line(record, dedup_key.clone()).map_err(|error| StoreError::Insert(error.to_string()))?;
            body.push_str(&line);
            body.push('\n');
        }

        let url = format!("{}/?query=INSERT INTO {} FORMAT JSONEachRow", self.http_base_url, table.name());
        let response = self
            .http
            .post(url)
            .body(body)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|error| StoreError::ConnectionLost(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::Insert(format!("HTTP fallback insert failed ({status}): {text}")));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreClient for ClickHouseStoreClient {
    async fn insert_batch(&self, table: Table, rows: &[(CanonicalRecord, String)]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }

        match self.insert_native(table, rows).await {
            Ok(()) => {
                self.metrics.rows_written.fetch_add(rows.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(StoreError::NativeProtocolFailed(reason)) => {
                warn!(table = table.name(), %reason, "native protocol insert failed, falling back to HTTP");
                self.metrics.fallback_hits.fetch_add(1, Ordering::Relaxed);
                self.insert_http_fallback(table, rows).await?;
                self.metrics.rows_written.fetch_add(rows.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    async fn health(&self) -> Result<(), StoreError> {
        let url = format!("{}/?query=SELECT 1", self.http_base_url);
        let response = self
            .http
            .get(url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map_err(|error| StoreError::ConnectionLost(error.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(StoreError::ConnectionLost(format!("health probe returned {}", response.status())))
        }
    }
}
