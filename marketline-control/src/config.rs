//! Configuration surface (spec §4.8): loaded via the `config` crate from a
//! YAML file layered with environment variable overrides
//! (`MARKETLINE__BUS__SERVERS`, etc, using `__` as the key separator).

use serde::Deserialize;
use std::collections::HashMap;

fn default_snapshot_interval_ms() -> u64 {
    1000
}

fn default_snapshot_depth() -> usize {
    50
}

fn default_publish_depth() -> usize {
    20
}

fn default_ping_interval_ms() -> u64 {
    20_000
}

fn default_proactive_reconnect_sec() -> u64 {
    23 * 3600
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderbookMethod {
    Websocket,
    Snapshot,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderbookConfig {
    #[serde(default = "default_method")]
    pub method: OrderbookMethod,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,
    #[serde(default = "default_snapshot_depth")]
    pub snapshot_depth: usize,
    #[serde(default = "default_publish_depth")]
    pub publish_depth: usize,
}

fn default_method() -> OrderbookMethod {
    OrderbookMethod::Websocket
}

impl Default for OrderbookConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            strategy: None,
            snapshot_interval_ms: default_snapshot_interval_ms(),
            snapshot_depth: default_snapshot_depth(),
            publish_depth: default_publish_depth(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub data_types: Vec<String>,
    #[serde(default)]
    pub orderbook: OrderbookConfig,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_proactive_reconnect_sec")]
    pub proactive_reconnect_sec: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StreamOverride {
    pub retention_secs: Option<u64>,
    pub dedup_window_secs: Option<u64>,
    pub replicas: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_servers")]
    pub servers: Vec<String>,
    #[serde(default)]
    pub stream_overrides: HashMap<String, StreamOverride>,
}

fn default_bus_servers() -> Vec<String> {
    vec!["localhost:4222".to_string()]
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            servers: default_bus_servers(),
            stream_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BatchOverride {
    pub size: Option<usize>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_host")]
    pub host: String,
    #[serde(default = "default_native_port")]
    pub port: u16,
    #[serde(default = "default_storage_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_storage_database")]
    pub database: String,
    #[serde(default)]
    pub batch: HashMap<String, BatchOverride>,
}

fn default_storage_host() -> String {
    "localhost".to_string()
}

fn default_native_port() -> u16 {
    9000
}

fn default_storage_user() -> String {
    "default".to_string()
}

fn default_storage_database() -> String {
    "marketline".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            host: default_storage_host(),
            port: default_native_port(),
            user: default_storage_user(),
            password: String::new(),
            database: default_storage_database(),
            batch: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConsumerOverride {
    pub deliver_policy: Option<String>,
    pub ack_wait_ms: Option<u64>,
    pub max_deliver: Option<i64>,
    pub max_ack_pending: Option<i64>,
}

/// Which roles `start(config)` constructs (spec §4.8: "C6, then
/// C1+C2+C3+C4+C5 for the ingester role or C6+C7 for the storage role").
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Ingester,
    Storage,
    /// Both roles co-located in one process (spec §4.8: "roles may be
    /// co-located or separated").
    Combined,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub exchanges: HashMap<String, ExchangeConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub consumers: HashMap<String, ConsumerOverride>,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_http_port() -> u16 {
    8080
}

impl Config {
    /// Load from an optional YAML file, layered with `MARKETLINE__`-prefixed
    /// environment overrides (double underscore as the nested-key
    /// separator, matching the dotted option names in spec §4.8).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("MARKETLINE")
                .separator("__")
                .try_parsing(true),
        );
        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_for_an_empty_config() {
        let config = Config::load(None).expect("empty config loads with defaults");
        assert_eq!(config.role, Role::Ingester);
        assert_eq!(config.bus.servers, vec!["localhost:4222".to_string()]);
        assert_eq!(config.storage.port, 9000);
        assert_eq!(config.http_port, 8080);
    }
}
