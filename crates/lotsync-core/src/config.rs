//! Configuration loading and typed config structures for lotsync.
//!
//! The configuration lives in a YAML file (`lotsync.yaml` by default). This
//! module defines strongly-typed structs that mirror the YAML structure and
//! a loader that reads, overrides from the environment, and validates it.
//!
//! ```yaml
//! counters:
//!   - { name: lot-a, capacity: 120 }
//! store:
//!   backend: redis
//!   url: redis://127.0.0.1:6379/0
//!   namespace: parking
//! reconcile:
//!   at: "00:00"
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveTime;
use serde::Deserialize;

use crate::model::Counter;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level lotsync configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LotsyncConfig {
    /// The fixed set of counters mirrored by the hub.
    #[serde(default)]
    pub counters: Vec<CounterConfig>,

    /// Counter store connection.
    #[serde(default)]
    pub store: StoreConfig,

    /// Hub queue and delivery tuning.
    #[serde(default)]
    pub hub: HubConfig,

    /// Reconciliation schedule.
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Viewer keep-alive schedule.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// HTTP listener.
    #[serde(default)]
    pub server: ListenConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LotsyncConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `REDIS_URL` overrides `store.url`
    /// - `LOTSYNC_PORT` overrides `server.port`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, apply environment overrides,
    /// and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override connection settings with environment variables when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `LOTSYNC_PORT` is not a port.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("REDIS_URL") {
            self.store.url = val;
        }
        if let Ok(val) = std::env::var("LOTSYNC_PORT") {
            self.server.port = val
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("invalid LOTSYNC_PORT: {e}")))?;
        }
        Ok(())
    }

    /// Check the invariants the rest of the system relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.counters.is_empty() {
            return Err(ConfigError::Invalid(String::from(
                "at least one counter must be configured",
            )));
        }

        let mut seen = BTreeSet::new();
        for counter in &self.counters {
            if counter.name.trim().is_empty() {
                return Err(ConfigError::Invalid(String::from(
                    "counter names must not be empty",
                )));
            }
            if !seen.insert(counter.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate counter name: {}",
                    counter.name
                )));
            }
        }

        if self.store.namespace.is_empty() {
            return Err(ConfigError::Invalid(String::from(
                "store.namespace must not be empty",
            )));
        }
        if self.hub.queue_capacity == 0 || self.hub.viewer_buffer == 0 {
            return Err(ConfigError::Invalid(String::from(
                "hub.queue_capacity and hub.viewer_buffer must be positive",
            )));
        }
        if self.hub.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid(String::from(
                "hub.store_timeout_ms must be positive",
            )));
        }
        if self.reconcile.interval_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "reconcile.interval_secs must be positive",
            )));
        }
        if self.heartbeat.interval_ms == 0 {
            return Err(ConfigError::Invalid(String::from(
                "heartbeat.interval_ms must be positive",
            )));
        }
        self.reconcile.at_time()?;
        Ok(())
    }

    /// The initial counters, before the store is consulted.
    pub fn initial_counters(&self) -> Vec<Counter> {
        self.counters
            .iter()
            .map(|c| Counter::new(c.name.clone(), c.occupancy, c.capacity))
            .collect()
    }

    /// The configured counter names.
    pub fn counter_names(&self) -> BTreeSet<String> {
        self.counters.iter().map(|c| c.name.clone()).collect()
    }
}

/// One configured counter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CounterConfig {
    /// Unique counter name.
    pub name: String,

    /// Maximum occupancy.
    #[serde(default)]
    pub capacity: u32,

    /// Occupancy assumed until the store reports a value.
    #[serde(default)]
    pub occupancy: i64,
}

/// Which [`CounterStore`](lotsync_store::CounterStore) backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// A Redis-compatible server.
    #[default]
    Redis,
    /// The in-process memory store (local development only).
    Memory,
}

/// Counter store connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis URL, including the database number.
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Key prefix for counter keys.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            namespace: default_namespace(),
        }
    }
}

/// Hub queue and delivery tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HubConfig {
    /// Capacity of the hub's event queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-viewer outbound buffer; a viewer that overflows it is evicted.
    #[serde(default = "default_viewer_buffer")]
    pub viewer_buffer: usize,

    /// Deadline for each store call made while processing an event.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl HubConfig {
    /// The store call deadline as a [`Duration`].
    pub const fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            viewer_buffer: default_viewer_buffer(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

/// Reconciliation schedule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReconcileConfig {
    /// Local wall-clock time (`HH:MM`) of the first firing.
    #[serde(default = "default_reconcile_at")]
    pub at: String,

    /// Seconds between firings.
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,
}

impl ReconcileConfig {
    /// Parse [`at`](Self::at) as a time of day.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if it is not `HH:MM` or `HH:MM:SS`.
    pub fn at_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.at, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&self.at, "%H:%M:%S"))
            .map_err(|e| ConfigError::Invalid(format!("invalid reconcile.at {:?}: {e}", self.at)))
    }

    /// The interval between firings.
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            at: default_reconcile_at(),
            interval_secs: default_reconcile_interval_secs(),
        }
    }
}

/// Viewer keep-alive schedule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeartbeatConfig {
    /// Milliseconds between liveness markers.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
}

impl HeartbeatConfig {
    /// The heartbeat period.
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

/// HTTP listener address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListenConfig {
    /// The host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// The TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_store_url() -> String {
    String::from("redis://127.0.0.1:6379/0")
}

fn default_namespace() -> String {
    String::from("parking")
}

const fn default_queue_capacity() -> usize {
    1024
}

const fn default_viewer_buffer() -> usize {
    16
}

const fn default_store_timeout_ms() -> u64 {
    500
}

fn default_reconcile_at() -> String {
    String::from("00:00")
}

const fn default_reconcile_interval_secs() -> u64 {
    86_400
}

const fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    9000
}

fn default_log_level() -> String {
    String::from("info")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r"
counters:
  - name: lot-a
    capacity: 120
";

    #[test]
    fn defaults_fill_missing_sections() {
        let config = LotsyncConfig::parse(MINIMAL).unwrap_or_default();
        assert_eq!(config.counters.len(), 1);
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.namespace, "parking");
        assert_eq!(config.hub.queue_capacity, 1024);
        assert_eq!(config.hub.store_timeout(), Duration::from_millis(500));
        assert_eq!(config.reconcile.interval(), Duration::from_secs(86_400));
        assert_eq!(config.heartbeat.interval(), Duration::from_secs(5));
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
counters:
  - { name: lot-a, capacity: 10, occupancy: 2 }
  - { name: lot-b, capacity: 40 }
store:
  backend: memory
  url: "redis://testhost:6380/2"
  namespace: lots
hub:
  queue_capacity: 64
  viewer_buffer: 4
  store_timeout_ms: 250
reconcile:
  at: "03:30"
  interval_secs: 3600
heartbeat:
  interval_ms: 1000
server:
  host: 127.0.0.1
  port: 9100
logging:
  level: debug
  format: json
"#;
        let config = LotsyncConfig::parse(yaml);
        assert!(config.is_ok());
        let config = config.unwrap_or_default();

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.namespace, "lots");
        assert_eq!(config.hub.viewer_buffer, 4);
        assert_eq!(config.hub.store_timeout_ms, 250);
        assert_eq!(config.reconcile.at_time().ok(), NaiveTime::from_hms_opt(3, 30, 0));
        assert_eq!(config.heartbeat.interval_ms, 1000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.logging.format, LogFormat::Json);

        let initial = config.initial_counters();
        assert_eq!(initial.first().map(|c| c.occupancy), Some(2));
        assert_eq!(initial.get(1).map(|c| c.capacity), Some(40));
        assert!(config.counter_names().contains("lot-b"));
    }

    #[test]
    fn rejects_empty_counter_set() {
        let result = LotsyncConfig::parse("store: { namespace: parking }");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_duplicate_counter_names() {
        let yaml = r"
counters:
  - { name: lot-a, capacity: 10 }
  - { name: lot-a, capacity: 20 }
";
        let result = LotsyncConfig::parse(yaml);
        assert!(matches!(result, Err(ConfigError::Invalid(ref msg)) if msg.contains("lot-a")));
    }

    #[test]
    fn rejects_bad_reconcile_time() {
        let yaml = format!("{MINIMAL}reconcile:\n  at: \"25:99\"\n");
        assert!(matches!(
            LotsyncConfig::parse(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn accepts_reconcile_time_with_seconds() {
        let config = ReconcileConfig {
            at: String::from("23:59:30"),
            interval_secs: 60,
        };
        assert_eq!(config.at_time().ok(), NaiveTime::from_hms_opt(23, 59, 30));
    }

    #[test]
    fn rejects_zero_intervals() {
        let yaml = format!("{MINIMAL}heartbeat:\n  interval_ms: 0\n");
        assert!(LotsyncConfig::parse(&yaml).is_err());

        let yaml = format!("{MINIMAL}hub:\n  viewer_buffer: 0\n");
        assert!(LotsyncConfig::parse(&yaml).is_err());
    }

    #[test]
    fn invalid_yaml_is_yaml_error() {
        let result = LotsyncConfig::parse("counters: [unterminated");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }
}
