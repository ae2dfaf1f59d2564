//! YAML configuration for the collector.
//!
//! The configuration file lists the RuuviTag sensors to poll and the storage
//! backends to export to. Example:
//!
//! ```yaml
//! ruuvitags:
//!   "CC:CA:7E:52:CC:34": Backyard
//!   "FB:E1:B7:04:95:EE": Upstairs
//!
//! sqlite:
//!   enabled: true
//!   file: /var/lib/ruuvitag/measurements.db
//!
//! influxdb:
//!   enabled: true
//!   bucket: ruuvitag
//!   token: my-token
//! ```
//!
//! Every backend section defaults to disabled. Connection parameters that a
//! backend cannot function without (SQLite file, InfluxDB bucket, Datastore
//! project, Pub/Sub project and topic) are validated when the exporter is
//! constructed, not when the file is parsed, so a misconfigured *disabled*
//! backend never fails startup.

use crate::mac_address::MacAddress;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level collector configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Sensors to poll: MAC address → human-readable display name.
    #[serde(default)]
    pub ruuvitags: BTreeMap<MacAddress, String>,

    /// When true, an exporter construction failure (missing required
    /// configuration) aborts the whole cycle instead of being isolated
    /// like an export failure.
    #[serde(default)]
    pub strict_init: bool,

    /// How long to listen for broadcasts before giving up on sensors that
    /// have not reported, in seconds.
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_secs: u64,

    #[serde(default)]
    pub sqlite: SqliteConfig,
    #[serde(default)]
    pub influxdb: InfluxDbConfig,
    #[serde(default)]
    pub datastore: DatastoreConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
}

fn default_scan_timeout() -> u64 {
    30
}

/// Embedded SQLite database backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SqliteConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Path to the database file. Required when enabled.
    pub file: Option<PathBuf>,
}

/// InfluxDB v2 time-series backend.
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxDbConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Write endpoint base URL.
    #[serde(default = "default_influxdb_url")]
    pub url: String,
    /// InfluxDB organization.
    #[serde(default)]
    pub org: String,
    /// Destination bucket. Required when enabled.
    pub bucket: Option<String>,
    /// API token. Optional for unauthenticated instances.
    pub token: Option<String>,
    /// Measurement name for the written points.
    #[serde(default = "default_influxdb_measurement")]
    pub measurement: String,
}

fn default_influxdb_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_influxdb_measurement() -> String {
    "ruuvitag_sensor".to_string()
}

impl Default for InfluxDbConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_influxdb_url(),
            org: String::new(),
            bucket: None,
            token: None,
            measurement: default_influxdb_measurement(),
        }
    }
}

/// Google Cloud Datastore document-store backend.
#[derive(Debug, Clone, Deserialize)]
pub struct DatastoreConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Cloud project id. Required when enabled.
    pub project: Option<String>,
    /// Datastore namespace. Optional.
    pub namespace: Option<String>,
    /// Entity kind for stored readings.
    #[serde(default = "default_datastore_kind")]
    pub kind: String,
    /// API base URL. Overridable for emulators.
    #[serde(default = "default_datastore_endpoint")]
    pub endpoint: String,
    /// OAuth bearer token. Optional for emulators.
    pub token: Option<String>,
}

fn default_datastore_kind() -> String {
    "Measurement".to_string()
}

fn default_datastore_endpoint() -> String {
    "https://datastore.googleapis.com/v1".to_string()
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            project: None,
            namespace: None,
            kind: default_datastore_kind(),
            endpoint: default_datastore_endpoint(),
            token: None,
        }
    }
}

/// Google Cloud Pub/Sub publish backend.
#[derive(Debug, Clone, Deserialize)]
pub struct PubSubConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Cloud project id. Required when enabled.
    pub project: Option<String>,
    /// Topic to publish to. Required when enabled.
    pub topic: Option<String>,
    /// API base URL. Overridable for emulators.
    #[serde(default = "default_pubsub_endpoint")]
    pub endpoint: String,
    /// OAuth bearer token. Optional for emulators.
    pub token: Option<String>,
}

fn default_pubsub_endpoint() -> String {
    "https://pubsub.googleapis.com".to_string()
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            project: None,
            topic: None,
            endpoint: default_pubsub_endpoint(),
            token: None,
        }
    }
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Config {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
ruuvitags:
  "CC:CA:7E:52:CC:34": Backyard
  "FB:E1:B7:04:95:EE": Upstairs

strict_init: true
scan_timeout_secs: 15

sqlite:
  enabled: true
  file: /tmp/ruuvitag.db

influxdb:
  enabled: true
  url: http://influx.local:8086
  org: home
  bucket: ruuvitag
  token: secret

datastore:
  enabled: false
  project: my-project

pubsub:
  enabled: true
  project: my-project
  topic: readings
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.ruuvitags.len(), 2);
        assert!(config.strict_init);
        assert_eq!(config.scan_timeout_secs, 15);

        assert!(config.sqlite.enabled);
        assert_eq!(config.sqlite.file, Some(PathBuf::from("/tmp/ruuvitag.db")));

        assert!(config.influxdb.enabled);
        assert_eq!(config.influxdb.url, "http://influx.local:8086");
        assert_eq!(config.influxdb.bucket.as_deref(), Some("ruuvitag"));
        assert_eq!(config.influxdb.measurement, "ruuvitag_sensor");

        assert!(!config.datastore.enabled);
        assert_eq!(config.datastore.kind, "Measurement");

        assert!(config.pubsub.enabled);
        assert_eq!(config.pubsub.topic.as_deref(), Some("readings"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert!(config.ruuvitags.is_empty());
        assert!(!config.strict_init);
        assert_eq!(config.scan_timeout_secs, 30);
        assert!(!config.sqlite.enabled);
        assert!(!config.influxdb.enabled);
        assert_eq!(config.influxdb.url, "http://localhost:8086");
        assert!(!config.datastore.enabled);
        assert_eq!(config.datastore.endpoint, "https://datastore.googleapis.com/v1");
        assert!(!config.pubsub.enabled);
        assert_eq!(config.pubsub.endpoint, "https://pubsub.googleapis.com");
    }

    #[test]
    fn test_invalid_mac_key_is_an_error() {
        let yaml = "ruuvitags:\n  \"not-a-mac\": Backyard\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_disabled_backend_may_be_incomplete() {
        // A disabled backend with missing required fields must parse fine;
        // validation happens at exporter construction.
        let yaml = "sqlite:\n  enabled: false\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert!(config.sqlite.file.is_none());
    }
}
