//! Google Cloud Datastore exporter.
//!
//! Writes one entity per reading, batching every insert mutation of the cycle
//! into a single non-transactional `commit` call. The three numeric
//! properties carry the `excludeFromIndexes` hint since nothing queries by
//! raw metric value; this is an optimization, not a correctness requirement.

use crate::config::DatastoreConfig;
use crate::export::{ExportError, Exporter};
use crate::mac_address::MacAddress;
use crate::reading::{Batch, Reading};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde_json::{Value, json};

pub const NAME: &str = "Google Cloud Datastore";

/// Exporter committing reading entities through the Datastore REST API.
#[derive(Debug)]
pub struct DatastoreExporter {
    client: Client,
    commit_url: String,
    namespace: Option<String>,
    kind: String,
    token: Option<String>,
}

impl DatastoreExporter {
    /// Build the exporter from configuration. A missing project id is a
    /// configuration error.
    pub fn connect(config: &DatastoreConfig) -> Result<Self, ExportError> {
        let project = config
            .project
            .clone()
            .ok_or_else(|| ExportError::Config("datastore.project must be set".into()))?;
        Ok(Self {
            client: Client::builder().build()?,
            commit_url: format!(
                "{}/projects/{project}:commit",
                config.endpoint.trim_end_matches('/')
            ),
            namespace: config.namespace.clone(),
            kind: config.kind.clone(),
            token: config.token.clone(),
        })
    }

    fn key(&self) -> Value {
        let mut key = json!({ "path": [{ "kind": self.kind }] });
        if let Some(namespace) = &self.namespace {
            key["partitionId"] = json!({ "namespaceId": namespace });
        }
        key
    }
}

impl Exporter for DatastoreExporter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn export(&mut self, batch: &Batch) -> Result<(), ExportError> {
        let mutations: Vec<Value> = batch
            .iter()
            .map(|(mac, reading)| {
                json!({
                    "insert": {
                        "key": self.key(),
                        "properties": entity_properties(mac, reading, batch.timestamp()),
                    }
                })
            })
            .collect();

        let body = json!({
            "mode": "NON_TRANSACTIONAL",
            "mutations": mutations,
        });

        let mut request = self.client.post(&self.commit_url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(ExportError::Backend(format!(
                "Datastore commit returned {status}: {}",
                detail.trim()
            )));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Entity properties for one reading.
///
/// String identity fields stay indexed for querying; metric values are
/// excluded from secondary indexes.
pub fn entity_properties(mac: &MacAddress, reading: &Reading, timestamp: DateTime<Utc>) -> Value {
    json!({
        "device_id": { "stringValue": mac.to_string() },
        "display_name": { "stringValue": reading.display_name },
        "timestamp": { "timestampValue": timestamp.to_rfc3339() },
        "temperature": { "doubleValue": reading.temperature, "excludeFromIndexes": true },
        "humidity": { "doubleValue": reading.humidity, "excludeFromIndexes": true },
        "pressure": { "doubleValue": reading.pressure, "excludeFromIndexes": true },
    })
}
