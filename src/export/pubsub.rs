//! Google Cloud Pub/Sub exporter.
//!
//! Publishes one message per reading to a fixed topic. The message body is a
//! UTF-8 JSON object with exactly six keys (`device_id`, `display_name`,
//! `timestamp`, `temperature`, `humidity`, `pressure`); device id and display
//! name are duplicated as message attributes so subscribers can filter
//! without decoding the payload.
//!
//! The publish call must be acknowledged within [`ACK_TIMEOUT`], otherwise it
//! fails into the orchestrator's retry layer instead of being silently
//! dropped.

use crate::config::PubSubConfig;
use crate::export::{ExportError, Exporter};
use crate::mac_address::MacAddress;
use crate::reading::{Batch, Reading};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::time::Duration;

pub const NAME: &str = "Google Pub/Sub";

/// Bound on waiting for publish acknowledgment.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Exporter publishing readings through the Pub/Sub REST API.
#[derive(Debug)]
pub struct PubSubExporter {
    client: Client,
    publish_url: String,
    token: Option<String>,
}

impl PubSubExporter {
    /// Build the exporter from configuration. Missing project id or topic is
    /// a configuration error.
    pub fn connect(config: &PubSubConfig) -> Result<Self, ExportError> {
        let project = config
            .project
            .clone()
            .ok_or_else(|| ExportError::Config("pubsub.project must be set".into()))?;
        let topic = config
            .topic
            .clone()
            .ok_or_else(|| ExportError::Config("pubsub.topic must be set".into()))?;
        Ok(Self {
            client: Client::builder().timeout(ACK_TIMEOUT).build()?,
            publish_url: format!(
                "{}/v1/projects/{project}/topics/{topic}:publish",
                config.endpoint.trim_end_matches('/')
            ),
            token: config.token.clone(),
        })
    }
}

impl Exporter for PubSubExporter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn export(&mut self, batch: &Batch) -> Result<(), ExportError> {
        let messages: Result<Vec<Value>, ExportError> = batch
            .iter()
            .map(|(mac, reading)| {
                let payload = message_payload(mac, reading, batch.timestamp());
                let data = serde_json::to_vec(&payload)?;
                Ok(json!({
                    "data": BASE64.encode(data),
                    "attributes": {
                        "device_id": mac.to_string(),
                        "display_name": reading.display_name,
                    },
                }))
            })
            .collect();

        let body = json!({ "messages": messages? });
        let mut request = self.client.post(&self.publish_url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(ExportError::Backend(format!(
                "Pub/Sub publish returned {status}: {}",
                detail.trim()
            )));
        }

        // A successful publish response carries one id per message.
        let acked: Value = response.json()?;
        let ids = acked["messageIds"].as_array().map_or(0, |ids| ids.len());
        if ids != batch.len() {
            return Err(ExportError::Backend(format!(
                "Pub/Sub acknowledged {ids} of {} messages",
                batch.len()
            )));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ExportError> {
        Ok(())
    }
}

/// The six-key JSON payload for one reading.
pub fn message_payload(mac: &MacAddress, reading: &Reading, timestamp: DateTime<Utc>) -> Value {
    json!({
        "device_id": mac.to_string(),
        "display_name": reading.display_name,
        "timestamp": timestamp.to_rfc3339(),
        "temperature": reading.temperature,
        "humidity": reading.humidity,
        "pressure": reading.pressure,
    })
}
