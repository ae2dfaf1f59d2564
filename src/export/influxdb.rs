//! InfluxDB v2 exporter.
//!
//! Encodes one "wide" line-protocol point per reading (temperature, humidity
//! and pressure as fields of a single measurement, tagged by device id and
//! display name) and POSTs the batch to the v2 write endpoint:
//!
//! ```text
//! measurement,device_id=AA:BB:..,display_name=Backyard temperature=21.5,humidity=40,pressure=1013.2 <ns>
//! ```
//!
//! See: <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use crate::config::InfluxDbConfig;
use crate::export::{ExportError, Exporter};
use crate::mac_address::MacAddress;
use crate::reading::{Batch, Reading};
use reqwest::blocking::Client;

pub const NAME: &str = "InfluxDB";

/// Exporter writing line-protocol points to an InfluxDB v2 instance.
#[derive(Debug)]
pub struct InfluxDbExporter {
    client: Client,
    url: String,
    org: String,
    bucket: String,
    token: Option<String>,
    measurement: String,
}

impl InfluxDbExporter {
    /// Build the exporter from configuration.
    ///
    /// The destination bucket has no sensible default, so its absence is a
    /// configuration error rather than a silently broken connection.
    pub fn connect(config: &InfluxDbConfig) -> Result<Self, ExportError> {
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| ExportError::Config("influxdb.bucket must be set".into()))?;
        Ok(Self {
            client: Client::builder().build()?,
            url: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
            org: config.org.clone(),
            bucket,
            token: config.token.clone(),
            measurement: config.measurement.clone(),
        })
    }
}

impl Exporter for InfluxDbExporter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn export(&mut self, batch: &Batch) -> Result<(), ExportError> {
        let timestamp_ns = batch
            .timestamp()
            .timestamp_nanos_opt()
            .ok_or_else(|| ExportError::Backend("cycle timestamp out of range".into()))?;

        let body = batch
            .iter()
            .map(|(mac, reading)| to_line(&self.measurement, mac, reading, timestamp_ns))
            .collect::<Vec<_>>()
            .join("\n");

        let mut request = self
            .client
            .post(&self.url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {token}"));
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(ExportError::Backend(format!(
                "InfluxDB write returned {status}: {}",
                detail.trim()
            )));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ExportError> {
        // The HTTP client holds no per-cycle server state.
        Ok(())
    }
}

/// Encode one reading as a line-protocol point.
pub fn to_line(measurement: &str, mac: &MacAddress, reading: &Reading, timestamp_ns: i64) -> String {
    format!(
        "{},device_id={},display_name={} temperature={},humidity={},pressure={} {}",
        escape_name(measurement),
        escape_tag_value(&mac.to_string()),
        escape_tag_value(&reading.display_name),
        reading.temperature,
        reading.humidity,
        reading.pressure,
        timestamp_ns
    )
}

/// Escape a measurement name (commas and spaces).
fn escape_name(value: &str) -> String {
    value.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escape a tag value (commas, equals signs and spaces).
fn escape_tag_value(value: &str) -> String {
    value
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
