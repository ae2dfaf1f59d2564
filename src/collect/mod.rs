//! Collection source for RuuviTag broadcasts.
//!
//! Provides a trait-based abstraction over the Bluetooth scan so the cycle
//! runner can be tested without hardware, plus the shared decoding logic that
//! turns raw manufacturer data into normalized [`Reading`]s.
//!
//! Collection is best-effort per device: a sensor that never reports or
//! broadcasts an undecodable payload is warned about and skipped, it never
//! aborts collection of the others.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::mac_address::MacAddress;
use crate::reading::Reading;
use ruuvi_decoders::{v5, v6};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Configured sensors: MAC address → display name.
pub type SensorMap = BTreeMap<MacAddress, String>;

/// Readings gathered in one scan, in the order devices reported.
pub type CollectedReadings = Vec<(MacAddress, Reading)>;

/// Error types for decoding RuuviTag data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Unsupported RuuviTag data format (only V5 and V6 are supported)
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Invalid or corrupted data that cannot be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// Decoder library returned an error
    #[error("Decoder error: {0}")]
    DecoderError(String),
    /// The payload decoded but lacks a metric every reading must carry
    #[error("Missing metric: {0}")]
    MissingMetric(&'static str),
}

/// Error type for collection operations.
///
/// Raised at the top level it aborts the whole collection (adapter not
/// available); raised while handling one discovered device it is logged and
/// only that device is affected.
#[derive(Error, Debug)]
pub enum CollectError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Data decoding error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Ruuvi Innovations manufacturer ID (little-endian bytes for pattern matching).
///
/// Bluetooth LE advertisements use little-endian byte order for manufacturer
/// IDs; this is the byte representation of 0x0499 used to filter
/// advertisements. See: <https://github.com/ruuvi/ruuvi-sensor-protocols>
#[cfg(feature = "bluer")]
pub const RUUVI_MANUFACTURER_ID_BYTES: [u8; 2] = [0x99, 0x04];

/// Ruuvi Innovations manufacturer ID for data lookup (big-endian, 0x0499).
#[cfg(feature = "bluer")]
pub const RUUVI_MANUFACTURER_ID: u16 = 0x0499;

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
#[cfg(feature = "bluer")]
pub const MANUFACTURER_DATA_TYPE: u8 = 0xff;

/// Collection source abstraction to enable deterministic unit tests without
/// Bluetooth hardware.
pub trait Source {
    /// Gather at most one reading per configured sensor, listening for up to
    /// `scan_timeout` before giving up on sensors that have not reported.
    fn collect<'a>(
        &'a self,
        sensors: &'a SensorMap,
        scan_timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<CollectedReadings, CollectError>> + Send + 'a>>;
}

/// Real source that scans over BlueZ.
#[cfg(feature = "bluer")]
#[derive(Debug, Default, Clone, Copy)]
pub struct BleSource;

#[cfg(feature = "bluer")]
impl Source for BleSource {
    fn collect<'a>(
        &'a self,
        sensors: &'a SensorMap,
        scan_timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<CollectedReadings, CollectError>> + Send + 'a>> {
        Box::pin(bluer::collect(sensors, scan_timeout))
    }
}

/// Decode manufacturer data from a RuuviTag into a normalized reading.
///
/// Supports RuuviTag V5 and V6 formats. Unlike a raw decode, all three
/// metrics the collector persists (temperature, humidity, pressure) are
/// required; a payload missing one fails with
/// [`DecodeError::MissingMetric`].
///
/// Pressure is normalized to hPa (V5 broadcasts Pascals, V6 already hPa).
pub fn decode_reading(display_name: &str, data: &[u8]) -> Result<Reading, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::InvalidData("Empty data".into()));
    }

    let (temperature, humidity, pressure_hpa) = match data[0] {
        5 => {
            let tag = v5::decode(data)
                .map_err(|e| DecodeError::DecoderError(format!("Failed to decode: {e:?}")))?;
            (tag.temperature, tag.humidity, tag.pressure.map(|pa| pa / 100.0))
        }
        6 => {
            let tag = v6::decode(data)
                .map_err(|e| DecodeError::DecoderError(format!("Failed to decode: {e:?}")))?;
            (tag.temperature, tag.humidity, tag.pressure)
        }
        _ => {
            return Err(DecodeError::UnsupportedFormat(format!(
                "RuuviTag data format {} (only V5 and V6 supported)",
                data[0]
            )));
        }
    };

    Ok(Reading {
        display_name: display_name.to_string(),
        temperature: temperature.ok_or(DecodeError::MissingMetric("temperature"))?,
        humidity: humidity.ok_or(DecodeError::MissingMetric("humidity"))?,
        pressure: pressure_hpa.ok_or(DecodeError::MissingMetric("pressure"))?,
    })
}
