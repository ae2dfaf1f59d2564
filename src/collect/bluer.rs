//! BlueZ D-Bus collection backend.
//!
//! Uses the `bluer` crate to talk to the BlueZ daemon. A passive scan
//! filtered on the Ruuvi manufacturer ID runs until every configured sensor
//! has delivered one decodable broadcast or the scan window closes.

use super::{
    CollectError, CollectedReadings, MANUFACTURER_DATA_TYPE, RUUVI_MANUFACTURER_ID,
    RUUVI_MANUFACTURER_ID_BYTES, SensorMap, decode_reading,
};
use crate::mac_address::MacAddress;
use crate::reading::Reading;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, Session};
use futures::StreamExt;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

impl From<bluer::Error> for CollectError {
    fn from(err: bluer::Error) -> Self {
        CollectError::Bluetooth(err.to_string())
    }
}

/// Scan for the configured sensors and gather one reading from each.
///
/// Sensors that do not report a decodable broadcast within `scan_timeout`
/// are logged and left out of the result; they never abort collection of
/// the others.
pub async fn collect(
    sensors: &SensorMap,
    scan_timeout: Duration,
) -> Result<CollectedReadings, CollectError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    // Filter advertisements on the Ruuvi manufacturer data prefix
    let pattern = Pattern {
        data_type: MANUFACTURER_DATA_TYPE,
        start_position: 0,
        content: RUUVI_MANUFACTURER_ID_BYTES.to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    let deadline = Instant::now() + scan_timeout;
    let mut pending: BTreeSet<MacAddress> = sensors.keys().copied().collect();
    let mut collected = CollectedReadings::new();

    while !pending.is_empty() {
        let event = match timeout_at(deadline, monitor_handle.next()).await {
            Ok(Some(event)) => event,
            // Monitor stream closed or scan window elapsed
            Ok(None) => break,
            Err(_) => break,
        };

        let MonitorEvent::DeviceFound(device_id) = event else {
            continue;
        };
        let mac: MacAddress = device_id.device.into();
        let Some(name) = sensors.get(&mac) else {
            // Some other RuuviTag in range
            debug!(device = %mac, "ignoring unconfigured device");
            continue;
        };
        if !pending.contains(&mac) {
            continue;
        }

        match read_device(&adapter, device_id.device, name).await {
            Ok(Some(reading)) => {
                info!(device = %mac, name = %name, "received measurement");
                pending.remove(&mac);
                collected.push((mac, reading));
            }
            Ok(None) => {}
            // A bad broadcast is a per-device problem; the device stays
            // pending and may deliver a good one before the deadline.
            Err(err) => warn!(device = %mac, name = %name, error = %err, "invalid data from device"),
        }
    }

    for mac in &pending {
        if let Some(name) = sensors.get(mac) {
            warn!(device = %mac, name = %name, "no measurement received before scan timeout");
        }
    }

    Ok(collected)
}

/// Read and decode the Ruuvi manufacturer data of one discovered device.
///
/// Returns `Ok(None)` when the device carries no Ruuvi manufacturer data
/// (yet); decode failures are real errors.
async fn read_device(
    adapter: &Adapter,
    address: Address,
    display_name: &str,
) -> Result<Option<Reading>, CollectError> {
    let device = adapter.device(address)?;

    let manufacturer_data = match device.manufacturer_data().await? {
        Some(data) => data,
        None => return Ok(None),
    };
    let ruuvi_data = match manufacturer_data.get(&RUUVI_MANUFACTURER_ID) {
        Some(data) => data,
        None => return Ok(None),
    };

    Ok(Some(decode_reading(display_name, ruuvi_data)?))
}
