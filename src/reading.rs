//! Normalized sensor readings and the per-cycle batch.

use crate::mac_address::MacAddress;
use chrono::{DateTime, Utc};

/// One normalized observation from one RuuviTag.
///
/// All values are in the units the exporters persist:
/// - Temperature in Celsius
/// - Relative humidity in percent (0-100)
/// - Atmospheric pressure in hPa
///
/// Unlike a raw broadcast decode, every metric is required: a payload missing
/// one of these fields never becomes a `Reading` (see [`crate::collect`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Human-assigned sensor name, resolved from the `ruuvitags` config map.
    pub display_name: String,
    /// Temperature in Celsius
    pub temperature: f64,
    /// Relative humidity in percent (0-100)
    pub humidity: f64,
    /// Atmospheric pressure in hPa
    pub pressure: f64,
}

/// The full set of readings collected in one cycle, sharing one timestamp.
///
/// Entries keep insertion order and are keyed by MAC address; inserting a MAC
/// twice replaces the earlier reading (last write wins). The timestamp is
/// computed once at collection time and applied uniformly by every exporter,
/// so all backends agree on "when" for a given cycle even though export may
/// happen seconds apart per backend due to retries.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    timestamp: DateTime<Utc>,
    entries: Vec<(MacAddress, Reading)>,
}

impl Batch {
    /// Create an empty batch stamped with the given cycle timestamp.
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            entries: Vec::new(),
        }
    }

    /// The shared cycle timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Insert a reading, replacing any earlier reading for the same MAC.
    pub fn insert(&mut self, mac: MacAddress, reading: Reading) {
        match self.entries.iter_mut().find(|(m, _)| *m == mac) {
            Some((_, existing)) => *existing = reading,
            None => self.entries.push((mac, reading)),
        }
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&MacAddress, &Reading)> {
        self.entries.iter().map(|(m, r)| (m, r))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
