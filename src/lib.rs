//! `ruuvitag-collector` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup
//! and process exit codes. The core business logic lives in [`crate::app`]
//! (one poll-collect-export cycle) and [`crate::export`] (the fan-out
//! orchestrator), where it can be tested deterministically with injected
//! sources and fake exporters.

pub mod app;
pub mod collect;
pub mod config;
pub mod export;
pub mod mac_address;
pub mod reading;

// Re-export commonly used types at the crate root
pub use app::{CycleOutcome, RunError, run_once};
#[cfg(feature = "bluer")]
pub use collect::BleSource;
pub use collect::{CollectError, DecodeError, SensorMap, Source, decode_reading};
pub use config::{Config, ConfigError};
pub use export::{
    CycleReport, ExportError, Exporter, ExporterEntry, RetryPolicy, Sleeper, ThreadSleeper,
    build_registry, run_cycle,
};
pub use mac_address::MacAddress;
pub use reading::{Batch, Reading};
