//! Core cycle runner (business logic) for `ruuvitag-collector`.
//!
//! One invocation is one poll-collect-export cycle. This module is
//! intentionally decoupled from CLI parsing and process exit codes so it can
//! be tested deterministically with an injected collection source and fake
//! exporters.

use crate::collect::{CollectError, Source};
use crate::config::Config;
use crate::export::{
    CycleReport, InitError, RetryPolicy, Sleeper, build_registry, run_cycle,
};
use crate::reading::Batch;
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that abort a cycle before or during export.
#[derive(Error, Debug)]
pub enum RunError {
    /// The configuration lists no sensors; nothing to collect.
    #[error("no RuuviTag definitions found in configuration")]
    NoSensors,
    #[error(transparent)]
    Collect(#[from] CollectError),
    /// Exporter construction failed with `strict_init` enabled.
    #[error(transparent)]
    Init(#[from] InitError),
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Result of one completed cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// No readings could be collected; export was skipped.
    Empty,
    /// The fan-out ran; per-backend outcomes inside.
    Exported(CycleReport),
}

/// Run one poll-collect-export cycle.
///
/// The cycle timestamp is taken once, up front, and shared by every reading
/// and every backend. Collection runs on a private current-thread runtime;
/// export happens afterwards with plain blocking I/O, sequentially in
/// registry order.
///
/// Per-backend export failures are logged inside the orchestrator and
/// reported through [`CycleOutcome::Exported`]; they do not surface as
/// errors here.
pub fn run_once(
    config: &Config,
    source: &dyn Source,
    sleeper: &dyn Sleeper,
) -> Result<CycleOutcome, RunError> {
    if config.ruuvitags.is_empty() {
        return Err(RunError::NoSensors);
    }

    let timestamp = Utc::now();
    let scan_timeout = Duration::from_secs(config.scan_timeout_secs);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let readings = runtime.block_on(source.collect(&config.ruuvitags, scan_timeout))?;
    // Export must run outside the async context; the runtime is done.
    drop(runtime);

    let mut batch = Batch::new(timestamp);
    for (mac, reading) in readings {
        batch.insert(mac, reading);
    }

    if batch.is_empty() {
        warn!("no measurements could be read");
        return Ok(CycleOutcome::Empty);
    }
    info!(readings = batch.len(), "collected batch");

    let registry = build_registry(config);
    let report = run_cycle(
        registry,
        &batch,
        &RetryPolicy::default(),
        sleeper,
        config.strict_init,
    )?;
    info!("done");
    Ok(CycleOutcome::Exported(report))
}
