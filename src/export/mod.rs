//! Export fan-out: the exporter contract, the lazy factory registry and the
//! orchestrator that delivers one batch to every enabled backend.
//!
//! Each cycle the orchestrator walks the registry in declaration order. For
//! every entry it constructs the exporter, retries the whole `export` call
//! with bounded exponential backoff, and closes the exporter before moving
//! on. A backend that exhausts its retries is logged and skipped; it never
//! prevents the remaining backends from being attempted.

pub mod datastore;
pub mod influxdb;
pub mod pubsub;
pub mod sqlite;

use crate::config::Config;
use crate::reading::Batch;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors produced while constructing an exporter or exporting a batch.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Required configuration is missing. Fatal for the backend, never
    /// retried.
    #[error("missing configuration: {0}")]
    Config(String),
    /// Local database error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Transport-level HTTP failure (connection refused, timeout, ...).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The backend answered with a non-success status.
    #[error("backend rejected request: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ExportError {
    /// Whether the orchestrator should retry after this error.
    ///
    /// The dominant failure mode is transient network unavailability, so
    /// everything except missing configuration is retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExportError::Config(_))
    }
}

/// A storage backend that can persist one batch of readings.
///
/// Instances own exactly one backend connection, are constructed lazily right
/// before use, serve one `export` call and are closed unconditionally
/// afterwards. Nothing is shared across cycles.
pub trait Exporter {
    /// Stable human-readable identifier, used only for logging.
    fn name(&self) -> &'static str;

    /// Deliver every reading in the batch to the backend.
    ///
    /// The batch is treated atomically at the backend level: either the whole
    /// batch is persisted or the call fails with an error the orchestrator
    /// can retry.
    fn export(&mut self, batch: &Batch) -> Result<(), ExportError>;

    /// Release the backend connection.
    ///
    /// Called exactly once after `export`, regardless of its outcome. Errors
    /// here are logged at warning level so they never mask an export error.
    fn close(&mut self) -> Result<(), ExportError>;
}

type BuildFn = Box<dyn FnOnce() -> Result<Box<dyn Exporter>, ExportError>>;

/// A named deferred exporter constructor.
///
/// Construction is deferred until the orchestrator actually reaches the
/// entry, so a misconfigured backend surfaces inside the per-backend
/// isolation scope rather than at registry build time.
pub struct ExporterEntry {
    name: &'static str,
    build: BuildFn,
}

impl ExporterEntry {
    pub fn new(
        name: &'static str,
        build: impl FnOnce() -> Result<Box<dyn Exporter>, ExportError> + 'static,
    ) -> Self {
        Self {
            name,
            build: Box::new(build),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Build the exporter registry from configuration.
///
/// One entry per enabled backend, in declaration order: SQLite, InfluxDB,
/// Datastore, Pub/Sub. The orchestrator iterates the registry in exactly
/// this order.
pub fn build_registry(config: &Config) -> Vec<ExporterEntry> {
    let mut registry = Vec::new();
    if config.sqlite.enabled {
        let cfg = config.sqlite.clone();
        registry.push(ExporterEntry::new(sqlite::NAME, move || {
            Ok(Box::new(sqlite::SqliteExporter::open(&cfg)?) as Box<dyn Exporter>)
        }));
    }
    if config.influxdb.enabled {
        let cfg = config.influxdb.clone();
        registry.push(ExporterEntry::new(influxdb::NAME, move || {
            Ok(Box::new(influxdb::InfluxDbExporter::connect(&cfg)?) as Box<dyn Exporter>)
        }));
    }
    if config.datastore.enabled {
        let cfg = config.datastore.clone();
        registry.push(ExporterEntry::new(datastore::NAME, move || {
            Ok(Box::new(datastore::DatastoreExporter::connect(&cfg)?) as Box<dyn Exporter>)
        }));
    }
    if config.pubsub.enabled {
        let cfg = config.pubsub.clone();
        registry.push(ExporterEntry::new(pubsub::NAME, move || {
            Ok(Box::new(pubsub::PubSubExporter::connect(&cfg)?) as Box<dyn Exporter>)
        }));
    }
    registry
}

/// Retry policy for a single backend's export call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub initial_wait: Duration,
    /// Upper bound for the doubling backoff.
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff to apply after `failed_attempts` failures: the initial wait
    /// doubled per failure, capped at `max_wait`.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(31);
        self.initial_wait
            .saturating_mul(1u32 << exp)
            .min(self.max_wait)
    }
}

/// Sleep seam so orchestrator tests run without waiting.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Per-backend outcomes of one fan-out cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Backends that accepted the batch, with the attempt count it took.
    pub succeeded: Vec<(&'static str, u32)>,
    /// Backends that failed construction or exhausted their retries.
    pub failed: Vec<(&'static str, ExportError)>,
}

impl CycleReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Error aborting a cycle when `strict_init` is enabled.
#[derive(Error, Debug)]
#[error("failed to construct {name} exporter: {source}")]
pub struct InitError {
    pub name: &'static str,
    #[source]
    pub source: ExportError,
}

/// Deliver one batch to every registered exporter.
///
/// Exporters run strictly sequentially in registry order. Failures are
/// isolated per backend: exhausting retries on one backend is logged and the
/// loop continues with the next. `close` runs exactly once per constructed
/// exporter on every exit path.
///
/// With `strict_init` a construction failure aborts the cycle instead; this
/// preserves the historical fail-fast-on-misconfiguration behavior for
/// deployments that want it.
pub fn run_cycle(
    registry: Vec<ExporterEntry>,
    batch: &Batch,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    strict_init: bool,
) -> Result<CycleReport, InitError> {
    let mut report = CycleReport::default();

    for entry in registry {
        let name = entry.name;
        let mut exporter = match (entry.build)() {
            Ok(exporter) => exporter,
            Err(source) if strict_init => return Err(InitError { name, source }),
            Err(source) => {
                error!(backend = name, error = %source, "failed to construct exporter");
                report.failed.push((name, source));
                continue;
            }
        };

        info!(backend = name, readings = batch.len(), "exporting batch");
        let result = retry_export(policy, sleeper, name, || exporter.export(batch));

        // Close unconditionally; a close failure must not mask an export error.
        if let Err(close_err) = exporter.close() {
            warn!(backend = name, error = %close_err, "error while closing exporter");
        }

        match result {
            Ok(attempts) => {
                info!(backend = name, attempts, "export succeeded");
                report.succeeded.push((name, attempts));
            }
            Err(export_err) => {
                error!(backend = name, error = %export_err, "export failed");
                report.failed.push((name, export_err));
            }
        }
    }

    Ok(report)
}

/// Retry the whole export call per the policy, returning the attempt count
/// that succeeded.
fn retry_export(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    name: &'static str,
    mut export: impl FnMut() -> Result<(), ExportError>,
) -> Result<u32, ExportError> {
    let mut attempt = 1u32;
    loop {
        match export() {
            Ok(()) => return Ok(attempt),
            Err(err) if !err.is_retryable() || attempt >= policy.max_attempts => return Err(err),
            Err(err) => {
                let wait = policy.backoff(attempt);
                warn!(
                    backend = name,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "export attempt failed, retrying"
                );
                sleeper.sleep(wait);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac_address::MacAddress;
    use crate::reading::Reading;
    use chrono::{DateTime, TimeZone, Utc};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Shared per-exporter call log for assertions.
    #[derive(Debug, Default)]
    struct CallLog {
        export_calls: u32,
        close_calls: u32,
        seen_timestamps: Vec<DateTime<Utc>>,
    }

    /// Fake exporter failing the first `fail_first` export calls.
    struct FakeExporter {
        log: Rc<RefCell<CallLog>>,
        fail_first: u32,
    }

    impl Exporter for FakeExporter {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn export(&mut self, batch: &Batch) -> Result<(), ExportError> {
            let mut log = self.log.borrow_mut();
            log.export_calls += 1;
            log.seen_timestamps.push(batch.timestamp());
            if log.export_calls <= self.fail_first {
                Err(ExportError::Backend("temporarily unavailable".into()))
            } else {
                Ok(())
            }
        }

        fn close(&mut self) -> Result<(), ExportError> {
            self.log.borrow_mut().close_calls += 1;
            Ok(())
        }
    }

    /// Sleeper that records requested waits instead of sleeping.
    #[derive(Default)]
    struct RecordingSleeper {
        waits: RefCell<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.waits.borrow_mut().push(duration);
        }
    }

    fn test_batch() -> Batch {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut batch = Batch::new(ts);
        batch.insert(
            MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
            Reading {
                display_name: "Backyard".to_string(),
                temperature: 21.5,
                humidity: 40.0,
                pressure: 1013.2,
            },
        );
        batch
    }

    fn entry(log: Rc<RefCell<CallLog>>, fail_first: u32) -> ExporterEntry {
        ExporterEntry::new("fake", move || {
            Ok(Box::new(FakeExporter { log, fail_first }) as Box<dyn Exporter>)
        })
    }

    fn failing_entry(name: &'static str) -> ExporterEntry {
        ExporterEntry::new(name, move || {
            Err(ExportError::Config(format!("{name} is not configured")))
        })
    }

    #[test]
    fn test_every_exporter_runs_despite_earlier_failures() {
        let first = Rc::new(RefCell::new(CallLog::default()));
        let second = Rc::new(RefCell::new(CallLog::default()));
        let registry = vec![
            entry(first.clone(), u32::MAX), // never succeeds
            entry(second.clone(), 0),
        ];

        let report = run_cycle(
            registry,
            &test_batch(),
            &RetryPolicy::default(),
            &RecordingSleeper::default(),
            false,
        )
        .unwrap();

        assert_eq!(first.borrow().export_calls, 10);
        assert_eq!(second.borrow().export_calls, 1);
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.all_succeeded());
    }

    #[test]
    fn test_transient_failure_recovers_within_retry_budget() {
        let log = Rc::new(RefCell::new(CallLog::default()));
        let registry = vec![entry(log.clone(), 3)];

        let report = run_cycle(
            registry,
            &test_batch(),
            &RetryPolicy::default(),
            &RecordingSleeper::default(),
            false,
        )
        .unwrap();

        assert_eq!(log.borrow().export_calls, 4);
        assert_eq!(report.succeeded, vec![("fake", 4)]);
        assert!(report.all_succeeded());
    }

    #[test]
    fn test_close_runs_once_on_every_outcome() {
        let ok = Rc::new(RefCell::new(CallLog::default()));
        let exhausted = Rc::new(RefCell::new(CallLog::default()));
        let registry = vec![entry(ok.clone(), 0), entry(exhausted.clone(), u32::MAX)];

        run_cycle(
            registry,
            &test_batch(),
            &RetryPolicy::default(),
            &RecordingSleeper::default(),
            false,
        )
        .unwrap();

        assert_eq!(ok.borrow().close_calls, 1);
        assert_eq!(exhausted.borrow().close_calls, 1);
    }

    #[test]
    fn test_all_exporters_see_the_same_timestamp() {
        let first = Rc::new(RefCell::new(CallLog::default()));
        let second = Rc::new(RefCell::new(CallLog::default()));
        let registry = vec![entry(first.clone(), 2), entry(second.clone(), 0)];
        let batch = test_batch();

        run_cycle(
            registry,
            &batch,
            &RetryPolicy::default(),
            &RecordingSleeper::default(),
            false,
        )
        .unwrap();

        let mut seen: Vec<DateTime<Utc>> = first.borrow().seen_timestamps.clone();
        seen.extend(second.borrow().seen_timestamps.iter().copied());
        assert!(seen.iter().all(|ts| *ts == batch.timestamp()));
    }

    #[test]
    fn test_config_error_is_not_retried() {
        struct Misconfigured {
            exports: Rc<RefCell<u32>>,
        }
        impl Exporter for Misconfigured {
            fn name(&self) -> &'static str {
                "misconfigured"
            }
            fn export(&mut self, _batch: &Batch) -> Result<(), ExportError> {
                *self.exports.borrow_mut() += 1;
                Err(ExportError::Config("bucket must be set".into()))
            }
            fn close(&mut self) -> Result<(), ExportError> {
                Ok(())
            }
        }

        let exports = Rc::new(RefCell::new(0u32));
        let captured = exports.clone();
        let registry = vec![ExporterEntry::new("misconfigured", move || {
            Ok(Box::new(Misconfigured { exports: captured }) as Box<dyn Exporter>)
        })];

        let report = run_cycle(
            registry,
            &test_batch(),
            &RetryPolicy::default(),
            &RecordingSleeper::default(),
            false,
        )
        .unwrap();

        assert_eq!(*exports.borrow(), 1);
        assert_eq!(report.failed.len(), 1);
    }

    #[test]
    fn test_construction_failure_is_isolated_by_default() {
        let log = Rc::new(RefCell::new(CallLog::default()));
        let registry = vec![failing_entry("broken"), entry(log.clone(), 0)];

        let report = run_cycle(
            registry,
            &test_batch(),
            &RetryPolicy::default(),
            &RecordingSleeper::default(),
            false,
        )
        .unwrap();

        assert_eq!(log.borrow().export_calls, 1);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, ExportError::Config(_)));
    }

    #[test]
    fn test_construction_failure_aborts_with_strict_init() {
        let log = Rc::new(RefCell::new(CallLog::default()));
        let registry = vec![failing_entry("broken"), entry(log.clone(), 0)];

        let err = run_cycle(
            registry,
            &test_batch(),
            &RetryPolicy::default(),
            &RecordingSleeper::default(),
            true,
        )
        .unwrap_err();

        assert_eq!(err.name, "broken");
        assert_eq!(log.borrow().export_calls, 0);
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = RetryPolicy::default();
        let waits: Vec<u64> = (1..=6).map(|n| policy.backoff(n).as_secs()).collect();
        assert_eq!(waits, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_sleeper_sees_backoff_sequence() {
        let log = Rc::new(RefCell::new(CallLog::default()));
        let registry = vec![entry(log, 4)];
        let sleeper = RecordingSleeper::default();

        run_cycle(
            registry,
            &test_batch(),
            &RetryPolicy::default(),
            &sleeper,
            false,
        )
        .unwrap();

        let waits: Vec<u64> = sleeper.waits.borrow().iter().map(|d| d.as_secs()).collect();
        assert_eq!(waits, vec![1, 2, 4, 8]);
    }

    #[test]
    fn test_registry_order_matches_configuration_order() {
        let yaml = r#"
sqlite:
  enabled: true
  file: /tmp/x.db
influxdb:
  enabled: true
  bucket: b
pubsub:
  enabled: true
  project: p
  topic: t
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let registry = build_registry(&config);
        let names: Vec<&str> = registry.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["SQLite", "InfluxDB", "Google Pub/Sub"]);
    }

    #[test]
    fn test_empty_config_builds_empty_registry() {
        let config = Config::from_yaml("{}").unwrap();
        assert!(build_registry(&config).is_empty());
    }
}
