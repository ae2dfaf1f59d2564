use clap::Parser;
use ruuvitag_collector::{BleSource, Config, CycleOutcome, ThreadSleeper, run_once};
use std::panic::{self, PanicHookInfo};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[cfg(not(feature = "bluer"))]
compile_error!("the 'bluer' feature must be enabled to build the collector binary");

/// Exit codes for the application
const EXIT_PANIC: i32 = 2;

#[derive(Parser, Debug)]
#[command(author, about, version)]
struct Options {
    /// Path to the YAML configuration file.
    /// Defaults to $HOME/.config/ruuvitag-collector/config.yaml.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How long to listen for broadcasts, in seconds.
    /// Overrides scan_timeout_secs from the configuration file.
    #[arg(short = 's', long = "scan-timeout", value_name = "SECONDS")]
    scan_timeout: Option<u64>,

    /// Verbose output, enables debug-level logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

/// Apply command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut Config, options: &Options) {
    if let Some(secs) = options.scan_timeout {
        config.scan_timeout_secs = secs;
    }
}

fn default_config_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".config/ruuvitag-collector/config.yaml")
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    // Clean exit codes for schedulers (cron, systemd timers) that monitor
    // the process status.
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(options.verbose);

    let path = options.config.clone().unwrap_or_else(default_config_path);
    let mut config = match Config::from_file(&path) {
        Ok(config) => config,
        Err(why) => {
            error!(path = %path.display(), "{why}");
            return ExitCode::FAILURE;
        }
    };
    apply_overrides(&mut config, &options);

    match run_once(&config, &BleSource, &ThreadSleeper) {
        // Nothing collected is a warning, not a failure; per-backend export
        // failures are logged by the orchestrator and do not change the
        // exit code either.
        Ok(CycleOutcome::Empty) => ExitCode::SUCCESS,
        Ok(CycleOutcome::Exported(report)) => {
            info!(
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                "cycle finished"
            );
            ExitCode::SUCCESS
        }
        Err(why) => {
            error!("{why}");
            ExitCode::FAILURE
        }
    }
}
