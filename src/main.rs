use std::{panic, path::Path, process::ExitCode};

use anyhow::{Context, Error};
use clap::Parser;
use log::{error, info, LevelFilter};

use autodisk::{
    check_dependencies, cli::Cli, BackgroundLog, MultiLogger, ProvisionReport, Provisioner,
    SystemHost, AUTODISK_VERSION,
};
use autodisk_api::{
    config::AutodiskConfig,
    constants::{AUTODISK_CONFIG_PATH, AUTODISK_LOG_PATH},
    error::{AutodiskError, AutodiskResultExt, InternalError},
};
use osutils::lock::ProvisionLock;

/// Most verbose level written to the background log.
const BACKGROUND_LOG_LEVEL: LevelFilter = LevelFilter::Debug;

fn run_autodisk(
    config: &AutodiskConfig,
    device: Option<&str>,
    lock: &ProvisionLock,
) -> Result<ProvisionReport, AutodiskError> {
    let res = panic::catch_unwind(|| {
        check_dependencies()?;

        let host = SystemHost::new(config).message("Failed to initialize host access")?;
        Provisioner::new(host, config, device)
            .run(lock)
            .message("Failed to provision disks")
    });

    match res {
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".into());
            Err(AutodiskError::new(InternalError::Panic(message)))
        }
        Ok(r) => r,
    }
}

fn setup_logging(log_file: &Path) -> Result<(), Error> {
    // Regular env_logger output to stderr
    let stderr = env_logger::builder()
        .format_timestamp(None)
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .build();

    // Trace records are only produced when RUST_LOG asks for them
    let max_level = stderr.filter().max(BACKGROUND_LOG_LEVEL);

    MultiLogger::new()
        .with_logger(Box::new(stderr))
        // Keep a debug record of every run
        .with_logger(
            BackgroundLog::new(log_file)
                .with_max_level(BACKGROUND_LOG_LEVEL)
                .into_logger(),
        )
        .with_max_level(max_level)
        .init()
        .context("Logger already registered")
}

fn main() -> ExitCode {
    // Parse args
    let args = Cli::parse();

    // The log file location is configurable, so read the configuration first
    // and report a failure once logging is up
    let config = AutodiskConfig::load(AUTODISK_CONFIG_PATH);
    let log_file = match &config {
        Ok(config) => config.log_file.clone(),
        Err(_) => AUTODISK_LOG_PATH.into(),
    };

    if let Err(e) = setup_logging(&log_file) {
        eprintln!("Failed to initialize logging: {e:?}");
        return ExitCode::from(1);
    }

    info!("autodisk version: {AUTODISK_VERSION}");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e:?}");
            return ExitCode::from(1);
        }
    };

    let lock = match ProvisionLock::acquire(&config.lock_file) {
        Ok(lock) => lock,
        Err(e) => {
            error!("Failed to start: {e:?}");
            return ExitCode::from(1);
        }
    };

    match run_autodisk(&config, args.device.as_deref(), &lock) {
        Ok(report) => {
            for disk in &report.disks {
                match &disk.mount_point {
                    Some(mount_point) => info!(
                        "Disk '{}': partition '{}' ({}, UUID {}) mounted at '{}'",
                        disk.disk,
                        disk.partition,
                        disk.scheme,
                        disk.uuid,
                        mount_point.display()
                    ),
                    None => info!(
                        "Disk '{}': partition '{}' ({}, UUID {}) was already registered",
                        disk.disk, disk.partition, disk.scheme, disk.uuid
                    ),
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("autodisk failed: {e:?}");
            ExitCode::from(2)
        }
    }
}
