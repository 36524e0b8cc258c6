use std::{panic, path::Path, process::ExitCode};

use anyhow::{Context, Error};
use clap::Parser;
use log::{error, info};

use sabayon_api::{
    constants::{INSTALLER_BACKGROUND_LOG_PATH, INSTALLER_TRACE_PATH},
    error::{InstallerError, InstallerResultExt, InternalError},
};
use sabayon_installer::{
    cli::{Cli, Commands},
    validation, BackgroundLog, MultiLogger, PhaseTrace, INSTALLER_VERSION,
};

/// Saves `error` as YAML for the frontend to display.
fn write_error(path: &Path, error: &InstallerError) {
    let serialized = match serde_yaml::to_string(error) {
        Ok(serialized) => serialized,
        Err(e) => {
            error!("Failed to serialize error: {e}");
            return;
        }
    };
    if let Err(e) = std::fs::write(path, serialized) {
        error!("Failed to write error to file: {e}");
    }
}

fn run_installer(args: &Cli) -> Result<(), InstallerError> {
    // Log version ASAP
    info!("Sabayon installer version: {INSTALLER_VERSION}");

    // Catch exit fast commands
    match &args.command {
        Commands::Validate { config } => return validation::validate_config_file(config),
        Commands::Classes => {
            sabayon_installer::list_classes();
            return Ok(());
        }
        _ => (),
    }

    let res = panic::catch_unwind(|| match &args.command {
        Commands::Install { config, error } | Commands::Copy { config, error } => {
            let res = if matches!(args.command, Commands::Install { .. }) {
                sabayon_installer::install(config)
            } else {
                sabayon_installer::copy(config)
            };

            // return error if requested
            if let (Some(error_path), Err(e)) = (error.as_ref(), &res) {
                write_error(error_path, e);
            }
            res.message(format!("Failed to execute '{}' command", args.command))
        }
        Commands::Network { config } => sabayon_installer::configure_network(config)
            .message(format!("Failed to execute '{}' command", args.command)),
        _ => Err(InstallerError::internal("Invalid command")),
    });

    match res {
        Err(e) => Err(InstallerError::new(InternalError::Panic(format!("{e:?}")))),
        Ok(r) => r,
    }
}

fn setup_logging(args: &Cli) -> Result<(), Error> {
    // Set up the multilogger
    let mut multilogger = MultiLogger::new()
        // Add regular env_logger to output to stderr
        .with_logger(Box::new(
            env_logger::builder()
                .format_timestamp(None)
                .filter_level(args.verbosity)
                .build(),
        ));

    // Add background logger if we're running a command that needs it
    if args.command.writes_target() {
        multilogger.add_logger(BackgroundLog::new(INSTALLER_BACKGROUND_LOG_PATH).into_logger());
    }

    multilogger.init().context("Logger already registered")
}

fn setup_tracing(args: &Cli) -> Result<(), Error> {
    use tracing_subscriber::{filter, layer::SubscriberExt, Layer};

    if args.command.writes_target() {
        let phase_trace =
            PhaseTrace::new(INSTALLER_TRACE_PATH).with_filter(filter::LevelFilter::INFO);

        tracing::subscriber::set_global_default(
            tracing_subscriber::Registry::default().with(phase_trace),
        )
        .context("Failed to set global default subscriber")?;
    }

    Ok(())
}

fn main() -> ExitCode {
    // Parse args
    let args = Cli::parse();

    // Initialize the loggers
    if let Err(e) = setup_logging(&args) {
        eprintln!("Failed to initialize logging: {e:?}");
        return ExitCode::from(1);
    }

    if let Err(e) = setup_tracing(&args) {
        error!("Failed to initialize tracing: {e:?}");
        return ExitCode::from(1);
    }

    // Invoke the installer
    if let Err(e) = run_installer(&args) {
        error!("Sabayon installer failed: {e:?}");
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}
