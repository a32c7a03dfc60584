//! Endpoint CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid configuration
//! - 3: Invalid manifest

use std::process::ExitCode;

use clap::Parser;
use endpoint_core::EndpointError;
use endpoint_server::ConfigError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands, LogFormat};

pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_CONFIG: u8 = 2;
    pub const INVALID_MANIFEST: u8 = 3;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.verbose);

    let result = match cli.command {
        Commands::Serve(args) => commands::serve::execute(args).await,
        Commands::CheckManifest(args) => commands::check_manifest::execute(args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(categorize_error(&e))
        }
    }
}

fn init_logging(format: LogFormat, verbose: bool) {
    let default_directive = if verbose { "endpoint=debug" } else { "endpoint=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},warn", default_directive)));

    let registry = tracing_subscriber::registry().with(filter);
    // A subscriber may already be installed; keep it.
    let _ = match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
}

fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ExitCodes::INVALID_CONFIG;
        }
        if let Some(EndpointError::Manifest(_)) = cause.downcast_ref::<EndpointError>() {
            return ExitCodes::INVALID_MANIFEST;
        }
    }
    ExitCodes::GENERAL_ERROR
}
