//! CLI command definitions.

use clap::{Parser, Subcommand, ValueEnum};

pub mod check_manifest;
pub mod serve;

/// Stepwise publishing endpoint
#[derive(Parser)]
#[command(name = "endpoint")]
#[command(version, about = "HTTP endpoint for stepwise publishing")]
#[command(long_about = r#"
Serves a publishing session over HTTP so that an integration frontend can
select instances and plugins and then process them one pairing at a time.

COMMANDS:
  serve           → Start the HTTP endpoint
  check-manifest  → Validate a command backend manifest

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid configuration
  3 - Invalid manifest

Logging honours RUST_LOG, e.g. RUST_LOG=endpoint_core=debug.
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP endpoint
    Serve(serve::ServeArgs),

    /// Validate a command backend manifest
    #[command(name = "check-manifest")]
    CheckManifest(check_manifest::CheckManifestArgs),
}
