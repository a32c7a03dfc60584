//! Serve command - Run the HTTP endpoint until interrupted.
//!
//! Settings come from an optional config file; flags given on the command
//! line override the file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use endpoint_server::{BackendKind, EndpointServer, ServerConfig};
use tracing::info;

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Config file (TOML)
    #[arg(short, long, env = "ENDPOINT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind
    #[arg(short, long, env = "ENDPOINT_PORT")]
    pub port: Option<u16>,

    /// Processing backend (mock, command)
    #[arg(short, long)]
    pub backend: Option<BackendKind>,

    /// Manifest for the command backend
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Per-step timeout in seconds
    #[arg(long)]
    pub step_timeout: Option<u64>,

    /// Accept POST /application/shutdown
    #[arg(long)]
    pub allow_remote_shutdown: bool,
}

pub async fn execute(args: ServeArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    info!(
        host = %config.host,
        port = config.port,
        backend = ?config.backend.kind,
        "Starting endpoint"
    );

    let server = EndpointServer::new(config)?;
    server.serve().await
}

/// Merge the config file, if any, with command-line overrides.
pub fn resolve_config(args: &ServeArgs) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => ServerConfig::default(),
    };

    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(manifest) = &args.manifest {
        config.backend.manifest = Some(manifest.clone());
        // A manifest on its own implies the command backend.
        if args.backend.is_none() {
            config.backend.kind = BackendKind::Command;
        }
    }
    if let Some(kind) = args.backend {
        config.backend.kind = kind;
    }
    if let Some(secs) = args.step_timeout {
        config.engine.step_timeout_secs = Some(secs);
    }
    if args.allow_remote_shutdown {
        config.allow_remote_shutdown = true;
    }

    config.validate()?;
    Ok(config)
}
