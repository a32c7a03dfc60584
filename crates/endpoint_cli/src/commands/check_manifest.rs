//! Check-manifest command - Validate a command backend manifest.
//!
//! Loads the manifest the way the server would and reports what it
//! declares, including plugins that no declared instance is eligible for.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use endpoint_core::{Manifest, Plugin};
use serde::Serialize;
use tracing::info;

#[derive(Args)]
pub struct CheckManifestArgs {
    /// Manifest file to check
    pub manifest: PathBuf,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Debug, Serialize)]
pub struct ManifestReport {
    pub host: String,
    pub instances: Vec<String>,
    pub plugins: Vec<String>,
    /// Instance-level plugins no declared instance can pair with.
    pub unmatched_plugins: Vec<String>,
}

pub async fn execute(args: CheckManifestArgs) -> Result<()> {
    info!("Checking manifest: {:?}", args.manifest);

    let manifest = Manifest::load(&args.manifest)
        .await
        .with_context(|| format!("Invalid manifest {:?}", args.manifest))?;
    let report = build_report(&manifest);

    if args.format == "json" {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{}", json);
    } else {
        println!("Host:      {}", report.host);
        println!("Instances: {}", report.instances.join(", "));
        println!("Plugins:   {}", report.plugins.join(", "));
        if !report.unmatched_plugins.is_empty() {
            println!(
                "Warning: no instance matches {}",
                report.unmatched_plugins.join(", ")
            );
        }
        println!("Manifest OK");
    }

    Ok(())
}

pub fn build_report(manifest: &Manifest) -> ManifestReport {
    let plugins = manifest.plugins();
    let unmatched_plugins = plugins
        .iter()
        .filter(|plugin| !plugin.is_context_level() && !matches_any(plugin, manifest))
        .map(|plugin| plugin.name.clone())
        .collect();

    ManifestReport {
        host: manifest
            .host
            .as_ref()
            .map(|h| h.name.clone())
            .unwrap_or_else(|| "command".to_string()),
        instances: manifest.instances.iter().map(|i| i.name.clone()).collect(),
        plugins: plugins.iter().map(|p| p.name.clone()).collect(),
        unmatched_plugins,
    }
}

fn matches_any(plugin: &Plugin, manifest: &Manifest) -> bool {
    manifest
        .instances
        .iter()
        .any(|instance| instance.publish && plugin.supports_family(&instance.family))
}
