//! Backend that runs plugins as external commands.
//!
//! Instances and plugins are described in a TOML manifest:
//!
//! ```toml
//! [host]
//! name = "shell"
//! version = "1.0"
//!
//! [[instances]]
//! name = "Richard05"
//! family = "napoleon.animation.cache"
//! nodes = ["node1", "node2"]
//!
//! [instances.data]
//! minWidth = 800
//!
//! [[plugins]]
//! name = "ValidateNamespace"
//! kind = "validator"
//! families = ["napoleon.animation.cache"]
//! command = ["sh", "-c", "echo validating $ENDPOINT_INSTANCE"]
//! ```
//!
//! The manifest is read again on every enumeration so edits are picked up
//! by the next session. Commands run with the manifest's directory as their
//! working directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::backend::ProcessingBackend;
use crate::error::{EndpointError, EndpointResult};
use crate::model::{
    sort_plugins, HostInfo, Instance, LogEntry, Plugin, PluginKind, PluginScope, StepErrorKind,
    StepResult, ANY_FAMILY,
};

/// Parsed manifest file.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub host: Option<HostInfo>,
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(default)]
    pub plugins: Vec<PluginCommand>,
}

/// A plugin entry together with the command that implements it.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginCommand {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub kind: PluginKind,
    #[serde(default)]
    pub scope: PluginScope,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default = "any_family")]
    pub families: Vec<String>,
    #[serde(default = "any_family")]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub optional: bool,
    pub command: Vec<String>,
}

fn default_version() -> String {
    "0.0.1".to_string()
}

fn any_family() -> Vec<String> {
    vec![ANY_FAMILY.to_string()]
}

impl PluginCommand {
    pub fn to_plugin(&self) -> Plugin {
        Plugin {
            name: self.name.clone(),
            version: self.version.clone(),
            kind: self.kind,
            scope: self.scope,
            requires: self.requires.clone(),
            families: self.families.clone(),
            hosts: self.hosts.clone(),
            optional: self.optional,
        }
    }
}

impl Manifest {
    /// Read and validate a manifest.
    pub async fn load(path: &Path) -> EndpointResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            EndpointError::Manifest(format!("cannot read {}: {}", path.display(), e))
        })?;
        let manifest: Self = toml::from_str(&content).map_err(|e| {
            EndpointError::Manifest(format!("cannot parse {}: {}", path.display(), e))
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> EndpointResult<()> {
        for plugin in &self.plugins {
            if plugin.command.is_empty() {
                return Err(EndpointError::Manifest(format!(
                    "plugin '{}' has an empty command",
                    plugin.name
                )));
            }
        }
        Ok(())
    }

    /// Plugins in processing order.
    pub fn plugins(&self) -> Vec<Plugin> {
        let mut plugins: Vec<Plugin> = self.plugins.iter().map(PluginCommand::to_plugin).collect();
        sort_plugins(&mut plugins);
        plugins
    }

    fn command_for(&self, plugin: &str) -> Option<&[String]> {
        self.plugins
            .iter()
            .find(|p| p.name == plugin)
            .map(|p| p.command.as_slice())
    }
}

/// Processing backend backed by a manifest of shell commands.
///
/// Host information comes from the last manifest that loaded successfully.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    manifest_path: PathBuf,
    host: Arc<RwLock<Option<HostInfo>>>,
}

impl CommandBackend {
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            host: Arc::new(RwLock::new(None)),
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    async fn load(&self) -> EndpointResult<Manifest> {
        let manifest = Manifest::load(&self.manifest_path)
            .await
            .map_err(|e| EndpointError::BackendUnavailable(e.to_string()))?;
        *self.host.write() = manifest.host.clone();
        Ok(manifest)
    }

    fn workdir(&self) -> &Path {
        self.manifest_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

#[async_trait]
impl ProcessingBackend for CommandBackend {
    fn host(&self) -> HostInfo {
        self.host
            .read()
            .clone()
            .unwrap_or_else(|| HostInfo {
                name: "command".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            })
    }

    async fn enumerate_instances(&self) -> EndpointResult<Vec<Instance>> {
        Ok(self.load().await?.instances)
    }

    async fn enumerate_plugins(&self) -> EndpointResult<Vec<Plugin>> {
        Ok(self.load().await?.plugins())
    }

    async fn run(&self, plugin: &Plugin, instance: Option<&Instance>) -> EndpointResult<StepResult> {
        let manifest = self.load().await?;
        let argv = manifest
            .command_for(&plugin.name)
            .ok_or_else(|| EndpointError::UnknownName(plugin.name.clone()))?;
        let (program, args) = argv.split_first().ok_or_else(|| EndpointError::Backend {
            plugin: plugin.name.clone(),
            message: "empty command".to_string(),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(self.workdir())
            .env("ENDPOINT_PLUGIN", &plugin.name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(instance) = instance {
            cmd.env("ENDPOINT_INSTANCE", &instance.name)
                .env("ENDPOINT_FAMILY", &instance.family)
                .env("ENDPOINT_INSTANCE_DATA", serde_json::to_string(&instance.data)?);
        }

        debug!("Running {} for plugin {}", argv.join(" "), plugin.name);
        let started_at = Utc::now();
        let output = cmd.output().await.map_err(|e| EndpointError::Backend {
            plugin: plugin.name.clone(),
            message: format!("failed to spawn '{}': {}", program, e),
        })?;

        let mut log: Vec<LogEntry> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(LogEntry::info)
            .collect();
        let stderr = String::from_utf8_lossy(&output.stderr);
        log.extend(stderr.lines().map(LogEntry::warn));

        let instance_name = instance.map(|i| i.name.clone());
        let result = if output.status.success() {
            StepResult::success(&plugin.name, instance_name)
        } else {
            let message = match output.status.code() {
                Some(code) => format!("{} exited with status {}", plugin.name, code),
                None => format!("{} was terminated by a signal", plugin.name),
            };
            warn!("{}", message);
            StepResult::failure(&plugin.name, instance_name, StepErrorKind::Plugin, message)
        };

        Ok(result.with_logs(log).started_at(started_at))
    }
}
