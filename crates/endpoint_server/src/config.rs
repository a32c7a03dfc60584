//! Server configuration.
//!
//! Loaded from an optional TOML file; every field has a default so an
//! empty file, or no file at all, gives a working mock server on
//! `127.0.0.1:6000`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use endpoint_core::{
    CommandBackend, EngineConfig, LockScope, MockBackend, ProcessingBackend,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PREFIX: &str = "/pyblish/v1";
pub const DEFAULT_PORT: u16 = 6000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which processing backend to serve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Mock,
    Command,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "command" => Ok(Self::Command),
            other => Err(format!("unknown backend '{}' (expected mock or command)", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Manifest for the command backend.
    pub manifest: Option<PathBuf>,
    /// Limit the mock fixture to this many instances.
    pub mock_instances: Option<usize>,
    /// Artificial duration of every mock step.
    pub mock_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub step_timeout_secs: Option<u64>,
    pub lock_scope: LockScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path prefix every route is mounted under.
    pub prefix: String,
    pub allow_remote_shutdown: bool,
    /// How long `POST /client` waits for a message before answering with a
    /// heartbeat.
    pub client_poll_timeout_ms: u64,
    pub client_queue_capacity: usize,
    pub engine: EngineSection,
    pub backend: BackendConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            prefix: DEFAULT_PREFIX.to_string(),
            allow_remote_shutdown: false,
            client_poll_timeout_ms: 1000,
            client_queue_capacity: 256,
            engine: EngineSection::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load a config file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.prefix.is_empty() && !self.prefix.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "prefix must start with '/': {}",
                self.prefix
            )));
        }
        if self.prefix.len() > 1 && self.prefix.ends_with('/') {
            return Err(ConfigError::Invalid(format!(
                "prefix must not end with '/': {}",
                self.prefix
            )));
        }
        if self.backend.kind == BackendKind::Command && self.backend.manifest.is_none() {
            return Err(ConfigError::Invalid(
                "the command backend requires a manifest".to_string(),
            ));
        }
        if self.engine.step_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "step_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bad listen address: {}", e)))
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new().lock_scope(self.engine.lock_scope);
        if let Some(secs) = self.engine.step_timeout_secs {
            config = config.step_timeout(Duration::from_secs(secs));
        }
        config
    }

    pub fn client_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.client_poll_timeout_ms)
    }

    /// Instantiate the configured backend.
    pub fn build_backend(&self) -> Result<Arc<dyn ProcessingBackend>, ConfigError> {
        match self.backend.kind {
            BackendKind::Mock => {
                let mut backend = MockBackend::new()
                    .with_delay(Duration::from_millis(self.backend.mock_delay_ms));
                if let Some(count) = self.backend.mock_instances {
                    backend = backend.with_instance_count(count);
                }
                Ok(Arc::new(backend))
            }
            BackendKind::Command => {
                let manifest = self.backend.manifest.clone().ok_or_else(|| {
                    ConfigError::Invalid("the command backend requires a manifest".to_string())
                })?;
                Ok(Arc::new(CommandBackend::new(manifest)))
            }
        }
    }
}
