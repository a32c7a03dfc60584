//! Processing backend contract and the catalog it enumerates.
//!
//! The engine never runs plugins itself. A backend enumerates what is
//! available in the host and runs one plugin against one instance (or the
//! whole context) when asked.
//!
//! # Example
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use endpoint_core::{EndpointResult, HostInfo, Instance, Plugin, ProcessingBackend, StepResult};
//!
//! struct MyHost;
//!
//! #[async_trait]
//! impl ProcessingBackend for MyHost {
//!     fn host(&self) -> HostInfo { HostInfo { name: "myhost".into(), version: "1.0".into() } }
//!     async fn enumerate_instances(&self) -> EndpointResult<Vec<Instance>> { Ok(vec![]) }
//!     async fn enumerate_plugins(&self) -> EndpointResult<Vec<Plugin>> { Ok(vec![]) }
//!     async fn run(&self, plugin: &Plugin, instance: Option<&Instance>) -> EndpointResult<StepResult> {
//!         Ok(StepResult::success(&plugin.name, instance.map(|i| i.name.clone())))
//!     }
//! }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{EndpointError, EndpointResult};
use crate::model::{HostInfo, Instance, Plugin, StepResult};

/// Trait for host-side processing implementations.
///
/// Errors returned from the `enumerate_*` methods make session creation
/// fail. Errors returned from `run` are captured into a failed
/// [`StepResult`] by the engine and never reach the client as a transport
/// failure.
#[async_trait]
pub trait ProcessingBackend: Send + Sync {
    /// Identify the host this backend runs inside.
    fn host(&self) -> HostInfo;

    /// List the instances currently available in the host.
    async fn enumerate_instances(&self) -> EndpointResult<Vec<Instance>>;

    /// List the available plugins, in processing order.
    async fn enumerate_plugins(&self) -> EndpointResult<Vec<Plugin>>;

    /// Run `plugin` against `instance`, or against the whole context when
    /// `instance` is `None`.
    async fn run(&self, plugin: &Plugin, instance: Option<&Instance>) -> EndpointResult<StepResult>;
}

/// Snapshot of everything a backend enumerated for one session.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    instances: Vec<Instance>,
    plugins: Vec<Plugin>,
    instance_index: HashMap<String, usize>,
    plugin_index: HashMap<String, usize>,
}

impl Catalog {
    /// Build a catalog; on duplicate names the first entry wins lookups.
    pub fn new(instances: Vec<Instance>, plugins: Vec<Plugin>) -> Self {
        let mut instance_index = HashMap::new();
        for (i, instance) in instances.iter().enumerate() {
            instance_index.entry(instance.name.clone()).or_insert(i);
        }
        let mut plugin_index = HashMap::new();
        for (i, plugin) in plugins.iter().enumerate() {
            plugin_index.entry(plugin.name.clone()).or_insert(i);
        }
        Self {
            instances,
            plugins,
            instance_index,
            plugin_index,
        }
    }

    /// Enumerate instances and plugins from `backend`.
    pub async fn load(backend: &dyn ProcessingBackend) -> EndpointResult<Self> {
        let instances = backend
            .enumerate_instances()
            .await
            .map_err(into_unavailable)?;
        let plugins = backend
            .enumerate_plugins()
            .await
            .map_err(into_unavailable)?;
        debug!(
            instances = instances.len(),
            plugins = plugins.len(),
            "Enumerated catalog"
        );
        Ok(Self::new(instances, plugins))
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.instance_index.get(name).map(|&i| &self.instances[i])
    }

    pub fn plugin(&self, name: &str) -> Option<&Plugin> {
        self.plugin_index.get(name).map(|&i| &self.plugins[i])
    }

    /// Look up an instance, failing with `UnknownName` when absent.
    pub fn require_instance(&self, name: &str) -> EndpointResult<&Instance> {
        self.instance(name)
            .ok_or_else(|| EndpointError::UnknownName(name.to_string()))
    }
}

fn into_unavailable(err: EndpointError) -> EndpointError {
    match err {
        EndpointError::BackendUnavailable(_) => err,
        other => EndpointError::BackendUnavailable(other.to_string()),
    }
}
