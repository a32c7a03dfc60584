//! Deterministic fixture backend.
//!
//! Provides a configurable in-memory implementation of
//! [`ProcessingBackend`] for tests and for running the endpoint without a
//! host application.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::info;

use crate::backend::ProcessingBackend;
use crate::error::{EndpointError, EndpointResult};
use crate::model::{
    sort_plugins, HostInfo, Instance, LogEntry, Plugin, PluginKind, StepErrorKind, StepResult,
};

const CACHE_FAMILY: &str = "napoleon.animation.cache";
const RIG_FAMILY: &str = "napoleon.asset.rig";

/// Scripted outcome for a plugin run.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Succeed and emit these log lines.
    Succeed(Vec<String>),
    /// Report a plugin failure with this message.
    Fail(String),
    /// Fail to run at all, as a broken host would.
    Error(String),
}

impl MockBehavior {
    pub fn succeed<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Succeed(lines.into_iter().map(Into::into).collect())
    }
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self::succeed(["Running first pass..", "Almost done..", "Completed successfully!"])
    }
}

/// A recorded call to [`MockBackend::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRun {
    pub plugin: String,
    pub instance: Option<String>,
}

/// Mock processing backend.
///
/// Clones share their configuration and captured calls, so a test can keep
/// a handle after giving the backend to an engine.
#[derive(Clone)]
pub struct MockBackend {
    instances: Arc<RwLock<Vec<Instance>>>,
    plugins: Arc<RwLock<Vec<Plugin>>>,
    behaviors: Arc<RwLock<HashMap<String, MockBehavior>>>,
    delay: Arc<RwLock<Duration>>,
    enumeration_failure: Arc<RwLock<Option<String>>>,
    captured_runs: Arc<RwLock<Vec<CapturedRun>>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a backend loaded with the standard fixture.
    pub fn new() -> Self {
        let mut behaviors = HashMap::new();
        behaviors.insert(
            "ValidateNamespace".to_string(),
            MockBehavior::succeed(["Validating namespace..", "Completed validating namespace!"]),
        );
        behaviors.insert(
            "ValidateFailureMock".to_string(),
            MockBehavior::Fail("Instance failed".to_string()),
        );

        Self {
            instances: Arc::new(RwLock::new(fixture_instances())),
            plugins: Arc::new(RwLock::new(fixture_plugins())),
            behaviors: Arc::new(RwLock::new(behaviors)),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            enumeration_failure: Arc::new(RwLock::new(None)),
            captured_runs: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Create a backend with no instances or plugins.
    pub fn empty() -> Self {
        let backend = Self::new();
        backend.instances.write().clear();
        backend.plugins.write().clear();
        backend.behaviors.write().clear();
        backend
    }

    /// Keep only the first `count` fixture instances.
    pub fn with_instance_count(self, count: usize) -> Self {
        self.instances.write().truncate(count);
        self
    }

    pub fn with_instances(self, instances: Vec<Instance>) -> Self {
        *self.instances.write() = instances;
        self
    }

    pub fn with_plugins(self, plugins: Vec<Plugin>) -> Self {
        *self.plugins.write() = plugins;
        self
    }

    pub fn add_instance(self, instance: Instance) -> Self {
        self.instances.write().push(instance);
        self
    }

    pub fn add_plugin(self, plugin: Plugin) -> Self {
        self.plugins.write().push(plugin);
        self
    }

    /// Script the outcome of every run of `plugin`.
    pub fn with_behavior(self, plugin: impl Into<String>, behavior: MockBehavior) -> Self {
        self.behaviors.write().insert(plugin.into(), behavior);
        self
    }

    /// Make every run take at least `delay`.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.write() = delay;
        self
    }

    /// Make enumeration fail with `message`.
    pub fn fail_enumeration(self, message: impl Into<String>) -> Self {
        *self.enumeration_failure.write() = Some(message.into());
        self
    }

    /// Restore enumeration after [`fail_enumeration`](Self::fail_enumeration).
    pub fn restore_enumeration(&self) {
        *self.enumeration_failure.write() = None;
    }

    /// Replace the instances seen by the next enumeration.
    pub fn set_instances(&self, instances: Vec<Instance>) {
        *self.instances.write() = instances;
    }

    pub fn runs(&self) -> Vec<CapturedRun> {
        self.captured_runs.read().clone()
    }

    pub fn run_count(&self) -> usize {
        self.captured_runs.read().len()
    }

    fn check_enumeration(&self) -> EndpointResult<()> {
        if let Some(msg) = self.enumeration_failure.read().clone() {
            return Err(EndpointError::BackendUnavailable(msg));
        }
        Ok(())
    }

    fn behavior_for(&self, plugin: &str) -> MockBehavior {
        self.behaviors
            .read()
            .get(plugin)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProcessingBackend for MockBackend {
    fn host(&self) -> HostInfo {
        HostInfo {
            name: "mock".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    async fn enumerate_instances(&self) -> EndpointResult<Vec<Instance>> {
        self.check_enumeration()?;
        Ok(self.instances.read().clone())
    }

    async fn enumerate_plugins(&self) -> EndpointResult<Vec<Plugin>> {
        self.check_enumeration()?;
        let mut plugins = self.plugins.read().clone();
        sort_plugins(&mut plugins);
        Ok(plugins)
    }

    async fn run(&self, plugin: &Plugin, instance: Option<&Instance>) -> EndpointResult<StepResult> {
        let instance_name = instance.map(|i| i.name.clone());
        self.captured_runs.write().push(CapturedRun {
            plugin: plugin.name.clone(),
            instance: instance_name.clone(),
        });

        let started_at = Utc::now();
        let delay = *self.delay.read();
        if !delay.is_zero() {
            info!("Pretending {} takes {:?} to complete..", plugin.name, delay);
            tokio::time::sleep(delay).await;
        }

        let result = match self.behavior_for(&plugin.name) {
            MockBehavior::Succeed(lines) => StepResult::success(&plugin.name, instance_name)
                .with_logs(lines.into_iter().map(LogEntry::info)),
            MockBehavior::Fail(message) => StepResult::failure(
                &plugin.name,
                instance_name,
                StepErrorKind::Plugin,
                message.clone(),
            )
            .with_log(LogEntry::error(message)),
            MockBehavior::Error(message) => {
                return Err(EndpointError::Backend {
                    plugin: plugin.name.clone(),
                    message,
                });
            }
        };

        Ok(result.started_at(started_at))
    }
}

fn fixture_instances() -> Vec<Instance> {
    ["Peter01", "Richard05", "Steven11", "Piraya12", "Marcus"]
        .into_iter()
        .map(|name| {
            let instance = Instance::new(name, CACHE_FAMILY)
                .node("node1")
                .node("node2")
                .node("node3")
                .data("identifier", "napoleon.instance")
                .data("minWidth", 800)
                .data("assetSource", "/server/assets/Peter")
                .data("destination", "/server/published/assets");

            if name == "Peter01" {
                Instance {
                    family: RIG_FAMILY.to_string(),
                    ..instance.publish(false)
                }
            } else {
                instance
            }
        })
        .collect()
}

fn fixture_plugins() -> Vec<Plugin> {
    vec![
        Plugin::new("ExtractAsMa", PluginKind::Extractor)
            .version("1.0.0")
            .families([CACHE_FAMILY])
            .requires("ValidateNamespace"),
        Plugin::new("ConformAsset", PluginKind::Conformer)
            .version("1.0.0")
            .families([RIG_FAMILY])
            .requires("ExtractAsMa"),
        Plugin::new("ValidateFailureMock", PluginKind::Validator).optional(true),
        Plugin::new("ValidateNamespace", PluginKind::Validator).families([CACHE_FAMILY]),
        Plugin::new("ValidateIsIncompatible", PluginKind::Validator)
            .families(["napoleon.incompatible"])
            .optional(true),
    ]
}
