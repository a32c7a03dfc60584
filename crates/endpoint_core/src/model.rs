//! Records exchanged between the engine, its backends and clients.
//!
//! Instances and plugins are enumerated by a
//! [`ProcessingBackend`](crate::backend::ProcessingBackend) when a session is
//! created and stay read-only for the lifetime of that session. Every call to
//! `advance` yields exactly one [`StepResult`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Family wildcard accepted in [`Plugin::families`].
pub const ANY_FAMILY: &str = "*";

/// A unit of data selected for processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub family: String,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default = "default_publish")]
    pub publish: bool,
}

fn default_publish() -> bool {
    true
}

impl Instance {
    pub fn new(name: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            family: family.into(),
            nodes: Vec::new(),
            data: Map::new(),
            publish: true,
        }
    }

    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.nodes.push(node.into());
        self
    }

    pub fn data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn publish(mut self, publish: bool) -> Self {
        self.publish = publish;
        self
    }
}

/// Processing stage a plugin belongs to.
///
/// Backends list plugins in stage order; the derived `Ord` follows
/// declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    Selector,
    Validator,
    Extractor,
    Conformer,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Selector => "selector",
            PluginKind::Validator => "validator",
            PluginKind::Extractor => "extractor",
            PluginKind::Conformer => "conformer",
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a plugin runs once per instance or once for the whole context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginScope {
    #[default]
    Instance,
    Context,
}

/// A named, versioned processing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plugin {
    pub name: String,
    pub version: String,
    pub kind: PluginKind,
    #[serde(default)]
    pub scope: PluginScope,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub families: Vec<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub optional: bool,
}

impl Plugin {
    pub fn new(name: impl Into<String>, kind: PluginKind) -> Self {
        Self {
            name: name.into(),
            version: "0.0.1".to_string(),
            kind,
            scope: PluginScope::Instance,
            requires: Vec::new(),
            families: vec![ANY_FAMILY.to_string()],
            hosts: vec![ANY_FAMILY.to_string()],
            optional: false,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn scope(mut self, scope: PluginScope) -> Self {
        self.scope = scope;
        self
    }

    /// Replace the compatible families.
    pub fn families<I, S>(mut self, families: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.families = families.into_iter().map(Into::into).collect();
        self
    }

    pub fn requires(mut self, plugin: impl Into<String>) -> Self {
        self.requires.push(plugin.into());
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Whether this plugin accepts instances of `family`.
    pub fn supports_family(&self, family: &str) -> bool {
        self.families
            .iter()
            .any(|f| f == ANY_FAMILY || f == family)
    }

    pub fn is_context_level(&self) -> bool {
        self.scope == PluginScope::Context
    }
}

/// Sort plugins into processing order, keeping the relative order of
/// plugins of the same kind.
pub fn sort_plugins(plugins: &mut [Plugin]) {
    plugins.sort_by_key(|p| p.kind);
}

/// Identification of the host the backend runs inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub name: String,
    pub version: String,
}

/// A log entry emitted while running a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Where a step failure originated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// The plugin ran and reported a failure.
    Plugin,
    /// The backend could not run the plugin at all.
    Backend,
    /// The backend did not finish within the step timeout.
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

/// Outcome of executing a single (plugin, instance) pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub plugin: String,
    pub instance: Option<String>,
    pub log: Vec<LogEntry>,
    pub success: bool,
    pub error: Option<StepError>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl StepResult {
    pub fn success(plugin: impl Into<String>, instance: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            plugin: plugin.into(),
            instance,
            log: Vec::new(),
            success: true,
            error: None,
            started_at: now,
            completed_at: now,
        }
    }

    pub fn failure(
        plugin: impl Into<String>,
        instance: Option<String>,
        kind: StepErrorKind,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            plugin: plugin.into(),
            instance,
            log: Vec::new(),
            success: false,
            error: Some(StepError {
                kind,
                message: message.into(),
            }),
            started_at: now,
            completed_at: now,
        }
    }

    pub fn with_log(mut self, entry: LogEntry) -> Self {
        self.log.push(entry);
        self
    }

    pub fn with_logs(mut self, entries: impl IntoIterator<Item = LogEntry>) -> Self {
        self.log.extend(entries);
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = at;
        self
    }

    /// Make `success` agree with `error`.
    ///
    /// A result carrying an error is a failure; a failure without an error
    /// gets a generic plugin error.
    pub fn normalized(mut self) -> Self {
        if self.error.is_some() {
            self.success = false;
        } else if !self.success {
            self.error = Some(StepError {
                kind: StepErrorKind::Plugin,
                message: format!("{} reported failure", self.plugin),
            });
        }
        self
    }

    /// Log messages without level or timestamp.
    pub fn messages(&self) -> Vec<&str> {
        self.log.iter().map(|e| e.message.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_result() {
        let mut contradictory = StepResult::success("ValidateNamespace", None);
        contradictory.error = Some(StepError {
            kind: StepErrorKind::Plugin,
            message: "bad namespace".into(),
        });
        let result = contradictory.normalized();
        assert!(!result.success);
        assert_eq!(result.error.unwrap().message, "bad namespace");

        let mut silent = StepResult::success("ValidateNamespace", None);
        silent.success = false;
        let result = silent.normalized();
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, StepErrorKind::Plugin);

        assert!(StepResult::success("ExtractAsMa", None).normalized().success);
    }

    #[test]
    fn test_plugin_builder() {
        let plugin = Plugin::new("ExtractAsMa", PluginKind::Extractor)
            .version("1.2.0")
            .requires("ValidateNamespace");
        assert_eq!(plugin.version, "1.2.0");
        assert_eq!(plugin.requires, vec!["ValidateNamespace"]);
    }

    #[test]
    fn test_family_wildcard() {
        let plugin = Plugin::new("ValidateAnything", PluginKind::Validator);
        assert!(plugin.supports_family("napoleon.asset.rig"));

        let plugin = plugin.families(["napoleon.animation.cache"]);
        assert!(plugin.supports_family("napoleon.animation.cache"));
        assert!(!plugin.supports_family("napoleon.asset.rig"));
    }

    #[test]
    fn test_sort_plugins_is_stable_within_kind() {
        let mut plugins = vec![
            Plugin::new("ExtractAsMa", PluginKind::Extractor),
            Plugin::new("ConformAsset", PluginKind::Conformer),
            Plugin::new("ValidateB", PluginKind::Validator),
            Plugin::new("ValidateA", PluginKind::Validator),
            Plugin::new("SelectScene", PluginKind::Selector),
        ];
        sort_plugins(&mut plugins);

        let names: Vec<_> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["SelectScene", "ValidateB", "ValidateA", "ExtractAsMa", "ConformAsset"]
        );
    }

    #[test]
    fn test_step_result_failure_carries_error() {
        let result = StepResult::failure(
            "ValidateFailureMock",
            Some("Richard05".to_string()),
            StepErrorKind::Plugin,
            "Instance failed",
        )
        .with_log(LogEntry::error("Instance failed"));

        assert!(!result.success);
        assert_eq!(result.error.as_ref().map(|e| e.kind), Some(StepErrorKind::Plugin));
        assert_eq!(result.messages(), vec!["Instance failed"]);
    }

    #[test]
    fn test_instance_defaults_on_deserialize() {
        let instance: Instance =
            serde_json::from_str(r#"{"name": "Marcus", "family": "napoleon.animation.cache"}"#)
                .unwrap();
        assert!(instance.publish);
        assert!(instance.nodes.is_empty());
        assert!(instance.data.is_empty());
    }
}
