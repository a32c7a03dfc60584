//! Client-chosen selection of instances and plugins.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EndpointError, EndpointResult};

/// The ordered instance and plugin names a client wants processed.
///
/// Names are not checked against the catalog; names the backend does not
/// know about are kept here but never produce a pairing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub instances: Vec<String>,
    pub plugins: Vec<String>,
}

impl State {
    pub fn new<I, P, S, T>(instances: I, plugins: P) -> Self
    where
        I: IntoIterator<Item = S>,
        P: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            instances: instances.into_iter().map(Into::into).collect(),
            plugins: plugins.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty() && self.plugins.is_empty()
    }

    /// Decode a client-supplied value into a state.
    ///
    /// Accepts a mapping with `instances` and `plugins` arrays of strings,
    /// or a string holding such a mapping as JSON. Any other shape is
    /// `MalformedState`.
    pub fn decode(value: &Value) -> EndpointResult<Self> {
        match value {
            Value::String(raw) => {
                let parsed: Value = serde_json::from_str(raw).map_err(|e| {
                    EndpointError::MalformedState(format!("could not de-serialise state: {}", e))
                })?;
                if parsed.is_string() {
                    return Err(EndpointError::MalformedState(
                        "state must be a mapping".to_string(),
                    ));
                }
                Self::decode(&parsed)
            }
            Value::Object(map) => {
                let instances = names(map.get("instances"), "instances")?;
                let plugins = names(map.get("plugins"), "plugins")?;
                Ok(Self { instances, plugins })
            }
            _ => Err(EndpointError::MalformedState(
                "state must be a mapping".to_string(),
            )),
        }
    }
}

fn names(value: Option<&Value>, key: &str) -> EndpointResult<Vec<String>> {
    let items = value
        .ok_or_else(|| EndpointError::MalformedState(format!("missing '{}'", key)))?
        .as_array()
        .ok_or_else(|| EndpointError::MalformedState(format!("'{}' must be an array", key)))?;

    items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                EndpointError::MalformedState(format!("'{}' must contain only names", key))
            })
        })
        .collect()
}
