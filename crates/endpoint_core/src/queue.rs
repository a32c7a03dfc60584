//! Deterministic ordering of (plugin, instance) pairings.
//!
//! Pairings are produced plugin-major, instance-minor, in the order the
//! client put them in its [`State`]. An instance-level plugin is paired with
//! every eligible instance; a context-level plugin yields exactly one pairing
//! with no instance. Incompatible pairs are skipped without consuming
//! anything.

use tracing::debug;

use crate::backend::Catalog;
use crate::model::{Instance, Plugin};
use crate::state::State;

/// Position within the pairing order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub plugin: usize,
    pub instance: usize,
}

impl Cursor {
    fn next_plugin(self) -> Self {
        Self {
            plugin: self.plugin + 1,
            instance: 0,
        }
    }

    fn next_instance(self) -> Self {
        Self {
            plugin: self.plugin,
            instance: self.instance + 1,
        }
    }
}

/// One eligible unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Pairing {
    pub plugin: Plugin,
    pub instance: Option<Instance>,
    position: Cursor,
}

impl Pairing {
    pub fn instance_name(&self) -> Option<&str> {
        self.instance.as_ref().map(|i| i.name.as_str())
    }

    fn following(&self) -> Cursor {
        if self.instance.is_none() {
            self.position.next_plugin()
        } else {
            self.position.next_instance()
        }
    }
}

/// Pairing queue over a resolved state.
#[derive(Debug, Clone, Default)]
pub struct PairingQueue {
    plugins: Vec<Plugin>,
    instances: Vec<Instance>,
    cursor: Cursor,
    consumed: usize,
}

impl PairingQueue {
    /// Resolve `state` against `catalog`, starting at the first pairing.
    ///
    /// Names missing from the catalog are dropped here; they never match.
    pub fn new(state: &State, catalog: &Catalog) -> Self {
        let plugins = state
            .plugins
            .iter()
            .filter_map(|name| {
                let plugin = catalog.plugin(name);
                if plugin.is_none() {
                    debug!(plugin = %name, "Ignoring unknown plugin in state");
                }
                plugin.cloned()
            })
            .collect();

        let instances = state
            .instances
            .iter()
            .filter_map(|name| {
                let instance = catalog.instance(name);
                if instance.is_none() {
                    debug!(instance = %name, "Ignoring unknown instance in state");
                }
                instance.cloned()
            })
            .collect();

        Self {
            plugins,
            instances,
            cursor: Cursor::default(),
            consumed: 0,
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Number of pairings consumed so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// The next eligible pairing at or after the cursor, or `None` when the
    /// queue is exhausted.
    pub fn peek(&self) -> Option<Pairing> {
        self.find_from(self.cursor)
    }

    /// Move the cursor past `pairing`.
    ///
    /// The cursor never moves backwards; advancing past a pairing that lies
    /// behind the cursor has no effect.
    pub fn advance(&mut self, pairing: &Pairing) {
        let next = pairing.following();
        if next > self.cursor {
            self.cursor = next;
            self.consumed += 1;
        }
    }

    /// Peek and advance in one call.
    pub fn pop(&mut self) -> Option<Pairing> {
        let pairing = self.peek()?;
        self.advance(&pairing);
        Some(pairing)
    }

    pub fn is_exhausted(&self) -> bool {
        self.peek().is_none()
    }

    /// Count the pairings left after the cursor.
    pub fn remaining(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.cursor;
        while let Some(pairing) = self.find_from(cursor) {
            count += 1;
            cursor = pairing.following();
        }
        count
    }

    fn find_from(&self, mut cursor: Cursor) -> Option<Pairing> {
        while let Some(plugin) = self.plugins.get(cursor.plugin) {
            if plugin.is_context_level() {
                if cursor.instance == 0 {
                    return Some(Pairing {
                        plugin: plugin.clone(),
                        instance: None,
                        position: cursor,
                    });
                }
            } else {
                while let Some(instance) = self.instances.get(cursor.instance) {
                    if is_eligible(plugin, instance) {
                        return Some(Pairing {
                            plugin: plugin.clone(),
                            instance: Some(instance.clone()),
                            position: cursor,
                        });
                    }
                    cursor = cursor.next_instance();
                }
            }
            cursor = cursor.next_plugin();
        }
        None
    }
}

fn is_eligible(plugin: &Plugin, instance: &Instance) -> bool {
    instance.publish && plugin.supports_family(&instance.family)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PluginKind, PluginScope};

    const CACHE: &str = "napoleon.animation.cache";
    const RIG: &str = "napoleon.asset.rig";

    fn catalog() -> Catalog {
        Catalog::new(
            vec![
                Instance::new("Peter01", RIG),
                Instance::new("Richard05", CACHE),
                Instance::new("Steven11", CACHE),
                Instance::new("Marcus", CACHE).publish(false),
            ],
            vec![
                Plugin::new("ValidateNamespace", PluginKind::Validator).families([CACHE]),
                Plugin::new("ValidateAll", PluginKind::Validator),
                Plugin::new("ConformAsset", PluginKind::Conformer).families([RIG]),
                Plugin::new("CollectScene", PluginKind::Selector).scope(PluginScope::Context),
            ],
        )
    }

    fn drain(queue: &mut PairingQueue) -> Vec<(String, Option<String>)> {
        let mut out = Vec::new();
        while let Some(pairing) = queue.pop() {
            out.push((
                pairing.plugin.name.clone(),
                pairing.instance_name().map(str::to_string),
            ));
        }
        out
    }

    fn pair(plugin: &str, instance: Option<&str>) -> (String, Option<String>) {
        (plugin.to_string(), instance.map(str::to_string))
    }

    #[test]
    fn test_plugin_major_instance_minor() {
        let state = State::new(["Steven11", "Richard05"], ["ValidateNamespace", "ValidateAll"]);
        let mut queue = PairingQueue::new(&state, &catalog());

        assert_eq!(queue.remaining(), 4);
        assert_eq!(
            drain(&mut queue),
            vec![
                pair("ValidateNamespace", Some("Steven11")),
                pair("ValidateNamespace", Some("Richard05")),
                pair("ValidateAll", Some("Steven11")),
                pair("ValidateAll", Some("Richard05")),
            ]
        );
        assert!(queue.is_exhausted());
        assert_eq!(queue.consumed(), 4);
    }

    #[test]
    fn test_incompatible_family_is_skipped() {
        let state = State::new(["Peter01", "Richard05"], ["ValidateNamespace", "ConformAsset"]);
        let mut queue = PairingQueue::new(&state, &catalog());

        assert_eq!(
            drain(&mut queue),
            vec![
                pair("ValidateNamespace", Some("Richard05")),
                pair("ConformAsset", Some("Peter01")),
            ]
        );
    }

    #[test]
    fn test_unpublished_instance_never_pairs() {
        let state = State::new(["Marcus"], ["ValidateAll"]);
        let queue = PairingQueue::new(&state, &catalog());
        assert!(queue.peek().is_none());
    }

    #[test]
    fn test_context_plugin_runs_once() {
        let state = State::new(["Richard05", "Steven11"], ["CollectScene", "ValidateAll"]);
        let mut queue = PairingQueue::new(&state, &catalog());

        assert_eq!(
            drain(&mut queue),
            vec![
                pair("CollectScene", None),
                pair("ValidateAll", Some("Richard05")),
                pair("ValidateAll", Some("Steven11")),
            ]
        );
    }

    #[test]
    fn test_context_plugin_runs_without_instances() {
        let state = State::new(Vec::<String>::new(), ["CollectScene", "CollectScene"]);
        let mut queue = PairingQueue::new(&state, &catalog());
        assert_eq!(
            drain(&mut queue),
            vec![pair("CollectScene", None), pair("CollectScene", None)]
        );
    }

    #[test]
    fn test_empty_plugins_is_exhausted() {
        let state = State::new(["Richard05"], Vec::<String>::new());
        let queue = PairingQueue::new(&state, &catalog());
        assert!(queue.is_exhausted());
        assert_eq!(queue.remaining(), 0);
    }

    #[test]
    fn test_unknown_names_are_ignored() {
        let state = State::new(["Richard11", "Richard05"], ["ValidateNothing", "ValidateAll"]);
        let mut queue = PairingQueue::new(&state, &catalog());
        assert_eq!(drain(&mut queue), vec![pair("ValidateAll", Some("Richard05"))]);
    }

    #[test]
    fn test_peek_does_not_move_cursor() {
        let state = State::new(["Richard05"], ["ValidateAll"]);
        let queue = PairingQueue::new(&state, &catalog());
        let first = queue.peek().unwrap();
        let second = queue.peek().unwrap();
        assert_eq!(first, second);
        assert_eq!(queue.cursor(), Cursor::default());
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let state = State::new(["Richard05", "Steven11"], ["ValidateAll"]);
        let mut queue = PairingQueue::new(&state, &catalog());

        let first = queue.pop().unwrap();
        let _second = queue.pop().unwrap();
        let cursor = queue.cursor();

        queue.advance(&first);
        assert_eq!(queue.cursor(), cursor);
        assert_eq!(queue.consumed(), 2);
    }
}
