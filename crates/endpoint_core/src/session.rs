//! Session engine.
//!
//! The engine owns the single shared session: the catalog enumerated from
//! the backend, the client's [`State`], the pairing cursor and the most
//! recent [`StepResult`]. Clients drive it one pairing at a time.
//!
//! # Phases
//!
//! ```text
//! Uninitialized --create_session--> Ready --advance--> Ready
//!                                     |                  |
//!                                     +--(nothing left)--+--> Exhausted
//! Exhausted --set_state / create_session--> Ready
//! ```
//!
//! # Locking
//!
//! Session data sits behind one read/write lock. Readers never block each
//! other. `advance` calls are additionally serialised by a step gate so two
//! steps never run at once. How long the session lock is held during a step
//! is chosen with [`LockScope`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::backend::{Catalog, ProcessingBackend};
use crate::error::{EndpointError, EndpointResult};
use crate::model::{HostInfo, Instance, LogEntry, Plugin, StepErrorKind, StepResult};
use crate::queue::{Pairing, PairingQueue};
use crate::state::State;

/// How long `advance` holds the session write lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// Hold the lock for the whole step, backend call included.
    #[default]
    WholeStep,
    /// Claim the pairing and move the cursor under the lock, then release
    /// it while the backend runs.
    ClaimThenRun,
}

/// Tunables for the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Upper bound for one backend `run`; `None` waits forever.
    pub step_timeout: Option<Duration>,
    pub lock_scope: LockScope,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    pub fn lock_scope(mut self, scope: LockScope) -> Self {
        self.lock_scope = scope;
        self
    }
}

/// Coarse engine state, as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    Ready,
    Exhausted,
}

/// Everything `GET /state` reports, read under a single lock.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub state: State,
    pub phase: SessionPhase,
    pub remaining: usize,
    pub last_result: Option<StepResult>,
}

struct Session {
    catalog: Catalog,
    state: State,
    queue: PairingQueue,
    last_result: Option<StepResult>,
    exhausted: bool,
    created_at: DateTime<Utc>,
    generation: u64,
}

impl Session {
    fn phase(&self) -> SessionPhase {
        if self.exhausted {
            SessionPhase::Exhausted
        } else {
            SessionPhase::Ready
        }
    }

    fn select(&mut self, state: State, generation: u64) {
        self.queue = PairingQueue::new(&state, &self.catalog);
        self.state = state;
        self.last_result = None;
        self.exhausted = false;
        self.generation = generation;
    }
}

/// The stepwise execution engine.
pub struct SessionEngine {
    backend: Arc<dyn ProcessingBackend>,
    config: EngineConfig,
    session: RwLock<Option<Session>>,
    step_gate: Mutex<()>,
    generation: AtomicU64,
}

impl SessionEngine {
    pub fn new(backend: Arc<dyn ProcessingBackend>) -> Self {
        Self::with_config(backend, EngineConfig::default())
    }

    pub fn with_config(backend: Arc<dyn ProcessingBackend>, config: EngineConfig) -> Self {
        Self {
            backend,
            config,
            session: RwLock::new(None),
            step_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn host(&self) -> HostInfo {
        self.backend.host()
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Start a fresh session.
    ///
    /// Re-enumerates the backend and clears the selection. If enumeration
    /// fails the previous session, if any, is left as it was.
    pub async fn create_session(&self) -> EndpointResult<State> {
        let catalog = match Catalog::load(self.backend.as_ref()).await {
            Ok(catalog) => catalog,
            Err(e) => {
                error!("Failed to enumerate backend: {}", e);
                return Err(e);
            }
        };

        let state = State::default();
        let session = Session {
            queue: PairingQueue::new(&state, &catalog),
            catalog,
            state: state.clone(),
            last_result: None,
            exhausted: false,
            created_at: Utc::now(),
            generation: self.next_generation(),
        };

        info!(
            instances = session.catalog.instances().len(),
            plugins = session.catalog.plugins().len(),
            "Session created"
        );
        *self.session.write().await = Some(session);
        Ok(state)
    }

    /// Drop the session; the engine returns to `Uninitialized`.
    pub async fn teardown_session(&self) {
        if self.session.write().await.take().is_some() {
            info!("Session torn down");
        }
    }

    pub async fn phase(&self) -> SessionPhase {
        self.session
            .read()
            .await
            .as_ref()
            .map_or(SessionPhase::Uninitialized, Session::phase)
    }

    /// Selection, phase, remaining count and last result from one snapshot.
    pub async fn report(&self) -> EndpointResult<SessionReport> {
        self.read(|s| SessionReport {
            state: s.state.clone(),
            phase: s.phase(),
            remaining: s.queue.remaining(),
            last_result: s.last_result.clone(),
        })
        .await
    }

    pub async fn get_state(&self) -> EndpointResult<State> {
        self.read(|s| s.state.clone()).await
    }

    /// Replace the selection and rewind the cursor.
    pub async fn set_state(&self, state: State) -> EndpointResult<State> {
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(EndpointError::NoSession)?;

        debug!(
            instances = ?state.instances,
            plugins = ?state.plugins,
            "Setting state"
        );
        let generation = self.next_generation();
        session.select(state, generation);
        Ok(session.state.clone())
    }

    /// Decode a client payload and [`set_state`](Self::set_state) it.
    ///
    /// A payload that does not decode leaves the session untouched.
    pub async fn set_state_from_value(&self, value: &Value) -> EndpointResult<State> {
        let state = State::decode(value)?;
        self.set_state(state).await
    }

    /// Execute the next pairing and return its result.
    ///
    /// Fails with `NothingToProcess` once the queue is exhausted. A plugin
    /// or backend failure is not an error here: it comes back as a failed
    /// [`StepResult`] and the cursor moves on regardless.
    pub async fn advance(&self) -> EndpointResult<StepResult> {
        let _gate = self.step_gate.lock().await;

        match self.config.lock_scope {
            LockScope::WholeStep => {
                let mut guard = self.session.write().await;
                let session = guard.as_mut().ok_or(EndpointError::NoSession)?;
                let Some(pairing) = session.queue.peek() else {
                    session.exhausted = true;
                    return Err(EndpointError::NothingToProcess);
                };

                session.queue.advance(&pairing);
                let result = self.execute(&pairing).await;
                session.last_result = Some(result.clone());
                Ok(result)
            }
            LockScope::ClaimThenRun => {
                let (pairing, generation) = {
                    let mut guard = self.session.write().await;
                    let session = guard.as_mut().ok_or(EndpointError::NoSession)?;
                    let Some(pairing) = session.queue.pop() else {
                        session.exhausted = true;
                        return Err(EndpointError::NothingToProcess);
                    };
                    (pairing, session.generation)
                };

                let result = self.execute(&pairing).await;

                let mut guard = self.session.write().await;
                match guard.as_mut() {
                    Some(session) if session.generation == generation => {
                        session.last_result = Some(result.clone());
                    }
                    _ => debug!("Session replaced during step; result not recorded"),
                }
                Ok(result)
            }
        }
    }

    async fn execute(&self, pairing: &Pairing) -> StepResult {
        let plugin = &pairing.plugin;
        let instance_name = pairing.instance_name().map(str::to_string);
        info!(
            plugin = %plugin.name,
            instance = instance_name.as_deref().unwrap_or("<context>"),
            "Processing"
        );

        let started_at = Utc::now();
        let backend = self.backend.clone();
        let task_plugin = plugin.clone();
        let task_instance = pairing.instance.clone();
        let mut task = tokio::spawn(async move {
            backend.run(&task_plugin, task_instance.as_ref()).await
        });

        let joined = match self.config.step_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    let message = format!("{} did not finish within {:?}", plugin.name, limit);
                    warn!("{}", message);
                    return StepResult::failure(
                        &plugin.name,
                        instance_name,
                        StepErrorKind::Timeout,
                        message.clone(),
                    )
                    .with_log(LogEntry::error(message))
                    .started_at(started_at);
                }
            },
            None => task.await,
        };

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = if e.is_panic() {
                    format!("{} panicked: {}", plugin.name, panic_message(e.into_panic()))
                } else {
                    format!("{} was cancelled", plugin.name)
                };
                error!("{}", message);
                return StepResult::failure(
                    &plugin.name,
                    instance_name,
                    StepErrorKind::Backend,
                    message.clone(),
                )
                .with_log(LogEntry::error(message))
                .started_at(started_at);
            }
        };

        match outcome {
            Ok(mut result) => {
                result.plugin = plugin.name.clone();
                result.instance = instance_name;
                let result = result.normalized();
                if !result.success {
                    warn!(
                        plugin = %plugin.name,
                        "Step failed: {}",
                        result.error.as_ref().map(|e| e.message.as_str()).unwrap_or("unknown")
                    );
                }
                result
            }
            Err(e) => {
                warn!(plugin = %plugin.name, "Backend failed to run step: {}", e);
                StepResult::failure(
                    &plugin.name,
                    instance_name,
                    StepErrorKind::Backend,
                    e.to_string(),
                )
                .with_log(LogEntry::error(e.to_string()))
                .started_at(started_at)
            }
        }
    }

    pub async fn last_result(&self) -> EndpointResult<Option<StepResult>> {
        self.read(|s| s.last_result.clone()).await
    }

    /// Number of pairings left for the current selection.
    pub async fn remaining(&self) -> EndpointResult<usize> {
        self.read(|s| s.queue.remaining()).await
    }

    pub async fn connected_at(&self) -> EndpointResult<DateTime<Utc>> {
        self.read(|s| s.created_at).await
    }

    pub async fn instances(&self) -> EndpointResult<Vec<Instance>> {
        self.read(|s| s.catalog.instances().to_vec()).await
    }

    pub async fn plugins(&self) -> EndpointResult<Vec<Plugin>> {
        self.read(|s| s.catalog.plugins().to_vec()).await
    }

    pub async fn instance(&self, name: &str) -> EndpointResult<Instance> {
        self.read(|s| s.catalog.require_instance(name).cloned())
            .await?
    }

    pub async fn instance_nodes(&self, name: &str) -> EndpointResult<Vec<String>> {
        self.read(|s| s.catalog.require_instance(name).map(|i| i.nodes.clone()))
            .await?
    }

    pub async fn instance_data(&self, name: &str) -> EndpointResult<Map<String, Value>> {
        self.read(|s| s.catalog.require_instance(name).map(|i| i.data.clone()))
            .await?
    }

    async fn read<T>(&self, f: impl FnOnce(&Session) -> T) -> EndpointResult<T> {
        let guard = self.session.read().await;
        guard.as_ref().map(f).ok_or(EndpointError::NoSession)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("host", &self.backend.host())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockBehavior};
    use crate::model::{PluginKind, PluginScope, StepError};

    fn engine(backend: &MockBackend) -> SessionEngine {
        SessionEngine::new(Arc::new(backend.clone()))
    }

    #[tokio::test]
    async fn test_requires_session() {
        let engine = engine(&MockBackend::new());
        assert_eq!(engine.phase().await, SessionPhase::Uninitialized);
        assert!(matches!(engine.get_state().await, Err(EndpointError::NoSession)));
        assert!(matches!(engine.advance().await, Err(EndpointError::NoSession)));
        assert!(matches!(
            engine.set_state(State::default()).await,
            Err(EndpointError::NoSession)
        ));
        assert!(matches!(engine.instances().await, Err(EndpointError::NoSession)));
    }

    #[tokio::test]
    async fn test_create_session_clears_state() {
        let engine = engine(&MockBackend::new());
        let state = engine.create_session().await.unwrap();
        assert!(state.is_empty());
        assert_eq!(engine.phase().await, SessionPhase::Ready);

        engine
            .set_state(State::new(["Steven11"], ["ValidateNamespace"]))
            .await
            .unwrap();
        engine.create_session().await.unwrap();
        assert!(engine.get_state().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_advance_in_queue_order() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.create_session().await.unwrap();
        engine
            .set_state(State::new(["Steven11", "Richard05"], ["ValidateNamespace"]))
            .await
            .unwrap();

        let first = engine.advance().await.unwrap();
        assert_eq!(first.plugin, "ValidateNamespace");
        assert_eq!(first.instance.as_deref(), Some("Steven11"));
        assert!(first.success);
        assert_eq!(
            first.messages(),
            vec!["Validating namespace..", "Completed validating namespace!"]
        );

        let second = engine.advance().await.unwrap();
        assert_eq!(second.instance.as_deref(), Some("Richard05"));

        assert!(matches!(engine.advance().await, Err(EndpointError::NothingToProcess)));
        assert!(matches!(engine.advance().await, Err(EndpointError::NothingToProcess)));
        assert_eq!(engine.phase().await, SessionPhase::Exhausted);
        assert_eq!(backend.run_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_step_is_captured_and_cursor_moves() {
        let engine = engine(&MockBackend::new());
        engine.create_session().await.unwrap();
        engine
            .set_state(State::new(
                ["Richard05"],
                ["ValidateFailureMock", "ValidateNamespace"],
            ))
            .await
            .unwrap();

        let failed = engine.advance().await.unwrap();
        assert!(!failed.success);
        assert_eq!(failed.error.as_ref().unwrap().message, "Instance failed");

        let next = engine.advance().await.unwrap();
        assert_eq!(next.plugin, "ValidateNamespace");
        assert!(next.success);
    }

    #[tokio::test]
    async fn test_backend_error_is_captured() {
        let backend = MockBackend::new().with_behavior(
            "ValidateNamespace",
            MockBehavior::Error("host crashed".to_string()),
        );
        let engine = engine(&backend);
        engine.create_session().await.unwrap();
        engine
            .set_state(State::new(["Richard05"], ["ValidateNamespace"]))
            .await
            .unwrap();

        let result = engine.advance().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_ref().unwrap().kind, StepErrorKind::Backend);
        assert!(matches!(engine.advance().await, Err(EndpointError::NothingToProcess)));
    }

    #[tokio::test]
    async fn test_step_timeout_fails_step() {
        let backend = MockBackend::new().with_delay(Duration::from_millis(500));
        let engine = SessionEngine::with_config(
            Arc::new(backend),
            EngineConfig::new().step_timeout(Duration::from_millis(20)),
        );
        engine.create_session().await.unwrap();
        engine
            .set_state(State::new(["Richard05", "Steven11"], ["ValidateNamespace"]))
            .await
            .unwrap();

        let result = engine.advance().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_ref().unwrap().kind, StepErrorKind::Timeout);
        assert_eq!(engine.remaining().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_malformed_state_leaves_session_untouched() {
        let engine = engine(&MockBackend::new());
        engine.create_session().await.unwrap();
        let original = State::new(["Steven11", "Richard05"], ["ValidateNamespace"]);
        engine.set_state(original.clone()).await.unwrap();
        engine.advance().await.unwrap();

        let err = engine
            .set_state_from_value(&serde_json::json!({"instances": ["Steven11"]}))
            .await
            .unwrap_err();
        assert!(matches!(err, EndpointError::MalformedState(_)));

        assert_eq!(engine.get_state().await.unwrap(), original);
        assert_eq!(engine.remaining().await.unwrap(), 1);
        assert!(engine.last_result().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_set_state_rewinds_cursor() {
        let engine = engine(&MockBackend::new());
        engine.create_session().await.unwrap();
        let state = State::new(["Steven11", "Richard05"], ["ValidateNamespace"]);
        engine.set_state(state.clone()).await.unwrap();
        engine.advance().await.unwrap();
        engine.advance().await.unwrap();
        assert!(engine.advance().await.is_err());

        engine.set_state(state).await.unwrap();
        assert_eq!(engine.phase().await, SessionPhase::Ready);
        assert!(engine.last_result().await.unwrap().is_none());
        let again = engine.advance().await.unwrap();
        assert_eq!(again.instance.as_deref(), Some("Steven11"));
    }

    #[tokio::test]
    async fn test_context_plugin_has_no_instance() {
        let backend = MockBackend::new()
            .add_plugin(Plugin::new("CollectScene", PluginKind::Selector).scope(PluginScope::Context));
        let engine = engine(&backend);
        engine.create_session().await.unwrap();
        engine
            .set_state(State::new(["Richard05", "Steven11"], ["CollectScene"]))
            .await
            .unwrap();

        let result = engine.advance().await.unwrap();
        assert_eq!(result.plugin, "CollectScene");
        assert_eq!(result.instance, None);
        assert!(engine.advance().await.is_err());
    }

    #[tokio::test]
    async fn test_enumeration_failure_keeps_previous_session() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.create_session().await.unwrap();
        engine
            .set_state(State::new(["Steven11"], ["ValidateNamespace"]))
            .await
            .unwrap();

        let backend = backend.fail_enumeration("host is busy");
        let err = engine.create_session().await.unwrap_err();
        assert!(matches!(err, EndpointError::BackendUnavailable(_)));
        assert_eq!(engine.get_state().await.unwrap().instances, vec!["Steven11"]);

        backend.restore_enumeration();
        assert!(engine.create_session().await.is_ok());
    }

    #[tokio::test]
    async fn test_instance_lookups() {
        let engine = engine(&MockBackend::new());
        engine.create_session().await.unwrap();

        let peter = engine.instance("Peter01").await.unwrap();
        assert_eq!(peter.family, "napoleon.asset.rig");
        assert_eq!(engine.instance_nodes("Peter01").await.unwrap().len(), 3);
        assert!(engine
            .instance_data("Peter01")
            .await
            .unwrap()
            .contains_key("assetSource"));
        assert!(matches!(
            engine.instance("Unknown").await,
            Err(EndpointError::UnknownName(_))
        ));
    }

    #[tokio::test]
    async fn test_teardown_returns_to_uninitialized() {
        let engine = engine(&MockBackend::new());
        engine.create_session().await.unwrap();
        engine.teardown_session().await;
        assert_eq!(engine.phase().await, SessionPhase::Uninitialized);
        assert!(matches!(engine.get_state().await, Err(EndpointError::NoSession)));
    }

    /// Panics on instance "A" and returns a contradictory result otherwise.
    #[derive(Default)]
    struct UnrulyBackend {
        runs: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ProcessingBackend for UnrulyBackend {
        fn host(&self) -> HostInfo {
            HostInfo {
                name: "unruly".to_string(),
                version: "0.1".to_string(),
            }
        }

        async fn enumerate_instances(&self) -> EndpointResult<Vec<Instance>> {
            Ok(vec![Instance::new("A", "f"), Instance::new("B", "f")])
        }

        async fn enumerate_plugins(&self) -> EndpointResult<Vec<Plugin>> {
            Ok(vec![Plugin::new("P", PluginKind::Validator)])
        }

        async fn run(
            &self,
            plugin: &Plugin,
            instance: Option<&Instance>,
        ) -> EndpointResult<StepResult> {
            let name = instance.map(|i| i.name.clone()).unwrap_or_default();
            self.runs.lock().push(name.clone());
            if name == "A" {
                panic!("crashed on A");
            }
            let mut result = StepResult::success(&plugin.name, Some(name));
            result.error = Some(StepError {
                kind: StepErrorKind::Plugin,
                message: "inconsistent".to_string(),
            });
            Ok(result)
        }
    }

    #[tokio::test]
    async fn test_panicking_backend_consumes_pairing() {
        for scope in [LockScope::WholeStep, LockScope::ClaimThenRun] {
            let backend = Arc::new(UnrulyBackend::default());
            let engine =
                SessionEngine::with_config(backend.clone(), EngineConfig::new().lock_scope(scope));
            engine.create_session().await.unwrap();
            engine.set_state(State::new(["A", "B"], ["P"])).await.unwrap();

            let first = engine.advance().await.unwrap();
            assert!(!first.success);
            let error = first.error.unwrap();
            assert_eq!(error.kind, StepErrorKind::Backend);
            assert!(error.message.contains("crashed on A"), "{}", error.message);
            assert_eq!(engine.remaining().await.unwrap(), 1);

            let second = engine.advance().await.unwrap();
            assert_eq!(second.instance.as_deref(), Some("B"));
            assert!(!second.success);
            assert_eq!(second.error.unwrap().message, "inconsistent");

            assert!(matches!(engine.advance().await, Err(EndpointError::NothingToProcess)));
            assert_eq!(*backend.runs.lock(), vec!["A", "B"]);
        }
    }

    #[tokio::test]
    async fn test_report_matches_session() {
        let engine = engine(&MockBackend::new());
        assert!(matches!(engine.report().await, Err(EndpointError::NoSession)));

        engine.create_session().await.unwrap();
        engine
            .set_state(State::new(["Richard05", "Steven11"], ["ValidateNamespace"]))
            .await
            .unwrap();
        engine.advance().await.unwrap();

        let report = engine.report().await.unwrap();
        assert_eq!(report.phase, SessionPhase::Ready);
        assert_eq!(report.remaining, 1);
        assert_eq!(report.state.instances, vec!["Richard05", "Steven11"]);
        assert_eq!(
            report.last_result.and_then(|r| r.instance).as_deref(),
            Some("Richard05")
        );
    }
}
