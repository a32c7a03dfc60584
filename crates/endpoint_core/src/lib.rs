//! # endpoint_core
//!
//! Stepwise publishing engine.
//!
//! A client selects instances and plugins, then asks the engine to process
//! exactly one (plugin, instance) pairing per call. The engine keeps the
//! selection and a cursor between calls; the actual work is delegated to a
//! [`ProcessingBackend`].
//!
//! # Architecture
//!
//! - **Backend**: enumerates instances and plugins and runs one step
//! - **Queue**: orders pairings plugin-major, instance-minor, skipping
//!   incompatible ones
//! - **Session**: the shared, lock-guarded state driven by clients
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use endpoint_core::{MockBackend, SessionEngine, State};
//!
//! let engine = SessionEngine::new(Arc::new(MockBackend::new()));
//! engine.create_session().await?;
//! engine.set_state(State::new(["Steven11", "Richard05"], ["ValidateNamespace"])).await?;
//!
//! while let Ok(result) = engine.advance().await {
//!     println!("{} on {:?}: {}", result.plugin, result.instance, result.success);
//! }
//! ```

pub mod backend;
pub mod command;
pub mod error;
pub mod mock;
pub mod model;
pub mod queue;
pub mod session;
pub mod state;

pub use backend::{Catalog, ProcessingBackend};
pub use command::{CommandBackend, Manifest, PluginCommand};
pub use error::{EndpointError, EndpointResult};
pub use mock::{CapturedRun, MockBackend, MockBehavior};
pub use model::{
    HostInfo, Instance, LogEntry, LogLevel, Plugin, PluginKind, PluginScope, StepError,
    StepErrorKind, StepResult,
};
pub use queue::{Cursor, Pairing, PairingQueue};
pub use session::{EngineConfig, LockScope, SessionEngine, SessionPhase, SessionReport};
pub use state::State;
