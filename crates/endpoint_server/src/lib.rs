//! # endpoint_server
//!
//! HTTP surface for [`endpoint_core::SessionEngine`]. Every route is a thin
//! adapter: decode the request, call one engine operation, encode the answer.
//! Engine errors map onto status codes in [`error`].

pub mod app;
pub mod client;
pub mod config;
pub mod error;
pub mod stats;

pub use app::{router, AppState, EndpointServer};
pub use client::{MessageQueue, HEARTBEAT};
pub use config::{BackendConfig, BackendKind, ConfigError, EngineSection, ServerConfig};
pub use error::{ApiError, ApiResult, ErrorBody};
pub use stats::ApplicationStats;
