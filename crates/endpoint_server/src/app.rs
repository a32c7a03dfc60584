//! Router and request handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use endpoint_core::{
    EndpointError, Instance, Plugin, ProcessingBackend, SessionEngine, SessionReport, StepResult,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::client::{MessageQueue, HEARTBEAT};
use crate::config::ServerConfig;
use crate::error::{ApiError, ApiResult};
use crate::stats::{current_user, ApplicationStats};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SessionEngine>,
    pub queue: Arc<MessageQueue>,
    pub config: Arc<ServerConfig>,
    pub shutdown: Arc<Notify>,
}

/// Build the router with every route mounted under `config.prefix`.
pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/session", post(create_session))
        .route("/instances", get(list_instances))
        .route("/instances/{name}", get(get_instance))
        .route("/instances/{name}/nodes", get(get_nodes))
        .route("/instances/{name}/data", get(get_data))
        .route("/plugins", get(list_plugins))
        .route("/application", get(application))
        .route("/application/shutdown", post(shutdown))
        .route(
            "/state",
            get(get_state).post(post_state).delete(delete_state),
        )
        .route("/next", post(next))
        .route("/client", get(peek_client).post(poll_client));

    let prefix = state.config.prefix.as_str();
    let app = if prefix.is_empty() || prefix == "/" {
        routes
    } else {
        Router::new().nest(prefix, routes)
    };
    app.with_state(state)
}

#[derive(Debug, Serialize)]
struct Ack {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct StateBody {
    ok: bool,
    state: endpoint_core::State,
}

#[derive(Debug, Serialize)]
struct StateReport {
    ok: bool,
    #[serde(flatten)]
    report: SessionReport,
}

#[derive(Debug, Serialize)]
struct QueueBody {
    ok: bool,
    queue: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    ok: bool,
    message: String,
}

async fn create_session(State(app): State<AppState>) -> ApiResult<Json<StateBody>> {
    let state = app.engine.create_session().await?;
    app.queue.push(json!({ "event": "session_created" }).to_string());
    Ok(Json(StateBody { ok: true, state }))
}

async fn list_instances(State(app): State<AppState>) -> ApiResult<Json<Vec<Instance>>> {
    Ok(Json(app.engine.instances().await?))
}

async fn get_instance(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Instance>> {
    Ok(Json(app.engine.instance(&name).await?))
}

async fn get_nodes(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(app.engine.instance_nodes(&name).await?))
}

async fn get_data(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Map<String, Value>>> {
    Ok(Json(app.engine.instance_data(&name).await?))
}

async fn list_plugins(State(app): State<AppState>) -> ApiResult<Json<Vec<Plugin>>> {
    Ok(Json(app.engine.plugins().await?))
}

async fn application(State(app): State<AppState>) -> ApiResult<Json<ApplicationStats>> {
    let connect_time = app.engine.connected_at().await?;
    let backend = app.engine.host();
    Ok(Json(ApplicationStats {
        host: app.config.host.clone(),
        port: app.config.port,
        endpoint_version: env!("CARGO_PKG_VERSION").to_string(),
        backend_host: backend.name,
        backend_version: backend.version,
        user: current_user(),
        connect_time,
    }))
}

async fn shutdown(State(app): State<AppState>) -> ApiResult<Json<Ack>> {
    if !app.config.allow_remote_shutdown {
        warn!("Refusing remote shutdown request");
        return Err(ApiError::ShutdownDisabled);
    }
    info!("Remote shutdown requested");
    app.shutdown.notify_one();
    Ok(Json(Ack { ok: true }))
}

async fn get_state(State(app): State<AppState>) -> ApiResult<Json<StateReport>> {
    let report = app.engine.report().await?;
    Ok(Json(StateReport { ok: true, report }))
}

/// Accepts `{"state": {..}}`, `{"state": "<json>"}` or a bare state object.
async fn post_state(State(app): State<AppState>, body: Bytes) -> ApiResult<Json<StateBody>> {
    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        EndpointError::MalformedState(format!("request body is not JSON: {}", e))
    })?;
    let value = match payload {
        Value::Object(mut fields) if fields.contains_key("state") => {
            fields.remove("state").unwrap_or(Value::Null)
        }
        other => other,
    };

    let state = app.engine.set_state_from_value(&value).await?;
    Ok(Json(StateBody { ok: true, state }))
}

async fn delete_state(State(app): State<AppState>) -> Json<Ack> {
    app.engine.teardown_session().await;
    Json(Ack { ok: true })
}

async fn next(State(app): State<AppState>) -> ApiResult<Json<StepResult>> {
    let result = app.engine.advance().await?;
    app.queue.push(
        json!({
            "event": "step",
            "plugin": result.plugin,
            "instance": result.instance,
            "success": result.success,
        })
        .to_string(),
    );
    Ok(Json(result))
}

async fn peek_client(State(app): State<AppState>) -> Json<QueueBody> {
    Json(QueueBody {
        ok: true,
        queue: app.queue.snapshot(),
    })
}

async fn poll_client(State(app): State<AppState>) -> Json<MessageBody> {
    let message = app
        .queue
        .pop(app.config.client_poll_timeout())
        .await
        .unwrap_or_else(|| HEARTBEAT.to_string());
    debug!(%message, "Client poll answered");
    Json(MessageBody { ok: true, message })
}

/// A configured server ready to be bound.
pub struct EndpointServer {
    state: AppState,
}

impl EndpointServer {
    /// Build a server with the backend named in `config`.
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        config.validate().context("invalid server configuration")?;
        let backend = config
            .build_backend()
            .context("failed to construct processing backend")?;
        Ok(Self::with_backend(config, backend))
    }

    /// Build a server around an already constructed backend.
    pub fn with_backend(config: ServerConfig, backend: Arc<dyn ProcessingBackend>) -> Self {
        let engine = SessionEngine::with_config(backend, config.engine_config());
        let queue = MessageQueue::new(config.client_queue_capacity);
        Self {
            state: AppState {
                engine: Arc::new(engine),
                queue: Arc::new(queue),
                config: Arc::new(config),
                shutdown: Arc::new(Notify::new()),
            },
        }
    }

    pub fn engine(&self) -> Arc<SessionEngine> {
        self.state.engine.clone()
    }

    /// Handle that stops the server when notified.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.state.shutdown.clone()
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = self.state.config.bind_address()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind server listener on {} failed", addr))?;
        self.serve_with_listener(listener).await
    }

    /// Serve on an existing listener until Ctrl-C or a shutdown notification.
    pub async fn serve_with_listener(self, listener: TcpListener) -> anyhow::Result<()> {
        let local: SocketAddr = listener.local_addr().context("listener has no address")?;
        let mut state = self.state;
        {
            // Report the address actually bound, which differs for port 0.
            let config = Arc::make_mut(&mut state.config);
            config.host = local.ip().to_string();
            config.port = local.port();
        }
        let shutdown = state.shutdown.clone();

        info!(
            address = %local,
            prefix = %state.config.prefix,
            backend = %state.engine.host().name,
            "Endpoint listening"
        );
        let app = router(state);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
                    _ = shutdown.notified() => info!("Shutting down"),
                }
            })
            .await
            .context("server terminated with error")
    }
}
