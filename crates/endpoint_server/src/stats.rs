use chrono::{DateTime, Utc};
use serde::Serialize;

/// Answer to `GET /application`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStats {
    pub host: String,
    pub port: u16,
    pub endpoint_version: String,
    pub backend_host: String,
    pub backend_version: String,
    pub user: String,
    pub connect_time: DateTime<Utc>,
}

/// Name of the user running the server, `unknown` if the environment does
/// not say.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
