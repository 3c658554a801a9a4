//! Health and version endpoints
//!
//! - /health, /healthz - Liveness plus pool size. Reports 503 when the
//!   store cannot be reached.
//! - /version - Build information for deployment verification

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::json_response;
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    /// Store backend in use
    pub store: &'static str,
    /// Current timestamp
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    pub version: &'static str,
    pub git_commit: &'static str,
    pub git_commit_full: &'static str,
    pub build_time: &'static str,
}

/// GET /health
pub async fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let (pool_size, error) = match state.manager.pool_size().await {
        Ok(n) => (Some(n), None),
        Err(e) => (None, Some(e.to_string())),
    };
    let healthy = error.is_none();

    let body = HealthResponse {
        healthy,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        store: state.store_name,
        timestamp: chrono::Utc::now().to_rfc3339(),
        pool_size,
        error,
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_response(status, &body)
}

/// GET /version
pub fn version_info() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &VersionResponse {
            version: env!("CARGO_PKG_VERSION"),
            git_commit: env!("GIT_COMMIT_SHORT"),
            git_commit_full: env!("GIT_COMMIT_FULL"),
            build_time: env!("BUILD_TIMESTAMP"),
        },
    )
}
