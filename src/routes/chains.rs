//! Chain endpoints
//!
//! ## Endpoints
//!
//! - `POST /setup` - Create the chain pool
//! - `GET /assign/{condition}?purpose=write|read` - Claim a chain
//! - `GET /peek/{condition}` - Select a chain without claiming it
//! - `GET /chain/{id}` - Fetch a chain
//! - `POST /chain/complete/{id}` - Append a message and free the chain
//! - `POST /chain/release/{id}` - Free a chain without a message
//! - `POST /chain/read/{id}` - Count a read of the chain
//! - `DELETE /demolish` - Delete every chain
//!
//! Handlers take an already-collected body so they stay independent of the
//! connection type.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{error_response, json_response};
use crate::lifecycle::ChainManager;
use crate::types::{Chain, ChainError, ChainId, Purpose, Result};

type FullBody = Full<Bytes>;

// =============================================================================
// Request / Response Types
// =============================================================================

/// Setup request
///
/// Either explicit `conditions`, or `nConditions` which expands to the
/// labels `"1"..="n"`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequest {
    #[serde(default)]
    pub conditions: Option<Vec<String>>,
    #[serde(default, alias = "n_conditions")]
    pub n_conditions: Option<u32>,
    #[serde(alias = "n_chains_per_condition")]
    pub n_chains_per_condition: u32,
}

impl SetupRequest {
    /// Resolve the condition labels to create.
    ///
    /// `nConditions` above `max_labels` is rejected before it is expanded.
    pub fn labels(&self, max_labels: u64) -> Result<Vec<String>> {
        match (&self.conditions, self.n_conditions) {
            (Some(labels), None) => Ok(labels.clone()),
            (None, Some(n)) if u64::from(n) > max_labels => Err(ChainError::BadRequest(format!(
                "nConditions may be at most {}",
                max_labels
            ))),
            (None, Some(n)) => Ok((1..=n).map(|i| i.to_string()).collect()),
            (Some(_), Some(_)) => Err(ChainError::BadRequest(
                "give either conditions or nConditions, not both".into(),
            )),
            (None, None) => Err(ChainError::BadRequest(
                "conditions or nConditions is required".into(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupResponse {
    pub inserted_ids: Vec<ChainId>,
    pub count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssignQuery {
    #[serde(default)]
    pub purpose: Option<Purpose>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DemolishResponse {
    pub deleted: u64,
}

// =============================================================================
// Helpers
// =============================================================================

fn chain_response(result: Result<Chain>) -> Response<FullBody> {
    match result {
        Ok(chain) => json_response(StatusCode::OK, &chain),
        Err(err) => {
            if matches!(err, ChainError::Database(_) | ChainError::Internal(_)) {
                warn!(error = %err, "Chain operation failed");
            }
            error_response(&err)
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(body)?)
}

/// Percent-decode a single path segment
pub fn decode_segment(segment: &str) -> Result<String> {
    if segment.is_empty() {
        return Err(ChainError::BadRequest("empty path segment".into()));
    }
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .map_err(|e| ChainError::BadRequest(format!("invalid path encoding: {}", e)))
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /setup
pub async fn handle_setup(manager: &ChainManager, body: Bytes) -> Response<FullBody> {
    let result = async {
        let request: SetupRequest = parse_json(&body)?;
        let labels = request.labels(manager.config().max_setup_chains)?;
        manager.setup(labels, request.n_chains_per_condition).await
    }
    .await;

    match result {
        Ok(ids) => json_response(
            StatusCode::OK,
            &SetupResponse {
                count: ids.len(),
                inserted_ids: ids,
            },
        ),
        Err(err) => error_response(&err),
    }
}

/// GET /assign/{condition}
pub async fn handle_assign(
    manager: &ChainManager,
    condition: &str,
    query: Option<&str>,
) -> Response<FullBody> {
    let purpose = match serde_urlencoded::from_str::<AssignQuery>(query.unwrap_or("")) {
        Ok(q) => q.purpose.unwrap_or_default(),
        Err(e) => {
            return error_response(&ChainError::BadRequest(format!("invalid query: {}", e)));
        }
    };

    chain_response(manager.claim(condition, purpose).await)
}

/// GET /peek/{condition}
pub async fn handle_peek(manager: &ChainManager, condition: &str) -> Response<FullBody> {
    chain_response(manager.peek(condition).await)
}

/// GET /chain/{id}
pub async fn handle_get_chain(manager: &ChainManager, id: &str) -> Response<FullBody> {
    chain_response(manager.get(&ChainId::from(id)).await)
}

/// POST /chain/complete/{id}
pub async fn handle_complete(manager: &ChainManager, id: &str, body: Bytes) -> Response<FullBody> {
    let request: CompleteRequest = match parse_json(&body) {
        Ok(r) => r,
        Err(err) => return error_response(&err),
    };

    chain_response(manager.complete(&ChainId::from(id), request.message).await)
}

/// POST /chain/release/{id}
pub async fn handle_release(manager: &ChainManager, id: &str) -> Response<FullBody> {
    chain_response(manager.release(&ChainId::from(id)).await)
}

/// POST /chain/read/{id}
pub async fn handle_record_read(manager: &ChainManager, id: &str) -> Response<FullBody> {
    chain_response(manager.record_read(&ChainId::from(id)).await)
}

/// DELETE /demolish
pub async fn handle_demolish(manager: &ChainManager) -> Response<FullBody> {
    match manager.reset_all().await {
        Ok(deleted) => json_response(StatusCode::OK, &DemolishResponse { deleted }),
        Err(err) => error_response(&err),
    }
}
