//! HTTP routes for chain-dispatch

pub mod chains;
pub mod health;

pub use chains::{
    handle_assign, handle_complete, handle_demolish, handle_get_chain, handle_peek,
    handle_record_read, handle_release, handle_setup,
};
pub use health::{health_check, version_info};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::types::ChainError;

/// JSON error body
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

/// Build a JSON response
pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-store")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(json)))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from_static(br#"{"error":"Internal error"}"#)))
                .unwrap()
        })
}

/// Build a JSON error response from a chain error
pub(crate) fn error_response(err: &ChainError) -> Response<Full<Bytes>> {
    json_response(
        err.status_code(),
        &ErrorBody {
            error: err.to_string(),
            code: err.error_code(),
        },
    )
}
