//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo; one task per connection.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::lifecycle::ChainManager;
use crate::routes;
use crate::types::ChainError;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub manager: Arc<ChainManager>,
    /// Name of the store backend actually in use
    pub store_name: &'static str,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, manager: Arc<ChainManager>, store_name: &'static str) -> Self {
        Self {
            args,
            manager,
            store_name,
            started_at: Instant::now(),
        }
    }
}

/// Start the HTTP server; returns on Ctrl-C
pub async fn run(state: Arc<AppState>) -> Result<(), ChainError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "chain-dispatch listening on {} ({} store)",
        state.args.listen, state.store_name
    );

    if state.args.dev_mode {
        warn!("Development mode enabled");
    }

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, no longer accepting connections");
                return Ok(());
            }
        };

        match accepted {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    debug!("[{}] {} {}", addr, method, path);

    if method == Method::OPTIONS {
        return Ok(preflight_response());
    }

    let manager = state.manager.as_ref();
    let body_limit = state.args.max_body_bytes;
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let response = match (method, segments.as_slice()) {
        (Method::GET, ["health"]) | (Method::GET, ["healthz"]) => {
            routes::health_check(&state).await
        }

        (Method::GET, ["version"]) => routes::version_info(),

        (Method::POST, ["setup"]) => match read_body(req.into_body(), body_limit).await {
            Ok(body) => routes::handle_setup(manager, body).await,
            Err(err) => routes::error_response(&err),
        },

        (Method::GET, ["assign", condition]) => match routes::chains::decode_segment(condition) {
            Ok(condition) => routes::handle_assign(manager, &condition, query.as_deref()).await,
            Err(err) => routes::error_response(&err),
        },

        (Method::GET, ["peek", condition]) => match routes::chains::decode_segment(condition) {
            Ok(condition) => routes::handle_peek(manager, &condition).await,
            Err(err) => routes::error_response(&err),
        },

        (Method::GET, ["chain", id]) => routes::handle_get_chain(manager, id).await,

        (Method::POST, ["chain", "complete", id]) => {
            let id = id.to_string();
            match read_body(req.into_body(), body_limit).await {
                Ok(body) => routes::handle_complete(manager, &id, body).await,
                Err(err) => routes::error_response(&err),
            }
        }

        (Method::POST, ["chain", "release", id]) => routes::handle_release(manager, id).await,

        (Method::POST, ["chain", "read", id]) => routes::handle_record_read(manager, id).await,

        (Method::DELETE, ["demolish"]) => routes::handle_demolish(manager).await,

        _ => not_found_response(&path),
    };

    Ok(response)
}

/// Collect a request body, refusing anything over `limit` bytes
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, ChainError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(ChainError::BadRequest(
            format!("Request body exceeds {} bytes", limit),
        )),
        Err(e) => Err(ChainError::BadRequest(format!("Failed to read request body: {}", e))),
    }
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_body_within_limit() {
        let body = Full::new(Bytes::from_static(br#"{"message": "hi"}"#));
        let bytes = read_body(body, 64).await.unwrap();
        assert_eq!(&bytes[..], br#"{"message": "hi"}"#);
    }

    #[tokio::test]
    async fn test_read_body_over_limit_is_rejected() {
        let body = Full::new(Bytes::from(vec![b'x'; 4096]));
        let err = read_body(body, 1024).await.unwrap_err();
        assert!(matches!(err, ChainError::BadRequest(ref msg) if msg.contains("1024")));
    }
}
