//! Error types for chain dispatch

use hyper::StatusCode;
use thiserror::Error;

/// Errors surfaced by the chain lifecycle and its transport
///
/// `NoEligibleChain` is an expected outcome callers branch on (poll later),
/// not a fault. Store conflicts never appear here: they are resolved inside
/// the claim retry loop.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Chain not found: {0}")]
    NotFound(String),

    #[error("No eligible chain: {0}")]
    NoEligibleChain(String),

    #[error("Chain not in use: {0}")]
    InvalidState(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChainError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NoEligibleChain(_) => StatusCode::NOT_FOUND,
            Self::InvalidState(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for JSON error bodies
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::NoEligibleChain(_) => "NO_ELIGIBLE_CHAIN",
            Self::InvalidState(_) => "CHAIN_NOT_IN_USE",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this is a normal "nothing to hand out" outcome
    pub fn is_no_eligible_chain(&self) -> bool {
        matches!(self, Self::NoEligibleChain(_))
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for ChainError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for ChainError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for chain dispatch operations
pub type Result<T> = std::result::Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ChainError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ChainError::InvalidState("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ChainError::Database("down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_invalid_state_message_matches_wire_wording() {
        let err = ChainError::InvalidState("abc".into());
        assert_eq!(err.to_string(), "Chain not in use: abc");
        assert_eq!(err.error_code(), "CHAIN_NOT_IN_USE");
    }
}
