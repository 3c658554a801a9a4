//! HTTP transport for the chain lifecycle

pub mod http;

pub use http::{run, AppState};
