//! chain-dispatch - exclusive chain assignment for sequential experiments
//!
//! Each experimental condition owns a pool of chains. A participant claims
//! the least-used free chain in their condition, adds one message, and hands
//! it back; no two participants ever hold the same chain at once.
//!
//! ## Layers
//!
//! - **Store**: chain records with an atomic conditional update (MongoDB or in-memory)
//! - **Selection**: least-loaded pick with random tie-breaking
//! - **Lifecycle**: claim / peek / complete / release / record-read / setup / reset
//! - **Server**: thin hyper HTTP adapter over the lifecycle manager

pub mod config;
pub mod db;
pub mod lifecycle;
pub mod logging;
pub mod routes;
pub mod selection;
pub mod server;
pub mod store;
pub mod types;

pub use config::Args;
pub use lifecycle::{ChainManager, LifecycleConfig};
pub use selection::{SelectionPolicy, TieBreak};
pub use server::{run, AppState};
pub use store::{ChainStore, InMemoryChainStore, MongoChainStore};
pub use types::{ChainError, Result};
