//! Database schemas
//!
//! Defines the MongoDB document structure for chains.

mod chain;
mod metadata;

pub use chain::{ChainDoc, CHAIN_COLLECTION};
pub use metadata::Metadata;
