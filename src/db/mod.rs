//! Database layer: MongoDB client, typed collections and schemas

pub mod mongo;
pub mod schemas;

pub use mongo::{redact_uri, IntoIndexes, MongoClient, MongoCollection, MutMetadata};
