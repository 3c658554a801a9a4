//! MongoDB client and collection wrapper

use bson::{doc, oid::ObjectId, DateTime, Document};
use futures_util::stream::{Stream, TryStreamExt};
use mongodb::{
    options::{IndexOptions, ReturnDocument, UpdateModifications},
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use tracing::info;

use crate::db::schemas::Metadata;
use crate::types::ChainError;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify the server answers a ping
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, ChainError> {
        info!("Connecting to MongoDB at {}", redact_uri(uri));

        // Fail fast instead of hanging on an unreachable server
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| ChainError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| ChainError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, ChainError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    /// Create a new collection handle and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, ChainError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), ChainError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| ChainError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a batch of documents in one ordered write, returning ids in input order
    pub async fn insert_many(&self, mut items: Vec<T>) -> Result<Vec<ObjectId>, ChainError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let now = DateTime::now();
        for item in items.iter_mut() {
            let metadata = item.mut_metadata();
            metadata.created_at = Some(now);
            metadata.updated_at = Some(now);
        }

        let result = self
            .inner
            .insert_many(items)
            .await
            .map_err(|e| ChainError::Database(format!("Insert failed: {}", e)))?;

        let mut ids: Vec<(usize, ObjectId)> = result
            .inserted_ids
            .into_iter()
            .map(|(index, id)| {
                id.as_object_id()
                    .map(|oid| (index, oid))
                    .ok_or_else(|| ChainError::Database("Inserted ID is not an ObjectId".into()))
            })
            .collect::<Result<_, _>>()?;
        ids.sort_by_key(|(index, _)| *index);

        Ok(ids.into_iter().map(|(_, oid)| oid).collect())
    }

    /// Find one document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, ChainError> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| ChainError::Database(format!("Find failed: {}", e)))
    }

    /// Find many documents by filter, optionally sorted.
    ///
    /// Any failed cursor item fails the whole read.
    pub async fn find_many(
        &self,
        filter: Document,
        sort: Option<Document>,
    ) -> Result<Vec<T>, ChainError> {
        let mut find = self.inner.find(filter);
        if let Some(sort) = sort {
            find = find.sort(sort);
        }

        let cursor = find
            .await
            .map_err(|e| ChainError::Database(format!("Find failed: {}", e)))?;

        drain(cursor).await
    }

    /// Atomically update the first match and return the post-update document
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<Option<T>, ChainError> {
        self.inner
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| ChainError::Database(format!("Update failed: {}", e)))
    }

    /// Apply an update to every matching document, returning the modified count
    pub async fn update_many(&self, filter: Document, update: Document) -> Result<u64, ChainError> {
        let result = self
            .inner
            .update_many(filter, update)
            .await
            .map_err(|e| ChainError::Database(format!("Update failed: {}", e)))?;

        Ok(result.modified_count)
    }

    /// Hard delete every matching document
    pub async fn delete_many(&self, filter: Document) -> Result<u64, ChainError> {
        let result = self
            .inner
            .delete_many(filter)
            .await
            .map_err(|e| ChainError::Database(format!("Delete failed: {}", e)))?;

        Ok(result.deleted_count)
    }

    /// Count matching documents
    pub async fn count(&self, filter: Document) -> Result<u64, ChainError> {
        self.inner
            .count_documents(filter)
            .await
            .map_err(|e| ChainError::Database(format!("Count failed: {}", e)))
    }
}

/// Collect a document stream, failing on the first bad item
async fn drain<T, E, S>(stream: S) -> Result<Vec<T>, ChainError>
where
    E: Display,
    S: Stream<Item = Result<T, E>>,
{
    stream
        .try_collect::<Vec<T>>()
        .await
        .map_err(|e| ChainError::Database(format!("Failed to read documents: {}", e)))
}

/// Hide credentials in a connection string before it is logged
pub fn redact_uri(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***@{}", scheme, &rest[at + 1..]),
        None => uri.to_string(),
    }
}
