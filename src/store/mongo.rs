//! MongoDB-backed chain store
//!
//! The conditional update is a single `findOneAndUpdate` whose filter pins
//! both `_id` and the expected `state`, so the server performs the
//! check-and-set atomically. No application-level lock is involved, which
//! lets several service instances share one collection.
//!
//! Setup writes its batch with a `setupBatch` marker and clears the marker in
//! one `updateMany` once every insert landed. Reads ignore marked documents,
//! and a batch that fails part-way is deleted again.

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, DateTime, Document, Regex};
use tracing::{debug, error, warn};

use super::{CasOutcome, ChainFilter, ChainPatch, ChainStore, StateGuard};
use crate::db::schemas::ChainDoc;
use crate::db::{MongoClient, MongoCollection};
use crate::types::{Chain, ChainId, ConditionMatch, CounterScheme, LoadKey, NewChain, Result};

/// Chain store over a MongoDB collection
pub struct MongoChainStore {
    collection: MongoCollection<ChainDoc>,
    scheme: CounterScheme,
}

impl MongoChainStore {
    /// Open the chain collection, creating its indexes
    pub async fn new(
        mongo: &MongoClient,
        collection_name: &str,
        scheme: CounterScheme,
    ) -> Result<Self> {
        let collection = mongo.collection::<ChainDoc>(collection_name).await?;
        Ok(Self { collection, scheme })
    }
}

/// Parse an external id; ids that are not ObjectIds cannot exist here
fn parse_id(id: &ChainId) -> Option<ObjectId> {
    ObjectId::parse_str(id.as_str()).ok()
}

/// Escape regex metacharacters so a condition key matches literally
fn escape_regex(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn write_field(scheme: CounterScheme) -> &'static str {
    match scheme {
        CounterScheme::Completions => "completions",
        CounterScheme::WritesReads => "writeCount",
    }
}

/// Documents whose setup batch has committed
fn committed() -> Document {
    doc! { "setupBatch": { "$exists": false } }
}

/// Every document of one setup batch, committed or not
fn batch_filter(batch: &str) -> Document {
    doc! { "setupBatch": batch }
}

/// Update making a setup batch visible
fn commit_update() -> Document {
    doc! {
        "$unset": { "setupBatch": "" },
        "$set": { "metadata.updated_at": DateTime::now() },
    }
}

/// Query document for free chains matching an eligibility filter
fn eligibility_filter(filter: &ChainFilter, scheme: CounterScheme) -> Document {
    let mut query = committed();
    query.insert("state", "free");

    match filter.condition_match {
        ConditionMatch::Exact => {
            query.insert("condition", filter.condition.as_str());
        }
        ConditionMatch::Prefix => {
            query.insert(
                "condition",
                Regex {
                    pattern: format!("^{}", escape_regex(&filter.condition)),
                    options: String::new(),
                },
            );
        }
    }

    if filter.require_written {
        query.insert(write_field(scheme), doc! { "$gt": 0 });
    }

    query
}

/// Sort document: load key ascending, then `_id` (insertion order)
fn load_sort(load_key: LoadKey, scheme: CounterScheme) -> Document {
    match (scheme, load_key) {
        (CounterScheme::Completions, _) => doc! { "completions": 1, "_id": 1 },
        (CounterScheme::WritesReads, LoadKey::Primary) => doc! { "writeCount": 1, "_id": 1 },
        (CounterScheme::WritesReads, LoadKey::Composite) => {
            doc! { "writeCount": 1, "readCount": 1, "_id": 1 }
        }
    }
}

/// Filter pinning the document and, optionally, its current state
fn guarded_filter(oid: ObjectId, guard: StateGuard) -> Document {
    let mut filter = doc! { "_id": oid };
    if let StateGuard::Is(state) = guard {
        filter.insert("state", state.as_str());
    }
    filter
}

/// Update document applying a patch in one write
fn patch_update(patch: &ChainPatch, scheme: CounterScheme) -> Document {
    let mut set = doc! { "metadata.updated_at": DateTime::now() };
    if let Some(state) = patch.set_state {
        set.insert("state", state.as_str());
    }

    let mut update = doc! { "$set": set };

    if let Some(ref message) = patch.push_message {
        update.insert("$push", doc! { "messages": message.as_str() });
    }

    let mut inc = Document::new();
    if patch.inc_writes {
        inc.insert(write_field(scheme), 1i64);
    }
    if patch.inc_reads && scheme == CounterScheme::WritesReads {
        inc.insert("readCount", 1i64);
    }
    if !inc.is_empty() {
        update.insert("$inc", inc);
    }

    update
}

#[async_trait]
impl ChainStore for MongoChainStore {
    async fn insert_many(&self, chains: Vec<NewChain>) -> Result<Vec<ChainId>> {
        if chains.is_empty() {
            return Ok(Vec::new());
        }

        let batch = ObjectId::new().to_hex();
        let docs: Vec<ChainDoc> = chains
            .into_iter()
            .map(|chain| ChainDoc::from_new(chain).in_batch(&batch))
            .collect();

        let ids = match self.collection.insert_many(docs).await {
            Ok(ids) => ids,
            Err(e) => {
                self.discard_batch(&batch).await;
                return Err(e);
            }
        };

        if let Err(e) = self.collection.update_many(batch_filter(&batch), commit_update()).await {
            self.discard_batch(&batch).await;
            return Err(e);
        }

        debug!(count = ids.len(), batch = %batch, "Committed chain batch");
        Ok(ids.into_iter().map(|oid| ChainId::new(oid.to_hex())).collect())
    }

    async fn get(&self, id: &ChainId) -> Result<Option<Chain>> {
        let Some(oid) = parse_id(id) else {
            return Ok(None);
        };

        let mut query = committed();
        query.insert("_id", oid);

        self.collection
            .find_one(query)
            .await?
            .map(ChainDoc::into_chain)
            .transpose()
    }

    async fn find_eligible(&self, filter: &ChainFilter) -> Result<Vec<Chain>> {
        let query = eligibility_filter(filter, self.scheme);
        let sort = load_sort(filter.load_key, self.scheme);

        self.collection
            .find_many(query, Some(sort))
            .await?
            .into_iter()
            .map(ChainDoc::into_chain)
            .collect()
    }

    async fn cas_update(
        &self,
        id: &ChainId,
        guard: StateGuard,
        patch: ChainPatch,
    ) -> Result<CasOutcome> {
        let Some(oid) = parse_id(id) else {
            return Ok(CasOutcome::NotFound);
        };

        let updated = self
            .collection
            .find_one_and_update(guarded_filter(oid, guard), patch_update(&patch, self.scheme))
            .await?;

        if let Some(doc) = updated {
            return Ok(CasOutcome::Updated(doc.into_chain()?));
        }

        // No match: either the guard failed or the chain is gone
        let exists = self.collection.count(doc! { "_id": oid }).await? > 0;
        Ok(if exists {
            CasOutcome::Conflict
        } else {
            CasOutcome::NotFound
        })
    }

    async fn delete_all(&self) -> Result<u64> {
        self.collection.delete_many(doc! {}).await
    }

    async fn count(&self) -> Result<u64> {
        self.collection.count(committed()).await
    }
}

impl MongoChainStore {
    /// Remove whatever part of a failed setup batch is still uncommitted
    async fn discard_batch(&self, batch: &str) {
        match self.collection.delete_many(batch_filter(batch)).await {
            Ok(discarded) => warn!(batch, discarded, "Discarded failed setup batch"),
            Err(e) => error!(batch, error = %e, "Failed to discard setup batch"),
        }
    }
}
