//! Chain document schema
//!
//! One document per chain. The counter fields present depend on the
//! deployment's counter scheme: `completions`, or `writeCount` + `readCount`.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::{Chain, ChainError, ChainId, ChainState, Counters, NewChain};

/// Default collection name for chains
pub const CHAIN_COLLECTION: &str = "chains";

/// Chain document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ChainDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Experimental condition label
    pub condition: String,

    /// Free or busy
    #[serde(default)]
    pub state: ChainState,

    /// Contributions in completion order
    #[serde(default)]
    pub messages: Vec<String>,

    /// Single-counter scheme
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<i64>,

    /// Write counter (writes + reads scheme)
    #[serde(rename = "writeCount", skip_serializing_if = "Option::is_none")]
    pub write_count: Option<i64>,

    /// Read counter (writes + reads scheme)
    #[serde(rename = "readCount", skip_serializing_if = "Option::is_none")]
    pub read_count: Option<i64>,

    /// Setup batch this document belongs to; present only until the batch commits
    #[serde(
        rename = "setupBatch",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub setup_batch: Option<String>,
}

fn to_count(value: Option<i64>) -> u64 {
    value.map(|v| v.max(0) as u64).unwrap_or(0)
}

impl ChainDoc {
    /// Build a fresh, free document for insertion
    pub fn from_new(chain: NewChain) -> Self {
        let (completions, write_count, read_count) = match chain.counters {
            Counters::Completions { completions } => (Some(completions as i64), None, None),
            Counters::WritesReads { writes, reads } => (None, Some(writes as i64), Some(reads as i64)),
        };

        Self {
            _id: None,
            metadata: Metadata::new(),
            condition: chain.condition,
            state: ChainState::Free,
            messages: Vec::new(),
            completions,
            write_count,
            read_count,
            setup_batch: None,
        }
    }

    /// Tag the document with an uncommitted setup batch
    pub fn in_batch(mut self, batch: &str) -> Self {
        self.setup_batch = Some(batch.to_string());
        self
    }

    /// Convert to the store-agnostic chain record
    pub fn into_chain(self) -> Result<Chain, ChainError> {
        let id = self
            ._id
            .ok_or_else(|| ChainError::Database("Chain document has no _id".into()))?;

        let counters = match self.completions {
            Some(completions) => Counters::Completions {
                completions: completions.max(0) as u64,
            },
            None => Counters::WritesReads {
                writes: to_count(self.write_count),
                reads: to_count(self.read_count),
            },
        };

        Ok(Chain {
            id: ChainId::new(id.to_hex()),
            condition: self.condition,
            state: self.state,
            messages: self.messages,
            counters,
        })
    }
}

impl IntoIndexes for ChainDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Eligibility scans filter on condition and state
            (
                doc! { "condition": 1, "state": 1 },
                Some(
                    IndexOptions::builder()
                        .name("condition_state_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ChainDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
