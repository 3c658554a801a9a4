//! Chain store
//!
//! Durable keyed storage for chain records. The lifecycle manager only talks
//! to the `ChainStore` trait, so the same selection and locking logic runs
//! against MongoDB in production and an in-memory map in tests and dev mode.
//!
//! ## Locking discipline
//!
//! `cas_update` is the only way a chain's `state` changes. It applies a
//! field-level patch if, and only if, the record's state matches the guard
//! at the moment of the write. Two concurrent claims on one chain therefore
//! cannot both succeed: the loser sees `CasOutcome::Conflict`.

mod memory;
mod mongo;

pub use memory::InMemoryChainStore;
pub use mongo::MongoChainStore;

use async_trait::async_trait;

use crate::types::{Chain, ChainId, ChainState, ConditionMatch, LoadKey, NewChain, Result};

/// Precondition on a chain's state for a conditional update
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateGuard {
    /// Apply regardless of state
    Any,
    /// Apply only if the state currently equals this value
    Is(ChainState),
}

impl StateGuard {
    pub fn admits(&self, state: ChainState) -> bool {
        match self {
            Self::Any => true,
            Self::Is(expected) => *expected == state,
        }
    }
}

/// Field-level patch applied atomically by `cas_update`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainPatch {
    pub set_state: Option<ChainState>,
    pub push_message: Option<String>,
    pub inc_writes: bool,
    pub inc_reads: bool,
}

impl ChainPatch {
    pub fn set_state(state: ChainState) -> Self {
        Self {
            set_state: Some(state),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.push_message = Some(message.into());
        self
    }

    pub fn inc_writes(mut self) -> Self {
        self.inc_writes = true;
        self
    }

    pub fn inc_reads(mut self, yes: bool) -> Self {
        self.inc_reads = yes;
        self
    }

    /// Apply this patch to an in-memory record
    pub fn apply_to(&self, chain: &mut Chain) {
        if let Some(state) = self.set_state {
            chain.state = state;
        }
        if let Some(ref message) = self.push_message {
            chain.messages.push(message.clone());
        }
        chain.counters.bump(self.inc_writes, self.inc_reads);
    }
}

/// Result of a conditional update
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// The patch was applied; the post-update record
    Updated(Chain),
    /// The record exists but its state did not satisfy the guard
    Conflict,
    /// No record with that id
    NotFound,
}

/// Eligibility query over a condition pool
///
/// Only `Free` chains are ever returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainFilter {
    pub condition: String,
    pub condition_match: ConditionMatch,
    /// Require at least one completed write
    pub require_written: bool,
    pub load_key: LoadKey,
}

impl ChainFilter {
    /// Whether a record satisfies this filter
    pub fn matches(&self, chain: &Chain) -> bool {
        chain.is_free()
            && self.condition_match.matches(&self.condition, &chain.condition)
            && (!self.require_written || chain.has_writes())
    }
}

/// Durable chain storage
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Create a batch of chains; all or nothing from the caller's view
    async fn insert_many(&self, chains: Vec<NewChain>) -> Result<Vec<ChainId>>;

    /// Point lookup
    async fn get(&self, id: &ChainId) -> Result<Option<Chain>>;

    /// Free chains matching the filter, ascending by load key
    async fn find_eligible(&self, filter: &ChainFilter) -> Result<Vec<Chain>>;

    /// Apply `patch` only if the chain's current state satisfies `guard`
    async fn cas_update(&self, id: &ChainId, guard: StateGuard, patch: ChainPatch)
        -> Result<CasOutcome>;

    /// Remove every chain, returning how many were removed
    async fn delete_all(&self) -> Result<u64>;

    /// Number of chains in the pool
    async fn count(&self) -> Result<u64>;
}
