//! In-memory chain store
//!
//! Used in dev mode and tests. Chains live in a `DashMap`; a conditional
//! update holds the entry's shard guard for the whole check-and-apply, which
//! makes it linearizable per chain without any global lock.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{CasOutcome, ChainFilter, ChainPatch, ChainStore, StateGuard};
use crate::types::{Chain, ChainId, ChainState, NewChain, Result};

struct Slot {
    /// Insertion order, the secondary sort key
    seq: u64,
    chain: Chain,
}

/// DashMap-backed chain store
pub struct InMemoryChainStore {
    chains: DashMap<String, Slot>,
    next_seq: AtomicU64,
    /// Writers are whole-pool batches (setup, reset); readers are pool scans.
    /// Keeps a half-inserted batch invisible to scans.
    batch_gate: RwLock<()>,
}

impl InMemoryChainStore {
    pub fn new() -> Self {
        Self {
            chains: DashMap::new(),
            next_seq: AtomicU64::new(0),
            batch_gate: RwLock::new(()),
        }
    }
}

impl Default for InMemoryChainStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainStore for InMemoryChainStore {
    async fn insert_many(&self, chains: Vec<NewChain>) -> Result<Vec<ChainId>> {
        let _batch = self.batch_gate.write().await;

        let ids = chains
            .into_iter()
            .map(|new_chain| {
                let id = ChainId::new(Uuid::new_v4().to_string());
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                self.chains.insert(
                    id.as_str().to_string(),
                    Slot {
                        seq,
                        chain: Chain {
                            id: id.clone(),
                            condition: new_chain.condition,
                            state: ChainState::Free,
                            messages: Vec::new(),
                            counters: new_chain.counters,
                        },
                    },
                );
                id
            })
            .collect::<Vec<_>>();

        debug!(count = ids.len(), "Inserted chains into memory store");
        Ok(ids)
    }

    async fn get(&self, id: &ChainId) -> Result<Option<Chain>> {
        Ok(self.chains.get(id.as_str()).map(|slot| slot.chain.clone()))
    }

    async fn find_eligible(&self, filter: &ChainFilter) -> Result<Vec<Chain>> {
        let _batch = self.batch_gate.read().await;

        let mut eligible: Vec<(u64, Chain)> = self
            .chains
            .iter()
            .filter(|slot| filter.matches(&slot.chain))
            .map(|slot| (slot.seq, slot.chain.clone()))
            .collect();

        eligible.sort_by_key(|(seq, chain)| (chain.counters.load(filter.load_key), *seq));

        Ok(eligible.into_iter().map(|(_, chain)| chain).collect())
    }

    async fn cas_update(
        &self,
        id: &ChainId,
        guard: StateGuard,
        patch: ChainPatch,
    ) -> Result<CasOutcome> {
        let Some(mut slot) = self.chains.get_mut(id.as_str()) else {
            return Ok(CasOutcome::NotFound);
        };

        if !guard.admits(slot.chain.state) {
            return Ok(CasOutcome::Conflict);
        }

        patch.apply_to(&mut slot.chain);
        Ok(CasOutcome::Updated(slot.chain.clone()))
    }

    async fn delete_all(&self) -> Result<u64> {
        let _batch = self.batch_gate.write().await;

        let count = self.chains.len() as u64;
        self.chains.clear();
        Ok(count)
    }

    async fn count(&self) -> Result<u64> {
        let _batch = self.batch_gate.read().await;
        Ok(self.chains.len() as u64)
    }
}
