//! Chain lifecycle manager
//!
//! Orchestrates the busy/free state machine on top of a `ChainStore` and a
//! `SelectionPolicy`:
//!
//! ```text
//! Free --claim--> Busy --complete--> Free   (message appended, writes+reads bumped)
//!                 Busy --release---> Free   (no message, reads bumped if configured)
//! ```
//!
//! Every state change goes through `ChainStore::cas_update`. No in-process
//! lock is held across store I/O; correctness comes from the store's
//! conditional update alone, so any number of service instances can share
//! one pool.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::selection::SelectionPolicy;
use crate::store::{CasOutcome, ChainPatch, ChainStore, StateGuard};
use crate::types::{
    Chain, ChainError, ChainId, ChainState, CounterScheme, NewChain, Purpose, Result,
};

/// Default number of selection rounds a claim gets before giving up
pub const DEFAULT_CLAIM_ATTEMPTS: u32 = 5;

/// Default cap on chains created by one setup call
pub const DEFAULT_MAX_SETUP_CHAINS: u64 = 10_000;

/// Lifecycle behavior switches
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Counter shape for newly created chains
    pub scheme: CounterScheme,
    /// Selection rounds per claim when racing other claimers
    pub claim_attempts: u32,
    /// Whether releasing an abandoned claim still counts as a read
    pub count_read_on_release: bool,
    /// Most chains a single setup call may create
    pub max_setup_chains: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            scheme: CounterScheme::WritesReads,
            claim_attempts: DEFAULT_CLAIM_ATTEMPTS,
            count_read_on_release: true,
            max_setup_chains: DEFAULT_MAX_SETUP_CHAINS,
        }
    }
}

/// Assigns chains to clients and takes them back
pub struct ChainManager {
    store: Arc<dyn ChainStore>,
    policy: SelectionPolicy,
    config: LifecycleConfig,
}

impl ChainManager {
    pub fn new(store: Arc<dyn ChainStore>, policy: SelectionPolicy, config: LifecycleConfig) -> Self {
        Self {
            store,
            policy,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Create `chains_per_condition` free chains for every label.
    ///
    /// Not idempotent: repeated calls add chains alongside existing ones.
    /// Rejected before anything is written if the batch would exceed
    /// `max_setup_chains`.
    pub async fn setup<I, S>(&self, conditions: I, chains_per_condition: u32) -> Result<Vec<ChainId>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if chains_per_condition == 0 {
            return Err(ChainError::BadRequest(
                "chains per condition must be greater than zero".into(),
            ));
        }

        let max = self.config.max_setup_chains;
        let too_large = |labels: usize| {
            (labels as u64)
                .checked_mul(u64::from(chains_per_condition))
                .map_or(true, |total| total > max)
        };

        let mut seen = HashSet::new();
        let mut labels = Vec::new();
        for label in conditions {
            let label = label.into();
            if label.trim().is_empty() {
                return Err(ChainError::BadRequest("condition labels must not be blank".into()));
            }
            if seen.insert(label.clone()) {
                labels.push(label);
                if too_large(labels.len()) {
                    return Err(ChainError::BadRequest(format!(
                        "setup would create more than {} chains",
                        max
                    )));
                }
            }
        }

        if labels.is_empty() {
            return Err(ChainError::BadRequest("at least one condition is required".into()));
        }

        let chains: Vec<NewChain> = labels
            .iter()
            .flat_map(|label| {
                (0..chains_per_condition).map(move |_| NewChain::new(label.clone(), self.config.scheme))
            })
            .collect();

        let ids = self.store.insert_many(chains).await?;

        info!(
            conditions = labels.len(),
            chains_per_condition,
            created = ids.len(),
            "Set up chain pool"
        );

        Ok(ids)
    }

    /// Take exclusive use of the least-loaded eligible chain.
    ///
    /// Returns the claimed chain, now `Busy`.
    pub async fn claim(&self, condition: &str, purpose: Purpose) -> Result<Chain> {
        for attempt in 1..=self.config.claim_attempts {
            let Some(candidate) = self.policy.select(self.store.as_ref(), condition, purpose).await?
            else {
                break;
            };

            match self
                .store
                .cas_update(
                    &candidate.id,
                    StateGuard::Is(ChainState::Free),
                    ChainPatch::set_state(ChainState::Busy),
                )
                .await?
            {
                CasOutcome::Updated(chain) => {
                    info!(
                        chain_id = %chain.id,
                        condition = %chain.condition,
                        ?purpose,
                        attempt,
                        "Chain claimed"
                    );
                    return Ok(chain);
                }
                CasOutcome::Conflict => {
                    debug!(
                        chain_id = %candidate.id,
                        attempt,
                        "Lost claim race, reselecting"
                    );
                }
                CasOutcome::NotFound => {
                    // Pool was reset between selection and claim
                    debug!(chain_id = %candidate.id, attempt, "Selected chain vanished");
                }
            }
        }

        debug!(condition, ?purpose, "No chain assigned");
        Err(ChainError::NoEligibleChain(condition.to_string()))
    }

    /// Select like a read claim, without taking the chain.
    ///
    /// The chain stays `Free` and selectable by others.
    pub async fn peek(&self, condition: &str) -> Result<Chain> {
        self.policy
            .select(self.store.as_ref(), condition, Purpose::Read)
            .await?
            .ok_or_else(|| ChainError::NoEligibleChain(condition.to_string()))
    }

    /// Fetch a chain by id
    pub async fn get(&self, id: &ChainId) -> Result<Chain> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ChainError::NotFound(id.to_string()))
    }

    /// Append a message to a claimed chain and free it.
    ///
    /// Fails with `InvalidState` if the chain is not currently claimed; in
    /// that case nothing about the chain changes.
    pub async fn complete(&self, id: &ChainId, message: impl Into<String>) -> Result<Chain> {
        let patch = ChainPatch::set_state(ChainState::Free)
            .with_message(message)
            .inc_writes()
            .inc_reads(true);

        match self
            .store
            .cas_update(id, StateGuard::Is(ChainState::Busy), patch)
            .await?
        {
            CasOutcome::Updated(chain) => {
                info!(
                    chain_id = %chain.id,
                    condition = %chain.condition,
                    messages = chain.messages.len(),
                    "Chain completed"
                );
                Ok(chain)
            }
            CasOutcome::Conflict => {
                warn!(chain_id = %id, "Complete on a chain that is not in use");
                Err(ChainError::InvalidState(id.to_string()))
            }
            CasOutcome::NotFound => Err(ChainError::NotFound(id.to_string())),
        }
    }

    /// Free a chain without contributing to it
    pub async fn release(&self, id: &ChainId) -> Result<Chain> {
        let patch = ChainPatch::set_state(ChainState::Free).inc_reads(self.config.count_read_on_release);
        let chain = self.unconditional(id, patch).await?;

        info!(chain_id = %chain.id, condition = %chain.condition, "Chain released");
        Ok(chain)
    }

    /// Count a read of the chain's content without touching its state
    pub async fn record_read(&self, id: &ChainId) -> Result<Chain> {
        let chain = self.unconditional(id, ChainPatch::default().inc_reads(true)).await?;

        debug!(chain_id = %chain.id, reads = ?chain.counters.reads(), "Read recorded");
        Ok(chain)
    }

    /// Delete every chain in the pool
    pub async fn reset_all(&self) -> Result<u64> {
        let deleted = self.store.delete_all().await?;
        warn!(deleted, "Chain pool reset");
        Ok(deleted)
    }

    /// Number of chains in the pool
    pub async fn pool_size(&self) -> Result<u64> {
        self.store.count().await
    }

    async fn unconditional(&self, id: &ChainId, patch: ChainPatch) -> Result<Chain> {
        match self.store.cas_update(id, StateGuard::Any, patch).await? {
            CasOutcome::Updated(chain) => Ok(chain),
            CasOutcome::NotFound => Err(ChainError::NotFound(id.to_string())),
            CasOutcome::Conflict => Err(ChainError::Internal(format!(
                "unguarded update on {} reported a conflict",
                id
            ))),
        }
    }
}
