//! Chain lifecycle integration tests
//!
//! Drives the public `ChainManager` API over the in-memory store:
//! - Setup shape and reset
//! - Claim / complete / release state machine
//! - Concurrent claims racing for the same chain
//! - Load-balanced, fair selection
//! - Condition prefix matching

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chain_dispatch::store::ChainStore;
use chain_dispatch::types::{
    Chain, ChainError, ChainId, ChainState, ConditionMatch, CounterScheme, Counters, LoadKey,
    Purpose,
};
use chain_dispatch::{ChainManager, InMemoryChainStore, LifecycleConfig, SelectionPolicy, TieBreak};
use tokio_test::{assert_err, assert_ok};

fn manager_with(policy: SelectionPolicy, config: LifecycleConfig) -> (Arc<ChainManager>, Arc<InMemoryChainStore>) {
    let store = Arc::new(InMemoryChainStore::new());
    let manager = ChainManager::new(store.clone(), policy, config);
    (Arc::new(manager), store)
}

fn default_manager() -> (Arc<ChainManager>, Arc<InMemoryChainStore>) {
    manager_with(SelectionPolicy::default(), LifecycleConfig::default())
}

async fn all_chains(manager: &ChainManager, ids: &[ChainId]) -> Vec<Chain> {
    let mut chains = Vec::new();
    for id in ids {
        chains.push(manager.get(id).await.unwrap());
    }
    chains
}

fn assert_messages_match_writes(chains: &[Chain]) {
    for chain in chains {
        assert_eq!(
            chain.messages.len() as u64,
            chain.counters.writes(),
            "chain {} out of step",
            chain.id
        );
    }
}

// =============================================================================
// Setup & Reset
// =============================================================================

#[tokio::test]
async fn test_setup_creates_free_zeroed_chains_per_label() {
    let (manager, _) = default_manager();
    let ids = manager.setup(["A", "B"], 3).await.unwrap();
    assert_eq!(ids.len(), 6);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 6);

    let chains = all_chains(&manager, &ids).await;
    let mut per_label: HashMap<String, usize> = HashMap::new();
    for chain in &chains {
        *per_label.entry(chain.condition.clone()).or_default() += 1;
        assert_eq!(chain.state, ChainState::Free);
        assert!(chain.messages.is_empty());
        assert_eq!(chain.counters, Counters::WritesReads { writes: 0, reads: 0 });
    }
    assert_eq!(per_label.get("A"), Some(&3));
    assert_eq!(per_label.get("B"), Some(&3));
}

#[tokio::test]
async fn test_setup_is_additive() {
    let (manager, _) = default_manager();
    manager.setup(["A"], 2).await.unwrap();
    manager.setup(["A"], 2).await.unwrap();
    assert_eq!(manager.pool_size().await.unwrap(), 4);
}

#[tokio::test]
async fn test_reset_all_empties_pool() {
    let (manager, _) = default_manager();
    let ids = manager.setup(["A", "B"], 2).await.unwrap();
    let claimed = manager.claim("A", Purpose::Write).await.unwrap();
    manager.complete(&claimed.id, "m").await.unwrap();

    assert_eq!(manager.reset_all().await.unwrap(), 4);
    assert_eq!(manager.pool_size().await.unwrap(), 0);

    for condition in ["A", "B"] {
        let err = assert_err!(manager.claim(condition, Purpose::Write).await);
        assert!(err.is_no_eligible_chain());
    }
    assert!(matches!(manager.get(&ids[0]).await, Err(ChainError::NotFound(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_claims_racing_setup_see_whole_batch_or_nothing() {
    const PER_CONDITION: u32 = 2_000;
    let (manager, _) = default_manager();

    let setup = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.setup(["A"], PER_CONDITION).await }
    });

    let mut sizes = Vec::new();
    let mut claimed = Vec::new();
    loop {
        let done = setup.is_finished();
        sizes.push(manager.pool_size().await.unwrap());
        match manager.claim("A", Purpose::Write).await {
            Ok(chain) => claimed.push(chain.id),
            Err(e) => assert!(e.is_no_eligible_chain()),
        }
        if done {
            break;
        }
        tokio::task::yield_now().await;
    }

    let ids = setup.await.unwrap().unwrap();
    assert!(sizes.iter().all(|n| *n == 0 || *n == u64::from(PER_CONDITION)));
    assert!(claimed.iter().all(|id| ids.contains(id)));
    assert!(!claimed.is_empty());
}

// =============================================================================
// State Machine
// =============================================================================

#[tokio::test]
async fn test_claim_complete_claim_on_single_chain() {
    let (manager, _) = default_manager();
    manager.setup(["A"], 1).await.unwrap();

    let first = assert_ok!(manager.claim("A", Purpose::Write).await);
    assert_eq!(first.state, ChainState::Busy);

    // Busy chains are not claimable
    assert!(manager.claim("A", Purpose::Write).await.unwrap_err().is_no_eligible_chain());

    manager.complete(&first.id, "first message").await.unwrap();

    let second = assert_ok!(manager.claim("A", Purpose::Write).await);
    assert_eq!(second.id, first.id);
    assert_eq!(second.messages.len(), 1);
}

#[tokio::test]
async fn test_complete_on_free_chain_is_rejected_and_changes_nothing() {
    let (manager, _) = default_manager();
    let ids = manager.setup(["A"], 1).await.unwrap();
    let before = manager.get(&ids[0]).await.unwrap();

    let err = assert_err!(manager.complete(&ids[0], "sneaky").await);
    assert!(matches!(err, ChainError::InvalidState(_)));

    let after = manager.get(&ids[0]).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_read_claim_requires_prior_write() {
    let (manager, _) = default_manager();
    manager.setup(["A"], 1).await.unwrap();

    assert!(manager.claim("A", Purpose::Read).await.unwrap_err().is_no_eligible_chain());
    assert!(manager.peek("A").await.unwrap_err().is_no_eligible_chain());

    let claimed = manager.claim("A", Purpose::Write).await.unwrap();
    manager.complete(&claimed.id, "seed").await.unwrap();

    let read = assert_ok!(manager.claim("A", Purpose::Read).await);
    assert_eq!(read.messages, vec!["seed".to_string()]);
}

#[tokio::test]
async fn test_peek_never_changes_state() {
    let (manager, _) = default_manager();
    let ids = manager.setup(["A"], 3).await.unwrap();

    // Give every chain a write so peeks have something to return
    for _ in 0..3 {
        let chain = manager.claim("A", Purpose::Write).await.unwrap();
        manager.complete(&chain.id, "m").await.unwrap();
    }

    for _ in 0..25 {
        let peeked = manager.peek("A").await.unwrap();
        assert_eq!(peeked.state, ChainState::Free);
    }

    for chain in all_chains(&manager, &ids).await {
        assert_eq!(chain.state, ChainState::Free);
    }
}

#[tokio::test]
async fn test_counters_never_decrease_and_stay_in_step() {
    let (manager, _) = default_manager();
    let ids = manager.setup(["A", "B"], 2).await.unwrap();
    let mut last: HashMap<ChainId, (u64, u64)> = HashMap::new();

    for round in 0..20 {
        let condition = if round % 2 == 0 { "A" } else { "B" };
        let chain = manager.claim(condition, Purpose::Write).await.unwrap();
        match round % 3 {
            0 => {
                manager.complete(&chain.id, format!("round {round}")).await.unwrap();
            }
            1 => {
                manager.release(&chain.id).await.unwrap();
            }
            _ => {
                manager.record_read(&chain.id).await.unwrap();
                manager.complete(&chain.id, "late").await.unwrap();
            }
        }

        let chains = all_chains(&manager, &ids).await;
        assert_messages_match_writes(&chains);
        for chain in chains {
            let now = (chain.counters.writes(), chain.counters.reads().unwrap());
            let before = last.insert(chain.id.clone(), now).unwrap_or((0, 0));
            assert!(now.0 >= before.0 && now.1 >= before.1);
        }
    }
}

#[tokio::test]
async fn test_single_counter_deployment() {
    let (manager, _) = manager_with(
        SelectionPolicy {
            tie_break: TieBreak::First,
            ..Default::default()
        },
        LifecycleConfig {
            scheme: CounterScheme::Completions,
            ..Default::default()
        },
    );
    let ids = manager.setup(["1", "2"], 2).await.unwrap();

    let chain = manager.claim("1", Purpose::Write).await.unwrap();
    manager.complete(&chain.id, "done").await.unwrap();

    // Least completions wins: the other chain in condition 1
    let next = manager.claim("1", Purpose::Write).await.unwrap();
    assert_ne!(next.id, chain.id);
    assert_eq!(next.counters, Counters::Completions { completions: 0 });

    assert_messages_match_writes(&all_chains(&manager, &ids).await);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_concurrent_claims_on_one_chain() {
    for _ in 0..50 {
        let (manager, _) = default_manager();
        manager.setup(["A"], 1).await.unwrap();

        let a = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.claim("A", Purpose::Write).await }
        });
        let b = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.claim("A", Purpose::Write).await }
        });

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.is_no_eligible_chain()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_claims_never_share_a_chain() {
    let (manager, _) = default_manager();
    manager.setup(["A"], 5).await.unwrap();

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.claim("A", Purpose::Write).await })
        })
        .collect();

    let mut won = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(chain) => won.push(chain.id),
            Err(e) => assert!(e.is_no_eligible_chain()),
        }
    }

    // Winners hold distinct chains
    let distinct: HashSet<_> = won.iter().cloned().collect();
    assert_eq!(distinct.len(), won.len());
    assert!(won.len() <= 5);
}

// =============================================================================
// Selection
// =============================================================================

#[tokio::test]
async fn test_claims_prefer_least_loaded_chain() {
    let (manager, _) = default_manager();
    manager.setup(["A"], 2).await.unwrap();

    let first = manager.claim("A", Purpose::Write).await.unwrap();
    manager.complete(&first.id, "m").await.unwrap();

    // The untouched chain has the lower load now
    for _ in 0..10 {
        let next = manager.claim("A", Purpose::Write).await.unwrap();
        assert_ne!(next.id, first.id);
        manager.release(&next.id).await.unwrap();
        // Release bumps reads, but the write count still ranks first
        assert!(next.counters.writes() == 0);
    }
}

#[tokio::test]
async fn test_tied_chains_are_chosen_fairly() {
    let (manager, _) = manager_with(
        SelectionPolicy {
            load_key: LoadKey::Primary,
            ..Default::default()
        },
        LifecycleConfig {
            count_read_on_release: false,
            ..Default::default()
        },
    );
    manager.setup(["A"], 3).await.unwrap();

    let mut hits: HashMap<ChainId, usize> = HashMap::new();
    for _ in 0..900 {
        let chain = manager.claim("A", Purpose::Write).await.unwrap();
        manager.release(&chain.id).await.unwrap();
        *hits.entry(chain.id).or_default() += 1;
    }

    assert_eq!(hits.len(), 3);
    for (id, n) in hits {
        assert!((200..=400).contains(&n), "chain {id} chosen {n} times");
    }
}

#[tokio::test]
async fn test_prefix_conditions_group_sub_conditions() {
    let (manager, _) = manager_with(
        SelectionPolicy {
            condition_match: ConditionMatch::Prefix,
            ..Default::default()
        },
        LifecycleConfig::default(),
    );
    manager.setup(["A.1", "B.1"], 1).await.unwrap();

    let chain = manager.claim("A", Purpose::Write).await.unwrap();
    assert_eq!(chain.condition, "A.1");

    // B.1 is never eligible under "A"
    assert!(manager.claim("A", Purpose::Write).await.unwrap_err().is_no_eligible_chain());
}

#[tokio::test]
async fn test_exact_conditions_do_not_group() {
    let (manager, store) = default_manager();
    manager.setup(["A.1"], 1).await.unwrap();

    assert!(manager.claim("A", Purpose::Write).await.unwrap_err().is_no_eligible_chain());
    assert_eq!(store.count().await.unwrap(), 1);
}
