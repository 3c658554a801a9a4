//! Selection policy
//!
//! Picks one eligible chain from a condition pool, minimizing the load
//! metric. Ties at the minimum are broken uniformly at random so equally
//! loaded chains share assignments instead of the first one soaking them up.
//!
//! Selection is a read-only query: it never changes state. The caller
//! (claim) still has to win the conditional update on the chain it gets.

use clap::ValueEnum;
use rand::Rng;
use tracing::debug;

use crate::store::{ChainFilter, ChainStore};
use crate::types::{Chain, ConditionMatch, LoadKey, Purpose, Result};

/// How to choose among chains tied at the minimum load
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TieBreak {
    /// Uniformly at random
    #[default]
    Random,
    /// Earliest created
    First,
}

/// Configurable selection over a condition pool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub condition_match: ConditionMatch,
    pub load_key: LoadKey,
    pub tie_break: TieBreak,
}

impl SelectionPolicy {
    /// Store query for a condition key and purpose
    pub fn filter(&self, condition: &str, purpose: Purpose) -> ChainFilter {
        ChainFilter {
            condition: condition.to_string(),
            condition_match: self.condition_match,
            require_written: purpose == Purpose::Read,
            load_key: self.load_key,
        }
    }

    /// Select one chain, or `None` if nothing in the pool is eligible
    pub async fn select(
        &self,
        store: &dyn ChainStore,
        condition: &str,
        purpose: Purpose,
    ) -> Result<Option<Chain>> {
        let candidates = store.find_eligible(&self.filter(condition, purpose)).await?;
        let picked = self.pick(candidates);

        if let Some(ref chain) = picked {
            debug!(
                chain_id = %chain.id,
                condition = %chain.condition,
                ?purpose,
                "Selected chain"
            );
        }

        Ok(picked)
    }

    /// Choose among candidates; `First` keeps the store order for ties
    pub fn pick(&self, candidates: Vec<Chain>) -> Option<Chain> {
        let min = candidates
            .iter()
            .map(|c| c.counters.load(self.load_key))
            .min()?;

        let mut tied: Vec<Chain> = candidates
            .into_iter()
            .filter(|c| c.counters.load(self.load_key) == min)
            .collect();

        match self.tie_break {
            TieBreak::First => Some(tied.swap_remove(0)),
            TieBreak::Random => {
                let chosen = rand::thread_rng().gen_range(0..tied.len());
                Some(tied.swap_remove(chosen))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChainId, ChainState, Counters};
    use std::collections::HashMap;

    fn chain(id: &str, writes: u64, reads: u64) -> Chain {
        Chain {
            id: ChainId::new(id),
            condition: "A".into(),
            state: ChainState::Free,
            messages: vec![String::new(); writes as usize],
            counters: Counters::WritesReads { writes, reads },
        }
    }

    #[test]
    fn test_empty_pool() {
        assert!(SelectionPolicy::default().pick(vec![]).is_none());
    }

    #[test]
    fn test_minimum_is_lexicographic_on_composite_key() {
        let policy = SelectionPolicy {
            tie_break: TieBreak::First,
            ..Default::default()
        };
        let picked = policy
            .pick(vec![chain("a", 1, 0), chain("b", 0, 9), chain("c", 0, 2)])
            .unwrap();
        assert_eq!(picked.id.as_str(), "c");
    }

    #[test]
    fn test_primary_key_ignores_reads() {
        let policy = SelectionPolicy {
            load_key: LoadKey::Primary,
            tie_break: TieBreak::First,
            ..Default::default()
        };
        let picked = policy.pick(vec![chain("a", 0, 9), chain("b", 0, 2)]).unwrap();
        assert_eq!(picked.id.as_str(), "a");
    }

    #[test]
    fn test_first_tie_break_takes_first_in_store_order() {
        let policy = SelectionPolicy {
            tie_break: TieBreak::First,
            ..Default::default()
        };
        for _ in 0..20 {
            let picked = policy
                .pick(vec![chain("x", 0, 0), chain("y", 0, 0), chain("z", 1, 0)])
                .unwrap();
            assert_eq!(picked.id.as_str(), "x");
        }
    }

    #[test]
    fn test_random_tie_break_is_roughly_uniform() {
        let policy = SelectionPolicy::default();
        let trials = 3000;
        let mut hits: HashMap<String, usize> = HashMap::new();

        for _ in 0..trials {
            let picked = policy
                .pick(vec![
                    chain("x", 0, 0),
                    chain("y", 0, 0),
                    chain("z", 0, 0),
                    chain("heavy", 5, 0),
                ])
                .unwrap();
            *hits.entry(picked.id.as_str().to_string()).or_default() += 1;
        }

        assert!(!hits.contains_key("heavy"));
        for id in ["x", "y", "z"] {
            let n = hits.get(id).copied().unwrap_or(0);
            // Expected 1000 each; allow a wide band
            assert!((800..=1200).contains(&n), "{id} chosen {n} times");
        }
    }

    #[test]
    fn test_read_purpose_requires_writes() {
        let policy = SelectionPolicy::default();
        assert!(policy.filter("A", Purpose::Read).require_written);
        assert!(!policy.filter("A", Purpose::Write).require_written);
    }
}
