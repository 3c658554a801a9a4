//! Chain domain types
//!
//! A chain is a unit of sequential work: clients claim it, append one
//! message, and hand it back. These are the store-agnostic shapes the
//! lifecycle manager and the HTTP layer work with.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque chain identifier
///
/// The backing store decides the format (ObjectId hex for MongoDB, UUID for
/// the in-memory store). Callers only ever see a string.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ChainId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ChainId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Claimability of a chain
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChainState {
    /// Available for claims and peeks
    #[default]
    Free,
    /// Held by one client between claim and complete/release
    Busy,
}

impl ChainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Busy => "busy",
        }
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which load counters a deployment keeps
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum CounterScheme {
    /// Single completion counter
    Completions,
    /// Separate write and read counters
    #[default]
    WritesReads,
}

/// Load counters of a chain
///
/// Exactly one shape is active per deployment. Serialized flat into the chain
/// record: `completions`, or `writeCount` + `readCount`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum Counters {
    WritesReads {
        #[serde(rename = "writeCount")]
        writes: u64,
        #[serde(rename = "readCount")]
        reads: u64,
    },
    Completions {
        completions: u64,
    },
}

impl Counters {
    /// Zeroed counters for a freshly created chain
    pub fn zeroed(scheme: CounterScheme) -> Self {
        match scheme {
            CounterScheme::Completions => Self::Completions { completions: 0 },
            CounterScheme::WritesReads => Self::WritesReads { writes: 0, reads: 0 },
        }
    }

    /// Completed work episodes; always equals the message count
    pub fn writes(&self) -> u64 {
        match *self {
            Self::Completions { completions } => completions,
            Self::WritesReads { writes, .. } => writes,
        }
    }

    /// Read counter, if this scheme keeps one
    pub fn reads(&self) -> Option<u64> {
        match *self {
            Self::Completions { .. } => None,
            Self::WritesReads { reads, .. } => Some(reads),
        }
    }

    /// Apply counter increments. Read increments are dropped for `Completions`.
    pub fn bump(&mut self, inc_writes: bool, inc_reads: bool) {
        match self {
            Self::Completions { completions } => {
                if inc_writes {
                    *completions += 1;
                }
            }
            Self::WritesReads { writes, reads } => {
                if inc_writes {
                    *writes += 1;
                }
                if inc_reads {
                    *reads += 1;
                }
            }
        }
    }

    /// Ranking key under the given load metric, compared lexicographically
    pub fn load(&self, key: LoadKey) -> (u64, u64) {
        match (*self, key) {
            (Self::Completions { completions }, _) => (completions, 0),
            (Self::WritesReads { writes, .. }, LoadKey::Primary) => (writes, 0),
            (Self::WritesReads { writes, reads }, LoadKey::Composite) => (writes, reads),
        }
    }
}

/// What a claim is for
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    /// Take exclusive use to append a message
    #[default]
    Write,
    /// Take exclusive use to consume existing messages; needs at least one write
    Read,
}

/// How a requested condition key is matched against chain conditions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ConditionMatch {
    /// Condition must equal the key
    #[default]
    Exact,
    /// Condition must start with the key (`"A"` covers `"A.1"`)
    Prefix,
}

impl ConditionMatch {
    pub fn matches(&self, key: &str, condition: &str) -> bool {
        match self {
            Self::Exact => condition == key,
            Self::Prefix => condition.starts_with(key),
        }
    }
}

/// Load metric minimized by selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LoadKey {
    /// Completions, or writes alone
    Primary,
    /// Writes, then reads
    #[default]
    Composite,
}

/// A chain record
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    pub id: ChainId,
    pub condition: String,
    pub state: ChainState,
    pub messages: Vec<String>,
    #[serde(flatten)]
    pub counters: Counters,
}

impl Chain {
    pub fn is_free(&self) -> bool {
        self.state == ChainState::Free
    }

    pub fn is_busy(&self) -> bool {
        self.state == ChainState::Busy
    }

    /// Whether anyone has contributed to this chain yet
    pub fn has_writes(&self) -> bool {
        self.counters.writes() > 0
    }
}

/// A chain to be created by setup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewChain {
    pub condition: String,
    pub counters: Counters,
}

impl NewChain {
    pub fn new(condition: impl Into<String>, scheme: CounterScheme) -> Self {
        Self {
            condition: condition.into(),
            counters: Counters::zeroed(scheme),
        }
    }
}
