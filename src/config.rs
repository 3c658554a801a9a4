//! Configuration for chain-dispatch
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;

use crate::db::schemas::CHAIN_COLLECTION;
use crate::lifecycle::{LifecycleConfig, DEFAULT_CLAIM_ATTEMPTS, DEFAULT_MAX_SETUP_CHAINS};
use crate::selection::{SelectionPolicy, TieBreak};
use crate::types::{ChainError, ConditionMatch, CounterScheme, LoadKey};

/// Backing store for the chain pool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// MongoDB collection (shared across instances)
    #[default]
    Mongo,
    /// Process-local map; the pool is lost on restart
    Memory,
}

/// chain-dispatch - exclusive chain assignment for sequential experiments
#[derive(Parser, Debug, Clone)]
#[command(name = "chain-dispatch")]
#[command(about = "Assigns exclusive-use chains to experiment participants")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Chain store backend
    #[arg(long, env = "STORE", value_enum, default_value_t = StoreBackend::Mongo)]
    pub store: StoreBackend,

    /// Enable development mode (falls back to the memory store if MongoDB is unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "chains")]
    pub mongodb_db: String,

    /// MongoDB collection holding the chain pool
    #[arg(long, env = "MONGODB_COLLECTION", default_value = CHAIN_COLLECTION)]
    pub mongodb_collection: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Load counters kept per chain
    #[arg(long, env = "COUNTER_SCHEME", value_enum, default_value_t = CounterScheme::WritesReads)]
    pub counter_scheme: CounterScheme,

    /// How condition keys match chain conditions
    #[arg(long, env = "CONDITION_MATCH", value_enum, default_value_t = ConditionMatch::Exact)]
    pub condition_match: ConditionMatch,

    /// Load metric minimized when selecting a chain
    #[arg(long, env = "LOAD_KEY", value_enum, default_value_t = LoadKey::Composite)]
    pub load_key: LoadKey,

    /// Tie-break among equally loaded chains
    #[arg(long, env = "TIE_BREAK", value_enum, default_value_t = TieBreak::Random)]
    pub tie_break: TieBreak,

    /// Selection rounds a claim gets when it loses races to other claimers
    #[arg(long, env = "CLAIM_ATTEMPTS", default_value_t = DEFAULT_CLAIM_ATTEMPTS)]
    pub claim_attempts: u32,

    /// Count a read when a claimed chain is released without a message
    #[arg(
        long,
        env = "COUNT_READ_ON_RELEASE",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub count_read_on_release: bool,

    /// Most chains a single setup request may create
    #[arg(long, env = "MAX_SETUP_CHAINS", default_value_t = DEFAULT_MAX_SETUP_CHAINS)]
    pub max_setup_chains: u64,

    /// Largest accepted request body in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 1024 * 1024)]
    pub max_body_bytes: usize,
}

impl Args {
    /// Selection policy from the configured switches
    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            condition_match: self.condition_match,
            load_key: self.load_key,
            tie_break: self.tie_break,
        }
    }

    /// Lifecycle switches from the configured values
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            scheme: self.counter_scheme,
            claim_attempts: self.claim_attempts,
            count_read_on_release: self.count_read_on_release,
            max_setup_chains: self.max_setup_chains,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.claim_attempts == 0 {
            return Err(ChainError::Config("CLAIM_ATTEMPTS must be at least 1".into()));
        }

        if self.max_setup_chains == 0 {
            return Err(ChainError::Config("MAX_SETUP_CHAINS must be at least 1".into()));
        }

        if self.max_body_bytes == 0 {
            return Err(ChainError::Config("MAX_BODY_BYTES must be at least 1".into()));
        }

        if self.mongodb_collection.trim().is_empty() {
            return Err(ChainError::Config("MONGODB_COLLECTION must not be empty".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["chain-dispatch"]);
        assert_eq!(args.store, StoreBackend::Mongo);
        assert_eq!(args.claim_attempts, DEFAULT_CLAIM_ATTEMPTS);
        assert!(args.count_read_on_release);
        assert_eq!(args.selection_policy(), SelectionPolicy::default());
        assert_eq!(args.lifecycle_config(), LifecycleConfig::default());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_single_counter_variant() {
        let args = Args::parse_from([
            "chain-dispatch",
            "--counter-scheme",
            "completions",
            "--tie-break",
            "first",
            "--condition-match",
            "prefix",
            "--count-read-on-release",
            "false",
        ]);
        assert_eq!(args.counter_scheme, CounterScheme::Completions);
        assert_eq!(args.tie_break, TieBreak::First);
        assert_eq!(args.condition_match, ConditionMatch::Prefix);
        assert!(!args.count_read_on_release);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let args = Args::parse_from(["chain-dispatch", "--claim-attempts", "0"]);
        assert!(matches!(args.validate(), Err(ChainError::Config(_))));
    }

    #[test]
    fn test_setup_limits() {
        let args = Args::parse_from(["chain-dispatch", "--max-setup-chains", "50"]);
        assert_eq!(args.lifecycle_config().max_setup_chains, 50);
        assert_eq!(args.max_body_bytes, 1024 * 1024);

        let args = Args::parse_from(["chain-dispatch", "--max-setup-chains", "0"]);
        assert!(matches!(args.validate(), Err(ChainError::Config(_))));
    }
}
