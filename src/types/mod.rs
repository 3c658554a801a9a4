//! Shared types for chain dispatch

mod chain;
mod error;

pub use chain::{
    Chain, ChainId, ChainState, ConditionMatch, CounterScheme, Counters, LoadKey, NewChain,
    Purpose,
};
pub use error::{ChainError, Result};
