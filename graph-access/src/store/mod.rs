// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transactional in-memory graph store.
//!
//! `MemoryStore` holds the latest committed `GraphSnapshot` and the process-wide permission
//! cache. Work happens in a `Transaction`, which reads from the snapshot it was started on and
//! its own writes, and publishes them atomically on commit.
mod memory;
mod snapshot;

use thiserror::Error;

use crate::entity::EntityId;
use crate::rule::RuleError;

pub use memory::{MemoryStore, Transaction};
pub use snapshot::GraphSnapshot;

/// Errors raised by the in-memory store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),

    #[error("entity {0} is not a node")]
    NotANode(EntityId),

    #[error("entity {0} can not act as a principal")]
    NotAPrincipal(EntityId),

    #[error("store moved from version {base} to {current} since the transaction started")]
    ConcurrentModification { base: u64, current: u64 },

    #[error(transparent)]
    Rule(#[from] RuleError),
}
