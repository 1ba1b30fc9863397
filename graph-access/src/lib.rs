// SPDX-License-Identifier: MIT OR Apache-2.0

//! Permission propagation and visibility filtering over property graphs.
//!
//! Effective permissions of a principal on a node or relationship combine explicit grants with
//! permissions propagated along relationship types, as declared by per-type propagation rules.
//! Query results are filtered down to what the principal may read.
//!
//! The resolver reads from any store implementing the traits in [`traits`]. An in-memory
//! transactional store is provided in [`store`].
pub mod config;
pub mod entity;
mod error;
pub mod filter;
pub mod grants;
pub mod invalidation;
pub mod memo;
pub mod permission;
pub mod resolver;
pub mod rule;
pub mod store;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
#[cfg(test)]
mod tests;
pub mod traits;

pub use config::AccessConfig;
pub use entity::{Direction, Entity, EntityId, EntityKind, Principal, RelationshipType, Visibility};
pub use error::AccessError;
pub use filter::{Path, Primitive, Value, VisibilityFilter};
pub use permission::{Permission, PermissionSet};
pub use resolver::AccessResolver;
pub use rule::{
    PropagationDirection, PropagationMode, PropagationRule, RuleDeclaration, RuleError, RuleSet,
};
pub use store::{MemoryStore, StoreError, Transaction};
