// SPDX-License-Identifier: MIT OR Apache-2.0

//! Changes which can alter effective permissions.
//!
//! Stores record one `Change` per mutation. The same changes are applied to the memo of the
//! running transaction right away and to the process-wide cache once the transaction commits.
//! A stale "visible" entry surviving a revoke would be a security defect, so every change
//! names all entities whose neighbourhood it touched.
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Change {
    /// A grant row of the principal on the entity was added, changed or removed.
    Grant {
        principal: EntityId,
        entity: EntityId,
    },

    /// An entity was created, deleted or had its owner, visibility or admin flag changed.
    Entity { id: EntityId },

    /// A relationship was created or deleted.
    Relationship {
        id: EntityId,
        source: EntityId,
        target: EntityId,
    },

    /// Propagation rules were changed.
    Rules,
}

impl Change {
    /// Returns `true` if every memoised result has to be dropped.
    pub fn affects_all(&self) -> bool {
        matches!(self, Change::Rules)
    }

    /// Entities touched by this change.
    ///
    /// Memo entries depending on any of them are invalidated. A grant only affects results
    /// derived from the entity it was granted on, those are already recorded as dependants of
    /// the entity, for every principal.
    pub fn touched(&self) -> Vec<EntityId> {
        match self {
            Change::Grant { entity, .. } => vec![*entity],
            Change::Entity { id } => vec![*id],
            Change::Relationship { id, source, target } => vec![*id, *source, *target],
            Change::Rules => Vec::new(),
        }
    }
}
