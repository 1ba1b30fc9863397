// SPDX-License-Identifier: MIT OR Apache-2.0

//! Explicit grants, the only persisted source of permissions.
use std::collections::HashMap;

use crate::entity::EntityId;
use crate::permission::PermissionSet;

/// Grant rows keyed by (principal, entity).
///
/// At most one row exists per pair. Granting merges into an existing row, revoking removes only
/// the named kinds and deletes the row once it is empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrantTable {
    rows: HashMap<(EntityId, EntityId), PermissionSet>,
}

impl GrantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant kinds to a principal on an entity. Returns `true` if the row changed.
    pub fn grant(&mut self, principal: EntityId, entity: EntityId, kinds: PermissionSet) -> bool {
        if kinds.is_empty() {
            return false;
        }

        let row = self.rows.entry((principal, entity)).or_default();
        let before = *row;
        *row = before | kinds;
        before != *row
    }

    /// Revoke kinds from a principal on an entity. Returns `true` if the row changed.
    pub fn revoke(&mut self, principal: EntityId, entity: EntityId, kinds: PermissionSet) -> bool {
        let Some(row) = self.rows.get_mut(&(principal, entity)) else {
            return false;
        };

        let before = *row;
        *row = before - kinds;
        let changed = before != *row;
        if row.is_empty() {
            self.rows.remove(&(principal, entity));
        }
        changed
    }

    /// Permissions granted to the principal on the entity.
    pub fn lookup(&self, principal: EntityId, entity: EntityId) -> PermissionSet {
        self.rows
            .get(&(principal, entity))
            .copied()
            .unwrap_or_default()
    }

    /// Remove all rows held by or granted on the given entity, returning the removed keys.
    pub fn remove_entity(&mut self, id: EntityId) -> Vec<(EntityId, EntityId)> {
        let removed: Vec<_> = self
            .rows
            .keys()
            .filter(|(principal, entity)| *principal == id || *entity == id)
            .copied()
            .collect();
        for key in &removed {
            self.rows.remove(key);
        }
        removed
    }

    /// All rows granted on the given entity.
    pub fn on_entity(&self, entity: EntityId) -> Vec<(EntityId, PermissionSet)> {
        let mut rows: Vec<_> = self
            .rows
            .iter()
            .filter(|((_, granted_on), _)| *granted_on == entity)
            .map(|((principal, _), kinds)| (*principal, *kinds))
            .collect();
        rows.sort_by_key(|(principal, _)| *principal);
        rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
