// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::config::AccessConfig;
use crate::entity::{Entity, EntityId, Principal, RelationshipType, Visibility};
use crate::error::AccessError;
use crate::filter::{Value, VisibilityFilter};
use crate::invalidation::Change;
use crate::memo::{MemoTable, PermissionCache};
use crate::permission::{Permission, PermissionSet};
use crate::resolver::AccessResolver;
use crate::rule::{PropagationRule, RuleDeclaration, RuleSet};
use crate::store::{GraphSnapshot, StoreError};
use crate::traits::RuleSource;

/// An in-memory, transactional graph store.
///
/// `MemoryStore` can be cloned and shared across threads, all clones refer to the same committed
/// state and permission cache.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<RwLock<Arc<GraphSnapshot>>>,
    cache: PermissionCache,
    next_id: Arc<AtomicU64>,
    config: Arc<AccessConfig>,
}

impl MemoryStore {
    /// Create an empty store with default configuration.
    pub fn new() -> Self {
        Self::with_config(AccessConfig::default())
    }

    /// Create an empty store. Its rule set starts out with the membership rule of the configured
    /// membership relationship.
    pub fn with_config(config: AccessConfig) -> Self {
        let rules = RuleSet::with_membership(&config.membership_relationship);
        Self {
            inner: Arc::new(RwLock::new(Arc::new(GraphSnapshot::new(rules)))),
            cache: PermissionCache::new(),
            next_id: Arc::new(AtomicU64::new(1)),
            config: Arc::new(config),
        }
    }

    /// Obtain a read-lock on the committed snapshot.
    fn read_store(&self) -> RwLockReadGuard<'_, Arc<GraphSnapshot>> {
        self.inner
            .read()
            .expect("acquire shared read access on store")
    }

    /// Obtain a write-lock on the committed snapshot.
    fn write_store(&self) -> RwLockWriteGuard<'_, Arc<GraphSnapshot>> {
        self.inner
            .write()
            .expect("acquire exclusive write access on store")
    }

    /// Start a transaction on the latest committed version.
    pub fn begin(&self) -> Transaction {
        let base = self.read_store().clone();
        let memo = MemoTable::with_cache(self.cache.clone(), base.version());
        Transaction {
            store: self.clone(),
            base,
            working: None,
            changes: Vec::new(),
            memo,
        }
    }

    /// Latest committed version.
    pub fn version(&self) -> u64 {
        self.read_store().version()
    }

    pub fn cache(&self) -> &PermissionCache {
        &self.cache
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    fn next_id(&self) -> EntityId {
        EntityId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of work on a `MemoryStore`.
///
/// Reads see the snapshot the transaction started on plus its own writes. Writes are published
/// by `commit`, which fails if another transaction committed in the meantime. Dropping a
/// transaction without committing discards all of its writes.
#[derive(Debug)]
pub struct Transaction {
    store: MemoryStore,
    base: Arc<GraphSnapshot>,
    working: Option<GraphSnapshot>,
    changes: Vec<Change>,
    memo: MemoTable,
}

impl Transaction {
    /// The snapshot reads of this transaction are served from.
    pub fn snapshot(&self) -> &GraphSnapshot {
        self.working.as_ref().unwrap_or(self.base.as_ref())
    }

    /// Committed version this transaction started on.
    pub fn base_version(&self) -> u64 {
        self.base.version()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    fn working(&mut self) -> &mut GraphSnapshot {
        let base = &self.base;
        self.working.get_or_insert_with(|| GraphSnapshot::clone(base))
    }

    fn record(&mut self, changes: impl IntoIterator<Item = Change>) {
        for change in changes {
            let dropped = self.memo.invalidate(&change);
            if dropped > 0 {
                debug!(?change, dropped, "invalidated memoised permissions");
            }
            self.changes.push(change);
        }
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.snapshot().entity(id)
    }

    /// Create a node of the given type.
    pub fn create_node(&mut self, type_name: &str) -> EntityId {
        let id = self.store.next_id();
        self.working().insert_node(Entity::node(id, type_name));
        self.record([Change::Entity { id }]);
        id
    }

    /// Create a relationship between two existing nodes.
    pub fn create_relationship(
        &mut self,
        type_name: &str,
        source: EntityId,
        target: EntityId,
    ) -> Result<EntityId, StoreError> {
        self.snapshot().require_node(source)?;
        self.snapshot().require_node(target)?;

        let id = self.store.next_id();
        self.working()
            .insert_relationship(Entity::relationship(id, type_name, source, target))?;
        self.record([Change::Relationship { id, source, target }]);
        Ok(id)
    }

    /// Make `member` a member of `group` through the configured membership relationship.
    pub fn add_member(
        &mut self,
        group: EntityId,
        member: EntityId,
    ) -> Result<EntityId, StoreError> {
        let membership = self.store.config().membership_relationship.clone();
        self.create_relationship(&membership, group, member)
    }

    /// Delete a node or relationship. Deleting a node deletes its relationships as well.
    pub fn delete_entity(&mut self, id: EntityId) -> Result<(), StoreError> {
        if !self.snapshot().contains(id) {
            return Err(StoreError::EntityNotFound(id));
        }
        let changes = self.working().remove_entity(id)?;
        self.record(changes);
        Ok(())
    }

    pub fn set_owner(&mut self, id: EntityId, owner: Option<EntityId>) -> Result<(), StoreError> {
        if let Some(owner) = owner {
            self.require_principal(owner)?;
        }
        self.update_entity(id, |entity| entity.owner = owner)
    }

    pub fn set_visibility(
        &mut self,
        id: EntityId,
        visibility: Visibility,
    ) -> Result<(), StoreError> {
        self.update_entity(id, |entity| entity.visibility = visibility)
    }

    /// Flag a principal node as administrator.
    pub fn set_admin(&mut self, id: EntityId, admin: bool) -> Result<(), StoreError> {
        self.require_principal(id)?;
        self.update_entity(id, |entity| entity.admin = admin)
    }

    fn update_entity(
        &mut self,
        id: EntityId,
        update: impl FnOnce(&mut Entity),
    ) -> Result<(), StoreError> {
        if !self.snapshot().contains(id) {
            return Err(StoreError::EntityNotFound(id));
        }
        update(self.working().entity_mut(id)?);
        self.record([Change::Entity { id }]);
        Ok(())
    }

    fn require_principal(&self, id: EntityId) -> Result<(), StoreError> {
        match self.snapshot().require_node(id) {
            Ok(_) => Ok(()),
            Err(StoreError::NotANode(id)) => Err(StoreError::NotAPrincipal(id)),
            Err(err) => Err(err),
        }
    }

    /// Grant permission kinds to a principal on an entity.
    pub fn grant(
        &mut self,
        principal: EntityId,
        entity: EntityId,
        kinds: impl Into<PermissionSet>,
    ) -> Result<(), StoreError> {
        let kinds = kinds.into();
        self.require_principal(principal)?;
        if !self.snapshot().contains(entity) {
            return Err(StoreError::EntityNotFound(entity));
        }
        if self.snapshot().grant_table().lookup(principal, entity).contains(kinds) {
            return Ok(());
        }

        self.working().grants_mut().grant(principal, entity, kinds);
        debug!(%principal, %entity, %kinds, "granted permissions");
        self.record([Change::Grant { principal, entity }]);
        Ok(())
    }

    /// Revoke permission kinds from a principal on an entity. Other kinds stay untouched.
    pub fn revoke(
        &mut self,
        principal: EntityId,
        entity: EntityId,
        kinds: impl Into<PermissionSet>,
    ) -> Result<(), StoreError> {
        let kinds = kinds.into();
        self.require_principal(principal)?;
        if !self.snapshot().contains(entity) {
            return Err(StoreError::EntityNotFound(entity));
        }
        let held = self.snapshot().grant_table().lookup(principal, entity);
        if !held.intersects(kinds) {
            return Ok(());
        }

        self.working().grants_mut().revoke(principal, entity, kinds);
        debug!(%principal, %entity, %kinds, "revoked permissions");
        self.record([Change::Grant { principal, entity }]);
        Ok(())
    }

    /// Grant on behalf of `actor`, who needs `AccessControl` on the entity.
    pub fn grant_as(
        &mut self,
        actor: Principal,
        principal: EntityId,
        entity: EntityId,
        kinds: impl Into<PermissionSet>,
    ) -> Result<(), AccessError<StoreError>> {
        self.resolver()
            .require(actor, entity, Permission::AccessControl)?;
        self.grant(principal, entity, kinds)
            .map_err(AccessError::Store)
    }

    /// Revoke on behalf of `actor`, who needs `AccessControl` on the entity.
    pub fn revoke_as(
        &mut self,
        actor: Principal,
        principal: EntityId,
        entity: EntityId,
        kinds: impl Into<PermissionSet>,
    ) -> Result<(), AccessError<StoreError>> {
        self.resolver()
            .require(actor, entity, Permission::AccessControl)?;
        self.revoke(principal, entity, kinds)
            .map_err(AccessError::Store)
    }

    /// Declare the propagation rule of every relationship with the given name.
    pub fn declare_rule(&mut self, relationship: &str, rule: PropagationRule) {
        self.working().rules_mut().declare(relationship, rule);
        self.record([Change::Rules]);
    }

    /// Declare the propagation rule of a relationship between two specific node types.
    pub fn declare_rule_between(
        &mut self,
        relationship_type: RelationshipType,
        rule: PropagationRule,
    ) {
        self.working()
            .rules_mut()
            .declare_between(relationship_type, rule);
        self.record([Change::Rules]);
    }

    /// Remove all rules of a relationship name. Returns `true` if any rule was removed.
    pub fn remove_rule(&mut self, relationship: &str) -> bool {
        let removed = self.working().rules_mut().remove(relationship);
        if removed {
            self.record([Change::Rules]);
        }
        removed
    }

    /// Load rule declarations. Nothing is changed if any declaration is invalid.
    pub fn load_rules(&mut self, declarations: &[RuleDeclaration]) -> Result<(), StoreError> {
        let mut rules = self.snapshot().rules().clone();
        rules.extend(declarations)?;
        *self.working().rules_mut() = rules;
        self.record([Change::Rules]);
        Ok(())
    }

    /// Resolver reading from this transaction.
    pub fn resolver(&self) -> AccessResolver<'_, GraphSnapshot> {
        AccessResolver::new(self.snapshot(), &self.memo, self.store.config())
    }

    pub fn effective_permissions(
        &self,
        principal: Principal,
        entity: EntityId,
    ) -> Result<PermissionSet, AccessError<StoreError>> {
        self.resolver().effective_permissions(principal, entity)
    }

    pub fn is_allowed(
        &self,
        principal: Principal,
        entity: EntityId,
        kind: Permission,
    ) -> Result<bool, AccessError<StoreError>> {
        self.resolver().is_allowed(principal, entity, kind)
    }

    pub fn can_link(
        &self,
        principal: Principal,
        source: EntityId,
        target: EntityId,
    ) -> Result<bool, AccessError<StoreError>> {
        self.resolver().can_link(principal, source, target)
    }

    /// Reduce a query result to what the principal may read.
    pub fn filter_result(
        &self,
        principal: Principal,
        value: &Value,
    ) -> Result<Option<Value>, AccessError<StoreError>> {
        VisibilityFilter::new(self.resolver()).filter(principal, value)
    }

    /// Publish all writes of this transaction and return the new committed version.
    ///
    /// Transactions without writes always succeed and hand their memoised permissions over to
    /// the shared cache.
    pub fn commit(self) -> Result<u64, StoreError> {
        let Transaction {
            store,
            base,
            working,
            changes,
            memo,
        } = self;

        let Some(mut working) = working.filter(|_| !changes.is_empty()) else {
            store.cache.promote(base.version(), memo.into_entries());
            return Ok(base.version());
        };

        let mut committed = store.write_store();
        if committed.version() != base.version() {
            return Err(StoreError::ConcurrentModification {
                base: base.version(),
                current: committed.version(),
            });
        }

        let version = base.version() + 1;
        working.set_version(version);
        *committed = Arc::new(working);

        // Invalidate while still holding the lock, no reader may see the new version together
        // with stale cache entries.
        store.cache.commit(&changes, version, memo.into_entries());
        debug!(version, changes = changes.len(), "committed transaction");

        Ok(version)
    }

    /// Discard all writes and memoised permissions of this transaction.
    pub fn rollback(self) {
        debug!(
            base = self.base.version(),
            changes = self.changes.len(),
            "rolled back transaction"
        );
    }
}
