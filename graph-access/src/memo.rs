// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memoised effective permissions.
//!
//! Every entry remembers the ids of all entities its permission set was derived from, so that a
//! change to any of them can invalidate exactly the entries which could have changed. Memo entries
//! are never authoritative, they are dropped whenever in doubt.
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::entity::{EntityId, Principal};
use crate::invalidation::Change;
use crate::permission::PermissionSet;

pub(crate) type MemoKey = (Principal, EntityId);

/// A memoised effective permission set and the entities it depends on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoEntry {
    pub permissions: PermissionSet,
    pub depends_on: HashSet<EntityId>,
}

/// Memo entries with a reverse index from entity to dependent entries.
#[derive(Clone, Debug, Default)]
pub struct MemoEntries {
    entries: HashMap<MemoKey, MemoEntry>,
    dependents: HashMap<EntityId, HashSet<MemoKey>>,
}

impl MemoEntries {
    pub fn get(&self, principal: Principal, entity: EntityId) -> Option<&MemoEntry> {
        self.entries.get(&(principal, entity))
    }

    pub fn insert(&mut self, principal: Principal, entity: EntityId, entry: MemoEntry) {
        let key = (principal, entity);
        self.remove(&key);
        for dependency in &entry.depends_on {
            self.dependents.entry(*dependency).or_default().insert(key);
        }
        self.entries.insert(key, entry);
    }

    fn remove(&mut self, key: &MemoKey) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        for dependency in &entry.depends_on {
            if let Some(keys) = self.dependents.get_mut(dependency) {
                keys.remove(key);
                if keys.is_empty() {
                    self.dependents.remove(dependency);
                }
            }
        }
        true
    }

    /// Drop every entry derived from the given entity. Returns the number of dropped entries.
    pub fn invalidate_entity(&mut self, id: EntityId) -> usize {
        let Some(keys) = self.dependents.remove(&id) else {
            return 0;
        };
        keys.iter().filter(|key| self.remove(key)).count()
    }

    /// Drop all entries which could be affected by the change.
    pub fn apply(&mut self, change: &Change) -> usize {
        if change.affects_all() {
            let dropped = self.len();
            self.clear();
            return dropped;
        }

        change
            .touched()
            .into_iter()
            .map(|id| self.invalidate_entity(id))
            .sum()
    }

    /// Move all entries of `other` into this table.
    pub fn merge(&mut self, other: MemoEntries) {
        for ((principal, entity), entry) in other.entries {
            self.insert(principal, entity, entry);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dependents.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    version: u64,
    entries: MemoEntries,
}

/// Process-wide cache of effective permissions for the latest committed version.
///
/// The cache is cheap to clone and can be shared across threads. Entries are only served to
/// transactions reading the exact version the cache is in sync with.
#[derive(Clone, Debug, Default)]
pub struct PermissionCache {
    inner: Arc<RwLock<CacheInner>>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, CacheInner> {
        self.inner
            .read()
            .expect("acquire shared read access on permission cache")
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, CacheInner> {
        self.inner
            .write()
            .expect("acquire exclusive write access on permission cache")
    }

    /// Committed version the cache entries are valid for.
    pub fn version(&self) -> u64 {
        self.read_cache().version
    }

    pub fn get(&self, version: u64, principal: Principal, entity: EntityId) -> Option<MemoEntry> {
        let cache = self.read_cache();
        if cache.version != version {
            return None;
        }
        cache.entries.get(principal, entity).cloned()
    }

    /// Keep entries computed by a read-only transaction, if the cache did not move on since.
    pub fn promote(&self, version: u64, entries: MemoEntries) {
        let mut cache = self.write_cache();
        if cache.version == version {
            cache.entries.merge(entries);
        }
    }

    /// Apply the changes of a committed transaction and move on to its version.
    ///
    /// `entries` were computed against the committed state and are kept afterwards.
    pub fn commit(&self, changes: &[Change], version: u64, entries: MemoEntries) {
        let mut cache = self.write_cache();
        let dropped: usize = changes.iter().map(|change| cache.entries.apply(change)).sum();
        trace!(version, dropped, "invalidated permission cache");
        cache.version = version;
        cache.entries.merge(entries);
    }

    pub fn len(&self) -> usize {
        self.read_cache().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transaction-scoped memo table.
///
/// Entries written here are only visible within the transaction and are discarded on rollback.
/// The shared cache is consulted while the transaction has not written anything.
#[derive(Debug)]
pub struct MemoTable {
    local: RefCell<MemoEntries>,
    shared: Option<(PermissionCache, u64)>,
    dirty: Cell<bool>,
}

impl MemoTable {
    /// Memo table without a shared cache.
    pub fn new() -> Self {
        Self {
            local: RefCell::new(MemoEntries::default()),
            shared: None,
            dirty: Cell::new(false),
        }
    }

    /// Memo table backed by a shared cache for the given committed version.
    pub fn with_cache(cache: PermissionCache, version: u64) -> Self {
        Self {
            local: RefCell::new(MemoEntries::default()),
            shared: Some((cache, version)),
            dirty: Cell::new(false),
        }
    }

    pub fn get(&self, principal: Principal, entity: EntityId) -> Option<MemoEntry> {
        if let Some(entry) = self.local.borrow().get(principal, entity) {
            return Some(entry.clone());
        }

        if self.dirty.get() {
            return None;
        }

        self.shared
            .as_ref()
            .and_then(|(cache, version)| cache.get(*version, principal, entity))
    }

    pub fn insert(&self, principal: Principal, entity: EntityId, entry: MemoEntry) {
        self.local.borrow_mut().insert(principal, entity, entry);
    }

    /// Invalidate entries affected by a write of this transaction.
    ///
    /// From here on the shared cache is bypassed, as it reflects the state before the write.
    pub fn invalidate(&self, change: &Change) -> usize {
        self.dirty.set(true);
        self.local.borrow_mut().apply(change)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub fn len(&self) -> usize {
        self.local.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_entries(self) -> MemoEntries {
        self.local.into_inner()
    }
}

impl Default for MemoTable {
    fn default() -> Self {
        Self::new()
    }
}
