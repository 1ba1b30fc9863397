// SPDX-License-Identifier: MIT OR Apache-2.0

//! Permission-filtered projection of query results.
//!
//! Results are arbitrarily nested values. Entities the principal can not read are removed,
//! paths are kept or dropped as a whole, everything else passes through.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::entity::{EntityId, Principal};
use crate::error::AccessError;
use crate::permission::Permission;
use crate::resolver::AccessResolver;
use crate::traits::{AccessStore, GraphStore};

/// Scalar values carried in query results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

/// An alternating sequence of nodes and relationships, starting and ending with a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    elements: Vec<EntityId>,
}

impl Path {
    /// Path consisting of a single node.
    pub fn new(start: EntityId) -> Self {
        Self {
            elements: vec![start],
        }
    }

    /// Extend the path by one relationship and the node it leads to.
    pub fn then(mut self, relationship: EntityId, node: EntityId) -> Self {
        self.elements.push(relationship);
        self.elements.push(node);
        self
    }

    /// Build a path from alternating elements, `None` if they do not start and end with a node.
    pub fn from_elements(elements: Vec<EntityId>) -> Option<Self> {
        if elements.len() % 2 == 0 {
            return None;
        }
        Some(Self { elements })
    }

    pub fn elements(&self) -> &[EntityId] {
        &self.elements
    }

    pub fn nodes(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.elements.iter().step_by(2).copied()
    }

    pub fn relationships(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.elements.iter().skip(1).step_by(2).copied()
    }

    /// Number of relationships in this path.
    pub fn len(&self) -> usize {
        self.elements.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A query result value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Entity(EntityId),
    List(Vec<Value>),
    Path(Path),
    Map(BTreeMap<String, Value>),
    Primitive(Primitive),
}

impl Value {
    pub fn null() -> Self {
        Value::Primitive(Primitive::Null)
    }

    pub fn is_entity(&self) -> bool {
        matches!(self, Value::Entity(_))
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Value::Entity(id)
    }
}

impl From<Path> for Value {
    fn from(path: Path) -> Self {
        Value::Path(path)
    }
}

impl From<Primitive> for Value {
    fn from(primitive: Primitive) -> Self {
        Value::Primitive(primitive)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::List(values)
    }
}

/// Reduces query results to what a principal may read.
///
/// Visibility is decided by `Read` in the effective permissions of each entity. Values are never
/// mutated, a filtered copy is returned.
pub struct VisibilityFilter<'a, S> {
    resolver: AccessResolver<'a, S>,
}

impl<'a, S> VisibilityFilter<'a, S>
where
    S: AccessStore,
{
    pub fn new(resolver: AccessResolver<'a, S>) -> Self {
        Self { resolver }
    }

    /// Filter a value. Returns `None` if the value as a whole is not visible.
    ///
    /// - An invisible entity yields `None`
    /// - Lists drop their invisible elements and keep their order
    /// - Paths are kept only if every node and relationship on them is visible
    /// - Maps drop keys holding invisible entities and replace other values which filtered to
    ///   nothing with null
    /// - Primitives pass through
    pub fn filter(
        &self,
        principal: Principal,
        value: &Value,
    ) -> Result<Option<Value>, AccessError<<S as GraphStore>::Error>> {
        let filtered = match value {
            Value::Entity(id) => {
                if self.visible(principal, *id)? {
                    Some(Value::Entity(*id))
                } else {
                    trace!(%principal, entity = %id, "dropped invisible entity");
                    None
                }
            }
            Value::List(values) => {
                let mut list = Vec::with_capacity(values.len());
                for value in values {
                    if let Some(value) = self.filter(principal, value)? {
                        list.push(value);
                    }
                }
                Some(Value::List(list))
            }
            Value::Path(path) => {
                let mut visible = true;
                for id in path.elements() {
                    if !self.visible(principal, *id)? {
                        visible = false;
                        break;
                    }
                }
                if visible {
                    Some(Value::Path(path.clone()))
                } else {
                    trace!(%principal, "dropped partially invisible path");
                    None
                }
            }
            Value::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    match self.filter(principal, value)? {
                        Some(value) => {
                            map.insert(key.clone(), value);
                        }
                        None if value.is_entity() => (),
                        None => {
                            map.insert(key.clone(), Value::null());
                        }
                    }
                }
                Some(Value::Map(map))
            }
            Value::Primitive(primitive) => Some(Value::Primitive(primitive.clone())),
        };

        Ok(filtered)
    }

    fn visible(
        &self,
        principal: Principal,
        id: EntityId,
    ) -> Result<bool, AccessError<<S as GraphStore>::Error>> {
        self.resolver.is_allowed(principal, id, Permission::Read)
    }
}
