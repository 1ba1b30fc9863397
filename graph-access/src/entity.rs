// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entities of the property graph and the principals acting on them.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Stable identifier of a node or relationship.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Whether an entity is a node or a relationship between two nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Node,
    Relationship { source: EntityId, target: EntityId },
}

/// Visibility flags which make an entity readable without a grant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visibility {
    /// Readable by everyone, including anonymous principals.
    pub public: bool,

    /// Readable by every principal which is not anonymous.
    pub authenticated: bool,
}

impl Visibility {
    pub fn public() -> Self {
        Self {
            public: true,
            authenticated: false,
        }
    }

    pub fn authenticated() -> Self {
        Self {
            public: false,
            authenticated: true,
        }
    }
}

/// A node or relationship in the graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,

    /// Declared type, for example "Document" or "CONTAINS".
    pub type_name: String,

    pub kind: EntityKind,

    /// Principal owning this entity, holding every permission on it.
    pub owner: Option<EntityId>,

    pub visibility: Visibility,

    /// Marks a principal node as administrator. Administrators bypass all permission checks.
    pub admin: bool,
}

impl Entity {
    pub fn node(id: EntityId, type_name: impl Into<String>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            kind: EntityKind::Node,
            owner: None,
            visibility: Visibility::default(),
            admin: false,
        }
    }

    pub fn relationship(
        id: EntityId,
        type_name: impl Into<String>,
        source: EntityId,
        target: EntityId,
    ) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            kind: EntityKind::Relationship { source, target },
            owner: None,
            visibility: Visibility::default(),
            admin: false,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self.kind, EntityKind::Node)
    }

    /// Source and target of a relationship, `None` for nodes.
    pub fn endpoints(&self) -> Option<(EntityId, EntityId)> {
        match self.kind {
            EntityKind::Node => None,
            EntityKind::Relationship { source, target } => Some((source, target)),
        }
    }
}

/// The identity on whose behalf permissions are resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Principal {
    /// Unauthenticated access, only public entities are visible.
    Anonymous,

    /// An authenticated user or group, represented by a node in the graph.
    User(EntityId),

    /// Administrative access, everything is allowed.
    Superuser,
}

impl Principal {
    /// Node id of this principal, if it is represented in the graph.
    pub fn id(&self) -> Option<EntityId> {
        match self {
            Principal::User(id) => Some(*id),
            Principal::Anonymous | Principal::Superuser => None,
        }
    }
}

impl Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Principal::Anonymous => write!(f, "anonymous"),
            Principal::User(id) => write!(f, "user {}", id),
            Principal::Superuser => write!(f, "superuser"),
        }
    }
}

impl From<EntityId> for Principal {
    fn from(id: EntityId) -> Self {
        Principal::User(id)
    }
}

/// Direction of a relationship as seen from one of its endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// The entity is the source of the relationship.
    Outgoing,

    /// The entity is the target of the relationship.
    Incoming,
}

/// Schema-level type of a relationship: its name plus the types of the nodes it connects.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationshipType {
    pub name: String,
    pub source_type: String,
    pub target_type: String,
}

impl RelationshipType {
    pub fn new(
        name: impl Into<String>,
        source_type: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            target_type: target_type.into(),
        }
    }
}

impl Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({})-[{}]->({})",
            self.source_type, self.name, self.target_type
        )
    }
}

/// A relationship touching an entity, as returned by the graph store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Incident {
    /// Id of the relationship itself.
    pub relationship: EntityId,

    pub relationship_type: RelationshipType,

    /// Direction of the relationship relative to the entity it was looked up for.
    pub direction: Direction,

    /// The endpoint which is not the entity it was looked up for.
    pub other: EntityId,
}
