// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use crate::entity::{Entity, EntityId, Incident};

/// Read access to nodes and relationships of the graph.
///
/// All reads are expected to come from one transactional snapshot.
pub trait GraphStore {
    type Error: Error;

    /// Get an entity by its id, `None` if it does not exist.
    fn get_entity(&self, id: EntityId) -> Result<Option<Entity>, Self::Error>;

    /// All relationships touching the given node, in any direction.
    ///
    /// Relationship entities have no incident relationships.
    fn incident_relationships(&self, id: EntityId) -> Result<Vec<Incident>, Self::Error>;
}
