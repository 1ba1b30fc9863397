// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::Direction as EdgeDirection;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};

use crate::entity::{Direction, Entity, EntityId, Incident, RelationshipType};
use crate::grants::GrantTable;
use crate::invalidation::Change;
use crate::permission::PermissionSet;
use crate::rule::RuleSet;
use crate::store::StoreError;
use crate::traits::{GrantStore, GraphStore, RuleSource};

/// One consistent version of the graph, its grants and propagation rules.
///
/// Nodes and relationships live in a petgraph arena. Node weights are the entity ids of the
/// nodes, edge weights the entity ids of the relationships. Indices stay stable when entities are
/// removed, so both can be looked up through the id maps.
#[derive(Clone, Debug, Default)]
pub struct GraphSnapshot {
    version: u64,
    graph: StableDiGraph<EntityId, EntityId>,
    nodes: HashMap<EntityId, NodeIndex>,
    edges: HashMap<EntityId, EdgeIndex>,
    entities: HashMap<EntityId, Entity>,
    grants: GrantTable,
    rules: Arc<RuleSet>,
}

impl GraphSnapshot {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: Arc::new(rules),
            ..Default::default()
        }
    }

    /// Committed version this snapshot represents.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.edges.len()
    }

    pub fn grant_table(&self) -> &GrantTable {
        &self.grants
    }

    pub(crate) fn grants_mut(&mut self) -> &mut GrantTable {
        &mut self.grants
    }

    /// Rules are shared between snapshots until one of them changes them.
    pub(crate) fn rules_mut(&mut self) -> &mut RuleSet {
        Arc::make_mut(&mut self.rules)
    }

    pub(crate) fn entity_mut(&mut self, id: EntityId) -> Result<&mut Entity, StoreError> {
        self.entities
            .get_mut(&id)
            .ok_or(StoreError::EntityNotFound(id))
    }

    /// Look up an entity which is expected to be a node.
    pub(crate) fn require_node(&self, id: EntityId) -> Result<&Entity, StoreError> {
        let entity = self.entity(id).ok_or(StoreError::EntityNotFound(id))?;
        if !entity.is_node() {
            return Err(StoreError::NotANode(id));
        }
        Ok(entity)
    }

    pub(crate) fn insert_node(&mut self, entity: Entity) {
        let index = self.graph.add_node(entity.id);
        self.nodes.insert(entity.id, index);
        self.entities.insert(entity.id, entity);
    }

    /// Insert a relationship entity. Both endpoints must be existing nodes.
    pub(crate) fn insert_relationship(&mut self, entity: Entity) -> Result<(), StoreError> {
        let Some((source, target)) = entity.endpoints() else {
            return Err(StoreError::NotANode(entity.id));
        };
        self.require_node(source)?;
        self.require_node(target)?;

        let index = self
            .graph
            .add_edge(self.nodes[&source], self.nodes[&target], entity.id);
        self.edges.insert(entity.id, index);
        self.entities.insert(entity.id, entity);
        Ok(())
    }

    /// Remove an entity together with its grants and, for nodes, all incident relationships.
    ///
    /// Returns the changes this removal caused.
    pub(crate) fn remove_entity(&mut self, id: EntityId) -> Result<Vec<Change>, StoreError> {
        let entity = self
            .entities
            .get(&id)
            .cloned()
            .ok_or(StoreError::EntityNotFound(id))?;

        let mut changes = Vec::new();

        match entity.endpoints() {
            Some((source, target)) => {
                if let Some(index) = self.edges.remove(&id) {
                    self.graph.remove_edge(index);
                }
                changes.push(Change::Relationship { id, source, target });
            }
            None => {
                for relationship in self.incident_ids(id) {
                    changes.extend(self.remove_entity(relationship)?);
                }
                if let Some(index) = self.nodes.remove(&id) {
                    self.graph.remove_node(index);
                }
            }
        }

        changes.extend(
            self.grants
                .remove_entity(id)
                .into_iter()
                .map(|(principal, entity)| Change::Grant { principal, entity }),
        );
        self.entities.remove(&id);
        changes.push(Change::Entity { id });

        Ok(changes)
    }

    /// Ids of all relationships touching the node, ascending.
    fn incident_ids(&self, id: EntityId) -> Vec<EntityId> {
        let Some(index) = self.nodes.get(&id) else {
            return Vec::new();
        };

        let mut ids: Vec<EntityId> = [EdgeDirection::Outgoing, EdgeDirection::Incoming]
            .into_iter()
            .flat_map(|direction| self.graph.edges_directed(*index, direction))
            .map(|edge| *edge.weight())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn type_name(&self, id: EntityId) -> &str {
        self.entities
            .get(&id)
            .map(|entity| entity.type_name.as_str())
            .unwrap_or_default()
    }
}

impl GraphStore for GraphSnapshot {
    type Error = StoreError;

    fn get_entity(&self, id: EntityId) -> Result<Option<Entity>, Self::Error> {
        Ok(self.entities.get(&id).cloned())
    }

    fn incident_relationships(&self, id: EntityId) -> Result<Vec<Incident>, Self::Error> {
        let mut incidents = Vec::new();

        for relationship in self.incident_ids(id) {
            let entity = self
                .entities
                .get(&relationship)
                .ok_or(StoreError::EntityNotFound(relationship))?;
            let Some((source, target)) = entity.endpoints() else {
                continue;
            };

            let relationship_type = RelationshipType::new(
                entity.type_name.clone(),
                self.type_name(source),
                self.type_name(target),
            );

            // A self-loop is seen in both directions.
            if source == id {
                incidents.push(Incident {
                    relationship,
                    relationship_type: relationship_type.clone(),
                    direction: Direction::Outgoing,
                    other: target,
                });
            }
            if target == id {
                incidents.push(Incident {
                    relationship,
                    relationship_type,
                    direction: Direction::Incoming,
                    other: source,
                });
            }
        }

        Ok(incidents)
    }
}

impl GrantStore for GraphSnapshot {
    type Error = StoreError;

    fn grants(&self, principal: EntityId, entity: EntityId) -> Result<PermissionSet, Self::Error> {
        Ok(self.grants.lookup(principal, entity))
    }
}

impl RuleSource for GraphSnapshot {
    fn rules(&self) -> &RuleSet {
        &self.rules
    }
}
