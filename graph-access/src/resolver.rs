// SPDX-License-Identifier: MIT OR Apache-2.0

//! Effective permission resolution.
//!
//! The effective permissions of a principal on an entity combine:
//!
//! 1. Grants held by the principal or, transitively, by the groups it is a member of
//! 2. Ownership and public / authenticated visibility flags of the entity
//! 3. Permissions propagated from the other endpoints of all incident relationships, as governed
//!    by the propagation rule of each relationship type
//!
//! Propagated kinds are collected over all relationships first: kinds with an `Add` mode are
//! unioned into the result, afterwards kinds with a `Remove` mode are subtracted. A `Remove` can
//! therefore never be undone by an `Add` of a sibling relationship.
//!
//! Resolution first discovers every entity the requested one transitively depends on and builds
//! a dependency graph of them. Strongly connected components of that graph, ie. propagation
//! cycles, are resolved as a whole by iterating until no permission changes anymore. Components
//! are evaluated dependencies first, so the result of an entity only depends on the graph and
//! never on the order in which entities were requested.
//!
//! Every resolved entity is memoised together with the set of entities its result was derived
//! from.
use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::prelude::DiGraphMap;
use tracing::{debug, trace, warn};

use crate::config::AccessConfig;
use crate::entity::{Entity, EntityId, Principal};
use crate::error::AccessError;
use crate::memo::{MemoEntry, MemoTable};
use crate::permission::{Permission, PermissionSet};
use crate::rule::{PropagationMode, PropagationRule};
use crate::traits::{AccessStore, GraphStore};

type Result<T, S> = std::result::Result<T, AccessError<<S as GraphStore>::Error>>;

/// Where an entity receives permissions from, besides its base permissions.
#[derive(Clone, Debug)]
enum Input {
    /// The other endpoint of an incident relationship whose rule admits propagation.
    Propagated { from: EntityId, rule: PropagationRule },

    /// Both endpoints of a relationship, which is readable if they are.
    Endpoints { source: EntityId, target: EntityId },
}

impl Input {
    fn dependencies(&self) -> Vec<EntityId> {
        match self {
            Input::Propagated { from, .. } => vec![*from],
            Input::Endpoints { source, target } => vec![*source, *target],
        }
    }
}

/// An entity discovered during resolution which is not memoised yet.
#[derive(Debug)]
struct Vertex {
    base: PermissionSet,
    inputs: Vec<Input>,

    /// Entities consulted for the base permissions, including the entity itself.
    consulted: HashSet<EntityId>,
}

impl Vertex {
    /// Combine base permissions with the permissions currently held by all inputs.
    fn combine(&self, held: &HashMap<EntityId, PermissionSet>) -> PermissionSet {
        let held_on = |id: &EntityId| held.get(id).copied().unwrap_or_default();

        let mut added = PermissionSet::empty();
        let mut removed = PermissionSet::empty();

        for input in &self.inputs {
            match input {
                Input::Propagated { from, rule } => {
                    for kind in held_on(from).kinds() {
                        match rule.mode(kind) {
                            PropagationMode::Add => added |= kind.flag(),
                            PropagationMode::Remove => removed |= kind.flag(),
                            PropagationMode::None => (),
                        }
                    }
                }
                Input::Endpoints { source, target } => {
                    if held_on(source).contains(PermissionSet::READ)
                        && held_on(target).contains(PermissionSet::READ)
                    {
                        added |= PermissionSet::READ;
                    }
                }
            }
        }

        (self.base | added) - removed
    }
}

/// Groups a user is transitively a member of.
///
/// Every group is reached over its shortest membership path. Membership edges which do not lead
/// one level deeper, ie. edges closing a cycle or joining groups of the same level, are ignored.
#[derive(Debug)]
struct GroupClosure {
    principal: EntityId,

    /// The principal and its groups, deepest first, each with the groups it inherits from.
    members: Vec<(EntityId, Vec<(EntityId, PropagationRule)>)>,
}

impl GroupClosure {
    fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.members.iter().map(|(id, _)| *id)
    }
}

/// Computes effective permissions from one consistent snapshot of a store.
pub struct AccessResolver<'a, S> {
    store: &'a S,
    memo: &'a MemoTable,
    config: &'a AccessConfig,
}

impl<'a, S> AccessResolver<'a, S>
where
    S: AccessStore,
{
    pub fn new(store: &'a S, memo: &'a MemoTable, config: &'a AccessConfig) -> Self {
        Self {
            store,
            memo,
            config,
        }
    }

    /// Effective permissions of the principal on the entity.
    ///
    /// Fails with `EntityNotFound` if the entity, or the node of the principal, does not exist.
    pub fn effective_permissions(
        &self,
        principal: Principal,
        entity: EntityId,
    ) -> Result<PermissionSet, S> {
        if self.is_superuser(principal)? {
            // Existence still matters to callers, even for administrators.
            self.entity(entity)?;
            return Ok(PermissionSet::all());
        }

        let permissions = match self.memo.get(principal, entity) {
            Some(entry) => entry.permissions,
            None => self.resolve(principal, entity)?,
        };

        debug!(
            %principal,
            %entity,
            %permissions,
            "resolved effective permissions"
        );
        Ok(permissions)
    }

    /// Returns `true` if the principal holds the given permission kind on the entity.
    pub fn is_allowed(
        &self,
        principal: Principal,
        entity: EntityId,
        kind: Permission,
    ) -> Result<bool, S> {
        Ok(self.effective_permissions(principal, entity)?.holds(kind))
    }

    /// Returns `true` if the entity is visible to the principal.
    pub fn is_visible(&self, principal: Principal, entity: EntityId) -> Result<bool, S> {
        self.is_allowed(principal, entity, Permission::Read)
    }

    /// Fail with `Forbidden` unless the principal holds the kind on the entity.
    pub fn require(
        &self,
        principal: Principal,
        entity: EntityId,
        kind: Permission,
    ) -> Result<(), S> {
        if self.is_allowed(principal, entity, kind)? {
            Ok(())
        } else {
            Err(AccessError::Forbidden {
                principal,
                entity,
                required: kind,
            })
        }
    }

    /// Returns `true` if the principal may create a relationship between the two nodes.
    ///
    /// Both endpoints need to allow linking, either through `Link` or `Write`.
    pub fn can_link(
        &self,
        principal: Principal,
        source: EntityId,
        target: EntityId,
    ) -> Result<bool, S> {
        Ok(self.effective_permissions(principal, source)?.allows_link()
            && self.effective_permissions(principal, target)?.allows_link())
    }

    /// Administrators bypass resolution: the `Superuser` principal, configured superusers and
    /// principals whose node carries the admin flag.
    pub fn is_superuser(&self, principal: Principal) -> Result<bool, S> {
        match principal {
            Principal::Superuser => Ok(true),
            Principal::Anonymous => Ok(false),
            Principal::User(id) => {
                if self.config.superusers.contains(&id) {
                    return Ok(true);
                }
                Ok(self.entity(id)?.admin)
            }
        }
    }

    fn entity(&self, id: EntityId) -> Result<Entity, S> {
        self.store
            .get_entity(id)
            .map_err(AccessError::Store)?
            .ok_or(AccessError::EntityNotFound(id))
    }

    fn resolve(&self, principal: Principal, root: EntityId) -> Result<PermissionSet, S> {
        // Values and dependencies of entities which are already resolved.
        let mut held: HashMap<EntityId, PermissionSet> = HashMap::new();
        let mut depends_on: HashMap<EntityId, HashSet<EntityId>> = HashMap::new();

        let mut vertices: HashMap<EntityId, Vertex> = HashMap::new();
        let mut graph: DiGraphMap<EntityId, ()> = DiGraphMap::new();

        let groups = principal
            .id()
            .map(|id| self.group_closure(id))
            .transpose()?;

        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if vertices.contains_key(&id) || held.contains_key(&id) {
                continue;
            }

            if let Some(entry) = self.memo.get(principal, id) {
                held.insert(id, entry.permissions);
                depends_on.insert(id, entry.depends_on);
                continue;
            }

            let vertex = self.vertex(principal, &self.entity(id)?, groups.as_ref())?;
            graph.add_node(id);
            for input in &vertex.inputs {
                for dependency in input.dependencies() {
                    graph.add_edge(id, dependency, ());
                    stack.push(dependency);
                }
            }
            vertices.insert(id, vertex);
        }

        // Memoised entities were added as edge targets only, they do not need evaluation.
        let components = tarjan_scc(&graph);
        trace!(
            %principal,
            entity = %root,
            entities = vertices.len(),
            components = components.len(),
            "built dependency graph"
        );

        // Dependencies come before their dependants.
        for mut component in components {
            component.retain(|id| vertices.contains_key(id));
            if component.is_empty() {
                continue;
            }
            component.sort();

            let cyclic = component.len() > 1 || graph.contains_edge(component[0], component[0]);
            if cyclic {
                self.evaluate_cycle(principal, &component, &vertices, &mut held);
            } else {
                let id = component[0];
                let permissions = vertices[&id].combine(&held);
                held.insert(id, permissions);
            }

            let mut dependencies = HashSet::new();
            for id in &component {
                let vertex = &vertices[id];
                dependencies.extend(vertex.consulted.iter().copied());
                for input in &vertex.inputs {
                    for dependency in input.dependencies() {
                        dependencies.insert(dependency);
                        if let Some(transitive) = depends_on.get(&dependency) {
                            dependencies.extend(transitive.iter().copied());
                        }
                    }
                }
            }

            for id in component {
                self.memo.insert(
                    principal,
                    id,
                    MemoEntry {
                        permissions: held[&id],
                        depends_on: dependencies.clone(),
                    },
                );
                depends_on.insert(id, dependencies.clone());
            }
        }

        Ok(held.get(&root).copied().unwrap_or_default())
    }

    /// Resolve a propagation cycle by iterating until the permissions of its members are stable.
    ///
    /// Iteration starts from the base permissions and updates all members at once per round.
    /// Cycles mixing `Add` and `Remove` can oscillate, kinds which still change after the last
    /// round fall back to what each member holds on its own.
    fn evaluate_cycle(
        &self,
        principal: Principal,
        component: &[EntityId],
        vertices: &HashMap<EntityId, Vertex>,
        held: &mut HashMap<EntityId, PermissionSet>,
    ) {
        for id in component {
            held.insert(*id, vertices[id].base);
        }

        // Without oscillation every round adds at least one kind to one member.
        let max_rounds = component.len() * Permission::ALL.len() + 1;

        for round in 0..max_rounds {
            let next: Vec<_> = component
                .iter()
                .map(|id| (*id, vertices[id].combine(held)))
                .collect();

            let stable = next.iter().all(|(id, permissions)| held[id] == *permissions);
            if stable {
                trace!(%principal, members = component.len(), rounds = round + 1, "resolved cycle");
                return;
            }

            for (id, permissions) in next {
                held.insert(id, permissions);
            }
        }

        warn!(
            %principal,
            members = component.len(),
            "propagation cycle does not stabilise, keeping base of changing permissions"
        );
        let next: Vec<_> = component
            .iter()
            .map(|id| (*id, vertices[id].combine(held)))
            .collect();
        for (id, permissions) in next {
            let last = held[&id];
            let changing = last.symmetric_difference(permissions);
            let base = vertices[&id].base;
            held.insert(id, (last - changing) | (base & changing));
        }
    }

    /// Collect base permissions and propagation inputs of an entity.
    fn vertex(
        &self,
        principal: Principal,
        entity: &Entity,
        groups: Option<&GroupClosure>,
    ) -> Result<Vertex, S> {
        let mut consulted = HashSet::from([entity.id]);
        let base = self.base_permissions(principal, entity, groups, &mut consulted)?;
        let mut inputs = Vec::new();

        if self.config.relationship_visibility_from_endpoints && !base.holds(Permission::Read) {
            if let Some((source, target)) = entity.endpoints() {
                inputs.push(Input::Endpoints { source, target });
            }
        }

        let mut incidents = self
            .store
            .incident_relationships(entity.id)
            .map_err(AccessError::Store)?;
        incidents.sort_by_key(|incident| (incident.relationship, incident.other));

        let rules = self.store.rules();
        for incident in incidents {
            let rule = rules.rule_for(&incident.relationship_type);
            if rule.propagates(incident.direction) {
                inputs.push(Input::Propagated {
                    from: incident.other,
                    rule,
                });
            }
        }

        Ok(Vertex {
            base,
            inputs,
            consulted,
        })
    }

    /// Permissions of the principal on the entity before propagation.
    fn base_permissions(
        &self,
        principal: Principal,
        entity: &Entity,
        groups: Option<&GroupClosure>,
        consulted: &mut HashSet<EntityId>,
    ) -> Result<PermissionSet, S> {
        let mut permissions = PermissionSet::empty();

        match principal {
            Principal::Superuser => return Ok(PermissionSet::all()),
            Principal::Anonymous => {
                if entity.visibility.public {
                    permissions |= PermissionSet::READ;
                }
            }
            Principal::User(id) => {
                consulted.insert(id);

                if entity.owner == Some(id) {
                    return Ok(PermissionSet::all());
                }

                if entity.visibility.public || entity.visibility.authenticated {
                    permissions |= PermissionSet::READ;
                }

                match groups {
                    Some(groups) => {
                        consulted.extend(groups.ids());
                        permissions |= self.principal_grants(groups, entity.id)?;
                    }
                    None => {
                        permissions |= self
                            .store
                            .grants(id, entity.id)
                            .map_err(AccessError::Store)?;
                    }
                }
            }
        }

        Ok(permissions)
    }

    /// Collect the groups a user is transitively a member of.
    ///
    /// Groups are reached over the configured membership relationship and governed by its
    /// propagation rule like any other relationship type. Every group is visited once.
    fn group_closure(&self, principal: EntityId) -> Result<GroupClosure, S> {
        let rules = self.store.rules();

        let mut depths = HashMap::from([(principal, 0)]);
        let mut order = vec![principal];
        let mut parents: HashMap<EntityId, Vec<(EntityId, PropagationRule)>> = HashMap::new();
        let mut queue = VecDeque::from([principal]);

        while let Some(member) = queue.pop_front() {
            let depth = depths[&member];

            let mut incidents: Vec<_> = self
                .store
                .incident_relationships(member)
                .map_err(AccessError::Store)?
                .into_iter()
                .filter(|incident| {
                    incident.relationship_type.name == self.config.membership_relationship
                })
                .map(|incident| {
                    let rule = rules.rule_for(&incident.relationship_type);
                    (incident, rule)
                })
                .filter(|(incident, rule)| rule.propagates(incident.direction))
                .collect();

            if incidents.is_empty() {
                continue;
            }

            if depth >= self.config.max_group_depth {
                warn!(
                    principal = %member,
                    depth,
                    "maximum group depth reached, ignoring further memberships"
                );
                continue;
            }

            incidents.sort_by_key(|(incident, _)| (incident.relationship, incident.other));

            for (incident, rule) in incidents {
                let group = incident.other;
                let group_depth = match depths.get(&group) {
                    Some(group_depth) => *group_depth,
                    None => {
                        depths.insert(group, depth + 1);
                        order.push(group);
                        queue.push_back(group);
                        depth + 1
                    }
                };

                if group_depth > depth {
                    parents.entry(member).or_default().push((group, rule));
                } else {
                    trace!(
                        principal = %member,
                        %group,
                        "ignored membership of equal or lower depth"
                    );
                }
            }
        }

        let members = order
            .into_iter()
            .rev()
            .map(|id| {
                let groups = parents.remove(&id).unwrap_or_default();
                (id, groups)
            })
            .collect();

        Ok(GroupClosure { principal, members })
    }

    /// Grants held by a user on an entity, including those inherited from its groups.
    fn principal_grants(
        &self,
        groups: &GroupClosure,
        entity: EntityId,
    ) -> Result<PermissionSet, S> {
        let mut held: HashMap<EntityId, PermissionSet> = HashMap::new();

        // Groups inherit only from deeper groups, which come first.
        for (member, inherits_from) in &groups.members {
            let granted = self
                .store
                .grants(*member, entity)
                .map_err(AccessError::Store)?;

            let mut added = PermissionSet::empty();
            let mut removed = PermissionSet::empty();
            for (group, rule) in inherits_from {
                let inherited = held.get(group).copied().unwrap_or_default();
                for kind in inherited.kinds() {
                    match rule.mode(kind) {
                        PropagationMode::Add => added |= kind.flag(),
                        PropagationMode::Remove => removed |= kind.flag(),
                        PropagationMode::None => (),
                    }
                }
            }

            held.insert(*member, (granted | added) - removed);
        }

        Ok(held.get(&groups.principal).copied().unwrap_or_default())
    }
}
