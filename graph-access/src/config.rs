// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration of permission resolution.
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// Default relationship type connecting a group (source) to its members (target).
pub const DEFAULT_MEMBERSHIP_RELATIONSHIP: &str = "CONTAINS";

/// Default bound on nested group membership.
pub const DEFAULT_MAX_GROUP_DEPTH: usize = 16;

/// Configuration parameters for the resolver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Maximum number of membership hops walked from a principal to its groups. Guards against
    /// cyclic group graphs.
    ///
    /// Default: 16.
    pub max_group_depth: usize,

    /// Relationship type along which group grants are inherited by members.
    ///
    /// Default: "CONTAINS".
    pub membership_relationship: String,

    /// Make relationships readable when both of their endpoints are readable.
    ///
    /// Default: true.
    pub relationship_visibility_from_endpoints: bool,

    /// Principals which are treated as administrators regardless of their node flags.
    pub superusers: BTreeSet<EntityId>,
}

impl AccessConfig {
    /// Return a default instance of `AccessConfig`.
    pub fn new() -> Self {
        Default::default()
    }

    pub fn max_group_depth(mut self, depth: usize) -> Self {
        self.max_group_depth = depth;
        self
    }

    pub fn membership_relationship(mut self, relationship: impl Into<String>) -> Self {
        self.membership_relationship = relationship.into();
        self
    }

    pub fn relationship_visibility_from_endpoints(mut self, enabled: bool) -> Self {
        self.relationship_visibility_from_endpoints = enabled;
        self
    }

    pub fn superuser(mut self, principal: EntityId) -> Self {
        self.superusers.insert(principal);
        self
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            max_group_depth: DEFAULT_MAX_GROUP_DEPTH,
            membership_relationship: DEFAULT_MEMBERSHIP_RELATIONSHIP.to_string(),
            relationship_visibility_from_endpoints: true,
            superusers: BTreeSet::new(),
        }
    }
}
