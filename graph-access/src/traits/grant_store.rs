// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use crate::entity::EntityId;
use crate::permission::PermissionSet;

/// Read access to explicit grants.
pub trait GrantStore {
    type Error: Error;

    /// Permissions explicitly granted to the principal on the entity, empty if there is no grant.
    fn grants(&self, principal: EntityId, entity: EntityId) -> Result<PermissionSet, Self::Error>;
}
