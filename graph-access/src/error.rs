// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

use crate::entity::{EntityId, Principal};
use crate::permission::Permission;

/// Errors returned from permission resolution and filtering.
///
/// `EntityNotFound` is distinct from an entity which exists but is not visible, the latter
/// resolves to an empty permission set. Callers outside the trust boundary are expected to
/// collapse both into one outcome.
#[derive(Debug, Error)]
pub enum AccessError<E> {
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),

    #[error("{principal} lacks {required} permission on entity {entity}")]
    Forbidden {
        principal: Principal,
        entity: EntityId,
        required: Permission,
    },

    #[error("store error: {0}")]
    Store(E),
}
