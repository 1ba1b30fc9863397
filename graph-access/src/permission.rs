// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::rule::RuleError;

/// The permission kinds which can be granted to a principal on an entity.
///
/// Kinds are independent of each other: holding `Write` does not imply holding `Read`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Permission to see an entity, for example in query results.
    Read,

    /// Permission to change the properties of an entity.
    Write,

    /// Permission to delete an entity.
    Delete,

    /// Permission to grant and revoke permissions on an entity.
    AccessControl,

    /// Permission to create relationships to or from an entity.
    Link,
}

impl Permission {
    /// All permission kinds, in bit order.
    pub const ALL: [Permission; 5] = [
        Permission::Read,
        Permission::Write,
        Permission::Delete,
        Permission::AccessControl,
        Permission::Link,
    ];

    /// The flag of this kind in a `PermissionSet`.
    pub fn flag(self) -> PermissionSet {
        match self {
            Permission::Read => PermissionSet::READ,
            Permission::Write => PermissionSet::WRITE,
            Permission::Delete => PermissionSet::DELETE,
            Permission::AccessControl => PermissionSet::ACCESS_CONTROL,
            Permission::Link => PermissionSet::LINK,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Delete => "delete",
            Permission::AccessControl => "access_control",
            Permission::Link => "link",
        };

        write!(f, "{}", s)
    }
}

impl FromStr for Permission {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "delete" => Ok(Permission::Delete),
            "access_control" | "accessControl" => Ok(Permission::AccessControl),
            "link" => Ok(Permission::Link),
            other => Err(RuleError::UnknownPermission(other.to_string())),
        }
    }
}

bitflags! {
    /// A set of permission kinds.
    ///
    /// A kind is either held or not, there are no partial permissions. All set operations are
    /// order-independent and idempotent.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PermissionSet: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const DELETE = 1 << 2;
        const ACCESS_CONTROL = 1 << 3;
        const LINK = 1 << 4;
    }
}

impl PermissionSet {
    /// Set holding exactly the given kinds.
    pub fn of(kinds: &[Permission]) -> Self {
        kinds.iter().copied().collect()
    }

    /// Returns `true` if the given kind is held.
    pub fn holds(&self, kind: Permission) -> bool {
        self.contains(kind.flag())
    }

    /// Whether relationships may be created to or from an entity with this set.
    ///
    /// Write access includes the right to link.
    pub fn allows_link(&self) -> bool {
        self.intersects(PermissionSet::LINK | PermissionSet::WRITE)
    }

    /// Iterate over the held kinds in bit order.
    pub fn kinds(&self) -> impl Iterator<Item = Permission> + '_ {
        Permission::ALL.into_iter().filter(|kind| self.holds(*kind))
    }
}

impl Default for PermissionSet {
    fn default() -> Self {
        PermissionSet::empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        iter.into_iter()
            .fold(PermissionSet::empty(), |set, kind| set | kind.flag())
    }
}

impl From<Permission> for PermissionSet {
    fn from(kind: Permission) -> Self {
        kind.flag()
    }
}

impl Display for PermissionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<String> = self.kinds().map(|kind| kind.to_string()).collect();
        write!(f, "{{{}}}", kinds.join(","))
    }
}
