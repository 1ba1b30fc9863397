// SPDX-License-Identifier: MIT OR Apache-2.0

//! Schema-level propagation rules for relationship types.
//!
//! A rule decides _whether_ permissions travel along a relationship at all (its direction) and,
//! per permission kind, _how_ a permission held on the other endpoint affects the entity being
//! resolved (its mode).
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::{Direction, RelationshipType};
use crate::permission::Permission;

/// Errors raised when loading propagation rules which reference unknown names.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("unknown permission kind \"{0}\" in propagation rule")]
    UnknownPermission(String),

    #[error("unknown propagation direction \"{0}\"")]
    UnknownDirection(String),

    #[error("unknown propagation mode \"{0}\"")]
    UnknownMode(String),

    #[error("rule for relationship \"{0}\" names only one endpoint type")]
    IncompletePair(String),
}

/// Along which traversal direction permissions propagate over a relationship.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropagationDirection {
    /// The relationship never propagates, independent of any mode.
    #[default]
    None,

    /// Permissions flow from the source of the relationship to its target.
    Out,

    /// Permissions flow from the target of the relationship to its source.
    In,

    /// Permissions flow in both directions.
    Both,
}

impl PropagationDirection {
    /// Returns `true` if permissions held on the other endpoint may flow into an entity which
    /// sees the relationship in the given direction.
    pub fn admits(&self, direction: Direction) -> bool {
        match self {
            PropagationDirection::None => false,
            PropagationDirection::Out => direction == Direction::Incoming,
            PropagationDirection::In => direction == Direction::Outgoing,
            PropagationDirection::Both => true,
        }
    }
}

impl FromStr for PropagationDirection {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(PropagationDirection::None),
            "out" => Ok(PropagationDirection::Out),
            "in" => Ok(PropagationDirection::In),
            "both" => Ok(PropagationDirection::Both),
            _ => Err(RuleError::UnknownDirection(s.to_string())),
        }
    }
}

impl Display for PropagationDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PropagationDirection::None => "none",
            PropagationDirection::Out => "out",
            PropagationDirection::In => "in",
            PropagationDirection::Both => "both",
        };

        write!(f, "{}", s)
    }
}

/// How a permission kind held on the other endpoint affects the resolved entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropagationMode {
    /// The kind is ignored for this relationship.
    #[default]
    None,

    /// The kind is added to the resolved entity.
    Add,

    /// The kind is removed from the resolved entity. Remove only suppresses, it never grants.
    Remove,
}

impl FromStr for PropagationMode {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "keep" => Ok(PropagationMode::None),
            "add" => Ok(PropagationMode::Add),
            "remove" => Ok(PropagationMode::Remove),
            _ => Err(RuleError::UnknownMode(s.to_string())),
        }
    }
}

/// Propagation rule of one relationship type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropagationRule {
    pub direction: PropagationDirection,
    modes: [PropagationMode; 5],
}

impl PropagationRule {
    pub fn new(direction: PropagationDirection) -> Self {
        Self {
            direction,
            modes: Default::default(),
        }
    }

    /// A rule which never propagates anything.
    pub fn none() -> Self {
        Self::default()
    }

    /// Set the mode of one permission kind.
    pub fn with_mode(mut self, kind: Permission, mode: PropagationMode) -> Self {
        self.modes[kind.index()] = mode;
        self
    }

    /// Set the same mode for every permission kind.
    pub fn with_all_modes(mut self, mode: PropagationMode) -> Self {
        self.modes = [mode; 5];
        self
    }

    pub fn mode(&self, kind: Permission) -> PropagationMode {
        self.modes[kind.index()]
    }

    /// Returns `true` if this rule can change anything for an entity seeing the relationship in
    /// the given direction.
    pub fn propagates(&self, direction: Direction) -> bool {
        self.direction.admits(direction)
            && self.modes.iter().any(|mode| *mode != PropagationMode::None)
    }
}

/// Serialisable rule declaration as it appears in schema documents.
///
/// Names are validated when the declaration is loaded into a [`RuleSet`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDeclaration {
    pub relationship: String,

    #[serde(default)]
    pub source_type: Option<String>,

    #[serde(default)]
    pub target_type: Option<String>,

    pub direction: String,

    /// Permission kind name to mode name, for example `"read" => "add"`.
    #[serde(default)]
    pub modes: BTreeMap<String, String>,
}

impl RuleDeclaration {
    fn parse(&self) -> Result<PropagationRule, RuleError> {
        let direction = self.direction.parse::<PropagationDirection>()?;
        let mut rule = PropagationRule::new(direction);
        for (kind, mode) in &self.modes {
            rule = rule.with_mode(kind.parse()?, mode.parse()?);
        }
        Ok(rule)
    }
}

/// Immutable set of propagation rules, keyed by relationship type.
///
/// Rules declared for an ordered pair of endpoint types take precedence over rules declared for
/// the relationship name alone. Undeclared relationship types never propagate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    by_name: BTreeMap<String, PropagationRule>,
    by_pair: BTreeMap<RelationshipType, PropagationRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rule set carrying the built-in rule of the group membership relationship: group
    /// permissions flow from the group (source) to its members (target).
    pub fn with_membership(relationship: &str) -> Self {
        let mut rules = Self::new();
        rules.declare(
            relationship,
            PropagationRule::new(PropagationDirection::Out).with_all_modes(PropagationMode::Add),
        );
        rules
    }

    /// Load rules from declarations, failing on the first unknown name.
    pub fn load<'a>(
        declarations: impl IntoIterator<Item = &'a RuleDeclaration>,
    ) -> Result<Self, RuleError> {
        let mut rules = Self::new();
        rules.extend(declarations)?;
        Ok(rules)
    }

    /// Add declarations to this rule set, replacing rules for the same keys.
    ///
    /// Nothing is changed when any declaration is invalid.
    pub fn extend<'a>(
        &mut self,
        declarations: impl IntoIterator<Item = &'a RuleDeclaration>,
    ) -> Result<(), RuleError> {
        let mut parsed = Vec::new();
        for declaration in declarations {
            let rule = declaration.parse()?;
            let key = match (&declaration.source_type, &declaration.target_type) {
                (None, None) => None,
                (Some(source_type), Some(target_type)) => Some(RelationshipType::new(
                    declaration.relationship.clone(),
                    source_type.clone(),
                    target_type.clone(),
                )),
                _ => {
                    return Err(RuleError::IncompletePair(
                        declaration.relationship.clone(),
                    ));
                }
            };
            parsed.push((declaration.relationship.clone(), key, rule));
        }

        for (name, key, rule) in parsed {
            match key {
                Some(key) => self.declare_between(key, rule),
                None => self.declare(&name, rule),
            }
        }

        Ok(())
    }

    /// Declare the rule for every relationship with the given name.
    pub fn declare(&mut self, relationship: &str, rule: PropagationRule) {
        self.by_name.insert(relationship.to_string(), rule);
    }

    /// Declare the rule for a relationship name between two specific node types.
    pub fn declare_between(&mut self, relationship_type: RelationshipType, rule: PropagationRule) {
        self.by_pair.insert(relationship_type, rule);
    }

    /// Remove the type-wide rule of a relationship name and all its pair-specific rules.
    pub fn remove(&mut self, relationship: &str) -> bool {
        let removed = self.by_name.remove(relationship).is_some();
        let before = self.by_pair.len();
        self.by_pair.retain(|key, _| key.name != relationship);
        removed || before != self.by_pair.len()
    }

    /// Rule governing the given relationship type, defaulting to no propagation.
    pub fn rule_for(&self, relationship_type: &RelationshipType) -> PropagationRule {
        self.by_pair
            .get(relationship_type)
            .or_else(|| self.by_name.get(&relationship_type.name))
            .copied()
            .unwrap_or_else(PropagationRule::none)
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty() && self.by_pair.is_empty()
    }
}
