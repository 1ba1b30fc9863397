// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::rule::RuleSet;

/// Access to the propagation rules of the schema.
///
/// The returned rule set must not change while a resolution is running.
pub trait RuleSource {
    fn rules(&self) -> &RuleSet;
}
