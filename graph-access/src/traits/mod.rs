// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces of the collaborators the resolver reads from.
mod grant_store;
mod graph_store;
mod rule_source;

pub use grant_store::GrantStore;
pub use graph_store::GraphStore;
pub use rule_source::RuleSource;

/// Everything the resolver needs from one consistent snapshot of the graph.
///
/// Implemented automatically for every type providing graph, grant and rule access with a shared
/// error type.
pub trait AccessStore: GraphStore + GrantStore<Error = <Self as GraphStore>::Error> + RuleSource {}

impl<T> AccessStore for T where
    T: GraphStore + GrantStore<Error = <T as GraphStore>::Error> + RuleSource
{
}
