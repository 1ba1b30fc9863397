// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities.
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::entity::EntityId;
use crate::permission::{Permission, PermissionSet};
use crate::rule::{PropagationDirection, PropagationMode, PropagationRule};
use crate::store::MemoryStore;

/// Install a `tracing` subscriber when `RUST_LOG` is set.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Relationship types used by generated graphs and their propagation rules.
pub fn random_graph_rules() -> Vec<(&'static str, PropagationRule)> {
    vec![
        (
            "FLOWS",
            PropagationRule::new(PropagationDirection::Both)
                .with_mode(Permission::Read, PropagationMode::Add),
        ),
        (
            "GRANTS",
            PropagationRule::new(PropagationDirection::Out)
                .with_mode(Permission::Read, PropagationMode::Add)
                .with_mode(Permission::Write, PropagationMode::Add),
        ),
        (
            "BLOCKS",
            PropagationRule::new(PropagationDirection::In)
                .with_mode(Permission::Write, PropagationMode::Remove),
        ),
        ("IGNORES", PropagationRule::none()),
    ]
}

/// A committed store holding a generated graph.
#[derive(Debug)]
pub struct RandomGraph {
    pub store: MemoryStore,
    pub users: Vec<EntityId>,
    pub nodes: Vec<EntityId>,
}

/// Generate a graph of `node_count` nodes connected by `relationship_count` relationships of
/// the types in [`random_graph_rules`], with cycles and self-loops likely. Every user holds a
/// few random grants.
///
/// The same seed always produces the same graph.
pub fn random_graph(seed: [u8; 32], node_count: usize, relationship_count: usize) -> RandomGraph {
    let mut rng = ChaCha20Rng::from_seed(seed);
    let rules = random_graph_rules();

    let store = MemoryStore::new();
    let mut txn = store.begin();
    for (name, rule) in &rules {
        txn.declare_rule(name, *rule);
    }

    let users: Vec<_> = (0..3).map(|_| txn.create_node("User")).collect();
    let nodes: Vec<_> = (0..node_count).map(|_| txn.create_node("Node")).collect();

    if !nodes.is_empty() {
        for _ in 0..relationship_count {
            let (name, _) = rules[rng.random_range(0..rules.len())];
            let source = nodes[rng.random_range(0..nodes.len())];
            let target = nodes[rng.random_range(0..nodes.len())];
            txn.create_relationship(name, source, target)
                .expect("endpoints are nodes");
        }

        for user in &users {
            for _ in 0..2 {
                let node = nodes[rng.random_range(0..nodes.len())];
                let kinds = if rng.random_bool(0.5) {
                    PermissionSet::READ
                } else {
                    PermissionSet::of(&[Permission::Read, Permission::Write])
                };
                txn.grant(*user, node, kinds).expect("user and node exist");
            }
        }
    }

    txn.commit().expect("no concurrent writers");

    RandomGraph {
        store,
        users,
        nodes,
    }
}
