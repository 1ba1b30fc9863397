// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;

use assert_matches::assert_matches;

use crate::config::AccessConfig;
use crate::entity::{EntityId, Principal, RelationshipType, Visibility};
use crate::error::AccessError;
use crate::filter::{Path, Value};
use crate::permission::{Permission, PermissionSet};
use crate::rule::{PropagationDirection, PropagationMode, PropagationRule, RuleDeclaration};
use crate::store::{MemoryStore, StoreError, Transaction};
use crate::test_utils::{random_graph, setup_logging};

fn read_add(direction: PropagationDirection) -> PropagationRule {
    PropagationRule::new(direction).with_mode(Permission::Read, PropagationMode::Add)
}

fn user(id: EntityId) -> Principal {
    Principal::User(id)
}

/// Commit a transaction, expecting no conflicts.
fn commit(txn: Transaction) -> u64 {
    txn.commit().expect("commit transaction")
}

#[test]
fn propagation_direction_scenario() {
    setup_logging();

    let store = MemoryStore::new();
    let mut txn = store.begin();
    let p = txn.create_node("User");
    let n1 = txn.create_node("T1");
    let n2 = txn.create_node("T2");
    txn.create_relationship("REL", n1, n2).unwrap();
    txn.grant(p, n1, Permission::Read).unwrap();
    txn.declare_rule("REL", read_add(PropagationDirection::None));
    commit(txn);

    let txn = store.begin();
    assert_eq!(
        txn.effective_permissions(user(p), n1).unwrap(),
        PermissionSet::READ
    );
    assert!(txn.effective_permissions(user(p), n2).unwrap().is_empty());
    commit(txn);

    let expected = [
        (PropagationDirection::Out, PermissionSet::READ),
        (PropagationDirection::In, PermissionSet::empty()),
        (PropagationDirection::Both, PermissionSet::READ),
    ];

    for (direction, permissions) in expected {
        let mut txn = store.begin();
        txn.declare_rule("REL", read_add(direction));
        assert_eq!(
            txn.effective_permissions(user(p), n2).unwrap(),
            permissions,
            "direction {}",
            direction
        );
        assert_eq!(
            txn.effective_permissions(user(p), n1).unwrap(),
            PermissionSet::READ
        );
        commit(txn);

        // Committed state and cache agree with what the transaction saw.
        let txn = store.begin();
        assert_eq!(txn.effective_permissions(user(p), n2).unwrap(), permissions);
        commit(txn);
    }
}

#[test]
fn in_rules_propagate_from_target_to_source() {
    let store = MemoryStore::new();
    let mut txn = store.begin();
    let p = txn.create_node("User");
    let n1 = txn.create_node("T1");
    let n2 = txn.create_node("T2");
    txn.create_relationship("REL", n1, n2).unwrap();
    txn.grant(p, n2, Permission::Read).unwrap();
    txn.declare_rule("REL", read_add(PropagationDirection::In));

    assert!(txn.is_allowed(user(p), n1, Permission::Read).unwrap());
    assert_eq!(
        txn.filter_result(user(p), &Value::Entity(n1)).unwrap(),
        Some(Value::Entity(n1))
    );
    commit(txn);

    // Out only carries permissions from source to target.
    let mut txn = store.begin();
    txn.declare_rule("REL", read_add(PropagationDirection::Out));
    assert!(txn.effective_permissions(user(p), n1).unwrap().is_empty());
    assert_eq!(
        txn.effective_permissions(user(p), n2).unwrap(),
        PermissionSet::READ
    );
}

#[test]
fn remove_mode_hides_again_without_touching_grants() {
    let store = MemoryStore::new();
    let mut txn = store.begin();
    let p = txn.create_node("User");
    let a = txn.create_node("Node");
    let b = txn.create_node("Node");
    txn.create_relationship("LINK", a, b).unwrap();
    txn.grant(p, a, Permission::Read).unwrap();
    txn.declare_rule("LINK", read_add(PropagationDirection::Both));
    assert!(txn.is_allowed(user(p), b, Permission::Read).unwrap());
    commit(txn);

    let mut txn = store.begin();
    txn.declare_rule(
        "LINK",
        PropagationRule::new(PropagationDirection::Both)
            .with_mode(Permission::Read, PropagationMode::Remove),
    );
    assert!(!txn.is_allowed(user(p), b, Permission::Read).unwrap());
    assert!(txn.is_allowed(user(p), a, Permission::Read).unwrap());
    assert_eq!(
        txn.snapshot().grant_table().lookup(p, a),
        PermissionSet::READ
    );
    commit(txn);
}

#[test]
fn cycles_resolve_to_their_component() {
    let store = MemoryStore::new();
    let mut txn = store.begin();
    let p = txn.create_node("User");
    let a = txn.create_node("Node");
    let b = txn.create_node("Node");
    txn.create_relationship("LINK", a, b).unwrap();
    txn.create_relationship("LINK", b, a).unwrap();
    txn.grant(p, a, Permission::Read).unwrap();
    txn.declare_rule(
        "LINK",
        PropagationRule::new(PropagationDirection::Both).with_all_modes(PropagationMode::Add),
    );

    // Not amplified: only what is held anywhere in the cycle.
    assert_eq!(
        txn.effective_permissions(user(p), a).unwrap(),
        PermissionSet::READ
    );
    assert_eq!(
        txn.effective_permissions(user(p), b).unwrap(),
        PermissionSet::READ
    );
}

#[test]
fn paths_are_filtered_atomically() {
    let store = MemoryStore::with_config(
        AccessConfig::default().relationship_visibility_from_endpoints(false),
    );
    let mut txn = store.begin();
    let p = txn.create_node("User");
    let n1 = txn.create_node("Node");
    let n2 = txn.create_node("Node");
    let n3 = txn.create_node("Node");
    let n4 = txn.create_node("Node");
    let r1 = txn.create_relationship("NEXT", n1, n2).unwrap();
    let r2 = txn.create_relationship("NEXT", n2, n3).unwrap();
    let r3 = txn.create_relationship("NEXT", n3, n4).unwrap();

    for id in [n1, n2, n3, n4, r1, r3] {
        txn.grant(p, id, Permission::Read).unwrap();
    }

    let path = Value::Path(Path::new(n1).then(r1, n2).then(r2, n3).then(r3, n4));
    let result = Value::List(vec![path.clone(), Value::Entity(n1)]);

    assert_eq!(
        txn.filter_result(user(p), &result).unwrap(),
        Some(Value::List(vec![Value::Entity(n1)]))
    );

    txn.grant(p, r2, Permission::Read).unwrap();
    assert_eq!(
        txn.filter_result(user(p), &result).unwrap(),
        Some(Value::List(vec![path, Value::Entity(n1)]))
    );
}

#[test]
fn relationships_are_visible_through_their_endpoints() {
    let store = MemoryStore::new();
    let mut txn = store.begin();
    let p = txn.create_node("User");
    let a = txn.create_node("Node");
    let b = txn.create_node("Node");
    let rel = txn.create_relationship("NEXT", a, b).unwrap();
    txn.grant(p, a, Permission::Read).unwrap();
    assert!(!txn.is_allowed(user(p), rel, Permission::Read).unwrap());

    txn.grant(p, b, Permission::Read).unwrap();
    assert!(txn.is_allowed(user(p), rel, Permission::Read).unwrap());
    assert!(!txn.is_allowed(user(p), rel, Permission::Write).unwrap());
}

#[test]
fn superusers_bypass_resolution() {
    let graph = random_graph([7; 32], 12, 30);
    let mut txn = graph.store.begin();
    let admin = txn.create_node("User");
    txn.set_admin(admin, true).unwrap();

    for node in &graph.nodes {
        assert!(txn
            .effective_permissions(Principal::Superuser, *node)
            .unwrap()
            .is_all());
        assert!(txn.effective_permissions(user(admin), *node).unwrap().is_all());
    }

    txn.set_admin(admin, false).unwrap();
    assert!(graph
        .nodes
        .iter()
        .all(|node| !txn.effective_permissions(user(admin), *node).unwrap().is_all()));
}

#[test]
fn configured_superusers() {
    // Ids are handed out from 1, the first created node becomes the superuser.
    let store = MemoryStore::with_config(AccessConfig::default().superuser(EntityId(1)));
    let mut txn = store.begin();
    let root = txn.create_node("User");
    let doc = txn.create_node("Document");
    assert_eq!(root, EntityId(1));
    assert!(txn.effective_permissions(user(root), doc).unwrap().is_all());
}

#[test]
fn granting_twice_is_idempotent() {
    let store = MemoryStore::new();
    let mut txn = store.begin();
    let p = txn.create_node("User");
    let doc = txn.create_node("Document");
    txn.grant(p, doc, Permission::Read).unwrap();
    let changes = txn.changes().len();

    txn.grant(p, doc, Permission::Read).unwrap();
    assert_eq!(txn.changes().len(), changes);
    assert_eq!(
        txn.snapshot().grant_table().lookup(p, doc),
        PermissionSet::READ
    );
    assert_eq!(
        txn.effective_permissions(user(p), doc).unwrap(),
        PermissionSet::READ
    );
}

#[test]
fn group_grants_are_inherited() {
    let store = MemoryStore::new();
    let mut txn = store.begin();
    let alice = txn.create_node("User");
    let team = txn.create_node("Group");
    let company = txn.create_node("Group");
    let doc = txn.create_node("Document");
    txn.add_member(team, alice).unwrap();
    let membership = txn.add_member(company, team).unwrap();
    txn.grant(company, doc, Permission::Write).unwrap();
    commit(txn);

    let txn = store.begin();
    assert!(txn.is_allowed(user(alice), doc, Permission::Write).unwrap());
    commit(txn);

    let mut txn = store.begin();
    txn.delete_entity(membership).unwrap();
    assert!(!txn.is_allowed(user(alice), doc, Permission::Write).unwrap());
    commit(txn);
}

#[test]
fn group_cycles_terminate() {
    let store = MemoryStore::new();
    let mut txn = store.begin();
    let alice = txn.create_node("User");
    let a = txn.create_node("Group");
    let b = txn.create_node("Group");
    let doc = txn.create_node("Document");
    txn.add_member(a, alice).unwrap();
    txn.add_member(a, b).unwrap();
    txn.add_member(b, a).unwrap();
    txn.grant(b, doc, Permission::Read).unwrap();

    assert!(txn.is_allowed(user(alice), doc, Permission::Read).unwrap());
}

#[test]
fn owner_and_visibility_flags() {
    let store = MemoryStore::new();
    let mut txn = store.begin();
    let alice = txn.create_node("User");
    let bob = txn.create_node("User");
    let doc = txn.create_node("Document");

    txn.set_owner(doc, Some(alice)).unwrap();
    assert!(txn.effective_permissions(user(alice), doc).unwrap().is_all());
    assert!(txn.effective_permissions(user(bob), doc).unwrap().is_empty());

    txn.set_visibility(doc, Visibility::authenticated()).unwrap();
    assert_eq!(
        txn.effective_permissions(user(bob), doc).unwrap(),
        PermissionSet::READ
    );
    assert!(txn
        .effective_permissions(Principal::Anonymous, doc)
        .unwrap()
        .is_empty());

    txn.set_owner(doc, None).unwrap();
    assert_eq!(
        txn.effective_permissions(user(alice), doc).unwrap(),
        PermissionSet::READ
    );

    let rel = txn.create_relationship("OWNS", alice, doc).unwrap();
    assert_eq!(
        txn.set_owner(doc, Some(rel)),
        Err(StoreError::NotAPrincipal(rel))
    );
}

#[test]
fn linking_needs_both_endpoints() {
    let store = MemoryStore::new();
    let mut txn = store.begin();
    let p = txn.create_node("User");
    let a = txn.create_node("Node");
    let b = txn.create_node("Node");
    txn.grant(p, a, Permission::Write).unwrap();
    assert!(!txn.can_link(user(p), a, b).unwrap());

    txn.grant(p, b, Permission::Link).unwrap();
    assert!(txn.can_link(user(p), a, b).unwrap());
    assert!(!txn.is_allowed(user(p), b, Permission::Write).unwrap());
}

#[test]
fn revoke_after_commit_invalidates_cached_results() {
    let store = MemoryStore::new();
    let mut txn = store.begin();
    let p = txn.create_node("User");
    let folder = txn.create_node("Folder");
    let file = txn.create_node("File");
    txn.create_relationship("HAS", folder, file).unwrap();
    txn.declare_rule("HAS", read_add(PropagationDirection::Out));
    txn.grant(p, folder, Permission::Read).unwrap();
    let version = commit(txn);

    // A read-only transaction fills the shared cache.
    let txn = store.begin();
    assert!(txn.is_allowed(user(p), file, Permission::Read).unwrap());
    commit(txn);
    assert_eq!(store.cache().version(), version);
    assert!(store.cache().get(version, user(p), file).is_some());

    let mut txn = store.begin();
    txn.revoke(p, folder, Permission::Read).unwrap();
    let version = commit(txn);

    assert!(store.cache().get(version, user(p), file).is_none());
    let txn = store.begin();
    assert!(!txn.is_allowed(user(p), file, Permission::Read).unwrap());
    assert!(!txn.is_allowed(user(p), folder, Permission::Read).unwrap());
}

#[test]
fn writes_bypass_the_shared_cache() {
    let store = MemoryStore::new();
    let mut txn = store.begin();
    let p = txn.create_node("User");
    let doc = txn.create_node("Document");
    txn.grant(p, doc, Permission::Read).unwrap();
    commit(txn);

    let txn = store.begin();
    assert!(txn.is_allowed(user(p), doc, Permission::Read).unwrap());
    commit(txn);

    let mut txn = store.begin();
    txn.revoke(p, doc, Permission::Read).unwrap();
    assert!(!txn.is_allowed(user(p), doc, Permission::Read).unwrap());

    // Others still see the committed state.
    let other = store.begin();
    assert!(other.is_allowed(user(p), doc, Permission::Read).unwrap());
}

#[test]
fn rollback_discards_writes() {
    let store = MemoryStore::new();
    let mut txn = store.begin();
    let p = txn.create_node("User");
    let doc = txn.create_node("Document");
    commit(txn);

    let mut txn = store.begin();
    txn.grant(p, doc, Permission::Read).unwrap();
    assert!(txn.is_allowed(user(p), doc, Permission::Read).unwrap());
    txn.rollback();

    let txn = store.begin();
    assert!(!txn.is_allowed(user(p), doc, Permission::Read).unwrap());
    assert_eq!(store.version(), 1);
}

#[test]
fn deleted_entities_are_not_found() {
    let store = MemoryStore::new();
    let mut txn = store.begin();
    let p = txn.create_node("User");
    let doc = txn.create_node("Document");
    txn.grant(p, doc, Permission::Read).unwrap();
    txn.delete_entity(doc).unwrap();

    assert_matches!(
        txn.effective_permissions(user(p), doc),
        Err(AccessError::EntityNotFound(id)) if id == doc
    );
    assert!(txn.snapshot().grant_table().is_empty());
    assert_eq!(txn.delete_entity(doc), Err(StoreError::EntityNotFound(doc)));
}

#[test]
fn require_reports_missing_kind() {
    let store = MemoryStore::new();
    let mut txn = store.begin();
    let p = txn.create_node("User");
    let doc = txn.create_node("Document");
    txn.grant(p, doc, Permission::Read).unwrap();

    let resolver = txn.resolver();
    assert!(resolver.require(user(p), doc, Permission::Read).is_ok());
    assert_matches!(
        resolver.require(user(p), doc, Permission::Delete),
        Err(AccessError::Forbidden {
            required: Permission::Delete,
            ..
        })
    );
}

#[test]
fn pair_specific_rules_take_precedence() {
    let store = MemoryStore::new();
    let mut txn = store.begin();
    let p = txn.create_node("User");
    let folder = txn.create_node("Folder");
    let file = txn.create_node("File");
    let image = txn.create_node("Image");
    txn.create_relationship("HAS", folder, file).unwrap();
    txn.create_relationship("HAS", folder, image).unwrap();
    txn.grant(p, folder, Permission::Read).unwrap();

    txn.declare_rule("HAS", read_add(PropagationDirection::Out));
    txn.declare_rule_between(
        RelationshipType::new("HAS", "Folder", "Image"),
        PropagationRule::none(),
    );
    assert!(txn.is_allowed(user(p), file, Permission::Read).unwrap());
    assert!(!txn.is_allowed(user(p), image, Permission::Read).unwrap());

    assert!(txn.remove_rule("HAS"));
    assert!(!txn.is_allowed(user(p), file, Permission::Read).unwrap());
}

#[test]
fn rules_load_from_documents() {
    let declarations: Vec<RuleDeclaration> = serde_json::from_str(
        r#"[
            {
                "relationship": "HAS",
                "source_type": "Folder",
                "target_type": "File",
                "direction": "out",
                "modes": { "read": "add", "write": "add", "delete": "keep" }
            }
        ]"#,
    )
    .unwrap();

    let store = MemoryStore::new();
    let mut txn = store.begin();
    let p = txn.create_node("User");
    let folder = txn.create_node("Folder");
    let file = txn.create_node("File");
    txn.create_relationship("HAS", folder, file).unwrap();
    txn.grant(
        p,
        folder,
        PermissionSet::of(&[Permission::Read, Permission::Write, Permission::Delete]),
    )
    .unwrap();
    txn.load_rules(&declarations).unwrap();

    assert_eq!(
        txn.effective_permissions(user(p), file).unwrap(),
        PermissionSet::of(&[Permission::Read, Permission::Write])
    );
}

#[test]
fn random_graphs_resolve_deterministically() {
    let seed = [42; 32];

    let resolve_all = |reverse: bool| {
        let graph = random_graph(seed, 24, 60);
        let txn = graph.store.begin();
        let mut pairs: Vec<_> = graph
            .users
            .iter()
            .flat_map(|user| graph.nodes.iter().map(move |node| (*user, *node)))
            .collect();
        if reverse {
            pairs.reverse();
        }

        let mut results = BTreeMap::new();
        for (user, node) in pairs {
            let permissions = txn.effective_permissions(Principal::User(user), node).unwrap();
            results.insert((user, node), permissions);
        }
        results
    };

    let forward = resolve_all(false);
    assert_eq!(forward, resolve_all(true));
    assert_eq!(forward, resolve_all(false));
}

#[test]
fn cached_results_match_fresh_resolution() {
    let graph = random_graph([3; 32], 16, 40);

    let warm = graph.store.begin();
    for user in &graph.users {
        for node in &graph.nodes {
            warm.effective_permissions(Principal::User(*user), *node)
                .unwrap();
        }
    }
    commit(warm);

    let cached = graph.store.begin();
    for user in &graph.users {
        for node in graph.nodes.iter().rev() {
            let principal = Principal::User(*user);
            let fresh = crate::resolver::AccessResolver::new(
                cached.snapshot(),
                &crate::memo::MemoTable::new(),
                graph.store.config(),
            )
            .effective_permissions(principal, *node)
            .unwrap();
            assert_eq!(
                cached.effective_permissions(principal, *node).unwrap(),
                fresh
            );
        }
    }
}
