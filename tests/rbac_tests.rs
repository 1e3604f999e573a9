//! RBAC integration tests: transitive role resolution, domain scoping and
//! conditional links, exercised through the full enforcement pipeline.

use parking_lot::RwLock;
use std::sync::Arc;

use warden::{
    ConditionalRoleManager, Enforcer, LinkCondition, Rule, SharedRoleManager,
};

fn rule(fields: &[&str]) -> Rule {
    fields.iter().map(|s| s.to_string()).collect()
}

const RBAC_MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
"#;

const DOMAIN_MODEL: &str = r#"
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && r.obj == p.obj && r.act == p.act
"#;

#[test]
fn role_grants_access_until_revoked() {
    let policy = "p, admin, data1, read\ng, alice, admin\n";
    let mut e = Enforcer::from_text(RBAC_MODEL, policy).unwrap();

    assert!(e.enforce(&["alice", "data1", "read"]).unwrap());
    assert!(!e.enforce(&["bob", "data1", "read"]).unwrap());

    e.delete_role_for_user("alice", "admin").unwrap();
    assert!(!e.enforce(&["alice", "data1", "read"]).unwrap());
}

#[test]
fn grouping_store_and_role_graph_stay_in_step() {
    let mut e = Enforcer::from_text(RBAC_MODEL, "").unwrap();
    e.add_grouping_policy(rule(&["alice", "admin"])).unwrap();
    assert!(e.has_role_for_user("alice", "admin"));

    e.remove_grouping_policy(rule(&["alice", "admin"])).unwrap();
    assert!(!e.has_role_for_user("alice", "admin"));

    // every grouping rule present implies the corresponding role
    e.add_grouping_policy(rule(&["bob", "editor"])).unwrap();
    e.add_grouping_policy(rule(&["carol", "editor"])).unwrap();
    for grouping in e.get_grouping_policy() {
        assert!(e.has_role_for_user(&grouping[0], &grouping[1]));
    }
}

#[test]
fn transitive_roles_resolve_through_the_chain() {
    let policy = "p, root, data1, read\ng, alice, admin\ng, admin, super\ng, super, root\n";
    let e = Enforcer::from_text(RBAC_MODEL, policy).unwrap();
    assert!(e.enforce(&["alice", "data1", "read"]).unwrap());
    assert!(e.enforce(&["admin", "data1", "read"]).unwrap());

    let rm = e.role_manager("g").unwrap();
    // reflexive
    assert!(rm.read().has_link("alice", "alice", None));
    // transitive across two hops
    assert!(rm.read().has_link("alice", "super", None));
    assert!(!rm.read().has_link("root", "alice", None));
}

#[test]
fn domain_rbac_separates_tenants() {
    let policy = "p, admin, d1, data1, read\ng, alice, admin, d1\ng, alice, viewer, d2\n";
    let e = Enforcer::from_text(DOMAIN_MODEL, policy).unwrap();

    assert!(e.enforce(&["alice", "d1", "data1", "read"]).unwrap());
    assert!(!e.enforce(&["alice", "d2", "data1", "read"]).unwrap());
    assert!(!e.enforce(&["bob", "d1", "data1", "read"]).unwrap());
}

#[test]
fn auto_build_disabled_requires_incremental_updates() {
    let mut e = Enforcer::from_text(RBAC_MODEL, "p, admin, data1, read\n").unwrap();
    e.enable_auto_build_role_links(false);

    e.add_grouping_policy(rule(&["alice", "admin"])).unwrap();
    // graph not rebuilt automatically
    assert!(!e.enforce(&["alice", "data1", "read"]).unwrap());

    // the incremental call is the legal way to catch the graph up
    e.build_incremental_role_links(true, "g", &[rule(&["alice", "admin"])]).unwrap();
    assert!(e.enforce(&["alice", "data1", "read"]).unwrap());
}

#[test]
fn conditional_link_is_invisible_while_condition_fails() {
    let mut e = Enforcer::from_text(RBAC_MODEL, "p, admin, data1, read\n").unwrap();

    let rm: SharedRoleManager = Arc::new(RwLock::new(ConditionalRoleManager::new(10)));
    e.set_role_manager("g", rm.clone()).unwrap();
    rm.write()
        .register_condition(
            "featureOn",
            Arc::new(|params: &[String], _ctx: Option<&warden::RoleContext>| {
                Ok(params.first().map(|p| p == "on").unwrap_or(false))
            }),
        )
        .unwrap();

    e.add_grouping_policy(rule(&["alice", "admin"])).unwrap();
    rm.write()
        .set_condition(
            "alice",
            "admin",
            None,
            LinkCondition { name: "featureOn".into(), params: vec!["off".into()] },
        )
        .unwrap();

    // the edge is stored but the condition gates reachability
    assert!(e.has_grouping_policy(&rule(&["alice", "admin"])));
    assert!(!e.enforce(&["alice", "data1", "read"]).unwrap());

    rm.write()
        .set_condition(
            "alice",
            "admin",
            None,
            LinkCondition { name: "featureOn".into(), params: vec!["on".into()] },
        )
        .unwrap();
    assert!(e.enforce(&["alice", "data1", "read"]).unwrap());
}

#[test]
fn deep_hierarchies_stop_at_the_level_bound() {
    // chain of 12 links exceeds the default bound of 10
    let mut policy = String::from("p, role11, data1, read\n");
    policy.push_str("p, role9, data2, read\n");
    for i in 0..11 {
        policy.push_str(&format!("g, role{i}, role{}\n", i + 1));
    }
    let e = Enforcer::from_text(RBAC_MODEL, &policy).unwrap();
    // 11 hops: treated as absent
    assert!(!e.enforce(&["role0", "data1", "read"]).unwrap());
    // 9 hops: within the bound
    assert!(e.enforce(&["role0", "data2", "read"]).unwrap());
}

#[test]
fn cyclic_role_graphs_do_not_hang() {
    let policy = "p, b, data1, read\ng, a, b\ng, b, c\ng, c, a\n";
    let e = Enforcer::from_text(RBAC_MODEL, policy).unwrap();
    assert!(e.enforce(&["a", "data1", "read"]).unwrap());
    assert!(e.enforce(&["c", "data1", "read"]).unwrap());
    assert!(!e.enforce(&["a", "data9", "read"]).unwrap());
}

#[test]
fn user_and_role_sweeps_affect_enforcement() {
    let policy = "p, admin, data1, read\np, alice, data2, read\ng, alice, admin\n";
    let mut e = Enforcer::from_text(RBAC_MODEL, policy).unwrap();
    assert!(e.enforce(&["alice", "data1", "read"]).unwrap());
    assert!(e.enforce(&["alice", "data2", "read"]).unwrap());

    e.delete_user("alice").unwrap();
    assert!(!e.enforce(&["alice", "data1", "read"]).unwrap());
    assert!(!e.enforce(&["alice", "data2", "read"]).unwrap());
    // the role's own rule is untouched by deleting the user
    assert!(e.enforce(&["admin", "data1", "read"]).unwrap());
}
