//! Matcher-level integration tests: built-in functions wired through real
//! models, JSON request attributes and matcher overrides.

use warden::{Enforcer, Value};

fn model_with_matcher(matcher: &str) -> String {
    format!(
        r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = {matcher}
"#
    )
}

#[test]
fn key_match_restricts_to_path_prefix() {
    let model = model_with_matcher("r.sub == p.sub && keyMatch(r.obj, p.obj) && r.act == p.act");
    let e = Enforcer::from_text(&model, "p, alice, /data/*, read\n").unwrap();

    assert!(e.enforce(&["alice", "/data/file", "read"]).unwrap());
    assert!(e.enforce(&["alice", "/data/sub/file", "read"]).unwrap());
    assert!(!e.enforce(&["alice", "/other/file", "read"]).unwrap());
    assert!(!e.enforce(&["bob", "/data/file", "read"]).unwrap());
}

#[test]
fn key_match2_binds_path_parameters() {
    let model = model_with_matcher("r.sub == p.sub && keyMatch2(r.obj, p.obj) && r.act == p.act");
    let e = Enforcer::from_text(&model, "p, alice, /resource/:id, read\n").unwrap();

    assert!(e.enforce(&["alice", "/resource/42", "read"]).unwrap());
    assert!(!e.enforce(&["alice", "/resource/42/sub", "read"]).unwrap());
    assert!(!e.enforce(&["alice", "/resource", "read"]).unwrap());
}

#[test]
fn glob_match_and_segment_boundaries() {
    let model = model_with_matcher("r.sub == p.sub && globMatch(r.obj, p.obj) && r.act == p.act");
    let e = Enforcer::from_text(&model, "p, alice, /logs/*.txt, read\n").unwrap();

    assert!(e.enforce(&["alice", "/logs/app.txt", "read"]).unwrap());
    assert!(!e.enforce(&["alice", "/logs/deep/app.txt", "read"]).unwrap());
    assert!(!e.enforce(&["alice", "/logs/app.json", "read"]).unwrap());
}

#[test]
fn ip_match_against_cidr_policies() {
    let model = model_with_matcher("ipMatch(r.sub, p.sub) && r.obj == p.obj && r.act == p.act");
    let e = Enforcer::from_text(&model, "p, 10.0.0.0/16, data1, read\n").unwrap();

    assert!(e.enforce(&["10.0.3.7", "data1", "read"]).unwrap());
    assert!(!e.enforce(&["10.1.0.1", "data1", "read"]).unwrap());

    // a malformed request address is an incident, not an error: deny
    let out = e.enforce_ex(&["not-an-ip", "data1", "read"]).unwrap();
    assert!(!out.allowed);
    assert!(out.notes.iter().any(|n| n.contains("ipMatch")));
}

#[test]
fn regex_match_policies() {
    let model = model_with_matcher("r.sub == p.sub && regexMatch(r.obj, p.obj) && r.act == p.act");
    let e = Enforcer::from_text(&model, "p, alice, ^/api/v[0-9]+/users$, read\n").unwrap();

    assert!(e.enforce(&["alice", "/api/v1/users", "read"]).unwrap());
    assert!(e.enforce(&["alice", "/api/v22/users", "read"]).unwrap());
    assert!(!e.enforce(&["alice", "/api/users", "read"]).unwrap());
}

#[test]
fn custom_functions_compose_with_builtins() {
    let model = model_with_matcher("endsWith(r.obj, p.obj) && r.act == p.act");
    let mut e = Enforcer::from_text(&model, "p, any, .secret, read\n").unwrap();
    e.add_function("endsWith", 2, |args| {
        Ok(Value::Bool(args[0].to_text().ends_with(&args[1].to_text())))
    });

    assert!(e.enforce(&["x", "plan.secret", "read"]).unwrap());
    assert!(!e.enforce(&["x", "plan.txt", "read"]).unwrap());

    // registrations survive a policy reload
    e.load_policy().unwrap();
    assert!(e.enforce(&["x", "plan.secret", "read"]).unwrap());
}

#[test]
fn json_attributes_in_requests() {
    let model = model_with_matcher("r.sub.dept == p.sub && r.obj == p.obj && r.act == p.act");
    let mut e = Enforcer::from_text(&model, "p, engineering, data1, read\n").unwrap();
    e.enable_accept_json_request(true);

    assert!(e
        .enforce(&[r#"{"name": "alice", "dept": "engineering"}"#, "data1", "read"])
        .unwrap());
    assert!(!e
        .enforce(&[r#"{"name": "mallory", "dept": "sales"}"#, "data1", "read"])
        .unwrap());
}

#[test]
fn matcher_override_uses_the_same_request() {
    let model = model_with_matcher("r.sub == p.sub && r.obj == p.obj && r.act == p.act");
    let e = Enforcer::from_text(&model, "p, alice, data1, read\n").unwrap();

    assert!(!e.enforce(&["alice", "data2", "read"]).unwrap());
    // looser matcher: ignore the object
    assert!(e
        .enforce_with_matcher("r.sub == p.sub && r.act == p.act", &["alice", "data2", "read"])
        .unwrap());
    let ex = e
        .enforce_ex_with_matcher("r.sub == p.sub", &["alice", "data9", "x"])
        .unwrap();
    assert!(ex.allowed);
    assert_eq!(ex.matched.len(), 1);
}

#[test]
fn integer_comparisons_in_matchers() {
    let model = r#"
[request_definition]
r = sub, age

[policy_definition]
p = sub, limit

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && r.age >= p.limit
"#;
    let e = Enforcer::from_text(model, "p, gate, 18\n").unwrap();
    assert!(e.enforce(&["gate", "21"]).unwrap());
    assert!(e.enforce(&["gate", "18"]).unwrap());
    // "9" < "18" numerically even though it is larger lexicographically
    assert!(!e.enforce(&["gate", "9"]).unwrap());
}
