//! Enforcement-path benchmarks: raw matcher evaluation over growing
//! policy sets, RBAC resolution and the decision cache.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use warden::Enforcer;

const ACL_MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
"#;

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

fn acl_policy(n: usize) -> String {
    let mut out = String::new();
    for i in 0..n {
        out.push_str(&format!("p, user{i}, data{i}, read\n"));
    }
    out
}

fn bench_acl(c: &mut Criterion) {
    for n in [10usize, 100, 1000] {
        let e = Enforcer::from_text(ACL_MODEL, &acl_policy(n)).unwrap();
        let hit = [format!("user{}", n / 2), format!("data{}", n / 2), "read".to_string()];
        let miss = ["nobody".to_string(), "nothing".to_string(), "never".to_string()];
        c.bench_function(&format!("acl_enforce_hit_{n}"), |b| {
            b.iter(|| black_box(e.enforce(black_box(&hit)).unwrap()))
        });
        c.bench_function(&format!("acl_enforce_miss_{n}"), |b| {
            b.iter(|| black_box(e.enforce(black_box(&miss)).unwrap()))
        });
    }
}

fn bench_rbac(c: &mut Criterion) {
    // ten-deep role chain on top of a flat policy set
    let mut policy = acl_policy(100);
    policy.push_str("p, role9, data_deep, read\n");
    for i in 0..9 {
        policy.push_str(&format!("g, role{i}, role{}\n", i + 1));
    }
    policy.push_str("g, alice, role0\n");
    let e = Enforcer::from_text(RBAC_MODEL, &policy).unwrap();
    let request = ["alice", "data_deep", "read"];
    c.bench_function("rbac_enforce_deep_chain", |b| {
        b.iter(|| black_box(e.enforce(black_box(&request)).unwrap()))
    });
}

fn bench_cached(c: &mut Criterion) {
    let mut e = Enforcer::from_text(ACL_MODEL, &acl_policy(1000)).unwrap();
    e.enable_cache(true);
    let request = ["user500", "data500", "read"];
    // prime the cache
    let _ = e.enforce(&request).unwrap();
    c.bench_function("acl_enforce_cached_1000", |b| {
        b.iter(|| black_box(e.enforce(black_box(&request)).unwrap()))
    });
}

fn bench_matcher_compile(c: &mut Criterion) {
    c.bench_function("matcher_compile", |b| {
        b.iter(|| {
            black_box(
                warden::expr::compile(black_box(
                    "g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && r.act == p.act",
                ))
                .unwrap(),
            )
        })
    });
}

criterion_group!(benches, bench_acl, bench_rbac, bench_cached, bench_matcher_compile);
criterion_main!(benches);
