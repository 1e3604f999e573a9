//! Management API integration tests: bulk mutation, watcher/dispatcher
//! notification flows and the self_* echo-free variants.

use parking_lot::Mutex;
use std::sync::Arc;

use warden::{Dispatcher, Enforcer, Rule, Watcher};

fn rule(fields: &[&str]) -> Rule {
    fields.iter().map(|s| s.to_string()).collect()
}

const MODEL: &str = r#"
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

/// Watcher double that records which fine-grained notification fired.
#[derive(Clone, Default)]
struct RecordingWatcher {
    events: Arc<Mutex<Vec<String>>>,
}

impl Watcher for RecordingWatcher {
    fn set_update_callback(&mut self, _cb: warden::watcher::UpdateCallback) {}

    fn update(&mut self) -> warden::Result<()> {
        self.events.lock().push("update".into());
        Ok(())
    }

    fn update_for_add_policy(&mut self, _sec: &str, ptype: &str, rule: &[String]) -> warden::Result<()> {
        self.events.lock().push(format!("add:{ptype}:{}", rule.join(",")));
        Ok(())
    }

    fn update_for_remove_policy(&mut self, _sec: &str, ptype: &str, rule: &[String]) -> warden::Result<()> {
        self.events.lock().push(format!("remove:{ptype}:{}", rule.join(",")));
        Ok(())
    }

    fn update_for_remove_filtered_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        values: &[String],
    ) -> warden::Result<()> {
        self.events.lock().push(format!("remove_filtered:{ptype}:{field_index}:{}", values.join(",")));
        Ok(())
    }

    fn update_for_save_policy(&mut self) -> warden::Result<()> {
        self.events.lock().push("save".into());
        Ok(())
    }

    fn update_for_update_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        old_rule: &[String],
        new_rule: &[String],
    ) -> warden::Result<()> {
        self.events
            .lock()
            .push(format!("update:{ptype}:{}->{}", old_rule.join(","), new_rule.join(",")));
        Ok(())
    }
}

/// Dispatcher double counting broadcast operations.
#[derive(Clone, Default)]
struct RecordingDispatcher {
    events: Arc<Mutex<Vec<String>>>,
}

impl Dispatcher for RecordingDispatcher {
    fn add_policies(&mut self, _sec: &str, ptype: &str, rules: &[Rule]) -> warden::Result<()> {
        self.events.lock().push(format!("add:{ptype}:{}", rules.len()));
        Ok(())
    }
    fn remove_policies(&mut self, _sec: &str, ptype: &str, rules: &[Rule]) -> warden::Result<()> {
        self.events.lock().push(format!("remove:{ptype}:{}", rules.len()));
        Ok(())
    }
    fn remove_filtered_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        _values: &[String],
    ) -> warden::Result<()> {
        self.events.lock().push(format!("remove_filtered:{ptype}:{field_index}"));
        Ok(())
    }
    fn clear_policy(&mut self) -> warden::Result<()> {
        self.events.lock().push("clear".into());
        Ok(())
    }
    fn update_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        _old: &[String],
        _new: &[String],
    ) -> warden::Result<()> {
        self.events.lock().push(format!("update:{ptype}"));
        Ok(())
    }
    fn update_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        old: &[Rule],
        _new: &[Rule],
    ) -> warden::Result<()> {
        self.events.lock().push(format!("update_bulk:{ptype}:{}", old.len()));
        Ok(())
    }
    fn update_filtered_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        _old: &[Rule],
        _new: &[Rule],
    ) -> warden::Result<()> {
        self.events.lock().push(format!("update_filtered:{ptype}"));
        Ok(())
    }
}

#[test]
fn fine_grained_watcher_notifications() {
    let watcher = RecordingWatcher::default();
    let events = watcher.events.clone();
    let mut e = Enforcer::from_text(MODEL, "").unwrap();
    e.set_watcher(Box::new(watcher));

    e.add_policy(rule(&["alice", "data1", "read"])).unwrap();
    e.update_policy(rule(&["alice", "data1", "read"]), rule(&["alice", "data1", "write"]))
        .unwrap();
    e.remove_policy(rule(&["alice", "data1", "write"])).unwrap();
    e.add_policy(rule(&["bob", "data2", "read"])).unwrap();
    e.remove_filtered_policy(0, vec!["bob".into()]).unwrap();
    e.save_policy().unwrap();

    let got = events.lock().clone();
    assert_eq!(
        got,
        vec![
            "add:p:alice,data1,read",
            "update:p:alice,data1,read->alice,data1,write",
            "remove:p:alice,data1,write",
            "add:p:bob,data2,read",
            "remove_filtered:p:0:bob",
            "save",
        ]
    );
}

#[test]
fn dispatcher_broadcasts_mirror_mutations() {
    let dispatcher = RecordingDispatcher::default();
    let events = dispatcher.events.clone();
    let mut e = Enforcer::from_text(MODEL, "").unwrap();
    e.set_dispatcher(Box::new(dispatcher));

    e.add_policies(vec![rule(&["a", "o", "r"]), rule(&["b", "o", "r"])]).unwrap();
    e.add_grouping_policy(rule(&["alice", "admin"])).unwrap();
    e.remove_policy(rule(&["a", "o", "r"])).unwrap();
    e.clear_policy();

    let got = events.lock().clone();
    assert_eq!(got, vec!["add:p:2", "add:g:1", "remove:p:1", "clear"]);
}

#[test]
fn toggling_auto_notify_suppresses_events() {
    let watcher = RecordingWatcher::default();
    let events = watcher.events.clone();
    let mut e = Enforcer::from_text(MODEL, "").unwrap();
    e.set_watcher(Box::new(watcher));
    e.enable_auto_notify_watcher(false);

    e.add_policy(rule(&["alice", "data1", "read"])).unwrap();
    assert!(events.lock().is_empty());

    e.enable_auto_notify_watcher(true);
    e.add_policy(rule(&["bob", "data2", "read"])).unwrap();
    assert_eq!(events.lock().len(), 1);
}

#[test]
fn self_variants_apply_without_echo() {
    let watcher = RecordingWatcher::default();
    let wevents = watcher.events.clone();
    let dispatcher = RecordingDispatcher::default();
    let devents = dispatcher.events.clone();

    let mut e = Enforcer::from_text(MODEL, "").unwrap();
    e.set_watcher(Box::new(watcher));
    e.set_dispatcher(Box::new(dispatcher));

    // a change received from a peer: applied locally, no re-broadcast
    e.self_add_policy("p", "p", rule(&["alice", "data1", "read"])).unwrap();
    e.self_add_policies("g", "g", vec![rule(&["alice", "admin"])]).unwrap();
    e.self_update_policy(
        "p",
        "p",
        rule(&["alice", "data1", "read"]),
        rule(&["alice", "data1", "write"]),
    )
    .unwrap();
    e.self_remove_filtered_policy("p", "p", 0, vec!["alice".into()]).unwrap();

    assert!(wevents.lock().is_empty());
    assert!(devents.lock().is_empty());
    assert!(e.has_grouping_policy(&rule(&["alice", "admin"])));
    assert!(e.get_policy().is_empty());
}

#[test]
fn bulk_adds_and_removes_are_atomic() {
    let mut e = Enforcer::from_text(MODEL, "").unwrap();
    e.add_policies(vec![rule(&["a", "o", "r"]), rule(&["b", "o", "r"])]).unwrap();
    assert_eq!(e.get_policy().len(), 2);

    // one duplicate fails the whole batch
    let err = e
        .add_policies(vec![rule(&["c", "o", "r"]), rule(&["a", "o", "r"])])
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert_eq!(e.get_policy().len(), 2);
    assert!(!e.has_policy(&rule(&["c", "o", "r"])));

    let err = e
        .remove_policies(vec![rule(&["a", "o", "r"]), rule(&["zz", "o", "r"])])
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert_eq!(e.get_policy().len(), 2);

    e.remove_policies(vec![rule(&["a", "o", "r"]), rule(&["b", "o", "r"])]).unwrap();
    assert!(e.get_policy().is_empty());
}

#[test]
fn update_policies_is_atomic_across_the_batch() {
    let mut e = Enforcer::from_text(MODEL, "").unwrap();
    e.add_policies(vec![rule(&["a", "o", "r"]), rule(&["b", "o", "r"])]).unwrap();

    // second pair's old rule is missing: nothing changes
    let err = e
        .update_policies(
            vec![rule(&["a", "o", "r"]), rule(&["zz", "o", "r"])],
            vec![rule(&["a2", "o", "r"]), rule(&["zz2", "o", "r"])],
        )
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert!(e.has_policy(&rule(&["a", "o", "r"])));
    assert!(!e.has_policy(&rule(&["a2", "o", "r"])));

    e.update_policies(
        vec![rule(&["a", "o", "r"]), rule(&["b", "o", "r"])],
        vec![rule(&["a2", "o", "r"]), rule(&["b2", "o", "r"])],
    )
    .unwrap();
    assert_eq!(e.get_policy(), vec![rule(&["a2", "o", "r"]), rule(&["b2", "o", "r"])]);
}

#[test]
fn grouping_updates_keep_graph_consistent() {
    let mut e = Enforcer::from_text(MODEL, "p, admin2, data1, read\n").unwrap();
    e.add_grouping_policy(rule(&["alice", "admin"])).unwrap();
    e.update_grouping_policy(rule(&["alice", "admin"]), rule(&["alice", "admin2"])).unwrap();

    assert!(!e.has_role_for_user("alice", "admin"));
    assert!(e.has_role_for_user("alice", "admin2"));
    assert!(e.enforce(&["alice", "data1", "read"]).unwrap());
}
