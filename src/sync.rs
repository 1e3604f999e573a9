//! Concurrency layer: synchronized and distributed enforcers.
//! ----------------------------------------------------------
//! The core [`Enforcer`](crate::enforcer::Enforcer) is unsynchronised and
//! expects external serialisation. [`SyncedEnforcer`] wraps it in a
//! readers/writer lock (readers share, writers exclusive), making one
//! instance safe to share across threads; `update_policy` and friends hold
//! the writer lock across their whole pipeline, so `enforce` always
//! observes one logical snapshot. [`DistributedEnforcer`] adds a periodic
//! reconciliation task and peer liveness on top.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::adapter::PolicyFilter;
use crate::enforcer::{EnforceResult, Enforcer};
use crate::error::{EngineError, Result};
use crate::model::Model;
use crate::storage::{PolicyStore, Rule};
use crate::watcher::Watcher;

/// Shareable enforcer with a readers/writer discipline: `enforce` and the
/// other read operations take the shared lock, mutations take the
/// exclusive lock for their entire pipeline.
#[derive(Clone)]
pub struct SyncedEnforcer {
    inner: Arc<RwLock<Enforcer>>,
}

impl SyncedEnforcer {
    pub fn new(enforcer: Enforcer) -> Self {
        SyncedEnforcer { inner: Arc::new(RwLock::new(enforcer)) }
    }

    /// Shared read access for operations this wrapper does not mirror.
    pub fn read(&self) -> RwLockReadGuard<'_, Enforcer> {
        self.inner.read()
    }

    /// Exclusive write access for operations this wrapper does not mirror.
    pub fn write(&self) -> RwLockWriteGuard<'_, Enforcer> {
        self.inner.write()
    }

    // --- read operations --------------------------------------------------

    pub fn enforce<S: AsRef<str>>(&self, request: &[S]) -> Result<bool> {
        self.inner.read().enforce(request)
    }

    pub fn enforce_ex<S: AsRef<str>>(&self, request: &[S]) -> Result<EnforceResult> {
        self.inner.read().enforce_ex(request)
    }

    pub fn enforce_with_matcher<S: AsRef<str>>(&self, matcher: &str, request: &[S]) -> Result<bool> {
        self.inner.read().enforce_with_matcher(matcher, request)
    }

    pub fn batch_enforce<S: AsRef<str>>(&self, requests: &[Vec<S>]) -> Result<Vec<bool>> {
        self.inner.read().batch_enforce(requests)
    }

    pub fn get_policy(&self) -> Vec<Rule> {
        self.inner.read().get_policy()
    }

    pub fn get_grouping_policy(&self) -> Vec<Rule> {
        self.inner.read().get_grouping_policy()
    }

    pub fn has_policy(&self, rule: &[String]) -> bool {
        self.inner.read().has_policy(rule)
    }

    pub fn is_filtered(&self) -> bool {
        self.inner.read().is_filtered()
    }

    // --- mutations (exclusive) -------------------------------------------

    pub fn add_policy(&self, rule: Rule) -> Result<()> {
        self.inner.write().add_policy(rule)
    }

    pub fn add_policies(&self, rules: Vec<Rule>) -> Result<()> {
        self.inner.write().add_policies(rules)
    }

    pub fn remove_policy(&self, rule: Rule) -> Result<()> {
        self.inner.write().remove_policy(rule)
    }

    pub fn remove_policies(&self, rules: Vec<Rule>) -> Result<()> {
        self.inner.write().remove_policies(rules)
    }

    /// Atomic with respect to concurrent `enforce`: the writer lock spans
    /// the remove and the add.
    pub fn update_policy(&self, old_rule: Rule, new_rule: Rule) -> Result<()> {
        self.inner.write().update_policy(old_rule, new_rule)
    }

    pub fn add_grouping_policy(&self, rule: Rule) -> Result<()> {
        self.inner.write().add_grouping_policy(rule)
    }

    pub fn remove_grouping_policy(&self, rule: Rule) -> Result<()> {
        self.inner.write().remove_grouping_policy(rule)
    }

    pub fn add_role_for_user(&self, user: &str, role: &str) -> Result<()> {
        self.inner.write().add_role_for_user(user, role)
    }

    pub fn delete_role_for_user(&self, user: &str, role: &str) -> Result<()> {
        self.inner.write().delete_role_for_user(user, role)
    }

    pub fn load_policy(&self) -> Result<()> {
        self.inner.write().load_policy()
    }

    pub fn load_filtered_policy(&self, filter: PolicyFilter) -> Result<()> {
        self.inner.write().load_filtered_policy(filter)
    }

    pub fn save_policy(&self) -> Result<()> {
        self.inner.write().save_policy()
    }

    pub fn clear_policy(&self) {
        self.inner.write().clear_policy()
    }

    pub fn load_model(&self, model: Model) -> Result<()> {
        self.inner.write().load_model(model)
    }

    /// Attach a watcher whose callback reloads policy on this instance.
    /// The reload runs on a background tokio task so the transport thread
    /// never blocks on the enforcer lock.
    pub fn attach_watcher(&self, mut watcher: Box<dyn Watcher>) -> tokio::task::JoinHandle<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        watcher.set_update_callback(Box::new(move || {
            let _ = tx.send(());
        }));
        self.inner.write().set_watcher(watcher);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let outcome = inner.write().load_policy();
                match outcome {
                    Ok(()) => debug!(target: "warden::sync", "policy reloaded after watcher update"),
                    Err(e) => warn!(target: "warden::sync", error = %e, "watcher-triggered reload failed"),
                }
            }
        })
    }
}

// --- distributed reconciliation -------------------------------------------

/// Exchange format for cross-node reconciliation. `policy_count` and
/// `last_change_ms` form the source-of-truth ordering key; `node` breaks
/// ties deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub node: String,
    pub policy_count: usize,
    pub last_change_ms: i64,
    pub tables: Vec<(String, String, Vec<Rule>)>,
}

impl PolicySnapshot {
    pub fn capture(node: &str, enforcer: &Enforcer) -> PolicySnapshot {
        PolicySnapshot {
            node: node.to_string(),
            policy_count: enforcer.policy_count(),
            last_change_ms: enforcer.last_change_ms(),
            tables: enforcer.export_store(),
        }
    }

    fn ordering_key(&self) -> (usize, i64, &str) {
        (self.policy_count, self.last_change_ms, self.node.as_str())
    }
}

/// Access to the peer group. Implementations own discovery and transport;
/// the engine only needs reachable peer names and their snapshots.
pub trait PeerSync: Send + Sync {
    fn peers(&self) -> Vec<String>;
    fn fetch(&self, peer: &str) -> Result<PolicySnapshot>;
}

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Synced enforcer plus a periodic reconciliation task: every interval
/// the node picks the greatest `(policy_count, last_change_ms)` snapshot
/// among its peers and itself, and adopts it when it is not its own. A
/// peer joining or rejoining (set change) triggers an immediate pass.
pub struct DistributedEnforcer {
    node: String,
    synced: SyncedEnforcer,
    peers: Arc<dyn PeerSync>,
    interval: Duration,
    known_peers: Arc<Mutex<HashSet<String>>>,
    membership_changed: Arc<Notify>,
    shutdown: Arc<Notify>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl DistributedEnforcer {
    pub fn new(
        node: &str,
        synced: SyncedEnforcer,
        peers: Arc<dyn PeerSync>,
        interval: Duration,
    ) -> DistributedEnforcer {
        DistributedEnforcer {
            node: node.to_string(),
            synced,
            peers,
            interval,
            known_peers: Arc::new(Mutex::new(HashSet::new())),
            membership_changed: Arc::new(Notify::new()),
            shutdown: Arc::new(Notify::new()),
            task: None,
        }
    }

    /// Variant for deployments without a stable node naming scheme: the
    /// node identity is a generated v4 id. Note that reconciliation
    /// tie-breaks use the node name, so generated ids give an arbitrary
    /// but still deterministic winner per process lifetime.
    pub fn with_generated_node(
        synced: SyncedEnforcer,
        peers: Arc<dyn PeerSync>,
        interval: Duration,
    ) -> DistributedEnforcer {
        let node = uuid::Uuid::new_v4().to_string();
        DistributedEnforcer::new(&node, synced, peers, interval)
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn synced(&self) -> &SyncedEnforcer {
        &self.synced
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot::capture(&self.node, &self.synced.read())
    }

    /// Tell the reconciliation task the peer set changed; it wakes up and
    /// reconciles immediately.
    pub fn notify_membership_change(&self) {
        self.membership_changed.notify_one();
    }

    /// One reconciliation pass. Returns true when the local store was
    /// replaced by a peer's snapshot.
    pub fn reconcile_once(&self) -> Result<bool> {
        reconcile_pass(&self.node, &self.synced, self.peers.as_ref(), &self.known_peers)
    }

    /// Spawn the periodic task. Idempotent; the previous task is aborted.
    pub fn start(&mut self) {
        self.stop();
        let synced = self.synced.clone();
        let peers = self.peers.clone();
        let node = self.node.clone();
        let interval = self.interval;
        let known_peers = self.known_peers.clone();
        let membership = self.membership_changed.clone();
        let shutdown = self.shutdown.clone();
        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = membership.notified() => {
                        debug!(target: "warden::sync", node = %node, "membership change, reconciling now");
                    }
                    _ = shutdown.notified() => break,
                }
                if let Err(e) = reconcile_pass(&node, &synced, peers.as_ref(), &known_peers) {
                    warn!(target: "warden::sync", node = %node, error = %e, "reconciliation failed");
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            self.shutdown.notify_one();
            task.abort();
        }
    }

    /// Peers that answered during the most recent reconciliation pass.
    pub fn live_peers(&self) -> Vec<String> {
        let mut out: Vec<String> = self.known_peers.lock().iter().cloned().collect();
        out.sort();
        out
    }
}

impl Drop for DistributedEnforcer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reconcile_pass(
    node: &str,
    synced: &SyncedEnforcer,
    peers: &dyn PeerSync,
    known_peers: &Mutex<HashSet<String>>,
) -> Result<bool> {
    let local = PolicySnapshot::capture(node, &synced.read());
    let mut best = local.clone();
    let mut reachable: HashSet<String> = HashSet::new();
    for peer in peers.peers() {
        if peer == node {
            continue;
        }
        match peers.fetch(&peer) {
            Ok(snapshot) => {
                reachable.insert(peer);
                if snapshot.ordering_key() > best.ordering_key() {
                    best = snapshot;
                }
            }
            Err(e) => {
                warn!(target: "warden::sync", peer = %peer, error = %e, "peer unreachable during reconciliation");
            }
        }
    }
    *known_peers.lock() = reachable;
    if best.node == local.node {
        debug!(target: "warden::sync", node = %node, "local store is the source of truth");
        return Ok(false);
    }
    info!(
        target: "warden::sync",
        node = %node,
        source = %best.node,
        policies = best.policy_count,
        "adopting peer policy set"
    );
    let mut enforcer = synced.write();
    let store = store_from_snapshot(enforcer.model(), &best)?;
    enforcer.self_replace_store(store, best.last_change_ms)?;
    Ok(true)
}

fn store_from_snapshot(model: &Model, snapshot: &PolicySnapshot) -> Result<PolicyStore> {
    let mut store = PolicyStore::new();
    for (sec, ptype, rules) in &snapshot.tables {
        let expected = model.rule_len(sec, ptype).ok_or_else(|| {
            EngineError::distribution(format!(
                "snapshot from '{}' carries unknown policy type '{ptype}'",
                snapshot.node
            ))
        })?;
        for rule in rules {
            if rule.len() != expected {
                return Err(EngineError::distribution(format!(
                    "snapshot from '{}' has a malformed '{ptype}' rule: [{}]",
                    snapshot.node,
                    rule.join(", ")
                )));
            }
            store.add(sec, ptype, rule.clone())?;
        }
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn synced() -> SyncedEnforcer {
        SyncedEnforcer::new(Enforcer::from_text(MODEL, "").unwrap())
    }

    fn rule(fields: &[&str]) -> Rule {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn synced_enforcer_round_trip() {
        let e = synced();
        e.add_policy(rule(&["alice", "data1", "read"])).unwrap();
        assert!(e.enforce(&["alice", "data1", "read"]).unwrap());
        e.update_policy(rule(&["alice", "data1", "read"]), rule(&["alice", "data1", "write"]))
            .unwrap();
        assert!(!e.enforce(&["alice", "data1", "read"]).unwrap());
        assert!(e.enforce(&["alice", "data1", "write"]).unwrap());
    }

    #[test]
    fn concurrent_readers_and_writer() {
        let e = synced();
        e.add_policy(rule(&["alice", "data1", "read"])).unwrap();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let reader = e.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    // decision flips between runs but must never error
                    let _ = reader.enforce(&["alice", "data1", "read"]).unwrap();
                }
            }));
        }
        let writer = e.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..50 {
                let obj = format!("data{i}");
                writer.add_policy(rule(&["bob", &obj, "read"])).unwrap();
            }
        }));
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(e.get_policy().len(), 51);
    }

    #[test]
    fn snapshot_ordering_key() {
        let a = PolicySnapshot { node: "a".into(), policy_count: 10, last_change_ms: 5, tables: vec![] };
        let b = PolicySnapshot { node: "b".into(), policy_count: 12, last_change_ms: 1, tables: vec![] };
        assert!(b.ordering_key() > a.ordering_key());
        // count ties fall to timestamp, then node name
        let c = PolicySnapshot { node: "c".into(), policy_count: 12, last_change_ms: 1, tables: vec![] };
        assert!(c.ordering_key() > b.ordering_key());
    }

    #[test]
    fn store_from_snapshot_validates_against_the_model() {
        let model = Model::from_text(MODEL).unwrap();
        let good = PolicySnapshot {
            node: "n".into(),
            policy_count: 1,
            last_change_ms: 0,
            tables: vec![("p".into(), "p".into(), vec![rule(&["a", "o", "r"])])],
        };
        assert_eq!(store_from_snapshot(&model, &good).unwrap().len(), 1);

        let bad = PolicySnapshot {
            node: "n".into(),
            policy_count: 1,
            last_change_ms: 0,
            tables: vec![("p".into(), "p".into(), vec![rule(&["a", "o"])])],
        };
        assert!(store_from_snapshot(&model, &bad).is_err());

        let unknown = PolicySnapshot {
            node: "n".into(),
            policy_count: 1,
            last_change_ms: 0,
            tables: vec![("p".into(), "p9".into(), vec![rule(&["a", "o", "r"])])],
        };
        assert!(store_from_snapshot(&model, &unknown).is_err());
    }
}
