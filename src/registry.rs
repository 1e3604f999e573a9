//! Named enforcer registry.
//!
//! Some deployments manage several enforcers (one per tenant, one per
//! service). Instead of a process-wide table, the registry is an explicit
//! value the caller owns and passes where needed; handles are cheap
//! clones of the underlying synchronized enforcer.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::enforcer::Enforcer;
use crate::sync::SyncedEnforcer;

#[derive(Default)]
pub struct EnforcerRegistry {
    entries: Mutex<HashMap<String, SyncedEnforcer>>,
}

impl EnforcerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under a name, replacing any previous holder, and return
    /// the shared handle.
    pub fn insert(&self, name: &str, enforcer: Enforcer) -> SyncedEnforcer {
        let synced = SyncedEnforcer::new(enforcer);
        self.entries.lock().insert(name.to_string(), synced.clone());
        synced
    }

    pub fn get(&self, name: &str) -> Option<SyncedEnforcer> {
        self.entries.lock().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> bool {
        self.entries.lock().remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut out: Vec<String> = self.entries.lock().keys().cloned().collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
