//! Role-inheritance graphs.
//! ------------------------
//! A role manager maintains one directed graph per domain whose edges are
//! direct inheritance links `user -> role`. Reachability queries run a
//! breadth-first traversal bounded by `max_hierarchy_level`; a visited set
//! tolerates cycles. Exceeding the bound uniformly means the link is
//! absent. No transitive closure is ever materialized: closures would be
//! invalidated on every mutation.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::warn;

use crate::error::Result;

pub const DEFAULT_MAX_HIERARCHY_LEVEL: usize = 10;

/// Opaque context threaded through conditional-link evaluation.
pub type RoleContext = serde_json::Value;

/// Condition handler resolved by name at traversal time. Receives the
/// edge's bound parameters and the caller-supplied context. Returning
/// `false` or an error makes the edge invisible to reachability.
pub type ConditionFn = Arc<dyn Fn(&[String], Option<&RoleContext>) -> Result<bool> + Send + Sync>;

/// Common interface over the role-manager variants. Capability flags tell
/// the enforcer what the variant understands; probing them replaces
/// downcasting when the `g`-function bindings are built.
pub trait RoleManager: Send + Sync {
    fn clear(&mut self);
    /// Idempotent edge insert.
    fn add_link(&mut self, user: &str, role: &str, domain: Option<&str>) -> Result<()>;
    /// Idempotent edge remove.
    fn delete_link(&mut self, user: &str, role: &str, domain: Option<&str>) -> Result<()>;
    /// Bounded transitive reachability; reflexive (`user == role` holds).
    fn has_link(&self, user: &str, role: &str, domain: Option<&str>) -> bool {
        self.has_link_ctx(user, role, domain, None)
    }
    fn has_link_ctx(
        &self,
        user: &str,
        role: &str,
        domain: Option<&str>,
        ctx: Option<&RoleContext>,
    ) -> bool;
    /// Direct out-neighbours only.
    fn get_roles(&self, user: &str, domain: Option<&str>) -> Vec<String>;
    /// Direct in-neighbours only.
    fn get_users(&self, role: &str, domain: Option<&str>) -> Vec<String>;
    /// Domains in which `user` participates in any edge.
    fn get_domains(&self, user: &str) -> Vec<String>;
    fn get_all_domains(&self) -> Vec<String>;

    fn supports_domain(&self) -> bool;
    fn supports_condition(&self) -> bool {
        false
    }
    fn supports_context(&self) -> bool {
        false
    }

    /// Register a condition handler by name. Only managers advertising
    /// `supports_condition` accept this.
    fn register_condition(&mut self, _name: &str, _f: ConditionFn) -> crate::error::Result<()> {
        Err(crate::error::EngineError::unsupported("register_condition"))
    }

    /// Attach a named condition to an edge. Only managers advertising
    /// `supports_condition` accept this.
    fn set_condition(
        &mut self,
        _user: &str,
        _role: &str,
        _domain: Option<&str>,
        _condition: LinkCondition,
    ) -> crate::error::Result<()> {
        Err(crate::error::EngineError::unsupported("set_condition"))
    }
}

/// Adjacency for one domain. Out- and in-edges are kept symmetric; sets
/// give idempotent inserts and deterministic enumeration order.
#[derive(Debug, Default, Clone)]
struct RoleGraph {
    out: BTreeMap<String, BTreeSet<String>>,
    inc: BTreeMap<String, BTreeSet<String>>,
}

impl RoleGraph {
    fn add_edge(&mut self, user: &str, role: &str) {
        self.out.entry(user.to_string()).or_default().insert(role.to_string());
        self.inc.entry(role.to_string()).or_default().insert(user.to_string());
    }

    fn del_edge(&mut self, user: &str, role: &str) {
        if let Some(set) = self.out.get_mut(user) {
            set.remove(role);
            if set.is_empty() {
                self.out.remove(user);
            }
        }
        if let Some(set) = self.inc.get_mut(role) {
            set.remove(user);
            if set.is_empty() {
                self.inc.remove(role);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.out.is_empty() && self.inc.is_empty()
    }
}

const NO_DOMAIN: &str = "";

fn domain_key(domain: Option<&str>) -> &str {
    domain.unwrap_or(NO_DOMAIN)
}

/// Default role manager, handling both 2-ary (`g = _, _`) and domain-aware
/// 3-ary (`g = _, _, _`) role definitions.
#[derive(Debug, Clone)]
pub struct DefaultRoleManager {
    max_hierarchy_level: usize,
    domains: HashMap<String, RoleGraph>,
}

impl DefaultRoleManager {
    pub fn new(max_hierarchy_level: usize) -> Self {
        DefaultRoleManager { max_hierarchy_level, domains: HashMap::new() }
    }

    fn graph(&self, domain: Option<&str>) -> Option<&RoleGraph> {
        self.domains.get(domain_key(domain))
    }

    /// BFS from `user` towards `role`, bounded by the hierarchy level.
    fn reachable(&self, graph: &RoleGraph, user: &str, role: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(user);
        let mut frontier: Vec<&str> = vec![user];
        for _level in 0..self.max_hierarchy_level {
            let mut next: Vec<&str> = Vec::new();
            for node in frontier {
                let Some(out) = graph.out.get(node) else { continue };
                for r in out {
                    if r == role {
                        return true;
                    }
                    if visited.insert(r.as_str()) {
                        next.push(r.as_str());
                    }
                }
            }
            if next.is_empty() {
                return false;
            }
            frontier = next;
        }
        // bound exhausted: the link is treated as absent
        false
    }
}

impl Default for DefaultRoleManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HIERARCHY_LEVEL)
    }
}

impl RoleManager for DefaultRoleManager {
    fn clear(&mut self) {
        self.domains.clear();
    }

    fn add_link(&mut self, user: &str, role: &str, domain: Option<&str>) -> Result<()> {
        self.domains
            .entry(domain_key(domain).to_string())
            .or_default()
            .add_edge(user, role);
        Ok(())
    }

    fn delete_link(&mut self, user: &str, role: &str, domain: Option<&str>) -> Result<()> {
        let key = domain_key(domain);
        if let Some(graph) = self.domains.get_mut(key) {
            graph.del_edge(user, role);
            if graph.is_empty() {
                self.domains.remove(key);
            }
        }
        Ok(())
    }

    fn has_link_ctx(
        &self,
        user: &str,
        role: &str,
        domain: Option<&str>,
        _ctx: Option<&RoleContext>,
    ) -> bool {
        if user == role {
            return true;
        }
        match self.graph(domain) {
            Some(graph) => self.reachable(graph, user, role),
            None => false,
        }
    }

    fn get_roles(&self, user: &str, domain: Option<&str>) -> Vec<String> {
        self.graph(domain)
            .and_then(|g| g.out.get(user))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn get_users(&self, role: &str, domain: Option<&str>) -> Vec<String> {
        self.graph(domain)
            .and_then(|g| g.inc.get(role))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn get_domains(&self, user: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .domains
            .iter()
            .filter(|(_, g)| g.out.contains_key(user) || g.inc.contains_key(user))
            .map(|(d, _)| d.clone())
            .collect();
        out.sort();
        out
    }

    fn get_all_domains(&self) -> Vec<String> {
        let mut out: Vec<String> = self.domains.keys().cloned().collect();
        out.sort();
        out
    }

    fn supports_domain(&self) -> bool {
        true
    }
}

/// Per-edge condition: the persisted form is a handler name plus bound
/// parameters, never a function reference, so grouping rules stay plain
/// string tuples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCondition {
    pub name: String,
    pub params: Vec<String>,
}

/// Role manager whose edges may carry named conditions, with an opaque
/// caller context threaded through evaluation.
pub struct ConditionalRoleManager {
    inner: DefaultRoleManager,
    /// (domain, user, role) -> condition
    conditions: HashMap<(String, String, String), LinkCondition>,
    handlers: HashMap<String, ConditionFn>,
}

impl ConditionalRoleManager {
    pub fn new(max_hierarchy_level: usize) -> Self {
        ConditionalRoleManager {
            inner: DefaultRoleManager::new(max_hierarchy_level),
            conditions: HashMap::new(),
            handlers: HashMap::new(),
        }
    }

    pub fn register_condition<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[String], Option<&RoleContext>) -> Result<bool> + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Arc::new(f));
    }

    /// Attach a condition to an existing or future edge.
    pub fn set_link_condition(
        &mut self,
        user: &str,
        role: &str,
        domain: Option<&str>,
        condition: LinkCondition,
    ) {
        let key = (domain_key(domain).to_string(), user.to_string(), role.to_string());
        self.conditions.insert(key, condition);
    }

    pub fn link_condition(&self, user: &str, role: &str, domain: Option<&str>) -> Option<&LinkCondition> {
        self.conditions
            .get(&(domain_key(domain).to_string(), user.to_string(), role.to_string()))
    }

    fn edge_passes(&self, domain: &str, user: &str, role: &str, ctx: Option<&RoleContext>) -> bool {
        let key = (domain.to_string(), user.to_string(), role.to_string());
        let Some(cond) = self.conditions.get(&key) else { return true };
        let Some(handler) = self.handlers.get(&cond.name) else {
            warn!(target: "warden::rbac", condition = %cond.name, "condition handler not registered; treating link as absent");
            return false;
        };
        match handler(&cond.params, ctx) {
            Ok(pass) => pass,
            Err(e) => {
                warn!(target: "warden::rbac", condition = %cond.name, error = %e, "condition handler failed; treating link as absent");
                false
            }
        }
    }
}

impl RoleManager for ConditionalRoleManager {
    fn clear(&mut self) {
        self.inner.clear();
        self.conditions.clear();
        // handlers survive: they are registrations, not graph state
    }

    fn add_link(&mut self, user: &str, role: &str, domain: Option<&str>) -> Result<()> {
        self.inner.add_link(user, role, domain)
    }

    fn delete_link(&mut self, user: &str, role: &str, domain: Option<&str>) -> Result<()> {
        let key = (domain_key(domain).to_string(), user.to_string(), role.to_string());
        self.conditions.remove(&key);
        self.inner.delete_link(user, role, domain)
    }

    fn has_link_ctx(
        &self,
        user: &str,
        role: &str,
        domain: Option<&str>,
        ctx: Option<&RoleContext>,
    ) -> bool {
        if user == role {
            return true;
        }
        let dkey = domain_key(domain);
        let Some(graph) = self.inner.graph(domain) else { return false };

        // BFS as in the default manager, but each edge is filtered through
        // its condition before being followed.
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(user);
        let mut frontier: Vec<&str> = vec![user];
        for _level in 0..self.inner.max_hierarchy_level {
            let mut next: Vec<&str> = Vec::new();
            for node in frontier {
                let Some(out) = graph.out.get(node) else { continue };
                for r in out {
                    if !self.edge_passes(dkey, node, r, ctx) {
                        continue;
                    }
                    if r == role {
                        return true;
                    }
                    if visited.insert(r.as_str()) {
                        next.push(r.as_str());
                    }
                }
            }
            if next.is_empty() {
                return false;
            }
            frontier = next;
        }
        false
    }

    fn get_roles(&self, user: &str, domain: Option<&str>) -> Vec<String> {
        // Direct-neighbour enumeration is structural: conditions gate
        // reachability, not edge listing.
        self.inner.get_roles(user, domain)
    }

    fn get_users(&self, role: &str, domain: Option<&str>) -> Vec<String> {
        self.inner.get_users(role, domain)
    }

    fn get_domains(&self, user: &str) -> Vec<String> {
        self.inner.get_domains(user)
    }

    fn get_all_domains(&self) -> Vec<String> {
        self.inner.get_all_domains()
    }

    fn supports_domain(&self) -> bool {
        true
    }
    fn supports_condition(&self) -> bool {
        true
    }
    fn supports_context(&self) -> bool {
        true
    }

    fn register_condition(&mut self, name: &str, f: ConditionFn) -> Result<()> {
        self.handlers.insert(name.to_string(), f);
        Ok(())
    }

    fn set_condition(
        &mut self,
        user: &str,
        role: &str,
        domain: Option<&str>,
        condition: LinkCondition,
    ) -> Result<()> {
        self.set_link_condition(user, role, domain, condition);
        Ok(())
    }
}
