//! The enforcer: model + policy store + role graphs + evaluation.
//! ---------------------------------------------------------------
//! `enforce` binds a request tuple against the model's request definition,
//! walks the candidate rules of the policy type, evaluates the compiled
//! matcher per rule and aggregates the recorded effects. The path performs
//! no I/O and no allocation beyond the binding records; matchers are
//! compiled once per distinct expression string and cached.
//!
//! Mutation entry points live in `management` / `rbac_api`; lifecycle
//! operations (policy loading/saving, model replacement) live here.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::adapter::{Adapter, FileAdapter, MemoryAdapter, PolicyFilter};
use crate::cache::{DecisionCache, DEFAULT_CACHE_CAPACITY};
use crate::dispatcher::Dispatcher;
use crate::effect::{Effect, EffectStream};
use crate::error::{EngineError, Result};
use crate::expr::{self, EvalScope, Expr, Value};
use crate::functions::FunctionRegistry;
use crate::model::Model;
use crate::rbac::{DefaultRoleManager, RoleManager, DEFAULT_MAX_HIERARCHY_LEVEL};
use crate::storage::{PolicyStore, Rule};
use crate::watcher::Watcher;

pub type SharedRoleManager = Arc<RwLock<dyn RoleManager>>;

/// Which model keys an enforcement pass uses. The default context reads
/// `r`, `p`, `e` and `m`; secondary definitions (`r2`/`p2`/...) get their
/// own context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforceContext {
    pub rtype: String,
    pub ptype: String,
    pub etype: String,
    pub mtype: String,
}

impl Default for EnforceContext {
    fn default() -> Self {
        EnforceContext {
            rtype: "r".into(),
            ptype: "p".into(),
            etype: "e".into(),
            mtype: "m".into(),
        }
    }
}

impl EnforceContext {
    /// Context for a numbered definition family: `suffix = "2"` reads
    /// `r2`, `p2`, `e2`, `m2`.
    pub fn numbered(suffix: &str) -> Self {
        EnforceContext {
            rtype: format!("r{suffix}"),
            ptype: format!("p{suffix}"),
            etype: format!("e{suffix}"),
            mtype: format!("m{suffix}"),
        }
    }
}

static DEFAULT_CONTEXT: Lazy<EnforceContext> = Lazy::new(EnforceContext::default);

/// Extended enforcement result: the decision, every matching rule in
/// store order, and pipeline notes (disabled-enforcer marker, built-in
/// incidents).
#[derive(Debug, Clone, PartialEq)]
pub struct EnforceResult {
    pub allowed: bool,
    pub matched: Vec<Rule>,
    pub notes: Vec<String>,
}

pub struct Enforcer {
    pub(crate) model: Model,
    pub(crate) store: PolicyStore,
    pub(crate) adapter: Box<dyn Adapter>,
    pub(crate) watcher: Option<Box<dyn Watcher>>,
    pub(crate) dispatcher: Option<Box<dyn Dispatcher>>,
    pub(crate) role_managers: HashMap<String, SharedRoleManager>,
    pub(crate) functions: FunctionRegistry,
    matcher_cache: RwLock<HashMap<String, Arc<Expr>>>,
    pub(crate) cache: Option<Mutex<DecisionCache>>,

    pub(crate) enabled: bool,
    pub(crate) log_enabled: bool,
    pub(crate) auto_save: bool,
    pub(crate) auto_build_role_links: bool,
    pub(crate) auto_notify_watcher: bool,
    pub(crate) auto_notify_dispatcher: bool,
    pub(crate) accept_json_request: bool,

    pub(crate) filtered: bool,
    pub(crate) last_filter: Option<PolicyFilter>,
    /// Millisecond timestamp of the last local change; exchanged during
    /// multi-node reconciliation.
    pub(crate) last_change_ms: i64,
}

impl std::fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enforcer")
            .field("model", &self.model)
            .field("store", &self.store)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl Enforcer {
    /// Build an enforcer from a parsed model and an adapter, loading the
    /// adapter's policy set and building role links.
    pub fn new(model: Model, adapter: Box<dyn Adapter>) -> Result<Enforcer> {
        let mut e = Enforcer {
            model,
            store: PolicyStore::new(),
            adapter,
            watcher: None,
            dispatcher: None,
            role_managers: HashMap::new(),
            functions: FunctionRegistry::with_builtins(),
            matcher_cache: RwLock::new(HashMap::new()),
            cache: None,
            enabled: true,
            log_enabled: false,
            auto_save: true,
            auto_build_role_links: true,
            auto_notify_watcher: true,
            auto_notify_dispatcher: true,
            accept_json_request: false,
            filtered: false,
            last_filter: None,
            last_change_ms: chrono::Utc::now().timestamp_millis(),
        };
        e.init_role_managers();
        e.compile_model_matchers()?;
        e.load_policy()?;
        Ok(e)
    }

    /// Model file + policy file, via the CSV file adapter.
    pub fn from_files<P: AsRef<Path>, Q: AsRef<Path>>(model_path: P, policy_path: Q) -> Result<Enforcer> {
        let model = Model::from_file(model_path)?;
        Enforcer::new(model, Box::new(FileAdapter::new(policy_path)))
    }

    /// Model text + policy text, via the in-memory adapter.
    pub fn from_text(model_text: &str, policy_text: &str) -> Result<Enforcer> {
        let model = Model::from_text(model_text)?;
        Enforcer::new(model, Box::new(MemoryAdapter::from_text(policy_text)?))
    }

    fn init_role_managers(&mut self) {
        self.role_managers.clear();
        for gtype in self.model.roles.keys() {
            self.role_managers.insert(
                gtype.clone(),
                Arc::new(RwLock::new(DefaultRoleManager::new(DEFAULT_MAX_HIERARCHY_LEVEL))),
            );
        }
    }

    /// Compile every matcher in the model so malformed expressions fail at
    /// construction rather than on first use.
    fn compile_model_matchers(&mut self) -> Result<()> {
        for src in self.model.matchers.values() {
            self.compiled_matcher(src)?;
        }
        Ok(())
    }

    pub(crate) fn compiled_matcher(&self, src: &str) -> Result<Arc<Expr>> {
        if let Some(found) = self.matcher_cache.read().get(src) {
            return Ok(found.clone());
        }
        let compiled = Arc::new(expr::compile(src)?);
        self.matcher_cache.write().insert(src.to_string(), compiled.clone());
        Ok(compiled)
    }

    // --- configuration toggles -------------------------------------------

    pub fn enable_enforce(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enable_log(&mut self, enabled: bool) {
        self.log_enabled = enabled;
    }

    pub fn enable_auto_save(&mut self, enabled: bool) {
        self.auto_save = enabled;
    }

    pub fn enable_auto_build_role_links(&mut self, enabled: bool) {
        self.auto_build_role_links = enabled;
    }

    pub fn enable_auto_notify_watcher(&mut self, enabled: bool) {
        self.auto_notify_watcher = enabled;
    }

    pub fn enable_auto_notify_dispatcher(&mut self, enabled: bool) {
        self.auto_notify_dispatcher = enabled;
    }

    pub fn enable_accept_json_request(&mut self, enabled: bool) {
        self.accept_json_request = enabled;
    }

    /// Attach (or drop) the bounded decision cache.
    pub fn enable_cache(&mut self, enabled: bool) {
        self.cache = enabled.then(|| Mutex::new(DecisionCache::new(DEFAULT_CACHE_CAPACITY)));
    }

    pub fn set_cache_capacity(&mut self, capacity: usize) {
        self.cache = Some(Mutex::new(DecisionCache::new(capacity)));
    }

    pub fn set_watcher(&mut self, watcher: Box<dyn Watcher>) {
        self.watcher = Some(watcher);
    }

    pub fn set_dispatcher(&mut self, dispatcher: Box<dyn Dispatcher>) {
        self.dispatcher = Some(dispatcher);
    }

    /// Replace the role manager for one role type and rebuild its links
    /// from the grouping store.
    pub fn set_role_manager(&mut self, gtype: &str, rm: SharedRoleManager) -> Result<()> {
        if !self.model.roles.contains_key(gtype) {
            return Err(EngineError::configuration(format!(
                "model defines no role type '{gtype}'"
            )));
        }
        self.role_managers.insert(gtype.to_string(), rm);
        self.build_role_links_for(gtype)?;
        self.invalidate_cache();
        Ok(())
    }

    pub fn role_manager(&self, gtype: &str) -> Option<SharedRoleManager> {
        self.role_managers.get(gtype).cloned()
    }

    /// Register a custom matcher function. Registrations survive policy
    /// reloads; they are part of the enforcer, not the policy set.
    pub fn add_function<F>(&mut self, name: &str, arity: usize, f: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions.register(name, arity, f);
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Total number of stored policy and grouping rules.
    pub fn policy_count(&self) -> usize {
        self.store.len()
    }

    /// Millisecond timestamp of the most recent local change.
    pub fn last_change_ms(&self) -> i64 {
        self.last_change_ms
    }

    /// Flat `(sec, ptype, rules)` export of the whole store, as exchanged
    /// between nodes during reconciliation.
    pub fn export_store(&self) -> Vec<(String, String, Vec<Rule>)> {
        self.store.export()
    }

    pub fn is_filtered(&self) -> bool {
        self.filtered
    }

    /// The filter used by the most recent filtered load, for introspection.
    pub fn current_filter(&self) -> Option<&PolicyFilter> {
        self.last_filter.as_ref()
    }

    pub(crate) fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_change_ms = chrono::Utc::now().timestamp_millis();
    }

    // --- role links ------------------------------------------------------

    /// Rebuild every role graph from the grouping store.
    pub fn build_role_links(&mut self) -> Result<()> {
        let gtypes: Vec<String> = self.role_managers.keys().cloned().collect();
        for gtype in gtypes {
            self.build_role_links_for(&gtype)?;
        }
        Ok(())
    }

    pub(crate) fn build_role_links_for(&mut self, gtype: &str) -> Result<()> {
        let Some(rm) = self.role_managers.get(gtype) else {
            return Err(EngineError::configuration(format!("no role manager for '{gtype}'")));
        };
        let mut rm = rm.write();
        rm.clear();
        for rule in self.store.rules("g", gtype) {
            let domain = rule.get(2).map(|d| d.as_str());
            rm.add_link(&rule[0], &rule[1], domain)?;
        }
        Ok(())
    }

    /// Incremental counterpart: apply exactly the given edges without
    /// clearing the graph. The only legal way to keep graphs consistent
    /// when auto-build is off.
    pub fn build_incremental_role_links(
        &mut self,
        add: bool,
        gtype: &str,
        rules: &[Rule],
    ) -> Result<()> {
        let Some(rm) = self.role_managers.get(gtype) else {
            return Err(EngineError::configuration(format!("no role manager for '{gtype}'")));
        };
        let mut rm = rm.write();
        for rule in rules {
            if rule.len() < 2 {
                return Err(EngineError::validation(format!(
                    "grouping rule needs at least two fields: [{}]",
                    rule.join(", ")
                )));
            }
            let domain = rule.get(2).map(|d| d.as_str());
            if add {
                rm.add_link(&rule[0], &rule[1], domain)?;
            } else {
                rm.delete_link(&rule[0], &rule[1], domain)?;
            }
        }
        Ok(())
    }

    // --- lifecycle -------------------------------------------------------

    /// Reload the full policy set from the adapter, clearing any filtered
    /// state. The watcher-triggered reload path funnels here too.
    pub fn load_policy(&mut self) -> Result<()> {
        let mut fresh = PolicyStore::new();
        self.adapter.load_policy(&self.model, &mut fresh)?;
        self.store = fresh;
        self.filtered = false;
        self.last_filter = None;
        if self.auto_build_role_links {
            self.build_role_links()?;
        }
        self.invalidate_cache();
        self.touch();
        Ok(())
    }

    /// Partial load through a filtering adapter. A non-empty filter puts
    /// the enforcer into the filtered state, which blocks full saves until
    /// cleared.
    pub fn load_filtered_policy(&mut self, filter: PolicyFilter) -> Result<()> {
        if !self.adapter.supports_filtering() {
            return Err(EngineError::unsupported("load_filtered_policy"));
        }
        let mut fresh = PolicyStore::new();
        self.adapter.load_filtered_policy(&self.model, &mut fresh, &filter)?;
        self.store = fresh;
        self.filtered = !filter.is_empty();
        self.last_filter = Some(filter);
        if self.auto_build_role_links {
            self.build_role_links()?;
        }
        self.invalidate_cache();
        self.touch();
        Ok(())
    }

    /// Append-only filtered load on top of the current store contents.
    pub fn load_incremental_filtered_policy(&mut self, filter: PolicyFilter) -> Result<()> {
        if !self.adapter.supports_filtering() {
            return Err(EngineError::unsupported("load_incremental_filtered_policy"));
        }
        self.adapter
            .load_incremental_filtered_policy(&self.model, &mut self.store, &filter)?;
        if !filter.is_empty() {
            self.filtered = true;
        }
        self.last_filter = Some(filter);
        if self.auto_build_role_links {
            self.build_role_links()?;
        }
        self.invalidate_cache();
        self.touch();
        Ok(())
    }

    /// Persist the full in-memory set. Refused while a filtered subset is
    /// loaded: a full save would overwrite the backing store with the
    /// subset.
    pub fn save_policy(&mut self) -> Result<()> {
        if self.filtered {
            return Err(EngineError::validation(
                "cannot save a filtered policy set; clear_policy or a full load first".to_string(),
            ));
        }
        self.adapter.save_policy(&self.store)?;
        if self.auto_notify_watcher {
            if let Some(w) = self.watcher.as_mut() {
                if let Err(e) = w.update_for_save_policy() {
                    warn!(target: "warden::enforcer", error = %e, "watcher notification failed");
                }
            }
        }
        Ok(())
    }

    /// Drop every policy and grouping rule and reset the filtered state.
    /// In-memory only; pair with `save_policy` to persist the empty set.
    pub fn clear_policy(&mut self) {
        self.store.clear();
        self.filtered = false;
        self.last_filter = None;
        for rm in self.role_managers.values() {
            rm.write().clear();
        }
        self.invalidate_cache();
        self.touch();
        if self.auto_notify_dispatcher {
            if let Some(d) = self.dispatcher.as_mut() {
                if let Err(e) = d.clear_policy() {
                    warn!(target: "warden::enforcer", error = %e, "dispatcher notification failed");
                }
            }
        }
        if self.auto_notify_watcher {
            if let Some(w) = self.watcher.as_mut() {
                if let Err(e) = w.update() {
                    warn!(target: "warden::enforcer", error = %e, "watcher notification failed");
                }
            }
        }
    }

    /// Atomically replace the model. The policy store is cleared to keep
    /// rule lengths consistent with the new definitions; reload policy
    /// afterwards.
    pub fn load_model(&mut self, model: Model) -> Result<()> {
        // validate the new matchers before touching anything
        for src in model.matchers.values() {
            expr::compile(src)?;
        }
        self.model = model;
        self.matcher_cache.write().clear();
        self.compile_model_matchers()?;
        self.store.clear();
        self.filtered = false;
        self.last_filter = None;
        self.init_role_managers();
        self.invalidate_cache();
        self.touch();
        Ok(())
    }

    // --- enforcement -----------------------------------------------------

    pub fn enforce<S: AsRef<str>>(&self, request: &[S]) -> Result<bool> {
        let ctx = &*DEFAULT_CONTEXT;
        if let Some(cache) = &self.cache {
            let key = DecisionCache::fingerprint(request);
            if let Some(hit) = cache.lock().get(key) {
                return Ok(hit);
            }
            let decision = self.enforce_internal(ctx, request, None, false)?.allowed;
            cache.lock().insert(key, decision);
            return Ok(decision);
        }
        Ok(self.enforce_internal(ctx, request, None, false)?.allowed)
    }

    /// Decision plus the matching rules in store order.
    pub fn enforce_ex<S: AsRef<str>>(&self, request: &[S]) -> Result<EnforceResult> {
        self.enforce_internal(&DEFAULT_CONTEXT, request, None, true)
    }

    /// Evaluate with an overriding matcher expression (compiled on first
    /// use and cached by string identity). Bypasses the decision cache.
    pub fn enforce_with_matcher<S: AsRef<str>>(&self, matcher: &str, request: &[S]) -> Result<bool> {
        Ok(self
            .enforce_internal(&DEFAULT_CONTEXT, request, Some(matcher), false)?
            .allowed)
    }

    pub fn enforce_ex_with_matcher<S: AsRef<str>>(
        &self,
        matcher: &str,
        request: &[S],
    ) -> Result<EnforceResult> {
        self.enforce_internal(&DEFAULT_CONTEXT, request, Some(matcher), true)
    }

    /// Evaluate under an explicit definition-family context (`r2`/`p2`/...).
    pub fn enforce_with_context<S: AsRef<str>>(
        &self,
        ctx: &EnforceContext,
        request: &[S],
    ) -> Result<bool> {
        Ok(self.enforce_internal(ctx, request, None, false)?.allowed)
    }

    pub fn batch_enforce<S: AsRef<str>>(&self, requests: &[Vec<S>]) -> Result<Vec<bool>> {
        let mut out = Vec::with_capacity(requests.len());
        for request in requests {
            out.push(self.enforce(request)?);
        }
        Ok(out)
    }

    fn request_values<S: AsRef<str>>(&self, request: &[S]) -> Vec<Value> {
        request
            .iter()
            .map(|field| {
                let field = field.as_ref();
                if self.accept_json_request && field.trim_start().starts_with('{') {
                    if let Ok(v) = serde_json::from_str::<serde_json::Value>(field) {
                        if v.is_object() {
                            return Value::Json(v);
                        }
                    }
                }
                Value::Str(field.to_string())
            })
            .collect()
    }

    fn enforce_internal<S: AsRef<str>>(
        &self,
        ctx: &EnforceContext,
        request: &[S],
        matcher_override: Option<&str>,
        collect: bool,
    ) -> Result<EnforceResult> {
        if !self.enabled {
            return Ok(EnforceResult {
                allowed: true,
                matched: vec![],
                notes: vec!["enforcer disabled".to_string()],
            });
        }

        let request_def = self.model.requests.get(&ctx.rtype).ok_or_else(|| {
            EngineError::configuration(format!("model defines no request type '{}'", ctx.rtype))
        })?;
        if request.len() != request_def.tokens.len() {
            return Err(EngineError::evaluation(format!(
                "request has {} fields but '{}' defines {}",
                request.len(),
                ctx.rtype,
                request_def.tokens.len()
            )));
        }
        let policy_def = self.model.policies.get(&ctx.ptype).ok_or_else(|| {
            EngineError::configuration(format!("model defines no policy type '{}'", ctx.ptype))
        })?;
        let effect_rule = *self.model.effects.get(&ctx.etype).ok_or_else(|| {
            EngineError::configuration(format!("model defines no effect type '{}'", ctx.etype))
        })?;
        let matcher_src = match matcher_override {
            Some(src) => src,
            None => self.model.matchers.get(&ctx.mtype).ok_or_else(|| {
                EngineError::configuration(format!("model defines no matcher '{}'", ctx.mtype))
            })?,
        };
        let matcher = self.compiled_matcher(matcher_src)?;

        let request_values = self.request_values(request);
        let eft_index = self.model.eft_index(&ctx.ptype);
        let incidents: RefCell<Vec<String>> = RefCell::new(Vec::new());

        let mut stream = EffectStream::default();
        let mut matched: Vec<Rule> = Vec::new();

        let rules = self.store.rules("p", &ctx.ptype);
        if rules.is_empty() {
            // no candidate rules: evaluate once with empty-string policy
            // bindings so matchers that ignore `p` still work
            let scope = MatcherScope {
                rkey: &ctx.rtype,
                rtokens: &request_def.tokens,
                rvalues: &request_values,
                pkey: &ctx.ptype,
                ptokens: &policy_def.tokens,
                rule: None,
                functions: &self.functions,
                role_managers: &self.role_managers,
                incidents: &incidents,
            };
            if expr::eval_to_bool(&matcher, &scope)? {
                stream.record(Effect::Allow);
            }
        } else {
            for rule in rules {
                let scope = MatcherScope {
                    rkey: &ctx.rtype,
                    rtokens: &request_def.tokens,
                    rvalues: &request_values,
                    pkey: &ctx.ptype,
                    ptokens: &policy_def.tokens,
                    rule: Some(rule),
                    functions: &self.functions,
                    role_managers: &self.role_managers,
                    incidents: &incidents,
                };
                if expr::eval_to_bool(&matcher, &scope)? {
                    stream.record(Effect::from_field(eft_index.and_then(|i| rule.get(i)).map(|s| s.as_str())));
                    if collect {
                        matched.push(rule.clone());
                    }
                    if !collect && effect_rule.can_short_circuit(&stream) {
                        break;
                    }
                }
            }
        }

        let allowed = stream.decide(effect_rule);
        let notes = incidents.into_inner();
        if self.log_enabled {
            let fields: Vec<&str> = request.iter().map(|f| f.as_ref()).collect();
            info!(
                target: "warden::enforcer",
                request = ?fields,
                allowed,
                matched = matched.len(),
                "enforce"
            );
        }
        Ok(EnforceResult { allowed, matched, notes })
    }
}

/// Binding record for one matcher evaluation: the request values, one
/// candidate rule (or empty-string bindings), the function registry and
/// the role managers backing `g(...)` calls.
struct MatcherScope<'a> {
    rkey: &'a str,
    rtokens: &'a [String],
    rvalues: &'a [Value],
    pkey: &'a str,
    ptokens: &'a [String],
    rule: Option<&'a Rule>,
    functions: &'a FunctionRegistry,
    role_managers: &'a HashMap<String, SharedRoleManager>,
    incidents: &'a RefCell<Vec<String>>,
}

impl<'a> MatcherScope<'a> {
    fn json_drill(base: Value, path: &[String]) -> Option<Value> {
        if path.is_empty() {
            return Some(base);
        }
        let Value::Json(mut v) = base else { return None };
        for seg in path {
            v = v.get(seg)?.clone();
        }
        Some(match v {
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Json(serde_json::Value::Number(n)),
            },
            other => Value::Json(other),
        })
    }
}

impl<'a> EvalScope for MatcherScope<'a> {
    fn field(&self, scope: &str, path: &[String]) -> Option<Value> {
        let (token, rest) = path.split_first()?;
        if scope == self.rkey {
            let idx = self.rtokens.iter().position(|t| t == token)?;
            return Self::json_drill(self.rvalues.get(idx)?.clone(), rest);
        }
        if scope == self.pkey {
            let idx = self.ptokens.iter().position(|t| t == token)?;
            return match self.rule {
                Some(rule) => rule.get(idx).map(|f| Value::Str(f.clone())),
                None => Some(Value::Str(String::new())),
            };
        }
        None
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        if let Some(rm) = self.role_managers.get(name) {
            return match args {
                [user, role] => {
                    Ok(Value::Bool(rm.read().has_link(&user.to_text(), &role.to_text(), None)))
                }
                [user, role, domain] => Ok(Value::Bool(rm.read().has_link(
                    &user.to_text(),
                    &role.to_text(),
                    Some(&domain.to_text()),
                ))),
                _ => Err(EngineError::evaluation(format!(
                    "role function '{name}' expects 2 or 3 arguments, got {}",
                    args.len()
                ))),
            };
        }
        if !self.functions.contains(name) {
            return Err(EngineError::evaluation(format!("unknown function '{name}'")));
        }
        if self.functions.arity(name) != Some(args.len()) {
            return Err(EngineError::evaluation(format!(
                "function '{name}' called with {} arguments",
                args.len()
            )));
        }
        match self.functions.call(name, args) {
            Ok(v) => Ok(v),
            Err(e) => {
                // Built-ins are total: a malformed pattern makes this rule
                // not match, and the incident shows up in explanations.
                self.incidents.borrow_mut().push(format!("{name}: {e}"));
                Ok(Value::Bool(false))
            }
        }
    }
}
