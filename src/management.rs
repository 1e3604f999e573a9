//! Management API: idempotent, transactional policy mutation.
//! -----------------------------------------------------------
//! Every mutation runs the same pipeline: precondition check, in-memory
//! store mutation, role-graph update for grouping changes, cache
//! invalidation, persistence (incremental when the adapter supports it,
//! full save otherwise), then dispatcher and watcher notification. A
//! persistence failure rolls the in-memory change back and surfaces the
//! error; notification failures are logged and never fail the mutation.
//!
//! The `self_*` family applies remotely-received changes without
//! re-notifying, so changes do not echo between peers.

use tracing::warn;

use crate::enforcer::Enforcer;
use crate::error::{EngineError, Result};
use crate::storage::{PolicyStore, Rule};

/// What to broadcast after a mutation commits.
enum Change<'a> {
    Add { rules: &'a [Rule] },
    Remove { rules: &'a [Rule] },
    RemoveFiltered { field_index: usize, values: &'a [String] },
    Update { old_rules: &'a [Rule], new_rules: &'a [Rule] },
    UpdateFiltered { old_rules: &'a [Rule], new_rules: &'a [Rule] },
}

impl Enforcer {
    // --- pipeline helpers -------------------------------------------------

    fn validate_rule(&self, sec: &str, ptype: &str, rule: &[String]) -> Result<()> {
        let expected = self.model.rule_len(sec, ptype).ok_or_else(|| {
            EngineError::validation(format!("policy type '{ptype}' is not defined by the model"))
        })?;
        if rule.len() != expected {
            return Err(EngineError::validation(format!(
                "rule length {} does not match definition '{ptype}' ({expected} fields): [{}]",
                rule.len(),
                rule.join(", ")
            )));
        }
        if rule.iter().any(|f| f.is_empty()) {
            return Err(EngineError::validation(format!(
                "rule contains an empty field: [{}]",
                rule.join(", ")
            )));
        }
        Ok(())
    }

    fn persist_after(&mut self, sec: &str, ptype: &str, change: &Change<'_>) -> Result<()> {
        if !self.auto_save {
            return Ok(());
        }
        if self.adapter.supports_incremental() {
            return match change {
                Change::Add { rules } => self.adapter.add_policies(sec, ptype, rules),
                Change::Remove { rules } => self.adapter.remove_policies(sec, ptype, rules),
                Change::RemoveFiltered { field_index, values } => {
                    self.adapter.remove_filtered_policy(sec, ptype, *field_index, values)
                }
                Change::Update { old_rules, new_rules }
                | Change::UpdateFiltered { old_rules, new_rules } => {
                    self.adapter.remove_policies(sec, ptype, old_rules)?;
                    self.adapter.add_policies(sec, ptype, new_rules)
                }
            };
        }
        // whole-store fallback; refused while a filtered subset is loaded
        if self.filtered {
            return Err(EngineError::validation(
                "cannot auto-save a filtered policy set; disable auto_save or clear the filter"
                    .to_string(),
            ));
        }
        self.adapter.save_policy(&self.store)
    }

    fn notify_after(&mut self, sec: &str, ptype: &str, change: &Change<'_>) {
        if self.auto_notify_dispatcher {
            if let Some(d) = self.dispatcher.as_mut() {
                let outcome = match change {
                    Change::Add { rules } => d.add_policies(sec, ptype, rules),
                    Change::Remove { rules } => d.remove_policies(sec, ptype, rules),
                    Change::RemoveFiltered { field_index, values } => {
                        d.remove_filtered_policy(sec, ptype, *field_index, values)
                    }
                    Change::Update { old_rules, new_rules } => {
                        if old_rules.len() == 1 && new_rules.len() == 1 {
                            d.update_policy(sec, ptype, &old_rules[0], &new_rules[0])
                        } else {
                            d.update_policies(sec, ptype, old_rules, new_rules)
                        }
                    }
                    Change::UpdateFiltered { old_rules, new_rules } => {
                        d.update_filtered_policies(sec, ptype, old_rules, new_rules)
                    }
                };
                if let Err(e) = outcome {
                    warn!(target: "warden::management", error = %e, "dispatcher notification failed");
                }
            }
        }
        if self.auto_notify_watcher {
            if let Some(w) = self.watcher.as_mut() {
                let outcome = match change {
                    Change::Add { rules } if rules.len() == 1 => {
                        w.update_for_add_policy(sec, ptype, &rules[0])
                    }
                    Change::Remove { rules } if rules.len() == 1 => {
                        w.update_for_remove_policy(sec, ptype, &rules[0])
                    }
                    Change::RemoveFiltered { field_index, values } => {
                        w.update_for_remove_filtered_policy(sec, ptype, *field_index, values)
                    }
                    Change::Update { old_rules, new_rules }
                        if old_rules.len() == 1 && new_rules.len() == 1 =>
                    {
                        w.update_for_update_policy(sec, ptype, &old_rules[0], &new_rules[0])
                    }
                    Change::Update { old_rules, new_rules }
                    | Change::UpdateFiltered { old_rules, new_rules } => {
                        w.update_for_update_policies(sec, ptype, old_rules, new_rules)
                    }
                    _ => w.update(),
                };
                if let Err(e) = outcome {
                    warn!(target: "warden::management", error = %e, "watcher notification failed");
                }
            }
        }
    }

    fn apply_links(&mut self, add: bool, sec: &str, ptype: &str, rules: &[Rule]) -> Result<()> {
        if sec != "g" || !self.auto_build_role_links || rules.is_empty() {
            return Ok(());
        }
        self.build_incremental_role_links(add, ptype, rules)
    }

    /// Restore one policy type to a snapshot after a failed persistence
    /// step, rebuilding its role graph when it is a grouping type.
    fn restore_snapshot(&mut self, sec: &str, ptype: &str, snapshot: Vec<Rule>) {
        self.store.set_rules(sec, ptype, snapshot);
        if sec == "g" && self.auto_build_role_links {
            if let Err(e) = self.build_role_links_for(ptype) {
                warn!(target: "warden::management", error = %e, "role link rebuild failed during rollback");
            }
        }
        self.invalidate_cache();
    }

    // --- internal cores ---------------------------------------------------

    /// Shared add path. With `skip_existing`, rules already present are
    /// silently dropped; otherwise any duplicate fails the whole call.
    /// Returns the number of rules actually added.
    pub(crate) fn internal_add(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: &[Rule],
        skip_existing: bool,
        notify: bool,
    ) -> Result<usize> {
        for rule in rules {
            self.validate_rule(sec, ptype, rule)?;
        }
        let to_add: Vec<Rule> = if skip_existing {
            let mut fresh: Vec<Rule> = Vec::new();
            for rule in rules {
                if !self.store.has(sec, ptype, rule) && !fresh.contains(rule) {
                    fresh.push(rule.clone());
                }
            }
            fresh
        } else {
            rules.to_vec()
        };
        if to_add.is_empty() {
            return Ok(0);
        }

        let snapshot = self.store.get(sec, ptype);
        self.store.add_batch(sec, ptype, &to_add)?;
        self.apply_links(true, sec, ptype, &to_add)?;
        self.invalidate_cache();
        self.touch();

        if let Err(e) = self.persist_after(sec, ptype, &Change::Add { rules: &to_add }) {
            self.restore_snapshot(sec, ptype, snapshot);
            return Err(e);
        }
        if notify {
            self.notify_after(sec, ptype, &Change::Add { rules: &to_add });
        }
        Ok(to_add.len())
    }

    pub(crate) fn internal_remove(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: &[Rule],
        notify: bool,
    ) -> Result<()> {
        if rules.is_empty() {
            return Ok(());
        }
        let snapshot = self.store.get(sec, ptype);
        self.store.remove_batch(sec, ptype, rules)?;
        self.apply_links(false, sec, ptype, rules)?;
        self.invalidate_cache();
        self.touch();

        if let Err(e) = self.persist_after(sec, ptype, &Change::Remove { rules }) {
            self.restore_snapshot(sec, ptype, snapshot);
            return Err(e);
        }
        if notify {
            self.notify_after(sec, ptype, &Change::Remove { rules });
        }
        Ok(())
    }

    /// Returns the removed rules in store order; an empty result means
    /// nothing matched and no side effects ran.
    pub(crate) fn internal_remove_filtered(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        values: &[String],
        notify: bool,
    ) -> Result<Vec<Rule>> {
        let snapshot = self.store.get(sec, ptype);
        let removed = self.store.remove_filtered(sec, ptype, field_index, values)?;
        if removed.is_empty() {
            return Ok(removed);
        }
        self.apply_links(false, sec, ptype, &removed)?;
        self.invalidate_cache();
        self.touch();

        if let Err(e) =
            self.persist_after(sec, ptype, &Change::RemoveFiltered { field_index, values })
        {
            self.restore_snapshot(sec, ptype, snapshot);
            return Err(e);
        }
        if notify {
            self.notify_after(sec, ptype, &Change::RemoveFiltered { field_index, values });
        }
        Ok(removed)
    }

    /// Pairwise update keeping each rule's position. Equal-length input
    /// lists are required; preconditions are checked against the projected
    /// final state before anything mutates.
    pub(crate) fn internal_update(
        &mut self,
        sec: &str,
        ptype: &str,
        old_rules: &[Rule],
        new_rules: &[Rule],
        notify: bool,
    ) -> Result<()> {
        if old_rules.len() != new_rules.len() {
            return Err(EngineError::validation(format!(
                "update needs equal-length lists, got {} and {}",
                old_rules.len(),
                new_rules.len()
            )));
        }
        if old_rules.is_empty() {
            return Ok(());
        }
        for rule in old_rules.iter().chain(new_rules.iter()) {
            self.validate_rule(sec, ptype, rule)?;
        }
        // project the final rule set to reject conflicts up front
        {
            let mut projected: std::collections::HashSet<Rule> =
                self.store.get(sec, ptype).into_iter().collect();
            for old in old_rules {
                if !projected.remove(old) {
                    return Err(EngineError::validation(format!(
                        "rule not found in '{ptype}': [{}]",
                        old.join(", ")
                    )));
                }
            }
            for new in new_rules {
                if !projected.insert(new.clone()) {
                    return Err(EngineError::validation(format!(
                        "rule already exists in '{ptype}': [{}]",
                        new.join(", ")
                    )));
                }
            }
        }
        // swap in place by position so priority order survives; indices
        // are resolved against the pristine snapshot so pairwise swaps
        // (old/new sets overlapping) apply correctly
        let snapshot = self.store.get(sec, ptype);
        let mut updated = snapshot.clone();
        for (old, new) in old_rules.iter().zip(new_rules.iter()) {
            let idx = snapshot.iter().position(|r| r == old).expect("validated above");
            updated[idx] = new.clone();
        }
        self.store.set_rules(sec, ptype, updated);
        self.apply_links(false, sec, ptype, old_rules)?;
        self.apply_links(true, sec, ptype, new_rules)?;
        self.invalidate_cache();
        self.touch();

        if let Err(e) = self.persist_after(sec, ptype, &Change::Update { old_rules, new_rules }) {
            self.restore_snapshot(sec, ptype, snapshot);
            return Err(e);
        }
        if notify {
            self.notify_after(sec, ptype, &Change::Update { old_rules, new_rules });
        }
        Ok(())
    }

    /// Replace the matching subset with `new_rules`. Returns the replaced
    /// rules.
    pub(crate) fn internal_update_filtered(
        &mut self,
        sec: &str,
        ptype: &str,
        new_rules: &[Rule],
        field_index: usize,
        values: &[String],
        notify: bool,
    ) -> Result<Vec<Rule>> {
        for rule in new_rules {
            self.validate_rule(sec, ptype, rule)?;
        }
        let snapshot = self.store.get(sec, ptype);
        let old_rules = self.store.remove_filtered(sec, ptype, field_index, values)?;
        if let Err(e) = self.store.add_batch(sec, ptype, new_rules) {
            self.store.set_rules(sec, ptype, snapshot);
            return Err(e);
        }
        self.apply_links(false, sec, ptype, &old_rules)?;
        self.apply_links(true, sec, ptype, new_rules)?;
        self.invalidate_cache();
        self.touch();

        if let Err(e) = self.persist_after(
            sec,
            ptype,
            &Change::UpdateFiltered { old_rules: &old_rules, new_rules },
        ) {
            self.restore_snapshot(sec, ptype, snapshot);
            return Err(e);
        }
        if notify {
            self.notify_after(
                sec,
                ptype,
                &Change::UpdateFiltered { old_rules: &old_rules, new_rules },
            );
        }
        Ok(old_rules)
    }

    // --- policy read surface ---------------------------------------------

    pub fn get_policy(&self) -> Vec<Rule> {
        self.get_named_policy("p")
    }

    pub fn get_named_policy(&self, ptype: &str) -> Vec<Rule> {
        self.store.get("p", ptype)
    }

    pub fn get_filtered_policy(&self, field_index: usize, values: &[String]) -> Vec<Rule> {
        self.get_filtered_named_policy("p", field_index, values)
    }

    pub fn get_filtered_named_policy(
        &self,
        ptype: &str,
        field_index: usize,
        values: &[String],
    ) -> Vec<Rule> {
        self.store.filter("p", ptype, field_index, values)
    }

    pub fn has_policy(&self, rule: &[String]) -> bool {
        self.has_named_policy("p", rule)
    }

    pub fn has_named_policy(&self, ptype: &str, rule: &[String]) -> bool {
        self.store.has("p", ptype, rule)
    }

    pub fn get_all_subjects(&self) -> Vec<String> {
        self.get_all_named_subjects("p")
    }

    pub fn get_all_named_subjects(&self, ptype: &str) -> Vec<String> {
        self.store.values("p", ptype, 0)
    }

    pub fn get_all_objects(&self) -> Vec<String> {
        self.get_all_named_objects("p")
    }

    pub fn get_all_named_objects(&self, ptype: &str) -> Vec<String> {
        self.store.values("p", ptype, 1)
    }

    pub fn get_all_actions(&self) -> Vec<String> {
        self.get_all_named_actions("p")
    }

    pub fn get_all_named_actions(&self, ptype: &str) -> Vec<String> {
        self.store.values("p", ptype, 2)
    }

    pub fn get_all_roles(&self) -> Vec<String> {
        self.get_all_named_roles("g")
    }

    pub fn get_all_named_roles(&self, ptype: &str) -> Vec<String> {
        self.store.values("g", ptype, 1)
    }

    // --- policy write surface --------------------------------------------

    pub fn add_policy(&mut self, rule: Rule) -> Result<()> {
        self.add_named_policy("p", rule)
    }

    pub fn add_named_policy(&mut self, ptype: &str, rule: Rule) -> Result<()> {
        self.internal_add("p", ptype, &[rule], false, true).map(|_| ())
    }

    pub fn add_policies(&mut self, rules: Vec<Rule>) -> Result<()> {
        self.add_named_policies("p", rules)
    }

    pub fn add_named_policies(&mut self, ptype: &str, rules: Vec<Rule>) -> Result<()> {
        self.internal_add("p", ptype, &rules, false, true).map(|_| ())
    }

    /// Skip-duplicates bulk add; returns how many rules were new.
    pub fn add_policies_ex(&mut self, rules: Vec<Rule>) -> Result<usize> {
        self.add_named_policies_ex("p", rules)
    }

    pub fn add_named_policies_ex(&mut self, ptype: &str, rules: Vec<Rule>) -> Result<usize> {
        self.internal_add("p", ptype, &rules, true, true)
    }

    pub fn remove_policy(&mut self, rule: Rule) -> Result<()> {
        self.remove_named_policy("p", rule)
    }

    pub fn remove_named_policy(&mut self, ptype: &str, rule: Rule) -> Result<()> {
        self.internal_remove("p", ptype, &[rule], true)
    }

    pub fn remove_policies(&mut self, rules: Vec<Rule>) -> Result<()> {
        self.remove_named_policies("p", rules)
    }

    pub fn remove_named_policies(&mut self, ptype: &str, rules: Vec<Rule>) -> Result<()> {
        self.internal_remove("p", ptype, &rules, true)
    }

    pub fn remove_filtered_policy(&mut self, field_index: usize, values: Vec<String>) -> Result<Vec<Rule>> {
        self.remove_filtered_named_policy("p", field_index, values)
    }

    pub fn remove_filtered_named_policy(
        &mut self,
        ptype: &str,
        field_index: usize,
        values: Vec<String>,
    ) -> Result<Vec<Rule>> {
        self.internal_remove_filtered("p", ptype, field_index, &values, true)
    }

    pub fn update_policy(&mut self, old_rule: Rule, new_rule: Rule) -> Result<()> {
        self.update_named_policy("p", old_rule, new_rule)
    }

    pub fn update_named_policy(&mut self, ptype: &str, old_rule: Rule, new_rule: Rule) -> Result<()> {
        self.internal_update("p", ptype, &[old_rule], &[new_rule], true)
    }

    pub fn update_policies(&mut self, old_rules: Vec<Rule>, new_rules: Vec<Rule>) -> Result<()> {
        self.update_named_policies("p", old_rules, new_rules)
    }

    pub fn update_named_policies(
        &mut self,
        ptype: &str,
        old_rules: Vec<Rule>,
        new_rules: Vec<Rule>,
    ) -> Result<()> {
        self.internal_update("p", ptype, &old_rules, &new_rules, true)
    }

    pub fn update_filtered_policies(
        &mut self,
        new_rules: Vec<Rule>,
        field_index: usize,
        values: Vec<String>,
    ) -> Result<Vec<Rule>> {
        self.update_filtered_named_policies("p", new_rules, field_index, values)
    }

    pub fn update_filtered_named_policies(
        &mut self,
        ptype: &str,
        new_rules: Vec<Rule>,
        field_index: usize,
        values: Vec<String>,
    ) -> Result<Vec<Rule>> {
        self.internal_update_filtered("p", ptype, &new_rules, field_index, &values, true)
    }

    // --- grouping surface -------------------------------------------------

    pub fn get_grouping_policy(&self) -> Vec<Rule> {
        self.get_named_grouping_policy("g")
    }

    pub fn get_named_grouping_policy(&self, ptype: &str) -> Vec<Rule> {
        self.store.get("g", ptype)
    }

    pub fn get_filtered_grouping_policy(&self, field_index: usize, values: &[String]) -> Vec<Rule> {
        self.get_filtered_named_grouping_policy("g", field_index, values)
    }

    pub fn get_filtered_named_grouping_policy(
        &self,
        ptype: &str,
        field_index: usize,
        values: &[String],
    ) -> Vec<Rule> {
        self.store.filter("g", ptype, field_index, values)
    }

    pub fn has_grouping_policy(&self, rule: &[String]) -> bool {
        self.has_named_grouping_policy("g", rule)
    }

    pub fn has_named_grouping_policy(&self, ptype: &str, rule: &[String]) -> bool {
        self.store.has("g", ptype, rule)
    }

    pub fn add_grouping_policy(&mut self, rule: Rule) -> Result<()> {
        self.add_named_grouping_policy("g", rule)
    }

    pub fn add_named_grouping_policy(&mut self, ptype: &str, rule: Rule) -> Result<()> {
        self.internal_add("g", ptype, &[rule], false, true).map(|_| ())
    }

    pub fn add_grouping_policies(&mut self, rules: Vec<Rule>) -> Result<()> {
        self.add_named_grouping_policies("g", rules)
    }

    pub fn add_named_grouping_policies(&mut self, ptype: &str, rules: Vec<Rule>) -> Result<()> {
        self.internal_add("g", ptype, &rules, false, true).map(|_| ())
    }

    pub fn add_grouping_policies_ex(&mut self, rules: Vec<Rule>) -> Result<usize> {
        self.internal_add("g", "g", &rules, true, true)
    }

    pub fn remove_grouping_policy(&mut self, rule: Rule) -> Result<()> {
        self.remove_named_grouping_policy("g", rule)
    }

    pub fn remove_named_grouping_policy(&mut self, ptype: &str, rule: Rule) -> Result<()> {
        self.internal_remove("g", ptype, &[rule], true)
    }

    pub fn remove_grouping_policies(&mut self, rules: Vec<Rule>) -> Result<()> {
        self.remove_named_grouping_policies("g", rules)
    }

    pub fn remove_named_grouping_policies(&mut self, ptype: &str, rules: Vec<Rule>) -> Result<()> {
        self.internal_remove("g", ptype, &rules, true)
    }

    pub fn remove_filtered_grouping_policy(
        &mut self,
        field_index: usize,
        values: Vec<String>,
    ) -> Result<Vec<Rule>> {
        self.remove_filtered_named_grouping_policy("g", field_index, values)
    }

    pub fn remove_filtered_named_grouping_policy(
        &mut self,
        ptype: &str,
        field_index: usize,
        values: Vec<String>,
    ) -> Result<Vec<Rule>> {
        self.internal_remove_filtered("g", ptype, field_index, &values, true)
    }

    pub fn update_grouping_policy(&mut self, old_rule: Rule, new_rule: Rule) -> Result<()> {
        self.update_named_grouping_policy("g", old_rule, new_rule)
    }

    pub fn update_named_grouping_policy(
        &mut self,
        ptype: &str,
        old_rule: Rule,
        new_rule: Rule,
    ) -> Result<()> {
        self.internal_update("g", ptype, &[old_rule], &[new_rule], true)
    }

    pub fn update_grouping_policies(&mut self, old_rules: Vec<Rule>, new_rules: Vec<Rule>) -> Result<()> {
        self.internal_update("g", "g", &old_rules, &new_rules, true)
    }

    // --- self_* surface (no watcher/dispatcher echo) ----------------------

    pub fn self_add_policy(&mut self, sec: &str, ptype: &str, rule: Rule) -> Result<()> {
        self.internal_add(sec, ptype, &[rule], false, false).map(|_| ())
    }

    pub fn self_add_policies(&mut self, sec: &str, ptype: &str, rules: Vec<Rule>) -> Result<()> {
        self.internal_add(sec, ptype, &rules, false, false).map(|_| ())
    }

    pub fn self_add_policies_ex(&mut self, sec: &str, ptype: &str, rules: Vec<Rule>) -> Result<usize> {
        self.internal_add(sec, ptype, &rules, true, false)
    }

    pub fn self_remove_policy(&mut self, sec: &str, ptype: &str, rule: Rule) -> Result<()> {
        self.internal_remove(sec, ptype, &[rule], false)
    }

    pub fn self_remove_policies(&mut self, sec: &str, ptype: &str, rules: Vec<Rule>) -> Result<()> {
        self.internal_remove(sec, ptype, &rules, false)
    }

    pub fn self_remove_filtered_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        values: Vec<String>,
    ) -> Result<Vec<Rule>> {
        self.internal_remove_filtered(sec, ptype, field_index, &values, false)
    }

    pub fn self_update_policy(&mut self, sec: &str, ptype: &str, old_rule: Rule, new_rule: Rule) -> Result<()> {
        self.internal_update(sec, ptype, &[old_rule], &[new_rule], false)
    }

    pub fn self_update_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        old_rules: Vec<Rule>,
        new_rules: Vec<Rule>,
    ) -> Result<()> {
        self.internal_update(sec, ptype, &old_rules, &new_rules, false)
    }

    /// Replace the entire in-memory store with a received snapshot, as the
    /// reconciliation layer does. Skips persistence and notification.
    pub(crate) fn self_replace_store(&mut self, store: PolicyStore, change_ms: i64) -> Result<()> {
        self.store = store;
        self.filtered = false;
        self.last_filter = None;
        if self.auto_build_role_links {
            self.build_role_links()?;
        }
        self.invalidate_cache();
        self.last_change_ms = change_ms;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::model::Model;

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

    fn rule(fields: &[&str]) -> Rule {
        fields.iter().map(|s| s.to_string()).collect()
    }

    fn enforcer() -> Enforcer {
        let model = Model::from_text(MODEL).unwrap();
        Enforcer::new(model, Box::new(MemoryAdapter::new())).unwrap()
    }

    #[test]
    fn add_then_has_then_remove() {
        let mut e = enforcer();
        e.add_policy(rule(&["alice", "data1", "read"])).unwrap();
        assert!(e.has_policy(&rule(&["alice", "data1", "read"])));
        assert_eq!(e.get_policy().len(), 1);

        let err = e.add_policy(rule(&["alice", "data1", "read"])).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(e.get_policy().len(), 1);

        e.remove_policy(rule(&["alice", "data1", "read"])).unwrap();
        assert!(!e.has_policy(&rule(&["alice", "data1", "read"])));
        assert!(e.remove_policy(rule(&["alice", "data1", "read"])).is_err());
    }

    #[test]
    fn wrong_arity_rule_is_rejected() {
        let mut e = enforcer();
        let err = e.add_policy(rule(&["alice", "data1"])).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(e.get_policy().is_empty());
    }

    #[test]
    fn add_policies_ex_skips_duplicates() {
        let mut e = enforcer();
        e.add_policy(rule(&["alice", "data1", "read"])).unwrap();
        let added = e
            .add_policies_ex(vec![
                rule(&["alice", "data1", "read"]),
                rule(&["bob", "data2", "write"]),
                rule(&["bob", "data2", "write"]),
            ])
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(e.get_policy().len(), 2);
    }

    #[test]
    fn grouping_mutations_update_the_role_graph() {
        let mut e = enforcer();
        e.add_policy(rule(&["admin", "data1", "read"])).unwrap();
        e.add_grouping_policy(rule(&["alice", "admin"])).unwrap();
        assert!(e.enforce(&["alice", "data1", "read"]).unwrap());

        e.remove_grouping_policy(rule(&["alice", "admin"])).unwrap();
        assert!(!e.enforce(&["alice", "data1", "read"]).unwrap());
    }

    #[test]
    fn update_policy_swaps_in_place() {
        let mut e = enforcer();
        e.add_policy(rule(&["a", "o1", "read"])).unwrap();
        e.add_policy(rule(&["b", "o2", "read"])).unwrap();
        e.update_policy(rule(&["a", "o1", "read"]), rule(&["a", "o1", "write"])).unwrap();
        assert_eq!(e.get_policy()[0], rule(&["a", "o1", "write"]));

        // updating onto an existing rule fails and changes nothing
        let err = e
            .update_policy(rule(&["a", "o1", "write"]), rule(&["b", "o2", "read"]))
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(e.has_policy(&rule(&["a", "o1", "write"])));

        // updating a missing rule fails
        assert!(e
            .update_policy(rule(&["zz", "o", "read"]), rule(&["zz", "o", "write"]))
            .is_err());
    }

    #[test]
    fn bulk_update_requires_equal_lengths() {
        let mut e = enforcer();
        e.add_policy(rule(&["a", "o", "read"])).unwrap();
        let err = e
            .update_policies(vec![rule(&["a", "o", "read"])], vec![])
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(e.has_policy(&rule(&["a", "o", "read"])));
    }

    #[test]
    fn bulk_update_swap_is_atomic() {
        let mut e = enforcer();
        e.add_policy(rule(&["a", "o", "read"])).unwrap();
        e.add_policy(rule(&["b", "o", "read"])).unwrap();
        // swapping two rules pairwise is fine: the projected state has no
        // conflict even though each target currently exists
        e.update_policies(
            vec![rule(&["a", "o", "read"]), rule(&["b", "o", "read"])],
            vec![rule(&["b", "o", "read"]), rule(&["a", "o", "read"])],
        )
        .unwrap();
        assert_eq!(e.get_policy().len(), 2);
        assert_eq!(e.get_policy()[0], rule(&["b", "o", "read"]));
    }

    #[test]
    fn filtered_removal_reports_removed_rules() {
        let mut e = enforcer();
        e.add_policy(rule(&["alice", "data1", "read"])).unwrap();
        e.add_policy(rule(&["alice", "data2", "read"])).unwrap();
        e.add_policy(rule(&["bob", "data1", "read"])).unwrap();
        let removed = e.remove_filtered_policy(0, vec!["alice".into()]).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(e.get_policy().len(), 1);

        let removed = e.remove_filtered_policy(0, vec!["nobody".into()]).unwrap();
        assert!(removed.is_empty());
    }

    #[test]
    fn update_filtered_replaces_the_subset() {
        let mut e = enforcer();
        e.add_policy(rule(&["alice", "data1", "read"])).unwrap();
        e.add_policy(rule(&["bob", "data2", "write"])).unwrap();
        let old = e
            .update_filtered_policies(
                vec![rule(&["alice", "data9", "read"])],
                0,
                vec!["alice".into()],
            )
            .unwrap();
        assert_eq!(old, vec![rule(&["alice", "data1", "read"])]);
        assert!(e.has_policy(&rule(&["alice", "data9", "read"])));
        assert!(e.has_policy(&rule(&["bob", "data2", "write"])));
        assert_eq!(e.get_policy().len(), 2);
    }

    #[test]
    fn value_projections() {
        let mut e = enforcer();
        e.add_policy(rule(&["alice", "data1", "read"])).unwrap();
        e.add_policy(rule(&["bob", "data2", "write"])).unwrap();
        e.add_grouping_policy(rule(&["alice", "admin"])).unwrap();
        assert_eq!(e.get_all_subjects(), vec!["alice", "bob"]);
        assert_eq!(e.get_all_objects(), vec!["data1", "data2"]);
        assert_eq!(e.get_all_actions(), vec!["read", "write"]);
        assert_eq!(e.get_all_roles(), vec!["admin"]);
    }

    #[test]
    fn persistence_failure_rolls_back() {
        // adapter that accepts loads but refuses every save
        struct FailingSave;
        impl crate::adapter::Adapter for FailingSave {
            fn load_policy(
                &mut self,
                _m: &Model,
                _s: &mut crate::storage::PolicyStore,
            ) -> Result<()> {
                Ok(())
            }
            fn save_policy(&mut self, _s: &crate::storage::PolicyStore) -> Result<()> {
                Err(EngineError::persistence("disk full"))
            }
        }
        let model = Model::from_text(MODEL).unwrap();
        let mut e = Enforcer::new(model, Box::new(FailingSave)).unwrap();
        let err = e.add_policy(rule(&["alice", "data1", "read"])).unwrap_err();
        assert_eq!(err.kind(), "persistence");
        // the in-memory mutation was rolled back
        assert!(!e.has_policy(&rule(&["alice", "data1", "read"])));

        // with auto_save off the same mutation sticks
        e.enable_auto_save(false);
        e.add_policy(rule(&["alice", "data1", "read"])).unwrap();
        assert!(e.has_policy(&rule(&["alice", "data1", "read"])));
    }

    #[test]
    fn grouping_rollback_restores_role_links() {
        struct FailingSave;
        impl crate::adapter::Adapter for FailingSave {
            fn load_policy(
                &mut self,
                _m: &Model,
                _s: &mut crate::storage::PolicyStore,
            ) -> Result<()> {
                Ok(())
            }
            fn save_policy(&mut self, _s: &crate::storage::PolicyStore) -> Result<()> {
                Err(EngineError::persistence("disk full"))
            }
        }
        let model = Model::from_text(MODEL).unwrap();
        let mut e = Enforcer::new(model, Box::new(FailingSave)).unwrap();
        assert!(e.add_grouping_policy(rule(&["alice", "admin"])).is_err());
        let rm = e.role_manager("g").unwrap();
        assert!(!rm.read().has_link("alice", "admin", None));
    }

    #[test]
    fn self_variants_do_not_notify() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        #[derive(Default)]
        struct CountingWatcher {
            count: Arc<AtomicUsize>,
        }
        impl crate::watcher::Watcher for CountingWatcher {
            fn set_update_callback(&mut self, _cb: crate::watcher::UpdateCallback) {}
            fn update(&mut self) -> Result<()> {
                self.count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let mut e = enforcer();
        e.set_watcher(Box::new(CountingWatcher { count: count.clone() }));

        e.self_add_policy("p", "p", rule(&["a", "o", "read"])).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        e.add_policy(rule(&["b", "o", "read"])).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn watcher_failure_does_not_fail_the_mutation() {
        struct FailingWatcher;
        impl crate::watcher::Watcher for FailingWatcher {
            fn set_update_callback(&mut self, _cb: crate::watcher::UpdateCallback) {}
            fn update(&mut self) -> Result<()> {
                Err(EngineError::distribution("peer unreachable"))
            }
        }
        let mut e = enforcer();
        e.set_watcher(Box::new(FailingWatcher));
        e.add_policy(rule(&["alice", "data1", "read"])).unwrap();
        assert!(e.has_policy(&rule(&["alice", "data1", "read"])));
    }

    #[test]
    fn empty_field_rules_are_rejected() {
        let mut e = enforcer();
        assert!(e.add_policy(rule(&["alice", "", "read"])).is_err());
    }
}
