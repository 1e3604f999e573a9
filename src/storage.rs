//! In-memory policy and grouping rule tables.
//! -------------------------------------------
//! A store is a pair of mappings (policy section `p`, grouping section `g`)
//! from policy-type name to an ordered rule sequence. Order is preserved
//! (it drives explanation order and priority aggregation) and uniqueness is
//! enforced with a sideband hash set so membership checks stay O(1). The
//! operations here are deliberately primitive; bulk/filtered/transactional
//! semantics are layered on by the management API.

use std::collections::{BTreeMap, HashSet};

use crate::error::{EngineError, Result};

pub type Rule = Vec<String>;

pub const SEC_POLICY: &str = "p";
pub const SEC_GROUPING: &str = "g";

#[derive(Debug, Default, Clone)]
pub struct RuleTable {
    rules: Vec<Rule>,
    seen: HashSet<Rule>,
}

impl RuleTable {
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn has(&self, rule: &[String]) -> bool {
        self.seen.contains(rule)
    }

    fn add(&mut self, ptype: &str, rule: Rule) -> Result<()> {
        if self.seen.contains(&rule) {
            return Err(EngineError::validation(format!(
                "rule already exists in '{ptype}': [{}]",
                rule.join(", ")
            )));
        }
        self.seen.insert(rule.clone());
        self.rules.push(rule);
        Ok(())
    }

    fn remove(&mut self, ptype: &str, rule: &[String]) -> Result<()> {
        if !self.seen.remove(rule) {
            return Err(EngineError::validation(format!(
                "rule not found in '{ptype}': [{}]",
                rule.join(", ")
            )));
        }
        let idx = self.rules.iter().position(|r| r == rule).expect("seen implies stored");
        self.rules.remove(idx);
        Ok(())
    }

    fn matches(rule: &[String], field_index: usize, values: &[String]) -> bool {
        if values.is_empty() {
            return true;
        }
        if field_index + values.len() > rule.len() {
            return false;
        }
        values
            .iter()
            .enumerate()
            .all(|(i, v)| v.is_empty() || rule[field_index + i] == *v)
    }

    fn filter(&self, field_index: usize, values: &[String]) -> Vec<Rule> {
        self.rules
            .iter()
            .filter(|r| Self::matches(r, field_index, values))
            .cloned()
            .collect()
    }

    fn remove_filtered(&mut self, field_index: usize, values: &[String]) -> Vec<Rule> {
        let removed: Vec<Rule> = self
            .rules
            .iter()
            .filter(|r| Self::matches(r, field_index, values))
            .cloned()
            .collect();
        if !removed.is_empty() {
            self.rules.retain(|r| !Self::matches(r, field_index, values));
            for r in &removed {
                self.seen.remove(r);
            }
        }
        removed
    }
}

#[derive(Debug, Default, Clone)]
pub struct PolicyStore {
    p: BTreeMap<String, RuleTable>,
    g: BTreeMap<String, RuleTable>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn section(&self, sec: &str) -> Result<&BTreeMap<String, RuleTable>> {
        match sec {
            SEC_POLICY => Ok(&self.p),
            SEC_GROUPING => Ok(&self.g),
            other => Err(EngineError::validation(format!("unknown policy section '{other}'"))),
        }
    }

    fn section_mut(&mut self, sec: &str) -> Result<&mut BTreeMap<String, RuleTable>> {
        match sec {
            SEC_POLICY => Ok(&mut self.p),
            SEC_GROUPING => Ok(&mut self.g),
            other => Err(EngineError::validation(format!("unknown policy section '{other}'"))),
        }
    }

    /// Section of a policy type by its leading letter (`p*` or `g*`).
    pub fn section_of(ptype: &str) -> Result<&'static str> {
        match ptype.chars().next() {
            Some('p') => Ok(SEC_POLICY),
            Some('g') => Ok(SEC_GROUPING),
            _ => Err(EngineError::validation(format!("cannot map policy type '{ptype}' to a section"))),
        }
    }

    /// Current rule sequence; empty when the type has no rules.
    pub fn get(&self, sec: &str, ptype: &str) -> Vec<Rule> {
        self.section(sec)
            .ok()
            .and_then(|m| m.get(ptype))
            .map(|t| t.rules().to_vec())
            .unwrap_or_default()
    }

    /// Borrowing accessor for the hot enforcement path.
    pub fn rules(&self, sec: &str, ptype: &str) -> &[Rule] {
        match sec {
            SEC_POLICY => self.p.get(ptype).map(|t| t.rules()).unwrap_or(&[]),
            SEC_GROUPING => self.g.get(ptype).map(|t| t.rules()).unwrap_or(&[]),
            _ => &[],
        }
    }

    pub fn has(&self, sec: &str, ptype: &str, rule: &[String]) -> bool {
        self.section(sec)
            .ok()
            .and_then(|m| m.get(ptype))
            .map(|t| t.has(rule))
            .unwrap_or(false)
    }

    pub fn add(&mut self, sec: &str, ptype: &str, rule: Rule) -> Result<()> {
        self.section_mut(sec)?.entry(ptype.to_string()).or_default().add(ptype, rule)
    }

    pub fn remove(&mut self, sec: &str, ptype: &str, rule: &[String]) -> Result<()> {
        let table = self
            .section_mut(sec)?
            .get_mut(ptype)
            .ok_or_else(|| EngineError::validation(format!("rule not found in '{ptype}': [{}]", rule.join(", "))))?;
        table.remove(ptype, rule)
    }

    /// All-or-nothing batch insert: any duplicate (present or repeated in
    /// the batch) rejects the whole batch before mutation.
    pub fn add_batch(&mut self, sec: &str, ptype: &str, rules: &[Rule]) -> Result<()> {
        {
            let existing = self.section(sec)?.get(ptype);
            let mut fresh: HashSet<&Rule> = HashSet::new();
            for rule in rules {
                if existing.map(|t| t.has(rule)).unwrap_or(false) || !fresh.insert(rule) {
                    return Err(EngineError::validation(format!(
                        "duplicate rule in batch for '{ptype}': [{}]",
                        rule.join(", ")
                    )));
                }
            }
        }
        let table = self.section_mut(sec)?.entry(ptype.to_string()).or_default();
        for rule in rules {
            table.add(ptype, rule.clone())?;
        }
        Ok(())
    }

    /// All-or-nothing batch remove.
    pub fn remove_batch(&mut self, sec: &str, ptype: &str, rules: &[Rule]) -> Result<()> {
        {
            let table = self.section(sec)?.get(ptype);
            let mut dup: HashSet<&Rule> = HashSet::new();
            for rule in rules {
                if !table.map(|t| t.has(rule)).unwrap_or(false) || !dup.insert(rule) {
                    return Err(EngineError::validation(format!(
                        "rule not found in '{ptype}': [{}]",
                        rule.join(", ")
                    )));
                }
            }
        }
        let table = self.section_mut(sec)?.get_mut(ptype).expect("checked above");
        for rule in rules {
            table.remove(ptype, rule)?;
        }
        Ok(())
    }

    /// Replace the whole rule sequence of one type. Used by the management
    /// layer for in-place bulk updates and to restore a snapshot when a
    /// persistence step fails mid-mutation.
    pub(crate) fn set_rules(&mut self, sec: &str, ptype: &str, rules: Vec<Rule>) {
        let Ok(section) = self.section_mut(sec) else { return };
        if rules.is_empty() {
            section.remove(ptype);
            return;
        }
        let mut table = RuleTable::default();
        for rule in rules {
            table.seen.insert(rule.clone());
            table.rules.push(rule);
        }
        section.insert(ptype.to_string(), table);
    }

    /// Sub-sequence of rules whose fields starting at `field_index` equal
    /// `values`; an empty string in a position matches anything.
    pub fn filter(&self, sec: &str, ptype: &str, field_index: usize, values: &[String]) -> Vec<Rule> {
        self.section(sec)
            .ok()
            .and_then(|m| m.get(ptype))
            .map(|t| t.filter(field_index, values))
            .unwrap_or_default()
    }

    /// Remove matching rules, returning them in store order.
    pub fn remove_filtered(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        values: &[String],
    ) -> Result<Vec<Rule>> {
        Ok(self
            .section_mut(sec)?
            .get_mut(ptype)
            .map(|t| t.remove_filtered(field_index, values))
            .unwrap_or_default())
    }

    /// Distinct values at one field position, in first-seen order.
    pub fn values(&self, sec: &str, ptype: &str, field_index: usize) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut out: Vec<String> = Vec::new();
        for rule in self.rules(sec, ptype) {
            if let Some(v) = rule.get(field_index) {
                if seen.insert(v.as_str()) {
                    out.push(v.clone());
                }
            }
        }
        out
    }

    /// Distinct values at one position across every type of a section.
    pub fn values_across(&self, sec: &str, field_index: usize) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out: Vec<String> = Vec::new();
        let Ok(section) = self.section(sec) else { return out };
        for (_, table) in section.iter() {
            for rule in table.rules() {
                if let Some(v) = rule.get(field_index) {
                    if seen.insert(v.clone()) {
                        out.push(v.clone());
                    }
                }
            }
        }
        out
    }

    pub fn ptypes(&self, sec: &str) -> Vec<String> {
        self.section(sec).map(|m| m.keys().cloned().collect()).unwrap_or_default()
    }

    /// Total number of stored rules across both sections.
    pub fn len(&self) -> usize {
        self.p.values().chain(self.g.values()).map(|t| t.rules().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.p.clear();
        self.g.clear();
    }

    /// Flat export in `(sec, ptype, rules)` form, used by save/dispatch
    /// and by snapshot exchange between nodes.
    pub fn export(&self) -> Vec<(String, String, Vec<Rule>)> {
        let mut out = Vec::new();
        for (ptype, table) in &self.p {
            out.push((SEC_POLICY.to_string(), ptype.clone(), table.rules().to_vec()));
        }
        for (ptype, table) in &self.g {
            out.push((SEC_GROUPING.to_string(), ptype.clone(), table.rules().to_vec()));
        }
        out
    }
}
