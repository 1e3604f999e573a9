//! Policy persistence adapters.
//! ----------------------------
//! An adapter is any value implementing [`Adapter`]; capability discovery
//! is structural. Incremental and filtered operations default to
//! "unsupported", which the engine treats as a normal error (falling back
//! to `save_policy` where the operation allows it). Two reference adapters
//! are included: an in-memory adapter (tests, defaults) and a file adapter
//! speaking the CSV-like policy text format:
//!
//! ```text
//! p, alice, data1, read
//! g, alice, admin
//! # comment lines and blanks are ignored
//! ```

use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::model::Model;
use crate::storage::{PolicyStore, Rule};

/// Filter for partial policy loads. The engine stores the filter it used
/// for introspection; only adapters interpret the values. The reference
/// interpretation is positional prefix match per section, an empty string
/// matching anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyFilter {
    pub p: Vec<String>,
    pub g: Vec<String>,
}

impl PolicyFilter {
    pub fn is_empty(&self) -> bool {
        self.p.iter().all(|v| v.is_empty()) && self.g.iter().all(|v| v.is_empty())
    }
}

pub trait Adapter: Send + Sync {
    /// Load every rule into `store`. The engine clears the store first.
    fn load_policy(&mut self, model: &Model, store: &mut PolicyStore) -> Result<()>;

    /// Persist the full store, replacing previous contents.
    fn save_policy(&mut self, store: &PolicyStore) -> Result<()>;

    /// Incremental mutation capability. Adapters that cannot apply single
    /// rules leave the defaults in place and the engine falls back.
    fn supports_incremental(&self) -> bool {
        false
    }

    fn add_policy(&mut self, _sec: &str, _ptype: &str, _rule: &[String]) -> Result<()> {
        Err(EngineError::unsupported("add_policy"))
    }

    fn add_policies(&mut self, _sec: &str, _ptype: &str, _rules: &[Rule]) -> Result<()> {
        Err(EngineError::unsupported("add_policies"))
    }

    fn remove_policy(&mut self, _sec: &str, _ptype: &str, _rule: &[String]) -> Result<()> {
        Err(EngineError::unsupported("remove_policy"))
    }

    fn remove_policies(&mut self, _sec: &str, _ptype: &str, _rules: &[Rule]) -> Result<()> {
        Err(EngineError::unsupported("remove_policies"))
    }

    fn remove_filtered_policy(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _field_index: usize,
        _values: &[String],
    ) -> Result<()> {
        Err(EngineError::unsupported("remove_filtered_policy"))
    }

    /// Partial-load capability.
    fn supports_filtering(&self) -> bool {
        false
    }

    fn load_filtered_policy(
        &mut self,
        _model: &Model,
        _store: &mut PolicyStore,
        _filter: &PolicyFilter,
    ) -> Result<()> {
        Err(EngineError::unsupported("load_filtered_policy"))
    }

    /// Like `load_filtered_policy` but appends to the current store
    /// contents instead of assuming a cleared store.
    fn load_incremental_filtered_policy(
        &mut self,
        _model: &Model,
        _store: &mut PolicyStore,
        _filter: &PolicyFilter,
    ) -> Result<()> {
        Err(EngineError::unsupported("load_incremental_filtered_policy"))
    }
}

// --- shared text handling -------------------------------------------------

/// Split one CSV-like line into trimmed fields. `None` for blanks and
/// comments.
pub(crate) fn parse_rule_line(line: &str) -> Option<Vec<String>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(line.split(',').map(|f| f.trim().to_string()).collect())
}

/// Validate one parsed line against the model and insert it.
pub(crate) fn load_fields_into(model: &Model, store: &mut PolicyStore, fields: Vec<String>) -> Result<()> {
    let Some((ptype, rule)) = fields.split_first() else {
        return Err(EngineError::validation("empty policy line".to_string()));
    };
    let sec = PolicyStore::section_of(ptype)?;
    let expected = model.rule_len(sec, ptype).ok_or_else(|| {
        EngineError::validation(format!("policy type '{ptype}' is not defined by the model"))
    })?;
    if rule.len() != expected {
        return Err(EngineError::validation(format!(
            "rule length {} does not match definition '{ptype}' ({expected} fields): [{}]",
            rule.len(),
            rule.join(", ")
        )));
    }
    store.add(sec, ptype, rule.to_vec())
}

fn rule_matches_prefix(rule: &[String], values: &[String]) -> bool {
    if values.len() > rule.len() {
        return false;
    }
    values.iter().enumerate().all(|(i, v)| v.is_empty() || rule[i] == *v)
}

fn filter_accepts(filter: &PolicyFilter, sec: &str, rule: &[String]) -> bool {
    match sec {
        "p" => rule_matches_prefix(rule, &filter.p),
        "g" => rule_matches_prefix(rule, &filter.g),
        _ => true,
    }
}

fn serialize_store(store: &PolicyStore) -> String {
    let mut out = String::new();
    for (_sec, ptype, rules) in store.export() {
        for rule in rules {
            out.push_str(&ptype);
            for field in rule {
                out.push_str(", ");
                out.push_str(&field);
            }
            out.push('\n');
        }
    }
    out
}

// --- memory adapter -------------------------------------------------------

/// Keeps policy lines in memory. Supports every capability; the default
/// adapter for enforcers constructed from model text alone.
#[derive(Debug, Default, Clone)]
pub struct MemoryAdapter {
    lines: Vec<(String, String, Rule)>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from policy text in the CSV-like format.
    pub fn from_text(text: &str) -> Result<Self> {
        let mut lines = Vec::new();
        for raw in text.lines() {
            let Some(fields) = parse_rule_line(raw) else { continue };
            let Some((ptype, rule)) = fields.split_first() else { continue };
            let sec = PolicyStore::section_of(ptype)?;
            lines.push((sec.to_string(), ptype.clone(), rule.to_vec()));
        }
        Ok(MemoryAdapter { lines })
    }

    pub fn rule_count(&self) -> usize {
        self.lines.len()
    }
}

impl Adapter for MemoryAdapter {
    fn load_policy(&mut self, model: &Model, store: &mut PolicyStore) -> Result<()> {
        for (_sec, ptype, rule) in &self.lines {
            let mut fields = vec![ptype.clone()];
            fields.extend(rule.iter().cloned());
            load_fields_into(model, store, fields)?;
        }
        Ok(())
    }

    fn save_policy(&mut self, store: &PolicyStore) -> Result<()> {
        let mut lines = Vec::new();
        for (sec, ptype, rules) in store.export() {
            for rule in rules {
                lines.push((sec.clone(), ptype.clone(), rule));
            }
        }
        self.lines = lines;
        Ok(())
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    fn add_policy(&mut self, sec: &str, ptype: &str, rule: &[String]) -> Result<()> {
        self.lines.push((sec.to_string(), ptype.to_string(), rule.to_vec()));
        Ok(())
    }

    fn add_policies(&mut self, sec: &str, ptype: &str, rules: &[Rule]) -> Result<()> {
        for rule in rules {
            self.add_policy(sec, ptype, rule)?;
        }
        Ok(())
    }

    fn remove_policy(&mut self, sec: &str, ptype: &str, rule: &[String]) -> Result<()> {
        self.lines.retain(|(s, p, r)| !(s == sec && p == ptype && r == rule));
        Ok(())
    }

    fn remove_policies(&mut self, sec: &str, ptype: &str, rules: &[Rule]) -> Result<()> {
        for rule in rules {
            self.remove_policy(sec, ptype, rule)?;
        }
        Ok(())
    }

    fn remove_filtered_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        values: &[String],
    ) -> Result<()> {
        self.lines.retain(|(s, p, r)| {
            if s != sec || p != ptype {
                return true;
            }
            if field_index + values.len() > r.len() {
                return true;
            }
            !values
                .iter()
                .enumerate()
                .all(|(i, v)| v.is_empty() || r[field_index + i] == *v)
        });
        Ok(())
    }

    fn supports_filtering(&self) -> bool {
        true
    }

    fn load_filtered_policy(
        &mut self,
        model: &Model,
        store: &mut PolicyStore,
        filter: &PolicyFilter,
    ) -> Result<()> {
        for (sec, ptype, rule) in &self.lines {
            if !filter_accepts(filter, sec, rule) {
                continue;
            }
            let mut fields = vec![ptype.clone()];
            fields.extend(rule.iter().cloned());
            load_fields_into(model, store, fields)?;
        }
        Ok(())
    }

    fn load_incremental_filtered_policy(
        &mut self,
        model: &Model,
        store: &mut PolicyStore,
        filter: &PolicyFilter,
    ) -> Result<()> {
        for (sec, ptype, rule) in &self.lines {
            if !filter_accepts(filter, sec, rule) {
                continue;
            }
            if store.has(sec, ptype, rule) {
                continue;
            }
            let mut fields = vec![ptype.clone()];
            fields.extend(rule.iter().cloned());
            load_fields_into(model, store, fields)?;
        }
        Ok(())
    }
}

// --- file adapter ---------------------------------------------------------

/// Whole-file CSV adapter. Incremental mutation is unsupported by design:
/// every save rewrites the file, so the engine falls back to `save_policy`
/// when auto-save is on.
#[derive(Debug, Clone)]
pub struct FileAdapter {
    path: PathBuf,
}

impl FileAdapter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileAdapter { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_lines(&self) -> Result<Vec<Vec<String>>> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| EngineError::persistence(format!("cannot read '{}': {e}", self.path.display())))?;
        Ok(text.lines().filter_map(parse_rule_line).collect())
    }
}

impl Adapter for FileAdapter {
    fn load_policy(&mut self, model: &Model, store: &mut PolicyStore) -> Result<()> {
        for fields in self.read_lines()? {
            load_fields_into(model, store, fields)?;
        }
        Ok(())
    }

    fn save_policy(&mut self, store: &PolicyStore) -> Result<()> {
        std::fs::write(&self.path, serialize_store(store))
            .map_err(|e| EngineError::persistence(format!("cannot write '{}': {e}", self.path.display())))
    }

    fn supports_filtering(&self) -> bool {
        true
    }

    fn load_filtered_policy(
        &mut self,
        model: &Model,
        store: &mut PolicyStore,
        filter: &PolicyFilter,
    ) -> Result<()> {
        for fields in self.read_lines()? {
            let Some((ptype, rule)) = fields.split_first() else { continue };
            let sec = PolicyStore::section_of(ptype)?;
            if !filter_accepts(filter, sec, rule) {
                continue;
            }
            load_fields_into(model, store, fields)?;
        }
        Ok(())
    }

    fn load_incremental_filtered_policy(
        &mut self,
        model: &Model,
        store: &mut PolicyStore,
        filter: &PolicyFilter,
    ) -> Result<()> {
        for fields in self.read_lines()? {
            let Some((ptype, rule)) = fields.split_first() else { continue };
            let sec = PolicyStore::section_of(ptype)?;
            if !filter_accepts(filter, sec, rule) || store.has(sec, ptype, rule) {
                continue;
            }
            load_fields_into(model, store, fields)?;
        }
        Ok(())
    }
}

/// Adapter that persists nothing. Useful when the policy set is managed
/// purely through the management API.
#[derive(Debug, Default, Clone)]
pub struct NullAdapter;

impl Adapter for NullAdapter {
    fn load_policy(&mut self, _model: &Model, _store: &mut PolicyStore) -> Result<()> {
        Ok(())
    }

    fn save_policy(&mut self, _store: &PolicyStore) -> Result<()> {
        Ok(())
    }
}
