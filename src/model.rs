//! Access-control model: the parsed form of the INI-like model text.
//! ------------------------------------------------------------------
//! A model has five sections: `request_definition`, `policy_definition`,
//! `role_definition` (optional), `policy_effect` and `matchers`. The parser
//! is line-oriented: `key = value` assignments grouped under `[section]`
//! headers, `#` comments and blank lines ignored. A parsed [`Model`] is
//! immutable; reloading a model replaces the value wholesale.

use std::collections::BTreeMap;
use std::path::Path;

use crate::effect::EffectRule;
use crate::error::{EngineError, Result};

pub const SECTION_REQUEST: &str = "request_definition";
pub const SECTION_POLICY: &str = "policy_definition";
pub const SECTION_ROLE: &str = "role_definition";
pub const SECTION_EFFECT: &str = "policy_effect";
pub const SECTION_MATCHERS: &str = "matchers";

const KNOWN_SECTIONS: [&str; 5] = [
    SECTION_REQUEST,
    SECTION_POLICY,
    SECTION_ROLE,
    SECTION_EFFECT,
    SECTION_MATCHERS,
];

/// One `key = value` schema assertion: an ordered token list such as
/// `sub, obj, act` keyed by `r`, `r2`, `p`, `p2`, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub key: String,
    /// Verbatim section value (surrounding whitespace trimmed only).
    pub raw: String,
    pub tokens: Vec<String>,
}

impl Assertion {
    fn parse(key: &str, raw: &str) -> Result<Assertion> {
        let tokens: Vec<String> = raw.split(',').map(|t| t.trim().to_string()).collect();
        if tokens.iter().any(|t| t.is_empty()) {
            return Err(EngineError::configuration(format!(
                "empty token in definition '{key} = {raw}'"
            )));
        }
        Ok(Assertion { key: key.to_string(), raw: raw.to_string(), tokens })
    }
}

/// A `role_definition` entry: `_,_` (user, role) or `_,_,_`
/// (user, role, domain).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssertion {
    pub key: String,
    pub raw: String,
    /// 2 for `_,_`, 3 for `_,_,_`.
    pub arity: usize,
}

impl RoleAssertion {
    fn parse(key: &str, raw: &str) -> Result<RoleAssertion> {
        let blanks: Vec<&str> = raw.split(',').map(|t| t.trim()).collect();
        let arity = blanks.len();
        if !(arity == 2 || arity == 3) || blanks.iter().any(|b| *b != "_") {
            return Err(EngineError::configuration(format!(
                "role definition '{key}' must be '_, _' or '_, _, _', got '{raw}'"
            )));
        }
        Ok(RoleAssertion { key: key.to_string(), raw: raw.to_string(), arity })
    }
}

/// Parsed model. Keys within each map keep their textual names
/// (`r`, `r2`, `p`, `g`, `e`, `m`, ...).
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub requests: BTreeMap<String, Assertion>,
    pub policies: BTreeMap<String, Assertion>,
    pub roles: BTreeMap<String, RoleAssertion>,
    pub effects: BTreeMap<String, EffectRule>,
    /// Raw matcher expressions; compiled lazily (and cached) by the
    /// enforcer so that the model itself stays a plain value.
    pub matchers: BTreeMap<String, String>,
}

impl Model {
    /// Parse a model from text. File and in-memory forms share this
    /// grammar; `from_file` is a thin wrapper.
    pub fn from_text(text: &str) -> Result<Model> {
        let mut sections: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        let mut current: Option<String> = None;

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim();
                if !KNOWN_SECTIONS.contains(&name) {
                    return Err(EngineError::configuration(format!(
                        "unknown section '[{name}]' at line {}",
                        lineno + 1
                    )));
                }
                current = Some(name.to_string());
                sections.entry(name.to_string()).or_default();
                continue;
            }
            let Some(section) = current.as_ref() else {
                return Err(EngineError::configuration(format!(
                    "assignment outside of any section at line {}",
                    lineno + 1
                )));
            };
            let Some((key, value)) = line.split_once('=') else {
                return Err(EngineError::configuration(format!(
                    "expected 'key = value' at line {}: '{line}'",
                    lineno + 1
                )));
            };
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() {
                return Err(EngineError::configuration(format!(
                    "empty key at line {}: '{line}'",
                    lineno + 1
                )));
            }
            let entries = sections.get_mut(section).expect("section entry exists");
            // Duplicate keys take the last assignment. Required for
            // hot-reload of partially overridden model text.
            if let Some(slot) = entries.iter_mut().find(|(k, _)| k == key) {
                slot.1 = value.to_string();
            } else {
                entries.push((key.to_string(), value.to_string()));
            }
        }

        for required in [SECTION_REQUEST, SECTION_POLICY, SECTION_EFFECT, SECTION_MATCHERS] {
            if sections.get(required).map(|e| e.is_empty()).unwrap_or(true) {
                return Err(EngineError::configuration(format!(
                    "missing required section '[{required}]'"
                )));
            }
        }

        let mut model = Model::default();
        for (key, value) in &sections[SECTION_REQUEST] {
            Self::check_key_prefix(SECTION_REQUEST, key, "r")?;
            model.requests.insert(key.clone(), Assertion::parse(key, value)?);
        }
        for (key, value) in &sections[SECTION_POLICY] {
            Self::check_key_prefix(SECTION_POLICY, key, "p")?;
            model.policies.insert(key.clone(), Assertion::parse(key, value)?);
        }
        if let Some(entries) = sections.get(SECTION_ROLE) {
            for (key, value) in entries {
                Self::check_key_prefix(SECTION_ROLE, key, "g")?;
                model.roles.insert(key.clone(), RoleAssertion::parse(key, value)?);
            }
        }
        for (key, value) in &sections[SECTION_EFFECT] {
            Self::check_key_prefix(SECTION_EFFECT, key, "e")?;
            model.effects.insert(key.clone(), EffectRule::parse(value)?);
        }
        for (key, value) in &sections[SECTION_MATCHERS] {
            Self::check_key_prefix(SECTION_MATCHERS, key, "m")?;
            if value.is_empty() {
                return Err(EngineError::configuration(format!("empty matcher '{key}'")));
            }
            model.matchers.insert(key.clone(), value.clone());
        }
        Ok(model)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Model> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Model::from_text(&text)
    }

    fn check_key_prefix(section: &str, key: &str, prefix: &str) -> Result<()> {
        let rest = key.strip_prefix(prefix);
        let suffix_ok = matches!(rest, Some(r) if r.is_empty() || r.chars().all(|c| c.is_ascii_digit()));
        if !suffix_ok {
            return Err(EngineError::configuration(format!(
                "key '{key}' in [{section}] must be '{prefix}', '{prefix}2', ..."
            )));
        }
        Ok(())
    }

    /// Number of fields a stored rule of `ptype` must have.
    pub fn rule_len(&self, sec: &str, ptype: &str) -> Option<usize> {
        match sec {
            "p" => self.policies.get(ptype).map(|a| a.tokens.len()),
            "g" => self.roles.get(ptype).map(|a| a.arity),
            _ => None,
        }
    }

    /// Resolve a named field position within a policy type. Accepts both
    /// the bare token (`priority`) and the underscore-qualified form the
    /// definition may use (`p_priority`).
    pub fn field_index(&self, ptype: &str, field: &str) -> Option<usize> {
        let assertion = self.policies.get(ptype)?;
        let qualified = format!("{ptype}_{field}");
        assertion.tokens.iter().position(|t| t == field || *t == qualified)
    }

    /// Position of the `eft` token, when the definition carries one.
    pub fn eft_index(&self, ptype: &str) -> Option<usize> {
        self.field_index(ptype, "eft")
    }
}
