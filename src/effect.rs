//! Effect values and the fixed effect aggregators.
//!
//! A matcher evaluation records one [`Effect`] per matching rule; the
//! model's `policy_effect` section selects one of four aggregation rules
//! that turn the recorded stream into the final boolean decision.

use crate::error::{EngineError, Result};

/// Per-rule verdict recorded by the enforcement pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
    /// The rule matched but carried an unrecognized `eft` value.
    Indeterminate,
}

impl Effect {
    /// Map the `eft` field of a rule (or its absence) to an effect.
    /// Missing/empty means allow, which is the definition default.
    pub fn from_field(value: Option<&str>) -> Effect {
        match value.map(|v| v.trim()) {
            None | Some("") | Some("allow") => Effect::Allow,
            Some("deny") => Effect::Deny,
            Some(_) => Effect::Indeterminate,
        }
    }
}

/// The four aggregator forms accepted in `[policy_effect]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectRule {
    /// `some(where (p.eft == allow))`
    AllowOverride,
    /// `!some(where (p.eft == deny))`
    DenyOverride,
    /// `some(where (p.eft == allow)) && !some(where (p.eft == deny))`
    AllowAndDeny,
    /// `priority(p.eft) || deny`
    Priority,
}

impl EffectRule {
    /// Parse the aggregator expression. The set is closed: anything other
    /// than the four known forms is a configuration error.
    pub fn parse(expr: &str) -> Result<EffectRule> {
        // Compare with all whitespace stripped so formatting variations in
        // model files do not matter.
        let normalized: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
        match normalized.as_str() {
            "some(where(p.eft==allow))" => Ok(EffectRule::AllowOverride),
            "!some(where(p.eft==deny))" => Ok(EffectRule::DenyOverride),
            "some(where(p.eft==allow))&&!some(where(p.eft==deny))" => Ok(EffectRule::AllowAndDeny),
            "priority(p.eft)||deny" => Ok(EffectRule::Priority),
            _ => Err(EngineError::configuration(format!(
                "unsupported policy_effect expression: '{}'",
                expr.trim()
            ))),
        }
    }

    /// Whether a later recorded effect can still change the decision that
    /// this stream would produce. Used by the pipeline to stop scanning
    /// early when no explanation list was requested.
    pub fn can_short_circuit(&self, seen: &EffectStream) -> bool {
        match self {
            EffectRule::AllowOverride => seen.allow > 0,
            EffectRule::DenyOverride => seen.deny > 0,
            EffectRule::AllowAndDeny => seen.deny > 0,
            EffectRule::Priority => seen.first.is_some(),
        }
    }
}

/// Accumulated effects for one enforcement pass.
#[derive(Debug, Default, Clone)]
pub struct EffectStream {
    allow: usize,
    deny: usize,
    /// First matching rule's effect, in store order. Drives `Priority`.
    first: Option<Effect>,
}

impl EffectStream {
    pub fn record(&mut self, effect: Effect) {
        match effect {
            Effect::Allow => self.allow += 1,
            Effect::Deny => self.deny += 1,
            Effect::Indeterminate => {}
        }
        if self.first.is_none() {
            self.first = Some(effect);
        }
    }

    /// Final decision under the given aggregation rule.
    pub fn decide(&self, rule: EffectRule) -> bool {
        match rule {
            EffectRule::AllowOverride => self.allow > 0,
            EffectRule::DenyOverride => self.deny == 0,
            EffectRule::AllowAndDeny => self.allow > 0 && self.deny == 0,
            // First matching rule wins; no match or indeterminate first
            // match falls through to deny.
            EffectRule::Priority => matches!(self.first, Some(Effect::Allow)),
        }
    }
}
