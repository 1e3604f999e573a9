//! Outbound change broadcast.
//!
//! A dispatcher mirrors the management API: after a local mutation commits,
//! the engine hands the same operation to the dispatcher for delivery to
//! peer instances. Implementations may be synchronous or queue the work;
//! the engine requires no ordering beyond per-operation durability and
//! never fails a mutation on dispatcher errors (they are logged).

use crate::error::Result;
use crate::storage::Rule;

pub trait Dispatcher: Send + Sync {
    fn add_policies(&mut self, sec: &str, ptype: &str, rules: &[Rule]) -> Result<()>;
    fn remove_policies(&mut self, sec: &str, ptype: &str, rules: &[Rule]) -> Result<()>;
    fn remove_filtered_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        values: &[String],
    ) -> Result<()>;
    fn clear_policy(&mut self) -> Result<()>;
    fn update_policy(&mut self, sec: &str, ptype: &str, old_rule: &[String], new_rule: &[String])
        -> Result<()>;
    fn update_policies(&mut self, sec: &str, ptype: &str, old_rules: &[Rule], new_rules: &[Rule])
        -> Result<()>;
    fn update_filtered_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        old_rules: &[Rule],
        new_rules: &[Rule],
    ) -> Result<()>;
}

/// Dispatcher that drops every broadcast. Default for single-node use.
#[derive(Debug, Default)]
pub struct NoopDispatcher;

impl Dispatcher for NoopDispatcher {
    fn add_policies(&mut self, _sec: &str, _ptype: &str, _rules: &[Rule]) -> Result<()> {
        Ok(())
    }

    fn remove_policies(&mut self, _sec: &str, _ptype: &str, _rules: &[Rule]) -> Result<()> {
        Ok(())
    }

    fn remove_filtered_policy(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _field_index: usize,
        _values: &[String],
    ) -> Result<()> {
        Ok(())
    }

    fn clear_policy(&mut self) -> Result<()> {
        Ok(())
    }

    fn update_policy(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _old_rule: &[String],
        _new_rule: &[String],
    ) -> Result<()> {
        Ok(())
    }

    fn update_policies(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _old_rules: &[Rule],
        _new_rules: &[Rule],
    ) -> Result<()> {
        Ok(())
    }

    fn update_filtered_policies(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _old_rules: &[Rule],
        _new_rules: &[Rule],
    ) -> Result<()> {
        Ok(())
    }
}
