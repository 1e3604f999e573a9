//! Inbound change notification.
//!
//! A watcher connects an enforcer to some external change feed. The engine
//! calls `update*` after local mutations so peers learn about them; the
//! transport calls the registered callback when a remote change arrives,
//! and the owning layer reloads policy. Concrete transports live outside
//! this crate; [`NoopWatcher`] serves single-node deployments.

use crate::error::Result;
use crate::storage::Rule;

pub type UpdateCallback = Box<dyn Fn() + Send + Sync>;

pub trait Watcher: Send + Sync {
    /// Register the zero-argument callback fired on remote change.
    fn set_update_callback(&mut self, callback: UpdateCallback);

    /// Notify peers that this instance changed policy.
    fn update(&mut self) -> Result<()>;

    // Fine-grained variants let a peer apply precise incremental changes
    // instead of a full reload. Defaults degrade to a coarse update.
    fn update_for_add_policy(&mut self, _sec: &str, _ptype: &str, _rule: &[String]) -> Result<()> {
        self.update()
    }

    fn update_for_remove_policy(&mut self, _sec: &str, _ptype: &str, _rule: &[String]) -> Result<()> {
        self.update()
    }

    fn update_for_remove_filtered_policy(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _field_index: usize,
        _values: &[String],
    ) -> Result<()> {
        self.update()
    }

    fn update_for_save_policy(&mut self) -> Result<()> {
        self.update()
    }

    fn update_for_update_policy(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _old_rule: &[String],
        _new_rule: &[String],
    ) -> Result<()> {
        self.update()
    }

    fn update_for_update_policies(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _old_rules: &[Rule],
        _new_rules: &[Rule],
    ) -> Result<()> {
        self.update()
    }
}

/// Watcher that drops every notification. Default for single-node use.
#[derive(Debug, Default)]
pub struct NoopWatcher;

impl Watcher for NoopWatcher {
    fn set_update_callback(&mut self, _callback: UpdateCallback) {}

    fn update(&mut self) -> Result<()> {
        Ok(())
    }
}
