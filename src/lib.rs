//! warden: a general-purpose authorization engine.
//!
//! Access control is described by a *model* (request/policy/role schemas,
//! an effect aggregator and matcher expressions) plus a tabular *policy
//! set*; [`Enforcer`] answers allow/deny for request tuples. RBAC role
//! graphs (domain-scoped, conditional), pluggable persistence adapters,
//! change watchers/dispatchers and multi-node reconciliation sit around
//! that core.
//!
//! ```no_run
//! use warden::Enforcer;
//!
//! let model = r#"
//! [request_definition]
//! r = sub, obj, act
//!
//! [policy_definition]
//! p = sub, obj, act
//!
//! [policy_effect]
//! e = some(where (p.eft == allow))
//!
//! [matchers]
//! m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
//! "#;
//!
//! let e = Enforcer::from_text(model, "p, alice, data1, read\n").unwrap();
//! assert!(e.enforce(&["alice", "data1", "read"]).unwrap());
//! ```

pub mod adapter;
pub mod cache;
pub mod dispatcher;
pub mod effect;
pub mod enforcer;
pub mod error;
pub mod expr;
pub mod functions;
pub mod management;
pub mod model;
pub mod rbac;
pub mod rbac_api;
pub mod registry;
pub mod storage;
pub mod sync;
pub mod watcher;

pub use adapter::{Adapter, FileAdapter, MemoryAdapter, NullAdapter, PolicyFilter};
pub use enforcer::{EnforceContext, EnforceResult, Enforcer, SharedRoleManager};
pub use error::{EngineError, Result};
pub use expr::Value;
pub use model::Model;
pub use rbac::{
    ConditionalRoleManager, DefaultRoleManager, LinkCondition, RoleContext, RoleManager,
};
pub use registry::EnforcerRegistry;
pub use storage::{PolicyStore, Rule};
pub use sync::{DistributedEnforcer, PeerSync, PolicySnapshot, SyncedEnforcer};
pub use watcher::{NoopWatcher, Watcher};

pub use dispatcher::{Dispatcher, NoopDispatcher};

// Test-only printing helper: expands to eprintln! during tests and is
// absent otherwise. Usage in tests: tprintln!("debug: {}", value);
#[cfg(test)]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

#[cfg(not(test))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => {
        if false { let _ = format!($($arg)*); }
    };
}
