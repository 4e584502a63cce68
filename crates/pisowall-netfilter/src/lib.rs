// pisowall-netfilter: typed access to the kernel packet filter.
//
// Nothing in here knows about sessions, money or time. It builds rules,
// runs them through a backend, and reads them back.

pub mod backend;
pub mod captive;
pub mod error;
pub mod iptables;
pub mod memory;
pub mod rule;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backend::{BackendFuture, Deletion, RuleBackend};
pub use captive::{
    BASELINE_TAG, BaselineStatus, CaptiveRuleSet, DEFAULT_DENY_TAG, PortalLayout, SetupReport,
    StateMatch, TeardownReport,
};
pub use error::Error;
pub use iptables::{Iptables, IptablesConfig};
pub use memory::{Fault, MemoryBackend};
pub use rule::{Chain, ConnState, Invocation, Policy, Protocol, Rule, Table, Target};
