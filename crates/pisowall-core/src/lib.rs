// pisowall-core: Session lifecycle, firewall enforcement and reconciliation
// between pisowall-netfilter and consumers (daemon/CLI).

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod firewall;
pub mod manager;
pub mod model;
pub mod reconcile;
pub mod repository;

mod expiry;
mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use clock::{Clock, SystemClock, TokioClock};
pub use config::{DhcpRange, Enforcement, EngineConfig, NetworkConfig};
pub use error::{CoreError, InvalidStateReason};
pub use event::{HealAction, SelfHealEvent, SessionEvent};
pub use firewall::{FirewallDriver, FirewallStatus, MAX_DUPLICATE_SWEEP, client_tag};
pub use manager::{RecoveryReport, SessionManager};
pub use reconcile::{Divergence, ReconcileReport};
pub use repository::{JsonFileRepository, MemoryRepository, RepositoryError, SessionRepository};

pub use model::{
    EndReason, MacAddress, Rate, RateTable, Session, SessionPatch, SessionState,
};
