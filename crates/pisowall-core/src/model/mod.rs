// ── Domain model ──

pub mod mac;
pub mod rates;
pub mod session;

pub use mac::MacAddress;
pub use rates::{Rate, RateTable};
pub use session::{EndReason, Session, SessionPatch, SessionState};
