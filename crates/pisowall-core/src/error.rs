// ── Core error types ──
//
// User-facing errors from pisowall-core. Callers never see raw iptables
// exit codes or serde failures; the `From` impls below translate the
// adapter and repository errors into domain variants.

use thiserror::Error;

use crate::repository::RepositoryError;

/// Why a session operation was refused in the session's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
pub enum InvalidStateReason {
    #[strum(serialize = "already paused")]
    AlreadyPaused,
    #[strum(serialize = "not paused")]
    NotPaused,
    #[strum(serialize = "no time would be granted")]
    ZeroCredit,
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Caller errors ────────────────────────────────────────────────
    #[error("No active session for {mac}")]
    NotFound { mac: String },

    #[error("An active session already exists for {mac}")]
    DuplicateSession { mac: String },

    #[error("Invalid state for {mac}: {reason}")]
    InvalidState {
        mac: String,
        reason: InvalidStateReason,
    },

    #[error("Invalid MAC address '{input}': expected six hex octets")]
    InvalidMac { input: String },

    // ── Enforcement errors ───────────────────────────────────────────
    #[error("Firewall tool unavailable: {message}")]
    DriverUnavailable { message: String },

    #[error("Firewall command timed out: {message}")]
    DriverTimeout { message: String },

    #[error("Firewall command failed: {message}")]
    Driver { message: String },

    /// A mutation completed but reading the rules back disagreed.
    #[error("Firewall verification failed for {mac}: expected {expected}, observed {observed}")]
    VerificationFailed {
        mac: String,
        expected: String,
        observed: String,
    },

    /// A pause or resume could not bring the firewall into line with the
    /// session state.
    #[error("Enforcement failed for {mac} during {operation}: {detail}")]
    EnforcementFailed {
        mac: String,
        operation: &'static str,
        detail: String,
    },

    // ── Persistence errors ───────────────────────────────────────────
    #[error("Session storage error: {message}")]
    Persistence { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Errors caused by the request itself; retrying cannot help.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::DuplicateSession { .. }
                | Self::InvalidState { .. }
                | Self::InvalidMac { .. }
        )
    }

    /// Errors where the firewall may not reflect the session state.
    pub fn is_enforcement_error(&self) -> bool {
        matches!(
            self,
            Self::DriverUnavailable { .. }
                | Self::DriverTimeout { .. }
                | Self::Driver { .. }
                | Self::VerificationFailed { .. }
                | Self::EnforcementFailed { .. }
        )
    }

    pub fn invalid_state_reason(&self) -> Option<InvalidStateReason> {
        match self {
            Self::InvalidState { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

// ── Conversion from lower-layer errors ───────────────────────────────

impl From<pisowall_netfilter::Error> for CoreError {
    fn from(err: pisowall_netfilter::Error) -> Self {
        use pisowall_netfilter::Error as Nf;
        match err {
            Nf::Unavailable { tool, reason } => CoreError::DriverUnavailable {
                message: format!("{tool}: {reason}"),
            },
            e @ (Nf::Timeout { .. } | Nf::Busy { .. }) => CoreError::DriverTimeout {
                message: e.to_string(),
            },
            e @ (Nf::CommandFailed { .. } | Nf::Io { .. } | Nf::Parse { .. }) => {
                CoreError::Driver {
                    message: e.to_string(),
                }
            }
        }
    }
}

impl From<RepositoryError> for CoreError {
    fn from(err: RepositoryError) -> Self {
        CoreError::Persistence {
            message: err.to_string(),
        }
    }
}
