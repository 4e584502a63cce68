//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use pisowall_config::ConfigError;
use pisowall_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const ENFORCEMENT: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Sessions ─────────────────────────────────────────────────────
    #[error("No active session for '{identifier}'")]
    #[diagnostic(
        code(pisowall::not_found),
        help("Run: pisowall sessions list")
    )]
    NotFound { identifier: String },

    #[error("An active session already exists for {mac}")]
    #[diagnostic(
        code(pisowall::conflict),
        help("Use: pisowall sessions extend {mac} <minutes>")
    )]
    Conflict { mac: String },

    #[error("Cannot change the session for {mac}: {reason}")]
    #[diagnostic(code(pisowall::invalid_state))]
    InvalidState { mac: String, reason: String },

    // ── Enforcement ──────────────────────────────────────────────────
    #[error("Firewall tool unavailable: {message}")]
    #[diagnostic(
        code(pisowall::firewall_unavailable),
        help(
            "iptables must be installed and the command run as root.\n\
             Set firewall.iptables_path, or use --simulate to try things out."
        )
    )]
    FirewallUnavailable { message: String },

    #[error("Firewall enforcement failed: {message}")]
    #[diagnostic(
        code(pisowall::enforcement),
        help("Run: pisowall reconcile   to bring rules back in line with sessions")
    )]
    Enforcement { message: String },

    #[error("Firewall command timed out: {message}")]
    #[diagnostic(
        code(pisowall::timeout),
        help("Another process may hold the xtables lock. Raise firewall.command_timeout_secs if this persists.")
    )]
    Timeout { message: String },

    // ── Storage ──────────────────────────────────────────────────────
    #[error("Session storage error: {message}")]
    #[diagnostic(
        code(pisowall::storage),
        help("Check that engine.state_dir exists and is writable.")
    )]
    Storage { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(pisowall::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(pisowall::config),
        help("Check the configuration file and PISOWALL_* environment variables.")
    )]
    Config(Box<ConfigError>),

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(pisowall::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(pisowall::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Internal / IO ────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    #[diagnostic(code(pisowall::internal))]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } | Self::InvalidState { .. } | Self::ConfigExists { .. } => {
                exit_code::CONFLICT
            }
            Self::FirewallUnavailable { .. } | Self::Enforcement { .. } => exit_code::ENFORCEMENT,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Config(_) | Self::NonInteractiveRequiresYes { .. } => {
                exit_code::USAGE
            }
            Self::Storage { .. } | Self::Internal(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { mac } => CliError::NotFound { identifier: mac },

            CoreError::DuplicateSession { mac } => CliError::Conflict { mac },

            CoreError::InvalidState { mac, reason } => CliError::InvalidState {
                mac,
                reason: reason.to_string(),
            },

            CoreError::InvalidMac { input } => CliError::Validation {
                field: "mac".into(),
                reason: format!("'{input}' is not a MAC address"),
            },

            CoreError::DriverUnavailable { message } => CliError::FirewallUnavailable { message },

            CoreError::DriverTimeout { message } => CliError::Timeout { message },

            e @ (CoreError::Driver { .. }
            | CoreError::VerificationFailed { .. }
            | CoreError::EnforcementFailed { .. }) => CliError::Enforcement {
                message: e.to_string(),
            },

            CoreError::Persistence { message } => CliError::Storage { message },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

impl From<pisowall_netfilter::Error> for CliError {
    fn from(err: pisowall_netfilter::Error) -> Self {
        CoreError::from(err).into()
    }
}

impl From<pisowall_core::RepositoryError> for CliError {
    fn from(err: pisowall_core::RepositoryError) -> Self {
        CoreError::from(err).into()
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(Box::new(other)),
        }
    }
}
