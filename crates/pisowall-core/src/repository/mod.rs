// ── Session persistence ──
//
// The engine persists every transition before touching runtime state,
// through this narrow interface. There is no transaction API; each call
// is one atomic step on its own.

mod json_file;
mod memory;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{EndReason, MacAddress, Session, SessionPatch};

pub use json_file::JsonFileRepository;
pub use memory::MemoryRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("an active record already exists for {mac}")]
    DuplicateActive { mac: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt session file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage for session records.
pub trait SessionRepository: Send + Sync {
    /// Store a new active record. Fails if `mac` already has one.
    fn add_session(&self, session: &Session) -> Result<(), RepositoryError>;

    /// Patch the active record for `mac`. Returns the updated record, or
    /// `None` if `mac` has no active record.
    fn update_session(
        &self,
        mac: &MacAddress,
        patch: &SessionPatch,
    ) -> Result<Option<Session>, RepositoryError>;

    fn active_sessions(&self) -> Result<Vec<Session>, RepositoryError>;

    fn find_active(&self, mac: &MacAddress) -> Result<Option<Session>, RepositoryError>;

    /// Finalize running records whose end time is at or before `now` and
    /// return them.
    fn cleanup_expired_sessions(&self, now: DateTime<Utc>)
    -> Result<Vec<Session>, RepositoryError>;

    /// Every record, ended ones included, oldest first.
    fn all_sessions(&self) -> Result<Vec<Session>, RepositoryError>;
}

// ── Shared record-list operations ────────────────────────────────────

fn add(records: &mut Vec<Session>, session: &Session) -> Result<(), RepositoryError> {
    if records.iter().any(|s| s.active && s.mac == session.mac) {
        return Err(RepositoryError::DuplicateActive {
            mac: session.mac.to_string(),
        });
    }
    records.push(session.clone());
    Ok(())
}

fn update(records: &mut [Session], mac: &MacAddress, patch: &SessionPatch) -> Option<Session> {
    let record = records.iter_mut().find(|s| s.active && &s.mac == mac)?;
    patch.apply(record);
    Some(record.clone())
}

fn active(records: &[Session]) -> Vec<Session> {
    records.iter().filter(|s| s.active).cloned().collect()
}

fn find_active(records: &[Session], mac: &MacAddress) -> Option<Session> {
    records.iter().find(|s| s.active && &s.mac == mac).cloned()
}

fn cleanup_expired(records: &mut [Session], now: DateTime<Utc>) -> Vec<Session> {
    let patch = SessionPatch::end(EndReason::Expired, now);
    records
        .iter_mut()
        .filter(|s| s.is_expired(now))
        .map(|s| {
            patch.apply(s);
            s.clone()
        })
        .collect()
}
