use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::{RepositoryError, SessionRepository};
use crate::model::{MacAddress, Session, SessionPatch};

/// Process-local [`SessionRepository`] for tests and simulation.
///
/// Writes can be made to fail on demand to exercise the
/// persist-before-mutate path.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: Mutex<Vec<Session>>,
    fail_writes: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later write fail with [`RepositoryError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Session>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

impl SessionRepository for MemoryRepository {
    fn add_session(&self, session: &Session) -> Result<(), RepositoryError> {
        self.check_writable()?;
        super::add(&mut self.lock(), session)
    }

    fn update_session(
        &self,
        mac: &MacAddress,
        patch: &SessionPatch,
    ) -> Result<Option<Session>, RepositoryError> {
        self.check_writable()?;
        Ok(super::update(&mut self.lock(), mac, patch))
    }

    fn active_sessions(&self) -> Result<Vec<Session>, RepositoryError> {
        Ok(super::active(&self.lock()))
    }

    fn find_active(&self, mac: &MacAddress) -> Result<Option<Session>, RepositoryError> {
        Ok(super::find_active(&self.lock(), mac))
    }

    fn cleanup_expired_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, RepositoryError> {
        self.check_writable()?;
        Ok(super::cleanup_expired(&mut self.lock(), now))
    }

    fn all_sessions(&self) -> Result<Vec<Session>, RepositoryError> {
        Ok(self.lock().clone())
    }
}
