#![allow(clippy::unwrap_used, dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use pisowall_core::{
    Clock, Enforcement, EngineConfig, FirewallDriver, MacAddress, MemoryRepository,
    SessionManager, SessionRepository, TokioClock,
};
use pisowall_netfilter::MemoryBackend;
use pretty_assertions::assert_eq;

pub fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

pub fn mac(s: &str) -> MacAddress {
    MacAddress::parse(s).unwrap()
}

pub fn config() -> EngineConfig {
    EngineConfig {
        enforcement: Enforcement::Simulated,
        reconcile_interval: Duration::ZERO,
        ..EngineConfig::default()
    }
}

/// A manager over in-memory storage and an in-memory rule table, on
/// tokio's clock.
pub struct Harness {
    pub manager: SessionManager,
    pub repo: Arc<MemoryRepository>,
    pub backend: Arc<MemoryBackend>,
    pub clock: Arc<dyn Clock>,
}

impl Harness {
    pub fn new() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(origin()));
        Self::with(Arc::new(MemoryRepository::new()), clock)
    }

    /// A fresh manager and rule table over existing storage, as after a
    /// reboot.
    pub fn restart(&self) -> Self {
        Self::with(self.repo.clone(), self.clock.clone())
    }

    /// A second manager over the same storage, clock and rule table, like
    /// a one-shot command running beside the daemon.
    pub fn peer(&self) -> Self {
        Self::over(self.repo.clone(), self.clock.clone(), self.backend.clone())
    }

    fn with(repo: Arc<MemoryRepository>, clock: Arc<dyn Clock>) -> Self {
        Self::over(repo, clock, Arc::new(MemoryBackend::new()))
    }

    fn over(
        repo: Arc<MemoryRepository>,
        clock: Arc<dyn Clock>,
        backend: Arc<MemoryBackend>,
    ) -> Self {
        let manager = SessionManager::with_clock(
            config(),
            repo.clone(),
            FirewallDriver::new(backend.clone()),
            clock.clone(),
        );
        Self {
            manager,
            repo,
            backend,
            clock,
        }
    }

    /// Storage, runtime table and firewall all agree.
    pub async fn assert_consistent(&self) {
        let mut persisted: Vec<_> = self
            .repo
            .active_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.mac)
            .collect();
        persisted.sort();
        let mut runtime: Vec<_> = self
            .manager
            .list_active()
            .into_iter()
            .map(|s| s.mac)
            .collect();
        runtime.sort();
        assert_eq!(runtime, persisted, "runtime table diverged from storage");

        let mut deduped = persisted.clone();
        deduped.dedup();
        assert_eq!(deduped, persisted, "more than one active record per MAC");

        for session in self.manager.list_active() {
            assert_eq!(
                self.manager.firewall().is_allowed(&session.mac).await,
                session.should_be_allowed(),
                "firewall disagrees for {}",
                session.mac
            );
        }
        assert!(self.manager.audit().await.is_empty());
    }
}
