// ── Consistency reconciler ──
//
// Storage is the source of truth for which sessions exist; the runtime
// table mirrors it; the firewall must agree with the runtime table. One
// pass walks those three layers and corrects whichever disagrees, one
// client at a time under that client's lock.

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::event::{HealAction, SelfHealEvent, SessionEvent};
use crate::firewall::FirewallStatus;
use crate::manager::{Restored, SessionManager};
use crate::model::{EndReason, MacAddress, Session};

/// Everything one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Persisted sessions brought into the runtime table.
    pub restored: Vec<MacAddress>,
    /// Sessions ended because their time ran out.
    pub expired: Vec<MacAddress>,
    /// Runtime sessions with no persisted record, ended.
    pub orphaned: Vec<MacAddress>,
    /// Runtime sessions replaced by a newer persisted record.
    pub refreshed: Vec<MacAddress>,
    pub healed: Vec<SelfHealEvent>,
    /// Blocks that failed earlier and succeeded on retry.
    pub retried_blocks: Vec<MacAddress>,
    pub errors: Vec<String>,
}

impl ReconcileReport {
    /// Nothing needed correcting and nothing failed.
    pub fn is_clean(&self) -> bool {
        self.corrections() == 0 && self.errors.is_empty()
    }

    pub fn corrections(&self) -> usize {
        self.restored.len()
            + self.expired.len()
            + self.orphaned.len()
            + self.refreshed.len()
            + self.healed.len()
            + self.retried_blocks.len()
    }
}

/// A runtime session whose live rules disagree with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Divergence {
    pub mac: MacAddress,
    pub should_be_allowed: bool,
    pub status: FirewallStatus,
}

#[derive(Debug, Default)]
struct ClientCheck {
    orphaned: bool,
    refreshed: bool,
    healed: Option<SelfHealEvent>,
    error: Option<String>,
}

impl SessionManager {
    /// Run one reconciliation pass now.
    pub async fn reconcile_now(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        self.retry_pending_blocks(&mut report).await;
        self.sweep_expired(&mut report).await;
        self.restore_missing(&mut report).await;
        self.check_clients(&mut report).await;
        self.inner.locks.prune();

        if report.is_clean() {
            debug!(
                sessions = self.inner.table.len(),
                timers = self.inner.expiry.len(),
                locks = self.inner.locks.len(),
                "reconcile pass: consistent"
            );
        } else {
            info!(
                restored = report.restored.len(),
                expired = report.expired.len(),
                orphaned = report.orphaned.len(),
                refreshed = report.refreshed.len(),
                healed = report.healed.len(),
                retried_blocks = report.retried_blocks.len(),
                errors = report.errors.len(),
                "reconcile pass corrected drift"
            );
        }
        report
    }

    /// Runtime sessions whose firewall status disagrees with their pause
    /// flag. Read-only.
    pub async fn audit(&self) -> Vec<Divergence> {
        let mut found = Vec::new();
        for session in self.inner.table.snapshot().iter() {
            let should_be_allowed = session.should_be_allowed();
            let status = match self.inner.firewall.status(&session.mac).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(mac = %session.mac, error = %e, "rule query failed during audit");
                    FirewallStatus::default()
                }
            };
            if status.is_allowed != should_be_allowed {
                found.push(Divergence {
                    mac: session.mac.clone(),
                    should_be_allowed,
                    status,
                });
            }
        }
        found
    }

    // ── Steps ────────────────────────────────────────────────────────

    async fn retry_pending_blocks(&self, report: &mut ReconcileReport) {
        let pending: Vec<_> = self
            .inner
            .pending_blocks
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        for (mac, ip) in pending {
            let _guard = self.inner.locks.acquire(&mac).await;
            if self.inner.table.contains(&mac) {
                // A new session took over this client.
                self.inner.pending_blocks.remove(&mac);
                continue;
            }
            match self.inner.firewall.block(&mac, ip).await {
                Ok(_) => {
                    self.inner.pending_blocks.remove(&mac);
                    report.retried_blocks.push(mac);
                }
                Err(e) => report.errors.push(format!("{mac}: block retry: {e}")),
            }
        }
    }

    async fn sweep_expired(&self, report: &mut ReconcileReport) {
        for mac in self.inner.table.macs() {
            let _guard = self.inner.locks.acquire(&mac).await;
            let due = self
                .inner
                .table
                .get(&mac)
                .is_some_and(|s| s.is_expired(self.now()));
            if !due {
                continue;
            }
            // Storage decides: another process may have extended or paused it.
            match self.expire_locked(&mac).await {
                Ok(true) => report.expired.push(mac),
                Ok(false) if self.inner.table.contains(&mac) => report.refreshed.push(mac),
                Ok(false) => report.orphaned.push(mac),
                Err(e) => report.errors.push(format!("{mac}: expire: {e}")),
            }
        }

        // Records that ran out without ever reaching this runtime table.
        let now = self.now();
        let finalized = match self
            .storage(move |repo| repo.cleanup_expired_sessions(now))
            .await
        {
            Ok(finalized) => finalized,
            Err(e) => {
                report.errors.push(format!("cleanup: {e}"));
                return;
            }
        };
        for record in finalized {
            let mac = record.mac.clone();
            let _guard = self.inner.locks.acquire(&mac).await;
            self.inner.expiry.cancel(&mac);
            self.inner.table.remove(&mac);
            self.emit(SessionEvent::Ended {
                mac: mac.clone(),
                reason: EndReason::Expired,
            });
            if let Err(e) = self.inner.firewall.block(&mac, record.ip).await {
                self.inner.pending_blocks.insert(mac.clone(), record.ip);
                report.errors.push(format!("{mac}: block: {e}"));
            }
            report.expired.push(mac);
        }
    }

    async fn restore_missing(&self, report: &mut ReconcileReport) {
        let persisted = match self.storage(|repo| repo.active_sessions()).await {
            Ok(persisted) => persisted,
            Err(e) => {
                report.errors.push(format!("load: {e}"));
                return;
            }
        };

        for record in persisted {
            let mac = record.mac.clone();
            if self.inner.table.contains(&mac) {
                continue;
            }
            let _guard = self.inner.locks.acquire(&mac).await;
            // Re-read under the lock; a transition may have raced us.
            if self.inner.table.contains(&mac) {
                continue;
            }
            let key = mac.clone();
            let record = match self.storage(move |repo| repo.find_active(&key)).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    report.errors.push(format!("{mac}: load: {e}"));
                    continue;
                }
            };
            match self.restore_locked(record).await {
                Ok(Restored::Expired) => report.expired.push(mac),
                Ok(Restored::Running | Restored::Paused) => report.restored.push(mac),
                Err(e) => report.errors.push(format!("{mac}: restore: {e}")),
            }
        }
    }

    async fn check_clients(&self, report: &mut ReconcileReport) {
        let macs = self.inner.table.macs();
        let checks = join_all(macs.iter().map(|mac| self.check_client(mac))).await;

        for (mac, check) in macs.into_iter().zip(checks) {
            if check.orphaned {
                report.orphaned.push(mac.clone());
            }
            if check.refreshed {
                report.refreshed.push(mac.clone());
            }
            if let Some(heal) = check.healed {
                report.healed.push(heal);
            }
            if let Some(error) = check.error {
                report.errors.push(format!("{mac}: {error}"));
            }
        }
    }

    /// Compare one runtime session with storage and with the firewall.
    async fn check_client(&self, mac: &MacAddress) -> ClientCheck {
        let mut check = ClientCheck::default();
        let _guard = self.inner.locks.acquire(mac).await;
        let Some(runtime) = self.inner.table.get(mac) else {
            return check;
        };

        let key = mac.clone();
        let session = match self.storage(move |repo| repo.find_active(&key)).await {
            Err(e) => {
                check.error = Some(format!("load: {e}"));
                return check;
            }
            Ok(None) => {
                check.orphaned = true;
                if let Err(e) = self.end_locked(mac, EndReason::Orphaned).await {
                    check.error = Some(format!("end orphan: {e}"));
                }
                return check;
            }
            Ok(Some(record)) if record != *runtime => {
                self.adopt(&record);
                check.refreshed = true;
                record
            }
            Ok(Some(record)) => record,
        };

        let before = match self.inner.firewall.status(mac).await {
            Ok(status) => status,
            Err(e) => {
                check.error = Some(format!("status: {e}"));
                return check;
            }
        };
        if before.is_allowed != session.should_be_allowed() {
            check.healed = Some(self.heal(&session, before).await);
        }
        check
    }

    /// Take a persisted record written elsewhere as the runtime truth.
    pub(crate) fn adopt(&self, record: &Session) {
        debug!(
            mac = %record.mac,
            end_time = %record.end_time,
            paused = record.paused,
            "adopting stored session"
        );
        self.inner.table.upsert(record.clone());
        if record.paused {
            self.inner.expiry.cancel(&record.mac);
        } else {
            self.inner.expiry.schedule(&record.mac, record.end_time);
        }
    }

    async fn heal(&self, session: &Session, before: FirewallStatus) -> SelfHealEvent {
        let (action, result) = if session.should_be_allowed() {
            (
                HealAction::Allowed,
                self.inner.firewall.allow(&session.mac, session.ip).await,
            )
        } else {
            (
                HealAction::Blocked,
                self.inner.firewall.block(&session.mac, session.ip).await,
            )
        };
        let (after, error) = match result {
            Ok(status) => (Some(status), None),
            Err(e) => (None, Some(e.to_string())),
        };

        warn!(
            mac = %session.mac,
            paused = session.paused,
            %action,
            %before,
            after = ?after.map(|s| s.to_string()),
            error = ?error,
            "self-healing: firewall disagreed with session state"
        );
        let event = SelfHealEvent {
            mac: session.mac.clone(),
            paused: session.paused,
            action,
            before,
            after,
            error,
            at: self.now(),
        };
        self.emit(SessionEvent::SelfHealed(event.clone()));
        event
    }
}
