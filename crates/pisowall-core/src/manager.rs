// ── Session manager ──
//
// Owns the runtime session table, the expiry queue and the per-client
// locks, and drives every lifecycle transition: persist first, then
// update runtime state, then enforce on the firewall. Background tasks
// fire expiries and run the reconciliation pass.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{CoreError, InvalidStateReason};
use crate::event::SessionEvent;
use crate::expiry::ExpiryQueue;
use crate::firewall::FirewallDriver;
use crate::model::{EndReason, MacAddress, Session, SessionPatch};
use crate::repository::{RepositoryError, SessionRepository};
use crate::store::{ClientLocks, SessionTable};

const EVENT_CHANNEL_SIZE: usize = 256;

/// Longest single sleep of the expiry task, so wall-clock jumps are
/// noticed within this bound.
const MAX_EXPIRY_SLEEP: Duration = Duration::from_secs(60);

/// Delay before an expiry that could not read storage is tried again.
const EXPIRY_RETRY_SECS: i64 = 5;

// ── Recovery ─────────────────────────────────────────────────────────

/// What startup recovery did with the persisted active records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub restored: Vec<MacAddress>,
    pub paused: Vec<MacAddress>,
    pub expired: Vec<MacAddress>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Restored {
    Running,
    Paused,
    Expired,
}

// ── SessionManager ───────────────────────────────────────────────────

/// The engine's entry point.
///
/// Cheaply cloneable via `Arc<ManagerInner>`. Every mutating operation
/// for a MAC runs under that MAC's lock, so transitions for one client
/// are serialized while different clients proceed in parallel.
#[derive(Clone)]
pub struct SessionManager {
    pub(crate) inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    pub(crate) config: EngineConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) repo: Arc<dyn SessionRepository>,
    pub(crate) firewall: FirewallDriver,
    pub(crate) table: SessionTable,
    pub(crate) locks: ClientLocks,
    pub(crate) expiry: ExpiryQueue,
    /// Clients whose final block failed, with their last known IP.
    pub(crate) pending_blocks: DashMap<MacAddress, Option<Ipv4Addr>>,
    event_tx: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionManager {
    /// Create a manager on the system clock. Does not touch storage or
    /// the firewall: call [`recover()`](Self::recover) and
    /// [`spawn_background()`](Self::spawn_background) to go live.
    pub fn new(
        config: EngineConfig,
        repo: Arc<dyn SessionRepository>,
        firewall: FirewallDriver,
    ) -> Self {
        Self::with_clock(config, repo, firewall, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: EngineConfig,
        repo: Arc<dyn SessionRepository>,
        firewall: FirewallDriver,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                clock,
                repo,
                firewall,
                table: SessionTable::new(),
                locks: ClientLocks::new(),
                expiry: ExpiryQueue::new(),
                pending_blocks: DashMap::new(),
                event_tx,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn firewall(&self) -> &FirewallDriver {
        &self.inner.firewall
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Start a session paid for with `pesos`.
    pub async fn start(
        &self,
        mac: &MacAddress,
        pesos: u32,
        ip: Option<Ipv4Addr>,
    ) -> Result<Session, CoreError> {
        let minutes = self.inner.config.rates.minutes_for(pesos);
        self.open_session(mac, pesos, minutes, ip).await
    }

    /// Start a session for a known number of minutes (voucher credit).
    pub async fn start_minutes(
        &self,
        mac: &MacAddress,
        minutes: u32,
        ip: Option<Ipv4Addr>,
    ) -> Result<Session, CoreError> {
        self.open_session(mac, 0, minutes, ip).await
    }

    async fn open_session(
        &self,
        mac: &MacAddress,
        pesos: u32,
        minutes: u32,
        ip: Option<Ipv4Addr>,
    ) -> Result<Session, CoreError> {
        if minutes == 0 {
            return Err(invalid_state(mac, InvalidStateReason::ZeroCredit));
        }
        let _guard = self.inner.locks.acquire(mac).await;

        let stored = {
            let mac = mac.clone();
            self.storage(move |repo| repo.find_active(&mac)).await?
        };
        if self.inner.table.contains(mac) || stored.is_some() {
            return Err(CoreError::DuplicateSession {
                mac: mac.to_string(),
            });
        }
        self.check_dhcp_range(mac, ip);

        let session = Session::new(mac.clone(), ip, self.now(), minutes, pesos);
        let record = session.clone();
        self.storage(move |repo| repo.add_session(&record))
            .await
            .map_err(|e| match e {
                RepositoryError::DuplicateActive { mac } => CoreError::DuplicateSession { mac },
                other => other.into(),
            })?;
        self.inner.table.upsert(session.clone());
        self.inner.expiry.schedule(mac, session.end_time);
        self.inner.pending_blocks.remove(mac);

        info!(%mac, ?ip, pesos, minutes, end_time = %session.end_time, "session started");
        self.emit(SessionEvent::Started {
            session: session.clone(),
        });

        self.enforce_allow(&session, "start").await?;
        Ok(session)
    }

    /// Add `minutes` to an active session.
    pub async fn extend(&self, mac: &MacAddress, minutes: u32) -> Result<Session, CoreError> {
        self.add_time(mac, minutes, 0).await
    }

    /// Add the time bought by `pesos` to an active session.
    pub async fn extend_pesos(&self, mac: &MacAddress, pesos: u32) -> Result<Session, CoreError> {
        let minutes = self.inner.config.rates.minutes_for(pesos);
        self.add_time(mac, minutes, pesos).await
    }

    async fn add_time(
        &self,
        mac: &MacAddress,
        minutes: u32,
        pesos: u32,
    ) -> Result<Session, CoreError> {
        if minutes == 0 {
            return Err(invalid_state(mac, InvalidStateReason::ZeroCredit));
        }
        let _guard = self.inner.locks.acquire(mac).await;
        let current = self.require_live(mac).await?;

        let patch = SessionPatch {
            end_time: Some(current.end_time + TimeDelta::minutes(i64::from(minutes))),
            add_minutes: minutes,
            add_pesos: pesos,
            ..SessionPatch::default()
        };
        let updated = self.persist(mac, patch).await?;
        self.inner.table.upsert(updated.clone());
        if !updated.paused {
            self.inner.expiry.schedule(mac, updated.end_time);
        }

        info!(%mac, minutes, pesos, end_time = %updated.end_time, "session extended");
        self.emit(SessionEvent::Extended {
            mac: mac.clone(),
            end_time: updated.end_time,
            minutes,
        });
        Ok(updated)
    }

    /// Stop the clock and cut the client off until it resumes.
    pub async fn pause(&self, mac: &MacAddress) -> Result<Session, CoreError> {
        let _guard = self.inner.locks.acquire(mac).await;
        let current = self.require_live(mac).await?;
        if current.paused {
            return Err(invalid_state(mac, InvalidStateReason::AlreadyPaused));
        }

        let now = self.now();
        let patch = SessionPatch {
            paused: Some(true),
            paused_at: Some(Some(now)),
            ..SessionPatch::default()
        };
        let updated = self.persist(mac, patch).await?;
        self.inner.table.upsert(updated.clone());
        self.inner.expiry.cancel(mac);

        let remaining = updated.remaining(now);
        info!(%mac, remaining_secs = remaining.num_seconds(), "session paused");
        self.emit(SessionEvent::Paused {
            mac: mac.clone(),
            remaining_secs: remaining.num_seconds(),
        });

        self.inner
            .firewall
            .block(mac, updated.ip)
            .await
            .map_err(|e| enforcement_failure(mac, "pause", e))?;
        if self.inner.firewall.is_allowed(mac).await {
            return Err(CoreError::EnforcementFailed {
                mac: mac.to_string(),
                operation: "pause",
                detail: "client is still allowed after block".into(),
            });
        }
        Ok(updated)
    }

    /// Restart the clock, crediting the paused interval, and let the
    /// client back through.
    pub async fn resume(&self, mac: &MacAddress) -> Result<Session, CoreError> {
        let _guard = self.inner.locks.acquire(mac).await;
        let current = self.current(mac).await?.ok_or_else(|| not_found(mac))?;
        if !current.paused {
            return Err(invalid_state(mac, InvalidStateReason::NotPaused));
        }

        let now = self.now();
        let paused_for = (now - current.paused_at.unwrap_or(now)).max(TimeDelta::zero());
        let patch = SessionPatch {
            paused: Some(false),
            paused_at: Some(None),
            end_time: Some(current.end_time + paused_for),
            paused_ms: Some(current.paused_ms + paused_for.num_milliseconds()),
            ..SessionPatch::default()
        };
        let updated = self.persist(mac, patch).await?;
        self.inner.table.upsert(updated.clone());
        self.inner.expiry.schedule(mac, updated.end_time);

        info!(
            %mac,
            paused_secs = paused_for.num_seconds(),
            end_time = %updated.end_time,
            "session resumed"
        );
        self.emit(SessionEvent::Resumed {
            mac: mac.clone(),
            end_time: updated.end_time,
        });

        self.inner
            .firewall
            .allow(mac, updated.ip)
            .await
            .map_err(|e| enforcement_failure(mac, "resume", e))?;
        if !self.inner.firewall.is_allowed(mac).await {
            return Err(CoreError::EnforcementFailed {
                mac: mac.to_string(),
                operation: "resume",
                detail: "client is still blocked after allow".into(),
            });
        }
        Ok(updated)
    }

    /// End the session for `mac`, if any, and block it. Idempotent:
    /// ending an unknown or already-ended MAC still blocks it and returns
    /// `Ok(None)`.
    pub async fn end(&self, mac: &MacAddress) -> Result<Option<Session>, CoreError> {
        let _guard = self.inner.locks.acquire(mac).await;
        self.end_locked(mac, EndReason::Manual).await
    }

    /// Caller must hold the lock for `mac`.
    pub(crate) async fn end_locked(
        &self,
        mac: &MacAddress,
        reason: EndReason,
    ) -> Result<Option<Session>, CoreError> {
        let now = self.now();
        let patch = SessionPatch::end(reason, now);
        let ended = {
            let (mac, patch) = (mac.clone(), patch.clone());
            self.storage(move |repo| repo.update_session(&mac, &patch)).await?
        };
        self.inner.expiry.cancel(mac);

        let runtime = self.inner.table.get(mac);
        let ip = ended
            .as_ref()
            .and_then(|s| s.ip)
            .or_else(|| runtime.as_ref().and_then(|s| s.ip));
        let block = self.inner.firewall.block(mac, ip).await;
        self.inner.table.remove(mac);

        let ended = ended.or_else(|| {
            runtime.map(|s| {
                let mut s = Session::clone(&s);
                patch.apply(&mut s);
                s
            })
        });
        if ended.is_some() {
            info!(%mac, %reason, "session ended");
            self.emit(SessionEvent::Ended {
                mac: mac.clone(),
                reason,
            });
        }

        match block {
            Ok(_) => {
                self.inner.pending_blocks.remove(mac);
                Ok(ended)
            }
            Err(e) => {
                warn!(%mac, error = %e, "block after session end failed, will retry");
                self.inner.pending_blocks.insert(mac.clone(), ip);
                Err(e)
            }
        }
    }

    /// Called by the expiry task when `mac`'s deadline comes up.
    async fn expire(&self, mac: &MacAddress) {
        let _guard = self.inner.locks.acquire(mac).await;
        if !self.inner.table.contains(mac) {
            return;
        }
        if let Err(e) = self.expire_locked(mac).await {
            warn!(%mac, error = %e, "session expiry failed");
            if self.inner.table.contains(mac) {
                let retry_at = self.now() + TimeDelta::seconds(EXPIRY_RETRY_SECS);
                self.inner.expiry.schedule(mac, retry_at);
            }
        }
    }

    /// End `mac`'s session if the stored record agrees its time is up.
    /// A record extended or paused elsewhere is adopted and rescheduled
    /// instead. Returns whether the session ended as expired. Caller must
    /// hold the lock for `mac`.
    pub(crate) async fn expire_locked(&self, mac: &MacAddress) -> Result<bool, CoreError> {
        let Some(current) = self.current(mac).await? else {
            return Ok(false);
        };
        if current.is_expired(self.now()) {
            self.end_locked(mac, EndReason::Expired).await?;
            return Ok(true);
        }
        if !current.paused {
            // Extended after this deadline was queued.
            self.inner.expiry.schedule(mac, current.end_time);
        }
        Ok(false)
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Seconds left for `mac`; frozen while paused.
    pub fn time_remaining(&self, mac: &MacAddress) -> Result<i64, CoreError> {
        let session = self.require(mac)?;
        Ok(session.remaining(self.now()).num_seconds())
    }

    pub fn get_session(&self, mac: &MacAddress) -> Option<Session> {
        self.inner.table.get(mac).map(|s| Session::clone(&s))
    }

    pub fn get_session_by_ip(&self, ip: Ipv4Addr) -> Option<Session> {
        self.inner.table.get_by_ip(ip).map(|s| Session::clone(&s))
    }

    pub fn is_session_active(&self, mac: &MacAddress) -> bool {
        self.inner.table.get(mac).is_some_and(|s| s.active)
    }

    /// Live sessions, soonest to end first.
    pub fn list_active(&self) -> Vec<Session> {
        self.inner
            .table
            .snapshot()
            .iter()
            .map(|s| (**s).clone())
            .collect()
    }

    /// Every persisted record, ended ones included.
    pub async fn history(&self) -> Result<Vec<Session>, CoreError> {
        Ok(self.storage(|repo| repo.all_sessions()).await?)
    }

    /// Watch the live session list.
    pub fn sessions(&self) -> watch::Receiver<Arc<Vec<Arc<Session>>>> {
        self.inner.table.subscribe()
    }

    /// Subscribe to lifecycle and self-healing events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Deadline currently queued for `mac`, if any.
    pub fn scheduled_expiry(&self, mac: &MacAddress) -> Option<DateTime<Utc>> {
        self.inner.expiry.deadline(mac)
    }

    // ── Startup ──────────────────────────────────────────────────────

    /// Load persisted active sessions and bring the firewall in line.
    ///
    /// Sessions that ran out while the engine was down are finalized and
    /// blocked. Paused sessions stay paused and blocked, with the downtime
    /// counted as paused time. Everything else is allowed and scheduled.
    pub async fn recover(&self) -> Result<RecoveryReport, CoreError> {
        let mut report = RecoveryReport::default();
        for record in self.storage(|repo| repo.active_sessions()).await? {
            let mac = record.mac.clone();
            let _guard = self.inner.locks.acquire(&mac).await;
            if self.inner.table.contains(&mac) {
                continue;
            }
            match self.restore_locked(record).await {
                Ok(Restored::Running) => report.restored.push(mac),
                Ok(Restored::Paused) => report.paused.push(mac),
                Ok(Restored::Expired) => report.expired.push(mac),
                Err(e) => {
                    warn!(%mac, error = %e, "could not fully restore session");
                    report.errors.push(format!("{mac}: {e}"));
                }
            }
        }
        info!(
            restored = report.restored.len(),
            paused = report.paused.len(),
            expired = report.expired.len(),
            errors = report.errors.len(),
            "session recovery complete"
        );
        Ok(report)
    }

    /// Load runtime state from storage without side effects: no firewall
    /// calls, no timers. For one-shot tools operating on a single client.
    pub async fn hydrate(&self) -> Result<usize, CoreError> {
        let now = self.now();
        let mut loaded = 0;
        for record in self.storage(|repo| repo.active_sessions()).await? {
            if !record.is_expired(now) {
                self.inner.table.upsert(record);
                loaded += 1;
            }
        }
        debug!(loaded, "runtime table hydrated from storage");
        Ok(loaded)
    }

    /// Bring one persisted active record into the runtime table. Caller
    /// must hold the lock for its MAC.
    pub(crate) async fn restore_locked(&self, record: Session) -> Result<Restored, CoreError> {
        let now = self.now();
        let mac = record.mac.clone();

        if record.is_expired(now) {
            self.end_locked(&mac, EndReason::ExpiredDuringDowntime)
                .await?;
            return Ok(Restored::Expired);
        }

        if record.paused {
            let paused_at = record.paused_at.unwrap_or(now);
            let unseen = (now - paused_at).max(TimeDelta::zero());
            let patch = SessionPatch {
                end_time: Some(record.end_time + unseen),
                paused_at: Some(Some(now)),
                paused_ms: Some(record.paused_ms + unseen.num_milliseconds()),
                ..SessionPatch::default()
            };
            let updated = self.persist(&mac, patch).await?;
            self.inner.table.upsert(updated.clone());
            self.inner.expiry.cancel(&mac);
            debug!(%mac, unseen_secs = unseen.num_seconds(), "paused session restored");
            self.emit(SessionEvent::Restored { mac: mac.clone() });
            self.inner.firewall.block(&mac, updated.ip).await?;
            return Ok(Restored::Paused);
        }

        self.inner.table.upsert(record.clone());
        self.inner.expiry.schedule(&mac, record.end_time);
        debug!(%mac, end_time = %record.end_time, "session restored");
        self.emit(SessionEvent::Restored { mac: mac.clone() });
        self.inner.firewall.allow(&mac, record.ip).await?;
        Ok(Restored::Running)
    }

    // ── Background tasks ─────────────────────────────────────────────

    /// Spawn the expiry task and, if an interval is configured, the
    /// periodic reconciliation task.
    pub async fn spawn_background(&self) {
        let mut handles = self.inner.task_handles.lock().await;

        let mgr = self.clone();
        let cancel = self.inner.cancel.clone();
        handles.push(tokio::spawn(expiry_task(mgr, cancel)));

        let interval = self.inner.config.reconcile_interval;
        if !interval.is_zero() {
            let mgr = self.clone();
            let cancel = self.inner.cancel.clone();
            handles.push(tokio::spawn(reconcile_task(mgr, interval, cancel)));
        }
        debug!(tasks = handles.len(), "background tasks started");
    }

    /// Cancel background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("session manager stopped");
    }

    // ── Helpers ──────────────────────────────────────────────────────

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.event_tx.send(event);
    }

    fn require(&self, mac: &MacAddress) -> Result<Arc<Session>, CoreError> {
        self.inner.table.get(mac).ok_or_else(|| not_found(mac))
    }

    /// The session for `mac` as storage has it right now, with the
    /// runtime table brought in line: a record changed by another process
    /// is adopted, and a runtime entry whose record was ended elsewhere is
    /// ended here as orphaned. Caller must hold the lock for `mac`.
    pub(crate) async fn current(
        &self,
        mac: &MacAddress,
    ) -> Result<Option<Arc<Session>>, CoreError> {
        let stored = {
            let mac = mac.clone();
            self.storage(move |repo| repo.find_active(&mac)).await?
        };
        match (stored, self.inner.table.get(mac)) {
            (Some(record), Some(runtime)) if record == *runtime => Ok(Some(runtime)),
            (Some(record), _) => {
                self.adopt(&record);
                Ok(Some(Arc::new(record)))
            }
            (None, Some(_)) => {
                self.end_locked(mac, EndReason::Orphaned).await?;
                Ok(None)
            }
            (None, None) => Ok(None),
        }
    }

    /// Like [`current`](Self::current), but a session whose time already
    /// ran out is ended on the spot, and either way a missing session is
    /// reported as not found. Caller must hold the lock for `mac`.
    async fn require_live(&self, mac: &MacAddress) -> Result<Arc<Session>, CoreError> {
        let current = self.current(mac).await?.ok_or_else(|| not_found(mac))?;
        if current.is_expired(self.now()) {
            self.end_locked(mac, EndReason::Expired).await?;
            return Err(not_found(mac));
        }
        Ok(current)
    }

    pub(crate) async fn persist(
        &self,
        mac: &MacAddress,
        patch: SessionPatch,
    ) -> Result<Session, CoreError> {
        let key = mac.clone();
        self.storage(move |repo| repo.update_session(&key, &patch))
            .await?
            .ok_or_else(|| not_found(mac))
    }

    /// Run one repository call on the blocking pool, off the executor.
    pub(crate) async fn storage<T, F>(&self, op: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SessionRepository) -> Result<T, RepositoryError> + Send + 'static,
    {
        let repo = Arc::clone(&self.inner.repo);
        tokio::task::spawn_blocking(move || op(repo.as_ref()))
            .await
            .map_err(|e| RepositoryError::Unavailable(format!("storage task failed: {e}")))?
    }

    async fn enforce_allow(
        &self,
        session: &Session,
        operation: &'static str,
    ) -> Result<(), CoreError> {
        if let Err(e) = self.inner.firewall.allow(&session.mac, session.ip).await {
            warn!(
                mac = %session.mac,
                operation,
                error = %e,
                "session recorded but not enforced; reconciliation will retry"
            );
            return Err(e);
        }
        Ok(())
    }

    fn check_dhcp_range(&self, mac: &MacAddress, ip: Option<Ipv4Addr>) {
        if let (Some(ip), Some(range)) = (ip, self.inner.config.network.dhcp_range) {
            if !range.contains(ip) {
                warn!(%mac, %ip, "client IP is outside the configured DHCP range");
            }
        }
    }
}

fn not_found(mac: &MacAddress) -> CoreError {
    CoreError::NotFound {
        mac: mac.to_string(),
    }
}

fn invalid_state(mac: &MacAddress, reason: InvalidStateReason) -> CoreError {
    CoreError::InvalidState {
        mac: mac.to_string(),
        reason,
    }
}

/// A verification mismatch during pause/resume means the session state
/// and the firewall disagree.
fn enforcement_failure(mac: &MacAddress, operation: &'static str, err: CoreError) -> CoreError {
    match err {
        CoreError::VerificationFailed { observed, .. } => CoreError::EnforcementFailed {
            mac: mac.to_string(),
            operation,
            detail: format!("firewall reads back {observed}"),
        },
        other => other,
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Sleep until the earliest deadline, then end every session that is due.
async fn expiry_task(manager: SessionManager, cancel: CancellationToken) {
    loop {
        let wait = manager
            .inner
            .expiry
            .next_deadline()
            .map_or(MAX_EXPIRY_SLEEP, |at| {
                (at - manager.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(MAX_EXPIRY_SLEEP)
            });

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = manager.inner.expiry.changed() => {}
            () = tokio::time::sleep(wait) => {
                for mac in manager.inner.expiry.pop_due(manager.now()) {
                    manager.expire(&mac).await;
                }
            }
        }
    }
}

/// Periodically reconcile storage, runtime state and the firewall.
async fn reconcile_task(manager: SessionManager, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let report = manager.reconcile_now().await;
                for error in &report.errors {
                    warn!(%error, "reconciliation step failed");
                }
            }
        }
    }
}
