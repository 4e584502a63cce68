// ── Session record ──
//
// One record per paid-for access window. Records are never deleted:
// ending a session flips `active` off and the record becomes history.

use std::net::Ipv4Addr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MacAddress;

/// Why a session stopped.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EndReason {
    /// An operator or the portal ended it.
    Manual,
    /// Its time ran out while the engine was running.
    Expired,
    /// Its time ran out while the engine was down.
    ExpiredDuringDowntime,
    /// It existed only in memory, with no persisted record behind it.
    Orphaned,
}

/// Observable lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Active,
    Paused,
    Ended,
}

/// A client's access window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub mac: MacAddress,
    pub ip: Option<Ipv4Addr>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub pesos_spent: u32,
    pub minutes_granted: u32,
    pub active: bool,
    pub paused: bool,
    pub paused_at: Option<DateTime<Utc>>,
    /// Total time spent paused, in milliseconds.
    #[serde(default)]
    pub paused_ms: i64,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_reason: Option<EndReason>,
}

impl Session {
    /// A fresh, active, unpaused session starting at `now`.
    pub fn new(
        mac: MacAddress,
        ip: Option<Ipv4Addr>,
        now: DateTime<Utc>,
        minutes: u32,
        pesos: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            mac,
            ip,
            start_time: now,
            end_time: now + TimeDelta::minutes(i64::from(minutes)),
            pesos_spent: pesos,
            minutes_granted: minutes,
            active: true,
            paused: false,
            paused_at: None,
            paused_ms: 0,
            ended_at: None,
            end_reason: None,
        }
    }

    pub fn state(&self) -> SessionState {
        match (self.active, self.paused) {
            (false, _) => SessionState::Ended,
            (true, true) => SessionState::Paused,
            (true, false) => SessionState::Active,
        }
    }

    /// Whether the firewall should let this client through.
    pub fn should_be_allowed(&self) -> bool {
        self.active && !self.paused
    }

    /// Time left. Frozen at `end_time - paused_at` while paused; never negative.
    pub fn remaining(&self, now: DateTime<Utc>) -> TimeDelta {
        let reference = match (self.paused, self.paused_at) {
            (true, Some(paused_at)) => paused_at,
            _ => now,
        };
        (self.end_time - reference).max(TimeDelta::zero())
    }

    /// A running session whose end time has passed. Paused sessions never
    /// expire; their clock is stopped.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.paused && self.end_time <= now
    }

    pub fn paused_duration(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.paused_ms)
    }
}

// ── SessionPatch ─────────────────────────────────────────────────────

/// A partial update to the active record of one MAC.
///
/// `end_time` is applied as a maximum: a patch can extend a session but
/// never shorten it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub ip: Option<Ipv4Addr>,
    pub end_time: Option<DateTime<Utc>>,
    pub add_pesos: u32,
    pub add_minutes: u32,
    pub paused: Option<bool>,
    /// `Some(None)` clears the pause timestamp.
    pub paused_at: Option<Option<DateTime<Utc>>>,
    pub paused_ms: Option<i64>,
    /// Finalize the record with this reason at this instant.
    pub end: Option<(EndReason, DateTime<Utc>)>,
}

impl SessionPatch {
    pub fn end(reason: EndReason, at: DateTime<Utc>) -> Self {
        Self {
            end: Some((reason, at)),
            ..Self::default()
        }
    }

    pub fn apply(&self, session: &mut Session) {
        if let Some(ip) = self.ip {
            session.ip = Some(ip);
        }
        if let Some(end_time) = self.end_time {
            session.end_time = session.end_time.max(end_time);
        }
        session.pesos_spent = session.pesos_spent.saturating_add(self.add_pesos);
        session.minutes_granted = session.minutes_granted.saturating_add(self.add_minutes);
        if let Some(paused) = self.paused {
            session.paused = paused;
        }
        if let Some(paused_at) = self.paused_at {
            session.paused_at = paused_at;
        }
        if let Some(paused_ms) = self.paused_ms {
            session.paused_ms = paused_ms;
        }
        if let Some((reason, at)) = self.end {
            session.active = false;
            session.paused = false;
            session.paused_at = None;
            session.ended_at = Some(at);
            session.end_reason = Some(reason);
        }
    }
}
