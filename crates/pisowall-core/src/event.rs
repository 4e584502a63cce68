// ── Engine events ──
//
// Broadcast to every subscriber of `SessionManager::events()`. Lagging
// subscribers lose old events; nothing in the engine waits on them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::firewall::FirewallStatus;
use crate::model::{EndReason, MacAddress, Session};

/// Which way a self-healing correction moved the firewall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealAction {
    Allowed,
    Blocked,
}

/// A correction made because live rules disagreed with a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelfHealEvent {
    pub mac: MacAddress,
    pub paused: bool,
    pub action: HealAction,
    pub before: FirewallStatus,
    /// Status read back after the correction; `None` if it failed.
    pub after: Option<FirewallStatus>,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl SelfHealEvent {
    pub fn succeeded(&self) -> bool {
        self.after.is_some() && self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Started {
        session: Session,
    },
    Extended {
        mac: MacAddress,
        end_time: DateTime<Utc>,
        minutes: u32,
    },
    Paused {
        mac: MacAddress,
        remaining_secs: i64,
    },
    Resumed {
        mac: MacAddress,
        end_time: DateTime<Utc>,
    },
    Ended {
        mac: MacAddress,
        reason: EndReason,
    },
    /// A persisted session was loaded back into the runtime table.
    Restored {
        mac: MacAddress,
    },
    SelfHealed(SelfHealEvent),
}

impl SessionEvent {
    pub fn mac(&self) -> &MacAddress {
        match self {
            Self::Started { session } => &session.mac,
            Self::Extended { mac, .. }
            | Self::Paused { mac, .. }
            | Self::Resumed { mac, .. }
            | Self::Ended { mac, .. }
            | Self::Restored { mac } => mac,
            Self::SelfHealed(heal) => &heal.mac,
        }
    }
}
