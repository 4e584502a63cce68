// ── Runtime session table ──
//
// Lock-sharded map of live sessions keyed by MAC, with a secondary IP
// index and a `watch` snapshot rebuilt on every mutation. Values are
// `Arc`s cloned out of the map, so no shard lock is ever held across an
// await.

use std::net::Ipv4Addr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::{MacAddress, Session};

pub(crate) struct SessionTable {
    /// Primary storage: MAC -> session.
    by_mac: DashMap<MacAddress, Arc<Session>>,

    /// Secondary index: last known IP -> MAC.
    by_ip: DashMap<Ipv4Addr, MacAddress>,

    /// Full snapshot, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<Session>>>>,
}

impl SessionTable {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_mac: DashMap::new(),
            by_ip: DashMap::new(),
            snapshot,
        }
    }

    /// Insert or replace the session for its MAC. Returns `true` if the
    /// MAC was new.
    pub(crate) fn upsert(&self, session: Session) -> bool {
        let mac = session.mac.clone();
        let ip = session.ip;
        let previous = self.by_mac.insert(mac.clone(), Arc::new(session));

        // Drop a stale IP mapping if the client moved.
        let moved_from = previous
            .as_ref()
            .and_then(|p| p.ip)
            .filter(|old| Some(*old) != ip);
        if let Some(old_ip) = moved_from {
            self.by_ip.remove_if(&old_ip, |_, owner| *owner == mac);
        }
        if let Some(ip) = ip {
            self.by_ip.insert(ip, mac);
        }

        self.rebuild_snapshot();
        previous.is_none()
    }

    /// Remove the session for `mac`. Returns it if it existed.
    pub(crate) fn remove(&self, mac: &MacAddress) -> Option<Arc<Session>> {
        let removed = self.by_mac.remove(mac).map(|(_, v)| v);
        if let Some(ip) = removed.as_ref().and_then(|s| s.ip) {
            self.by_ip.remove_if(&ip, |_, owner| owner == mac);
        }
        if removed.is_some() {
            self.rebuild_snapshot();
        }
        removed
    }

    pub(crate) fn get(&self, mac: &MacAddress) -> Option<Arc<Session>> {
        self.by_mac.get(mac).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn get_by_ip(&self, ip: Ipv4Addr) -> Option<Arc<Session>> {
        let mac = self.by_ip.get(&ip).map(|r| r.value().clone())?;
        self.get(&mac)
    }

    pub(crate) fn contains(&self, mac: &MacAddress) -> bool {
        self.by_mac.contains_key(mac)
    }

    /// Current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<Session>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<Session>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn macs(&self) -> Vec<MacAddress> {
        self.by_mac.iter().map(|r| r.key().clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_mac.len()
    }

    fn rebuild_snapshot(&self) {
        let mut values: Vec<Arc<Session>> =
            self.by_mac.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by_key(|s| s.end_time);
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
