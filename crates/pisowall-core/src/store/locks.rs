// ── Per-client serialization ──
//
// One async mutex per MAC. Operations on the same client queue up;
// operations on different clients never contend.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::MacAddress;

#[derive(Default)]
pub(crate) struct ClientLocks {
    locks: DashMap<MacAddress, Arc<Mutex<()>>>,
}

impl ClientLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `mac`.
    pub(crate) async fn acquire(&self, mac: &MacAddress) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard lock is released before awaiting.
        let lock = Arc::clone(self.locks.entry(mac.clone()).or_default().value());
        lock.lock_owned().await
    }

    /// Forget locks nobody holds or waits on.
    pub(crate) fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}
