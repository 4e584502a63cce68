// ── Expiry queue ──
//
// A single min-heap of (deadline, generation, MAC). Scheduling a MAC
// again bumps its generation, which turns any older heap entry into a
// tombstone that is discarded when it reaches the top. One task drains
// the queue; nothing else sleeps on session deadlines.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::model::MacAddress;

type Entry = Reverse<(DateTime<Utc>, u64, MacAddress)>;

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Entry>,
    /// Live generation and deadline per MAC.
    live: HashMap<MacAddress, (u64, DateTime<Utc>)>,
    next_generation: u64,
}

impl QueueState {
    /// Drop tombstones sitting on top of the heap.
    fn discard_stale(&mut self) {
        while let Some(Reverse((_, generation, mac))) = self.heap.peek() {
            if self.live.get(mac).is_some_and(|(g, _)| g == generation) {
                break;
            }
            self.heap.pop();
        }
    }
}

#[derive(Default)]
pub(crate) struct ExpiryQueue {
    state: Mutex<QueueState>,
    changed: Notify,
}

impl ExpiryQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Set the deadline for `mac`, replacing any earlier one.
    pub(crate) fn schedule(&self, mac: &MacAddress, at: DateTime<Utc>) {
        {
            let mut state = self.lock();
            state.next_generation += 1;
            let generation = state.next_generation;
            state.live.insert(mac.clone(), (generation, at));
            state.heap.push(Reverse((at, generation, mac.clone())));
        }
        self.changed.notify_one();
    }

    /// Forget the deadline for `mac`. Returns `true` if one was set.
    pub(crate) fn cancel(&self, mac: &MacAddress) -> bool {
        let removed = self.lock().live.remove(mac).is_some();
        if removed {
            self.changed.notify_one();
        }
        removed
    }

    pub(crate) fn deadline(&self, mac: &MacAddress) -> Option<DateTime<Utc>> {
        self.lock().live.get(mac).map(|(_, at)| *at)
    }

    /// Earliest live deadline.
    pub(crate) fn next_deadline(&self) -> Option<DateTime<Utc>> {
        let mut state = self.lock();
        state.discard_stale();
        state.heap.peek().map(|Reverse((at, _, _))| *at)
    }

    /// Remove and return every MAC whose deadline is at or before `now`.
    pub(crate) fn pop_due(&self, now: DateTime<Utc>) -> Vec<MacAddress> {
        let mut state = self.lock();
        let mut due = Vec::new();
        loop {
            state.discard_stale();
            let Some(Reverse((at, _, _))) = state.heap.peek() else {
                break;
            };
            if *at > now {
                break;
            }
            if let Some(Reverse((_, _, mac))) = state.heap.pop() {
                state.live.remove(&mac);
                due.push(mac);
            }
        }
        due
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().live.len()
    }

    /// Resolves after the next `schedule` or `cancel`. A change made while
    /// nobody was waiting is remembered for the next waiter.
    pub(crate) async fn changed(&self) {
        self.changed.notified().await;
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use pretty_assertions::assert_eq;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    fn mac(s: &str) -> MacAddress {
        MacAddress::parse(s).unwrap()
    }

    #[test]
    fn pops_in_deadline_order() {
        let q = ExpiryQueue::new();
        q.schedule(&mac("bb:bb:bb:bb:bb:bb"), t(20));
        q.schedule(&mac("aa:aa:aa:aa:aa:aa"), t(10));
        q.schedule(&mac("cc:cc:cc:cc:cc:cc"), t(30));

        assert_eq!(q.next_deadline(), Some(t(10)));
        assert_eq!(
            q.pop_due(t(25)),
            vec![mac("aa:aa:aa:aa:aa:aa"), mac("bb:bb:bb:bb:bb:bb")]
        );
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn reschedule_replaces_instead_of_stacking() {
        let q = ExpiryQueue::new();
        let a = mac("aa:aa:aa:aa:aa:aa");
        q.schedule(&a, t(10));
        q.schedule(&a, t(60));

        assert!(q.pop_due(t(30)).is_empty());
        assert_eq!(q.deadline(&a), Some(t(60)));
        assert_eq!(q.pop_due(t(60)), vec![a]);
        assert!(q.pop_due(t(1000)).is_empty());
    }

    #[test]
    fn cancel_removes_by_key() {
        let q = ExpiryQueue::new();
        let a = mac("aa:aa:aa:aa:aa:aa");
        q.schedule(&a, t(10));
        assert!(q.cancel(&a));
        assert!(!q.cancel(&a));
        assert_eq!(q.next_deadline(), None);
        assert!(q.pop_due(t(100)).is_empty());
    }

    #[tokio::test]
    async fn change_before_wait_is_not_lost() {
        let q = ExpiryQueue::new();
        q.schedule(&mac("aa:aa:aa:aa:aa:aa"), t(10));
        tokio::time::timeout(std::time::Duration::from_secs(1), q.changed())
            .await
            .unwrap();
    }
}
