//! Snapshot Clock (spec §4.4): a monotonic version counter plus a registry
//! of live reader snapshots used to drive compaction safety.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

#[derive(Default)]
pub struct SnapshotClock {
    current: AtomicU64,
    // Multiset of live snapshots: snapshot -> reader count.
    live: Mutex<BTreeMap<u64, u32>>,
}

impl SnapshotClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Registers `current` as a live reader snapshot and returns it.
    pub fn begin_read(&self) -> u64 {
        let v = self.current();
        *self.live.lock().entry(v).or_insert(0) += 1;
        v
    }

    pub fn end_read(&self, v: u64) {
        let mut live = self.live.lock();
        if let Some(count) = live.get_mut(&v) {
            *count -= 1;
            if *count == 0 {
                live.remove(&v);
            }
        }
    }

    /// Increments `current` and returns the new value. Must be called
    /// exactly once per committed writing transaction, under the Lock
    /// Manager's write lock (spec §4.4).
    pub fn advance(&self) -> u64 {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Smallest live snapshot, or `current` if none are registered.
    pub fn min_live(&self) -> u64 {
        self.live.lock().keys().next().copied().unwrap_or_else(|| self.current())
    }
}
