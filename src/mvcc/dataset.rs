use std::sync::Arc;

use crate::clock::SnapshotClock;
use crate::config::Isolation;
use crate::error::{Error, Result};
use crate::index::Pattern;
use crate::lock::LockManager;
use crate::mvcc::cursor::Cursor;
use crate::store::{PartitionKind, StoreState};

/// A read-only view pinned at a snapshot (spec §4.6). Opening takes
/// whatever lock `isolation` requires; the lock itself moves into the
/// [`Cursor`] returned by [`Dataset::scan`], so closing the cursor (not
/// the dataset) is what releases it — see spec §8 scenario 6.
pub struct Dataset {
    manager: LockManager<StoreState>,
    clock: Arc<SnapshotClock>,
    partition: PartitionKind,
    isolation: Isolation,
    snapshot: u64,
    pinned_snapshot: Option<u64>,
    cursor_taken: bool,
}

impl Dataset {
    pub(crate) fn open(manager: LockManager<StoreState>, clock: Arc<SnapshotClock>, partition: PartitionKind, isolation: Isolation) -> Self {
        let pinned = isolation.pins_snapshot();
        let snapshot = if pinned { clock.begin_read() } else { clock.current() };
        Dataset {
            manager,
            clock,
            partition,
            isolation,
            snapshot,
            pinned_snapshot: pinned.then_some(snapshot),
            cursor_taken: false,
        }
    }

    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    /// Opens a lazy cursor over `pattern`, taking whatever lock and pinned
    /// snapshot this dataset holds. At most one cursor may be opened per
    /// dataset (spec §5: datasets are not thread-safe and are meant for
    /// single-threaded, single-pass use).
    pub fn scan(&mut self, pattern: Pattern) -> Result<Cursor> {
        if self.cursor_taken {
            return Err(Error::InvalidState("a cursor was already opened on this dataset"));
        }
        self.cursor_taken = true;
        let lock = self.manager.acquire(self.isolation);
        let pin = self.pinned_snapshot.take().map(|v| (self.clock.clone(), v));
        Ok(Cursor::open(self.manager.clone(), self.partition, pattern, self.snapshot, lock, pin))
    }

    /// Releases the pinned snapshot if no cursor claimed it yet. Safe to
    /// call more than once.
    pub fn close(&mut self) {
        if let Some(v) = self.pinned_snapshot.take() {
            self.clock.end_read(v);
        }
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        self.close();
    }
}
