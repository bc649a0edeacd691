//! MVCC Engine (spec §4.6): source/sink/dataset abstraction over a
//! partition of the store.
//!
//! Grounded on `relational_db.rs`'s `with_auto_commit`/`with_tx` split
//! between read and write handles and on `tx.rs`'s `TxId` (a guard-holding
//! read handle releasing its lock on `release`/drop), generalised to this
//! crate's two-phase prepare/flush sink instead of the teacher's staged
//! insert/delete-table commit. Every handle here is `Arc`-backed rather
//! than borrowing `Store`, so a `Sink` or `Dataset` can outlive the call
//! that created it and the persistence engine's background thread can
//! hold its own lock token - see `lock.rs`.

pub mod cursor;
pub mod dataset;
pub mod sink;

pub use cursor::Cursor;
pub use dataset::Dataset;
pub use sink::Sink;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::clock::SnapshotClock;
use crate::config::Isolation;
use crate::lock::LockManager;
use crate::persistence::PersistenceEngine;
use crate::statement::SinkToken;
use crate::store::{PartitionKind, StoreState};

/// A handle for one partition (explicit or inferred) of the store, from
/// which datasets and sinks are opened (spec §4.6).
#[derive(Clone)]
pub struct Source {
    manager: LockManager<StoreState>,
    clock: Arc<SnapshotClock>,
    persistence: Option<Arc<PersistenceEngine>>,
    sink_tokens: Arc<AtomicU64>,
    partition: PartitionKind,
}

impl Source {
    pub(crate) fn new(
        manager: LockManager<StoreState>,
        clock: Arc<SnapshotClock>,
        persistence: Option<Arc<PersistenceEngine>>,
        sink_tokens: Arc<AtomicU64>,
        partition: PartitionKind,
    ) -> Self {
        Source {
            manager,
            clock,
            persistence,
            sink_tokens,
            partition,
        }
    }

    pub fn dataset(&self, isolation: Isolation) -> Dataset {
        Dataset::open(self.manager.clone(), self.clock.clone(), self.partition, isolation)
    }

    pub fn sink(&self, isolation: Isolation) -> Sink {
        let token = SinkToken(self.sink_tokens.fetch_add(1, Ordering::Relaxed));
        Sink::open(
            self.manager.clone(),
            self.clock.clone(),
            self.persistence.clone(),
            self.partition,
            isolation,
            token,
        )
    }
}
