//! Write sink (spec §4.6): stages term/statement mutations privately and
//! publishes them atomically at `flush()`.
//!
//! Grounded on `mut_tx.rs`'s tri-state row bookkeeping (a row is either
//! committed, pending-insert, or pending-delete before a transaction
//! commits) for the shape of `net`/`staged`, and on `datastore.rs`'s
//! `commit()` under the write lock for `flush()`'s atomic install. Conflict
//! detection is this crate's own addition: the teacher's datastore has no
//! serializable isolation level to defend.

use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::SnapshotClock;
use crate::config::Isolation;
use crate::error::{Error, Result};
use crate::index::Pattern;
use crate::lock::{LockManager, LockToken};
use crate::persistence::PersistenceEngine;
use crate::statement::{RecordId, SinkToken, Statement, StatementRecord, TxState};
use crate::store::{PartitionKind, StoreState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    Open,
    Staged,
    Prepared,
    Flushed,
    Closed,
    /// `prepare()` failed; only `close()` is valid from here (spec §7:
    /// "errors during prepare abort the sink and require close()").
    Aborted,
}

enum Staged {
    Add(Statement),
    Remove(RecordId),
}

/// The report a [`Sink::flush`] returns: how many records were newly made
/// visible and how many were deprecated, and the snapshot version the
/// change became visible at (spec §6 `changed` event).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub added: usize,
    pub removed: usize,
    pub commit_version: u64,
}

pub struct Sink {
    manager: LockManager<StoreState>,
    clock: Arc<SnapshotClock>,
    persistence: Option<Arc<PersistenceEngine>>,
    partition: PartitionKind,
    isolation: Isolation,
    #[allow(unused)]
    token: SinkToken,
    /// Snapshot observed when this sink was opened; the baseline a
    /// `SERIALIZABLE` sink's conflict check compares against.
    snapshot: u64,
    state: SinkState,
    lock: LockToken<StoreState>,
    // net add(+1)/remove(-1) count per exact statement this sink has
    // requested, so an add followed by a remove of the same statement in
    // one sink collapses to a no-op (spec §8 boundary case) regardless of
    // call order.
    net: HashMap<(Statement, bool), i32>,
    pattern_removes: Vec<Pattern>,
    staged: Vec<Staged>,
}

impl Sink {
    pub(crate) fn open(
        manager: LockManager<StoreState>,
        clock: Arc<SnapshotClock>,
        persistence: Option<Arc<PersistenceEngine>>,
        partition: PartitionKind,
        isolation: Isolation,
        token: SinkToken,
    ) -> Self {
        let snapshot = clock.current();
        // Isolation determines the lock held for the sink's whole
        // lifetime (spec §4.5): SERIALIZABLE takes the write lock
        // immediately; weaker lock-taking isolations take an upgradable
        // read so `flush()` can upgrade it in place; NONE holds nothing
        // here and takes only short transient locks in `prepare`/`flush`.
        let lock = manager.acquire_for_write(isolation);
        Sink {
            manager,
            clock,
            persistence,
            partition,
            isolation,
            token,
            snapshot,
            state: SinkState::Open,
            lock,
            net: HashMap::new(),
            pattern_removes: Vec::new(),
            staged: Vec::new(),
        }
    }

    fn explicit(&self) -> bool {
        matches!(self.partition, PartitionKind::Explicit)
    }

    /// Transitions `open -> staged` on first mutation; rejects mutation
    /// calls outside those two states (spec §4.6).
    fn ensure_open_or_staged(&mut self) -> Result<()> {
        match self.state {
            SinkState::Open => self.state = SinkState::Staged,
            SinkState::Staged => {}
            _ => return Err(Error::InvalidState("mutations are only valid while a sink is open or staged")),
        }
        Ok(())
    }

    pub fn add(&mut self, statement: Statement) -> Result<()> {
        self.ensure_open_or_staged()?;
        *self.net.entry((statement, self.explicit())).or_insert(0) += 1;
        Ok(())
    }

    pub fn remove(&mut self, statement: Statement) -> Result<()> {
        self.ensure_open_or_staged()?;
        *self.net.entry((statement, self.explicit())).or_insert(0) -= 1;
        Ok(())
    }

    pub fn deprecate_by_pattern(&mut self, pattern: Pattern) -> Result<()> {
        self.ensure_open_or_staged()?;
        self.pattern_removes.push(pattern);
        Ok(())
    }

    /// Convenience sugar over [`Sink::deprecate_by_pattern`] for each
    /// context named (spec §4.6 `clear(context…)`).
    pub fn clear(&mut self, contexts: &[Option<crate::term::TermId>]) -> Result<()> {
        for &context in contexts {
            self.deprecate_by_pattern(Pattern {
                context: Some(context),
                ..Default::default()
            })?;
        }
        Ok(())
    }

    /// Best-effort read of what this sink would see right now: committed
    /// store state overlaid with this sink's own not-yet-flushed changes
    /// (spec §5 "writer monotonicity").
    pub fn scan(&self, pattern: Pattern) -> Vec<Statement> {
        let mut results: Vec<Statement> = self.lock.with(&self.manager, |state| {
            let p = state.partition(self.partition);
            p.index.scan(&p.list, pattern, self.clock.current()).map(|(_, r)| r.statement).collect()
        });

        match self.state {
            SinkState::Prepared => {
                for change in &self.staged {
                    match change {
                        Staged::Add(stmt) if pattern.matches(stmt) && !results.contains(stmt) => results.push(*stmt),
                        Staged::Remove(id) => {
                            if let Some(stmt) = self.lock.with(&self.manager, |state| {
                                state.partition(self.partition).list.get(*id).map(|r| r.statement)
                            }) {
                                results.retain(|s| *s != stmt);
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {
                for ((stmt, explicit), count) in &self.net {
                    if *explicit != self.explicit() || !pattern.matches(stmt) {
                        continue;
                    }
                    if *count > 0 && !results.contains(stmt) {
                        results.push(*stmt);
                    } else if *count < 0 {
                        results.retain(|s| s != stmt);
                    }
                }
                for pat in &self.pattern_removes {
                    results.retain(|s| !pat.matches(s));
                }
            }
        }
        results
    }

    /// Validates staged mutations against the current store state,
    /// resolving duplicates and removal targets, and detects serializable
    /// conflicts (spec §4.6).
    pub fn prepare(&mut self) -> Result<()> {
        match self.state {
            SinkState::Open | SinkState::Staged => {}
            _ => return Err(Error::InvalidState("prepare() requires an open or staged sink")),
        }

        self.lock = std::mem::replace(&mut self.lock, LockToken::None).upgrade_for(self.isolation, &self.manager);

        let partition = self.partition;
        let isolation = self.isolation;
        let snapshot = self.snapshot;
        let net = std::mem::take(&mut self.net);
        let pattern_removes = std::mem::take(&mut self.pattern_removes);

        let resolved = self.lock.with(&self.manager, |state| -> Result<Vec<Staged>> {
            let p = state.partition(partition);
            let mut staged = Vec::new();

            for ((stmt, explicit), count) in net {
                match count.cmp(&0) {
                    std::cmp::Ordering::Equal => continue,
                    std::cmp::Ordering::Greater => {
                        if let Some(id) = p.index.probe(&stmt, explicit) {
                            let record = p.list.get(id).expect("probed id must exist");
                            let live = record.tx_state == TxState::Committed && record.removed_at == 0;
                            if live {
                                if isolation == Isolation::Serializable && record.added_at > snapshot {
                                    return Err(Error::ConcurrentModification);
                                }
                                continue; // duplicate add collapses to a no-op
                            }
                        }
                        staged.push(Staged::Add(stmt));
                    }
                    std::cmp::Ordering::Less => {
                        if let Some(id) = p.index.probe(&stmt, explicit) {
                            let record = p.list.get(id).expect("probed id must exist");
                            let live = record.tx_state == TxState::Committed && record.removed_at == 0;
                            if live {
                                if isolation == Isolation::Serializable && record.added_at > snapshot {
                                    return Err(Error::ConcurrentModification);
                                }
                                staged.push(Staged::Remove(id));
                            }
                            // not live: nothing to remove, no-op
                        }
                    }
                }
            }

            for pattern in pattern_removes {
                for (id, record) in p.index.scan(&p.list, pattern, u64::MAX) {
                    if record.tx_state == TxState::Committed && record.removed_at == 0 {
                        staged.push(Staged::Remove(id));
                    }
                }
            }

            Ok(staged)
        });

        match resolved {
            Ok(staged) => {
                self.staged = staged;
                self.state = SinkState::Prepared;
                Ok(())
            }
            Err(err) => {
                self.state = SinkState::Aborted;
                Err(err)
            }
        }
    }

    /// Atomically installs every staged change (spec §4.6).
    pub fn flush(&mut self) -> Result<FlushReport> {
        if self.state != SinkState::Prepared {
            return Err(Error::InvalidState("flush() requires a prepared sink"));
        }
        self.lock = std::mem::replace(&mut self.lock, LockToken::None).upgrade(&self.manager);

        let partition = self.partition;
        let version = self.clock.advance();
        let explicit = self.explicit();
        let staged = std::mem::take(&mut self.staged);

        let (added, removed) = self.lock.with_mut(|state| {
            let p = state.partition_mut(partition);
            let mut added = 0usize;
            let mut removed = 0usize;
            for change in staged {
                match change {
                    Staged::Add(statement) => {
                        // Under `Isolation::None` a sink holds no lock
                        // between `prepare()`'s probe and here, so a
                        // concurrent sink may have installed the same
                        // statement in the meantime; re-probe now, under
                        // the write lock this closure runs under, so two
                        // racing adds still collapse to one live record
                        // (spec §3 invariant 1, §8 idempotence).
                        let already_live = p.index.probe(&statement, explicit).is_some_and(|id| {
                            let record = p.list.get(id).expect("probed id must exist");
                            record.tx_state == TxState::Committed && record.removed_at == 0
                        });
                        if already_live {
                            continue;
                        }
                        let record = StatementRecord {
                            statement,
                            added_at: version,
                            removed_at: 0,
                            explicit,
                            tx_state: TxState::Committed,
                        };
                        let id = p.list.append(record);
                        p.index.insert(id, p.list.get(id).expect("just appended"));
                        added += 1;
                    }
                    Staged::Remove(id) => {
                        p.list.mark_removed(id, version);
                        removed += 1;
                    }
                }
            }
            (added, removed)
        });

        // Drop the write/upgradable guard before notifying persistence:
        // in `Immediate` mode `schedule_sync()` calls `sync()` inline,
        // which takes its own read lock on this same `RwLock` to encode
        // the committed state. Holding `self.lock` across that call
        // self-deadlocks (a thread cannot take a read lock while already
        // holding the write lock on the same `parking_lot::RwLock`).
        self.lock = LockToken::None;
        self.state = SinkState::Flushed;
        if added > 0 || removed > 0 {
            if let Some(persistence) = &self.persistence {
                persistence.schedule_sync();
            }
        }
        Ok(FlushReport {
            added,
            removed,
            commit_version: version,
        })
    }

    /// Releases locks and discards any unflushed buffer (rollback if
    /// called before `flush()`). Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == SinkState::Closed {
            return;
        }
        self.state = SinkState::Closed;
        self.net.clear();
        self.pattern_removes.clear();
        self.staged.clear();
        self.lock = LockToken::None;
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.close();
    }
}

trait UpgradeForIsolation {
    fn upgrade_for(self, isolation: Isolation, manager: &LockManager<StoreState>) -> LockToken<StoreState>;
}

impl UpgradeForIsolation for LockToken<StoreState> {
    /// Acquires (or keeps) whatever lock `isolation` demands for staging
    /// validation: an upgradable read for lock-taking, non-serializable
    /// isolations so `flush()` can upgrade it atomically in place, matching
    /// spec §4.6's "the prepare phase may run under a read lock with a
    /// final atomic upgrade".
    fn upgrade_for(self, isolation: Isolation, manager: &LockManager<StoreState>) -> LockToken<StoreState> {
        match self {
            LockToken::None => manager.acquire_for_write(isolation),
            other => other,
        }
    }
}
