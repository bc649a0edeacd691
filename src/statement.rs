//! Statement List (spec §3, §4.2).
//!
//! An append-mostly array of statement records with per-entry snapshot
//! validity bounds. Grounded on `committed_state.rs`'s row storage, but
//! diverging from its staged insert/delete-table merge model: this crate
//! implements the specification's true per-record MVCC directly, so
//! visibility is a pure function of `added_at`/`removed_at` rather than of
//! which staging table a row currently lives in. See DESIGN.md.

use std::fmt;

/// Opaque handle identifying the sink that currently owns a pending
/// mutation, so that two concurrent sinks racing to add or remove the same
/// statement can be told apart (spec §3 `tx_state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkToken(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Committed,
    PendingAdd(SinkToken),
    PendingRemove(SinkToken),
}

use crate::term::TermId;

/// A 4-tuple of term identities (spec §3). `context = None` is the
/// distinguished null-context representing the default graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Statement {
    pub subject: TermId,
    pub predicate: TermId,
    pub object: TermId,
    pub context: Option<TermId>,
}

impl Statement {
    pub fn new(subject: TermId, predicate: TermId, object: TermId, context: Option<TermId>) -> Self {
        Statement {
            subject,
            predicate,
            object,
            context,
        }
    }
}

/// Stable index of a [`StatementRecord`] within its [`StatementList`].
/// Never reassigned to a different statement, even across compaction: see
/// [`StatementList::compact`]'s remap output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub(crate) u32);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementRecord {
    pub statement: Statement,
    /// Snapshot version at which this record became visible. 0 until the
    /// owning sink flushes.
    pub added_at: u64,
    /// Snapshot version at which this record ceased to be visible. 0 means
    /// still live.
    pub removed_at: u64,
    /// Asserted (true) vs inferred (false); spec §3, partitions the store.
    pub explicit: bool,
    pub tx_state: TxState,
}

impl StatementRecord {
    /// Visibility predicate of spec §3 invariant 3.
    pub fn visible_at(&self, snapshot: u64) -> bool {
        self.tx_state == TxState::Committed
            && self.added_at != 0
            && self.added_at <= snapshot
            && (self.removed_at == 0 || snapshot < self.removed_at)
    }

    pub fn is_tombstoned_by(&self, min_live: u64) -> bool {
        self.removed_at != 0 && self.removed_at <= min_live
    }
}

/// Report produced by [`StatementList::compact`]: `remap[old.0 as usize]`
/// gives the new [`RecordId`] of a surviving record, or `None` if it was
/// physically dropped. Callers (the Statement Index) use this to patch
/// every stored `RecordId` after compaction rewrites the array.
pub struct CompactionReport {
    pub remap: Vec<Option<RecordId>>,
    pub dropped: usize,
}

#[derive(Default)]
pub struct StatementList {
    records: Vec<StatementRecord>,
}

impl StatementList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `record`; never moves existing records (spec §4.2: "indices
    /// are stable across the list's lifetime" until a `compact` call).
    pub fn append(&mut self, record: StatementRecord) -> RecordId {
        let id = RecordId(self.records.len() as u32);
        self.records.push(record);
        id
    }

    pub fn get(&self, id: RecordId) -> Option<&StatementRecord> {
        self.records.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut StatementRecord> {
        self.records.get_mut(id.0 as usize)
    }

    /// Sets `removed_at` if currently 0; idempotent (spec §4.2).
    pub fn mark_removed(&mut self, id: RecordId, snapshot: u64) {
        if let Some(record) = self.get_mut(id) {
            if record.removed_at == 0 {
                record.removed_at = snapshot;
            }
        }
    }

    pub fn iterate_at(&self, snapshot: u64) -> impl Iterator<Item = (RecordId, &StatementRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, r)| (RecordId(i as u32), r))
            .filter(move |(_, r)| r.visible_at(snapshot))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Physically drops tombstoned records invisible to every live reader
    /// and rewrites the array in place, preserving relative order (spec
    /// §4.2). Callers must hold the Lock Manager's exclusive lock for the
    /// duration; the Statement Index must apply the returned remap
    /// afterward.
    pub fn compact(&mut self, min_live: u64) -> CompactionReport {
        let mut remap = vec![None; self.records.len()];
        let mut kept = Vec::with_capacity(self.records.len());
        let mut dropped = 0;
        for (old_idx, record) in self.records.drain(..).enumerate() {
            if record.is_tombstoned_by(min_live) {
                dropped += 1;
                continue;
            }
            let new_id = RecordId(kept.len() as u32);
            remap[old_idx] = Some(new_id);
            kept.push(record);
        }
        self.records = kept;
        CompactionReport { remap, dropped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(n: u32) -> Statement {
        Statement::new(TermId(n), TermId(n), TermId(n), None)
    }

    fn committed(n: u32, added_at: u64, removed_at: u64) -> StatementRecord {
        StatementRecord {
            statement: stmt(n),
            added_at,
            removed_at,
            explicit: true,
            tx_state: TxState::Committed,
        }
    }

    #[test]
    fn visibility_follows_added_and_removed_at() {
        let r = committed(1, 2, 0);
        assert!(!r.visible_at(1));
        assert!(r.visible_at(2));
        assert!(r.visible_at(100));

        let r = committed(1, 2, 5);
        assert!(!r.visible_at(1));
        assert!(r.visible_at(2));
        assert!(r.visible_at(4));
        assert!(!r.visible_at(5));
    }

    #[test]
    fn pending_records_are_never_visible() {
        let r = StatementRecord {
            statement: stmt(1),
            added_at: 1,
            removed_at: 0,
            explicit: true,
            tx_state: TxState::PendingAdd(SinkToken(1)),
        };
        assert!(!r.visible_at(1));
    }

    #[test]
    fn compact_drops_only_fully_tombstoned_records_and_preserves_order() {
        let mut list = StatementList::new();
        let a = list.append(committed(1, 1, 3)); // dead at/after snapshot 3
        let b = list.append(committed(2, 1, 0)); // still live
        let c = list.append(committed(3, 2, 5)); // dead at/after snapshot 5

        let report = list.compact(3);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.remap[a.0 as usize], None);
        assert!(report.remap[b.0 as usize].is_some());
        assert!(report.remap[c.0 as usize].is_some());
        assert_eq!(list.len(), 2);

        // relative order preserved: b then c
        let new_b = report.remap[b.0 as usize].unwrap();
        let new_c = report.remap[c.0 as usize].unwrap();
        assert!(new_b.0 < new_c.0);
    }

    #[test]
    fn mark_removed_is_idempotent() {
        let mut list = StatementList::new();
        let id = list.append(committed(1, 1, 0));
        list.mark_removed(id, 5);
        list.mark_removed(id, 9);
        assert_eq!(list.get(id).unwrap().removed_at, 5);
    }
}
