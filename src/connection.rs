//! Connection state machine (spec §4.8): the per-caller lifecycle wrapping
//! a single [`crate::mvcc::Sink`] at a time.
//!
//! Grounded on the `MutTxId`/`TxId` split in `datastore.rs`: a `Connection`
//! plays the role of the object a caller holds across a session, opening
//! at most one write transaction (`MutTxId`-equivalent) while reads outside
//! a transaction fall back to a throwaway auto-commit dataset, mirroring
//! `relational_db.rs`'s `with_auto_commit` helper. The state machine itself
//! is encoded as a plain enum, the same `ScanStage`-as-enum-state idiom
//! `state_view.rs` uses.

use crate::config::Isolation;
use crate::error::{Error, Result};
use crate::index::Pattern;
use crate::mvcc::sink::FlushReport;
use crate::mvcc::Sink;
use crate::statement::Statement;
use crate::store::{PartitionKind, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Idle,
    Active,
    Preparing,
}

/// A per-caller session over one partition of a [`Store`] (spec §4.8).
/// Holds at most one open transaction (`Sink`) at a time; reads issued
/// outside a transaction are served by an implicit, immediately-closed
/// auto-commit dataset.
pub struct Connection {
    store: Store,
    partition: PartitionKind,
    state: State,
    sink: Option<Sink>,
}

impl Connection {
    pub(crate) fn new(store: Store, partition: PartitionKind) -> Self {
        Connection {
            store,
            partition,
            state: State::Idle,
            sink: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state != State::Closed
    }

    pub fn has_active_transaction(&self) -> bool {
        matches!(self.state, State::Active | State::Preparing)
    }

    fn require_open(&self) -> Result<()> {
        if self.state == State::Closed {
            return Err(Error::InvalidState("connection is closed"));
        }
        Ok(())
    }

    /// `idle -> active`: opens a sink at `level` (spec §4.8 `begin(level)`).
    pub fn begin(&mut self, level: Isolation) -> Result<()> {
        self.require_open()?;
        match self.state {
            State::Idle => {
                self.sink = Some(self.store.source(self.partition).sink(level));
                self.state = State::Active;
                Ok(())
            }
            _ => Err(Error::InvalidState("begin() requires an idle connection")),
        }
    }

    /// Reads `pattern`. Inside an open transaction this reads through the
    /// transaction's own sink, observing its own uncommitted writes (spec
    /// §5 "writer monotonicity"). Outside a transaction this opens,
    /// scans, and closes an implicit auto-commit dataset (spec §4.8).
    pub fn read(&mut self, pattern: Pattern) -> Result<Vec<Statement>> {
        self.require_open()?;
        match (&self.sink, self.state) {
            (Some(sink), State::Active | State::Preparing) => Ok(sink.scan(pattern)),
            (None, State::Idle) => {
                let mut dataset = self.store.source(self.partition).dataset(self.store.default_isolation());
                let cursor = dataset.scan(pattern)?;
                Ok(cursor.collect())
            }
            _ => Err(Error::InvalidState("connection is in an inconsistent state for read()")),
        }
    }

    fn sink_mut(&mut self) -> Result<&mut Sink> {
        if self.state != State::Active {
            return Err(Error::InvalidState("add()/remove() require an active transaction"));
        }
        self.sink.as_mut().ok_or(Error::InvalidState("no active transaction"))
    }

    pub fn add(&mut self, statement: Statement) -> Result<()> {
        self.sink_mut()?.add(statement)
    }

    pub fn remove(&mut self, statement: Statement) -> Result<()> {
        self.sink_mut()?.remove(statement)
    }

    pub fn deprecate_by_pattern(&mut self, pattern: Pattern) -> Result<()> {
        self.sink_mut()?.deprecate_by_pattern(pattern)
    }

    pub fn clear(&mut self, contexts: &[Option<crate::term::TermId>]) -> Result<()> {
        self.sink_mut()?.clear(contexts)
    }

    /// `active -> preparing` (spec §4.8).
    pub fn prepare(&mut self) -> Result<()> {
        if self.state != State::Active {
            return Err(Error::InvalidState("prepare() requires an active transaction"));
        }
        let sink = self.sink.as_mut().expect("active state implies a sink");
        match sink.prepare() {
            Ok(()) => {
                self.state = State::Preparing;
                Ok(())
            }
            Err(err) => {
                // prepare() aborted the sink; only close() is valid now
                // (spec §7 "errors during prepare abort the sink and
                // require close()").
                self.state = State::Closed;
                self.sink = None;
                Err(err)
            }
        }
    }

    /// `preparing -> committed -> idle`: flushes the sink's staged changes
    /// and returns the connection to `idle` (spec §4.8). Auto-prepares if
    /// the caller commits directly from `active`.
    pub fn commit(&mut self) -> Result<FlushReport> {
        if self.state == State::Active {
            self.prepare()?;
        }
        if self.state != State::Preparing {
            return Err(Error::InvalidState("commit() requires a prepared transaction"));
        }
        let mut sink = self.sink.take().expect("preparing state implies a sink");
        let report = sink.flush();
        sink.close();
        self.state = State::Idle;
        report
    }

    /// `active|preparing -> rolled-back -> idle`: discards the sink's
    /// staged buffer without flushing (spec §4.8).
    pub fn rollback(&mut self) -> Result<()> {
        if !matches!(self.state, State::Active | State::Preparing) {
            return Err(Error::InvalidState("rollback() requires an open transaction"));
        }
        if let Some(mut sink) = self.sink.take() {
            sink.close();
        }
        self.state = State::Idle;
        Ok(())
    }

    /// Closes the connection. Any open transaction is rolled back.
    pub fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        if let Some(mut sink) = self.sink.take() {
            sink.close();
        }
        self.state = State::Closed;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Isolation};
    use crate::store::Store;
    use crate::term::TermId;

    fn stmt(n: u32) -> Statement {
        Statement::new(TermId(n), TermId(100), TermId(n + 1), None)
    }

    #[test]
    fn begin_add_commit_makes_a_statement_visible() {
        let store = Store::init(Config::default()).unwrap();
        let mut conn = store.connection();
        conn.begin(Isolation::SnapshotRead).unwrap();
        conn.add(stmt(1)).unwrap();
        let report = conn.commit().unwrap();
        assert_eq!(report.added, 1);

        let hits = conn.read(Pattern::default()).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn rollback_after_prepare_fully_reverts() {
        let store = Store::init(Config::default()).unwrap();
        let mut conn = store.connection();
        conn.begin(Isolation::SnapshotRead).unwrap();
        conn.add(stmt(1)).unwrap();
        conn.prepare().unwrap();
        conn.rollback().unwrap();

        let hits = conn.read(Pattern::default()).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn reads_outside_a_transaction_use_an_implicit_auto_commit_dataset() {
        let store = Store::init(Config::default()).unwrap();
        let mut conn = store.connection();
        let hits = conn.read(Pattern::default()).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn add_outside_a_transaction_is_rejected() {
        let store = Store::init(Config::default()).unwrap();
        let mut conn = store.connection();
        assert!(conn.add(stmt(1)).is_err());
    }

    #[test]
    fn double_begin_is_rejected() {
        let store = Store::init(Config::default()).unwrap();
        let mut conn = store.connection();
        conn.begin(Isolation::SnapshotRead).unwrap();
        assert!(conn.begin(Isolation::SnapshotRead).is_err());
    }

    #[test]
    fn closing_rolls_back_an_open_transaction() {
        let store = Store::init(Config::default()).unwrap();
        let mut conn = store.connection();
        conn.begin(Isolation::SnapshotRead).unwrap();
        conn.add(stmt(1)).unwrap();
        conn.close();

        let hits = store.read(PartitionKind::Explicit, Pattern::default()).unwrap();
        assert!(hits.is_empty());
    }
}
