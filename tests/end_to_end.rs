//! Black-box end-to-end scenarios against the public [`triplestore::Store`]
//! API, covering the six scenarios enumerated in SPEC_FULL.md §8.

use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;

use triplestore::config::Isolation;
use triplestore::index::Pattern;
use triplestore::statement::Statement;
use triplestore::store::{PartitionKind, Store};
use triplestore::Config;

fn init_logging() {
    let _ = env_logger::try_init();
}

fn memory_store() -> Store {
    Store::init(Config::default()).unwrap()
}

/// Scenario 1: insert then query.
#[test]
fn insert_then_query_returns_exactly_one_statement() {
    init_logging();
    let store = memory_store();

    let a = store.intern_iri("http://ex/", "a").unwrap();
    let knows = store.intern_iri("http://ex/", "knows").unwrap();
    let b = store.intern_iri("http://ex/", "b").unwrap();

    let mut sink = store.explicit().sink(Isolation::SnapshotRead);
    sink.add(Statement::new(a, knows, b, None)).unwrap();
    sink.prepare().unwrap();
    sink.flush().unwrap();
    sink.close();

    let pattern = Pattern {
        predicate: Some(knows),
        ..Default::default()
    };
    let hits = store.read(PartitionKind::Explicit, pattern).unwrap();
    assert_eq!(hits, vec![Statement::new(a, knows, b, None)]);
}

/// Scenario 2: a reader pinned at an earlier snapshot keeps seeing a
/// statement a later writer has since removed.
#[test]
fn snapshot_isolation_hides_later_removals_from_an_earlier_reader() {
    init_logging();
    let store = memory_store();

    let a = store.intern_iri("http://ex/", "a").unwrap();
    let p = store.intern_iri("http://ex/", "p").unwrap();
    let one = store.intern_literal("1", None, None).unwrap();
    let stmt = Statement::new(a, p, one, None);

    let mut t1 = store.explicit().sink(Isolation::SnapshotRead);
    t1.add(stmt).unwrap();
    t1.prepare().unwrap();
    t1.flush().unwrap();
    t1.close();

    let mut reader = store.explicit().dataset(Isolation::Snapshot);
    assert_eq!(reader.snapshot(), 1);

    let mut t2 = store.explicit().sink(Isolation::SnapshotRead);
    t2.remove(stmt).unwrap();
    t2.prepare().unwrap();
    t2.flush().unwrap();
    t2.close();

    let seen: Vec<_> = reader.scan(Pattern::default()).unwrap().collect();
    assert_eq!(seen, vec![stmt]);
    reader.close();

    let fresh = store.read(PartitionKind::Explicit, Pattern::default()).unwrap();
    assert!(fresh.is_empty());
}

/// Scenario 3: two serializable writers racing to add the same statement;
/// the second to prepare loses with `ConcurrentModification`.
///
/// The conflict can only be observed across the real race between a
/// sink capturing its snapshot and blocking on the write lock (see
/// `Sink::open`), so t2 is opened on its own thread while t1 still holds
/// the lock rather than after t1 has fully committed and closed.
#[test]
fn serializable_writers_conflict_on_the_same_add() {
    init_logging();
    let store = memory_store();

    let a = store.intern_iri("http://ex/", "a").unwrap();
    let p = store.intern_iri("http://ex/", "p").unwrap();
    let b = store.intern_iri("http://ex/", "b").unwrap();
    let stmt = Statement::new(a, p, b, None);

    let t1 = {
        let store = store.clone();
        thread::spawn(move || {
            let mut t1 = store.explicit().sink(Isolation::Serializable);
            t1.add(stmt).unwrap();
            thread::sleep(Duration::from_millis(50));
            t1.prepare().unwrap();
            t1.flush().unwrap();
            t1.close();
        })
    };

    thread::sleep(Duration::from_millis(10));
    let mut t2 = store.explicit().sink(Isolation::Serializable);
    t2.add(stmt).unwrap();
    let err = t2.prepare();

    t1.join().unwrap();
    assert!(matches!(err, Err(triplestore::Error::ConcurrentModification)));
    t2.close();
}

/// Scenario 4: persisted store survives a shutdown/reopen cycle with the
/// same statement set.
#[test]
fn persistence_round_trip_survives_reopen() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = |dir: &std::path::Path| Config {
        persist: true,
        data_dir: Some(dir.to_path_buf()),
        sync_delay_ms: 0,
        ..Config::default()
    };

    {
        let store = Store::init(config(dir.path())).unwrap();
        let a = store.intern_iri("http://ex/", "a").unwrap();
        let b = store.intern_iri("http://ex/", "b").unwrap();
        let c = store.intern_iri("http://ex/", "c").unwrap();
        let p = store.intern_iri("http://ex/", "p").unwrap();

        let mut sink = store.explicit().sink(Isolation::SnapshotRead);
        sink.add(Statement::new(a, p, b, None)).unwrap();
        sink.add(Statement::new(b, p, c, None)).unwrap();
        sink.add(Statement::new(a, p, c, None)).unwrap();
        sink.prepare().unwrap();
        sink.flush().unwrap();
        sink.close();
        store.shutdown().unwrap();
    }

    let reopened = Store::init(config(dir.path())).unwrap();
    let hits = reopened.read(PartitionKind::Explicit, Pattern::default()).unwrap();
    assert_eq!(hits.len(), 3);
}

/// Scenario 5: several commits within the coalescing window produce no
/// on-disk write until the delay has elapsed since the *last* one.
#[test]
fn sync_coalescing_defers_the_write_until_the_delay_elapses() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        persist: true,
        data_dir: Some(dir.path().to_path_buf()),
        sync_delay_ms: 100,
        ..Config::default()
    };
    let data_file = dir.path().join("data.bin");
    {
        let store = Store::init(config).unwrap();
        let p = store.intern_iri("http://ex/", "p").unwrap();

        for i in 0..5u32 {
            let a = store.intern_iri("http://ex/", &format!("s{i}")).unwrap();
            let b = store.intern_iri("http://ex/", &format!("o{i}")).unwrap();
            let mut sink = store.explicit().sink(Isolation::SnapshotRead);
            sink.add(Statement::new(a, p, b, None)).unwrap();
            sink.prepare().unwrap();
            sink.flush().unwrap();
            sink.close();
            thread::sleep(Duration::from_millis(10));
        }

        assert!(!data_file.exists(), "coalescing window has not elapsed yet");

        thread::sleep(Duration::from_millis(200));
        assert!(data_file.exists(), "the coalesced write should have landed by now");

        store.shutdown().unwrap();
    }

    let reopened = Store::init(Config {
        persist: true,
        data_dir: Some(dir.path().to_path_buf()),
        sync_delay_ms: 0,
        ..Config::default()
    })
    .unwrap();
    let hits = reopened.read(PartitionKind::Explicit, Pattern::default()).unwrap();
    assert_eq!(hits.len(), 5);
}

/// Scenario 6: closing a cursor before it is exhausted releases the read
/// lock it holds, so a subsequent writer does not deadlock.
#[test]
fn closing_a_cursor_early_unblocks_a_pending_writer() {
    init_logging();
    let store = memory_store();
    let a = store.intern_iri("http://ex/", "a").unwrap();
    let p = store.intern_iri("http://ex/", "p").unwrap();
    let b = store.intern_iri("http://ex/", "b").unwrap();

    let mut seed = store.explicit().sink(Isolation::SnapshotRead);
    seed.add(Statement::new(a, p, b, None)).unwrap();
    seed.prepare().unwrap();
    seed.flush().unwrap();
    seed.close();

    let mut dataset = store.explicit().dataset(Isolation::Snapshot);
    let cursor = dataset.scan(Pattern::default()).unwrap();
    drop(cursor); // close before exhaustion
    dataset.close();

    let mut writer = store.explicit().sink(Isolation::Serializable);
    writer.add(Statement::new(b, p, a, None)).unwrap();
    writer.prepare().unwrap();
    writer.flush().unwrap();
    writer.close();

    let hits = store.read(PartitionKind::Explicit, Pattern::default()).unwrap();
    assert_eq!(hits.len(), 2);
}

/// Boundary: add + remove of the same statement in one transaction
/// collapses to a no-op.
#[test]
fn add_and_remove_in_the_same_transaction_is_a_no_op() {
    init_logging();
    let store = memory_store();
    let a = store.intern_iri("http://ex/", "a").unwrap();
    let p = store.intern_iri("http://ex/", "p").unwrap();
    let b = store.intern_iri("http://ex/", "b").unwrap();
    let stmt = Statement::new(a, p, b, None);

    let mut sink = store.explicit().sink(Isolation::SnapshotRead);
    sink.add(stmt).unwrap();
    sink.remove(stmt).unwrap();
    sink.prepare().unwrap();
    let report = sink.flush().unwrap();
    sink.close();

    assert_eq!(report.added, 0);
    assert_eq!(report.removed, 0);
    assert!(store.read(PartitionKind::Explicit, Pattern::default()).unwrap().is_empty());
}

/// Boundary: rollback after prepare fully reverts a staged mutation.
#[test]
fn rollback_after_prepare_fully_reverts() {
    init_logging();
    let store = memory_store();
    let mut conn = store.connection();
    let a = store.intern_iri("http://ex/", "a").unwrap();
    let p = store.intern_iri("http://ex/", "p").unwrap();
    let b = store.intern_iri("http://ex/", "b").unwrap();

    conn.begin(Isolation::SnapshotRead).unwrap();
    conn.add(Statement::new(a, p, b, None)).unwrap();
    conn.prepare().unwrap();
    conn.rollback().unwrap();

    assert!(store.read(PartitionKind::Explicit, Pattern::default()).unwrap().is_empty());
}

/// Compaction must not change what is visible at or above `min_live`.
#[test]
fn compaction_preserves_visibility_for_live_snapshots() {
    init_logging();
    let store = memory_store();
    let a = store.intern_iri("http://ex/", "a").unwrap();
    let p = store.intern_iri("http://ex/", "p").unwrap();
    let b = store.intern_iri("http://ex/", "b").unwrap();
    let stmt = Statement::new(a, p, b, None);

    let mut sink = store.explicit().sink(Isolation::SnapshotRead);
    sink.add(stmt).unwrap();
    sink.prepare().unwrap();
    sink.flush().unwrap();
    sink.close();

    let mut remover = store.explicit().sink(Isolation::SnapshotRead);
    remover.remove(stmt).unwrap();
    remover.prepare().unwrap();
    remover.flush().unwrap();
    remover.close();

    store.compact();

    let hits = store.read(PartitionKind::Explicit, Pattern::default()).unwrap();
    assert!(hits.is_empty());
}
