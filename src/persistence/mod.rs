//! Persistence Engine (spec §4.7, §6): binary data-file serialisation,
//! atomic sync-file → data-file swap, and a condvar-driven background
//! thread that coalesces overlapping commits into one write.
//!
//! Grounded on `message_log.rs`'s "scan what's on disk to reconstruct state
//! at open" idiom (adapted down to this crate's single rewritten file, not
//! a segmented log - see DESIGN.md), `commit_log.rs`'s `fsync: bool` branch
//! for the immediate-vs-coalesced distinction, and `lock_file.rs` for the
//! directory lock (shared with the Lock Manager as one [`crate::lock::DirLock`]
//! type). The background scheduler is a dedicated `std::thread` parked on a
//! `std::sync::Condvar`, per the explicit implementation license of spec §9
//! ("a worker thread that sleeps on a condition variable rescheduled by
//! commits"), rather than an async runtime pulled in for one timer.

pub mod codec;

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::clock::SnapshotClock;
use crate::config::{Config, SyncDelay};
use crate::error::{Error, Result};
use crate::index::Pattern;
use crate::lock::{DirLock, LockManager};
use crate::persistence::codec::Record;
use crate::statement::{Statement, StatementRecord, TxState};
use crate::store::{PartitionKind, StoreState};
use crate::term::{Term, TermId};

const DATA_FILE: &str = "data.bin";
const SYNC_FILE: &str = "data.sync";

struct TimerState {
    deadline: Option<Instant>,
}

pub struct PersistenceEngine {
    data_dir: PathBuf,
    #[allow(unused)]
    dir_lock: DirLock,
    manager: LockManager<StoreState>,
    clock: Arc<SnapshotClock>,
    sync_delay: SyncDelay,
    /// Set on every flush with a non-empty delta; cleared by a successful
    /// `sync()`. A `sync()` that finds this false is a no-op (spec §4.7).
    contents_changed: AtomicBool,
    /// `sync_semaphore`: serialises concurrent `sync()` calls so a slow
    /// disk write never blocks a committing transaction on another one
    /// still in flight (spec §5).
    sync_mutex: Mutex<()>,
    /// `sync_timer_semaphore`: guards the coalescing deadline.
    timer_state: Mutex<TimerState>,
    timer_condvar: Condvar,
    shutdown: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceEngine {
    /// Opens the persistence engine for `config`: takes the directory lock,
    /// replays an existing data file into `manager` if one is present, and
    /// (for `sync_delay_ms > 0`) starts the coalescing background thread.
    pub(crate) fn open(config: &Config, manager: LockManager<StoreState>, clock: Arc<SnapshotClock>) -> Result<Arc<Self>> {
        let data_dir = config.data_dir.clone().expect("Config::validate requires data_dir when persist=true");
        fs::create_dir_all(&data_dir).map_err(|e| Error::persistence_io(&data_dir, e))?;
        let dir_lock = DirLock::acquire(&data_dir)?;

        let data_path = data_dir.join(DATA_FILE);
        if data_path.exists() {
            let bytes = fs::read(&data_path).map_err(|e| Error::persistence_io(&data_path, e))?;
            if !bytes.is_empty() {
                recover(&manager, &clock, &bytes)?;
            }
        }

        let engine = Arc::new(PersistenceEngine {
            data_dir,
            dir_lock,
            manager,
            clock,
            sync_delay: config.sync_delay(),
            contents_changed: AtomicBool::new(false),
            sync_mutex: Mutex::new(()),
            timer_state: Mutex::new(TimerState { deadline: None }),
            timer_condvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
            worker: Mutex::new(None),
        });

        if matches!(engine.sync_delay, SyncDelay::Coalesce(_)) {
            let worker_engine = engine.clone();
            let handle = std::thread::Builder::new()
                .name("triplestore-sync".into())
                .spawn(move || worker_engine.run_worker())
                .map_err(|e| Error::persistence_io(&engine.data_dir, e))?;
            *engine.worker.lock()? = Some(handle);
        }

        Ok(engine)
    }

    /// Called from commit (spec §4.7). Immediate mode writes synchronously;
    /// coalesce mode (re)arms the background timer; defer-to-shutdown mode
    /// only flags the change for `shutdown()` to pick up.
    pub fn schedule_sync(&self) {
        self.contents_changed.store(true, Ordering::Release);
        match self.sync_delay {
            SyncDelay::Immediate => {
                if let Err(err) = self.sync() {
                    log::error!("immediate sync failed: {err}");
                }
            }
            SyncDelay::Coalesce(ms) => match self.timer_state.lock() {
                Ok(mut timer) => {
                    timer.deadline = Some(Instant::now() + Duration::from_millis(ms));
                    self.timer_condvar.notify_all();
                }
                Err(err) => log::error!("sync timer lock poisoned: {err}"),
            },
            SyncDelay::DeferToShutdown => {
                log::trace!("sync deferred to shutdown");
            }
        }
    }

    fn run_worker(&self) {
        loop {
            let mut timer = match self.timer_state.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            loop {
                if self.shutdown.load(Ordering::Acquire) {
                    return;
                }
                match timer.deadline {
                    None => {
                        timer = match self.timer_condvar.wait(timer) {
                            Ok(guard) => guard,
                            Err(_) => return,
                        };
                    }
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            timer.deadline = None;
                            drop(timer);
                            if let Err(err) = self.sync() {
                                log::error!("deferred sync failed: {err}");
                            }
                            break;
                        }
                        let (guard, _timeout) = match self.timer_condvar.wait_timeout(timer, deadline - now) {
                            Ok(pair) => pair,
                            Err(_) => return,
                        };
                        timer = guard;
                    }
                }
            }
        }
    }

    /// Writes the current committed state to the sync-file, fsyncs, and
    /// atomically renames it onto the data-file (spec §4.7). A no-op if
    /// nothing changed since the last successful sync.
    #[tracing::instrument(skip(self))]
    pub fn sync(&self) -> Result<()> {
        let _guard = self.sync_mutex.lock()?;
        if !self.contents_changed.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let snapshot = self.clock.current();
        let bytes = self.manager.with_read(|state| encode(state, snapshot));

        let sync_path = self.data_dir.join(SYNC_FILE);
        let data_path = self.data_dir.join(DATA_FILE);
        {
            let mut file = fs::File::create(&sync_path).map_err(|e| Error::persistence_io(&sync_path, e))?;
            file.write_all(&bytes).map_err(|e| Error::persistence_io(&sync_path, e))?;
            file.sync_all().map_err(|e| Error::persistence_io(&sync_path, e))?;
        }
        // POSIX rename is atomic; this is the rename half of "write to a
        // scratch file, fsync, then atomically rename" (spec §4.7). A
        // non-POSIX target would need the trailer-marker fallback the spec
        // allows for; not implemented here, see DESIGN.md.
        fs::rename(&sync_path, &data_path).map_err(|e| Error::persistence_io(&data_path, e))?;
        log::debug!("synced {} bytes at snapshot {snapshot}", bytes.len());
        Ok(())
    }

    /// Stops the background thread and performs a final synchronous flush
    /// if the configured delay deferred writes to shutdown.
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);
        self.timer_condvar.notify_all();
        if let Some(handle) = self.worker.lock()?.take() {
            let _ = handle.join();
        }
        if matches!(self.sync_delay, SyncDelay::DeferToShutdown) || self.contents_changed.load(Ordering::Acquire) {
            self.sync()?;
        }
        Ok(())
    }
}

/// Serialises every interned term plus every currently-live statement in
/// both partitions at `snapshot` into the spec §6 binary format. Dead
/// (tombstoned) statements are not written: a reload replays them as fresh
/// inserts, which reproduces the same statement *set*, the property the
/// spec's round-trip scenario actually asks for (spec §8).
fn encode(state: &StoreState, snapshot: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    codec::write_header(&mut buf);

    let mut ns_ids: std::collections::HashMap<usize, u32> = std::collections::HashMap::new();
    let mut next_ns_id = 0u32;

    for (id, term) in state.terms.iter() {
        match term {
            Term::Iri { namespace, local } => {
                let ptr = Arc::as_ptr(namespace) as *const u8 as usize;
                let ns_id = *ns_ids.entry(ptr).or_insert_with(|| {
                    let id = next_ns_id;
                    next_ns_id += 1;
                    codec::write_record(
                        &mut buf,
                        &Record::Namespace {
                            id,
                            value: namespace.to_string(),
                        },
                    );
                    id
                });
                codec::write_record(
                    &mut buf,
                    &Record::Uri {
                        id: id.index() as u32,
                        ns_id,
                        local: local.to_string(),
                    },
                );
            }
            Term::BlankNode { label } => {
                codec::write_record(
                    &mut buf,
                    &Record::Bnode {
                        id: id.index() as u32,
                        label: label.to_string(),
                    },
                );
            }
            Term::Literal { lexical, lang, datatype } => {
                codec::write_record(
                    &mut buf,
                    &Record::Literal {
                        id: id.index() as u32,
                        lex: lexical.to_string(),
                        lang: lang.as_ref().map(|l| l.to_string()),
                        datatype: datatype.as_ref().map(|d| d.to_string()),
                    },
                );
            }
        }
    }

    for (partition, explicit) in [(&state.explicit, true), (&state.inferred, false)] {
        for (_, record) in partition.index.scan(&partition.list, Pattern::default(), snapshot) {
            write_statement_record(&mut buf, record, explicit);
        }
    }

    codec::write_record(&mut buf, &Record::Eof);
    buf
}

fn write_statement_record(buf: &mut Vec<u8>, record: &StatementRecord, explicit: bool) {
    let s = record.statement;
    codec::write_record(
        buf,
        &Record::Statement {
            s: s.subject.index() as u32,
            p: s.predicate.index() as u32,
            o: s.object.index() as u32,
            c: s.context.map(|c| c.index() as u32),
            explicit,
        },
    );
}

/// Replays a decoded data-file directly into `manager`'s term arena and
/// statement partitions (spec §4.7). The spec describes this as happening
/// "via a NONE-isolation sink"; this implementation installs records
/// directly under the write lock instead of constructing a throwaway
/// [`crate::mvcc::Sink`], which is equivalent for a store with no other
/// observers yet (recovery runs before `Store::init` returns) and avoids a
/// bootstrapping cycle between the persistence engine and the sink it
/// would need. See DESIGN.md.
fn recover(manager: &LockManager<StoreState>, clock: &SnapshotClock, bytes: &[u8]) -> Result<()> {
    let mut cursor = bytes;
    codec::read_header(&mut cursor)?;

    let mut namespaces: Vec<String> = Vec::new();
    let mut any_statement = false;

    manager.with_write(|state| -> Result<()> {
        loop {
            match codec::read_record(&mut cursor)? {
                Record::Eof => break,
                Record::Namespace { value, .. } => namespaces.push(value),
                Record::Uri { ns_id, local, .. } => {
                    let namespace = namespaces.get(ns_id as usize).cloned().unwrap_or_default();
                    state.terms.intern_iri(&namespace, &local)?;
                }
                Record::Bnode { label, .. } => {
                    state.terms.intern_blank(&label);
                }
                Record::Literal { lex, lang, datatype, .. } => {
                    state.terms.intern_literal(&lex, lang.as_deref(), datatype.as_deref())?;
                }
                Record::Statement { s, p, o, c, explicit } => {
                    any_statement = true;
                    let statement = Statement::new(TermId(s), TermId(p), TermId(o), c.map(TermId));
                    let partition_kind = if explicit { PartitionKind::Explicit } else { PartitionKind::Inferred };
                    let partition = state.partition_mut(partition_kind);
                    let record = StatementRecord {
                        statement,
                        added_at: 1,
                        removed_at: 0,
                        explicit,
                        tx_state: TxState::Committed,
                    };
                    let id = partition.list.append(record);
                    partition.index.insert(id, partition.list.get(id).expect("just appended"));
                }
            }
        }
        Ok(())
    })?;

    if any_statement {
        clock.advance();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Isolation;

    fn config_at(dir: &std::path::Path, sync_delay_ms: i64) -> Config {
        Config {
            persist: true,
            data_dir: Some(dir.to_path_buf()),
            sync_delay_ms,
            ..Config::default()
        }
    }

    #[test]
    fn persistence_round_trip_preserves_the_statement_set() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = crate::store::Store::init(config_at(dir.path(), 0)).unwrap();
            let a = store.intern_iri("http://ex/", "a").unwrap();
            let p = store.intern_iri("http://ex/", "p").unwrap();
            let b = store.intern_iri("http://ex/", "b").unwrap();
            let c = store.intern_literal("1", None, None).unwrap();

            let mut sink = store.explicit().sink(Isolation::SnapshotRead);
            sink.add(Statement::new(a, p, b, None)).unwrap();
            sink.add(Statement::new(a, p, c, None)).unwrap();
            sink.prepare().unwrap();
            sink.flush().unwrap();
            sink.close();
            store.shutdown().unwrap();
        }

        let reopened = crate::store::Store::init(config_at(dir.path(), 0)).unwrap();
        let hits = reopened.read(PartitionKind::Explicit, Pattern::default()).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn empty_data_file_on_startup_is_a_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DATA_FILE), []).unwrap();
        let store = crate::store::Store::init(config_at(dir.path(), 0)).unwrap();
        let hits = store.read(PartitionKind::Explicit, Pattern::default()).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn reopening_an_untouched_store_leaves_the_data_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::Store::init(config_at(dir.path(), 0)).unwrap();
        store.shutdown().unwrap();
        assert!(!dir.path().join(DATA_FILE).exists());
    }
}
