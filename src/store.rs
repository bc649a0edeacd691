//! Top-level store (spec §2, §4): owns the shared term arena, the two
//! statement partitions, the snapshot clock, the lock manager, and the
//! optional persistence engine, and hands out [`crate::mvcc::Source`]s.
//!
//! Grounded on `datastore.rs`'s `Locking` struct, which bundles
//! `Arc<RwLock<CommittedState>>` + `Arc<Mutex<SequencesState>>` + config
//! behind one `Clone`-able handle with a documented lock-acquisition order;
//! `bootstrap`/`rebuild_state_after_replay` for the fresh-vs-reload-from-
//! data-file branch taken in [`Store::init`].

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use crate::clock::SnapshotClock;
use crate::config::Config;
use crate::connection::Connection;
use crate::error::Result;
use crate::index::Pattern;
use crate::lock::LockManager;
use crate::mvcc::Source;
use crate::persistence::PersistenceEngine;
use crate::statement::{CompactionReport, StatementList};
use crate::term::{Term, TermId};
use crate::term_store::TermStore;

/// Which of the two mirrored partitions a statement belongs to (spec §3
/// "explicit vs inferred"). They share one term arena but keep distinct
/// statement arenas (spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
    Explicit,
    Inferred,
}

#[derive(Default)]
pub struct Partition {
    pub list: StatementList,
    pub index: crate::index::StatementIndex,
}

impl Partition {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Everything guarded by the store-wide [`LockManager`]: the term arena and
/// both partitions. Bundled into one type so a single `RwLock` covers all
/// of it, matching the Lock Manager's store-wide (not per-entity) locking
/// model (spec §4.5).
#[derive(Default)]
pub struct StoreState {
    pub terms: TermStore,
    pub explicit: Partition,
    pub inferred: Partition,
}

impl StoreState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn partition(&self, kind: PartitionKind) -> &Partition {
        match kind {
            PartitionKind::Explicit => &self.explicit,
            PartitionKind::Inferred => &self.inferred,
        }
    }

    pub fn partition_mut(&mut self, kind: PartitionKind) -> &mut Partition {
        match kind {
            PartitionKind::Explicit => &mut self.explicit,
            PartitionKind::Inferred => &mut self.inferred,
        }
    }
}

/// The storage core's public entry point. Cheap to clone: every field is
/// itself `Arc`-backed or a plain value, matching `RelationalDB`'s
/// clone-a-handle idiom in the reference codebase.
#[derive(Clone)]
pub struct Store {
    state: LockManager<StoreState>,
    clock: Arc<SnapshotClock>,
    persistence: Option<Arc<PersistenceEngine>>,
    sink_tokens: Arc<AtomicU64>,
    config: Arc<Config>,
}

impl Store {
    /// Opens a store per `config` (spec §6): validates the configuration,
    /// takes the directory lock and replays an existing data file if
    /// `persist` is set, otherwise starts fully memory-resident.
    #[tracing::instrument(skip(config), fields(persist = config.persist))]
    pub fn init(config: Config) -> Result<Self> {
        config.validate()?;
        config.mark_initialized();

        let state = LockManager::new(StoreState::empty());
        let clock = Arc::new(SnapshotClock::new());

        let persistence = if config.persist {
            log::info!("opening persisted store at {:?}", config.data_dir);
            Some(PersistenceEngine::open(&config, state.clone(), clock.clone())?)
        } else {
            None
        };

        Ok(Store {
            state,
            clock,
            persistence,
            sink_tokens: Arc::new(AtomicU64::new(0)),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A handle for reading/writing one partition (spec §4.6).
    pub fn source(&self, partition: PartitionKind) -> Source {
        Source::new(
            self.state.clone(),
            self.clock.clone(),
            self.persistence.clone(),
            self.sink_tokens.clone(),
            partition,
        )
    }

    pub fn explicit(&self) -> Source {
        self.source(PartitionKind::Explicit)
    }

    pub fn inferred(&self) -> Source {
        self.source(PartitionKind::Inferred)
    }

    /// Opens a new [`Connection`] in the `idle` state (spec §4.8), bound to
    /// the explicit partition (the inferred partition is mutated by the
    /// external inference process through its own [`Source`]).
    pub fn connection(&self) -> Connection {
        Connection::new(self.clone(), PartitionKind::Explicit)
    }

    pub fn default_isolation(&self) -> crate::config::Isolation {
        self.config.default_isolation
    }

    pub fn intern_iri(&self, namespace: &str, local: &str) -> Result<TermId> {
        self.state.with_write(|s| s.terms.intern_iri(namespace, local))
    }

    pub fn intern_blank(&self, label: &str) -> TermId {
        self.state.with_write(|s| s.terms.intern_blank(label))
    }

    pub fn fresh_blank(&self) -> TermId {
        self.state.with_write(|s| s.terms.fresh_blank())
    }

    pub fn intern_literal(&self, lex: &str, lang: Option<&str>, datatype: Option<&str>) -> Result<TermId> {
        self.state.with_write(|s| s.terms.intern_literal(lex, lang, datatype))
    }

    pub fn lookup(&self, term: &Term) -> Option<TermId> {
        self.state.with_read(|s| s.terms.lookup(term))
    }

    pub fn get_term(&self, id: TermId) -> Option<Term> {
        self.state.with_read(|s| s.terms.get(id).cloned())
    }

    /// Runs a foreground compaction sweep over both partitions using the
    /// snapshot clock's current `min_live()` bound (spec §4.2, §4.4).
    pub fn compact(&self) -> (CompactionReport, CompactionReport) {
        let min_live = self.clock.min_live();
        self.state.with_write(|s| {
            let explicit = s.explicit.list.compact(min_live);
            s.explicit.index.apply_remap(&explicit.remap);
            let inferred = s.inferred.list.compact(min_live);
            s.inferred.index.apply_remap(&inferred.remap);
            (explicit, inferred)
        })
    }

    /// A one-shot, auto-commit pattern scan over `partition` at the default
    /// isolation (spec §4.8 "reads outside a transaction create an implicit
    /// auto-commit dataset").
    pub fn read(&self, partition: PartitionKind, pattern: Pattern) -> Result<Vec<crate::statement::Statement>> {
        let mut dataset = self.source(partition).dataset(self.default_isolation());
        let cursor = dataset.scan(pattern)?;
        Ok(cursor.collect())
    }

    /// Flushes any deferred-to-shutdown persistence write and stops the
    /// background sync thread, if any (spec §4.7).
    pub fn shutdown(&self) -> Result<()> {
        if let Some(persistence) = &self.persistence {
            persistence.shutdown()?;
        }
        Ok(())
    }
}
