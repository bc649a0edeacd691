//! Caller-provided store configuration (spec §6).
//!
//! A plain public-field struct plus a `Default` impl and a `validate`
//! method, in the options-struct idiom this codebase uses for things like
//! `message_log::OpenOptions` rather than a builder type or an external
//! config-file format.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ConfigError, Error, Result};
use crate::term::Term;

/// Isolation level requested for a [`crate::mvcc::Dataset`] or
/// [`crate::mvcc::Sink`] (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Isolation {
    /// No transactional lock is taken; reads may observe concurrent writes.
    None,
    /// A read lock is held for the dataset's duration.
    ReadCommitted,
    /// A read lock is held and a snapshot is pinned.
    SnapshotRead,
    /// Alias of `SnapshotRead` with the same pinning semantics (spec names
    /// both `SNAPSHOT_READ` and `SNAPSHOT` as isolation levels).
    Snapshot,
    /// The write lock is held for the sink's duration; conflicting
    /// concurrent writers fail `prepare()` with `ConcurrentModification`.
    Serializable,
}

impl Isolation {
    pub(crate) fn takes_write_lock(self) -> bool {
        matches!(self, Isolation::Serializable)
    }

    pub(crate) fn pins_snapshot(self) -> bool {
        matches!(self, Isolation::SnapshotRead | Isolation::Snapshot | Isolation::Serializable)
    }

    pub(crate) fn takes_read_lock(self) -> bool {
        !matches!(self, Isolation::None)
    }

    pub const ALL: [Isolation; 5] = [
        Isolation::None,
        Isolation::ReadCommitted,
        Isolation::SnapshotRead,
        Isolation::Snapshot,
        Isolation::Serializable,
    ];
}

/// How long to wait before coalescing a commit into a disk sync (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDelay {
    /// Write synchronously from the committing transaction.
    Immediate,
    /// (Re)arm a single-shot timer this many milliseconds in the future.
    Coalesce(u64),
    /// Only write at shutdown.
    DeferToShutdown,
}

impl SyncDelay {
    pub fn from_millis(ms: i64) -> Self {
        match ms.cmp(&0) {
            std::cmp::Ordering::Equal => SyncDelay::Immediate,
            std::cmp::Ordering::Greater => SyncDelay::Coalesce(ms as u64),
            std::cmp::Ordering::Less => SyncDelay::DeferToShutdown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// If true, use `data_dir`; otherwise the store is memory-only.
    pub persist: bool,
    /// Directory containing the data file, sync file, and lock file.
    pub data_dir: Option<PathBuf>,
    /// 0 = immediate; >0 = coalesce this many ms; <0 = defer to shutdown.
    pub sync_delay_ms: i64,
    /// Subset of isolation levels offered to callers.
    pub supported_isolation_levels: Vec<Isolation>,
    /// Default isolation level when the caller doesn't pick one.
    pub default_isolation: Isolation,
    /// Opaque hint forwarded to an external query evaluator; unused by the
    /// storage core itself.
    pub iteration_cache_threshold: Option<u64>,
    /// A pair of context terms declared mutually exclusive; `init()` fails
    /// with `InvalidConfig` if both resolve to the same term, or if a
    /// caller otherwise flags them bound simultaneously. See the
    /// `REMOTE_CONTEXT`/`LOCAL_CONTEXT` open question in SPEC_FULL.md §9.
    pub reserved_contexts: Option<(Term, Term)>,
    /// Shared with every clone taken before `Store::init` consumes this
    /// config; flipped by `mark_initialized` so later mutator calls on any
    /// of those clones see that the config has already been handed off.
    initialized: Arc<AtomicBool>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            persist: false,
            data_dir: None,
            sync_delay_ms: 0,
            supported_isolation_levels: Isolation::ALL.to_vec(),
            default_isolation: Isolation::SnapshotRead,
            iteration_cache_threshold: None,
            reserved_contexts: None,
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !self.supported_isolation_levels.contains(&self.default_isolation) {
            return Err(ConfigError::DefaultIsolationNotSupported(
                self.default_isolation,
                self.supported_isolation_levels.clone(),
            )
            .into());
        }
        if self.persist && self.data_dir.is_none() {
            return Err(ConfigError::MissingDataDir.into());
        }
        if let Some((a, b)) = &self.reserved_contexts {
            if a == b {
                return Err(ConfigError::ReservedContextsCollide.into());
            }
        }
        Ok(())
    }

    pub(crate) fn sync_delay(&self) -> SyncDelay {
        SyncDelay::from_millis(self.sync_delay_ms)
    }

    /// Marks this config (and every clone sharing its `initialized` flag)
    /// as consumed by `Store::init`. Called once, from `init()` itself.
    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    fn require_mutable(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Err(Error::AlreadyInitialised);
        }
        Ok(())
    }

    /// Sets whether the store persists to disk (spec §6). Fails with
    /// `AlreadyInitialised` once this config has been passed to
    /// `Store::init` ("the configuration struct is immutable after
    /// init(); mutator calls afterward raise `AlreadyInitialised`").
    pub fn set_persist(&mut self, persist: bool) -> Result<()> {
        self.require_mutable()?;
        self.persist = persist;
        Ok(())
    }

    /// Sets the data directory. Same post-init restriction as `set_persist`.
    pub fn set_data_dir(&mut self, data_dir: Option<PathBuf>) -> Result<()> {
        self.require_mutable()?;
        self.data_dir = data_dir;
        Ok(())
    }

    /// Sets the sync coalescing delay in milliseconds. Same post-init
    /// restriction as `set_persist`.
    pub fn set_sync_delay_ms(&mut self, ms: i64) -> Result<()> {
        self.require_mutable()?;
        self.sync_delay_ms = ms;
        Ok(())
    }

    /// Sets the default isolation level. Same post-init restriction as
    /// `set_persist`.
    pub fn set_default_isolation(&mut self, level: Isolation) -> Result<()> {
        self.require_mutable()?;
        self.default_isolation = level;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn mutators_are_allowed_before_init() {
        let mut config = Config::default();
        config.set_sync_delay_ms(50).unwrap();
        assert_eq!(config.sync_delay_ms, 50);
    }

    #[test]
    fn mutators_fail_on_any_clone_once_init_has_consumed_the_config() {
        let mut config = Config::default();
        let mut handle = config.clone();
        Store::init(config.clone()).unwrap();

        // `config` itself was moved by value into `init`, but `handle`
        // shares the same `initialized` flag and was never consumed.
        let err = handle.set_sync_delay_ms(50);
        assert!(matches!(err, Err(Error::AlreadyInitialised)));
        let err = config.set_persist(true);
        assert!(matches!(err, Err(Error::AlreadyInitialised)));
    }
}
