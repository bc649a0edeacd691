//! Lock Manager (spec §4.5): a store-wide read/write lock, generic over the
//! state it guards, plus a directory-level advisory lock for persistence.
//!
//! `DirLock` is lifted almost verbatim from `lock_file.rs`'s `LockFile`.
//! `LockManager<T>` plays the role `Arc<RwLock<CommittedState>>` plays in
//! `datastore.rs`'s `Locking` struct. It is itself `Arc`-backed (via
//! parking_lot's `arc_lock` feature) so that datasets, sinks, and the
//! persistence engine's background sync thread can each hold an owned
//! lock token that outlives the call that created it, rather than
//! borrowing from a `Store` pinned in place.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt as _;
use parking_lot::{
    ArcRwLockReadGuard, ArcRwLockUpgradableReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};

use crate::config::Isolation;
use crate::error::{Error, Result};

pub struct LockManager<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for LockManager<T> {
    fn clone(&self) -> Self {
        LockManager { inner: self.inner.clone() }
    }
}

/// An owned hold on the store-wide lock, acquired according to an
/// [`Isolation`] level (spec §4.5). `None` means the dataset/sink does not
/// hold the lock across its own lifetime; reads at that level instead take
/// a short-lived lock per operation via [`LockManager::with_read`], which
/// is this implementation's safe-Rust rendering of "no transactional lock"
/// (true lock-free reads over a plain `RwLock` would require `unsafe`,
/// which this crate denies).
pub enum LockToken<T> {
    None,
    Read(ArcRwLockReadGuard<RawRwLock, T>),
    /// Held by sinks at a non-serializable, lock-taking isolation during
    /// staging/prepare; [`LockToken::upgrade`] turns this into `Write` with
    /// parking_lot's atomic upgrade, matching spec §4.6's "the prepare
    /// phase may run under a read lock with a final atomic upgrade".
    Upgradable(ArcRwLockUpgradableReadGuard<RawRwLock, T>),
    Write(ArcRwLockWriteGuard<RawRwLock, T>),
}

impl<T> LockManager<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    /// Acquires whatever `isolation` requires for a read-only dataset.
    pub fn acquire(&self, isolation: Isolation) -> LockToken<T> {
        if isolation.takes_write_lock() {
            LockToken::Write(self.inner.write_arc())
        } else if isolation.takes_read_lock() {
            LockToken::Read(self.inner.read_arc())
        } else {
            LockToken::None
        }
    }

    /// Acquires whatever `isolation` requires for a sink, using an
    /// upgradable read where a plain read would otherwise be taken, so
    /// `flush()` can upgrade it in place instead of dropping and
    /// reacquiring.
    pub fn acquire_for_write(&self, isolation: Isolation) -> LockToken<T> {
        if isolation.takes_write_lock() {
            LockToken::Write(self.inner.write_arc())
        } else if isolation.takes_read_lock() {
            LockToken::Upgradable(self.inner.upgradable_read_arc())
        } else {
            LockToken::None
        }
    }

    pub fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.read())
    }

    pub fn with_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.write())
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write()
    }

    fn write_arc(&self) -> ArcRwLockWriteGuard<RawRwLock, T> {
        self.inner.write_arc()
    }
}

impl<T> LockToken<T> {
    /// Reads through whatever this token holds, falling back to a
    /// short-lived lock via `manager` for the `None` case.
    pub fn with<R>(&self, manager: &LockManager<T>, f: impl FnOnce(&T) -> R) -> R {
        match self {
            LockToken::None => manager.with_read(f),
            LockToken::Read(guard) => f(guard),
            LockToken::Upgradable(guard) => f(guard),
            LockToken::Write(guard) => f(guard),
        }
    }

    /// Ensures this token is a `Write` hold, upgrading an `Upgradable`
    /// token atomically (no intervening writer can interleave) or taking a
    /// transient write lock via `manager` for the `None` case.
    pub fn upgrade(self, manager: &LockManager<T>) -> LockToken<T> {
        match self {
            LockToken::Write(guard) => LockToken::Write(guard),
            LockToken::Upgradable(guard) => LockToken::Write(ArcRwLockUpgradableReadGuard::upgrade(guard)),
            LockToken::None => LockToken::Write(manager.write_arc()),
            LockToken::Read(_) => unreachable!("Dataset tokens are never upgraded; only Sink tokens are"),
        }
    }

    pub fn with_mut<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        match self {
            LockToken::Write(guard) => f(guard),
            _ => panic!("with_mut requires an exclusive lock; call upgrade() first"),
        }
    }
}

/// A zero-byte marker file with an advisory exclusive OS lock, taken for
/// the lifetime of a persisted store to prevent two processes sharing one
/// data directory (spec §6).
#[derive(Clone)]
pub struct DirLock {
    path: Arc<Path>,
    #[allow(unused)]
    lock: Arc<File>,
}

impl DirLock {
    pub fn acquire(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| Error::persistence_io(data_dir, e))?;
        let path: PathBuf = data_dir.join("db.lock");
        let lock = File::create(&path).map_err(|e| Error::persistence_io(&path, e))?;
        lock.try_lock_exclusive().map_err(|_| Error::LockFailed(path.clone()))?;
        Ok(Self {
            path: path.into(),
            lock: lock.into(),
        })
    }
}

impl fmt::Debug for DirLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirLock").field("path", &self.path).finish()
    }
}
