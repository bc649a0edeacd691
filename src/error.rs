//! Error hierarchy for the storage core.
//!
//! Follows the aggregated-enum shape used throughout this codebase: small,
//! focused error enums for a subsystem, folded into one top-level [`Error`]
//! via `#[from]`.

use std::path::PathBuf;
use std::sync::PoisonError;
use thiserror::Error;

use crate::persistence::codec::DecodeError;

pub type Result<T> = std::result::Result<T, Error>;

/// Shape of a term rejected by the term store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TermError {
    #[error("IRI must not be empty")]
    EmptyIri,
    #[error("literal carries both a language tag `{lang}` and a non-langString datatype `{datatype}`")]
    LangWithNonLangStringDatatype { lang: String, datatype: String },
}

/// Configuration rejected at `Store::init`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("default_isolation {0:?} is not a member of supported_isolation_levels {1:?}")]
    DefaultIsolationNotSupported(crate::config::Isolation, Vec<crate::config::Isolation>),
    #[error("persist=true requires a non-empty data_dir")]
    MissingDataDir,
    #[error("reserved contexts must not name the same term twice")]
    ReservedContextsCollide,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("operation requires an initialised store; call `Store::init` first")]
    NotInitialised,
    #[error("store configuration mutator called after init()")]
    AlreadyInitialised,
    #[error("invalid term: {0}")]
    InvalidTerm(#[from] TermError),
    #[error("operation is not valid in the current sink/connection state: {0}")]
    InvalidState(&'static str),
    #[error("serializable write-write conflict detected at prepare")]
    ConcurrentModification,
    #[error("could not acquire lock on data directory {0}")]
    LockFailed(PathBuf),
    #[error("persistence I/O failure at {path}: {source}")]
    PersistenceIo { path: PathBuf, source: std::io::Error },
    #[error("decoding the data file failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("blocking wait was interrupted")]
    Interrupted,
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("internal lock was poisoned: {0}")]
    LockPoisoned(String),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(err: PoisonError<T>) -> Self {
        Error::LockPoisoned(err.to_string())
    }
}

impl Error {
    pub(crate) fn persistence_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::PersistenceIo {
            path: path.into(),
            source,
        }
    }
}
