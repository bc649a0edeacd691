//! An in-memory, optionally file-persistent MVCC triple store for
//! RDF-style directed labelled graphs.
//!
//! See [`store::Store`] for the top-level entry point, [`connection::Connection`]
//! for the per-caller transaction lifecycle, and [`mvcc`] for the
//! lower-level source/dataset/sink abstractions a connection is built on.

pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod index;
pub mod lock;
pub mod mvcc;
pub mod persistence;
pub mod statement;
pub mod store;
pub mod term;
pub mod term_store;

pub use config::{Config, Isolation};
pub use connection::Connection;
pub use error::{Error, Result};
pub use index::Pattern;
pub use statement::Statement;
pub use store::{PartitionKind, Store};
pub use term::{Term, TermId};
