//! Errors raised while persisting or restoring a cluster view.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// A failure in the redb layer or in the JSON encoding of a record.
///
/// Variants carry the underlying message only; redb's error types differ
/// per call site and none of them are matched on by callers.
#[derive(Debug, Error)]
pub enum StateError {
    /// The database file could not be created or opened.
    #[error("cannot open state database: {0}")]
    Open(String),

    /// Beginning or committing a read or write transaction failed.
    #[error("state transaction failed: {0}")]
    Transaction(String),

    /// The clusters or nodes table could not be opened.
    #[error("cannot open state table: {0}")]
    Table(String),

    #[error("cannot read saved cluster state: {0}")]
    Read(String),

    #[error("cannot write cluster state: {0}")]
    Write(String),

    /// A cluster or node record could not be encoded.
    #[error("cannot encode state record: {0}")]
    Serialize(String),

    /// A stored record no longer matches the current record layout.
    #[error("cannot decode saved state record: {0}")]
    Deserialize(String),
}
