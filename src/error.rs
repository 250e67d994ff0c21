//! Summary: Error types for the tableloader harness.
//! Copyright (c) YOAB. All rights reserved.

use std::fmt;
use std::io;

/// Result type alias for tableloader operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for store, engine and driver operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error while writing reports or installing handlers.
    Io {
        context: &'static str,
        source: io::Error,
    },
    /// A table with this name already exists.
    TableExists { name: String },
    /// The named table does not exist.
    TableNotFound { name: String },
    /// An index with this name already exists on the table.
    IndexExists { table: String, index: String },
    /// The named index does not exist on the table.
    IndexNotFound { table: String, index: String },
    /// A batch write exceeded the store's per-call operation limit.
    BatchTooLarge { len: usize, max: usize },
    /// Opaque failure reported by the store collaborator.
    Store(String),
    /// A worker thread could not be spawned.
    WorkerSpawn { worker: usize, source: io::Error },
    /// The worker pool no longer accepts jobs.
    PoolClosed,
    /// The driver was interrupted while waiting for a cohort.
    Interrupted { outstanding: usize },
    /// A phase finished with failed jobs and its results are unusable.
    PhaseFailed {
        phase: &'static str,
        failed_jobs: usize,
        first_error: String,
    },
    /// Invalid command-line or run configuration.
    Config(String),
    /// A run report could not be serialized.
    Report(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io { context, source } => write!(f, "I/O error while {context}: {source}"),
            Error::TableExists { name } => write!(f, "table already exists: {name}"),
            Error::TableNotFound { name } => write!(f, "table not found: {name}"),
            Error::IndexExists { table, index } => {
                write!(f, "index {index} already exists on table {table}")
            }
            Error::IndexNotFound { table, index } => {
                write!(f, "index {index} not found on table {table}")
            }
            Error::BatchTooLarge { len, max } => {
                write!(f, "batch of {len} operations exceeds limit of {max}")
            }
            Error::Store(msg) => write!(f, "store error: {msg}"),
            Error::WorkerSpawn { worker, source } => {
                write!(f, "failed to spawn worker {worker}: {source}")
            }
            Error::PoolClosed => write!(f, "worker pool is closed"),
            Error::Interrupted { outstanding } => {
                write!(f, "interrupted with {outstanding} jobs outstanding")
            }
            Error::PhaseFailed {
                phase,
                failed_jobs,
                first_error,
            } => write!(
                f,
                "phase {phase} failed: {failed_jobs} jobs failed (first: {first_error})"
            ),
            Error::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Error::Report(err) => write!(f, "failed to serialize report: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source),
            Error::WorkerSpawn { source, .. } => Some(source),
            Error::Report(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io {
            context: "performing I/O",
            source: err,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Report(err)
    }
}
