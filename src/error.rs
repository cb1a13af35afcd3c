use std::path::PathBuf;

use thiserror::Error;

use crate::types::SchemaKind;

/// Convenience result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Convenience result type for pipeline lifecycle operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error type returned by [`crate::decoder::Decoder::decode`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Underlying I/O error (e.g. file vanished, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The Parquet reader rejected the file.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// The file's column layout is not the one that was requested.
    #[error("file does not match {expected} tripdata schema: {path}")]
    SchemaMismatch { expected: SchemaKind, path: PathBuf },

    /// A value could not be converted into the column's logical type.
    #[error("failed to convert value at row {row} column '{column}': {message} (raw='{raw}')")]
    InvalidValue {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },
}

/// Error type returned by [`crate::sink::Sink`] implementations.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A row of the other schema was handed to the sink.
    #[error("sink expects {expected} rows but received {received}")]
    WrongSchema {
        expected: SchemaKind,
        received: SchemaKind,
    },

    /// Free-form failure reported by a downstream store.
    #[error("{0}")]
    Rejected(String),
}

/// Error type for rate limiter acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// More permits were requested than the bucket can ever hold.
    #[error("requested {requested} permits but capacity is {capacity}")]
    ExceedsCapacity { requested: usize, capacity: usize },

    /// The limiter was shut down while the caller was waiting.
    #[error("rate limiter is shut down")]
    Shutdown,
}

/// Configuration problems detected before anything starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The environment carried an override that does not parse.
    #[error("invalid value for {var}: '{value}'")]
    Env { var: String, value: String },

    #[error("{0}")]
    Invalid(String),
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Errors raised by [`crate::watcher::DirectoryWatcher::start`].
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("directory does not exist: {0}")]
    Missing(PathBuf),

    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("directory is not readable: {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn scan thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Failure to relocate a file after processing. The file stays where it was.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("path has no file name: {0}")]
    NoFileName(PathBuf),

    #[error("failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error for assembling and starting the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn dispatcher thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The sink was lost with a dispatcher that never stopped, so the pipeline cannot restart.
    #[error("sink is no longer available; rebuild the pipeline")]
    SinkUnavailable,
}
