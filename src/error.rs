// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the sync engine.
//!
//! Errors are categorized by their source (manifest configuration, source
//! adapters, the durable event store, HTTP sync, etc.) and carry enough
//! context to render a useful message without the caller re-wrapping them.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Source` | Yes | Source data store read failures |
//! | `Sink` | Yes | Destination write failures |
//! | `EventStore` | Yes | Event store failures outside the database layer |
//! | `Http` | Yes | Sync protocol network errors, timeouts |
//! | `Database` | No | Local SQLite errors (needs operator attention) |
//! | `Manifest` | No | Manifest verification failed |
//! | `Config` | No | Configuration invalid |
//! | `AdapterNotFound` | No | No adapter registered for a tag |
//! | `InvalidState` | No | Lifecycle state machine violation |
//! | `BusNotPrepared` | No | Bus used before `prepare()` |
//! | `CursorsNotSet` | No | Subscribe before `set_initial_cursors()` |
//! | `BusNotRunning` | No | Publish after the bus stopped |
//! | `Resolve` | No | Service discovery has no host for a slug |
//! | `Serialization` | No | Malformed JSON payload |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Use [`SyncError::is_retryable()`] to determine if an operation should
//! be retried with backoff. Retryable errors indicate transient network or
//! availability issues. Non-retryable errors indicate bugs, configuration
//! problems, or data corruption.

use thiserror::Error;

use crate::manifest::verify::Diagnostic;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while syncing.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Manifest verification failed.
    ///
    /// The engine must not start with an invalid configuration; the
    /// structured diagnostics are carried for tooling to render.
    #[error("invalid manifest configuration: {}", format_diagnostics(.0))]
    Manifest(Vec<Diagnostic>),

    /// Invalid or missing configuration.
    ///
    /// Not retryable. Fix the configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// No adapter registered for a connection or transformation tag.
    ///
    /// Adapter dispatch is registry-based; a missing entry is a fatal,
    /// explicit error, never a silent skip.
    #[error("no {kind} adapter registered for type '{tag}'")]
    AdapterNotFound { kind: &'static str, tag: String },

    /// Lifecycle state machine violation.
    ///
    /// Occurs when an operation is attempted in the wrong state
    /// (e.g. calling `start()` on a reader that was never prepared).
    /// Not retryable. Indicates a bug in the caller.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// A message bus was used before `prepare()`.
    #[error("bus not prepared")]
    BusNotPrepared,

    /// A bus was subscribed before its initial cursors were set.
    #[error("cursors not set")]
    CursorsNotSet,

    /// Publish was attempted after the bus stopped or closed.
    #[error("bus no longer running")]
    BusNotRunning,

    /// Source data store failure.
    ///
    /// Retryable. The source may be temporarily unavailable.
    #[error("source error ({slug}): {message}")]
    Source { slug: String, message: String },

    /// Destination sink failure.
    ///
    /// Retryable. The destination may be temporarily overloaded.
    #[error("sink error ({slug}): {message}")]
    Sink { slug: String, message: String },

    /// Event store failure outside the local database layer.
    #[error("event store error: {0}")]
    EventStore(String),

    /// SQLite error from the durable event store.
    ///
    /// Not retryable here; transient SQLITE_BUSY contention is already
    /// retried inside the store before this surfaces.
    #[error("event store database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Sync protocol HTTP failure.
    ///
    /// Retryable with backoff; covers network errors, timeouts, and
    /// non-success status codes from a remote sync service.
    #[error("sync http error ({operation}): {message}")]
    Http { operation: String, message: String },

    /// Service discovery has no host for a manifest slug.
    #[error("cannot resolve host for manifest slug '{slug}'")]
    Resolve { slug: String },

    /// Malformed JSON payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected internal error.
    ///
    /// Catch-all for errors that shouldn't happen.
    #[error("internal error: {0}")]
    Internal(String),
}

fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    let mut out = format!("{} error(s)", errors);
    for diagnostic in diagnostics.iter().filter(|d| d.is_error()) {
        out.push_str("\n  - ");
        out.push_str(&diagnostic.to_string());
    }
    out
}

impl SyncError {
    /// Create a source error.
    pub fn source(slug: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            slug: slug.into(),
            message: message.into(),
        }
    }

    /// Create a sink error.
    pub fn sink(slug: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            slug: slug.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP error with the operation that failed.
    pub fn http(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Http {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Source { .. } => true,
            Self::Sink { .. } => true,
            Self::EventStore(_) => true,
            Self::Http { .. } => true,
            Self::Manifest(_) => false,
            Self::Config(_) => false,
            Self::AdapterNotFound { .. } => false,
            Self::InvalidState { .. } => false,
            Self::BusNotPrepared => false,
            Self::CursorsNotSet => false,
            Self::BusNotRunning => false,
            Self::Database(_) => false,
            Self::Resolve { .. } => false,
            Self::Serialization(_) => false,
            Self::Internal(_) => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        Self::http("request", e.to_string())
    }
}
