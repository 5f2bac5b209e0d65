//! Error types for lingosync-sync.

use std::path::PathBuf;

use thiserror::Error;

use lingosync_core::{CoreError, LinkId, SyncState};

/// All errors that can arise inside the sync engine.
///
/// `reconcile` maps every variant onto a `SyncOutcome`; these errors escape
/// only from the lower-level building blocks.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from policy/config loading.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (snapshot store, payloads).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The translation payload failed schema validation.
    #[error("translation rejected: {0}")]
    Validation(#[from] ValidationError),

    /// Network, auth or rate-limit failure talking to a collaborator.
    #[error("transport error: {0}")]
    Transport(String),

    /// A collaborator did not answer within its bounded wait.
    #[error("{operation} timed out after {millis} ms")]
    Timeout { operation: &'static str, millis: u64 },

    /// The target document was modified outside the engine.
    #[error("conflict on link {link_id}: {reason}")]
    Conflict { link_id: LinkId, reason: String },

    /// Another reconciliation for the same link is in flight.
    #[error("reconciliation already in progress for link {0}")]
    LockContention(LinkId),

    /// A state change not permitted by the link lifecycle.
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: SyncState, to: SyncState },
}

/// Problems found in an untrusted translation payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("payload is not a JSON object: {0}")]
    NotAnObject(String),

    #[error("missing required key '{0}'")]
    MissingKey(String),

    #[error("unexpected key '{0}'")]
    UnexpectedKey(String),

    #[error("key '{0}' must be a string")]
    WrongType(String),

    #[error("key '{key}' has malformed markup: {detail}")]
    MalformedMarkup { key: String, detail: String },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
