//! Tiller - a client-side synchronization engine for server-owned collections.
//!
//! This library keeps named collections of entities (chat messages, comments,
//! milestones, tasks, project roles) consistent with a remote backend despite
//! concurrent, interleaved requests. It provides:
//! - an in-memory collection store that presentation code reads snapshots from
//! - a request lifecycle tracker with per-collection generation counters, so a
//!   late-arriving response from a superseded fetch can never clobber newer data
//! - a mutation coordinator supporting optimistic edits with rollback and
//!   per-entity FIFO serialization of conflicting mutations
//! - a static dependency graph that re-fetches derived collections (e.g. a
//!   milestone's progress aggregates after a task mutation)
//!
//! The HTTP transport is an injected collaborator behind the
//! [`transport::Transport`] trait; the engine never performs I/O of its own.

pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod models;
pub mod store;
pub mod transport;

/// Broad class of a synchronization error, for notification events and
/// UI-side dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Validation,
    Permission,
    Conflict,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::Permission => "permission",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Library-level error type for synchronization operations.
///
/// Errors are cloneable so the lifecycle tracker can retain the last error
/// per collection while also returning it to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Transport unreachable or timed out.
    #[error("network error: {0}")]
    Network(String),

    /// Server rejected the payload shape or a business rule.
    #[error("validation rejected: {0}")]
    Validation(String),

    /// Server denied the actor's role.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Entity absent or already mutated (e.g. a delete-then-update race).
    /// UIs should prompt for a refresh rather than silently failing.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unclassified failure.
    #[error("{0}")]
    Unknown(String),
}

impl Error {
    /// The broad class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network(_) => ErrorKind::Network,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Permission(_) => ErrorKind::Permission,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

/// Result type alias for synchronization operations.
pub type Result<T> = std::result::Result<T, Error>;
