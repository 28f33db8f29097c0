//! Error types for bangumi-dl
//!
//! This module provides the error taxonomy for the acquisition pipeline:
//! - Domain-specific error types (store, download agent, task scheduler)
//! - Machine-readable error codes for status reporting
//!
//! Nothing in the pipeline raises these past its own loop boundary. They are
//! returned by the store and the collaborator traits, then logged and
//! degraded to "skip this cycle" by the component that owns the call.

use thiserror::Error;

/// Result type alias for bangumi-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bangumi-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "submission.batch_size")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The external download agent rejected a call or could not be reached
    #[error("download agent error: {0}")]
    Agent(#[from] AgentError),

    /// Task scheduler registration or lookup error
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// The rename collaborator failed
    #[error("rename failed: {0}")]
    Rename(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Errors reported by a [`DownloadAgent`](crate::agent::DownloadAgent)
///
/// Only transport-level failures are transient. A clean "not found" answer
/// is not an error at all; probes model it as `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    /// The agent could not be reached or the connection broke mid-call
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete in time
    #[error("request timed out after {secs}s")]
    Timeout {
        /// Seconds waited before giving up
        secs: u64,
    },

    /// The agent session is not (or no longer) authenticated
    #[error("not authenticated with download agent")]
    Unauthorized,

    /// The agent understood the request and refused it
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Task scheduler errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// A task with the same name is already registered
    #[error("task '{0}' is already registered")]
    Duplicate(String),

    /// No task with that name is registered
    #[error("task '{0}' is not registered")]
    Unknown(String),
}

impl Error {
    /// Machine-readable error code, stable across releases
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Agent(e) => match e {
                AgentError::Transport(_) => "agent_transport",
                AgentError::Timeout { .. } => "agent_timeout",
                AgentError::Unauthorized => "agent_unauthorized",
                AgentError::Rejected(_) => "agent_rejected",
            },
            Error::Task(e) => match e {
                TaskError::Duplicate(_) => "task_duplicate",
                TaskError::Unknown(_) => "task_unknown",
            },
            Error::Rename(_) => "rename_failed",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }
}
