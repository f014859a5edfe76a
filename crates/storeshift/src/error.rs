//! Error types for migration runs
//!
//! Every variant carries enough store/table/key context to be actionable from
//! a single log line or report entry.

use storeshift_common::{CommonError, StoreKind, StoreRole};
use thiserror::Error;

/// Result type alias for migration operations
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Error type for all migration phases
#[derive(Error, Debug)]
pub enum MigrationError {
    /// A store could not be reached or rejected the probe
    #[error("Cannot reach {role} {kind}: {message}")]
    Connectivity {
        kind: StoreKind,
        role: StoreRole,
        message: String,
    },

    /// One or more connection probes failed during initialization
    #[error("Connection validation failed for {} store(s): {}", .0.len(), .0.join("; "))]
    Unreachable(Vec<String>),

    /// Backup artifact could not be produced or hashed
    #[error("Backup of {kind} failed: {message}")]
    Backup { kind: StoreKind, message: String },

    /// Target row count does not match the source count captured at transfer start
    #[error("Row count mismatch for {table}: source had {expected} rows, target has {actual}")]
    RowCountMismatch {
        table: String,
        expected: u64,
        actual: u64,
    },

    /// A batch of rows or keys could not be transferred
    #[error("Transfer of {unit} failed: {message}")]
    Transfer { unit: String, message: String },

    /// The source holds a key of a type that cannot be migrated
    #[error("Key '{key}' has unsupported type '{type_name}'")]
    UnsupportedKeyType { key: String, type_name: String },

    /// An external dump/restore tool exited unsuccessfully
    #[error("{program} exited with {status}: {stderr}")]
    Tool {
        program: String,
        status: String,
        stderr: String,
    },

    /// Phases must only move forward
    #[error("Cannot move from phase {from} back to {to}")]
    PhaseRewind { from: String, to: String },

    /// A phase panicked; the run is stopped but still reported
    #[error("Phase panicked: {0}")]
    Panicked(String),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check your environment variables or .env file.")]
    Config(String),

    #[error("Relational store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Key-value store error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl MigrationError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a backup error
    pub fn backup(kind: StoreKind, msg: impl Into<String>) -> Self {
        Self::Backup {
            kind,
            message: msg.into(),
        }
    }

    /// Create a transfer error for a named unit (table batch, key batch, ...)
    pub fn transfer(unit: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transfer {
            unit: unit.into(),
            message: msg.into(),
        }
    }

    /// Whether retrying the same operation could plausibly succeed
    ///
    /// Driver, IO and tool failures are treated as transient. Verification and
    /// data-shape errors are deterministic and never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            MigrationError::Database(err) => !matches!(
                err,
                sqlx::Error::RowNotFound
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::TypeNotFound { .. }
                    | sqlx::Error::Decode(_)
            ),
            MigrationError::Redis(err) => {
                err.is_io_error()
                    || err.is_timeout()
                    || err.is_connection_dropped()
                    || err.is_connection_refusal()
            },
            MigrationError::Io(_) | MigrationError::Tool { .. } | MigrationError::Transfer { .. } => {
                true
            },
            _ => false,
        }
    }
}
