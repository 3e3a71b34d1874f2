//! Error taxonomies for the engine.
//!
//! `LedgerError` is the business-level taxonomy surfaced to the presentation
//! layer: every variant except `Database` is a validation outcome the caller
//! is expected to handle and explain. Storage connectivity failures pass
//! through as `Database`, since no business-level recovery is defined for
//! them.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::db::DependentCounts;
use crate::ledger::Capability;

/// Configuration resolution errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration value '{key}'")]
    MissingValue { key: String },

    #[error("invalid configuration value '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Storage-layer errors shared by all backends.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("migration failed: {0}")]
    Migration(String),
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for DatabaseError {
    fn from(err: tokio_postgres::Error) -> Self {
        use tokio_postgres::error::SqlState;

        match err.code() {
            Some(&SqlState::UNIQUE_VIOLATION) => Self::UniqueViolation(err.to_string()),
            Some(&SqlState::FOREIGN_KEY_VIOLATION) => Self::ForeignKeyViolation(err.to_string()),
            _ => Self::Query(err.to_string()),
        }
    }
}

#[cfg(feature = "libsql")]
impl From<libsql::Error> for DatabaseError {
    fn from(err: libsql::Error) -> Self {
        let message = err.to_string();
        if message.contains("UNIQUE constraint failed") {
            Self::UniqueViolation(message)
        } else if message.contains("FOREIGN KEY constraint failed") {
            Self::ForeignKeyViolation(message)
        } else {
            Self::Query(message)
        }
    }
}

/// Stored-file collaborator errors.
#[derive(Debug, Error)]
pub enum FileStorageError {
    #[error("invalid stored-file reference '{file_ref}': {message}")]
    InvalidRef { file_ref: String, message: String },

    #[error("failed to delete stored file '{file_ref}': {message}")]
    Delete { file_ref: String, message: String },
}

/// Business errors returned by the billing ledger and the deletion planner.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("payment of {amount} exceeds remaining balance of {remaining}")]
    Overpayment { amount: Decimal, remaining: Decimal },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("record belongs to client {record_client} but matter belongs to client {matter_client}")]
    OwnershipMismatch {
        record_client: Uuid,
        matter_client: Uuid,
    },

    #[error("cannot delete: dependent records exist ({0})")]
    HasDependents(DependentCounts),

    #[error("forced deletion aborted and rolled back: {0}")]
    DeletionFailed(String),

    #[error("invoice number '{0}' already exists")]
    DuplicateInvoiceNumber(String),

    #[error("capability '{}' required", .0.as_str())]
    Forbidden(Capability),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl LedgerError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
