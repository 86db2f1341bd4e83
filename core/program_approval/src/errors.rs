//! Error taxonomy shared by every core operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApprovalError {
    /// The actor's role, ownership, or the program's status does not permit the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The actor is permitted, but a required condition is not met.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Another transition on the same program committed first.
    #[error("conflicting transition on program {program_id}")]
    ConflictingTransition { program_id: i64 },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl ApprovalError {
    /// Only persistence failures may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    pub(crate) fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} {id}"))
    }
}

impl From<sqlx::Error> for ApprovalError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for ApprovalError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::StorageUnavailable(format!("migration failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, ApprovalError>;

/// True when a database error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
