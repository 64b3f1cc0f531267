//! Error types shared by the quota accounting engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type QfResult<T> = Result<T, QfError>;

/// Unified error type for the accounting and quota subsystems.
#[derive(Error, Debug)]
pub enum QfError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown {kind} {name:?}: enforcement is enabled and no matching directory entry exists")]
    MembershipDenied { kind: &'static str, name: String },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("resource not found: {0}")]
    NotFound(String),
}
