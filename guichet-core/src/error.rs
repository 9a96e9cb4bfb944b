//! Error types for guichet-sync.

use thiserror::Error;

/// Errors that abort a sync run.
///
/// Per-event calendar failures are not represented here; they are collected
/// into the run report as [`RemoteMutationError`](crate::calendar::RemoteMutationError).
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error(
        "Verification token not found in portal page (did the login fail or the markup change?)"
    )]
    TokenNotFound,

    #[error("Malformed portal response: {0}")]
    MalformedResponse(String),

    #[error("Calendar not found: {0}")]
    CalendarNotFound(String),

    #[error("Calendar service error: {0}")]
    Calendar(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for guichet-sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
