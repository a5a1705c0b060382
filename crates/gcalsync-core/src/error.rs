//! Core error types for gcalsync-core.
//!
//! Every failure that can reach the command boundary is a [`CoreError`].
//! The variant decides the process exit code: remote failures exit with 2,
//! everything else with 1.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for gcalsync-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Bad arguments or references to things that are not registered
    #[error(transparent)]
    User(#[from] UserError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Local index errors
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// OAuth-related errors
    #[error("OAuth error: {0}")]
    OAuth(#[from] OAuthError),

    /// Remote calendar API errors
    #[error("Remote calendar error: {0}")]
    Remote(#[from] RemoteError),

    /// The run was interrupted before it finished
    #[error("Interrupted; the local index reflects every change committed so far")]
    Cancelled,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::Remote(_) => 2,
            _ => 1,
        }
    }

    /// Whether the rate-limited executor may retry the failed call.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Remote(RemoteError::Transient { .. }))
    }
}

/// Errors caused by what the user asked for.
#[derive(Error, Debug)]
pub enum UserError {
    #[error("Calendar {0} is not registered. Add it first with 'gcalsync add'.")]
    UnknownCalendar(String),

    #[error("Calendar {calendar_id} is already registered under account {account_name}")]
    CalendarOwnedElsewhere {
        calendar_id: String,
        account_name: String,
    },

    #[error("A calendar cannot block itself: {0}")]
    SelfBlock(String),

    #[error("Account name must not be empty")]
    EmptyAccountName,
}

/// Local index (SQLite) errors.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Failed to open database file
    #[error("Failed to open index at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Index migration failed: {0}")]
    MigrationFailed(String),

    /// The file was written by a newer gcalsync
    #[error("Unexpected index schema version {found} (this build knows up to {supported}); refusing to touch the file")]
    UnsupportedSchema { found: i32, supported: i32 },

    /// A stored value could not be decoded
    #[error("Corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },

    /// Database is locked by another process
    #[error("Index is locked by another gcalsync process")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Missing required configuration key
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// OAuth-specific errors.
#[derive(Error, Debug)]
pub enum OAuthError {
    /// Authorization failed
    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    /// Token exchange failed
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// Token refresh failed
    #[error("Token refresh failed for account {account}: {message}")]
    TokenRefreshFailed { account: String, message: String },

    /// Invalid callback
    #[error("Invalid OAuth callback: {0}")]
    InvalidCallback(String),

    /// Access token expired
    #[error("Access token for account {0} expired and no refresh token is stored")]
    TokenExpired(String),
}

/// Why the remote reported an object as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingKind {
    /// HTTP 404
    NotFound,
    /// HTTP 410
    Gone,
}

/// Remote calendar API errors.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Rate limiting or network trouble; worth retrying
    #[error("{operation}: transient failure ({status}): {message}")]
    Transient {
        operation: String,
        status: String,
        message: String,
    },

    /// The object does not exist (anymore)
    #[error("{operation}: remote object missing ({kind:?})")]
    Missing {
        operation: String,
        kind: MissingKind,
    },

    /// Any other non-2xx answer, or an unreadable body
    #[error("{operation}: HTTP {status}: {message}")]
    Fatal {
        operation: String,
        status: u16,
        message: String,
    },

    /// Transient failures persisted through every retry
    #[error("{operation}: giving up after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: String,
    },
}

impl From<rusqlite::Error> for IndexError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    IndexError::Locked
                } else {
                    IndexError::QueryFailed(err.to_string())
                }
            }
            _ => IndexError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Index(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
