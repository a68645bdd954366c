//! Error types for sqlcmdr.
//!
//! Only [`SqlCmdrError::InvalidArgument`] is expected to cross the
//! executor/catalog boundary as an `Err`; database-side failures are folded
//! into the returned model values.

use thiserror::Error;

/// Main error type for sqlcmdr operations.
#[derive(Error, Debug)]
pub enum SqlCmdrError {
    /// Malformed call (blank connection string, blank SQL, etc.)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution errors (syntax errors, constraint violations, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// The in-flight batch was cancelled by the caller or by `cancel_current`.
    #[error("Query was cancelled")]
    Cancelled,

    /// Configuration errors (invalid settings file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SqlCmdrError {
    /// Creates an invalid-argument error with the given message.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "Invalid Argument",
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Cancelled => "Cancelled",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns the underlying driver text without the category prefix.
    ///
    /// Callers classify failures by substring (e.g. "syntax"), so this must
    /// stay byte-for-byte what the driver reported.
    pub fn driver_message(&self) -> String {
        match self {
            Self::InvalidArgument(msg)
            | Self::Connection(msg)
            | Self::Query(msg)
            | Self::Config(msg)
            | Self::Internal(msg) => msg.clone(),
            Self::Cancelled => self.to_string(),
        }
    }

    /// Whether a transport should map this error to a client-side fault.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}

/// Result type alias using SqlCmdrError.
pub type Result<T> = std::result::Result<T, SqlCmdrError>;
