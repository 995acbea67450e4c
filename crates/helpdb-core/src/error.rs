//! Error types and handling for helpdb-core operations.
//!
//! A single error enum covers every failure the engine can report. Most of
//! the engine deliberately avoids errors: a keyword that does not resolve is
//! `None`, an unreadable database file is logged and skipped, and a damaged
//! cache directory file degrades to an empty cache. What remains here are the
//! failures a caller genuinely has to act on.
//!
//! ## Error Categories
//!
//! - **I/O Errors**: File system operations on database or cache files
//! - **Storage / Cache Errors**: Object cache slots and the directory file
//! - **Transfer Errors**: Failures reported by the fetch collaborator
//! - **Configuration Errors**: Missing search path, missing top topic
//!
//! ## Recovery Hints
//!
//! ```rust
//! use helpdb_core::Error;
//!
//! let err = Error::Transfer("connection reset".to_string());
//! if err.is_recoverable() {
//!     println!("will retry on next access: {err}");
//! }
//! assert_eq!(err.category(), "transfer");
//! ```

use thiserror::Error;

/// The main error type for helpdb-core operations.
///
/// All fallible public functions return `Result<T, Error>`. The enum converts
/// automatically from `std::io::Error`, `regex::Error` and the TOML codec
/// errors so that `?` works across module boundaries.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed.
    ///
    /// Covers reading database files, writing cache slot files and the cache
    /// directory file. Interrupted and timed-out operations are recoverable.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage operation failed.
    ///
    /// Covers cache directory creation and slot file management beyond basic
    /// file I/O.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration is invalid or inaccessible.
    ///
    /// ## Common Causes
    ///
    /// - No search path configured
    /// - The configured top-level topic does not resolve
    /// - The configuration file cannot be read or written
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource was not found.
    ///
    /// Only used where absence is an error for the caller (e.g. an image
    /// job's local file). Keyword misses are reported as `None` instead.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A search or scan pattern is not a valid regular expression.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Object cache bookkeeping failed.
    ///
    /// Raised for stale handles (the slot was reused by a peer before the
    /// caller completed it) and capacity misuse.
    #[error("Cache error: {0}")]
    Cache(String),

    /// The fetch collaborator reported a failure.
    ///
    /// Transfers are retried on the next access, so this is recoverable.
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// An engine context already owns this cache directory in this process.
    ///
    /// Engine state is single-caller; constructing a second context over the
    /// same cache directory is a contract violation reported at construction.
    #[error("Engine already initialized for {0}")]
    AlreadyInitialized(String),

    /// Serialization or deserialization failed.
    ///
    /// Raised for malformed TOML in a configuration file.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error for uncategorized failures.
    #[error("{0}")]
    Other(String),
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl Error {
    /// Check if the error might be recoverable through retry logic.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use helpdb_core::Error;
    /// use std::io;
    ///
    /// assert!(Error::Io(io::Error::new(io::ErrorKind::Interrupted, "eintr")).is_recoverable());
    /// assert!(Error::Transfer("reset".into()).is_recoverable());
    /// assert!(!Error::Config("no search path".into()).is_recoverable());
    /// ```
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transfer(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Get the error category as a string identifier.
    ///
    /// Useful as a structured logging field:
    ///
    /// ```rust
    /// use helpdb_core::Error;
    ///
    /// let err = Error::Storage("disk full".into());
    /// tracing::warn!(category = err.category(), "{err}");
    /// ```
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::NotFound(_) => "not_found",
            Self::InvalidPattern(_) => "invalid_pattern",
            Self::Cache(_) => "cache",
            Self::Transfer(_) => "transfer",
            Self::AlreadyInitialized(_) => "already_initialized",
            Self::Serialization(_) => "serialization",
            Self::Other(_) => "other",
        }
    }
}

/// Convenience type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
