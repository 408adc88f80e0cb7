//! Shared error type for meshbridge crates.

/// Unified error type for settings and plumbing failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse errors.
    #[error("Parse error in {location}: {message}")]
    Parse { location: String, message: String },

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

/// Build an [`Error::Config`] from a format string.
#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        $crate::error::Error::Config($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Config(format!($fmt, $($arg)*))
    };
}
