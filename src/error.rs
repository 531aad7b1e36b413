//! Error types for the fileflix library.

use std::io;
use std::string::FromUtf8Error;

/// Result type alias for fileflix operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during protocol and server operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] FromUtf8Error),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("String too long for frame: {len} bytes, max {max}")]
    StringTooLong { len: usize, max: usize },
}
