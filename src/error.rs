use std::fmt;
use std::io;

/// Unified error type for the storage engine.
///
/// A missing key is NOT an error — lookups return `Ok(None)`. Corruption at
/// the tail of the WAL is not an error either; it is an incomplete write and
/// recovery truncates it. `Corruption` here means damage the store cannot
/// safely recover from: a bad record in the middle of a WAL segment, a
/// mangled manifest, an SSTable that fails validation.
#[derive(Debug)]
pub enum Error {
    /// IO error from disk operations.
    Io(io::Error),
    /// Data corruption detected (CRC mismatch, bad format, etc).
    Corruption(String),
    /// Invalid configuration passed to the store constructor.
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Corruption(msg) => write!(f, "Corruption: {msg}"),
            Error::Config(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
