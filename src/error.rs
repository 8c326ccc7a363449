//! Error types for lamina.

use thiserror::Error;

/// Result type alias using lamina's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for lamina operations.
///
/// Quota exhaustion is deliberately *not* an error: operations that can be
/// refused for lack of reserved space report that through their return value
/// (`None`), because callers are expected to retry via blocking admission or
/// to drop the data. Errors are reserved for malformed arguments, ranges that
/// violate an object's bounds, dead handles, and storage faults.
#[derive(Error, Debug)]
pub enum Error {
    /// An argument was malformed (zero length where positive required,
    /// missing source, mismatched accounts).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A requested byte range lies outside the object it addresses.
    #[error("range out of bounds: {0}")]
    OutOfBounds(String),

    /// A handle refers to a record that no longer exists in the store.
    #[error("stale {0} handle")]
    BadHandle(&'static str),

    /// I/O error from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
