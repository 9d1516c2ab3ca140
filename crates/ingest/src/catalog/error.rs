//! Error types for the [`catalog`](super) seam.
//!
//! Uses [`exn`] for automatic location tracking, like every other error in
//! this workspace. Catalog implementations raise these from their own errors.

use derive_more::{Display, Error};

/// A catalog error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The catalog could not be reached or did not answer. The swap did not
    /// happen.
    #[display("catalog unavailable")]
    Unavailable,
    /// The catalog refused the new page records.
    #[display("catalog refused page records: {_0}")]
    Refused(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}
