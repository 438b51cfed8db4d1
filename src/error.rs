//! Error types for packed-dtree.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building, loading or searching a packed tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An address, field index, value or count lies outside its declared bounds.
    #[error("{what} out of range: {value} (must be < {bound})")]
    OutOfRange {
        what: &'static str,
        value: u64,
        bound: u64,
    },

    /// A requested bit width does not fit the fixed register / word storage.
    #[error("unsupported width for {what}: {requested} bits (max {max})")]
    UnsupportedWidth {
        what: &'static str,
        requested: u32,
        max: u32,
    },

    /// The co-processor did not deliver a batch result in time.
    #[error("co-processor did not complete within {timeout:?}")]
    CoProcessorTimeout { timeout: Duration },

    /// The co-processor worker is gone; no further batches can be served.
    #[error("co-processor disconnected")]
    CoProcessorDisconnected,

    /// The co-processor returned a different number of results than submitted.
    #[error("co-processor returned {actual} results for {expected} records")]
    ResultLengthMismatch { expected: usize, actual: usize },

    /// A load was attempted while a batch holds the tree.
    #[error("tree is in use by an in-flight batch")]
    TreeBusy,
}

impl Error {
    pub(crate) fn out_of_range(what: &'static str, value: impl Into<u64>, bound: impl Into<u64>) -> Self {
        Error::OutOfRange {
            what,
            value: value.into(),
            bound: bound.into(),
        }
    }

    /// Whether the caller may reasonably retry the failed operation.
    ///
    /// Only co-processor timeouts qualify; bounds and width errors are
    /// programmer errors and will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CoProcessorTimeout { .. })
    }
}
