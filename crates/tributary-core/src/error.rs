//! Error types for the merge-index engine.

use crate::source::SourceId;

/// Errors surfaced by the merge index and its cursors.
///
/// Partial failure of a single source fails the whole index: the cursor
/// cannot produce a consistent rowset once any contributor is lost. No
/// retries are attempted at this layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MergeError {
    /// A source node reported an error or died. Surfaced by the cursor
    /// on its next pull.
    #[error("source {source_id} failed: {reason}")]
    SourceFailure {
        /// The contributing node that was lost.
        source_id: SourceId,
        /// Why it was lost (remote error text, "node left cluster", ...).
        reason: String,
    },

    /// The fetch cache exceeded its cap and a later lookup needed the
    /// cached data it no longer has. Raised by `find()`.
    #[error("fetched result set was too large (cap {max} rows)")]
    FetchedTooLarge {
        /// The configured cache cap.
        max: usize,
    },

    /// A mutation or non-scan operation was requested on the index.
    #[error("merge index does not support {0}")]
    OperationUnsupported(&'static str),

    /// Duplicate first page, unregistered source, duplicate registration.
    /// A programming error in the transport layer; fail fast.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl MergeError {
    /// Failure of a specific source with the given reason.
    #[must_use]
    pub fn source_failure(source: SourceId, reason: impl Into<String>) -> Self {
        Self::SourceFailure {
            source_id: source,
            reason: reason.into(),
        }
    }
}
