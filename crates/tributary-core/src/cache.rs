//! Bounded append-only cache of rows already drawn from the stream.
//!
//! The cache lets a later `find()` replay rows the executor has already
//! consumed. It is append-only and capped: growing past the cap discards
//! the whole sequence at once, and the discard is sticky: the cache
//! never becomes a sequence again within the same index. Lookups that
//! would need the discarded rows fail with `FetchedTooLarge` at the
//! facade.
//!
//! ## Iterator stability
//!
//! [`FetchedIter`] is an index-based cursor: each `next()` re-checks the
//! current length, so iteration tolerates appends without invalidation,
//! skips, or repeats. Every element whose index is below the length at
//! the time of that `next()` call is returned.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::row::Row;

/// Append-only, discardable row cache.
#[derive(Debug)]
pub struct FetchCache {
    rows: Mutex<Option<Vec<Row>>>,
    max_size: usize,
}

impl FetchCache {
    /// Empty cache with the given cap.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            rows: Mutex::new(Some(Vec::new())),
            max_size,
        }
    }

    /// The configured cap.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Append a row, unless the cache is already full, in which case the
    /// whole sequence is discarded instead, and stays discarded.
    pub fn append(&self, row: Row) {
        let mut guard = self.rows.lock();
        if let Some(rows) = guard.as_mut() {
            if rows.len() == self.max_size {
                *guard = None;
            } else {
                rows.push(row);
            }
        }
    }

    /// Whether the cache has been discarded.
    #[must_use]
    pub fn is_discarded(&self) -> bool {
        self.rows.lock().is_none()
    }

    /// Number of cached rows, or `None` once discarded.
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        self.rows.lock().as_ref().map(Vec::len)
    }

    /// Whether the cache holds no rows (a discarded cache is empty).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len().unwrap_or(0) == 0
    }

    /// Row at `idx`, or `None` if out of range or discarded.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<Row> {
        self.rows.lock().as_ref().and_then(|rows| rows.get(idx).cloned())
    }

    /// Stable forward iterator from the first cached row.
    #[must_use]
    pub fn iter(self: &Arc<Self>) -> FetchedIter {
        FetchedIter {
            cache: Arc::clone(self),
            idx: 0,
        }
    }
}

/// Index-based cursor over [`FetchCache`].
///
/// Ends (returns `None`) when the index catches up with the current
/// length or the cache has been discarded.
#[derive(Debug)]
pub struct FetchedIter {
    cache: Arc<FetchCache>,
    idx: usize,
}

impl Iterator for FetchedIter {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        let row = self.cache.get(self.idx)?;
        self.idx += 1;
        Some(row)
    }
}
