//! The merge-index facade: the planner-facing face of the engine.
//!
//! A [`MergeIndex`] looks like an ordinary table index to the SQL
//! engine, but its rows arrive as pages streamed from remote sources.
//! `find` transparently decides between three paths:
//!
//! - the cache was discarded → `FetchedTooLarge`;
//! - every expected row has been observed → a cursor over the cache
//!   only;
//! - otherwise → a [`FetchingCursor`] that replays the cached prefix
//!   and then switches to the live stream, caching what it draws.
//!
//! Only the executor thread opens cursors and pulls rows; the transport
//! and liveness threads touch the index through the intake.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use tributary_core::{
    Discovery, FetchCache, FetchedIter, FifoBuffer, FifoStream, KeyComparator, LivenessChecker,
    MergeConfig, MergeError, MergeStream, PageIntake, PageSink, ResultPage, Row, RowStream,
    SortedBuffer, SourceId,
};

use crate::index::{ColumnMask, Cursor, Index, IndexColumn, IteratorCursor, SearchRow};

/// Merge index over pages streamed from remote source nodes.
pub struct MergeIndex {
    name: String,
    columns: Vec<IndexColumn>,
    comparator: KeyComparator,
    intake: Arc<PageIntake>,
    cache: Arc<FetchCache>,
    /// Rows drawn from the live stream so far. Written and read by the
    /// executor thread only; atomic to keep the index `Sync`.
    fetched_count: AtomicI64,
    /// The single live stream behind every fetching cursor. The mutex
    /// is uncontended: cursors are driven by one executor thread.
    stream: Mutex<Box<dyn RowStream>>,
}

impl MergeIndex {
    /// Unsorted index: the cursor yields rows in page arrival order.
    #[must_use]
    pub fn unsorted(
        name: impl Into<String>,
        columns: Vec<IndexColumn>,
        config: &MergeConfig,
    ) -> Self {
        let buffer = Arc::new(FifoBuffer::new());
        let intake = Arc::new(PageIntake::new(
            Arc::clone(&buffer) as Arc<dyn PageSink>
        ));
        let stream: Box<dyn RowStream> =
            Box::new(FifoStream::new(buffer, Arc::clone(&intake)));
        Self::build(name.into(), columns, config, intake, stream)
    }

    /// Sorted index: the cursor k-way merges the per-source streams
    /// under the key order of `columns`.
    #[must_use]
    pub fn sorted(
        name: impl Into<String>,
        columns: Vec<IndexColumn>,
        config: &MergeConfig,
    ) -> Self {
        let buffer = Arc::new(SortedBuffer::new());
        let intake = Arc::new(PageIntake::new(
            Arc::clone(&buffer) as Arc<dyn PageSink>
        ));
        let comparator = comparator_for(&columns);
        let stream: Box<dyn RowStream> = Box::new(MergeStream::new(
            buffer,
            Arc::clone(&intake),
            comparator,
        ));
        Self::build(name.into(), columns, config, intake, stream)
    }

    fn build(
        name: String,
        columns: Vec<IndexColumn>,
        config: &MergeConfig,
        intake: Arc<PageIntake>,
        stream: Box<dyn RowStream>,
    ) -> Self {
        Self {
            name,
            comparator: comparator_for(&columns),
            columns,
            intake,
            cache: Arc::new(FetchCache::new(config.max_fetch_size)),
            fetched_count: AtomicI64::new(0),
            stream: Mutex::new(stream),
        }
    }

    /// Register a contributing source. Exactly once per node, before
    /// any page from that node.
    ///
    /// # Errors
    ///
    /// [`MergeError::InvariantViolation`] on duplicate registration.
    pub fn register_source(&self, source: SourceId) -> Result<(), MergeError> {
        self.intake.register_source(source)
    }

    /// Admit an inbound page. See [`PageIntake::add_page`].
    ///
    /// # Errors
    ///
    /// [`MergeError::InvariantViolation`] for pages that break the
    /// intake contract.
    pub fn add_page(&self, page: ResultPage) -> Result<(), MergeError> {
        self.intake.add_page(page)
    }

    /// Fail the whole stream (external cancellation, transport error).
    pub fn fail(&self, error: MergeError) {
        self.intake.fail(error);
    }

    /// Fail a single source.
    pub fn fail_source(&self, source: SourceId) {
        self.intake.fail_source(source);
    }

    /// Run one liveness sweep against the discovery collaborator.
    pub fn check_source_nodes_alive(&self, discovery: &dyn Discovery) {
        self.intake.check_source_nodes_alive(discovery);
    }

    /// Spawn the background liveness checker for this index.
    #[must_use]
    pub fn spawn_liveness_checker(
        &self,
        discovery: Arc<dyn Discovery>,
        interval: Duration,
    ) -> LivenessChecker {
        LivenessChecker::spawn(Arc::clone(&self.intake), discovery, interval)
    }

    /// The intake, for transports that deliver pages directly.
    #[must_use]
    pub fn intake(&self) -> Arc<PageIntake> {
        Arc::clone(&self.intake)
    }

    /// Whether every expected row has been drawn from the stream (and
    /// is therefore replayable from the cache, unless it overflowed).
    #[must_use]
    pub fn fetched_all(&self) -> bool {
        self.fetched_count.load(Ordering::Relaxed) == self.intake.expected_rows()
    }
}

fn comparator_for(columns: &[IndexColumn]) -> KeyComparator {
    KeyComparator::new(columns.iter().map(IndexColumn::key).collect())
}

impl Index for MergeIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn columns(&self) -> &[IndexColumn] {
        &self.columns
    }

    fn row_count(&self) -> i64 {
        self.intake.expected_rows()
    }

    fn cost(&self, _masks: &[ColumnMask], _sort_columns: Option<&[IndexColumn]>) -> f64 {
        // Flat scan cost: the planner should treat the merge index as a
        // scan regardless of conditions or requested order.
        #[allow(clippy::cast_precision_loss)]
        let rows = self.row_count() as f64;
        rows + crate::index::COST_ROW_OFFSET
    }

    fn find(
        &self,
        first: Option<&SearchRow>,
        last: Option<&SearchRow>,
    ) -> Result<Box<dyn Cursor + '_>, MergeError> {
        if self.cache.is_discarded() {
            return Err(MergeError::FetchedTooLarge {
                max: self.cache.max_size(),
            });
        }
        let bounds = Bounds {
            comparator: self.comparator.clone(),
            first: first.cloned(),
            last: last.cloned(),
        };
        if self.fetched_all() {
            tracing::debug!(index = %self.name, "serving lookup from fetched cache");
            return Ok(Box::new(RangeCursor {
                inner: IteratorCursor::new(self.cache.iter()),
                bounds,
            }));
        }
        tracing::debug!(index = %self.name, "serving lookup from live stream");
        Ok(Box::new(RangeCursor {
            inner: FetchingCursor::new(self),
            bounds,
        }))
    }

    fn find_first_or_last(&self, _first: bool) -> Result<Box<dyn Cursor + '_>, MergeError> {
        Err(MergeError::OperationUnsupported("find first or last"))
    }

    fn add_row(&self, _row: Row) -> Result<(), MergeError> {
        Err(MergeError::OperationUnsupported("add"))
    }

    fn remove_row(&self, _row: &Row) -> Result<(), MergeError> {
        Err(MergeError::OperationUnsupported("remove row"))
    }

    fn truncate(&self) -> Result<(), MergeError> {
        Err(MergeError::OperationUnsupported("truncate"))
    }

    fn check_rename(&self) -> Result<(), MergeError> {
        Err(MergeError::OperationUnsupported("rename"))
    }

    fn close(&self) {
        // Resources are owned by the transport; nothing to release.
    }
}

/// Inclusive key-range filter around an inner cursor.
struct RangeCursor<C> {
    inner: C,
    bounds: Bounds,
}

struct Bounds {
    comparator: KeyComparator,
    first: Option<Row>,
    last: Option<Row>,
}

impl Bounds {
    fn contains(&self, row: &Row) -> bool {
        if let Some(first) = &self.first {
            if self.comparator.compare(row, first) == std::cmp::Ordering::Less {
                return false;
            }
        }
        if let Some(last) = &self.last {
            if self.comparator.compare(row, last) == std::cmp::Ordering::Greater {
                return false;
            }
        }
        true
    }
}

impl<C: Cursor> Cursor for RangeCursor<C> {
    fn next(&mut self) -> Result<bool, MergeError> {
        loop {
            if !self.inner.next()? {
                return Ok(false);
            }
            match self.inner.get() {
                Some(row) if self.bounds.contains(row) => return Ok(true),
                _ => {}
            }
        }
    }

    fn get(&self) -> Option<&Row> {
        self.inner.get()
    }
}

/// Cursor that replays the cached prefix, then draws from the live
/// stream.
///
/// The switch from cache to stream happens at most once and is never
/// reversed. Each stream row is appended to the cache at the moment it
/// is first drawn, so replay and stream can never emit a duplicate or
/// leave a gap.
struct FetchingCursor<'a> {
    index: &'a MergeIndex,
    cache_iter: FetchedIter,
    streaming: bool,
    current: Option<Row>,
}

impl<'a> FetchingCursor<'a> {
    fn new(index: &'a MergeIndex) -> Self {
        Self {
            index,
            cache_iter: index.cache.iter(),
            streaming: false,
            current: None,
        }
    }
}

impl Cursor for FetchingCursor<'_> {
    fn next(&mut self) -> Result<bool, MergeError> {
        if !self.streaming {
            if let Some(row) = self.cache_iter.next() {
                self.current = Some(row);
                return Ok(true);
            }
            // Cached rows exhausted (or the cache was discarded while
            // we replayed): switch to the stream, once.
            self.streaming = true;
        }
        match self.index.stream.lock().next_row()? {
            Some(row) => {
                self.index.cache.append(row.clone());
                self.index.fetched_count.fetch_add(1, Ordering::Relaxed);
                self.current = Some(row);
                Ok(true)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    fn get(&self) -> Option<&Row> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributary_core::Value;

    fn row(v: i64) -> Row {
        Row::new(vec![Value::Int64(v)])
    }

    fn rows(vals: &[i64]) -> Vec<Row> {
        vals.iter().map(|&v| row(v)).collect()
    }

    fn index() -> MergeIndex {
        MergeIndex::unsorted(
            "merge_scan",
            vec![IndexColumn::new("k", 0)],
            &MergeConfig::default(),
        )
    }

    #[test]
    fn test_row_count_tracks_expected() {
        let idx = index();
        idx.register_source(SourceId(1)).unwrap();
        assert_eq!(idx.row_count(), 0);
        idx.add_page(ResultPage::first(SourceId(1), rows(&[1, 2]), 6, None))
            .unwrap();
        assert_eq!(idx.row_count(), 6);
    }

    #[test]
    fn test_cost_is_flat() {
        let idx = index();
        idx.register_source(SourceId(1)).unwrap();
        idx.add_page(ResultPage::first(SourceId(1), rows(&[1]), 1, None))
            .unwrap();
        let cost = idx.cost(&[], None);
        assert!((cost - 1001.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_mutations_unsupported() {
        let idx = index();
        assert!(matches!(
            idx.add_row(row(1)),
            Err(MergeError::OperationUnsupported("add"))
        ));
        assert!(matches!(
            idx.remove_row(&row(1)),
            Err(MergeError::OperationUnsupported("remove row"))
        ));
        assert!(matches!(
            idx.truncate(),
            Err(MergeError::OperationUnsupported("truncate"))
        ));
        assert!(matches!(
            idx.check_rename(),
            Err(MergeError::OperationUnsupported("rename"))
        ));
        assert!(!idx.can_get_first_or_last());
        assert!(idx.find_first_or_last(true).is_err());
    }

    #[test]
    fn test_contract_defaults() {
        let idx = index();
        assert!(!idx.need_rebuild());
        assert_eq!(idx.disk_space_used(), 0);
        idx.close();
    }

    #[test]
    fn test_find_after_discard_fails() {
        let idx = MergeIndex::unsorted(
            "merge_scan",
            vec![IndexColumn::new("k", 0)],
            &MergeConfig::with_max_fetch_size(2),
        );
        idx.register_source(SourceId(1)).unwrap();
        idx.add_page(ResultPage::first(SourceId(1), rows(&[1, 2, 3, 4]), 4, None))
            .unwrap();

        {
            let mut cursor = idx.find(None, None).unwrap();
            while cursor.next().unwrap() {}
        }
        assert!(matches!(
            idx.find(None, None),
            Err(MergeError::FetchedTooLarge { max: 2 })
        ));
    }

    #[test]
    fn test_range_bounds_inclusive() {
        let idx = index();
        idx.register_source(SourceId(1)).unwrap();
        idx.add_page(ResultPage::first(
            SourceId(1),
            rows(&[1, 2, 3, 4, 5]),
            5,
            None,
        ))
        .unwrap();

        let mut cursor = idx.find(Some(&row(2)), Some(&row(4))).unwrap();
        let mut seen = Vec::new();
        while cursor.next().unwrap() {
            seen.push(cursor.get().unwrap().clone());
        }
        assert_eq!(seen, rows(&[2, 3, 4]));
    }

    #[test]
    fn test_sorted_index_merges_sources() {
        let idx = MergeIndex::sorted(
            "merge_sorted",
            vec![IndexColumn::new("k", 0)],
            &MergeConfig::default(),
        );
        idx.register_source(SourceId(1)).unwrap();
        idx.register_source(SourceId(2)).unwrap();

        idx.add_page(ResultPage::first(SourceId(1), rows(&[1, 4]), 2, None))
            .unwrap();
        idx.add_page(ResultPage::first(SourceId(2), rows(&[2, 3]), 2, None))
            .unwrap();

        let mut cursor = idx.find(None, None).unwrap();
        let mut seen = Vec::new();
        while cursor.next().unwrap() {
            seen.push(cursor.get().unwrap().clone());
        }
        assert_eq!(seen, rows(&[1, 2, 3, 4]));
    }
}
