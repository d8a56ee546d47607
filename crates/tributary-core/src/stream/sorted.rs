//! Sorted variant: k-way merge of per-source streams.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::error::MergeError;
use crate::intake::PageIntake;
use crate::page::ResultPage;
use crate::row::{KeyComparator, Row};
use crate::source::SourceId;
use crate::stream::{PageSink, RowStream};

#[derive(Debug, Default)]
struct SortedInner {
    queues: FxHashMap<SourceId, std::collections::VecDeque<ResultPage>>,
    failed: Option<MergeError>,
    done: bool,
}

/// Per-source page queues under one lock.
///
/// Data pages queue up under their source. A `fail` sentinel from any
/// source moves the whole buffer into a failed state and wakes every
/// waiter, so a consumer blocked on a healthy source still observes the
/// failure. The single `last` sentinel marks the buffer done; a source
/// is exhausted once the buffer is done and its queue is drained.
#[derive(Debug, Default)]
pub struct SortedBuffer {
    inner: Mutex<SortedInner>,
    available: Condvar,
}

impl SortedBuffer {
    /// Empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The failure injected into this buffer, if any.
    #[must_use]
    pub fn failure(&self) -> Option<MergeError> {
        self.inner.lock().failed.clone()
    }

    /// Take the oldest page queued for `source`.
    ///
    /// Parks until a page arrives, the buffer fails, or the terminal
    /// sentinel marks the source exhausted (`Ok(None)`).
    fn take_page_for(&self, source: SourceId) -> Result<Option<ResultPage>, MergeError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(err) = &inner.failed {
                return Err(err.clone());
            }
            if let Some(page) = inner
                .queues
                .get_mut(&source)
                .and_then(std::collections::VecDeque::pop_front)
            {
                return Ok(Some(page));
            }
            if inner.done {
                return Ok(None);
            }
            self.available.wait(&mut inner);
        }
    }
}

impl PageSink for SortedBuffer {
    fn enqueue(&self, page: ResultPage) {
        let mut inner = self.inner.lock();
        if let Some(err) = page.error() {
            // First failure wins; later ones change nothing.
            if inner.failed.is_none() {
                inner.failed = Some(err.clone());
            }
        } else if page.is_last() {
            inner.done = true;
        } else {
            inner.queues.entry(page.source()).or_default().push_back(page);
        }
        self.available.notify_all();
    }
}

struct SourceHead {
    source: SourceId,
    row: Row,
}

/// K-way merged row stream over a [`SortedBuffer`].
///
/// Keeps one head row per source and yields the minimum under the index
/// key comparator. Ties fall back to source-id order, which keeps the
/// output deterministic across runs.
pub struct MergeStream {
    buffer: Arc<SortedBuffer>,
    intake: Arc<PageIntake>,
    comparator: KeyComparator,
    tails: FxHashMap<SourceId, std::vec::IntoIter<Row>>,
    heads: Vec<SourceHead>,
    started: bool,
}

impl MergeStream {
    /// Stream over `buffer`, merging under `comparator`.
    ///
    /// The per-source streams are established lazily on the first pull,
    /// from the sources registered with `intake` by then. Sources are
    /// fixed before pages flow, so the first pull always sees the full
    /// set.
    #[must_use]
    pub fn new(
        buffer: Arc<SortedBuffer>,
        intake: Arc<PageIntake>,
        comparator: KeyComparator,
    ) -> Self {
        Self {
            buffer,
            intake,
            comparator,
            tails: FxHashMap::default(),
            heads: Vec::new(),
            started: false,
        }
    }

    /// Next row from a single source's stream, in its delivery order.
    fn pull(&mut self, source: SourceId) -> Result<Option<Row>, MergeError> {
        loop {
            if let Some(tail) = self.tails.get_mut(&source) {
                if let Some(row) = tail.next() {
                    return Ok(Some(row));
                }
            }
            match self.buffer.take_page_for(source)? {
                Some(page) => {
                    self.intake.request_next_page(&page)?;
                    self.tails.insert(source, page.into_rows().into_iter());
                }
                None => return Ok(None),
            }
        }
    }
}

impl RowStream for MergeStream {
    fn next_row(&mut self) -> Result<Option<Row>, MergeError> {
        if let Some(err) = self.buffer.failure() {
            return Err(err);
        }
        if !self.started {
            self.started = true;
            let mut sources = self.intake.sources();
            sources.sort_unstable();
            for source in sources {
                if let Some(row) = self.pull(source)? {
                    self.heads.push(SourceHead { source, row });
                }
            }
        }
        if self.heads.is_empty() {
            return Ok(None);
        }
        // Linear scan for the minimum head; source counts are small.
        let mut min = 0;
        for i in 1..self.heads.len() {
            let ord = self
                .comparator
                .compare(&self.heads[i].row, &self.heads[min].row)
                .then_with(|| self.heads[i].source.cmp(&self.heads[min].source));
            if ord == Ordering::Less {
                min = i;
            }
        }
        let head = self.heads.swap_remove(min);
        if let Some(row) = self.pull(head.source)? {
            self.heads.push(SourceHead {
                source: head.source,
                row,
            });
        }
        Ok(Some(head.row))
    }
}
