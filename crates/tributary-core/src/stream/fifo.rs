//! Unsorted variant: pages consumed in arrival order.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::MergeError;
use crate::intake::PageIntake;
use crate::page::ResultPage;
use crate::row::Row;
use crate::stream::{PageSink, RowStream};

/// Single shared queue of pages in delivery order.
///
/// Producers are the transport threads (via intake); the consumer is
/// the one [`FifoStream`] draining it.
#[derive(Debug, Default)]
pub struct FifoBuffer {
    queue: Mutex<VecDeque<ResultPage>>,
    available: Condvar,
}

impl FifoBuffer {
    /// Empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether no pages are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Take the oldest page, parking until one arrives.
    fn take_page(&self) -> ResultPage {
        let mut queue = self.queue.lock();
        loop {
            if let Some(page) = queue.pop_front() {
                return page;
            }
            self.available.wait(&mut queue);
        }
    }
}

impl PageSink for FifoBuffer {
    fn enqueue(&self, page: ResultPage) {
        self.queue.lock().push_back(page);
        self.available.notify_all();
    }
}

/// Row stream over a [`FifoBuffer`].
///
/// Drains one page at a time; taking a data page out of the buffer
/// lazily requests the next page from the same source, so the transport
/// is never asked for more data than is being consumed.
pub struct FifoStream {
    buffer: Arc<FifoBuffer>,
    intake: Arc<PageIntake>,
    current: std::vec::IntoIter<Row>,
    done: bool,
    failed: Option<MergeError>,
}

impl FifoStream {
    /// Stream over `buffer`, demanding pages through `intake`.
    #[must_use]
    pub fn new(buffer: Arc<FifoBuffer>, intake: Arc<PageIntake>) -> Self {
        Self {
            buffer,
            intake,
            current: Vec::new().into_iter(),
            done: false,
            failed: None,
        }
    }
}

impl RowStream for FifoStream {
    fn next_row(&mut self) -> Result<Option<Row>, MergeError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        if self.done {
            return Ok(None);
        }
        loop {
            if let Some(row) = self.current.next() {
                return Ok(Some(row));
            }
            let page = self.buffer.take_page();
            if let Some(err) = page.error() {
                let err = err.clone();
                self.failed = Some(err.clone());
                return Err(err);
            }
            if page.is_last() {
                self.done = true;
                return Ok(None);
            }
            self.intake.request_next_page(&page)?;
            self.current = page.into_rows().into_iter();
        }
    }
}
