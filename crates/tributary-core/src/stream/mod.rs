//! Page buffers and row streams: the cursor variant point.
//!
//! Two variants exist, distinguished by whether the index preserves an
//! ordering:
//!
//! - [`FifoBuffer`] / [`FifoStream`]: pages consumed in arrival order,
//!   rows in on-wire order within a page.
//! - [`SortedBuffer`] / [`MergeStream`]: k-way merge keeping one head
//!   row per source, minimum selected by the index key comparator.
//!
//! The seam is capability composition, not inheritance: intake pushes
//! through [`PageSink`], the facade pulls through [`RowStream`]. Both
//! variants recognize the `last` sentinel (clean termination) and `fail`
//! sentinels (error on the next pull).

mod fifo;
mod sorted;

pub use fifo::{FifoBuffer, FifoStream};
pub use sorted::{MergeStream, SortedBuffer};

use crate::error::MergeError;
use crate::page::ResultPage;
use crate::row::Row;

/// Consumer side of the page buffer, plugged into the intake.
pub trait PageSink: Send + Sync {
    /// Accept a page. Never blocks.
    fn enqueue(&self, page: ResultPage);
}

/// Blocking pull over merged rows.
///
/// `next_row` is the engine's only suspension point: it parks when the
/// buffer is empty and no termination sentinel has arrived. Cancellation
/// is delivered by failing the index from outside, which wakes the
/// waiter and surfaces the error here.
pub trait RowStream: Send {
    /// Next row, `Ok(None)` once the stream has terminated cleanly.
    ///
    /// # Errors
    ///
    /// The error carried by a `fail` sentinel, or a transport error from
    /// requesting the next page.
    fn next_row(&mut self) -> Result<Option<Row>, MergeError>;
}
