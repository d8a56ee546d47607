//! # Tributary SQL
//!
//! Planner-facing layer over the `tributary-core` merge engine.
//!
//! This crate provides:
//! - The [`Index`]/[`Cursor`] contract the SQL planner and executor
//!   consume (`row_count`, `cost`, `find`, and the mutation methods a
//!   read-only index rejects)
//! - [`MergeIndex`], the facade that presents pages streamed from
//!   remote source nodes as one ordinary-looking table index
//!
//! The executor opens a cursor with `find(first, last)` and pulls rows;
//! behind it, the facade replays its bounded in-memory cache and
//! switches to the live stream as needed.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]

pub mod index;
pub mod merge_index;

pub use index::{
    ColumnMask, Cursor, Index, IndexColumn, IteratorCursor, SearchRow, COST_ROW_OFFSET,
};
pub use merge_index::MergeIndex;
