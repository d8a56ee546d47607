//! # Tributary Core
//!
//! Streaming merge-index engine: the reducer side of a two-step
//! distributed SQL query.
//!
//! Remote source nodes stream partial result pages to the reducer; this
//! crate stitches them into a single logical rowset. The moving parts:
//!
//! - [`PageIntake`] admits pages, tracks per-source completion through
//!   [`SourceCounter`]s, and terminates the stream with exactly one
//!   synthetic `last` page.
//! - [`FifoBuffer`]/[`FifoStream`] and [`SortedBuffer`]/[`MergeStream`]
//!   are the two cursor variants (arrival order vs k-way merge).
//! - [`FetchCache`] keeps already-consumed rows for replay, up to a
//!   hard in-memory cap.
//! - [`Discovery`] is the seam to the cluster membership service; a
//!   dead contributor fails the whole stream.
//!
//! The planner-facing index/cursor contract lives in `tributary-sql`,
//! which drives this engine.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]

pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod intake;
pub mod page;
pub mod row;
pub mod source;
pub mod stream;

pub use cache::{FetchCache, FetchedIter};
pub use config::{MergeConfig, DEFAULT_MAX_FETCH_SIZE, MAX_FETCH_SIZE_ENV};
pub use discovery::{Discovery, LivenessChecker, StaticDiscovery};
pub use error::MergeError;
pub use intake::PageIntake;
pub use page::{PageFetch, ResultPage};
pub use row::{KeyColumn, KeyComparator, Row, Value};
pub use source::{SourceCounter, SourceId, SourceState};
pub use stream::{FifoBuffer, FifoStream, MergeStream, PageSink, RowStream, SortedBuffer};
