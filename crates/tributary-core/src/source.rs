//! Source identity and the per-source remaining-row counter.
//!
//! Each contributing node gets one [`SourceCounter`]: a signed remaining
//! count plus a three-state lifecycle tag. The counter is written by
//! transport threads and read by the executor and the completion check,
//! so both fields are atomic.
//!
//! ## Lifecycle
//!
//! Transitions are monotonic `Uninitialized → Initialized → Finished`.
//! `Initialized` is set exactly once, after the first page's total has
//! been applied and the page enqueued; `Finished` only when `remaining`
//! reached zero and every page from that source is in the buffer. The
//! tag is published with release ordering so an observer that sees
//! `Initialized` also sees the first page in the downstream buffer.
//!
//! `remaining` may transiently go negative when a non-first page
//! overtakes the first page on the wire. That is not an error; the
//! counter recovers once the first page's total arrives.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Unique identifier of a contributing source node.
///
/// Opaque to the engine; the set of active sources is fixed at index
/// construction time by explicit registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// Lifecycle state of a source counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SourceState {
    /// No first page accepted yet; the total row count is unknown.
    Uninitialized = 0,
    /// The first page (carrying the total) has been applied and enqueued.
    Initialized = 1,
    /// `remaining` reached zero and all pages are enqueued.
    Finished = 2,
}

impl SourceState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Uninitialized,
            1 => Self::Initialized,
            _ => Self::Finished,
        }
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initialized => write!(f, "initialized"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Remaining-row counter with an attached lifecycle tag.
#[derive(Debug)]
pub struct SourceCounter {
    remaining: AtomicI64,
    state: AtomicU8,
}

impl SourceCounter {
    /// Fresh counter: zero remaining, `Uninitialized`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            remaining: AtomicI64::new(0),
            state: AtomicU8::new(SourceState::Uninitialized as u8),
        }
    }

    /// Atomically add `delta` and return the new remaining count.
    pub fn add_and_get(&self, delta: i64) -> i64 {
        self.remaining.fetch_add(delta, Ordering::AcqRel) + delta
    }

    /// Current remaining count. May be negative under message reordering.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SourceState {
        SourceState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Publish a new lifecycle state.
    ///
    /// Release ordering: pages enqueued before this store are visible to
    /// any thread that observes the new state.
    pub fn set_state(&self, state: SourceState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Default for SourceCounter {
    fn default() -> Self {
        Self::new()
    }
}
