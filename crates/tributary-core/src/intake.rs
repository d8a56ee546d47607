//! Page intake: admission, counter accounting, completion detection.
//!
//! [`PageIntake`] is the write side of the merge index. Transport
//! threads push pages in; the intake updates the per-source counters,
//! forwards row-bearing pages to the downstream [`PageSink`], and emits
//! exactly one terminal sentinel once every source has delivered all of
//! its rows.
//!
//! ## Race handling
//!
//! Pages from one source may be reordered in flight, so a non-first
//! page can arrive before the first page that carries the source's
//! total. The counter then goes negative, which is fine; completion is
//! never declared while a counter is still `Uninitialized`. A first
//! page is enqueued *before* its counter flips to `Initialized`, so any
//! thread that observes the flip also observes the page. The terminal
//! sentinel is guarded by a CAS rather than by "was mine the last
//! counter to flip": two counters can reach zero simultaneously.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crate::discovery::Discovery;
use crate::error::MergeError;
use crate::page::ResultPage;
use crate::source::{SourceCounter, SourceId, SourceState};
use crate::stream::PageSink;

/// Streaming aggregator over pages from a fixed set of sources.
pub struct PageIntake {
    /// Counter per registered source. Keys are fixed once pages start
    /// flowing; values are shared with completion checks.
    sources: papaya::HashMap<SourceId, Arc<SourceCounter>>,
    /// Sum of `all_rows` over every source whose first page has been
    /// applied. Monotonic non-decreasing.
    expected_rows: AtomicI64,
    /// One-shot guard for the terminal sentinel.
    last_emitted: AtomicBool,
    /// Downstream buffer of the cursor variant in use.
    sink: Arc<dyn PageSink>,
}

impl PageIntake {
    /// Intake feeding the given page buffer.
    #[must_use]
    pub fn new(sink: Arc<dyn PageSink>) -> Self {
        Self {
            sources: papaya::HashMap::new(),
            expected_rows: AtomicI64::new(0),
            last_emitted: AtomicBool::new(false),
            sink,
        }
    }

    /// Register a contributing source. Exactly once per node, before
    /// any page from that node.
    ///
    /// # Errors
    ///
    /// [`MergeError::InvariantViolation`] on duplicate registration.
    pub fn register_source(&self, source: SourceId) -> Result<(), MergeError> {
        let guard = self.sources.guard();
        if self
            .sources
            .insert(source, Arc::new(SourceCounter::new()), &guard)
            .is_some()
        {
            return Err(MergeError::InvariantViolation(format!(
                "source {source} already registered"
            )));
        }
        tracing::debug!(source = %source, "source registered");
        Ok(())
    }

    /// Registered source ids.
    #[must_use]
    pub fn sources(&self) -> Vec<SourceId> {
        let guard = self.sources.guard();
        self.sources.iter(&guard).map(|(s, _)| *s).collect()
    }

    /// Whether this index still needs data from the given source.
    #[must_use]
    pub fn has_source(&self, source: SourceId) -> bool {
        let guard = self.sources.guard();
        self.sources.contains_key(&source, &guard)
    }

    /// Total rows expected across all sources, as currently known.
    #[must_use]
    pub fn expected_rows(&self) -> i64 {
        self.expected_rows.load(Ordering::Acquire)
    }

    /// Admit an inbound page.
    ///
    /// Row-bearing pages update the source's counter and flow to the
    /// buffer; sentinel pages bypass accounting and go straight through.
    /// When the page's source reaches zero remaining with an initialized
    /// counter, the source is finished, and when every source is
    /// finished the single terminal sentinel is enqueued.
    ///
    /// # Errors
    ///
    /// [`MergeError::InvariantViolation`] for a page from an
    /// unregistered source or a duplicate first page.
    pub fn add_page(&self, page: ResultPage) -> Result<(), MergeError> {
        if page.is_fail() || page.is_last() {
            self.sink.enqueue(page);
            return Ok(());
        }

        let source = page.source();
        let counter = {
            let guard = self.sources.guard();
            self.sources
                .get(&source, &guard)
                .map(Arc::clone)
                .ok_or_else(|| {
                    MergeError::InvariantViolation(format!(
                        "page from unregistered source {source}"
                    ))
                })?
        };

        #[allow(clippy::cast_possible_wrap)]
        let rows_in_page = page.rows_in_page() as i64;

        let remaining = if let Some(all_rows) = page.all_rows() {
            // Only the first page carries the total and may initialize
            // the counter.
            if counter.state() != SourceState::Uninitialized {
                return Err(MergeError::InvariantViolation(format!(
                    "duplicate first page from source {source}"
                )));
            }
            let remaining = counter.add_and_get(all_rows - rows_in_page);
            self.expected_rows.fetch_add(all_rows, Ordering::AcqRel);
            tracing::debug!(
                source = %source,
                all_rows,
                rows = rows_in_page,
                "first page admitted"
            );
            // Enqueue before flipping the state: an observer that sees
            // Initialized must also see the page. This also covers the
            // source whose only page finishes it within this same call.
            if rows_in_page > 0 {
                self.sink.enqueue(page);
            }
            counter.set_state(SourceState::Initialized);
            remaining
        } else {
            let remaining = counter.add_and_get(-rows_in_page);
            tracing::trace!(source = %source, rows = rows_in_page, remaining, "page admitted");
            if rows_in_page > 0 {
                self.sink.enqueue(page);
            }
            remaining
        };

        if remaining == 0 {
            // Negative happens under message reordering and just means
            // the first page is still in flight.
            if counter.state() == SourceState::Uninitialized {
                return Ok(());
            }
            // Zero remaining and all pages enqueued: the source is done.
            counter.set_state(SourceState::Finished);

            let guard = self.sources.guard();
            for (_, c) in self.sources.iter(&guard) {
                if c.state() != SourceState::Finished {
                    return Ok(());
                }
            }
            if self
                .last_emitted
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                tracing::debug!(
                    expected_rows = self.expected_rows(),
                    "all sources finished, emitting terminal page"
                );
                self.sink.enqueue(ResultPage::last(source));
            }
        }
        Ok(())
    }

    /// Fail the whole stream: every registered source gets a failure
    /// sentinel carrying `error`, which unblocks any waiting cursor.
    pub fn fail(&self, error: MergeError) {
        tracing::warn!(error = %error, "failing merge stream");
        let guard = self.sources.guard();
        for (source, _) in self.sources.iter(&guard) {
            self.sink.enqueue(ResultPage::fail(*source, error.clone()));
        }
    }

    /// Fail a single source; the consumer treats it as a hard stop for
    /// the whole stream.
    pub fn fail_source(&self, source: SourceId) {
        tracing::warn!(source = %source, "failing source");
        self.sink.enqueue(ResultPage::fail(
            source,
            MergeError::source_failure(source, "node left the cluster"),
        ));
    }

    /// Liveness sweep: fail on the first registered source the
    /// discovery collaborator reports dead.
    pub fn check_source_nodes_alive(&self, discovery: &dyn Discovery) {
        for source in self.sources() {
            if !discovery.is_alive(source) {
                self.fail_source(source);
                return;
            }
        }
    }

    /// Ask the transport for the next page from `page`'s source, but
    /// only if that source still has rows outstanding.
    ///
    /// The counter is compared against zero with `!= 0`, not `> 0`: a
    /// negative count means messages were reordered and data is still
    /// pending, so the demand must go out.
    ///
    /// # Errors
    ///
    /// [`MergeError::InvariantViolation`] if the page's source was never
    /// registered; otherwise whatever the page's transport thunk
    /// returns.
    pub fn request_next_page(&self, page: &ResultPage) -> Result<(), MergeError> {
        let source = page.source();
        let remaining = {
            let guard = self.sources.guard();
            self.sources
                .get(&source, &guard)
                .map(|c| c.get())
                .ok_or_else(|| {
                    MergeError::InvariantViolation(format!(
                        "page from unregistered source {source}"
                    ))
                })?
        };
        if remaining != 0 {
            page.fetch_next_page()
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDiscovery;
    use crate::row::{Row, Value};
    use parking_lot::Mutex;

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row::new(vec![Value::Int64(i as i64)]))
            .collect()
    }

    /// Sink that records everything it is handed.
    #[derive(Default)]
    struct RecordingSink {
        pages: Mutex<Vec<ResultPage>>,
    }

    impl RecordingSink {
        fn last_count(&self) -> usize {
            self.pages.lock().iter().filter(|p| p.is_last()).count()
        }

        fn fail_count(&self) -> usize {
            self.pages.lock().iter().filter(|p| p.is_fail()).count()
        }

        fn data_rows(&self) -> usize {
            self.pages
                .lock()
                .iter()
                .filter(|p| !p.is_fail() && !p.is_last())
                .map(ResultPage::rows_in_page)
                .sum()
        }
    }

    impl PageSink for RecordingSink {
        fn enqueue(&self, page: ResultPage) {
            self.pages.lock().push(page);
        }
    }

    fn intake() -> (Arc<RecordingSink>, PageIntake) {
        let sink = Arc::new(RecordingSink::default());
        let intake = PageIntake::new(Arc::clone(&sink) as Arc<dyn PageSink>);
        (sink, intake)
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let (_sink, intake) = intake();
        intake.register_source(SourceId(1)).unwrap();
        assert!(matches!(
            intake.register_source(SourceId(1)),
            Err(MergeError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_unregistered_source_rejected() {
        let (_sink, intake) = intake();
        let page = ResultPage::first(SourceId(9), rows(1), 1, None);
        assert!(matches!(
            intake.add_page(page),
            Err(MergeError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_duplicate_first_page_rejected() {
        let (_sink, intake) = intake();
        intake.register_source(SourceId(1)).unwrap();
        intake
            .add_page(ResultPage::first(SourceId(1), rows(1), 5, None))
            .unwrap();
        assert!(matches!(
            intake.add_page(ResultPage::first(SourceId(1), rows(1), 5, None)),
            Err(MergeError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_reordered_pages_recover() {
        let (sink, intake) = intake();
        intake.register_source(SourceId(1)).unwrap();
        intake.register_source(SourceId(2)).unwrap();

        // Second page overtakes the first: counter dips negative and no
        // completion can be declared yet.
        intake
            .add_page(ResultPage::data(SourceId(1), rows(3), None))
            .unwrap();
        {
            let guard = intake.sources.guard();
            let c = intake.sources.get(&SourceId(1), &guard).unwrap();
            assert_eq!(c.get(), -3);
            assert_eq!(c.state(), SourceState::Uninitialized);
        }
        assert_eq!(sink.last_count(), 0);

        // First page arrives late; the source finishes in this call.
        intake
            .add_page(ResultPage::first(SourceId(1), rows(2), 5, None))
            .unwrap();
        {
            let guard = intake.sources.guard();
            let c = intake.sources.get(&SourceId(1), &guard).unwrap();
            assert_eq!(c.get(), 0);
            assert_eq!(c.state(), SourceState::Finished);
        }
        assert_eq!(intake.expected_rows(), 5);
        // Source 2 still pending: no terminal sentinel yet.
        assert_eq!(sink.last_count(), 0);

        intake
            .add_page(ResultPage::first(SourceId(2), rows(0), 0, None))
            .unwrap();
        assert_eq!(sink.last_count(), 1);
        assert_eq!(sink.data_rows(), 5);
    }

    #[test]
    fn test_single_page_source_finishes_in_one_call() {
        let (sink, intake) = intake();
        intake.register_source(SourceId(1)).unwrap();

        intake
            .add_page(ResultPage::first(SourceId(1), rows(4), 4, None))
            .unwrap();

        let guard = intake.sources.guard();
        let c = intake.sources.get(&SourceId(1), &guard).unwrap();
        assert_eq!(c.state(), SourceState::Finished);
        assert_eq!(sink.last_count(), 1);
        // The data page was enqueued before the terminal sentinel.
        let pages = sink.pages.lock();
        assert_eq!(pages[0].rows_in_page(), 4);
        assert!(pages[1].is_last());
    }

    #[test]
    fn test_idle_drain_emits_single_last() {
        let (sink, intake) = intake();
        intake.register_source(SourceId(1)).unwrap();
        intake.register_source(SourceId(2)).unwrap();

        intake
            .add_page(ResultPage::first(SourceId(1), rows(0), 0, None))
            .unwrap();
        assert_eq!(sink.last_count(), 0);
        intake
            .add_page(ResultPage::first(SourceId(2), rows(0), 0, None))
            .unwrap();

        assert_eq!(sink.last_count(), 1);
        assert_eq!(sink.data_rows(), 0);
        assert_eq!(intake.expected_rows(), 0);
    }

    #[test]
    fn test_expected_rows_accumulates() {
        let (_sink, intake) = intake();
        intake.register_source(SourceId(1)).unwrap();
        intake.register_source(SourceId(2)).unwrap();

        intake
            .add_page(ResultPage::first(SourceId(1), rows(2), 10, None))
            .unwrap();
        assert_eq!(intake.expected_rows(), 10);
        intake
            .add_page(ResultPage::first(SourceId(2), rows(2), 7, None))
            .unwrap();
        assert_eq!(intake.expected_rows(), 17);
    }

    #[test]
    fn test_fail_enqueues_one_sentinel_per_source() {
        let (sink, intake) = intake();
        intake.register_source(SourceId(1)).unwrap();
        intake.register_source(SourceId(2)).unwrap();
        intake.register_source(SourceId(3)).unwrap();

        intake.fail(MergeError::source_failure(SourceId(1), "cancelled"));
        assert_eq!(sink.fail_count(), 3);
    }

    #[test]
    fn test_liveness_sweep_fails_first_dead_source() {
        let (sink, intake) = intake();
        intake.register_source(SourceId(1)).unwrap();
        intake.register_source(SourceId(2)).unwrap();

        let discovery = StaticDiscovery::with_sources([SourceId(1), SourceId(2)]);
        intake.check_source_nodes_alive(&discovery);
        assert_eq!(sink.fail_count(), 0);

        discovery.mark_dead(SourceId(2));
        intake.check_source_nodes_alive(&discovery);
        assert_eq!(sink.fail_count(), 1);
        let pages = sink.pages.lock();
        assert_eq!(pages[0].source(), SourceId(2));
    }

    #[test]
    fn test_next_page_demand_respects_counter() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (_sink, intake) = intake();
        intake.register_source(SourceId(1)).unwrap();

        let fetches = Arc::new(AtomicUsize::new(0));
        let thunk = |seen: Arc<AtomicUsize>| -> crate::page::PageFetch {
            Box::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };

        // 5 total, 2 delivered: remaining 3, demand goes out.
        intake
            .add_page(ResultPage::first(
                SourceId(1),
                rows(2),
                5,
                Some(thunk(Arc::clone(&fetches))),
            ))
            .unwrap();
        let page = ResultPage::data(SourceId(1), rows(0), Some(thunk(Arc::clone(&fetches))));
        intake.request_next_page(&page).unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // Drain the remaining 3: counter hits zero, demand suppressed.
        intake
            .add_page(ResultPage::data(SourceId(1), rows(3), None))
            .unwrap();
        let page = ResultPage::data(SourceId(1), rows(0), Some(thunk(Arc::clone(&fetches))));
        intake.request_next_page(&page).unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_negative_counter_still_demands_next_page() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (_sink, intake) = intake();
        intake.register_source(SourceId(1)).unwrap();

        // Non-first page before the first page: counter is -2, which
        // still means "pending".
        intake
            .add_page(ResultPage::data(SourceId(1), rows(2), None))
            .unwrap();

        let fetches = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&fetches);
        let page = ResultPage::data(
            SourceId(1),
            rows(0),
            Some(Box::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );
        intake.request_next_page(&page).unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_terminal_sentinel_emitted_once_under_races() {
        use std::thread;

        for _ in 0..50 {
            let (sink, intake) = intake();
            let intake = Arc::new(intake);
            for i in 0..4 {
                intake.register_source(SourceId(i)).unwrap();
            }

            let mut handles = vec![];
            for i in 0..4 {
                let intake = Arc::clone(&intake);
                handles.push(thread::spawn(move || {
                    intake
                        .add_page(ResultPage::first(SourceId(i), rows(1), 1, None))
                        .unwrap();
                }));
            }
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(sink.last_count(), 1);
        }
    }
}
