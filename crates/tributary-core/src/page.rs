//! Result pages delivered from source nodes.
//!
//! A [`ResultPage`] is one batch of rows from one source, plus the two
//! sentinel shapes used internally: a *fail* page that carries an error
//! and a *last* page that terminates the stream. Sentinels have no row
//! payload.
//!
//! A data page owns a `fetch_next_page` thunk that asks the transport
//! for the next page from the same source. The thunk is the page's only
//! link to the outside world; pages never hold a reference back to the
//! index.

use std::fmt;

use crate::error::MergeError;
use crate::row::Row;
use crate::source::SourceId;

/// Transport callback requesting the next page from a page's source.
pub type PageFetch = Box<dyn Fn() -> Result<(), MergeError> + Send>;

enum PageKind {
    Data,
    Fail(MergeError),
    Last,
}

/// One batch of rows delivered from one source in one message.
pub struct ResultPage {
    source: SourceId,
    rows: Vec<Row>,
    all_rows: Option<i64>,
    kind: PageKind,
    fetch: Option<PageFetch>,
}

impl ResultPage {
    /// A source's first page, carrying the total row count it will ever
    /// send. `all_rows` may be zero for a source with no matching rows.
    #[must_use]
    pub fn first(
        source: SourceId,
        rows: Vec<Row>,
        all_rows: i64,
        fetch: Option<PageFetch>,
    ) -> Self {
        Self {
            source,
            rows,
            all_rows: Some(all_rows),
            kind: PageKind::Data,
            fetch,
        }
    }

    /// A follow-up page with no total (only the first page carries one).
    #[must_use]
    pub fn data(source: SourceId, rows: Vec<Row>, fetch: Option<PageFetch>) -> Self {
        Self {
            source,
            rows,
            all_rows: None,
            kind: PageKind::Data,
            fetch,
        }
    }

    /// The terminal sentinel: the stream is complete.
    #[must_use]
    pub fn last(source: SourceId) -> Self {
        Self {
            source,
            rows: Vec::new(),
            all_rows: None,
            kind: PageKind::Last,
            fetch: None,
        }
    }

    /// A failure sentinel carrying the error to surface to the consumer.
    #[must_use]
    pub fn fail(source: SourceId, error: MergeError) -> Self {
        Self {
            source,
            rows: Vec::new(),
            all_rows: None,
            kind: PageKind::Fail(error),
            fetch: None,
        }
    }

    /// The source this page came from.
    #[must_use]
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Rows in this page.
    #[must_use]
    pub fn rows_in_page(&self) -> usize {
        self.rows.len()
    }

    /// Total rows this source will ever send; present on the first page
    /// only.
    #[must_use]
    pub fn all_rows(&self) -> Option<i64> {
        self.all_rows
    }

    /// Whether this is a failure sentinel.
    #[must_use]
    pub fn is_fail(&self) -> bool {
        matches!(self.kind, PageKind::Fail(_))
    }

    /// Whether this is the terminal sentinel.
    #[must_use]
    pub fn is_last(&self) -> bool {
        matches!(self.kind, PageKind::Last)
    }

    /// The carried error, for failure sentinels.
    #[must_use]
    pub fn error(&self) -> Option<&MergeError> {
        match &self.kind {
            PageKind::Fail(e) => Some(e),
            _ => None,
        }
    }

    /// Ask the transport for the next page from this source.
    ///
    /// On a failure sentinel this re-raises the carried error. On a data
    /// page without a thunk it is a no-op (a source that will push
    /// unprompted, or a test fixture).
    ///
    /// # Errors
    ///
    /// The carried error for failure sentinels; whatever the transport
    /// thunk returns otherwise.
    pub fn fetch_next_page(&self) -> Result<(), MergeError> {
        match &self.kind {
            PageKind::Fail(e) => Err(e.clone()),
            _ => match &self.fetch {
                Some(fetch) => fetch(),
                None => Ok(()),
            },
        }
    }

    /// Consume the page, yielding its row payload.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl fmt::Debug for ResultPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultPage")
            .field("source", &self.source)
            .field("rows", &self.rows.len())
            .field("all_rows", &self.all_rows)
            .field(
                "kind",
                &match &self.kind {
                    PageKind::Data => "data",
                    PageKind::Fail(_) => "fail",
                    PageKind::Last => "last",
                },
            )
            .finish()
    }
}
