//! Cursor pagination over rows ordered by update timestamp.
//!
//! A traversal threads a [`PageRequest`] through repeated fetch-then-advance
//! steps. `cursor` is a timestamp watermark: rows updated before it have been
//! consumed. `start` skips rows already returned from the bucket of rows whose
//! timestamp equals `cursor`, and is reset whenever the cursor moves. Each
//! step is a pure function of the previous request and the rows it fetched,
//! so a failed step is retried by replaying the same request.
//!
//! Rows written while a traversal is running are only guaranteed to show up
//! if their timestamp lands past the current cursor. The last rows of a full
//! page may be delivered again at the top of the next one, because that page
//! re-reads their bucket from offset zero; clients merge by record identity.

use std::iter::FusedIterator;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::{PagingConfig, DEFAULT_PAGE_LIMIT};
use crate::metrics::{
    ROCKPAGE_FETCH_LATENCY_SECONDS, ROCKPAGE_PAGES, ROCKPAGE_PAGE_ROWS,
    ROCKPAGE_REJECTED_REQUESTS,
};
use crate::source::DataSource;
use crate::PagingError;

/// A row that can be paged through: anything carrying an update timestamp.
pub trait Row {
    /// Update timestamp the collection is ordered by, e.g. epoch seconds.
    fn updated_time(&self) -> i64;
}

impl<R: Row + ?Sized> Row for &R {
    fn updated_time(&self) -> i64 {
        (**self).updated_time()
    }
}

/// Paging parameters as they arrive on the wire, each one optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQuery {
    /// Timestamp watermark. Defaults to 0.
    #[serde(default)]
    pub cursor: Option<i64>,
    /// Offset inside the cursor's bucket. Defaults to 0.
    #[serde(default)]
    pub start: Option<i64>,
    /// Page size. Defaults to the paginator's configured limit.
    #[serde(default)]
    pub limit: Option<i64>,
}

impl PageQuery {
    /// Fills in missing fields and validates the result.
    pub fn resolve(self, default_limit: i64) -> Result<PageRequest, PagingError> {
        PageRequest::new(
            self.cursor.unwrap_or(0),
            self.start.unwrap_or(0),
            self.limit.unwrap_or(default_limit),
        )
    }
}

/// Validated paging state, round-tripped by the client between calls.
///
/// Deserializing goes through [`PageQuery`] with a default limit of
/// [`DEFAULT_PAGE_LIMIT`], so the `next` object of a previous response can be
/// echoed back as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PageQuery")]
pub struct PageRequest {
    cursor: i64,
    start: i64,
    limit: i64,
}

impl PageRequest {
    /// Builds a request, rejecting a non-positive `limit` and a negative
    /// `start` or `cursor`.
    pub fn new(cursor: i64, start: i64, limit: i64) -> Result<Self, PagingError> {
        if limit <= 0 {
            return Err(PagingError::InvalidArgument(format!(
                "limit must be positive, got {limit}"
            )));
        }
        if start < 0 {
            return Err(PagingError::InvalidArgument(format!(
                "start must not be negative, got {start}"
            )));
        }
        if cursor < 0 {
            return Err(PagingError::InvalidArgument(format!(
                "cursor must not be negative, got {cursor}"
            )));
        }
        Ok(Self {
            cursor,
            start,
            limit,
        })
    }

    /// The request that begins a traversal: `cursor = 0`, `start = 0`.
    pub fn first(limit: i64) -> Result<Self, PagingError> {
        Self::new(0, 0, limit)
    }

    /// Timestamp watermark.
    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    /// Offset into the rows whose timestamp equals [`Self::cursor`].
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Page size.
    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// [`Self::limit`] as a length, saturating on narrow targets.
    pub fn max_rows(&self) -> usize {
        usize::try_from(self.limit).unwrap_or(usize::MAX)
    }

    /// Computes the paging state that follows this request, given the rows it
    /// fetched. See [`advance`].
    pub fn advance<R: Row>(&self, rows: &[R]) -> Result<PageResult, PagingError> {
        advance(self, rows)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            cursor: 0,
            start: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl TryFrom<PageQuery> for PageRequest {
    type Error = PagingError;

    fn try_from(query: PageQuery) -> Result<Self, Self::Error> {
        query.resolve(DEFAULT_PAGE_LIMIT)
    }
}

/// Output of one pagination step: the state for the next call, plus whether
/// the traversal is complete.
///
/// Serialized flat as `{ "cursor", "start", "limit", "eof" }`. Deserializing
/// validates the state the same way [`PageRequest::new`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "RawPageResult", try_from = "RawPageResult")]
pub struct PageResult {
    next: PageRequest,
    eof: bool,
}

#[derive(Serialize, Deserialize)]
struct RawPageResult {
    cursor: i64,
    start: i64,
    limit: i64,
    eof: bool,
}

impl PageResult {
    /// Builds a result, validating the state like [`PageRequest::new`].
    pub fn new(cursor: i64, start: i64, limit: i64, eof: bool) -> Result<Self, PagingError> {
        Ok(Self {
            next: PageRequest::new(cursor, start, limit)?,
            eof,
        })
    }

    /// Timestamp watermark for the next call.
    pub fn cursor(&self) -> i64 {
        self.next.cursor
    }

    /// Offset into the next cursor's bucket.
    pub fn start(&self) -> i64 {
        self.next.start
    }

    /// Page size, unchanged from the request.
    pub fn limit(&self) -> i64 {
        self.next.limit
    }

    /// Set once no further call can yield new rows.
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// The request to issue next, or `None` once the traversal is complete.
    pub fn next_request(&self) -> Option<PageRequest> {
        (!self.eof).then_some(self.next)
    }
}

impl From<PageResult> for RawPageResult {
    fn from(result: PageResult) -> Self {
        Self {
            cursor: result.cursor(),
            start: result.start(),
            limit: result.limit(),
            eof: result.eof,
        }
    }
}

impl TryFrom<RawPageResult> for PageResult {
    type Error = PagingError;

    fn try_from(raw: RawPageResult) -> Result<Self, Self::Error> {
        Self::new(raw.cursor, raw.start, raw.limit, raw.eof)
    }
}

/// One page of a listing: `{ "resources": [...], "next": {...} }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Rows fetched for the request.
    pub resources: Vec<T>,
    /// State to send back for the following page.
    pub next: PageResult,
}

impl<T> Page<T> {
    /// Projects every row, keeping the paging state.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            resources: self.resources.into_iter().map(f).collect(),
            next: self.next,
        }
    }
}

/// Computes the next paging state from the previous request and the rows
/// fetched with it.
///
/// - An empty page ends the traversal one past the previous cursor.
/// - A short page ends it one past the last row's timestamp.
/// - A full page whose last row moved past the cursor restarts at that row's
///   timestamp with `start = 0`.
/// - A full page still inside the cursor's bucket keeps the cursor and skips
///   the `limit` rows just returned.
///
/// Rows must be ascending by timestamp, none before `prev.cursor`, and at most
/// `prev.limit()` of them; anything else is [`PagingError::InvalidArgument`].
pub fn advance<R: Row>(prev: &PageRequest, rows: &[R]) -> Result<PageResult, PagingError> {
    let limit = prev.limit;
    if rows.len() > prev.max_rows() {
        return Err(PagingError::InvalidArgument(format!(
            "page holds {} rows, more than the limit of {limit}",
            rows.len()
        )));
    }
    check_ordering(prev, rows)?;

    // Rows are never below `prev.cursor`, so the next state stays valid.
    let (cursor, start, eof) = match rows.last() {
        None => (prev.cursor.saturating_add(1), 0, true),
        Some(last) if rows.len() < prev.max_rows() => {
            (last.updated_time().saturating_add(1), 0, true)
        }
        Some(last) if last.updated_time() != prev.cursor => (last.updated_time(), 0, false),
        Some(_) => (prev.cursor, prev.start.saturating_add(limit), false),
    };
    let next = PageResult {
        next: PageRequest {
            cursor,
            start,
            limit,
        },
        eof,
    };

    debug!(
        prev_cursor = prev.cursor,
        prev_start = prev.start,
        rows = rows.len(),
        cursor,
        start,
        eof,
        "Advanced page cursor"
    );
    Ok(next)
}

/// Same as [`advance`], taking the previous state as raw integers that are
/// validated first.
pub fn advance_raw<R: Row>(
    cursor: i64,
    start: i64,
    limit: i64,
    rows: &[R],
) -> Result<PageResult, PagingError> {
    PageRequest::new(cursor, start, limit)?.advance(rows)
}

fn check_ordering<R: Row>(prev: &PageRequest, rows: &[R]) -> Result<(), PagingError> {
    let mut floor = prev.cursor;
    for row in rows {
        let updated_time = row.updated_time();
        if updated_time < floor {
            return Err(PagingError::InvalidArgument(format!(
                "row at timestamp {updated_time} is out of order (expected >= {floor})"
            )));
        }
        floor = updated_time;
    }
    Ok(())
}

/// Drives a traversal: fetches rows from a [`DataSource`] and advances the
/// cursor over them.
#[derive(Debug)]
pub struct CursorPaginator<D> {
    name: &'static str, // for logging and metrics
    source: D,
    config: PagingConfig,
}

impl<D: DataSource> CursorPaginator<D> {
    /// Creates a paginator with the default [`PagingConfig`].
    pub fn new(name: &'static str, source: D) -> Self {
        Self::with_config(name, source, PagingConfig::default())
    }

    /// Creates a paginator with an explicit [`PagingConfig`].
    pub fn with_config(name: &'static str, source: D, config: PagingConfig) -> Self {
        Self {
            name,
            source,
            config,
        }
    }

    /// Name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The underlying data source.
    pub fn source(&self) -> &D {
        &self.source
    }

    /// Turns wire parameters into a request, applying the configured default
    /// limit.
    pub fn request(&self, query: PageQuery) -> Result<PageRequest, PagingError> {
        query.resolve(self.config.default_limit).inspect_err(|e| {
            ROCKPAGE_REJECTED_REQUESTS
                .with_label_values(&[self.name])
                .inc();
            debug!(source = self.name, "Rejected page request: {e}");
        })
    }

    /// Fetches the rows for `request` and computes the following state.
    ///
    /// Source failures come back as [`PagingError::DataSource`] without a
    /// retry; a source returning more than `limit` rows breaks its contract and
    /// yields [`PagingError::InvalidArgument`].
    #[tracing::instrument(skip_all, level = "error")]
    pub fn fetch_page(&self, request: &PageRequest) -> Result<Page<D::Row>, PagingError> {
        let rows = {
            let _timer = ROCKPAGE_FETCH_LATENCY_SECONDS
                .with_label_values(&[self.name])
                .start_timer();
            self.source.fetch(request).map_err(|e| {
                error!("[Rockpage] error during fetch from {}: {}", self.name, e);
                PagingError::DataSource(e)
            })?
        };

        let next = advance(request, &rows).inspect_err(|e| {
            error!("[Rockpage] {} returned an unusable page: {}", self.name, e);
        })?;

        ROCKPAGE_PAGE_ROWS
            .with_label_values(&[self.name])
            .observe(rows.len() as f64);
        ROCKPAGE_PAGES
            .with_label_values(&[self.name, if next.eof() { "eof" } else { "more" }])
            .inc();

        Ok(Page {
            resources: rows,
            next,
        })
    }

    /// Walks the collection from `first` until a page reports `eof` or a step
    /// fails.
    pub fn traverse(&self, first: PageRequest) -> Traversal<'_, D> {
        Traversal {
            paginator: self,
            next: Some(first),
        }
    }
}

/// Iterator over the pages of a traversal, see [`CursorPaginator::traverse`].
///
/// Yields the `eof` page and then stops. After an error it stops as well; the
/// failed request can be replayed with [`CursorPaginator::fetch_page`].
#[derive(Debug)]
pub struct Traversal<'a, D> {
    paginator: &'a CursorPaginator<D>,
    next: Option<PageRequest>,
}

impl<D: DataSource> Iterator for Traversal<'_, D> {
    type Item = Result<Page<D::Row>, PagingError>;

    fn next(&mut self) -> Option<Self::Item> {
        let request = self.next.take()?;
        let page = self.paginator.fetch_page(&request);
        if let Ok(page) = &page {
            self.next = page.next.next_request();
        }
        Some(page)
    }
}

impl<D: DataSource> FusedIterator for Traversal<'_, D> {}
