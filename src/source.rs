//! Row sources a [`CursorPaginator`](crate::CursorPaginator) pulls pages from.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::paging::{PageRequest, Row};

/// Fetches one page of rows for a [`PageRequest`].
///
/// Implementations return, in ascending `updated_time` order and at most
/// `request.limit()` of them, the rows with `updated_time > cursor` together
/// with the rows whose `updated_time == cursor` sitting at offset `start` or
/// later within that bucket. Ties keep a stable order across calls. [`window`]
/// applies exactly this rule to an ordered stream.
pub trait DataSource {
    /// Row type produced by this source.
    type Row: Row;

    /// Runs one range query. Errors are handed to the caller unchanged.
    fn fetch(&self, request: &PageRequest) -> anyhow::Result<Vec<Self::Row>>;
}

impl<T: DataSource + ?Sized> DataSource for &T {
    type Row = T::Row;

    fn fetch(&self, request: &PageRequest) -> anyhow::Result<Vec<Self::Row>> {
        (**self).fetch(request)
    }
}

impl<T: DataSource + ?Sized> DataSource for Arc<T> {
    type Row = T::Row;

    fn fetch(&self, request: &PageRequest) -> anyhow::Result<Vec<Self::Row>> {
        self.as_ref().fetch(request)
    }
}

/// Cuts the page for `request` out of `entries`, which must be ascending by
/// the timestamp `updated_time` reads from them.
///
/// Entries before the cursor are passed over, the first `start` entries of the
/// cursor's bucket are skipped, and collection stops as soon as `limit` entries
/// are held, without pulling another one from `entries`.
pub fn window<T, E>(
    entries: impl IntoIterator<Item = Result<T, E>>,
    request: &PageRequest,
    updated_time: impl Fn(&T) -> i64,
) -> Result<Vec<T>, E> {
    let max_rows = request.max_rows();
    let mut rows = Vec::with_capacity(max_rows.min(256));
    let mut skipped = 0;
    let mut entries = entries.into_iter();
    while rows.len() < max_rows {
        let Some(entry) = entries.next() else {
            break;
        };
        let entry = entry?;
        let time = updated_time(&entry);
        if time < request.cursor() {
            continue;
        }
        if time == request.cursor() && skipped < request.start() {
            skipped += 1;
            continue;
        }
        rows.push(entry);
    }
    Ok(rows)
}

/// An in-memory collection kept sorted by `updated_time`.
///
/// Rows sharing a timestamp keep insertion order. Writes may interleave with a
/// running traversal.
#[derive(Debug)]
pub struct MemorySource<R> {
    rows: RwLock<Vec<R>>,
}

impl<R> Default for MemorySource<R> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }
}

impl<R: Row + Clone> MemorySource<R> {
    /// Builds a source from rows in any order.
    pub fn new(rows: impl IntoIterator<Item = R>) -> Self {
        let mut rows: Vec<R> = rows.into_iter().collect();
        rows.sort_by_key(|row| row.updated_time());
        Self {
            rows: RwLock::new(rows),
        }
    }

    /// Adds a row after every existing row with the same timestamp.
    pub fn insert(&self, row: R) {
        let mut rows = self.rows.write();
        let at = rows.partition_point(|r| r.updated_time() <= row.updated_time());
        rows.insert(at, row);
    }

    /// Drops every row matching `predicate`, returning how many went.
    pub fn remove_where(&self, predicate: impl Fn(&R) -> bool) -> usize {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|row| !predicate(row));
        before - rows.len()
    }

    /// Number of rows held.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns `true` if the source holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl<R: Row + Clone> DataSource for MemorySource<R> {
    type Row = R;

    fn fetch(&self, request: &PageRequest) -> anyhow::Result<Vec<R>> {
        let rows = self.rows.read();
        let first = rows.partition_point(|row| row.updated_time() < request.cursor());
        window(
            rows[first..].iter().cloned().map(Ok),
            request,
            |row: &R| row.updated_time(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Entry(i64, &'static str);

    impl Row for Entry {
        fn updated_time(&self) -> i64 {
            self.0
        }
    }

    fn names(rows: &[Entry]) -> Vec<&'static str> {
        rows.iter().map(|row| row.1).collect()
    }

    fn source() -> MemorySource<Entry> {
        MemorySource::new([
            Entry(3, "c"),
            Entry(1, "a"),
            Entry(3, "d"),
            Entry(2, "b"),
            Entry(3, "e"),
            Entry(4, "f"),
        ])
    }

    #[test]
    fn start_skips_only_inside_the_cursor_bucket() {
        let source = source();
        let page = source.fetch(&PageRequest::new(3, 2, 10).unwrap()).unwrap();
        assert_eq!(names(&page), vec!["e", "f"]);

        // A start larger than the bucket never eats rows of later buckets.
        let page = source.fetch(&PageRequest::new(3, 9, 10).unwrap()).unwrap();
        assert_eq!(names(&page), vec!["f"]);

        let page = source.fetch(&PageRequest::new(2, 0, 3).unwrap()).unwrap();
        assert_eq!(names(&page), vec!["b", "c", "d"]);
    }

    #[test]
    fn insert_keeps_bucket_order_stable() {
        let source = source();
        source.insert(Entry(3, "late"));
        source.insert(Entry(0, "zero"));
        assert_eq!(source.len(), 8);

        let page = source.fetch(&PageRequest::new(3, 0, 4).unwrap()).unwrap();
        assert_eq!(names(&page), vec!["c", "d", "e", "late"]);

        assert_eq!(source.remove_where(|row| row.0 == 3), 4);
        let page = source.fetch(&PageRequest::first(10).unwrap()).unwrap();
        assert_eq!(names(&page), vec!["zero", "a", "b", "f"]);
    }

    #[test]
    fn window_stops_pulling_at_the_limit() {
        let mut pulled = 0;
        let entries = (0..100i64).map(|t| {
            pulled += 1;
            Ok::<_, anyhow::Error>(t)
        });
        let rows = window(entries, &PageRequest::new(10, 0, 5).unwrap(), |t| *t).unwrap();
        assert_eq!(rows, vec![10, 11, 12, 13, 14]);
        assert_eq!(pulled, 15);
    }

    #[test]
    fn window_propagates_the_first_error() {
        let entries = vec![Ok(1i64), Err("disk on fire"), Ok(3)];
        let err = window(entries, &PageRequest::first(10).unwrap(), |t| *t).unwrap_err();
        assert_eq!(err, "disk on fire");
    }
}
