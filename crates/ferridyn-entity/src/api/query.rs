//! Paginated queries: follow continuation tokens and materialize records.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::schema::{Entity, Schema};
use crate::store::{RangeQuery, TableStore};
use crate::types::{ContinuationToken, Row};

use super::filter::{Comparison, FilterExpr};
use super::predicate::{Combinator, build_filter};
use super::projection::without_key_columns;

/// Filter plus column selection for a range read.
#[derive(Debug, Clone, Default)]
pub struct QueryDescriptor {
    pub filter: Option<FilterExpr>,
    /// Columns to fetch. Empty means every column.
    pub select: Vec<String>,
    /// Rows requested per page; the store's own limit applies when unset.
    pub page_size: Option<usize>,
}

impl QueryDescriptor {
    /// Every row of the table.
    pub fn all() -> Self {
        Self::default()
    }

    /// Rows matching the non-empty fields of `example`.
    pub fn by_example<T: Entity>(
        schema: &Schema<T>,
        example: &T,
        comparison: Comparison,
        combinator: Combinator,
    ) -> Self {
        Self {
            filter: build_filter(schema, example, comparison, combinator),
            ..Self::default()
        }
    }

    pub fn filter(mut self, expr: FilterExpr) -> Self {
        self.filter = Some(expr);
        self
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn page_size(mut self, rows: usize) -> Self {
        self.page_size = Some(rows);
        self
    }

    /// Store request for this descriptor. Key columns always come back with
    /// every row, so they are dropped from the selection.
    pub fn to_range_query(&self) -> RangeQuery {
        RangeQuery {
            filter: self.filter.clone(),
            select: without_key_columns(&self.select),
            take: self.page_size,
        }
    }
}

/// Lazy, finite, non-restartable stream of records produced by a range read.
///
/// Pages are fetched on demand, each resuming from the previous page's
/// continuation token, until a page arrives without one. A failed read ends
/// the stream after yielding the error; records already yielded stay yielded.
pub struct EntityQuery<T> {
    store: Arc<dyn TableStore>,
    schema: Arc<Schema<T>>,
    request: RangeQuery,
    buffered: VecDeque<Row>,
    token: Option<ContinuationToken>,
    done: bool,
    pages: usize,
}

impl<T: Entity> EntityQuery<T> {
    pub fn new(
        store: Arc<dyn TableStore>,
        schema: Arc<Schema<T>>,
        descriptor: &QueryDescriptor,
    ) -> Self {
        Self {
            store,
            schema,
            request: descriptor.to_range_query(),
            buffered: VecDeque::new(),
            token: None,
            done: false,
            pages: 0,
        }
    }

    /// Number of pages read from the store so far.
    pub fn pages_read(&self) -> usize {
        self.pages
    }

    /// The next page of records; `None` once the stream is exhausted.
    ///
    /// Rows buffered by earlier calls to [`Iterator::next`] are returned first.
    pub fn next_page(&mut self) -> Option<Result<Vec<T>>> {
        let rows: Vec<Row> = if self.buffered.is_empty() {
            match self.fetch()? {
                Ok(rows) => rows,
                Err(e) => return Some(Err(e)),
            }
        } else {
            self.buffered.drain(..).collect()
        };
        Some(rows.iter().map(|row| self.schema.from_row(row)).collect())
    }

    fn fetch(&mut self) -> Option<Result<Vec<Row>>> {
        if self.done {
            return None;
        }
        let token = self.token.take();
        match self.store.query_segment(&self.request, token.as_ref()) {
            Ok(segment) => {
                self.pages += 1;
                self.done = segment.continuation.is_none();
                self.token = segment.continuation;
                debug!(
                    table = %self.store.name(),
                    page = self.pages,
                    rows = segment.rows.len(),
                    more = !self.done,
                    "fetched query page"
                );
                Some(Ok(segment.rows))
            }
            Err(e) => {
                self.done = true;
                warn!(
                    table = %self.store.name(),
                    page = self.pages + 1,
                    error = %e,
                    "query page failed"
                );
                Some(Err(e))
            }
        }
    }
}

impl<T: Entity> Iterator for EntityQuery<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                return Some(self.schema.from_row(&row));
            }
            match self.fetch()? {
                Ok(rows) => self.buffered.extend(rows),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, StoreError};
    use crate::store::{OpOutcome, Segment, TableBatch, TableOp};
    use crate::test_support::Contact;
    use parking_lot::Mutex;

    /// Serves scripted pages and records the tokens it was called with.
    struct PagedStub {
        pages: Mutex<VecDeque<Result<Segment>>>,
        seen_tokens: Mutex<Vec<Option<ContinuationToken>>>,
    }

    impl PagedStub {
        fn new(sizes: &[usize]) -> Arc<Self> {
            let mut pages = VecDeque::new();
            let mut next = 0;
            for (i, &size) in sizes.iter().enumerate() {
                let rows = (next..next + size)
                    .map(|n| Row::new("P", format!("{n:03}")).with("Name", format!("n{n}")))
                    .collect();
                next += size;
                let continuation = (i + 1 < sizes.len()).then(|| ContinuationToken {
                    next_partition_key: "P".into(),
                    next_row_key: format!("{next:03}"),
                });
                pages.push_back(Ok(Segment { rows, continuation }));
            }
            Arc::new(Self {
                pages: Mutex::new(pages),
                seen_tokens: Mutex::new(Vec::new()),
            })
        }

        fn push_failure(&self) {
            let mut pages = self.pages.lock();
            if let Some(Ok(last)) = pages.back_mut() {
                last.continuation = Some(ContinuationToken {
                    next_partition_key: "P".into(),
                    next_row_key: "zzz".into(),
                });
            }
            pages.push_back(Err(StoreError::Transport("connection reset".into()).into()));
        }
    }

    impl TableStore for PagedStub {
        fn name(&self) -> &str {
            "stub"
        }

        fn get_row(&self, _: &str, _: &str) -> Result<Option<Row>> {
            Ok(None)
        }

        fn query_segment(
            &self,
            _query: &RangeQuery,
            token: Option<&ContinuationToken>,
        ) -> Result<Segment> {
            self.seen_tokens.lock().push(token.cloned());
            self.pages
                .lock()
                .pop_front()
                .unwrap_or_else(|| panic!("read past the last page"))
        }

        fn execute_batch(&self, _: &TableBatch) -> Result<Vec<OpOutcome>> {
            unimplemented!("read-only stub")
        }

        fn execute(&self, _: &TableOp) -> Result<OpOutcome> {
            unimplemented!("read-only stub")
        }
    }

    fn query(stub: &Arc<PagedStub>) -> EntityQuery<Contact> {
        EntityQuery::new(
            stub.clone(),
            Arc::new(Schema::derive()),
            &QueryDescriptor::all(),
        )
    }

    #[test]
    fn test_three_pages_yield_all_records_in_order() {
        let stub = PagedStub::new(&[40, 40, 20]);
        let mut q = query(&stub);
        let records: Vec<Contact> = q.by_ref().collect::<Result<_>>().unwrap();

        assert_eq!(records.len(), 100);
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.meta.row_key, format!("{i:03}"));
            assert_eq!(r.name, format!("n{i}"));
            assert_eq!(r.email, "unknown@example.com");
        }
        assert_eq!(q.pages_read(), 3);

        let tokens = stub.seen_tokens.lock().clone();
        assert_eq!(tokens.len(), 3);
        assert!(tokens[0].is_none());
        assert_eq!(tokens[1].as_ref().unwrap().next_row_key, "040");
        assert_eq!(tokens[2].as_ref().unwrap().next_row_key, "080");
        assert!(q.next().is_none());
    }

    #[test]
    fn test_page_iteration() {
        let stub = PagedStub::new(&[2, 0, 3]);
        let mut q = query(&stub);
        let sizes: Vec<usize> = std::iter::from_fn(|| q.next_page())
            .map(|page| page.unwrap().len())
            .collect();
        assert_eq!(sizes, vec![2, 0, 3]);
    }

    #[test]
    fn test_read_failure_ends_stream_after_yielded_rows() {
        let stub = PagedStub::new(&[2]);
        stub.push_failure();
        let mut q = query(&stub);
        assert!(q.next().unwrap().is_ok());
        assert!(q.next().unwrap().is_ok());
        let err = q.next().unwrap().unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Transport(_))));
        assert!(q.next().is_none());
    }

    #[test]
    fn test_selection_drops_key_columns() {
        let d = QueryDescriptor::all()
            .select(["RowKey", "Name"])
            .page_size(10)
            .filter(FilterExpr::eq("Name", "x"));
        let req = d.to_range_query();
        assert_eq!(req.select, vec!["Name".to_string()]);
        assert_eq!(req.take, Some(10));
        assert!(req.filter.is_some());
    }
}
