use std::collections::VecDeque;

use bytes::Bytes;
use tracing::debug;
use tracing::info;

use super::FixtureRow;
use super::TestFixtureSchema;
use crate::constants::DEFAULT_PAGE_SIZE;
use crate::protocol::cql::Row;
use crate::EmptyResultError;
use crate::Result;
use crate::TabularConfig;
use crate::TabularSession;

/// Creates, fills, reads back and drops fixture tables over a tabular session
#[derive(Debug, Clone, Copy)]
pub struct SchemaFixtureHelper {
    page_size: i32,
}

impl Default for SchemaFixtureHelper {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl SchemaFixtureHelper {
    pub fn new(page_size: i32) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    pub fn from_config(config: &TabularConfig) -> Self {
        Self::new(config.page_size)
    }

    pub fn page_size(&self) -> i32 {
        self.page_size
    }

    pub async fn create_schema(
        &self,
        session: &mut TabularSession,
        schema: &TestFixtureSchema,
    ) -> Result<()> {
        schema.validate()?;
        info!(table = %schema.name, "CREATE TABLE");
        session.execute(&schema.create_statement()).await?;
        Ok(())
    }

    /// One INSERT per row, rows `0..row_count` of [`FixtureRow::derive`]
    pub async fn populate(
        &self,
        session: &mut TabularSession,
        schema: &TestFixtureSchema,
        row_count: usize,
    ) -> Result<()> {
        // reject an oversized count before the first INSERT
        if let Some(last) = row_count.checked_sub(1) {
            FixtureRow::derive(last)?;
        }
        info!(table = %schema.name, row_count, "INSERT INTO TABLE");
        for idx in 0..row_count {
            let row = FixtureRow::derive(idx)?;
            session.execute(&row.insert_statement(&schema.name)).await?;
        }
        Ok(())
    }

    pub async fn drop(
        &self,
        session: &mut TabularSession,
        schema: &TestFixtureSchema,
    ) -> Result<()> {
        info!(table = %schema.name, "DROP TABLE");
        session.execute(&schema.drop_statement()).await?;
        Ok(())
    }

    /// Create, populate with `row_count` rows, read everything back, drop. The table is
    /// dropped even when the read fails; the first error wins.
    pub async fn round_trip(
        &self,
        session: &mut TabularSession,
        schema: &TestFixtureSchema,
        row_count: usize,
    ) -> Result<Vec<FixtureRow>> {
        self.create_schema(session, schema).await?;

        let read = async {
            self.populate(session, schema, row_count).await?;
            let rows = self.select_all(session, schema).collect_all().await?;
            rows.iter().map(FixtureRow::from_row).collect::<Result<Vec<_>>>()
        }
        .await;

        let dropped = self.drop(session, schema).await;
        let rows = read?;
        dropped?;
        Ok(rows)
    }

    /// Lazy stream over every row of the table
    pub fn select_all<'s>(
        &self,
        session: &'s mut TabularSession,
        schema: &TestFixtureSchema,
    ) -> RowStream<'s> {
        RowStream::new(session, schema.select_all_statement(), self.page_size)
    }

    /// Run `statement` and require it to return at least one row
    pub async fn run_select<'s>(
        &self,
        session: &'s mut TabularSession,
        statement: &str,
    ) -> Result<RowStream<'s>> {
        RowStream::new(session, statement.to_string(), self.page_size)
            .expect_non_empty()
            .await
    }
}

/// Rows of one SELECT, fetched a page at a time.
///
/// The stream ends only when the server returns a page without a paging state. It holds
/// the session mutably, so starting over means issuing a new query.
#[derive(Debug)]
pub struct RowStream<'s> {
    session: &'s mut TabularSession,
    statement: String,
    page_size: i32,
    buffered: VecDeque<Row>,
    paging_state: Option<Bytes>,
    pages: usize,
    finished: bool,
    rows_seen: usize,
}

impl<'s> RowStream<'s> {
    fn new(
        session: &'s mut TabularSession,
        statement: String,
        page_size: i32,
    ) -> Self {
        Self {
            session,
            statement,
            page_size,
            buffered: VecDeque::new(),
            paging_state: None,
            pages: 0,
            finished: false,
            rows_seen: 0,
        }
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                self.rows_seen += 1;
                return Ok(Some(row));
            }
            if self.finished {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    pub async fn collect_all(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Fail with [`EmptyResultError`] unless the query yields at least one row. Empty pages
    /// that still carry a paging state are followed; the buffered rows stay in the stream.
    pub async fn expect_non_empty(mut self) -> Result<Self> {
        while self.buffered.is_empty() && !self.finished {
            self.fetch_page().await?;
        }
        if self.buffered.is_empty() && self.rows_seen == 0 {
            return Err(EmptyResultError {
                statement: self.statement.clone(),
            }
            .into());
        }
        Ok(self)
    }

    /// Rows handed out by [`next_row`](Self::next_row) so far
    pub fn rows_seen(&self) -> usize {
        self.rows_seen
    }

    /// Server signalled the last page and every buffered row was consumed
    pub fn is_exhausted(&self) -> bool {
        self.finished && self.buffered.is_empty()
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let page = self
            .session
            .query_page(&self.statement, self.page_size, self.paging_state.take())
            .await?;
        self.pages += 1;
        debug!(
            statement = %self.statement,
            page = self.pages,
            rows = page.rows.len(),
            more = page.paging_state.is_some(),
            "page fetched"
        );

        self.finished = page.paging_state.is_none();
        self.paging_state = page.paging_state;
        self.buffered.extend(page.rows);
        Ok(())
    }
}
