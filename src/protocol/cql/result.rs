use std::sync::Arc;

use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;

use super::types;
use super::types::ColumnType;
use super::types::CqlValue;
use crate::constants::TABULAR;
use crate::ProtocolError;

type Result<T> = std::result::Result<T, ProtocolError>;

const KIND_VOID: i32 = 0x0001;
const KIND_ROWS: i32 = 0x0002;
const KIND_SET_KEYSPACE: i32 = 0x0003;
const KIND_PREPARED: i32 = 0x0004;
const KIND_SCHEMA_CHANGE: i32 = 0x0005;

const ROWS_FLAG_GLOBAL_TABLES_SPEC: i32 = 0x0001;
const ROWS_FLAG_HAS_MORE_PAGES: i32 = 0x0002;
const ROWS_FLAG_NO_METADATA: i32 = 0x0004;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub keyspace: String,
    pub table: String,
    pub name: String,
    pub ty: ColumnType,
}

/// One decoded row; column metadata is shared across the page
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[ColumnSpec]>,
    values: Vec<CqlValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowsResult {
    pub columns: Arc<[ColumnSpec]>,
    pub rows: Vec<Row>,
    /// Present when the server has more pages
    pub paging_state: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Void,
    Rows(RowsResult),
    SetKeyspace(String),
    Prepared { id: Bytes },
    SchemaChange(SchemaChange),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    /// CREATED, UPDATED or DROPPED
    pub change_type: String,
    /// KEYSPACE, TABLE, TYPE, FUNCTION or AGGREGATE
    pub target: String,
    pub keyspace: String,
    pub name: Option<String>,
}

impl Row {
    pub fn new(
        columns: Arc<[ColumnSpec]>,
        values: Vec<CqlValue>,
    ) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn values(&self) -> &[CqlValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cell by column name (case-insensitive, as unquoted CQL identifiers are)
    pub fn get(
        &self,
        name: &str,
    ) -> Option<&CqlValue> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .and_then(|i| self.values.get(i))
    }

    pub fn get_int(
        &self,
        name: &str,
    ) -> Option<i32> {
        self.get(name).and_then(CqlValue::as_int)
    }

    pub fn get_text(
        &self,
        name: &str,
    ) -> Option<&str> {
        self.get(name).and_then(CqlValue::as_text)
    }
}

impl RowsResult {
    pub fn new(
        columns: Vec<ColumnSpec>,
        rows: Vec<Vec<CqlValue>>,
        paging_state: Option<Bytes>,
    ) -> Self {
        let columns: Arc<[ColumnSpec]> = columns.into();
        let rows = rows
            .into_iter()
            .map(|values| Row::new(columns.clone(), values))
            .collect();
        Self {
            columns,
            rows,
            paging_state,
        }
    }

    fn decode(src: &mut Bytes) -> Result<RowsResult> {
        let flags = types::get_int(src)?;
        let column_count = types::get_int(src)?;
        if column_count < 0 {
            return Err(ProtocolError::malformed(TABULAR, "negative column count"));
        }

        let paging_state = if flags & ROWS_FLAG_HAS_MORE_PAGES != 0 {
            types::get_bytes(src)?
        } else {
            None
        };

        if flags & ROWS_FLAG_NO_METADATA != 0 {
            return Err(ProtocolError::unexpected(
                TABULAR,
                "rows without metadata (skip_metadata is never requested)",
            ));
        }

        let global = if flags & ROWS_FLAG_GLOBAL_TABLES_SPEC != 0 {
            Some((types::get_string(src)?, types::get_string(src)?))
        } else {
            None
        };

        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let (keyspace, table) = match &global {
                Some((ks, t)) => (ks.clone(), t.clone()),
                None => (types::get_string(src)?, types::get_string(src)?),
            };
            let name = types::get_string(src)?;
            let ty = ColumnType::decode(src)?;
            columns.push(ColumnSpec {
                keyspace,
                table,
                name,
                ty,
            });
        }
        let columns: Arc<[ColumnSpec]> = columns.into();

        let row_count = types::get_int(src)?;
        if row_count < 0 {
            return Err(ProtocolError::malformed(TABULAR, "negative row count"));
        }
        let mut rows = Vec::with_capacity(row_count as usize);
        for _ in 0..row_count {
            let mut values = Vec::with_capacity(columns.len());
            for column in columns.iter() {
                let raw = types::get_bytes(src)?;
                values.push(CqlValue::decode(&column.ty, raw)?);
            }
            rows.push(Row::new(columns.clone(), values));
        }

        Ok(RowsResult {
            columns,
            rows,
            paging_state,
        })
    }

    fn encode(
        &self,
        dst: &mut BytesMut,
    ) {
        let global = self.columns.first().filter(|first| {
            self.columns
                .iter()
                .all(|c| c.keyspace == first.keyspace && c.table == first.table)
        });

        let mut flags = 0;
        if global.is_some() {
            flags |= ROWS_FLAG_GLOBAL_TABLES_SPEC;
        }
        if self.paging_state.is_some() {
            flags |= ROWS_FLAG_HAS_MORE_PAGES;
        }
        dst.put_i32(flags);
        dst.put_i32(self.columns.len() as i32);
        if let Some(state) = &self.paging_state {
            types::put_bytes(dst, Some(state.as_ref()));
        }
        if let Some(first) = global {
            types::put_string(dst, &first.keyspace);
            types::put_string(dst, &first.table);
        }
        for column in self.columns.iter() {
            if global.is_none() {
                types::put_string(dst, &column.keyspace);
                types::put_string(dst, &column.table);
            }
            types::put_string(dst, &column.name);
            column.ty.encode(dst);
        }

        dst.put_i32(self.rows.len() as i32);
        for row in &self.rows {
            for value in row.values() {
                types::put_bytes(dst, value.encode().as_deref());
            }
        }
    }
}

impl QueryResult {
    pub fn decode(mut body: Bytes) -> Result<QueryResult> {
        let src = &mut body;
        let kind = types::get_int(src)?;
        Ok(match kind {
            KIND_VOID => QueryResult::Void,
            KIND_ROWS => QueryResult::Rows(RowsResult::decode(src)?),
            KIND_SET_KEYSPACE => QueryResult::SetKeyspace(types::get_string(src)?),
            // Only the id matters; the trailing metadata is left unparsed
            KIND_PREPARED => QueryResult::Prepared {
                id: types::get_short_bytes(src)?,
            },
            KIND_SCHEMA_CHANGE => QueryResult::SchemaChange(SchemaChange::decode(src)?),
            other => {
                return Err(ProtocolError::malformed(
                    TABULAR,
                    format!("unknown result kind {other:#06x}"),
                ))
            }
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::new();
        match self {
            QueryResult::Void => dst.put_i32(KIND_VOID),
            QueryResult::Rows(rows) => {
                dst.put_i32(KIND_ROWS);
                rows.encode(&mut dst);
            }
            QueryResult::SetKeyspace(keyspace) => {
                dst.put_i32(KIND_SET_KEYSPACE);
                types::put_string(&mut dst, keyspace);
            }
            QueryResult::Prepared { id } => {
                dst.put_i32(KIND_PREPARED);
                types::put_short_bytes(&mut dst, id);
                // empty prepared metadata and result metadata
                dst.put_i32(0);
                dst.put_i32(0);
                dst.put_i32(0);
                dst.put_i32(ROWS_FLAG_NO_METADATA);
                dst.put_i32(0);
            }
            QueryResult::SchemaChange(change) => {
                dst.put_i32(KIND_SCHEMA_CHANGE);
                change.encode(&mut dst);
            }
        }
        dst.freeze()
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            QueryResult::Void => "Void",
            QueryResult::Rows(_) => "Rows",
            QueryResult::SetKeyspace(_) => "SetKeyspace",
            QueryResult::Prepared { .. } => "Prepared",
            QueryResult::SchemaChange(_) => "SchemaChange",
        }
    }

    pub fn into_rows(self) -> Option<RowsResult> {
        match self {
            QueryResult::Rows(rows) => Some(rows),
            _ => None,
        }
    }
}

impl SchemaChange {
    fn decode(src: &mut Bytes) -> Result<SchemaChange> {
        let change_type = types::get_string(src)?;
        let target = types::get_string(src)?;
        let keyspace = types::get_string(src)?;
        let name = match target.as_str() {
            "KEYSPACE" => None,
            "TABLE" | "TYPE" => Some(types::get_string(src)?),
            "FUNCTION" | "AGGREGATE" => {
                let name = types::get_string(src)?;
                types::get_string_list(src)?;
                Some(name)
            }
            other => {
                return Err(ProtocolError::malformed(
                    TABULAR,
                    format!("unknown schema change target {other}"),
                ))
            }
        };
        // Anything left belongs to a newer protocol revision
        src.advance(src.remaining());
        Ok(SchemaChange {
            change_type,
            target,
            keyspace,
            name,
        })
    }

    fn encode(
        &self,
        dst: &mut BytesMut,
    ) {
        types::put_string(dst, &self.change_type);
        types::put_string(dst, &self.target);
        types::put_string(dst, &self.keyspace);
        if let Some(name) = &self.name {
            types::put_string(dst, name);
        }
        if matches!(self.target.as_str(), "FUNCTION" | "AGGREGATE") {
            types::put_string_list(dst, &[]);
        }
    }
}
