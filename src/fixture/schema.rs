use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::TABULAR;
use crate::protocol::cql::Row;
use crate::Error;
use crate::ProtocolError;
use crate::Result;

const UNIQUE_SUFFIX_LEN: usize = 8;
const UNIQUE_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r',
    's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Column types the fixtures use, spelled as CQL type names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    Int,
    Bigint,
    Varchar,
    Boolean,
    Double,
    Timestamp,
}

impl LogicalType {
    pub fn cql_name(&self) -> &'static str {
        match self {
            LogicalType::Int => "int",
            LogicalType::Bigint => "bigint",
            LogicalType::Varchar => "varchar",
            LogicalType::Boolean => "boolean",
            LogicalType::Double => "double",
            LogicalType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.cql_name())
    }
}

/// Table layout a fixture creates and drops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFixtureSchema {
    pub name: String,
    pub columns: Vec<(String, LogicalType)>,
    pub partition_key_columns: Vec<String>,
    pub clustering_key_columns: Vec<String>,
}

impl TestFixtureSchema {
    /// `(h1 int, h2 varchar, r1 int, r2 varchar, v1 int, v2 varchar,
    /// primary key((h1, h2), r1, r2))`
    pub fn standard(name: impl Into<String>) -> Self {
        let columns = [
            ("h1", LogicalType::Int),
            ("h2", LogicalType::Varchar),
            ("r1", LogicalType::Int),
            ("r2", LogicalType::Varchar),
            ("v1", LogicalType::Int),
            ("v2", LogicalType::Varchar),
        ];
        Self {
            name: name.into(),
            columns: columns
                .into_iter()
                .map(|(n, t)| (n.to_string(), t))
                .collect(),
            partition_key_columns: vec!["h1".to_string(), "h2".to_string()],
            clustering_key_columns: vec!["r1".to_string(), "r2".to_string()],
        }
    }

    /// Standard layout under `{prefix}_{random lowercase suffix}`
    pub fn unique(prefix: &str) -> Self {
        let suffix = nanoid::nanoid!(UNIQUE_SUFFIX_LEN, &UNIQUE_ALPHABET);
        Self::standard(format!("{prefix}_{suffix}"))
    }

    /// Name is a plain identifier, key columns exist and the partition key is non-empty
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.name) {
            return Err(invalid_schema(format!(
                "table name '{}' is not a plain identifier",
                self.name
            )));
        }
        if self.partition_key_columns.is_empty() {
            return Err(invalid_schema(format!(
                "table {} has no partition key",
                self.name
            )));
        }
        for column in self
            .partition_key_columns
            .iter()
            .chain(&self.clustering_key_columns)
        {
            if !self.columns.iter().any(|(name, _)| name == column) {
                return Err(invalid_schema(format!(
                    "key column {column} is not declared in table {}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    pub fn create_statement(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|(name, ty)| format!("{name} {ty}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut key = format!("({})", self.partition_key_columns.join(", "));
        for column in &self.clustering_key_columns {
            key.push_str(", ");
            key.push_str(column);
        }
        format!(
            "CREATE TABLE {} ({columns}, primary key({key}))",
            self.name
        )
    }

    pub fn drop_statement(&self) -> String {
        format!("DROP TABLE {}", self.name)
    }

    pub fn select_all_statement(&self) -> String {
        format!("SELECT * FROM {}", self.name)
    }
}

/// One row of the standard fixture table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FixtureRow {
    pub h1: i32,
    pub h2: String,
    pub r1: i32,
    pub r2: String,
    pub v1: i32,
    pub v2: String,
}

impl FixtureRow {
    /// `(idx, "h{idx}", idx+100, "r{idx+100}", idx+1000, "v{idx+1000}")`; fails when any
    /// of the three integers leaves the `int` range
    pub fn derive(idx: usize) -> Result<Self> {
        let h1 = i32::try_from(idx).map_err(|_| row_out_of_range(idx))?;
        let r1 = h1.checked_add(100).ok_or_else(|| row_out_of_range(idx))?;
        let v1 = h1.checked_add(1000).ok_or_else(|| row_out_of_range(idx))?;
        Ok(Self {
            h1,
            h2: format!("h{h1}"),
            r1,
            r2: format!("r{r1}"),
            v1,
            v2: format!("v{v1}"),
        })
    }

    /// Rows `0..row_count`
    pub fn derive_all(row_count: usize) -> Result<Vec<Self>> {
        (0..row_count).map(Self::derive).collect()
    }

    /// Read the six standard columns back by name
    pub fn from_row(row: &Row) -> Result<Self> {
        let int = |name: &str| {
            row.get_int(name).ok_or_else(|| missing_column(name, row))
        };
        let text = |name: &str| {
            row.get_text(name)
                .map(str::to_string)
                .ok_or_else(|| missing_column(name, row))
        };
        Ok(Self {
            h1: int("h1")?,
            h2: text("h2")?,
            r1: int("r1")?,
            r2: text("r2")?,
            v1: int("v1")?,
            v2: text("v2")?,
        })
    }

    /// Fully interpolated literal INSERT
    pub fn insert_statement(
        &self,
        table: &str,
    ) -> String {
        format!(
            "INSERT INTO {table} (h1, h2, r1, r2, v1, v2) VALUES ({}, {}, {}, {}, {}, {})",
            self.h1,
            quote(&self.h2),
            self.r1,
            quote(&self.r2),
            self.v1,
            quote(&self.v2),
        )
    }
}

/// CQL string literal
pub(crate) fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn invalid_schema(reason: String) -> Error {
    Error::Fatal(format!("invalid fixture schema: {reason}"))
}

fn row_out_of_range(idx: usize) -> Error {
    Error::Fatal(format!("fixture row {idx} does not fit the int columns"))
}

fn missing_column(
    name: &str,
    row: &Row,
) -> Error {
    ProtocolError::unexpected(
        TABULAR,
        format!(
            "fixture column {name} missing or not of the fixture type in row {:?}",
            row.values()
        ),
    )
    .into()
}
