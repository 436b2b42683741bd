//! Core data model: typed cells, record batches, target tables and the
//! lifecycle of a watched file.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};

// ============================================================================
// Column types and cells
// ============================================================================

/// Declared type of a target column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

impl ColumnType {
    /// Coerce a raw field into a typed cell
    ///
    /// An empty field is NULL for every type. Non-text values are trimmed
    /// before parsing.
    pub fn coerce(self, raw: &str) -> std::result::Result<Cell, String> {
        let trimmed = raw.trim();
        let cell = match self {
            ColumnType::Text => Cell::Text((!raw.is_empty()).then(|| raw.to_string())),
            _ if trimmed.is_empty() => Cell::null(self),
            ColumnType::Integer => Cell::Integer(Some(
                trimmed
                    .parse::<i64>()
                    .map_err(|_| format!("'{}' is not an integer", raw))?,
            )),
            ColumnType::Float => Cell::Float(Some(
                trimmed
                    .parse::<f64>()
                    .map_err(|_| format!("'{}' is not a number", raw))?,
            )),
            ColumnType::Boolean => Cell::Boolean(Some(parse_bool(trimmed).ok_or_else(|| {
                format!("'{}' is not a boolean", raw)
            })?)),
            ColumnType::Date => Cell::Date(Some(
                NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                    .map_err(|_| format!("'{}' is not a YYYY-MM-DD date", raw))?,
            )),
            ColumnType::Timestamp => Cell::Timestamp(Some(
                TIMESTAMP_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                    .ok_or_else(|| format!("'{}' is not a timestamp", raw))?,
            )),
        };
        Ok(cell)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

impl std::str::FromStr for ColumnType {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" | "string" | "varchar" => Ok(ColumnType::Text),
            "integer" | "int" | "bigint" => Ok(ColumnType::Integer),
            "float" | "double" | "real" | "numeric" => Ok(ColumnType::Float),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            "timestamp" | "datetime" => Ok(ColumnType::Timestamp),
            other => Err(IngestError::Config(format!("unknown column type '{}'", other))),
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// One typed field value; `None` is SQL NULL of that type
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(Option<String>),
    Integer(Option<i64>),
    Float(Option<f64>),
    Boolean(Option<bool>),
    Date(Option<NaiveDate>),
    Timestamp(Option<NaiveDateTime>),
}

impl Cell {
    pub fn null(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Text => Cell::Text(None),
            ColumnType::Integer => Cell::Integer(None),
            ColumnType::Float => Cell::Float(None),
            ColumnType::Boolean => Cell::Boolean(None),
            ColumnType::Date => Cell::Date(None),
            ColumnType::Timestamp => Cell::Timestamp(None),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(Some(value.into()))
    }

    pub fn is_null(&self) -> bool {
        match self {
            Cell::Text(v) => v.is_none(),
            Cell::Integer(v) => v.is_none(),
            Cell::Float(v) => v.is_none(),
            Cell::Boolean(v) => v.is_none(),
            Cell::Date(v) => v.is_none(),
            Cell::Timestamp(v) => v.is_none(),
        }
    }
}

/// Declared column types, keyed by header name
///
/// Parsed from `name:type` pairs separated by commas, e.g.
/// `score:integer,enrolled:date`. Columns not listed are text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnTypes(BTreeMap<String, ColumnType>);

impl ColumnTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, column_type: ColumnType) -> Self {
        self.0.insert(column.into(), column_type);
        self
    }

    pub fn type_of(&self, column: &str) -> ColumnType {
        self.0.get(column).copied().unwrap_or_default()
    }
}

impl std::str::FromStr for ColumnTypes {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        let mut types = BTreeMap::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (column, column_type) = pair.split_once(':').ok_or_else(|| {
                IngestError::Config(format!("column type '{}' must look like name:type", pair))
            })?;
            let column = column.trim();
            if column.is_empty() {
                return Err(IngestError::Config(format!("column type '{}' has no column name", pair)));
            }
            types.insert(column.to_string(), column_type.parse()?);
        }
        Ok(Self(types))
    }
}

// ============================================================================
// Record batches
// ============================================================================

/// Ordered rows decoded from one file
///
/// Every row has exactly one cell per column, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl RecordBatch {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row, rejecting it when its arity differs from the header
    pub fn push_row(&mut self, row: Vec<Cell>) -> std::result::Result<(), String> {
        if row.len() != self.columns.len() {
            return Err(format!(
                "expected {} fields, found {}",
                self.columns.len(),
                row.len()
            ));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at `row` for the named column
    pub fn value(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Copy of this batch without the given columns, order otherwise kept
    pub fn without_columns(&self, excluded: &[String]) -> RecordBatch {
        let keep: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !excluded.iter().any(|e| e.eq_ignore_ascii_case(c)))
            .map(|(i, _)| i)
            .collect();

        RecordBatch {
            columns: keep.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| keep.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        }
    }
}

// ============================================================================
// Target table
// ============================================================================

/// The table rows are loaded into
///
/// Only the name is known; the schema stays owned by the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTable {
    name: String,
    exclude_columns: Vec<String>,
}

impl TargetTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exclude_columns: Vec::new(),
        }
    }

    pub fn with_excluded(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exclude_columns(&self) -> &[String] {
        &self.exclude_columns
    }

    /// Quoted, optionally schema-qualified identifier, e.g. `"public"."students"`
    pub fn quoted_name(&self) -> String {
        self.name
            .split('.')
            .map(quote_identifier)
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Quote a SQL identifier, doubling embedded quotes
pub fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

// ============================================================================
// Watched files
// ============================================================================

/// Processing state of a file seen in the watch directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Discovered,
    Stabilizing,
    Processing,
    Archived,
    Quarantined,
}

/// A file tracked from discovery until it is archived or quarantined
#[derive(Debug, Clone, PartialEq)]
pub struct WatchedFile {
    pub path: PathBuf,
    pub discovered_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub state: FileState,
}

impl WatchedFile {
    pub fn discovered(path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            path: path.into(),
            discovered_at: now,
            last_event_at: now,
            state: FileState::Discovered,
        }
    }

    pub fn touch(&mut self) {
        self.last_event_at = Utc::now();
    }

    /// Time since the last filesystem event, or since discovery for a
    /// file that never saw a second event
    pub fn quiet_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_event_at.max(self.discovered_at)
    }
}

/// Lossy base name of a path, empty when it has none
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_from_str() {
        assert_eq!("INT".parse::<ColumnType>().unwrap(), ColumnType::Integer);
        assert_eq!("varchar".parse::<ColumnType>().unwrap(), ColumnType::Text);
        assert_eq!("datetime".parse::<ColumnType>().unwrap(), ColumnType::Timestamp);
        assert!("blob".parse::<ColumnType>().is_err());
    }

    #[test]
    fn test_coerce_integer() {
        assert_eq!(ColumnType::Integer.coerce(" 90 ").unwrap(), Cell::Integer(Some(90)));
        assert_eq!(ColumnType::Integer.coerce("").unwrap(), Cell::Integer(None));
        assert!(ColumnType::Integer.coerce("ninety").is_err());
        assert!(ColumnType::Integer.coerce("90.5").is_err());
    }

    #[test]
    fn test_coerce_text_keeps_whitespace() {
        assert_eq!(ColumnType::Text.coerce(" Ann ").unwrap(), Cell::text(" Ann "));
        assert!(ColumnType::Text.coerce("").unwrap().is_null());
    }

    #[test]
    fn test_coerce_boolean_date_timestamp() {
        assert_eq!(ColumnType::Boolean.coerce("Yes").unwrap(), Cell::Boolean(Some(true)));
        assert_eq!(ColumnType::Boolean.coerce("0").unwrap(), Cell::Boolean(Some(false)));
        assert!(ColumnType::Boolean.coerce("maybe").is_err());

        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(ColumnType::Date.coerce("2024-02-29").unwrap(), Cell::Date(Some(date)));
        assert!(ColumnType::Date.coerce("2023-02-29").is_err());

        let ts = ColumnType::Timestamp.coerce("2024-02-29T08:15:00").unwrap();
        assert_eq!(
            ts,
            Cell::Timestamp(Some(date.and_hms_opt(8, 15, 0).unwrap()))
        );
    }

    #[test]
    fn test_column_types_parse() {
        let types: ColumnTypes = "score:integer, enrolled : date".parse().unwrap();
        assert_eq!(types.type_of("score"), ColumnType::Integer);
        assert_eq!(types.type_of("enrolled"), ColumnType::Date);
        assert_eq!(types.type_of("name"), ColumnType::Text);

        assert!("score".parse::<ColumnTypes>().is_err());
        assert!(":integer".parse::<ColumnTypes>().is_err());
        assert!("score:money".parse::<ColumnTypes>().is_err());
        assert_eq!("".parse::<ColumnTypes>().unwrap(), ColumnTypes::new());
    }

    #[test]
    fn test_push_row_rejects_partial_rows() {
        let mut batch = RecordBatch::new(vec!["name".into(), "score".into()]);
        assert!(batch.push_row(vec![Cell::text("Ann"), Cell::text("90")]).is_ok());
        assert!(batch.push_row(vec![Cell::text("Bo")]).is_err());
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_without_columns_drops_excluded_case_insensitively() {
        let mut batch = RecordBatch::new(vec!["ID".into(), "name".into(), "score".into()]);
        batch
            .push_row(vec![Cell::text("7"), Cell::text("Ann"), Cell::text("90")])
            .unwrap();

        let projected = batch.without_columns(&["id".to_string()]);
        assert_eq!(projected.columns(), ["name", "score"]);
        assert_eq!(projected.value(0, "name"), Some(&Cell::text("Ann")));
        assert_eq!(projected.value(0, "ID"), None);
    }

    #[test]
    fn test_target_table_quoting() {
        assert_eq!(TargetTable::new("students").quoted_name(), "\"students\"");
        assert_eq!(
            TargetTable::new("public.students").quoted_name(),
            "\"public\".\"students\""
        );
        assert_eq!(quote_identifier("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_watched_file_quiet_since_last_event() {
        let mut file = WatchedFile::discovered("dropbox/a.csv");
        assert_eq!(file.state, FileState::Discovered);
        assert_eq!(file.discovered_at, file.last_event_at);

        file.last_event_at = file.discovered_at + chrono::Duration::milliseconds(400);
        let now = file.discovered_at + chrono::Duration::milliseconds(1_400);
        assert_eq!(file.quiet_for(now), chrono::Duration::seconds(1));
    }
}
