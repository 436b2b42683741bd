//! Delimited-file decoding into typed record batches

use std::collections::HashSet;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::config::TableConfig;
use crate::error::{IngestError, Result};
use crate::types::{ColumnTypes, RecordBatch};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decodes a header line plus positional records into a [`RecordBatch`]
#[derive(Debug, Clone)]
pub struct RecordParser {
    delimiter: u8,
    column_types: ColumnTypes,
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::new(b',', ColumnTypes::default())
    }
}

impl RecordParser {
    pub fn new(delimiter: u8, column_types: ColumnTypes) -> Self {
        Self {
            delimiter,
            column_types,
        }
    }

    pub fn from_config(table: &TableConfig) -> Self {
        Self::new(table.delimiter, table.column_types.clone())
    }

    /// Read and decode the file at `path`
    pub async fn parse(&self, path: &Path) -> Result<RecordBatch> {
        let data = read_file(path).await?;
        self.parse_bytes(path, &data)
    }

    /// Decode already-read file content; `path` only labels errors
    ///
    /// A file with no content at all yields an empty batch without columns.
    pub fn parse_bytes(&self, path: &Path, data: &[u8]) -> Result<RecordBatch> {
        let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);

        let text = std::str::from_utf8(data).map_err(|e| {
            IngestError::malformed(
                path,
                format!("not valid UTF-8 at byte offset {}", e.valid_up_to()),
            )
        })?;

        if text.trim().is_empty() {
            debug!(path = %path.display(), "File has no content");
            return Ok(RecordBatch::default());
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(false)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| IngestError::malformed(path, describe_csv_error(&e)))?
            .clone();
        let columns = validate_header(path, &headers)?;
        let types: Vec<_> = columns
            .iter()
            .map(|c| self.column_types.type_of(c))
            .collect();

        let mut batch = RecordBatch::new(columns.clone());
        for record in reader.records() {
            let record = record.map_err(|e| IngestError::malformed(path, describe_csv_error(&e)))?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();

            let row = record
                .iter()
                .zip(types.iter())
                .zip(columns.iter())
                .map(|((raw, column_type), column)| {
                    column_type.coerce(raw).map_err(|reason| {
                        IngestError::malformed(
                            path,
                            format!("line {}, column '{}': {}", line, column, reason),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            batch
                .push_row(row)
                .map_err(|reason| IngestError::malformed(path, format!("line {}: {}", line, reason)))?;
        }

        debug!(
            path = %path.display(),
            columns = batch.columns().len(),
            rows = batch.len(),
            "Parsed file"
        );

        Ok(batch)
    }
}

/// Read a whole file, reporting a missing file as vanished
pub async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => IngestError::FileVanished {
            path: path.to_path_buf(),
        },
        _ => IngestError::Io(e),
    })
}

fn validate_header(path: &Path, headers: &csv::StringRecord) -> Result<Vec<String>> {
    let columns: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();

    if columns.iter().all(String::is_empty) {
        return Err(IngestError::malformed(path, "header line is empty"));
    }
    if let Some(position) = columns.iter().position(String::is_empty) {
        return Err(IngestError::malformed(
            path,
            format!("header column {} has no name", position + 1),
        ));
    }

    let mut seen = HashSet::new();
    for column in &columns {
        if !seen.insert(column.as_str()) {
            return Err(IngestError::malformed(
                path,
                format!("duplicate column name '{}' in header", column),
            ));
        }
    }

    Ok(columns)
}

fn describe_csv_error(err: &csv::Error) -> String {
    match err.kind() {
        csv::ErrorKind::UnequalLengths {
            pos,
            expected_len,
            len,
        } => match pos {
            Some(pos) => format!(
                "line {}: expected {} fields, found {}",
                pos.line(),
                expected_len,
                len
            ),
            None => format!("expected {} fields, found {}", expected_len, len),
        },
        _ => err.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{Cell, ColumnType};

    fn parse(data: &str) -> Result<RecordBatch> {
        RecordParser::default().parse_bytes(Path::new("dropbox/test.csv"), data.as_bytes())
    }

    fn malformed_reason(result: Result<RecordBatch>) -> String {
        match result {
            Err(IngestError::MalformedFile { reason, .. }) => reason,
            other => panic!("expected MalformedFile, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_students() {
        let batch = parse("name,score\nAnn,90\nBo,75\n").unwrap();
        assert_eq!(batch.columns(), ["name", "score"]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.value(1, "name"), Some(&Cell::text("Bo")));
        assert_eq!(batch.value(1, "score"), Some(&Cell::text("75")));
    }

    #[test]
    fn test_header_only_is_empty_batch() {
        let batch = parse("name,score\n").unwrap();
        assert_eq!(batch.columns().len(), 2);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_empty_file_is_empty_batch() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("  \n\n").unwrap().columns().is_empty());
    }

    #[test]
    fn test_arity_mismatch_reports_line() {
        let reason = malformed_reason(parse("name,score\nAnn,90\nBo,75,extra\n"));
        assert!(reason.contains("line 3"), "{}", reason);
        assert!(reason.contains("expected 2 fields, found 3"), "{}", reason);

        let reason = malformed_reason(parse("name,score\nAnn\n"));
        assert!(reason.contains("found 1"), "{}", reason);
    }

    #[test]
    fn test_header_problems() {
        assert!(malformed_reason(parse("name,name\nAnn,Bo\n")).contains("duplicate"));
        assert!(malformed_reason(parse("name,,score\nAnn,x,1\n")).contains("column 2"));
        assert!(malformed_reason(parse(",\n1,2\n")).contains("empty"));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let result = RecordParser::default()
            .parse_bytes(Path::new("bad.csv"), b"name,score\nAnn,\xff\xfe\n");
        assert!(malformed_reason(result).contains("UTF-8"));
    }

    #[test]
    fn test_bom_and_header_whitespace_tolerated() {
        let batch = parse("\u{feff} name , score\nAnn,90\n").unwrap();
        assert_eq!(batch.columns(), ["name", "score"]);
    }

    #[test]
    fn test_quoted_fields() {
        let batch = parse("name,comment\n\"Smith, Ann\",\"said \"\"hi\"\"\"\n").unwrap();
        assert_eq!(batch.value(0, "name"), Some(&Cell::text("Smith, Ann")));
        assert_eq!(batch.value(0, "comment"), Some(&Cell::text("said \"hi\"")));
    }

    #[test]
    fn test_declared_types_coerced() {
        let parser = RecordParser::new(
            b';',
            ColumnTypes::new().with("score", ColumnType::Integer),
        );
        let batch = parser
            .parse_bytes(Path::new("t.csv"), b"name;score\nAnn;90\nBo;\n")
            .unwrap();
        assert_eq!(batch.value(0, "score"), Some(&Cell::Integer(Some(90))));
        assert_eq!(batch.value(1, "score"), Some(&Cell::Integer(None)));

        let result = parser.parse_bytes(Path::new("t.csv"), b"name;score\nAnn;ninety\n");
        let reason = malformed_reason(result);
        assert!(reason.contains("line 2"), "{}", reason);
        assert!(reason.contains("'score'"), "{}", reason);
    }

    #[tokio::test]
    async fn test_missing_file_is_vanished() {
        let dir = tempfile::tempdir().unwrap();
        let result = RecordParser::default().parse(&dir.path().join("gone.csv")).await;
        assert!(matches!(result, Err(IngestError::FileVanished { .. })));
    }
}
