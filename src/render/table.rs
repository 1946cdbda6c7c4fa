use std::borrow::Cow;
use std::path::Path;

use crate::entities::table::{Cell, Table};
use crate::error::HarvestError;

fn cell_text<'a>(cell: &'a Cell, null_marker: &'a str) -> Cow<'a, str> {
    match cell {
        Cell::Null | Cell::Value(serde_json::Value::Null) => Cow::Borrowed(null_marker),
        Cell::Value(serde_json::Value::String(s)) => Cow::Borrowed(s.as_str()),
        Cell::Value(serde_json::Value::Bool(b)) => Cow::Owned(b.to_string()),
        Cell::Value(serde_json::Value::Number(n)) => Cow::Owned(n.to_string()),
        Cell::Value(other) => Cow::Owned(other.to_string()),
    }
}

/// CSV with a leading unnamed row-index column (0-based), then one column per table column.
/// Nested upstream values are written as compact JSON.
pub fn to_csv(table: &Table, null_marker: &str) -> Result<Vec<u8>, HarvestError> {
    let mut wtr = ::csv::WriterBuilder::new().from_writer(Vec::new());

    let mut header: Vec<&str> = Vec::with_capacity(table.columns.len() + 1);
    header.push("");
    header.extend(table.columns.iter().map(String::as_str));
    wtr.write_record(&header)?;

    for (index, row) in table.rows.iter().enumerate() {
        let mut record: Vec<Cow<'_, str>> = Vec::with_capacity(row.len() + 1);
        record.push(Cow::Owned(index.to_string()));
        record.extend(row.iter().map(|cell| cell_text(cell, null_marker)));
        wtr.write_record(record.iter().map(|field| field.as_bytes()))?;
    }

    wtr.into_inner().map_err(|err| {
        let inner = err.error();
        HarvestError::Io(std::io::Error::new(inner.kind(), inner.to_string()))
    })
}

pub async fn write_csv(path: &Path, table: &Table, null_marker: &str) -> Result<(), HarvestError> {
    let bytes = to_csv(table, null_marker)?;
    crate::utils::fs::save_atomic(path, &bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table {
            columns: vec!["dc:title".into(), "citedby-count".into(), "authors".into()],
            rows: vec![
                vec![
                    Cell::text("Audit, \"learning\""),
                    Cell::text("12"),
                    Cell::text("Jane Doe|Roe"),
                ],
                vec![Cell::text(""), Cell::Value(serde_json::json!(0)), Cell::Null],
            ],
        }
    }

    #[test]
    fn to_csv_writes_index_column_and_quotes() {
        let out = String::from_utf8(to_csv(&table(), "").expect("csv")).expect("utf8");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], ",dc:title,citedby-count,authors");
        assert_eq!(lines[1], "0,\"Audit, \"\"learning\"\"\",12,Jane Doe|Roe");
        assert_eq!(lines[2], "1,,0,");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn null_marker_distinguishes_null_from_empty_string() {
        let out = String::from_utf8(to_csv(&table(), "NA").expect("csv")).expect("utf8");
        assert!(out.lines().any(|line| line == "1,,0,NA"));
    }

    #[test]
    fn nested_values_are_compact_json() {
        let t = Table {
            columns: vec!["link".into(), "openaccessFlag".into()],
            rows: vec![vec![
                Cell::Value(serde_json::json!([{"@ref": "self"}])),
                Cell::Value(serde_json::json!(true)),
            ]],
        };
        let out = String::from_utf8(to_csv(&t, "").expect("csv")).expect("utf8");
        assert!(out.contains(r#"0,"[{""@ref"":""self""}]",true"#));
    }

    #[test]
    fn empty_table_has_header_only() {
        let t = Table {
            columns: vec!["dc:title".into()],
            rows: Vec::new(),
        };
        let out = String::from_utf8(to_csv(&t, "").expect("csv")).expect("utf8");
        assert_eq!(out, ",dc:title\n");
    }

    #[tokio::test]
    async fn write_csv_persists_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("result.csv");
        write_csv(&path, &table(), "").await.expect("write");
        let written = std::fs::read_to_string(&path).expect("read");
        assert!(written.starts_with(",dc:title"));
    }
}
