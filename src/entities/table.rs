use std::sync::Arc;

use tracing::info;

use crate::error::HarvestError;
use crate::sources::scopus::ScopusEntry;

const PROGRESS_EVERY: usize = 100;

/// One table cell. `Null` is distinct from an empty string, zero, or an upstream JSON `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Value(serde_json::Value),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Value(serde_json::Value::String(value.into()))
    }
}

impl From<Option<String>> for Cell {
    fn from(value: Option<String>) -> Self {
        value.map(Self::text).unwrap_or(Self::Null)
    }
}

/// Produces one column of the table. The column is named by [`FieldExtractor::name`].
///
/// Recoverable per-row problems become `Ok(Cell::Null)`; an `Err` aborts the whole table.
#[async_trait::async_trait]
pub trait FieldExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, entry: &ScopusEntry) -> Result<Cell, HarvestError>;
}

/// Direct key lookup; the upstream value is kept as-is, a missing key is `Null`.
#[derive(Debug, Clone)]
pub struct KeyField(String);

impl KeyField {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

#[async_trait::async_trait]
impl FieldExtractor for KeyField {
    fn name(&self) -> &str {
        &self.0
    }

    async fn extract(&self, entry: &ScopusEntry) -> Result<Cell, HarvestError> {
        Ok(entry
            .get(&self.0)
            .cloned()
            .map(Cell::Value)
            .unwrap_or(Cell::Null))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Applies every extractor to every entry: one row per entry and one column per extractor,
/// both in input order. Extractors run sequentially.
///
/// # Errors
///
/// Returns the first extractor error; no partial table is produced.
pub async fn assemble(
    entries: &[ScopusEntry],
    extractors: &[Arc<dyn FieldExtractor>],
) -> Result<Table, HarvestError> {
    let columns: Vec<String> = extractors.iter().map(|e| e.name().to_string()).collect();
    info!(rows = entries.len(), columns = columns.len(), "Assembling table");

    let mut rows = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let mut row = Vec::with_capacity(extractors.len());
        for extractor in extractors {
            row.push(extractor.extract(entry).await?);
        }
        rows.push(row);

        let done = index + 1;
        if done % PROGRESS_EVERY == 0 || done == entries.len() {
            info!(done, total = entries.len(), "Table progress");
        }
    }

    Ok(Table { columns, rows })
}
