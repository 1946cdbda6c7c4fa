use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::entities::table::{Cell, FieldExtractor};
use crate::error::HarvestError;
use crate::sources::crossref::{CROSSREF_API, CrossrefClient, CrossrefWork, CrossrefWorkResponse};
use crate::sources::scopus::ScopusEntry;
use crate::transform::work::{clean_abstract, join_authors};

pub const AUTHORS_FIELD: &str = "authors";
pub const ABSTRACT_FIELD: &str = "abstract";

/// A per-row enrichment problem. The affected cell is null; the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichmentFailure {
    pub doi: String,
    pub field: String,
    pub reason: String,
}

/// Pulls author and abstract metadata from Crossref, keyed by each entry's DOI.
pub struct Enricher {
    crossref: CrossrefClient,
    clean_abstracts: bool,
    failures: Mutex<Vec<EnrichmentFailure>>,
}

impl Enricher {
    pub fn new(crossref: CrossrefClient, clean_abstracts: bool) -> Self {
        Self {
            crossref,
            clean_abstracts,
            failures: Mutex::new(Vec::new()),
        }
    }

    pub async fn failures(&self) -> Vec<EnrichmentFailure> {
        self.failures.lock().await.clone()
    }

    async fn record(&self, doi: &str, field: &str, reason: String) {
        self.failures.lock().await.push(EnrichmentFailure {
            doi: doi.to_string(),
            field: field.to_string(),
            reason,
        });
    }

    /// `Ok(None)` for any non-2xx status or unparseable body; only transport errors are `Err`.
    async fn work(&self, doi: &str, field: &str) -> Result<Option<CrossrefWork>, HarvestError> {
        let resp = self.crossref.work(doi).await?;
        if !resp.is_success() {
            let body = resp.body_excerpt();
            warn!(
                doi,
                field,
                status = resp.status,
                body = %body,
                "Couldn't get Crossref metadata"
            );
            self.record(doi, field, format!("HTTP {}: {body}", resp.status))
                .await;
            return Ok(None);
        }

        match resp.json::<CrossrefWorkResponse>(CROSSREF_API) {
            Ok(parsed) => {
                if parsed.message.is_none() {
                    self.record(doi, field, "response has no message".into())
                        .await;
                }
                Ok(parsed.message)
            }
            Err(err) => {
                warn!(doi, field, "Unusable Crossref metadata: {err}");
                self.record(doi, field, err.to_string()).await;
                Ok(None)
            }
        }
    }

    /// Author names joined with `|`; `None` when the entry has no DOI or Crossref has no
    /// author list.
    pub async fn authors(&self, entry: &ScopusEntry) -> Result<Option<String>, HarvestError> {
        let Some(doi) = entry.doi() else {
            return Ok(None);
        };
        let Some(work) = self.work(doi, AUTHORS_FIELD).await? else {
            return Ok(None);
        };
        match work.author {
            Some(authors) => Ok(Some(join_authors(&authors))),
            None => {
                debug!(doi, "Crossref record has no author list");
                self.record(doi, AUTHORS_FIELD, "no author list".into())
                    .await;
                Ok(None)
            }
        }
    }

    pub async fn abstract_text(
        &self,
        entry: &ScopusEntry,
    ) -> Result<Option<String>, HarvestError> {
        let Some(doi) = entry.doi() else {
            return Ok(None);
        };
        let Some(work) = self.work(doi, ABSTRACT_FIELD).await? else {
            return Ok(None);
        };
        match work.abstract_text {
            Some(text) if self.clean_abstracts => Ok(Some(clean_abstract(&text))),
            Some(text) => Ok(Some(text)),
            None => {
                debug!(
                    doi,
                    title = entry.title().unwrap_or_default(),
                    "Crossref record has no abstract"
                );
                self.record(doi, ABSTRACT_FIELD, "no abstract".into()).await;
                Ok(None)
            }
        }
    }
}

pub struct AuthorsField(pub Arc<Enricher>);

#[async_trait::async_trait]
impl FieldExtractor for AuthorsField {
    fn name(&self) -> &str {
        AUTHORS_FIELD
    }

    async fn extract(&self, entry: &ScopusEntry) -> Result<Cell, HarvestError> {
        Ok(Cell::from(self.0.authors(entry).await?))
    }
}

pub struct AbstractField(pub Arc<Enricher>);

#[async_trait::async_trait]
impl FieldExtractor for AbstractField {
    fn name(&self) -> &str {
        ABSTRACT_FIELD
    }

    async fn extract(&self, entry: &ScopusEntry) -> Result<Cell, HarvestError> {
        Ok(Cell::from(self.0.abstract_text(entry).await?))
    }
}
