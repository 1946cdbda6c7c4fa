use std::borrow::Cow;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::HarvestError;
use crate::sources::cache::{CachedFetcher, QueryParams, Response};

pub(crate) const CROSSREF_BASE: &str = "https://api.crossref.org";
pub(crate) const CROSSREF_API: &str = "crossref";
pub(crate) const CROSSREF_BASE_ENV: &str = "SCOPUS_HARVEST_CROSSREF_BASE";

pub struct CrossrefClient {
    fetcher: Arc<CachedFetcher>,
    base: Cow<'static, str>,
    mailto: Option<String>,
}

impl CrossrefClient {
    pub fn new(
        fetcher: Arc<CachedFetcher>,
        base: impl Into<Cow<'static, str>>,
        mailto: Option<String>,
    ) -> Self {
        Self {
            fetcher,
            base: base.into(),
            mailto: mailto
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty()),
        }
    }

    /// `{base}/works/{doi}` with every DOI segment percent-encoded. DOIs may contain `#`, `?`
    /// or `%`, which would otherwise end the path early.
    fn work_url(&self, doi: &str) -> Result<String, HarvestError> {
        let mut url = reqwest::Url::parse(self.base.as_ref()).map_err(|err| {
            HarvestError::InvalidArgument(format!("Invalid Crossref base URL {}: {err}", self.base))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                HarvestError::InvalidArgument(format!(
                    "Crossref base URL cannot take a path: {}",
                    self.base
                ))
            })?
            .pop_if_empty()
            .push("works")
            .extend(doi.split('/'));
        Ok(url.into())
    }

    /// Raw `works/{doi}` response. The status is left for the caller to inspect.
    pub async fn work(&self, doi: &str) -> Result<Response, HarvestError> {
        let doi = doi.trim();
        if doi.is_empty() {
            return Err(HarvestError::InvalidArgument("DOI is required".into()));
        }

        let mut params = QueryParams::new();
        if let Some(mailto) = self.mailto.as_deref() {
            params = params.set("mailto", mailto);
        }
        self.fetcher.fetch(&self.work_url(doi)?, &params).await
    }
}

#[derive(Debug, Deserialize)]
pub struct CrossrefWorkResponse {
    pub message: Option<CrossrefWork>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CrossrefWork {
    pub author: Option<Vec<CrossrefAuthor>>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
}

/// One author sub-record. Any subset of the name fields may be present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefAuthor {
    pub given: Option<String>,
    pub family: Option<String>,
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
