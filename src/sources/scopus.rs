use std::borrow::Cow;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entities::SearchPage;
use crate::entities::paginate::PageSource;
use crate::error::HarvestError;
use crate::sources::cache::{CachedFetcher, QueryParams};

pub(crate) const SCOPUS_BASE: &str = "https://api.elsevier.com/content/search/scopus";
const SCOPUS_API: &str = "scopus";
pub(crate) const SCOPUS_BASE_ENV: &str = "SCOPUS_HARVEST_SCOPUS_BASE";
pub(crate) const SCOPUS_API_KEY_ENV: &str = "SCOPUS_API_KEY";
pub(crate) const SCOPUS_DOCS_URL: &str = "https://dev.elsevier.com/apikey/manage";
pub(crate) const SCOPUS_MAX_PAGE_SIZE: usize = 200;

/// Search inputs shared by every page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopusQuery {
    pub query: String,
    pub subject: Option<String>,
    pub date: Option<String>,
}

pub struct ScopusClient {
    fetcher: Arc<CachedFetcher>,
    base: Cow<'static, str>,
    api_key: String,
    query: ScopusQuery,
}

impl ScopusClient {
    pub fn new(
        fetcher: Arc<CachedFetcher>,
        base: impl Into<Cow<'static, str>>,
        api_key: &str,
        query: ScopusQuery,
    ) -> Result<Self, HarvestError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(HarvestError::ApiKeyRequired {
                api: SCOPUS_API.into(),
                env_var: SCOPUS_API_KEY_ENV.into(),
                docs_url: SCOPUS_DOCS_URL.into(),
            });
        }
        if query.query.trim().is_empty() {
            return Err(HarvestError::InvalidArgument(
                "Query is required for Scopus search".into(),
            ));
        }
        Ok(Self {
            fetcher,
            base: base.into(),
            api_key: api_key.to_string(),
            query,
        })
    }

    fn params(&self, start: usize, count: usize) -> QueryParams {
        let mut params = QueryParams::new()
            .secret("apiKey", self.api_key.as_str())
            .set("query", self.query.query.as_str())
            .set("httpAccept", "application/json");
        if let Some(subject) = self.query.subject.as_deref() {
            params = params.set("subj", subject);
        }
        if let Some(date) = self.query.date.as_deref() {
            params = params.set("date", date);
        }
        params.set("start", start).set("count", count)
    }

    /// Fetches one page of search results.
    ///
    /// # Errors
    ///
    /// Non-2xx responses are [`HarvestError::Upstream`]; there is no partial recovery.
    pub async fn search(
        &self,
        start: usize,
        count: usize,
    ) -> Result<ScopusSearchResults, HarvestError> {
        if count == 0 || count > SCOPUS_MAX_PAGE_SIZE {
            return Err(HarvestError::InvalidArgument(format!(
                "Scopus page size must be between 1 and {SCOPUS_MAX_PAGE_SIZE}"
            )));
        }

        let resp = self
            .fetcher
            .fetch(self.base.as_ref(), &self.params(start, count))
            .await?;
        if !resp.is_success() {
            return Err(HarvestError::Upstream {
                api: SCOPUS_API.to_string(),
                status: resp.status,
                body: resp.body_excerpt(),
            });
        }
        let parsed: ScopusSearchResponse = resp.json(SCOPUS_API)?;
        Ok(parsed.search_results)
    }
}

#[async_trait::async_trait]
impl PageSource for ScopusClient {
    type Item = ScopusEntry;

    async fn fetch_page(
        &self,
        start: usize,
        count: usize,
    ) -> Result<SearchPage<ScopusEntry>, HarvestError> {
        let results = self.search(start, count).await?;
        let total = results.total_results().ok_or_else(|| HarvestError::ApiJson {
            api: SCOPUS_API.to_string(),
            source: <serde_json::Error as serde::de::Error>::custom(
                "missing or non-numeric opensearch:totalResults",
            ),
        })?;
        Ok(SearchPage::offset(results.entry, Some(total)))
    }
}

#[derive(Debug, Deserialize)]
pub struct ScopusSearchResponse {
    #[serde(rename = "search-results")]
    pub search_results: ScopusSearchResults,
}

#[derive(Debug, Deserialize)]
pub struct ScopusSearchResults {
    #[serde(rename = "opensearch:totalResults")]
    pub total_results: Option<serde_json::Value>,
    #[serde(default)]
    pub entry: Vec<ScopusEntry>,
}

impl ScopusSearchResults {
    /// Scopus reports the count as a string; numbers are accepted too.
    pub fn total_results(&self) -> Option<usize> {
        match self.total_results.as_ref()? {
            serde_json::Value::String(s) => s.trim().parse().ok(),
            serde_json::Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
            _ => None,
        }
    }
}

/// One search result. The upstream shape is open-ended, so every key is kept; the keys the
/// pipeline depends on have typed optional accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopusEntry {
    fields: serde_json::Map<String, serde_json::Value>,
}

impl ScopusEntry {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn doi(&self) -> Option<&str> {
        self.str_field("prism:doi")
    }

    pub fn title(&self) -> Option<&str> {
        self.str_field("dc:title")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::cache::tests::test_fetcher;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn query() -> ScopusQuery {
        ScopusQuery {
            query: "ALL(learn) AND TITLE-ABS-KEY(auditing)".into(),
            subject: Some("BUSI".into()),
            date: Some("2002-2022".into()),
        }
    }

    #[tokio::test]
    async fn search_sets_expected_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/scopus"))
            .and(query_param("apiKey", "secret"))
            .and(query_param("query", "ALL(learn) AND TITLE-ABS-KEY(auditing)"))
            .and(query_param("httpAccept", "application/json"))
            .and(query_param("subj", "BUSI"))
            .and(query_param("date", "2002-2022"))
            .and(query_param("start", "25"))
            .and(query_param("count", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "search-results": {
                    "opensearch:totalResults": "35",
                    "entry": [{"dc:title": "A", "prism:doi": "10.1/a"}]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().expect("tempdir");
        let client = ScopusClient::new(
            test_fetcher(tmp.path()),
            format!("{}/search/scopus", server.uri()),
            "secret",
            query(),
        )
        .expect("client");
        let page = client.fetch_page(25, 10).await.expect("page");
        assert_eq!(page.total, Some(35));
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].doi(), Some("10.1/a"));
        assert_eq!(page.results[0].title(), Some("A"));
    }

    #[tokio::test]
    async fn search_non_success_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/scopus"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(serde_json::json!({
                    "service-error": {"status": {"statusCode": "AUTHENTICATION_ERROR"}}
                })),
            )
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().expect("tempdir");
        let client = ScopusClient::new(
            test_fetcher(tmp.path()),
            format!("{}/search/scopus", server.uri()),
            "bad",
            query(),
        )
        .expect("client");
        let err = client.search(0, 25).await.expect_err("401 should fail");
        match err {
            HarvestError::Upstream { status, body, .. } => {
                assert_eq!(status, 401);
                assert!(body.contains("AUTHENTICATION_ERROR"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_total_is_json_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/scopus"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "search-results": {"entry": []}
            })))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().expect("tempdir");
        let client = ScopusClient::new(
            test_fetcher(tmp.path()),
            format!("{}/search/scopus", server.uri()),
            "k",
            query(),
        )
        .expect("client");
        let err = client.fetch_page(0, 25).await.expect_err("no total");
        assert!(matches!(err, HarvestError::ApiJson { .. }));
    }

    #[tokio::test]
    async fn corrected_api_key_is_not_served_the_cached_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/scopus"))
            .and(query_param("apiKey", "bad"))
            .respond_with(ResponseTemplate::new(401).set_body_string("APIKEY_INVALID"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/scopus"))
            .and(query_param("apiKey", "good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "search-results": {
                    "opensearch:totalResults": "1",
                    "entry": [{"dc:title": "A"}]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().expect("tempdir");
        let base = format!("{}/search/scopus", server.uri());
        let with_key = |key: &str| {
            ScopusClient::new(test_fetcher(tmp.path()), base.clone(), key, query())
                .expect("client")
        };

        let err = with_key("bad")
            .fetch_page(0, 25)
            .await
            .expect_err("bad key should fail");
        assert!(matches!(err, HarvestError::Upstream { status: 401, .. }));

        let page = with_key("good").fetch_page(0, 25).await.expect("good key");
        assert_eq!(page.total, Some(1));

        let cached = std::fs::read_dir(tmp.path())
            .expect("cache root")
            .filter_map(Result::ok)
            .flat_map(|shard| std::fs::read_dir(shard.path()).into_iter().flatten())
            .filter_map(Result::ok)
            .map(|entry| std::fs::read_to_string(entry.path()).expect("entry"))
            .collect::<Vec<_>>();
        assert_eq!(cached.len(), 2);
        assert!(
            cached
                .iter()
                .all(|entry| !entry.contains("\"good\"") && !entry.contains("\"bad\""))
        );
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = ScopusClient::new(
            test_fetcher(tmp.path()),
            "http://127.0.0.1",
            "   ",
            query(),
        )
        .err()
        .expect("empty key should fail");
        assert!(err.to_string().contains(SCOPUS_API_KEY_ENV));
    }

    #[test]
    fn entry_accessors_treat_blank_doi_as_missing() {
        let entry: ScopusEntry = serde_json::from_value(serde_json::json!({
            "prism:doi": "  ",
            "citedby-count": "4"
        }))
        .expect("entry");
        assert_eq!(entry.doi(), None);
        assert_eq!(entry.get("citedby-count"), Some(&serde_json::json!("4")));
    }

    #[test]
    fn total_results_accepts_string_and_number() {
        let as_string = ScopusSearchResults {
            total_results: Some(serde_json::json!("60")),
            entry: Vec::new(),
        };
        let as_number = ScopusSearchResults {
            total_results: Some(serde_json::json!(60)),
            entry: Vec::new(),
        };
        assert_eq!(as_string.total_results(), Some(60));
        assert_eq!(as_number.total_results(), Some(60));
    }
}
