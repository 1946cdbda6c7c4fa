//! Command-line surface: flag parsing and the harvest pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crate::entities::enrich::{AbstractField, AuthorsField, Enricher};
use crate::entities::headers;
use crate::entities::table::{FieldExtractor, KeyField, assemble};
use crate::render::table::write_csv;
use crate::sources::cache::{CachedFetcher, FsStore};
use crate::sources::crossref::CrossrefClient;
use crate::sources::scopus::{ScopusClient, ScopusQuery};
use crate::sources::{Endpoints, HttpConfig, build_client};
use crate::utils::date::validate_year_range;

const DEFAULT_QUERY: &str = "ALL(learn) AND TITLE-ABS-KEY(auditing)";

/// Columns copied straight from each search result, in output order.
const KEY_FIELDS: &[&str] = &[
    "dc:title",
    "prism:publicationName",
    "prism:volume",
    "prism:coverDate",
    "subtypeDescription",
    "citedby-count",
    "prism:doi",
    "dc:creator",
];

#[derive(Parser, Debug)]
#[command(
    name = "scopus-harvest",
    version,
    about = "Harvest Scopus search results, enrich them from Crossref, and write a CSV table"
)]
pub struct Cli {
    /// Re-run the search even when a headers snapshot exists
    #[arg(long)]
    pub update_headers: bool,

    /// Headers snapshot (raw search results as JSON)
    #[arg(long, default_value = "headers.json")]
    pub headers: PathBuf,

    /// Output CSV path
    #[arg(short, long, default_value = "result.csv")]
    pub output: PathBuf,

    /// Root directory of the persistent response cache
    #[arg(long, default_value = "cache")]
    pub cache_dir: PathBuf,

    /// Scopus API key
    #[arg(long, env = "SCOPUS_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Scopus search query
    #[arg(short, long, default_value = DEFAULT_QUERY)]
    pub query: String,

    /// Scopus subject area filter; empty to omit
    #[arg(long, default_value = "BUSI")]
    pub subject: String,

    /// Publication year or inclusive range (YYYY or YYYY-YYYY); empty to omit
    #[arg(long, default_value = "2002-2022")]
    pub date: String,

    /// Results per search page
    #[arg(long, default_value_t = 25, value_parser = clap::value_parser!(u16).range(1..=200))]
    pub page_size: u16,

    /// Contact address sent to Crossref
    #[arg(long, env = "CROSSREF_MAILTO")]
    pub mailto: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_secs: u64,

    /// Retries for transient transport failures
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Strip markup from abstracts and collapse whitespace
    #[arg(long)]
    pub clean_abstracts: bool,

    /// Text written for cells with no value
    #[arg(long, default_value = "")]
    pub null_marker: String,
}

impl Cli {
    fn scopus_query(&self) -> Result<ScopusQuery, crate::error::HarvestError> {
        let subject = Some(self.subject.trim().to_string()).filter(|s| !s.is_empty());
        let date = match self.date.trim() {
            "" => None,
            value => Some(validate_year_range(value)?),
        };
        Ok(ScopusQuery {
            query: self.query.trim().to_string(),
            subject,
            date,
        })
    }

    fn http_config(&self) -> HttpConfig {
        let timeout = Duration::from_secs(self.timeout_secs);
        HttpConfig {
            timeout,
            connect_timeout: timeout.min(HttpConfig::default().connect_timeout),
            max_retries: self.max_retries,
        }
    }
}

fn default_fields(enricher: &Arc<Enricher>) -> Vec<Arc<dyn FieldExtractor>> {
    let mut fields: Vec<Arc<dyn FieldExtractor>> = KEY_FIELDS
        .iter()
        .map(|key| Arc::new(KeyField::new(*key)) as Arc<dyn FieldExtractor>)
        .collect();
    fields.push(Arc::new(AuthorsField(enricher.clone())));
    fields.push(Arc::new(AbstractField(enricher.clone())));
    fields
}

pub async fn run(cli: Cli) -> anyhow::Result<String> {
    run_with(cli, Endpoints::from_env()).await
}

/// Runs the pipeline: headers snapshot, enrichment, table assembly, CSV output.
pub async fn run_with(cli: Cli, endpoints: Endpoints) -> anyhow::Result<String> {
    let query = cli.scopus_query()?;
    let client = build_client(&cli.http_config())?;
    let fetcher = Arc::new(CachedFetcher::new(
        client,
        Arc::new(FsStore::new(cli.cache_dir.clone())),
    ));

    let api_key = cli.api_key.clone().unwrap_or_default();
    let entries = headers::load_or_fetch(
        &cli.headers,
        cli.update_headers,
        usize::from(cli.page_size),
        || ScopusClient::new(fetcher.clone(), endpoints.scopus.clone(), &api_key, query),
    )
    .await?;

    let crossref = CrossrefClient::new(fetcher.clone(), endpoints.crossref.clone(), cli.mailto);
    let enricher = Arc::new(Enricher::new(crossref, cli.clean_abstracts));
    info!(entries = entries.len(), "Enriching entries from Crossref");
    let table = assemble(&entries, &default_fields(&enricher)).await?;
    write_csv(&cli.output, &table, &cli.null_marker).await?;

    let stats = fetcher.stats();
    info!(
        live = stats.live,
        memory_hits = stats.memory_hits,
        disk_hits = stats.disk_hits,
        corrupt_entries = stats.corrupt_entries,
        "Response cache summary"
    );
    let failures = enricher.failures().await;
    if !failures.is_empty() {
        warn!(count = failures.len(), "Some cells were left empty after enrichment");
    }

    Ok(format!(
        "Wrote {} rows to {} ({} enrichment failures)",
        table.rows.len(),
        cli.output.display(),
        failures.len()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cli_in(dir: &std::path::Path, extra: &[&str]) -> Cli {
        let headers = dir.join("headers.json");
        let output = dir.join("result.csv");
        let cache = dir.join("cache");
        let mut args = vec![
            "scopus-harvest".to_string(),
            "--headers".into(),
            headers.display().to_string(),
            "--output".into(),
            output.display().to_string(),
            "--cache-dir".into(),
            cache.display().to_string(),
            "--api-key".into(),
            "test-key".into(),
            "--max-retries".into(),
            "0".into(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        Cli::try_parse_from(args).expect("cli")
    }

    #[test]
    fn defaults_match_the_documented_search() {
        let cli = Cli::try_parse_from(["scopus-harvest"]).expect("parse");
        assert_eq!(cli.query, DEFAULT_QUERY);
        assert_eq!(cli.page_size, 25);
        assert_eq!(cli.headers, PathBuf::from("headers.json"));
        assert_eq!(cli.output, PathBuf::from("result.csv"));
        let query = cli.scopus_query().expect("query");
        assert_eq!(query.subject.as_deref(), Some("BUSI"));
        assert_eq!(query.date.as_deref(), Some("2002-2022"));
    }

    #[test]
    fn page_size_outside_scopus_limit_is_rejected() {
        assert!(Cli::try_parse_from(["scopus-harvest", "--page-size", "0"]).is_err());
        assert!(Cli::try_parse_from(["scopus-harvest", "--page-size", "201"]).is_err());
    }

    #[test]
    fn empty_subject_and_date_are_omitted() {
        let cli = Cli::try_parse_from(["scopus-harvest", "--subject", "", "--date", ""])
            .expect("parse");
        let query = cli.scopus_query().expect("query");
        assert_eq!(query.subject, None);
        assert_eq!(query.date, None);
    }

    #[tokio::test]
    async fn run_writes_enriched_csv_and_reuses_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/scopus"))
            .and(query_param("start", "0"))
            .and(query_param("count", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "search-results": {
                    "opensearch:totalResults": "3",
                    "entry": [
                        {"dc:title": "First", "prism:doi": "10.1/a", "citedby-count": "3"},
                        {"dc:title": "Second", "citedby-count": "0"}
                    ]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/scopus"))
            .and(query_param("start", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "search-results": {
                    "opensearch:totalResults": "3",
                    "entry": [{"dc:title": "Third", "prism:doi": "10.1/missing"}]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/works/10.1/a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {
                    "author": [{"given": "Jane", "family": "Doe"}, {"family": "Roe"}],
                    "abstract": "<jats:p>Audit  work</jats:p>"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/works/10.1/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Resource not found."))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().expect("tempdir");
        let endpoints = Endpoints {
            scopus: format!("{}/search/scopus", server.uri()).into(),
            crossref: server.uri().into(),
        };
        let summary = run_with(
            cli_in(tmp.path(), &["--page-size", "2", "--clean-abstracts"]),
            endpoints.clone(),
        )
        .await
        .expect("run");
        assert!(summary.contains("Wrote 3 rows"));
        assert!(summary.contains("2 enrichment failures"));

        let csv = std::fs::read_to_string(tmp.path().join("result.csv")).expect("csv");
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            ",dc:title,prism:publicationName,prism:volume,prism:coverDate,subtypeDescription,citedby-count,prism:doi,dc:creator,authors,abstract"
        );
        assert_eq!(lines[1], "0,First,,,,,3,10.1/a,,Jane Doe|Roe,Audit work");
        assert_eq!(lines[2], "1,Second,,,,,0,,,,");
        assert_eq!(lines[3], "2,Third,,,,,,10.1/missing,,,");
        assert!(tmp.path().join("headers.json").exists());

        // Snapshot and disk cache satisfy the second run; the mocks' expect(1) enforces it.
        run_with(cli_in(tmp.path(), &["--clean-abstracts"]), endpoints)
            .await
            .expect("second run");
    }

    #[tokio::test]
    async fn missing_api_key_fails_only_when_search_is_needed() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut cli = cli_in(tmp.path(), &[]);
        cli.api_key = None;
        let endpoints = Endpoints {
            scopus: "http://127.0.0.1:9/search/scopus".into(),
            crossref: "http://127.0.0.1:9".into(),
        };
        let err = run_with(cli, endpoints).await.expect_err("key required");
        let err = err
            .downcast_ref::<crate::error::HarvestError>()
            .expect("harvest error");
        assert!(matches!(
            err,
            crate::error::HarvestError::ApiKeyRequired { .. }
        ));
    }
}
