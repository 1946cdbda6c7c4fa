//! Source clients and the shared HTTP stack for the Scopus and Crossref APIs.

use std::borrow::Cow;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use tracing::warn;

use crate::error::HarvestError;

pub(crate) mod cache;
pub(crate) mod crossref;
pub(crate) mod scopus;

const ERROR_BODY_MAX_BYTES: usize = 2048;
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Transport settings shared by every upstream client.
#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }
}

/// Base URLs of the upstream APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub scopus: Cow<'static, str>,
    pub crossref: Cow<'static, str>,
}

impl Endpoints {
    /// Production URLs, each overridable by its environment variable.
    pub fn from_env() -> Self {
        Self {
            scopus: env_base(scopus::SCOPUS_BASE, scopus::SCOPUS_BASE_ENV),
            crossref: env_base(crossref::CROSSREF_BASE, crossref::CROSSREF_BASE_ENV),
        }
    }
}

pub(crate) fn env_base(default: &'static str, env_var: &str) -> Cow<'static, str> {
    std::env::var(env_var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(Cow::Owned)
        .unwrap_or_else(|| Cow::Borrowed(default))
}

/// Builds the HTTP client used by the response cache for live fetches.
///
/// - Timeout: per-request and connect timeouts from `config`
/// - Retry: `config.max_retries` attempts with exponential backoff for transient errors
///
/// Response caching is not done here; see [`cache::CachedFetcher`].
pub(crate) fn build_client(config: &HttpConfig) -> Result<ClientWithMiddleware, HarvestError> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        reqwest::header::ACCEPT,
        HeaderValue::from_static("application/json"),
    );

    let base_client = reqwest::Client::builder()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .user_agent(concat!("scopus-harvest/", env!("CARGO_PKG_VERSION")))
        .default_headers(default_headers)
        .build()
        .map_err(HarvestError::HttpClientInit)?;

    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);

    Ok(ClientBuilder::new(base_client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build())
}

pub(crate) fn body_excerpt(bytes: &[u8]) -> String {
    let full = String::from_utf8_lossy(bytes);

    let truncated: &str = if full.len() > ERROR_BODY_MAX_BYTES {
        let mut end = ERROR_BODY_MAX_BYTES;
        while end > 0 && !full.is_char_boundary(end) {
            end -= 1;
        }
        &full[..end]
    } else {
        full.as_ref()
    };

    let mut s = truncated.trim().replace(['\n', '\r', '\t'], " ");
    if full.len() > ERROR_BODY_MAX_BYTES {
        s.push_str(" …");
    }
    s
}

pub(crate) fn ensure_json_content_type(
    api: &str,
    status: u16,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<(), HarvestError> {
    let Some(raw) = content_type.map(str::trim) else {
        return Ok(());
    };
    if raw.is_empty() {
        return Ok(());
    }

    let media_type = raw
        .split(';')
        .next()
        .map(str::trim)
        .unwrap_or_default()
        .to_ascii_lowercase();
    let is_html = matches!(media_type.as_str(), "text/html" | "application/xhtml+xml");
    if is_html {
        return Err(HarvestError::Upstream {
            api: api.to_string(),
            status,
            body: format!(
                "Unexpected HTML response (content-type: {raw}): {}",
                body_excerpt(body)
            ),
        });
    }

    let is_json = media_type == "application/json"
        || media_type == "text/json"
        || media_type.ends_with("+json");
    if !is_json {
        warn!(
            source = api,
            content_type = raw,
            "Unexpected non-JSON content type; attempting JSON parse for compatibility"
        );
    }

    Ok(())
}

pub(crate) async fn read_limited_body(
    mut resp: reqwest::Response,
    endpoint: &str,
) -> Result<Vec<u8>, HarvestError> {
    let mut body: Vec<u8> = Vec::new();

    while let Some(chunk) = resp.chunk().await? {
        let next_len = body.len().saturating_add(chunk.len());
        if next_len > DEFAULT_MAX_BODY_BYTES {
            return Err(HarvestError::BodyTooLarge {
                endpoint: endpoint.to_string(),
                limit: DEFAULT_MAX_BODY_BYTES,
            });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}
