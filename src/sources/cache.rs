//! Memoizing GET fetcher with an in-process map in front of a persistent response store.
//!
//! Every response is keyed by its [`RequestSignature`]: the endpoint plus its query parameters,
//! stably sorted by key. Secret parameters take part only as a SHA-256 digest, so a changed
//! API key is a different request while the key itself never reaches disk. List-valued
//! parameters keep their element order, so `tags=[a, b]` and `tags=[b, a]` are different
//! requests. Entries are never expired.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::HarvestError;

const CACHE_ENTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    Scalar(String),
    List(Vec<String>),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Scalar(value)
    }
}

impl From<usize> for ParamValue {
    fn from(value: usize) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(values: Vec<String>) -> Self {
        Self::List(values)
    }
}

#[derive(Debug, Clone)]
struct QueryParam {
    key: String,
    value: ParamValue,
    secret: bool,
}

/// Query parameters for one GET. Secret parameters are sent as-is but only their digest is
/// part of the signature.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    entries: Vec<QueryParam>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing any earlier value for it.
    pub fn set(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value.into(), false);
        self
    }

    pub fn secret(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, ParamValue::Scalar(value.into()), true);
        self
    }

    fn insert(&mut self, key: &str, value: ParamValue, secret: bool) {
        let param = QueryParam {
            key: key.to_string(),
            value,
            secret,
        };
        match self.entries.iter_mut().find(|p| p.key == key) {
            Some(existing) => *existing = param,
            None => self.entries.push(param),
        }
    }

    /// Wire form; list values expand to one pair per element.
    fn wire_pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs = Vec::with_capacity(self.entries.len());
        for param in &self.entries {
            match &param.value {
                ParamValue::Scalar(value) => pairs.push((param.key.as_str(), value.as_str())),
                ParamValue::List(values) => {
                    pairs.extend(values.iter().map(|v| (param.key.as_str(), v.as_str())));
                }
            }
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestSignature {
    endpoint: String,
    params: Vec<(String, ParamValue)>,
}

impl RequestSignature {
    pub fn new(endpoint: &str, params: &QueryParams) -> Self {
        let mut params: Vec<(String, ParamValue)> = params
            .entries
            .iter()
            .map(|p| {
                let value = match (&p.value, p.secret) {
                    (ParamValue::Scalar(v), true) => ParamValue::Scalar(secret_digest(v)),
                    (value, _) => value.clone(),
                };
                (p.key.clone(), value)
            })
            .collect();
        params.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            endpoint: endpoint.to_string(),
            params,
        }
    }

    /// Lowercase hex SHA-256 over a length-prefixed encoding of the signature.
    pub fn cache_key(&self) -> String {
        fn field(h: &mut Sha256, tag: &[u8], bytes: &[u8]) {
            h.update(tag);
            h.update((bytes.len() as u64).to_be_bytes());
            h.update(bytes);
        }

        let mut h = Sha256::new();
        h.update(b"scopus-harvest:request:v1\n");
        field(&mut h, b"E", self.endpoint.as_bytes());
        for (key, value) in &self.params {
            field(&mut h, b"K", key.as_bytes());
            match value {
                ParamValue::Scalar(v) => field(&mut h, b"S", v.as_bytes()),
                ParamValue::List(values) => {
                    h.update(b"L");
                    h.update((values.len() as u64).to_be_bytes());
                    for v in values {
                        field(&mut h, b"I", v.as_bytes());
                    }
                }
            }
        }
        format!("{:x}", h.finalize())
    }
}

fn secret_digest(value: &str) -> String {
    let mut h = Sha256::new();
    h.update(b"scopus-harvest:secret:v1\n");
    h.update(value.as_bytes());
    format!("sha256:{:x}", h.finalize())
}

/// A replayable HTTP response. Non-2xx statuses are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(with = "stored_body")]
    pub body: Vec<u8>,
}

/// UTF-8 bodies are stored as a JSON string, anything else as `{"base64": "..."}`, so the
/// replayed bytes are exactly the bytes received.
mod stored_body {
    use super::{BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum StoredBody {
        Text(String),
        Binary { base64: String },
    }

    pub(super) fn serialize<S: Serializer>(
        body: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(body) {
            Ok(text) => StoredBody::Text(text.to_string()),
            Err(_) => StoredBody::Binary {
                base64: BASE64.encode(body),
            },
        }
        .serialize(serializer)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        match StoredBody::deserialize(deserializer)? {
            StoredBody::Text(text) => Ok(text.into_bytes()),
            StoredBody::Binary { base64 } => BASE64
                .decode(base64.as_bytes())
                .map_err(<D::Error as serde::de::Error>::custom),
        }
    }
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    pub fn json<T: DeserializeOwned>(&self, api: &str) -> Result<T, HarvestError> {
        crate::sources::ensure_json_content_type(
            api,
            self.status,
            self.content_type(),
            &self.body,
        )?;
        serde_json::from_slice(&self.body).map_err(|source| HarvestError::ApiJson {
            api: api.to_string(),
            source,
        })
    }

    pub fn body_excerpt(&self) -> String {
        crate::sources::body_excerpt(&self.body)
    }
}

fn persisted_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    // Allowlist only; Set-Cookie and friends never reach disk.
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        if !matches!(
            name.as_str(),
            "content-type" | "content-length" | "etag" | "last-modified" | "cache-control"
        ) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            out.insert(name.as_str().to_string(), value.to_string());
        }
    }
    out
}

/// Persistent side of the response cache.
///
/// `load` returns `Err(HarvestError::CacheCorruption { .. })` for an entry that exists but
/// cannot be trusted; the fetcher treats that as a miss.
#[async_trait::async_trait]
pub trait ResponseStore: Send + Sync {
    async fn load(
        &self,
        key: &str,
        signature: &RequestSignature,
    ) -> Result<Option<Response>, HarvestError>;

    /// Stores a response unless an entry for `key` already exists.
    async fn save(
        &self,
        key: &str,
        signature: &RequestSignature,
        response: &Response,
    ) -> Result<(), HarvestError>;

    /// Moves a corrupt entry out of the way so a fresh one can be written.
    async fn quarantine(&self, key: &str) -> Result<(), HarvestError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    version: u32,
    signature: RequestSignature,
    response: Response,
}

/// One JSON file per signature under `<root>/<key[0..2]>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        let shard = key.get(0..2).unwrap_or("__");
        self.root.join(shard).join(format!("{key}.json"))
    }
}

#[async_trait::async_trait]
impl ResponseStore for FsStore {
    async fn load(
        &self,
        key: &str,
        signature: &RequestSignature,
    ) -> Result<Option<Response>, HarvestError> {
        let path = self.path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(HarvestError::CacheCorruption {
                    path,
                    reason: format!("unreadable: {err}"),
                });
            }
        };

        let entry: CacheEntry =
            serde_json::from_slice(&bytes).map_err(|err| HarvestError::CacheCorruption {
                path: path.clone(),
                reason: format!("undecodable: {err}"),
            })?;
        if entry.version != CACHE_ENTRY_VERSION {
            return Err(HarvestError::CacheCorruption {
                path,
                reason: format!("unsupported entry version {}", entry.version),
            });
        }
        if &entry.signature != signature {
            return Err(HarvestError::CacheCorruption {
                path,
                reason: "entry belongs to a different request".to_string(),
            });
        }
        Ok(Some(entry.response))
    }

    async fn save(
        &self,
        key: &str,
        signature: &RequestSignature,
        response: &Response,
    ) -> Result<(), HarvestError> {
        let path = self.path(key);
        if tokio::fs::metadata(&path).await.is_ok() {
            return Ok(());
        }
        let entry = CacheEntry {
            version: CACHE_ENTRY_VERSION,
            signature: signature.clone(),
            response: response.clone(),
        };
        let bytes = serde_json::to_vec(&entry)?;
        crate::utils::fs::save_atomic(&path, &bytes).await
    }

    async fn quarantine(&self, key: &str) -> Result<(), HarvestError> {
        let path = self.path(key);
        let target = path.with_extension("json.corrupt");
        match tokio::fs::rename(&path, &target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Counters for one fetcher's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub live: usize,
    pub memory_hits: usize,
    pub disk_hits: usize,
    pub corrupt_entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    live: AtomicUsize,
    memory_hits: AtomicUsize,
    disk_hits: AtomicUsize,
    corrupt_entries: AtomicUsize,
}

/// GET with a two-tier cache: in-process map first, then the persistent store, then the network.
///
/// Construct one per run and share it by `Arc` with every client that fetches.
pub struct CachedFetcher {
    client: ClientWithMiddleware,
    store: Arc<dyn ResponseStore>,
    memory: Mutex<HashMap<RequestSignature, Response>>,
    counters: Counters,
}

impl CachedFetcher {
    pub fn new(client: ClientWithMiddleware, store: Arc<dyn ResponseStore>) -> Self {
        Self {
            client,
            store,
            memory: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            live: self.counters.live.load(Ordering::Relaxed),
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            corrupt_entries: self.counters.corrupt_entries.load(Ordering::Relaxed),
        }
    }

    /// Returns the response for `endpoint` + `params`, performing at most one live GET per
    /// signature over the lifetime of the store.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Fetch`] when the upstream host cannot be reached. Non-2xx
    /// responses are returned as `Ok` and cached like any other response.
    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &QueryParams,
    ) -> Result<Response, HarvestError> {
        let signature = RequestSignature::new(endpoint, params);

        if let Some(hit) = self.memory.lock().await.get(&signature).cloned() {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            debug!(endpoint, "response cache: memory hit");
            return Ok(hit);
        }

        let key = signature.cache_key();
        match self.store.load(&key, &signature).await {
            Ok(Some(hit)) => {
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                debug!(endpoint, key = %key, "response cache: disk hit");
                self.memory.lock().await.insert(signature, hit.clone());
                return Ok(hit);
            }
            Ok(None) => {}
            Err(err) => {
                self.counters.corrupt_entries.fetch_add(1, Ordering::Relaxed);
                warn!(endpoint, key = %key, "Ignoring cache entry, fetching live: {err}");
                if let Err(err) = self.store.quarantine(&key).await {
                    warn!(key = %key, "Failed to move corrupt cache entry aside: {err}");
                }
            }
        }

        let response = self.fetch_live(endpoint, params).await?;
        self.counters.live.fetch_add(1, Ordering::Relaxed);
        debug!(endpoint, status = response.status, key = %key, "response cache: live fetch");

        if let Err(err) = self.store.save(&key, &signature, &response).await {
            warn!(endpoint, key = %key, "Failed to persist response: {err}");
        }
        self.memory.lock().await.insert(signature, response.clone());
        Ok(response)
    }

    async fn fetch_live(
        &self,
        endpoint: &str,
        params: &QueryParams,
    ) -> Result<Response, HarvestError> {
        let resp = self
            .client
            .get(endpoint)
            .query(&params.wire_pairs())
            .send()
            .await
            .map_err(|source| HarvestError::Fetch {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let status = resp.status().as_u16();
        let headers = persisted_headers(resp.headers());
        let bytes = crate::sources::read_limited_body(resp, endpoint).await?;
        Ok(Response {
            status,
            headers,
            body: bytes,
        })
    }
}
