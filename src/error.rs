use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum HarvestError {
    #[error("HTTP client initialization failed: {0}")]
    HttpClientInit(reqwest::Error),

    #[error("Request to {endpoint} failed: {source}")]
    Fetch {
        endpoint: String,
        #[source]
        source: reqwest_middleware::Error,
    },

    #[error("HTTP body read failed: {0}")]
    Body(#[from] reqwest::Error),

    #[error("Response body from {endpoint} exceeded {limit} bytes")]
    BodyTooLarge { endpoint: String, limit: usize },

    #[error("Upstream error from {api}: HTTP {status}: {body}")]
    Upstream {
        api: String,
        status: u16,
        body: String,
    },

    #[error("API JSON error from {api}: {source}")]
    ApiJson {
        api: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Corrupt cache entry {}: {reason}", path.display())]
    CacheCorruption { path: PathBuf, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(
        "API key required: {api} requires {env_var} environment variable (or --api-key).\n\nTo set:\n  export {env_var}=your-key\n\nMore info: {docs_url}"
    )]
    ApiKeyRequired {
        api: String,
        env_var: String,
        docs_url: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
