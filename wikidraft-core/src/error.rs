//! Error types shared across the pipeline stages.
//!
//! Each stage owns one enum so the orchestration layers can branch on the
//! failure category without inspecting messages.

use thiserror::Error;

/// Failure of a single provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP 429 from the upstream API.
    #[error("{provider} rate limit exceeded")]
    RateLimited { provider: String },

    #[error("{provider} API error {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    /// The response was 2xx but the generated text was not where expected.
    #[error("{provider} response missing {path}. Full response: {body}")]
    MalformedResponse {
        provider: String,
        path: String,
        body: String,
    },

    #[error("{var} environment variable not set")]
    MissingCredential { var: String },

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

/// Failure of one generation attempt or of the whole retry/fallback chain.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The model answered, but not with parseable JSON.
    #[error("model output is not valid JSON: {source}")]
    MalformedOutput {
        #[source]
        source: serde_json::Error,
    },

    #[error("all AI providers failed ({tried}); last error: {last}")]
    AllProvidersFailed { tried: String, last: String },
}

/// The relaxed literal could not be turned into strict JSON.
#[derive(Debug, Error)]
#[error("cannot decode literal at line {line}, column {column}: {message} near `{snippet}`")]
pub struct LiteralDecodeError {
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub snippet: String,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("GitHub API error {status} for {url}")]
    Http { status: u16, url: String },

    #[error("GitHub request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected GitHub payload for {url}: {message}")]
    Payload { url: String, message: String },
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("template io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("template is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("output serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
