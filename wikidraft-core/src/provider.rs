//! # provider: uniform access to text-generation backends
//!
//! Every backend implements [`Provider`], which turns a system prompt, a user
//! prompt and a temperature into the generated text. The implementations
//! differ only in endpoint, auth header, request shape and where the text
//! sits in the response:
//!
//! - [`GeminiProvider`]: hosted, `x-goog-api-key` header.
//! - [`GroqProvider`]: hosted, OpenAI-compatible chat completions, bearer token.
//! - [`OllamaProvider`]: local, no auth, longer timeout.
//! - [`AnthropicProvider`]: hosted messages API, used for the review pass.
//!
//! Select one at run time with [`build_provider`].
//!
//! ## Errors
//! HTTP 429 maps to [`ProviderError::RateLimited`]; other non-2xx statuses to
//! [`ProviderError::Http`] with the upstream body. A 2xx response without the
//! expected nested text field yields [`ProviderError::MalformedResponse`]
//! carrying the full response for diagnosis.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::ProviderError;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com";
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const HOSTED_TIMEOUT: Duration = Duration::from_secs(120);
const LOCAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Runtime key selecting a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Groq,
    Ollama,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Groq => "groq",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "groq" => Ok(ProviderKind::Groq),
            "ollama" => Ok(ProviderKind::Ollama),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            other => Err(format!("Unknown provider: {other}")),
        }
    }
}

/// Credentials, endpoints and limits shared by all backends.
///
/// API keys are optional here; a backend whose key is missing fails at call
/// time with [`ProviderError::MissingCredential`] so a fallback can still run.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub gemini_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub gemini_base_url: String,
    pub groq_base_url: String,
    pub anthropic_base_url: String,
    pub ollama_host: String,
    pub max_output_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            groq_api_key: None,
            anthropic_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            groq_base_url: DEFAULT_GROQ_BASE_URL.to_string(),
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            max_output_tokens: 8192,
        }
    }
}

/// A text-generation backend.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Issue one generation request and return the generated text.
    async fn call(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, ProviderError>;
}

/// Construct the backend for `kind`.
pub fn build_provider(
    kind: ProviderKind,
    config: &ProviderConfig,
) -> Result<Box<dyn Provider>, ProviderError> {
    info!(provider = %kind, "Building provider client");
    let provider: Box<dyn Provider> = match kind {
        ProviderKind::Gemini => Box::new(GeminiProvider {
            client: http_client(kind, HOSTED_TIMEOUT)?,
            api_key: config.gemini_api_key.clone(),
            base_url: trim_base(&config.gemini_base_url),
            max_output_tokens: config.max_output_tokens,
        }),
        ProviderKind::Groq => Box::new(GroqProvider {
            client: http_client(kind, HOSTED_TIMEOUT)?,
            api_key: config.groq_api_key.clone(),
            base_url: trim_base(&config.groq_base_url),
            max_output_tokens: config.max_output_tokens,
        }),
        ProviderKind::Ollama => Box::new(OllamaProvider {
            client: http_client(kind, LOCAL_TIMEOUT)?,
            host: trim_base(&config.ollama_host),
        }),
        ProviderKind::Anthropic => Box::new(AnthropicProvider {
            client: http_client(kind, LOCAL_TIMEOUT)?,
            api_key: config.anthropic_api_key.clone(),
            base_url: trim_base(&config.anthropic_base_url),
            max_output_tokens: config.max_output_tokens,
        }),
    };
    Ok(provider)
}

fn http_client(kind: ProviderKind, timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|source| ProviderError::Transport {
            provider: kind.to_string(),
            source,
        })
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn require_key(key: &Option<String>, var: &str) -> Result<String, ProviderError> {
    match key.as_deref() {
        Some(k) if !k.is_empty() => Ok(k.to_string()),
        _ => Err(ProviderError::MissingCredential {
            var: var.to_string(),
        }),
    }
}

/// Send a prepared request and decode the JSON body, mapping HTTP failures.
async fn send_json(
    kind: ProviderKind,
    request: reqwest::RequestBuilder,
) -> Result<Value, ProviderError> {
    let provider = kind.to_string();
    let response = request
        .header(CONTENT_TYPE, "application/json")
        .send()
        .await
        .map_err(|source| ProviderError::Transport {
            provider: provider.clone(),
            source,
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| ProviderError::Transport {
            provider: provider.clone(),
            source,
        })?;

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited { provider });
    }
    if !status.is_success() {
        return Err(ProviderError::Http {
            provider,
            status: status.as_u16(),
            body,
        });
    }
    debug!(provider = %provider, bytes = body.len(), "Provider response received");

    serde_json::from_str(&body).map_err(|_| ProviderError::MalformedResponse {
        provider,
        path: "<response body as JSON>".to_string(),
        body,
    })
}

/// Pull the string at `pointer` out of `response` or describe what is missing.
fn text_at(
    kind: ProviderKind,
    response: &Value,
    pointer: &str,
    path: &str,
) -> Result<String, ProviderError> {
    response
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::MalformedResponse {
            provider: kind.to_string(),
            path: path.to_string(),
            body: response.to_string(),
        })
}

// ── Gemini ─────────────────────────────────────────────────────────────────

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    max_output_tokens: u32,
}

pub fn gemini_request_body(
    system_prompt: &str,
    user_prompt: &str,
    temperature: f32,
    max_output_tokens: u32,
) -> Value {
    json!({
        "system_instruction": { "parts": [{ "text": system_prompt }] },
        "contents": [{ "parts": [{ "text": user_prompt }] }],
        "generationConfig": {
            "temperature": temperature,
            "maxOutputTokens": max_output_tokens,
            "responseMimeType": "application/json",
        }
    })
}

pub fn gemini_extract_text(response: &Value) -> Result<String, ProviderError> {
    text_at(
        ProviderKind::Gemini,
        response,
        "/candidates/0/content/parts/0/text",
        "candidates[0].content.parts[0].text",
    )
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn call(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, ProviderError> {
        let api_key = require_key(&self.api_key, "GEMINI_API_KEY")?;
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        let body = gemini_request_body(
            system_prompt,
            user_prompt,
            temperature,
            self.max_output_tokens,
        );
        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body);
        let response = send_json(ProviderKind::Gemini, request).await?;
        gemini_extract_text(&response)
    }
}

// ── Groq ───────────────────────────────────────────────────────────────────

pub struct GroqProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    max_output_tokens: u32,
}

pub fn groq_request_body(
    model: &str,
    system_prompt: &str,
    user_prompt: &str,
    temperature: f32,
    max_output_tokens: u32,
) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": system_prompt },
            { "role": "user", "content": user_prompt },
        ],
        "temperature": temperature,
        "max_tokens": max_output_tokens,
        "response_format": { "type": "json_object" },
    })
}

pub fn groq_extract_text(response: &Value) -> Result<String, ProviderError> {
    text_at(
        ProviderKind::Groq,
        response,
        "/choices/0/message/content",
        "choices[0].message.content",
    )
}

#[async_trait]
impl Provider for GroqProvider {
    async fn call(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, ProviderError> {
        let api_key = require_key(&self.api_key, "GROQ_API_KEY")?;
        let url = format!("{}/openai/v1/chat/completions", self.base_url);
        let body = groq_request_body(
            model,
            system_prompt,
            user_prompt,
            temperature,
            self.max_output_tokens,
        );
        let request = self.client.post(&url).bearer_auth(api_key).json(&body);
        let response = send_json(ProviderKind::Groq, request).await?;
        groq_extract_text(&response)
    }
}

// ── Ollama ─────────────────────────────────────────────────────────────────

pub struct OllamaProvider {
    client: reqwest::Client,
    host: String,
}

pub fn ollama_request_body(
    model: &str,
    system_prompt: &str,
    user_prompt: &str,
    temperature: f32,
) -> Value {
    json!({
        "model": model,
        "system": system_prompt,
        "prompt": user_prompt,
        "stream": false,
        "format": "json",
        "options": { "temperature": temperature },
    })
}

pub fn ollama_extract_text(response: &Value) -> Result<String, ProviderError> {
    text_at(ProviderKind::Ollama, response, "/response", "response")
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn call(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/api/generate", self.host);
        let body = ollama_request_body(model, system_prompt, user_prompt, temperature);
        let response = send_json(ProviderKind::Ollama, self.client.post(&url).json(&body)).await?;
        ollama_extract_text(&response)
    }
}

// ── Anthropic ──────────────────────────────────────────────────────────────

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    max_output_tokens: u32,
}

pub fn anthropic_request_body(
    model: &str,
    system_prompt: &str,
    user_prompt: &str,
    temperature: f32,
    max_output_tokens: u32,
) -> Value {
    json!({
        "model": model,
        "system": system_prompt,
        "messages": [{ "role": "user", "content": user_prompt }],
        "max_tokens": max_output_tokens,
        "temperature": temperature,
    })
}

pub fn anthropic_extract_text(response: &Value) -> Result<String, ProviderError> {
    text_at(
        ProviderKind::Anthropic,
        response,
        "/content/0/text",
        "content[0].text",
    )
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn call(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, ProviderError> {
        let api_key = require_key(&self.api_key, "ANTHROPIC_API_KEY")?;
        let url = format!("{}/v1/messages", self.base_url);
        let body = anthropic_request_body(
            model,
            system_prompt,
            user_prompt,
            temperature,
            self.max_output_tokens,
        );
        let request = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let response = send_json(ProviderKind::Anthropic, request).await?;
        anthropic_extract_text(&response)
    }
}
