//! # generate: JSON generation with retry, backoff and provider fallback
//!
//! [`ResilientGenerator`] wraps a primary [`Target`] and an optional fallback.
//! Each target gets up to [`RetryPolicy::max_retries`] attempts:
//!
//! - rate limited: wait `retry_delay * (attempt + 1)` then retry
//! - model output not JSON: retry immediately
//! - anything else: wait `2^attempt` seconds then retry
//!
//! No wait follows the final attempt. When the primary is exhausted the
//! fallback runs under the same policy; when that fails too the caller gets
//! [`GenerateError::AllProvidersFailed`].

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use regex::Regex;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::GenerateError;
use crate::provider::{Provider, ProviderKind};

/// Produces one structured JSON value from a system and user prompt.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, system: &str, user: &str) -> Result<Value, GenerateError>;
}

/// A provider bound to the model it should be asked for.
pub struct Target {
    pub kind: ProviderKind,
    pub model: String,
    pub provider: Box<dyn Provider>,
}

impl Target {
    pub fn new(kind: ProviderKind, model: impl Into<String>, provider: Box<dyn Provider>) -> Self {
        Self {
            kind,
            model: model.into(),
            provider,
        }
    }

    fn label(&self) -> String {
        format!("{}/{}", self.kind, self.model)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Base wait after a rate-limit response; scaled by the attempt number.
    pub retry_delay: Duration,
    pub temperature: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(10),
            temperature: 0.4,
        }
    }
}

pub struct ResilientGenerator {
    primary: Target,
    fallback: Option<Target>,
    policy: RetryPolicy,
}

impl ResilientGenerator {
    pub fn new(primary: Target, fallback: Option<Target>, policy: RetryPolicy) -> Self {
        Self {
            primary,
            fallback,
            policy,
        }
    }

    async fn attempt(
        &self,
        target: &Target,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Value, GenerateError> {
        let raw = target
            .provider
            .call(
                &target.model,
                system_prompt,
                user_prompt,
                self.policy.temperature,
            )
            .await?;
        parse_json_output(&raw).map_err(|source| GenerateError::MalformedOutput { source })
    }

    async fn run_target(
        &self,
        target: &Target,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Value, GenerateError> {
        let attempts = self.policy.max_retries.max(1);
        let mut attempt: u32 = 0;
        loop {
            info!(
                provider = %target.kind,
                model = %target.model,
                attempt = attempt + 1,
                "Calling provider"
            );
            let err = match self.attempt(target, system_prompt, user_prompt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let is_last = attempt + 1 >= attempts;

            let wait = match &err {
                GenerateError::Provider(p) if p.is_rate_limited() => {
                    let wait = self.policy.retry_delay * (attempt + 1);
                    warn!(provider = %target.kind, wait_secs = wait.as_secs(), "Rate limited");
                    Some(wait)
                }
                GenerateError::MalformedOutput { .. } => {
                    error!(provider = %target.kind, error = %err, "Model output was not JSON");
                    None
                }
                _ => {
                    error!(provider = %target.kind, error = %err, "Provider call failed");
                    Some(Duration::from_secs(2u64.saturating_pow(attempt)))
                }
            };

            if is_last {
                return Err(err);
            }
            if let Some(wait) = wait {
                tokio::time::sleep(wait).await;
            }
            attempt += 1;
        }
    }
}

#[async_trait]
impl Generator for ResilientGenerator {
    async fn generate(&self, system: &str, user: &str) -> Result<Value, GenerateError> {
        let primary_err = match self.run_target(&self.primary, system, user).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let Some(fallback) = &self.fallback else {
            return Err(GenerateError::AllProvidersFailed {
                tried: self.primary.label(),
                last: primary_err.to_string(),
            });
        };

        warn!(
            primary = %self.primary.label(),
            fallback = %fallback.label(),
            error = %primary_err,
            "Primary provider exhausted, switching to fallback"
        );
        self.run_target(fallback, system, user)
            .await
            .map_err(|err| GenerateError::AllProvidersFailed {
                tried: format!("{}, {}", self.primary.label(), fallback.label()),
                last: err.to_string(),
            })
    }
}

fn fence_patterns() -> &'static (Regex, Regex) {
    static PATTERNS: OnceLock<(Regex, Regex)> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        (
            Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*\r?\n?").expect("valid regex"),
            Regex::new(r"\r?\n?```\s*$").expect("valid regex"),
        )
    })
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let (open, close) = fence_patterns();
    let start = open.find(trimmed).map(|m| m.end()).unwrap_or(0);
    let rest = &trimmed[start..];
    let end = close.find(rest).map(|m| m.start()).unwrap_or(rest.len());
    rest[..end].trim()
}

/// Parse model output as JSON, tolerating a Markdown code fence around it.
pub fn parse_json_output(raw: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(strip_code_fence(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::MockProvider;
    use serde_json::json;
    use tokio::time::Instant;

    fn target(kind: ProviderKind, provider: MockProvider) -> Target {
        Target::new(kind, format!("{kind}-model"), Box::new(provider))
    }

    #[test]
    fn strips_fences_with_and_without_language() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n[1]\n```  "), "[1]");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(
            parse_json_output("```json\n{\"ok\": true}\n```").unwrap(),
            json!({"ok": true})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_success() {
        let mut primary = MockProvider::new();
        primary
            .expect_call()
            .times(1)
            .returning(|model, _, _, temperature| {
                assert_eq!(model, "gemini-model");
                assert!((temperature - 0.4).abs() < f32::EPSILON);
                Ok("{\"name\": \"foo\"}".to_string())
            });
        let generator = ResilientGenerator::new(
            target(ProviderKind::Gemini, primary),
            None,
            RetryPolicy::default(),
        );
        let value = generator.generate("sys", "user").await.unwrap();
        assert_eq!(value["name"], "foo");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_primary_falls_back_after_max_retries() {
        let mut primary = MockProvider::new();
        primary
            .expect_call()
            .times(3)
            .returning(|_, _, _, _| {
                Err(ProviderError::RateLimited {
                    provider: "gemini".into(),
                })
            });
        let mut fallback = MockProvider::new();
        fallback
            .expect_call()
            .times(1)
            .returning(|_, _, _, _| Ok("```json\n{\"from\": \"groq\"}\n```".to_string()));

        let generator = ResilientGenerator::new(
            target(ProviderKind::Gemini, primary),
            Some(target(ProviderKind::Groq, fallback)),
            RetryPolicy::default(),
        );
        let started = Instant::now();
        let value = generator.generate("sys", "user").await.unwrap();
        assert_eq!(value["from"], "groq");
        // 10s after the first attempt, 20s after the second, none after the last.
        assert_eq!(started.elapsed().as_secs(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_output_retries_without_waiting() {
        let mut primary = MockProvider::new();
        let mut calls = 0;
        primary.expect_call().times(2).returning(move |_, _, _, _| {
            calls += 1;
            if calls == 1 {
                Ok("not json at all".to_string())
            } else {
                Ok("{\"ok\": 1}".to_string())
            }
        });
        let generator = ResilientGenerator::new(
            target(ProviderKind::Ollama, primary),
            None,
            RetryPolicy::default(),
        );
        let started = Instant::now();
        generator.generate("sys", "user").await.unwrap();
        assert_eq!(started.elapsed().as_secs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn generic_errors_back_off_exponentially() {
        let mut primary = MockProvider::new();
        primary.expect_call().times(3).returning(|_, _, _, _| {
            Err(ProviderError::Http {
                provider: "groq".into(),
                status: 500,
                body: "boom".into(),
            })
        });
        let generator = ResilientGenerator::new(
            target(ProviderKind::Groq, primary),
            None,
            RetryPolicy::default(),
        );
        let started = Instant::now();
        let err = generator.generate("sys", "user").await.unwrap_err();
        // 1s + 2s between the three attempts.
        assert_eq!(started.elapsed().as_secs(), 3);
        match err {
            GenerateError::AllProvidersFailed { tried, last } => {
                assert_eq!(tried, "groq/groq-model");
                assert!(last.contains("500"));
            }
            other => panic!("expected AllProvidersFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn both_targets_failing_names_both() {
        let mut primary = MockProvider::new();
        primary
            .expect_call()
            .times(2)
            .returning(|_, _, _, _| {
                Err(ProviderError::MissingCredential {
                    var: "GEMINI_API_KEY".into(),
                })
            });
        let mut fallback = MockProvider::new();
        fallback
            .expect_call()
            .times(2)
            .returning(|_, _, _, _| Ok("still not json".to_string()));
        let policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        };
        let generator = ResilientGenerator::new(
            target(ProviderKind::Gemini, primary),
            Some(target(ProviderKind::Groq, fallback)),
            policy,
        );
        let err = generator.generate("sys", "user").await.unwrap_err();
        let message = err.to_string();
        assert!(
            message.contains("gemini/gemini-model, groq/groq-model"),
            "{message}"
        );
        assert!(message.contains("not valid JSON"), "{message}");
    }
}
