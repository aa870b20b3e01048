//! Provider clients against a loopback server: request shape, auth headers
//! and mapping of HTTP statuses onto `ProviderError`.

mod common;

use std::time::Duration;

use common::{CannedServer, Route};
use wikidraft_core::error::{GenerateError, ProviderError};
use wikidraft_core::generate::{Generator, ResilientGenerator, RetryPolicy, Target};
use wikidraft_core::provider::{build_provider, ProviderConfig, ProviderKind};

const CHAT_PATH: &str = "/openai/v1/chat/completions";

fn config_for(server: &CannedServer) -> ProviderConfig {
    ProviderConfig {
        gemini_api_key: Some("gem-key".into()),
        groq_api_key: Some("groq-key".into()),
        anthropic_api_key: Some("ant-key".into()),
        gemini_base_url: server.base_url.clone(),
        groq_base_url: server.base_url.clone(),
        anthropic_base_url: server.base_url.clone(),
        ollama_host: server.base_url.clone(),
        max_output_tokens: 1024,
    }
}

#[tokio::test]
async fn groq_sends_chat_completion_and_returns_content() {
    let server = CannedServer::start().await;
    server.add(Route::new(
        CHAT_PATH,
        200,
        r#"{"choices":[{"message":{"role":"assistant","content":"{\"ok\":true}"}}]}"#,
    ));
    let provider = build_provider(ProviderKind::Groq, &config_for(&server)).unwrap();

    let text = provider
        .call("llama-3.3-70b", "be brief", "describe foo", 0.3)
        .await
        .unwrap();
    assert_eq!(text, "{\"ok\":true}");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].header("authorization"), Some("Bearer groq-key"));
    let body = requests[0].json();
    assert_eq!(body["model"], "llama-3.3-70b");
    assert_eq!(body["messages"][0]["content"], "be brief");
    assert_eq!(body["max_tokens"], 1024);
}

#[tokio::test]
async fn gemini_uses_model_path_and_api_key_header() {
    let server = CannedServer::start().await;
    server.add(Route::new(
        "/v1beta/models/gemini-2.0-flash:generateContent",
        200,
        r#"{"candidates":[{"content":{"parts":[{"text":"{}"}]}}]}"#,
    ));
    let provider = build_provider(ProviderKind::Gemini, &config_for(&server)).unwrap();

    let text = provider
        .call("gemini-2.0-flash", "s", "u", 0.4)
        .await
        .unwrap();
    assert_eq!(text, "{}");
    let requests = server.requests();
    assert_eq!(requests[0].header("x-goog-api-key"), Some("gem-key"));
    let body = requests[0].json();
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
}

#[tokio::test]
async fn anthropic_sends_version_header() {
    let server = CannedServer::start().await;
    server.add(Route::new(
        "/v1/messages",
        200,
        r#"{"content":[{"type":"text","text":"reviewed"}]}"#,
    ));
    let provider = build_provider(ProviderKind::Anthropic, &config_for(&server)).unwrap();

    let text = provider.call("opus", "s", "u", 0.2).await.unwrap();
    assert_eq!(text, "reviewed");
    let requests = server.requests();
    assert_eq!(requests[0].header("x-api-key"), Some("ant-key"));
    assert_eq!(requests[0].header("anthropic-version"), Some("2023-06-01"));
}

#[tokio::test]
async fn ollama_needs_no_key() {
    let server = CannedServer::start().await;
    server.add(Route::new("/api/generate", 200, r#"{"response":"{\"a\":1}","done":true}"#));
    let config = ProviderConfig {
        ollama_host: format!("{}/", server.base_url),
        ..ProviderConfig::default()
    };
    let provider = build_provider(ProviderKind::Ollama, &config).unwrap();

    let text = provider.call("llama3", "s", "u", 0.4).await.unwrap();
    assert_eq!(text, "{\"a\":1}");
    assert_eq!(server.requests()[0].json()["stream"], false);
}

#[tokio::test]
async fn status_codes_map_to_error_variants() {
    let server = CannedServer::start().await;
    server.add(Route::new(CHAT_PATH, 429, r#"{"error":"slow down"}"#).once());
    server.add(Route::new(CHAT_PATH, 500, r#"{"error":"exploded"}"#).once());
    server.add(Route::new(CHAT_PATH, 200, r#"{"choices":[]}"#).once());
    let provider = build_provider(ProviderKind::Groq, &config_for(&server)).unwrap();

    let first = provider.call("m", "s", "u", 0.1).await.unwrap_err();
    assert!(first.is_rate_limited(), "{first:?}");

    match provider.call("m", "s", "u", 0.1).await.unwrap_err() {
        ProviderError::Http { status, body, .. } => {
            assert_eq!(status, 500);
            assert!(body.contains("exploded"));
        }
        other => panic!("expected Http, got {other:?}"),
    }

    match provider.call("m", "s", "u", 0.1).await.unwrap_err() {
        ProviderError::MalformedResponse { path, body, .. } => {
            assert_eq!(path, "choices[0].message.content");
            assert!(body.contains("choices"));
        }
        other => panic!("expected MalformedResponse, got {other:?}"),
    }
}

#[tokio::test]
async fn generator_retries_rate_limit_over_http() {
    let server = CannedServer::start().await;
    server.add(Route::new(CHAT_PATH, 429, "{}").once());
    server.add(Route::new(
        CHAT_PATH,
        200,
        r#"{"choices":[{"message":{"content":"```json\n{\"name\":\"foo\"}\n```"}}]}"#,
    ));
    let groq = build_provider(ProviderKind::Groq, &config_for(&server)).unwrap();
    let generator = ResilientGenerator::new(
        Target::new(ProviderKind::Groq, "llama", groq),
        None,
        RetryPolicy {
            retry_delay: Duration::ZERO,
            ..RetryPolicy::default()
        },
    );

    let value = generator.generate("s", "u").await.unwrap();
    assert_eq!(value["name"], "foo");
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn generator_gives_up_when_every_provider_fails() {
    let server = CannedServer::start().await;
    // Gemini returns 404 for everything; Groq has no key.
    let config = ProviderConfig {
        groq_api_key: None,
        ..config_for(&server)
    };
    let gemini = build_provider(ProviderKind::Gemini, &config).unwrap();
    let groq = build_provider(ProviderKind::Groq, &config).unwrap();
    let generator = ResilientGenerator::new(
        Target::new(ProviderKind::Gemini, "g", gemini),
        Some(Target::new(ProviderKind::Groq, "q", groq)),
        RetryPolicy {
            max_retries: 1,
            ..RetryPolicy::default()
        },
    );

    match generator.generate("s", "u").await.unwrap_err() {
        GenerateError::AllProvidersFailed { tried, last } => {
            assert_eq!(tried, "gemini/g, groq/q");
            assert!(last.contains("GROQ_API_KEY"), "{last}");
        }
        other => panic!("expected AllProvidersFailed, got {other:?}"),
    }
}
