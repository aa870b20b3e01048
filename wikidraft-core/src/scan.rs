//! # scan: GitHub implementation of [`RepositorySource`]
//!
//! Lists a user's own repositories (forks and excluded names skipped) and
//! enriches each with languages, README, top-level file tree, recognized
//! configuration files, CI workflows and the commits inside the lookback
//! window.
//!
//! Requests carry `User-Agent: wikidraft` and, when a token is configured,
//! `Authorization: token …`. A 404 is treated as "nothing there". A 403 with
//! `X-RateLimit-Reset` waits for the reset (at most 60 s) and retries; other
//! transport failures retry with `2^attempt` s backoff, three attempts total.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::contract::{truncate_chars, CommitInfo, RepositoryInfo, RepositorySource};
use crate::error::ScanError;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

pub const CONFIG_PATTERNS: [&str; 18] = [
    "package.json",
    "requirements.txt",
    "Pipfile",
    "pyproject.toml",
    "go.mod",
    "Cargo.toml",
    "pom.xml",
    "build.gradle",
    "Dockerfile",
    "docker-compose.yml",
    "docker-compose.yaml",
    "Makefile",
    "Taskfile.yml",
    "terraform.tf",
    "main.tf",
    ".env.example",
    "config.yaml",
    "config.yml",
];

const JSON_ACCEPT: &str = "application/vnd.github.v3+json";
const RAW_ACCEPT: &str = "text/plain";
const PAGE_SIZE: usize = 100;
const MAX_ATTEMPTS: u32 = 3;
const MAX_RATE_LIMIT_WAIT: u64 = 60;
const README_LIMIT: usize = 8000;
const FILE_LIMIT: usize = 3000;
const MAX_WORKFLOWS: usize = 5;
const COMMITS_PER_PAGE: usize = 30;
const COMMIT_MESSAGE_LIMIT: usize = 200;

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub username: String,
    pub token: Option<String>,
    pub exclude_repos: Vec<String>,
    pub lookback_days: u32,
    pub api_base: String,
}

impl ScanConfig {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: None,
            exclude_repos: Vec::new(),
            lookback_days: 7,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

pub struct GitHubScanner {
    client: reqwest::Client,
    config: ScanConfig,
    exclude: HashSet<String>,
}

fn transport(url: &str, source: reqwest::Error) -> ScanError {
    ScanError::Transport {
        url: url.to_string(),
        source,
    }
}

impl GitHubScanner {
    pub fn new(mut config: ScanConfig) -> Result<Self, ScanError> {
        config.api_base = config.api_base.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| transport(&config.api_base, source))?;
        let exclude = config.exclude_repos.iter().cloned().collect();
        Ok(Self {
            client,
            config,
            exclude,
        })
    }

    async fn fetch(&self, url: &str, accept: &str) -> Result<String, ScanError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self
                .client
                .get(url)
                .header(ACCEPT, accept)
                .header(USER_AGENT, "wikidraft");
            if let Some(token) = self.config.token.as_deref().filter(|t| !t.is_empty()) {
                request = request.header(AUTHORIZATION, format!("token {token}"));
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(source) if attempt < MAX_ATTEMPTS => {
                    let wait = 2u64.pow(attempt - 1);
                    warn!(
                        url,
                        error = %source,
                        wait_secs = wait,
                        "GitHub request failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    continue;
                }
                Err(source) => return Err(transport(url, source)),
            };

            let status = response.status();
            if status == StatusCode::FORBIDDEN && attempt < MAX_ATTEMPTS {
                if let Some(wait) = rate_limit_wait(response.headers(), Utc::now().timestamp()) {
                    warn!(
                        url,
                        wait_secs = wait.as_secs(),
                        "GitHub rate limit hit, waiting"
                    );
                    tokio::time::sleep(wait).await;
                    continue;
                }
            }
            if status == StatusCode::NOT_FOUND {
                debug!(url, "Not found");
                return Err(ScanError::NotFound(url.to_string()));
            }
            if !status.is_success() {
                return Err(ScanError::Http {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
            return response
                .text()
                .await
                .map_err(|source| transport(url, source));
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value, ScanError> {
        let text = self.fetch(url, JSON_ACCEPT).await?;
        serde_json::from_str(&text).map_err(|e| ScanError::Payload {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// JSON at `url`, with 404 mapped to `Value::Null`.
    async fn get_json_or_null(&self, url: &str) -> Result<Value, ScanError> {
        match self.get_json(url).await {
            Err(ScanError::NotFound(_)) => Ok(Value::Null),
            other => other,
        }
    }

    /// Raw file behind a contents-API record's `download_url`, truncated.
    async fn download(&self, record: &Value, limit: usize) -> Result<Option<String>, ScanError> {
        let Some(url) = record.get("download_url").and_then(Value::as_str) else {
            return Ok(None);
        };
        match self.fetch(url, RAW_ACCEPT).await {
            Ok(text) => Ok(Some(truncate_chars(&text, limit).to_string())),
            Err(ScanError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn repo_url(&self, repo: &RepositoryInfo, path: &str) -> String {
        format!("{}/repos/{}/{}", self.config.api_base, repo.full_name, path)
    }

    async fn repo_json(&self, repo: &RepositoryInfo, path: &str) -> Result<Value, ScanError> {
        self.get_json_or_null(&self.repo_url(repo, path)).await
    }
}

/// Wait until the rate-limit window resets, capped at one minute.
pub fn rate_limit_wait(headers: &HeaderMap, now_epoch: i64) -> Option<Duration> {
    let reset = headers.get("x-ratelimit-reset")?.to_str().ok()?;
    let reset: i64 = reset.trim().parse().ok()?;
    let wait = (reset - now_epoch).max(1) as u64;
    Some(Duration::from_secs(wait.min(MAX_RATE_LIMIT_WAIT)))
}

fn str_field<'a>(record: &'a Value, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

/// Listing record to unenriched repository; `None` for forks and nameless records.
pub fn repo_from_listing(record: &Value) -> Option<RepositoryInfo> {
    if record["fork"].as_bool().unwrap_or(false) {
        return None;
    }
    let text = |key: &str| str_field(record, key).unwrap_or("").to_string();
    let count = |key: &str| record[key].as_u64().unwrap_or(0);

    let name = str_field(record, "name")?;
    let full_name = str_field(record, "full_name")?;
    let mut repo = RepositoryInfo::new(name, full_name);
    repo.description = text("description");
    if let Some(language) = str_field(record, "language") {
        repo.primary_language = language.to_string();
    }
    repo.topics = record
        .get("topics")
        .and_then(Value::as_array)
        .map(|topics| {
            topics
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if let Some(branch) = str_field(record, "default_branch") {
        repo.default_branch = branch.to_string();
    }
    repo.created_at = text("created_at");
    repo.updated_at = text("updated_at");
    repo.pushed_at = text("pushed_at");
    repo.stars = count("stargazers_count");
    repo.open_issues = count("open_issues_count");
    repo.has_wiki = record["has_wiki"].as_bool().unwrap_or(false);
    Some(repo)
}

/// Top-level listing to names, directories suffixed with `/`.
pub fn tree_from_contents(listing: &Value) -> Vec<String> {
    listing
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item.get("name")?.as_str()?;
                    let is_dir = str_field(item, "type") == Some("dir");
                    Some(if is_dir { format!("{name}/") } else { name.to_string() })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn commits_from_api(listing: &Value) -> Vec<CommitInfo> {
    listing
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let sha = item.get("sha")?.as_str()?;
                    let commit = item.get("commit")?;
                    let message = str_field(commit, "message").unwrap_or("");
                    let date = commit
                        .pointer("/committer/date")
                        .and_then(Value::as_str)
                        .unwrap_or("");
                    Some(CommitInfo {
                        sha: truncate_chars(sha, 7).to_string(),
                        message: truncate_chars(message, COMMIT_MESSAGE_LIMIT).to_string(),
                        date: date.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl RepositorySource for GitHubScanner {
    async fn list_repositories(&self) -> Result<Vec<RepositoryInfo>, ScanError> {
        let mut repos = Vec::new();
        let mut page = 1;
        loop {
            let url = format!(
                "{}/users/{}/repos?per_page={PAGE_SIZE}&page={page}&sort=updated&type=owner",
                self.config.api_base, self.config.username
            );
            let batch = self.get_json_or_null(&url).await?;
            let Some(items) = batch.as_array() else { break };
            if items.is_empty() {
                break;
            }
            for item in items {
                match repo_from_listing(item) {
                    Some(repo) if self.exclude.contains(&repo.name) => {
                        debug!(repo = %repo.name, "Excluded by configuration");
                    }
                    Some(repo) => repos.push(repo),
                    None => {}
                }
            }
            if items.len() < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        info!(count = repos.len(), user = %self.config.username, "Scanned repositories");
        Ok(repos)
    }

    async fn enrich(&self, repo: &mut RepositoryInfo) -> Result<(), ScanError> {
        debug!(repo = %repo.full_name, "Enriching repository");

        let languages = self.repo_json(repo, "languages").await?;
        if let Some(map) = languages.as_object() {
            repo.languages = map
                .iter()
                .filter_map(|(name, bytes)| bytes.as_u64().map(|b| (name.clone(), b)))
                .collect();
        }

        let readme = self.repo_json(repo, "readme").await?;
        if let Some(text) = self.download(&readme, README_LIMIT).await? {
            repo.readme_content = text;
        }

        let listing = self.repo_json(repo, "contents/").await?;
        repo.file_tree = tree_from_contents(&listing);

        let present: HashSet<&str> = repo
            .file_tree
            .iter()
            .map(|f| f.trim_end_matches('/'))
            .collect();
        let wanted: Vec<&str> = CONFIG_PATTERNS
            .iter()
            .copied()
            .filter(|f| present.contains(f))
            .collect();
        let has_github_dir = present.contains(".github");
        for fname in wanted {
            let record = self.repo_json(repo, &format!("contents/{fname}")).await?;
            if let Some(text) = self.download(&record, FILE_LIMIT).await? {
                repo.config_files.insert(fname.to_string(), text);
            }
        }

        if has_github_dir {
            let workflows = self.repo_json(repo, "contents/.github/workflows").await?;
            let records = workflows.as_array().map(Vec::as_slice).unwrap_or_default();
            for record in records.iter().take(MAX_WORKFLOWS) {
                let Some(name) = str_field(record, "name") else {
                    continue;
                };
                if !(name.ends_with(".yml") || name.ends_with(".yaml")) {
                    continue;
                }
                if let Some(text) = self.download(record, FILE_LIMIT).await? {
                    repo.cicd_workflows.insert(name.to_string(), text);
                }
            }
        }

        let lookback = chrono::Duration::days(i64::from(self.config.lookback_days));
        let since = (Utc::now() - lookback).to_rfc3339_opts(SecondsFormat::Secs, true);
        let path = format!("commits?per_page={COMMITS_PER_PAGE}&since={since}");
        let commits = self.repo_json(repo, &path).await?;
        repo.recent_commits = commits_from_api(&commits);

        debug!(
            repo = %repo.name,
            languages = repo.languages.len(),
            config_files = repo.config_files.len(),
            workflows = repo.cicd_workflows.len(),
            commits = repo.recent_commits.len(),
            "Enrichment complete"
        );
        Ok(())
    }
}
