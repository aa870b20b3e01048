//! # contract: shared data model and the repository-source interface
//!
//! This module defines the plain data types that flow between the pipeline
//! stages and the [`RepositorySource`] trait through which repository
//! metadata enters the system.
//!
//! ## Types
//! - [`RepositoryInfo`] / [`CommitInfo`]: one scanned repository. Created
//!   fresh each run, never persisted, read-only after enrichment.
//! - [`ChangeKind`] / [`ChangeEvent`]: a unit of work produced by
//!   [`crate::detect`] and consumed by the drafting and review steps.
//! - [`ExistingEntries`]: the entries already published on the site, parsed
//!   once per run by [`crate::literal::load_existing_entries`].
//!
//! ## Mocking & Testing
//! - [`RepositorySource`] is annotated for `mockall`, so pipeline tests can
//!   feed canned repositories without touching the network.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ScanError;

/// One recent commit, newest first within [`RepositoryInfo::recent_commits`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Short (7 character) SHA.
    pub sha: String,
    /// Commit message, truncated to 200 characters.
    pub message: String,
    pub date: String,
}

/// Scanned state of a single GitHub repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    /// Unique within a scan.
    pub name: String,
    /// `owner/name`, used to address the repository in API calls.
    pub full_name: String,
    pub description: String,
    pub primary_language: String,
    /// Language name to byte count.
    pub languages: BTreeMap<String, u64>,
    pub topics: Vec<String>,
    pub default_branch: String,
    pub created_at: String,
    pub updated_at: String,
    pub pushed_at: String,
    pub stars: u64,
    pub open_issues: u64,
    pub has_wiki: bool,
    /// README text, truncated.
    pub readme_content: String,
    /// Top-level entries; directories carry a trailing `/`.
    pub file_tree: Vec<String>,
    /// Recognized configuration filename to truncated content.
    pub config_files: BTreeMap<String, String>,
    /// CI workflow filename to truncated content.
    pub cicd_workflows: BTreeMap<String, String>,
    pub recent_commits: Vec<CommitInfo>,
}

impl RepositoryInfo {
    /// Minimal record as returned by a repository listing, before enrichment.
    pub fn new(name: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            full_name: full_name.into(),
            primary_language: "Unknown".to_string(),
            default_branch: "main".to_string(),
            ..Default::default()
        }
    }

    pub fn commit_messages(&self) -> Vec<String> {
        self.recent_commits
            .iter()
            .map(|c| c.message.clone())
            .collect()
    }
}

/// Kinds of detected change. Serialized in snake_case (`new_repo`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    NewRepo,
    NewFeature,
    StatusUpdate,
    NewTech,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::NewRepo => "new_repo",
            ChangeKind::NewFeature => "new_feature",
            ChangeKind::StatusUpdate => "status_update",
            ChangeKind::NewTech => "new_tech",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected unit of work for one repository.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub repo_name: String,
    pub repo_info: Option<RepositoryInfo>,
    /// Best effort; usually empty because the listing API does not report files.
    pub changed_files: Vec<String>,
    pub commit_messages: Vec<String>,
    pub diff_summary: String,
    pub new_dependencies: Vec<String>,
    /// The published entry this change applies to, if any.
    pub existing_entry: Option<Value>,
    /// Only populated for [`ChangeKind::NewTech`].
    pub detected_technologies: Vec<String>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, repo: &RepositoryInfo) -> Self {
        Self {
            kind,
            repo_name: repo.name.clone(),
            repo_info: Some(repo.clone()),
            changed_files: Vec::new(),
            commit_messages: Vec::new(),
            diff_summary: String::new(),
            new_dependencies: Vec::new(),
            existing_entry: None,
            detected_technologies: Vec::new(),
        }
    }

    /// SHA of the newest commit of the subject repository, or `""` when unknown.
    pub fn trigger_sha(&self) -> &str {
        self.repo_info
            .as_ref()
            .and_then(|r| r.recent_commits.first())
            .map(|c| c.sha.as_str())
            .unwrap_or("")
    }
}

/// Entries already present in the site's data document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExistingEntries {
    /// Project records, in document order.
    pub projects: Vec<Value>,
    /// Technology key to deep-dive record.
    pub tech_dives: serde_json::Map<String, Value>,
}

/// Source of repository metadata (GitHub in production, mocks in tests).
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RepositorySource: Send + Sync {
    /// List all repositories to consider, unenriched.
    async fn list_repositories(&self) -> Result<Vec<RepositoryInfo>, ScanError>;

    /// Fill in languages, README, file tree, config files, workflows and commits.
    ///
    /// On error the repository keeps whatever was gathered before the failure.
    async fn enrich(&self, repo: &mut RepositoryInfo) -> Result<(), ScanError>;
}

/// First `max` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
