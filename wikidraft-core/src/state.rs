//! Persistent ledger of processed (repository, change kind) pairs.
//!
//! The ledger lets repeated runs skip work whose triggering commit has
//! already produced an entry. It is a small JSON document rewritten in full
//! after every mark.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contract::ChangeKind;
use crate::error::StateError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub processed_at: String,
    pub last_sha: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    pub processed_repos: BTreeMap<String, LedgerEntry>,
    #[serde(default)]
    pub last_run: Option<String>,
}

fn ledger_key(repo: &str, kind: ChangeKind) -> String {
    format!("{repo}:{kind}")
}

pub struct StateTracker {
    path: PathBuf,
    ledger: Ledger,
}

impl StateTracker {
    /// Load the ledger at `path`; a missing file starts an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let ledger = if path.exists() {
            let text = fs::read_to_string(&path)?;
            serde_json::from_str(&text)?
        } else {
            debug!(path = %path.display(), "No state file yet, starting empty");
            Ledger::default()
        };
        Ok(Self { path, ledger })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// True only when `sha` is non-empty and equals the SHA recorded for this pair.
    pub fn is_processed(&self, repo: &str, kind: ChangeKind, sha: &str) -> bool {
        if sha.is_empty() {
            return false;
        }
        self.ledger
            .processed_repos
            .get(&ledger_key(repo, kind))
            .is_some_and(|entry| entry.last_sha == sha)
    }

    /// Record `sha` for the pair and flush the ledger to disk.
    pub fn mark_processed(
        &mut self,
        repo: &str,
        kind: ChangeKind,
        sha: &str,
    ) -> Result<(), StateError> {
        let now = Utc::now().to_rfc3339();
        self.ledger.processed_repos.insert(
            ledger_key(repo, kind),
            LedgerEntry {
                processed_at: now.clone(),
                last_sha: sha.to_string(),
            },
        );
        self.ledger.last_run = Some(now);
        self.save()?;
        info!(repo, kind = %kind, sha, "Marked processed");
        Ok(())
    }

    fn save(&self) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.ledger)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_empty_ledger() {
        let dir = tempdir().unwrap();
        let tracker = StateTracker::load(dir.path().join("none.json")).unwrap();
        assert!(tracker.ledger().processed_repos.is_empty());
        assert!(!tracker.is_processed("foo", ChangeKind::NewRepo, "abc1234"));
    }

    #[test]
    fn mark_then_query_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/state/processed.json");
        let mut tracker = StateTracker::load(&path).unwrap();
        tracker
            .mark_processed("foo", ChangeKind::NewFeature, "abc1234")
            .unwrap();

        let reloaded = StateTracker::load(&path).unwrap();
        assert!(reloaded.is_processed("foo", ChangeKind::NewFeature, "abc1234"));
        assert!(!reloaded.is_processed("foo", ChangeKind::NewFeature, "fff0000"));
        assert!(!reloaded.is_processed("foo", ChangeKind::StatusUpdate, "abc1234"));
        assert!(reloaded.ledger().last_run.is_some());

        let text = fs::read_to_string(&path).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&text).unwrap();
        let entry = &raw["processed_repos"]["foo:new_feature"];
        assert_eq!(entry["last_sha"], "abc1234");
    }

    #[test]
    fn empty_sha_is_never_processed() {
        let dir = tempdir().unwrap();
        let mut tracker = StateTracker::load(dir.path().join("s.json")).unwrap();
        tracker
            .mark_processed("foo", ChangeKind::NewRepo, "")
            .unwrap();
        assert!(!tracker.is_processed("foo", ChangeKind::NewRepo, ""));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(StateTracker::load(&path), Err(StateError::Json(_))));
    }
}
