//! # detect: classify scanned repositories into change events
//!
//! Compares the current scan against the published entries and emits one
//! [`ChangeEvent`] per noteworthy change:
//!
//! - `new_repo` when no published project matches the repository's slug or name
//! - `new_feature` / `status_update` from keyword counts over recent commits
//! - `new_tech` once per run for every language with no deep-dive entry yet
//!
//! Keyword matching is plain substring matching on the lowercased commit
//! messages, and each keyword counts at most once.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use crate::contract::{ChangeEvent, ChangeKind, ExistingEntries, RepositoryInfo};

pub const FEATURE_KEYWORDS: [&str; 7] = [
    "feat",
    "feature",
    "add",
    "implement",
    "new",
    "integrate",
    "support",
];

pub const PROGRESS_KEYWORDS: [&str; 9] = [
    "fix", "refactor", "test", "doc", "update", "improve", "optimize", "ci", "deploy",
];

const MAX_PACKAGE_JSON_DEPS: usize = 20;

/// Keyword statistics for one repository's recent commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySignals {
    pub feature_hits: usize,
    pub progress_hits: usize,
    pub commit_count: usize,
}

impl ActivitySignals {
    pub fn from_messages(messages: &[String]) -> Self {
        let all = messages.join(" ").to_lowercase();
        let hits = |keywords: &[&str]| keywords.iter().filter(|kw| all.contains(*kw)).count();
        Self {
            feature_hits: hits(&FEATURE_KEYWORDS),
            progress_hits: hits(&PROGRESS_KEYWORDS),
            commit_count: messages.len(),
        }
    }

    /// Change kind for a repository that already has a published entry.
    pub fn classify(&self) -> Option<ChangeKind> {
        if self.feature_hits >= 2 || self.commit_count >= 10 {
            Some(ChangeKind::NewFeature)
        } else if self.progress_hits >= 2 || self.commit_count >= 5 {
            Some(ChangeKind::StatusUpdate)
        } else {
            None
        }
    }
}

fn non_alnum() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"))
}

/// Lowercase, collapse non-alphanumeric runs into `-`, trim `-` from both ends.
pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    let slug = non_alnum().replace_all(&lower, "-");
    slug.trim_matches('-').to_string()
}

/// Key under which a technology's deep-dive is stored: lowercased, spaces and periods removed.
pub fn tech_key(name: &str) -> String {
    let lower = name.to_lowercase();
    lower.chars().filter(|c| *c != ' ' && *c != '.').collect()
}

/// Dependency names declared in `package.json` and `requirements.txt`.
///
/// Unparseable manifests are skipped.
pub fn mine_dependencies(repo: &RepositoryInfo) -> Vec<String> {
    let mut deps = Vec::new();

    if let Some(content) = repo.config_files.get("package.json") {
        match serde_json::from_str::<Value>(content) {
            Ok(manifest) => {
                let mut names: Vec<String> = ["dependencies", "devDependencies"]
                    .iter()
                    .filter_map(|section| manifest.get(*section).and_then(Value::as_object))
                    .flat_map(|section| section.keys().cloned())
                    .collect();
                names.truncate(MAX_PACKAGE_JSON_DEPS);
                deps.extend(names);
            }
            Err(e) => debug!(repo = %repo.name, error = %e, "Skipping unparseable package.json"),
        }
    }

    if let Some(content) = repo.config_files.get("requirements.txt") {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let name = line.split(['>', '=', '<', '[']).next().unwrap_or("").trim();
            if !name.is_empty() {
                deps.push(name.to_string());
            }
        }
    }

    deps
}

/// Published projects indexed by slug and by lowercased name.
struct ProjectIndex<'a> {
    by_slug: HashMap<String, &'a Value>,
    by_name: HashMap<String, &'a Value>,
}

impl<'a> ProjectIndex<'a> {
    fn build(projects: &'a [Value]) -> Self {
        let mut by_slug = HashMap::new();
        let mut by_name = HashMap::new();
        for entry in projects {
            let name = entry.get("name").and_then(Value::as_str);
            let slug = entry
                .get("slug")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| name.map(slugify));
            if let Some(slug) = slug {
                by_slug.insert(slug, entry);
            }
            if let Some(name) = name {
                by_name.insert(name.to_lowercase(), entry);
            }
        }
        Self { by_slug, by_name }
    }

    fn lookup(&self, repo_name: &str) -> Option<&'a Value> {
        self.by_slug
            .get(&slugify(repo_name))
            .or_else(|| self.by_name.get(&repo_name.to_lowercase()))
            .copied()
    }
}

/// Produce the change events for one scan.
pub fn detect(repos: &[RepositoryInfo], existing: &ExistingEntries) -> Vec<ChangeEvent> {
    let index = ProjectIndex::build(&existing.projects);
    let mut seen_tech: HashSet<String> = existing.tech_dives.keys().cloned().collect();
    let mut events = Vec::new();

    for repo in repos {
        let messages = repo.commit_messages();

        match index.lookup(&repo.name) {
            None => {
                info!(repo = %repo.name, "New repository detected");
                let mut event = ChangeEvent::new(ChangeKind::NewRepo, repo);
                event.commit_messages = messages.clone();
                event.new_dependencies = mine_dependencies(repo);
                events.push(event);
            }
            Some(entry) if !messages.is_empty() => {
                let signals = ActivitySignals::from_messages(&messages);
                debug!(repo = %repo.name, ?signals, "Activity signals");
                if let Some(kind) = signals.classify() {
                    info!(repo = %repo.name, kind = %kind, "Change detected");
                    let mut event = ChangeEvent::new(kind, repo);
                    let count = signals.commit_count;
                    event.diff_summary = match kind {
                        ChangeKind::NewFeature => format!("{count} commits with feature additions"),
                        _ => format!("{count} commits since the last scan"),
                    };
                    event.commit_messages = messages.clone();
                    event.existing_entry = Some(entry.clone());
                    if kind == ChangeKind::NewFeature {
                        event.new_dependencies = mine_dependencies(repo);
                    }
                    events.push(event);
                }
            }
            Some(_) => {}
        }

        for language in repo.languages.keys() {
            let key = tech_key(language);
            if key.is_empty() || !seen_tech.insert(key) {
                continue;
            }
            info!(repo = %repo.name, technology = %language, "New technology detected");
            let mut event = ChangeEvent::new(ChangeKind::NewTech, repo);
            event.detected_technologies = vec![language.clone()];
            events.push(event);
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::CommitInfo;
    use serde_json::json;

    fn repo_with(name: &str, messages: &[&str]) -> RepositoryInfo {
        let mut repo = RepositoryInfo::new(name, format!("me/{name}"));
        repo.recent_commits = messages
            .iter()
            .enumerate()
            .map(|(i, m)| CommitInfo {
                sha: format!("sha{i:04}"),
                message: m.to_string(),
                date: String::new(),
            })
            .collect();
        repo
    }

    fn published(names: &[&str]) -> ExistingEntries {
        ExistingEntries {
            projects: names
                .iter()
                .map(|n| json!({"name": n, "slug": slugify(n)}))
                .collect(),
            tech_dives: serde_json::Map::new(),
        }
    }

    #[test]
    fn slug_and_tech_key_normalization() {
        assert_eq!(slugify("Foo_Bar"), "foo-bar");
        assert_eq!(slugify("--My  Cool.Repo!!"), "my-cool-repo");
        assert_eq!(tech_key("Vim Script"), "vimscript");
        assert_eq!(tech_key("Node.js"), "nodejs");
        assert_eq!(tech_key("C#"), "c#");
    }

    #[test]
    fn unmatched_repo_is_new_even_without_commits() {
        let repos = vec![repo_with("Foo_Bar", &[])];
        let events = detect(&repos, &ExistingEntries::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::NewRepo);
        assert_eq!(events[0].repo_name, "Foo_Bar");
    }

    #[test]
    fn matches_published_entry_by_slug() {
        let repos = vec![repo_with("Foo_Bar", &[])];
        let existing = ExistingEntries {
            projects: vec![json!({"name": "Something Else", "slug": "foo-bar"})],
            tech_dives: serde_json::Map::new(),
        };
        assert!(detect(&repos, &existing).is_empty());
    }

    #[test]
    fn two_feature_keywords_make_a_feature() {
        let repos = vec![repo_with("api", &["feat: login", "implement oauth"])];
        let events = detect(&repos, &published(&["api"]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::NewFeature);
        assert!(events[0].existing_entry.is_some());
        assert_eq!(events[0].commit_messages.len(), 2);
    }

    #[test]
    fn one_feature_and_two_progress_keywords_make_a_status_update() {
        let repos = vec![repo_with("api", &["fix typo", "refactor add"])];
        let events = detect(&repos, &published(&["api"]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::StatusUpdate);
    }

    #[test]
    fn quiet_repository_emits_nothing() {
        let repos = vec![repo_with("api", &["bump", "wip"])];
        assert!(detect(&repos, &published(&["api"])).is_empty());
    }

    #[test]
    fn commit_count_thresholds() {
        let five: Vec<String> = (0..5).map(|i| format!("wip {i}")).collect();
        let signals = ActivitySignals::from_messages(&five);
        assert_eq!(signals.classify(), Some(ChangeKind::StatusUpdate));

        let ten: Vec<String> = (0..10).map(|i| format!("wip {i}")).collect();
        let signals = ActivitySignals::from_messages(&ten);
        assert_eq!(signals.classify(), Some(ChangeKind::NewFeature));

        let four: Vec<String> = (0..4).map(|i| format!("wip {i}")).collect();
        assert_eq!(ActivitySignals::from_messages(&four).classify(), None);
    }

    #[test]
    fn keywords_count_once_each() {
        let messages = vec!["fix fix fix".to_string(), "fix again".to_string()];
        let signals = ActivitySignals::from_messages(&messages);
        assert_eq!(signals.progress_hits, 1);
    }

    #[test]
    fn new_tech_is_emitted_once_per_key() {
        let mut first = repo_with("one", &[]);
        first.languages.insert("Rust".into(), 100);
        first.languages.insert("Go".into(), 10);
        let mut second = repo_with("two", &[]);
        second.languages.insert("Rust".into(), 50);

        let mut existing = published(&["one", "two"]);
        let go = json!({"title": "Go"});
        existing.tech_dives.insert("go".into(), go);

        let events = detect(&[first, second], &existing);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::NewTech);
        assert_eq!(events[0].repo_name, "one");
        assert_eq!(events[0].detected_technologies, vec!["Rust".to_string()]);
    }

    #[test]
    fn mines_package_json_and_requirements() {
        let mut repo = repo_with("svc", &[]);
        repo.config_files.insert(
            "package.json".into(),
            r#"{"dependencies": {"react": "^18"}, "devDependencies": {"vitest": "^1"}}"#.into(),
        );
        repo.config_files.insert(
            "requirements.txt".into(),
            "# pinned\nrequests>=2.0\nuvicorn[standard]==0.30\n\nflask\n".into(),
        );
        assert_eq!(
            mine_dependencies(&repo),
            vec!["react", "vitest", "requests", "uvicorn", "flask"]
        );
    }

    #[test]
    fn package_json_is_capped_and_garbage_is_skipped() {
        let deps: serde_json::Map<String, Value> = (0..25)
            .map(|i| (format!("dep{i:02}"), json!("1")))
            .collect();
        let mut repo = repo_with("svc", &[]);
        let manifest = json!({ "dependencies": deps }).to_string();
        repo.config_files.insert("package.json".into(), manifest);
        assert_eq!(mine_dependencies(&repo).len(), 20);

        let garbage = "{ truncated".to_string();
        repo.config_files.insert("package.json".into(), garbage);
        assert!(mine_dependencies(&repo).is_empty());
    }
}
