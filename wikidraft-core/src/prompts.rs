//! # prompts: fill YAML prompt templates from scan data
//!
//! A template is a YAML document with `system_prompt` and `user_prompt`
//! strings. `{{placeholder}}` markers in the user prompt are replaced with
//! values taken from the [`ChangeEvent`], the scanned repository and the
//! already-published entries. Unknown placeholders are left untouched.
//!
//! One template file per change kind lives in the templates directory:
//! `new_repo.yaml`, `new_feature.yaml`, `status_update.yaml`,
//! `technology_deep_dive.yaml`, plus `review.yaml` for the review pass.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::contract::{truncate_chars, ChangeEvent, ChangeKind, ExistingEntries, RepositoryInfo};
use crate::detect::tech_key;
use crate::error::TemplateError;

const README_LIMIT: usize = 5000;
const SNIPPET_LIMIT: usize = 2000;
const EXAMPLES_LIMIT: usize = 4000;
const DEEP_DIVE_EXAMPLES_LIMIT: usize = 6000;
const DRAFT_LIMIT: usize = 12000;
const MAX_COMMITS: usize = 20;
const MAX_DEPENDENCIES: usize = 20;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptTemplate {
    pub system_prompt: String,
    pub user_prompt: String,
}

impl PromptTemplate {
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        if !path.exists() {
            return Err(TemplateError::NotFound(path.display().to_string()));
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

/// System and user prompt ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

fn fill(template: &PromptTemplate, replacements: &[(&str, String)]) -> Prompt {
    let mut user = template.user_prompt.clone();
    for (name, value) in replacements {
        user = user.replace(&format!("{{{{{name}}}}}"), value);
    }
    Prompt {
        system: template.system_prompt.clone(),
        user,
    }
}

fn pretty(value: &impl serde::Serialize, limit: usize) -> String {
    let text = serde_json::to_string_pretty(value).unwrap_or_default();
    truncate_chars(&text, limit).to_string()
}

fn bullet_list<S: AsRef<str>>(items: &[S], limit: usize) -> String {
    items
        .iter()
        .take(limit)
        .map(|item| format!("- {}", item.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_snippets(files: &BTreeMap<String, String>, fence: &str) -> String {
    let mut out = String::new();
    for (name, content) in files {
        let content = truncate_chars(content, SNIPPET_LIMIT);
        out.push_str(&format!("\n### {name}\n```{fence}\n{content}\n```\n"));
    }
    out
}

fn or_default(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

fn languages_of(repo: &RepositoryInfo) -> String {
    if repo.languages.is_empty() {
        repo.primary_language.clone()
    } else {
        repo.languages.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

pub fn new_repo_prompt(
    template: &PromptTemplate,
    repo: &RepositoryInfo,
    examples: &[Value],
) -> Prompt {
    let sample: Vec<&Value> = examples.iter().take(2).collect();
    let topics = if repo.topics.is_empty() {
        "None".to_string()
    } else {
        repo.topics.join(", ")
    };
    let description = or_default(repo.description.clone(), "No description provided");
    let readme = truncate_chars(&repo.readme_content, README_LIMIT).to_string();
    let config_files = format_snippets(&repo.config_files, "");
    let cicd = format_snippets(&repo.cicd_workflows, "yaml");
    fill(
        template,
        &[
            ("repo_name", repo.name.clone()),
            ("repo_description", description),
            ("primary_language", repo.primary_language.clone()),
            ("languages", languages_of(repo)),
            ("topics", topics),
            ("default_branch", repo.default_branch.clone()),
            ("created_at", repo.created_at.clone()),
            ("updated_at", repo.updated_at.clone()),
            ("stars", repo.stars.to_string()),
            ("has_wiki", repo.has_wiki.to_string()),
            ("open_issues", repo.open_issues.to_string()),
            ("readme_content", or_default(readme, "No README found")),
            (
                "file_tree",
                or_default(repo.file_tree.join("\n"), "Could not retrieve"),
            ),
            (
                "config_files_content",
                or_default(config_files, "No configuration files detected."),
            ),
            (
                "cicd_content",
                or_default(cicd, "No CI/CD workflows detected."),
            ),
            ("example_entries", pretty(&sample, EXAMPLES_LIMIT)),
        ],
    )
}

pub fn feature_update_prompt(
    template: &PromptTemplate,
    repo: Option<&RepositoryInfo>,
    existing_entry: &Value,
    commit_messages: &[String],
    new_dependencies: &[String],
) -> Prompt {
    let readme = repo
        .map(|r| truncate_chars(&r.readme_content, README_LIMIT).to_string())
        .unwrap_or_else(|| "Not changed".to_string());
    let cicd = match repo {
        Some(r) if r.cicd_workflows.is_empty() => "No CI/CD workflows detected.".to_string(),
        Some(r) => {
            let snippets = format_snippets(&r.cicd_workflows, "yaml");
            snippets.trim().to_string()
        }
        None => "Not changed".to_string(),
    };
    let deps = if new_dependencies.is_empty() {
        "None detected".to_string()
    } else {
        new_dependencies
            .iter()
            .take(MAX_DEPENDENCIES)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };
    let diff_summary = format!("{} commits with feature additions", commit_messages.len());
    fill(
        template,
        &[
            ("current_entry", pretty(existing_entry, EXAMPLES_LIMIT)),
            (
                "change_type",
                "New features and significant changes detected".to_string(),
            ),
            (
                "changed_files",
                "See commit messages for details".to_string(),
            ),
            ("commit_messages", bullet_list(commit_messages, MAX_COMMITS)),
            ("diff_summary", diff_summary),
            ("readme_content", readme),
            ("cicd_content", cicd),
            ("new_dependencies", deps),
        ],
    )
}

/// Human-readable activity signals derived from commit text.
pub fn status_signals(commit_messages: &[String]) -> Vec<&'static str> {
    let all = commit_messages.join(" ").to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| all.contains(w));
    let mut signals = Vec::new();
    if any(&["test"]) {
        signals.push("Tests added or updated");
    }
    if any(&["ci", "workflow"]) {
        signals.push("CI/CD changes");
    }
    if any(&["doc", "readme"]) {
        signals.push("Documentation updates");
    }
    if any(&["docker"]) {
        signals.push("Containerization work");
    }
    if any(&["fix"]) {
        signals.push("Bug fixes (maturity signal)");
    }
    if any(&["security", "scan"]) {
        signals.push("Security improvements");
    }
    if signals.is_empty() {
        signals.push("General development activity");
    }
    signals
}

pub fn status_update_prompt(
    template: &PromptTemplate,
    existing_entry: &Value,
    commit_messages: &[String],
    lookback_days: u32,
) -> Prompt {
    let field = |name: &str| match existing_entry.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "Unknown".to_string(),
        Some(other) => other.to_string(),
    };
    let completion = existing_entry
        .get("completion_percentage")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "0".to_string());
    let signals = bullet_list(&status_signals(commit_messages), usize::MAX);
    fill(
        template,
        &[
            ("project_name", field("name")),
            ("current_status", field("status")),
            ("current_completion", completion),
            ("lookback_days", lookback_days.to_string()),
            ("commit_count", commit_messages.len().to_string()),
            ("commit_messages", bullet_list(commit_messages, MAX_COMMITS)),
            (
                "changed_files_summary",
                "See commit messages for file change details".to_string(),
            ),
            ("signals", signals),
        ],
    )
}

pub fn tech_deep_dive_prompt(
    template: &PromptTemplate,
    tech_name: &str,
    projects_using: &[String],
    example_dives: &Map<String, Value>,
) -> Prompt {
    let examples: Map<String, Value> = example_dives
        .iter()
        .take(2)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let usage = format!("Used across {} portfolio project(s)", projects_using.len());
    fill(
        template,
        &[
            ("technology_name", tech_name.to_string()),
            ("technology_key", tech_key(tech_name)),
            ("projects_using", projects_using.join(", ")),
            ("usage_context", usage),
            (
                "example_deep_dives",
                pretty(&examples, DEEP_DIVE_EXAMPLES_LIMIT),
            ),
        ],
    )
}

pub fn review_prompt(
    template: &PromptTemplate,
    draft: &Value,
    event: &ChangeEvent,
    examples: &[Value],
) -> Prompt {
    let sample: Vec<&Value> = examples.iter().take(2).collect();
    let (description, languages) = match &event.repo_info {
        Some(repo) => (
            or_default(repo.description.clone(), "No description provided"),
            languages_of(repo),
        ),
        None => ("No description provided".to_string(), "Unknown".to_string()),
    };
    fill(
        template,
        &[
            ("draft", pretty(draft, DRAFT_LIMIT)),
            ("change_type", event.kind.to_string()),
            ("repo_name", event.repo_name.clone()),
            ("repo_description", description),
            ("languages", languages),
            ("example_entries", pretty(&sample, EXAMPLES_LIMIT)),
        ],
    )
}

/// Names of published projects listing `tech_name`, plus the triggering repository.
pub fn projects_using(tech_name: &str, repo_name: &str, projects: &[Value]) -> Vec<String> {
    let mut names: Vec<String> = projects
        .iter()
        .filter(|p| {
            p.get("technologies")
                .and_then(Value::as_array)
                .is_some_and(|techs| techs.iter().any(|t| t.as_str() == Some(tech_name)))
        })
        .filter_map(|p| p.get("name").and_then(Value::as_str).map(str::to_string))
        .collect();
    if !names.iter().any(|n| n == repo_name) {
        names.push(repo_name.to_string());
    }
    names
}

/// Loads templates from a directory and builds prompts per change kind.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    templates_dir: PathBuf,
    lookback_days: u32,
}

impl PromptBuilder {
    pub fn new(templates_dir: impl Into<PathBuf>, lookback_days: u32) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            lookback_days,
        }
    }

    fn template_file(kind: ChangeKind) -> &'static str {
        match kind {
            ChangeKind::NewRepo => "new_repo.yaml",
            ChangeKind::NewFeature => "new_feature.yaml",
            ChangeKind::StatusUpdate => "status_update.yaml",
            ChangeKind::NewTech => "technology_deep_dive.yaml",
        }
    }

    fn load(&self, file: &str) -> Result<PromptTemplate, TemplateError> {
        let path = self.templates_dir.join(file);
        debug!(template = %path.display(), "Loading prompt template");
        PromptTemplate::load(&path)
    }

    /// Prompt for drafting the entry that `event` calls for.
    pub fn draft_prompt(
        &self,
        event: &ChangeEvent,
        existing: &ExistingEntries,
    ) -> Result<Prompt, TemplateError> {
        let template = self.load(Self::template_file(event.kind))?;
        let null = Value::Null;
        let prompt = match event.kind {
            ChangeKind::NewRepo => {
                let fallback =
                    RepositoryInfo::new(event.repo_name.clone(), event.repo_name.clone());
                let repo = event.repo_info.as_ref().unwrap_or(&fallback);
                new_repo_prompt(&template, repo, &existing.projects)
            }
            ChangeKind::NewFeature => feature_update_prompt(
                &template,
                event.repo_info.as_ref(),
                event.existing_entry.as_ref().unwrap_or(&null),
                &event.commit_messages,
                &event.new_dependencies,
            ),
            ChangeKind::StatusUpdate => status_update_prompt(
                &template,
                event.existing_entry.as_ref().unwrap_or(&null),
                &event.commit_messages,
                self.lookback_days,
            ),
            ChangeKind::NewTech => {
                let tech = event
                    .detected_technologies
                    .first()
                    .map(String::as_str)
                    .unwrap_or("Unknown");
                let using = projects_using(tech, &event.repo_name, &existing.projects);
                tech_deep_dive_prompt(&template, tech, &using, &existing.tech_dives)
            }
        };
        Ok(prompt)
    }

    /// Prompt asking the reviewer to check and polish `draft`.
    pub fn review_prompt(
        &self,
        draft: &Value,
        event: &ChangeEvent,
        existing: &ExistingEntries,
    ) -> Result<Prompt, TemplateError> {
        let template = self.load("review.yaml")?;
        Ok(review_prompt(&template, draft, event, &existing.projects))
    }
}
