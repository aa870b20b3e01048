//! # output: artifacts for manual merge
//!
//! Every event that survives drafting and review becomes one JSON artifact
//! in the output directory, named `{timestamp}_{kind}_{repo}.json`, carrying
//! the entry itself and plain-language merge instructions. Drafts and
//! reviewed entries are also kept in their own directories for inspection.
//!
//! The same module reads artifacts back for the `pending`, `preview` and
//! `apply` commands and writes the `last_run.json` run summary. `apply`
//! groups pending artifacts into paste-ready snippets for `constants.ts`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::contract::{ChangeEvent, ChangeKind};
use crate::error::OutputError;
use crate::literal::DeclarationNames;

pub const SUMMARY_FILE: &str = "last_run.json";

/// One reviewed entry waiting to be merged by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryArtifact {
    pub change_type: ChangeKind,
    pub repo_name: String,
    pub generated_at: String,
    pub entry: Value,
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub url_warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub file_name: String,
    pub artifact: EntryArtifact,
}

fn unsafe_filename_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9._-]").expect("valid regex"))
}

fn markdown_link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[^\]]*\]\(([^)\s]*)\)").expect("valid regex"))
}

fn bare_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-zA-Z][a-zA-Z0-9+.-]*://[^\s)\]]+").expect("valid regex"))
}

pub fn sanitize_filename(name: &str) -> String {
    unsafe_filename_chars().replace_all(name, "_").into_owned()
}

/// How a human should fold this entry into the data document.
pub fn merge_instructions(event: &ChangeEvent) -> String {
    match event.kind {
        ChangeKind::NewRepo => "NEW PROJECT ENTRY: Add this object to the PROJECTS_DATA array \
             in constants.ts. Assign the next available id number and update the github_path \
             accordingly."
            .to_string(),
        ChangeKind::NewFeature => format!(
            "UPDATE EXISTING ENTRY: Apply the 'updates' fields to the existing entry for '{}' \
             in constants.ts. See 'rationale' for why each field was changed.",
            event.repo_name
        ),
        ChangeKind::StatusUpdate => format!(
            "STATUS UPDATE: Update the 'status' and 'completion_percentage' fields for '{}' \
             in constants.ts if 'should_update' is true.",
            event.repo_name
        ),
        ChangeKind::NewTech => "NEW TECHNOLOGY DEEP DIVE: Add this key-value pair to the \
             TECHNOLOGY_DEEP_DIVES object in constants.ts."
            .to_string(),
    }
}

fn collect_learning_resources<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == "learning_resources" {
                    if let Some(items) = child.as_array() {
                        out.extend(items.iter().filter_map(Value::as_str));
                    }
                } else {
                    collect_learning_resources(child, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_learning_resources(item, out);
            }
        }
        _ => {}
    }
}

fn check_url(raw: &str) -> Option<String> {
    match Url::parse(raw) {
        Err(e) => Some(format!("unparseable URL {raw:?}: {e}")),
        Ok(url) if url.scheme() != "http" && url.scheme() != "https" => {
            Some(format!("unsupported scheme {:?} in {raw:?}", url.scheme()))
        }
        Ok(url) if url.host_str().map_or(true, str::is_empty) => {
            Some(format!("missing host in {raw:?}"))
        }
        Ok(_) => None,
    }
}

/// Syntactic problems with links found under any `learning_resources` list.
pub fn url_warnings(entry: &Value) -> Vec<String> {
    let mut resources = Vec::new();
    collect_learning_resources(entry, &mut resources);

    let mut warnings = Vec::new();
    for resource in resources {
        let mut targets: Vec<&str> = markdown_link()
            .captures_iter(resource)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if targets.is_empty() {
            targets = bare_url().find_iter(resource).map(|m| m.as_str()).collect();
        }
        if targets.is_empty() {
            warnings.push(format!("no URL found in learning resource {resource:?}"));
            continue;
        }
        warnings.extend(targets.into_iter().filter_map(check_url));
    }
    warnings
}

/// Writes drafts, reviewed entries, merge artifacts and the run summary.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    pub drafts_dir: PathBuf,
    pub reviewed_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl OutputWriter {
    pub fn new(
        drafts_dir: impl Into<PathBuf>,
        reviewed_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            drafts_dir: drafts_dir.into(),
            reviewed_dir: reviewed_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    fn write_json(
        dir: &Path,
        file_name: &str,
        value: &impl Serialize,
    ) -> Result<PathBuf, OutputError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(sanitize_filename(file_name));
        fs::write(&path, serde_json::to_string_pretty(value)?)?;
        Ok(path)
    }

    pub fn save_draft(&self, event: &ChangeEvent, draft: &Value) -> Result<PathBuf, OutputError> {
        let file_name = format!("{}_{}.json", event.kind, event.repo_name);
        Self::write_json(&self.drafts_dir, &file_name, draft)
    }

    pub fn save_reviewed(
        &self,
        event: &ChangeEvent,
        entry: &Value,
    ) -> Result<PathBuf, OutputError> {
        let file_name = format!("{}_{}.json", event.kind, event.repo_name);
        Self::write_json(&self.reviewed_dir, &file_name, entry)
    }

    /// Write the merge artifact for `event` and return its path.
    pub fn write_entry(&self, event: &ChangeEvent, entry: &Value) -> Result<PathBuf, OutputError> {
        let now = Utc::now();
        let url_warnings = if event.kind == ChangeKind::NewTech {
            url_warnings(entry)
        } else {
            Vec::new()
        };
        for warning in &url_warnings {
            warn!(repo = %event.repo_name, warning = %warning, "Suspicious learning resource URL");
        }
        let artifact = EntryArtifact {
            change_type: event.kind,
            repo_name: event.repo_name.clone(),
            generated_at: now.to_rfc3339(),
            entry: entry.clone(),
            instructions: merge_instructions(event),
            url_warnings,
        };
        let file_name = format!(
            "{}_{}_{}.json",
            now.format("%Y%m%d_%H%M%S"),
            event.kind,
            event.repo_name
        );
        let path = Self::write_json(&self.output_dir, &file_name, &artifact)?;
        info!(path = %path.display(), "Output written");
        Ok(path)
    }

    pub fn write_summary(&self, summary: &impl Serialize) -> Result<PathBuf, OutputError> {
        Self::write_json(&self.output_dir, SUMMARY_FILE, summary)
    }
}

pub fn load_artifact(path: &Path) -> Result<EntryArtifact, OutputError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Artifacts in `dir` sorted by file name; the summary and malformed files are skipped.
pub fn list_pending(dir: &Path) -> Result<Vec<PendingEntry>, OutputError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .filter(|p| p.file_name().is_some_and(|n| n != SUMMARY_FILE))
        .collect();
    paths.sort();

    let mut pending = Vec::new();
    for path in paths {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match load_artifact(&path) {
            Ok(artifact) => pending.push(PendingEntry {
                file_name,
                artifact,
            }),
            Err(e) => warn!(file = %file_name, error = %e, "Skipping malformed artifact"),
        }
    }
    Ok(pending)
}

/// Field changes proposed for an existing project.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectUpdate {
    pub repo_name: String,
    pub updates: Value,
    pub rationale: String,
}

/// Pending artifacts grouped by what has to be done with them in the data
/// document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeSnippets {
    pub new_projects: Vec<Value>,
    pub project_updates: Vec<ProjectUpdate>,
    /// Repository name and the status block.
    pub status_updates: Vec<(String, Value)>,
    /// Deep-dive key and record.
    pub tech_dives: Vec<(String, Value)>,
}

fn text_field(entry: &Value, key: &str) -> Option<String> {
    match entry.get(key)? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// JSON indented by four spaces, every line shifted by `indent`.
fn indented_json(value: &Value, indent: &str) -> Result<String, OutputError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    let text = String::from_utf8_lossy(&buf);
    Ok(text
        .lines()
        .map(|line| format!("{indent}{line}"))
        .collect::<Vec<_>>()
        .join("\n"))
}

impl MergeSnippets {
    pub fn from_artifacts<'a>(artifacts: impl IntoIterator<Item = &'a EntryArtifact>) -> Self {
        let mut snippets = Self::default();
        for artifact in artifacts {
            let entry = &artifact.entry;
            match artifact.change_type {
                ChangeKind::NewRepo => snippets.new_projects.push(entry.clone()),
                ChangeKind::NewFeature => snippets.project_updates.push(ProjectUpdate {
                    repo_name: artifact.repo_name.clone(),
                    updates: entry.get("updates").unwrap_or(entry).clone(),
                    rationale: text_field(entry, "rationale").unwrap_or_default(),
                }),
                ChangeKind::StatusUpdate => snippets
                    .status_updates
                    .push((artifact.repo_name.clone(), entry.clone())),
                ChangeKind::NewTech => {
                    let key = text_field(entry, "key").unwrap_or_else(|| "unknown".to_string());
                    let value = entry.get("value").unwrap_or(entry).clone();
                    snippets.tech_dives.push((key, value));
                }
            }
        }
        snippets
    }

    pub fn is_empty(&self) -> bool {
        self.new_projects.is_empty()
            && self.project_updates.is_empty()
            && self.status_updates.is_empty()
            && self.tech_dives.is_empty()
    }

    /// TypeScript-ready text, one section per non-empty group.
    pub fn render(&self, names: &DeclarationNames) -> Result<String, OutputError> {
        let rule = "=".repeat(60);
        let mut out = format!("{rule}\n  Generated TypeScript Snippets\n{rule}\n");

        if !self.new_projects.is_empty() {
            out.push_str("\n// ===== NEW PROJECT ENTRIES =====\n");
            out.push_str(&format!(
                "// Add these to the {} array in constants.ts\n\n",
                names.projects
            ));
            for project in &self.new_projects {
                out.push_str(&format!("{},\n\n", indented_json(project, "    ")?));
            }
        }

        if !self.project_updates.is_empty() {
            out.push_str("\n// ===== PROJECT UPDATES =====\n");
            out.push_str("// Apply these field updates to existing entries\n\n");
            for update in &self.project_updates {
                out.push_str(&format!("// Update for: {}\n", update.repo_name));
                out.push_str(&format!("// Rationale: {}\n", update.rationale));
                out.push_str(&format!(
                    "// Fields to update:\n{}\n\n",
                    indented_json(&update.updates, "// ")?
                ));
            }
        }

        if !self.status_updates.is_empty() {
            out.push_str("\n// ===== STATUS UPDATES =====\n");
            for (repo_name, status) in &self.status_updates {
                out.push_str(&format!("// Update for: {repo_name}\n"));
                out.push_str(&format!("{}\n\n", indented_json(status, "// ")?));
            }
        }

        if !self.tech_dives.is_empty() {
            out.push_str("\n// ===== NEW TECHNOLOGY DEEP DIVES =====\n");
            out.push_str(&format!("// Add these to {} in constants.ts\n\n", names.tech_dives));
            for (key, value) in &self.tech_dives {
                let body = indented_json(value, "    ")?;
                let key = serde_json::to_string(key)?;
                out.push_str(&format!("    {key}: {},\n\n", body.trim_start()));
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::RepositoryInfo;
    use serde_json::json;
    use tempfile::tempdir;

    fn event(kind: ChangeKind, name: &str) -> ChangeEvent {
        ChangeEvent::new(kind, &RepositoryInfo::new(name, format!("me/{name}")))
    }

    #[test]
    fn sanitizes_filenames() {
        assert_eq!(
            sanitize_filename("new_repo_my repo/x.json"),
            "new_repo_my_repo_x.json"
        );
        assert_eq!(sanitize_filename("a-b_c.d"), "a-b_c.d");
    }

    #[test]
    fn instructions_name_the_repository() {
        for kind in [ChangeKind::NewFeature, ChangeKind::StatusUpdate] {
            assert!(merge_instructions(&event(kind, "api-gateway")).contains("'api-gateway'"));
        }
        let new_repo = merge_instructions(&event(ChangeKind::NewRepo, "x"));
        assert!(new_repo.contains("PROJECTS_DATA"));
        let new_tech = merge_instructions(&event(ChangeKind::NewTech, "x"));
        assert!(new_tech.contains("TECHNOLOGY_DEEP_DIVES"));
    }

    #[test]
    fn flags_bad_learning_resources() {
        let entry = json!({
            "rust": {
                "title": "Rust",
                "learning_resources": [
                    "[The Book](https://doc.rust-lang.org/book/)",
                    "Docs at https://docs.rs",
                    "[Broken](htps//nowhere)",
                    "[Local](file:///etc/passwd)",
                    "Just some words"
                ]
            }
        });
        let warnings = url_warnings(&entry);
        assert_eq!(warnings.len(), 3, "{warnings:?}");
        assert!(warnings[0].contains("htps//nowhere"));
        assert!(warnings[1].contains("unsupported scheme"));
        assert!(warnings[2].contains("no URL found"));
        assert!(url_warnings(&json!({"title": "none"})).is_empty());
    }

    #[test]
    fn writes_artifact_and_lists_it() {
        let dir = tempdir().unwrap();
        let writer = OutputWriter::new(
            dir.path().join("d"),
            dir.path().join("r"),
            dir.path().join("out"),
        );
        let ev = event(ChangeKind::NewTech, "my repo");
        let entry = json!({"title": "Go", "learning_resources": ["[Tour](ftp://go.dev)"]});

        let path = writer.write_entry(&ev, &entry).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_new_tech_my_repo.json"), "{name}");

        let artifact = load_artifact(&path).unwrap();
        assert_eq!(artifact.change_type, ChangeKind::NewTech);
        assert_eq!(artifact.entry, entry);
        assert_eq!(artifact.url_warnings.len(), 1);

        let summary = json!({"changes_detected": 1});
        writer.write_summary(&summary).unwrap();
        fs::write(writer.output_dir.join("zz_broken.json"), "{ nope").unwrap();

        let pending = list_pending(&writer.output_dir).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].file_name, name);
    }

    #[test]
    fn drafts_and_reviews_use_kind_and_repo() {
        let dir = tempdir().unwrap();
        let writer = OutputWriter::new(
            dir.path().join("d"),
            dir.path().join("r"),
            dir.path().join("o"),
        );
        let ev = event(ChangeKind::NewRepo, "foo");
        let draft = writer.save_draft(&ev, &json!({"a": 1})).unwrap();
        let reviewed = writer.save_reviewed(&ev, &json!({"a": 2})).unwrap();
        assert_eq!(draft, dir.path().join("d/new_repo_foo.json"));
        assert_eq!(reviewed, dir.path().join("r/new_repo_foo.json"));
    }

    fn artifact(kind: ChangeKind, repo: &str, entry: Value) -> EntryArtifact {
        EntryArtifact {
            change_type: kind,
            repo_name: repo.to_string(),
            generated_at: "2026-01-01T00:00:00+00:00".to_string(),
            entry,
            instructions: String::new(),
            url_warnings: Vec::new(),
        }
    }

    #[test]
    fn groups_artifacts_into_snippets() {
        let artifacts = [
            artifact(ChangeKind::NewRepo, "foo", json!({"name": "Foo"})),
            artifact(
                ChangeKind::NewFeature,
                "bar",
                json!({"updates": {"version": "2.0"}, "rationale": "tagged"}),
            ),
            artifact(ChangeKind::NewFeature, "baz", json!({"version": "0.3"})),
            artifact(ChangeKind::StatusUpdate, "qux", json!({"status": "Stable"})),
            artifact(
                ChangeKind::NewTech,
                "foo",
                json!({"key": "tokio", "value": {"title": "Tokio"}}),
            ),
            artifact(ChangeKind::NewTech, "foo", json!({"title": "Serde"})),
        ];

        let snippets = MergeSnippets::from_artifacts(&artifacts);
        assert_eq!(snippets.new_projects, vec![json!({"name": "Foo"})]);
        let updates = &snippets.project_updates;
        assert_eq!(updates[0].updates, json!({"version": "2.0"}));
        assert_eq!(updates[0].rationale, "tagged");
        assert_eq!(updates[1].updates, json!({"version": "0.3"}));
        assert_eq!(updates[1].rationale, "");
        assert_eq!(snippets.status_updates[0].0, "qux");
        assert_eq!(snippets.tech_dives[0].0, "tokio");
        assert_eq!(snippets.tech_dives[0].1, json!({"title": "Tokio"}));
        assert_eq!(snippets.tech_dives[1].0, "unknown");

        let text = snippets.render(&DeclarationNames::default()).unwrap();
        assert!(text.contains("  Generated TypeScript Snippets"));
        assert!(text.contains("// Add these to the PROJECTS_DATA array in constants.ts"));
        let project = "    {\n        \"name\": \"Foo\"\n    },";
        assert!(text.contains(project), "{text}");
        let update = "// Update for: bar\n// Rationale: tagged\n// Fields to update:";
        assert!(text.contains(update), "{text}");
        assert!(text.contains("// ===== STATUS UPDATES =====\n// Update for: qux\n// {"));
        let dive = "    \"tokio\": {\n        \"title\": \"Tokio\"\n    },";
        assert!(text.contains(dive), "{text}");
    }

    #[test]
    fn renders_only_non_empty_groups() {
        let artifacts = [artifact(ChangeKind::StatusUpdate, "qux", json!({}))];
        let text = MergeSnippets::from_artifacts(&artifacts)
            .render(&DeclarationNames::default())
            .unwrap();
        assert!(text.contains("STATUS UPDATES"));
        assert!(!text.contains("NEW PROJECT ENTRIES"));
        assert!(!text.contains("NEW TECHNOLOGY DEEP DIVES"));
        assert!(MergeSnippets::default().is_empty());
    }

    #[test]
    fn missing_output_dir_has_nothing_pending() {
        let dir = tempdir().unwrap();
        assert!(list_pending(&dir.path().join("absent")).unwrap().is_empty());
    }
}
