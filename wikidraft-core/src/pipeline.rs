//! # pipeline: one end-to-end run
//!
//! scan → enrich → load published entries → detect → skip processed →
//! draft → review → write artifact → mark processed.
//!
//! Per-event failures are recorded in the [`RunReport`] and the run moves on
//! to the next event. A failed review falls back to the unreviewed draft.

use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::contract::{ChangeEvent, ChangeKind, ExistingEntries, RepositorySource};
use crate::detect::detect;
use crate::generate::Generator;
use crate::literal::{load_existing_entries, DeclarationNames};
use crate::output::OutputWriter;
use crate::prompts::PromptBuilder;
use crate::state::StateTracker;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// Stop after detection and only report what would be drafted.
    pub scan_only: bool,
    pub skip_review: bool,
    /// Restrict the run to one repository by name.
    pub target_repo: Option<String>,
    /// Call the models but write nothing to disk.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventDetail {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub repo: String,
}

/// Counters and errors of one run; serialized as `last_run.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub timestamp: String,
    pub changes_detected: usize,
    pub drafts_generated: usize,
    pub reviews_completed: usize,
    pub entries_written: usize,
    pub errors: Vec<String>,
    pub details: Vec<EventDetail>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    fn record_error(&mut self, message: String) {
        error!(error = %message, "Pipeline error");
        self.errors.push(message);
    }
}

/// The components one run needs, borrowed from the caller.
pub struct Pipeline<'a> {
    pub source: &'a dyn RepositorySource,
    pub drafter: &'a dyn Generator,
    pub reviewer: &'a dyn Generator,
    pub prompts: &'a PromptBuilder,
    pub writer: &'a OutputWriter,
    pub constants_file: PathBuf,
    pub declarations: DeclarationNames,
}

impl<'a> Pipeline<'a> {
    pub async fn run(&self, state: &mut StateTracker, options: &RunOptions) -> RunReport {
        let mut report = RunReport {
            timestamp: Utc::now().to_rfc3339(),
            ..Default::default()
        };

        info!("Step 1: scanning repositories");
        let mut repos = match self.source.list_repositories().await {
            Ok(repos) => repos,
            Err(e) => {
                report.record_error(format!("Scan failed: {e}"));
                return report;
            }
        };

        if let Some(target) = &options.target_repo {
            repos.retain(|r| &r.name == target);
            if repos.is_empty() {
                report.record_error(format!("Repository '{target}' not found"));
                return report;
            }
        }

        for repo in repos.iter_mut() {
            if let Err(e) = self.source.enrich(repo).await {
                warn!(repo = %repo.name, error = %e, "Enrichment incomplete, keeping partial");
            }
        }

        info!("Step 2: loading published entries");
        let existing = load_existing_entries(&self.constants_file, &self.declarations);
        info!(
            projects = existing.projects.len(),
            tech_dives = existing.tech_dives.len(),
            "Published entries loaded"
        );

        info!("Step 3: detecting changes");
        let changes: Vec<ChangeEvent> = detect(&repos, &existing)
            .into_iter()
            .filter(|event| {
                let repo = &event.repo_name;
                let processed = state.is_processed(repo, event.kind, event.trigger_sha());
                if processed {
                    info!(repo = %repo, kind = %event.kind, "Already processed, skipping");
                }
                !processed
            })
            .collect();

        report.changes_detected = changes.len();
        report.details = changes
            .iter()
            .map(|c| EventDetail {
                kind: c.kind,
                repo: c.repo_name.clone(),
            })
            .collect();

        if changes.is_empty() {
            info!("No changes detected");
            return report;
        }
        if options.scan_only {
            for detail in &report.details {
                info!(kind = %detail.kind, repo = %detail.repo, "Detected");
            }
            return report;
        }

        info!("Step 4: drafting entries");
        let mut drafts: Vec<(&ChangeEvent, Value)> = Vec::new();
        for event in &changes {
            let repo = &event.repo_name;
            match self.draft(event, &existing).await {
                Ok(draft) => {
                    report.drafts_generated += 1;
                    if !options.dry_run {
                        if let Err(e) = self.writer.save_draft(event, &draft) {
                            report.record_error(format!("Saving draft for {repo} failed: {e}"));
                        }
                    }
                    info!(kind = %event.kind, repo = %repo, "Draft generated");
                    drafts.push((event, draft));
                }
                Err(message) => report.record_error(format!("Draft failed for {repo}: {message}")),
            }
        }

        let finals: Vec<(&ChangeEvent, Value)> = if options.skip_review {
            info!("Step 5: review skipped");
            drafts
        } else {
            info!("Step 5: reviewing drafts");
            let mut reviewed = Vec::with_capacity(drafts.len());
            for (event, draft) in drafts {
                let repo = &event.repo_name;
                match self.review(event, &draft, &existing).await {
                    Ok(entry) => {
                        report.reviews_completed += 1;
                        if !options.dry_run {
                            if let Err(e) = self.writer.save_reviewed(event, &entry) {
                                let message = format!("Saving review for {repo} failed: {e}");
                                report.record_error(message);
                            }
                        }
                        info!(kind = %event.kind, repo = %repo, "Review completed");
                        reviewed.push((event, entry));
                    }
                    Err(message) => {
                        report.record_error(format!(
                            "Review error for {repo} (using draft): {message}"
                        ));
                        reviewed.push((event, draft));
                    }
                }
            }
            reviewed
        };

        if options.dry_run {
            info!(entries = finals.len(), "Dry run, nothing written");
            return report;
        }

        info!("Step 6: writing output");
        for (event, entry) in finals {
            let repo = &event.repo_name;
            match self.writer.write_entry(event, &entry) {
                Ok(_) => {
                    report.entries_written += 1;
                    if let Err(e) = state.mark_processed(repo, event.kind, event.trigger_sha()) {
                        report.record_error(format!("Updating state for {repo} failed: {e}"));
                    }
                }
                Err(e) => report.record_error(format!("Write failed for {repo}: {e}")),
            }
        }

        info!(
            changes = report.changes_detected,
            drafts = report.drafts_generated,
            reviews = report.reviews_completed,
            written = report.entries_written,
            errors = report.errors.len(),
            "Run complete"
        );
        report
    }

    async fn draft(
        &self,
        event: &ChangeEvent,
        existing: &ExistingEntries,
    ) -> Result<Value, String> {
        let prompt = self
            .prompts
            .draft_prompt(event, existing)
            .map_err(|e| e.to_string())?;
        self.drafter
            .generate(&prompt.system, &prompt.user)
            .await
            .map_err(|e| e.to_string())
    }

    async fn review(
        &self,
        event: &ChangeEvent,
        draft: &Value,
        existing: &ExistingEntries,
    ) -> Result<Value, String> {
        let prompt = self
            .prompts
            .review_prompt(draft, event, existing)
            .map_err(|e| e.to_string())?;
        self.reviewer
            .generate(&prompt.system, &prompt.user)
            .await
            .map_err(|e| e.to_string())
    }
}
