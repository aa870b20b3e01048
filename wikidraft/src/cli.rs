///
/// This module implements the CLI interface for wikidraft: command parsing,
/// argument validation and the user-visible output of each command.
///
/// All core logic (scanning, detection, generation, output) lives in the
/// [`wikidraft-core`] crate. This module only wires configuration into it.
///
/// ## Commands
/// - `run`: scan, detect, draft, review and write merge artifacts.
/// - `pending`: list artifacts waiting to be merged by hand.
/// - `preview`: print one artifact's instructions and entry.
/// - `apply`: print pending artifacts as snippets ready to paste into the
///   data document.
///
/// For programmatic or integration use call [`run`] with a constructed [`Cli`].
///
/// [`wikidraft-core`]: ../../wikidraft-core/
use crate::clients::{build_generator, build_scanner};
use crate::load_config::load_config;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wikidraft_core::generate::Generator;
use wikidraft_core::output::{list_pending, load_artifact, MergeSnippets, OutputWriter};
use wikidraft_core::pipeline::{Pipeline, RunOptions, RunReport};
use wikidraft_core::prompts::PromptBuilder;
use wikidraft_core::state::StateTracker;

/// CLI for wikidraft: draft wiki entries from GitHub activity.
#[derive(Parser)]
#[clap(
    name = "wikidraft",
    version,
    about = "Scan GitHub activity and draft reviewed wiki entries for manual merge"
)]
pub struct Cli {
    /// Debug-level logging
    #[clap(short, long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline using the given config file
    Run {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Only detect changes, do not call any model
        #[clap(long)]
        scan_only: bool,
        /// Use drafts as final entries without a review pass
        #[clap(long)]
        skip_review: bool,
        /// Restrict the run to one repository
        #[clap(long)]
        repo: Option<String>,
        /// Call the models but write nothing
        #[clap(long)]
        dry_run: bool,
    },
    /// List entries waiting to be merged
    Pending {
        #[clap(long)]
        config: PathBuf,
    },
    /// Show one pending entry
    Preview {
        #[clap(long)]
        config: PathBuf,
        /// File name inside the output directory
        file: String,
    },
    /// Print pending entries as paste-ready snippets
    Apply {
        #[clap(long)]
        config: PathBuf,
        /// Only this file inside the output directory
        #[clap(long)]
        entry: Option<String>,
    },
}

fn print_report(report: &RunReport) {
    println!("Run summary ({})", report.timestamp);
    println!("  changes detected:  {}", report.changes_detected);
    println!("  drafts generated:  {}", report.drafts_generated);
    println!("  reviews completed: {}", report.reviews_completed);
    println!("  entries written:   {}", report.entries_written);
    for detail in &report.details {
        println!("  [{}] {}", detail.kind, detail.repo);
    }
    if !report.errors.is_empty() {
        println!("  errors ({}):", report.errors.len());
        for e in &report.errors {
            println!("    - {e}");
        }
    }
}

async fn run_pipeline(config_path: PathBuf, mut options: RunOptions) -> Result<()> {
    let config = load_config(config_path)?;
    tracing::info!(command = "run", ?options, "Starting pipeline");

    let scanner = build_scanner(&config)?;
    let drafter = build_generator(&config.draft_agent, &config.providers)?;
    let reviewer = match &config.review_agent {
        Some(agent) => Some(build_generator(agent, &config.providers)?),
        None => None,
    };
    if reviewer.is_none() && !options.skip_review {
        tracing::warn!("No review_agent configured, skipping review");
        options.skip_review = true;
    }

    let prompts = PromptBuilder::new(config.templates_dir.clone(), config.github.lookback_days);
    let writer = OutputWriter::new(
        config.output.drafts_dir.clone(),
        config.output.reviewed_dir.clone(),
        config.output.output_dir.clone(),
    );
    let mut state = StateTracker::load(&config.state_file)
        .with_context(|| format!("Failed to load state file {:?}", config.state_file))?;

    let pipeline = Pipeline {
        source: &scanner,
        drafter: &drafter,
        reviewer: match &reviewer {
            Some(r) => r as &dyn Generator,
            None => &drafter,
        },
        prompts: &prompts,
        writer: &writer,
        constants_file: config.output.constants_file.clone(),
        declarations: config.output.declarations.clone(),
    };
    let report = pipeline.run(&mut state, &options).await;

    if !options.dry_run {
        let path = writer
            .write_summary(&report)
            .context("Failed to write run summary")?;
        tracing::info!(path = %path.display(), "Run summary written");
    }
    print_report(&report);

    if report.is_success() {
        tracing::info!(command = "run", "Pipeline complete");
        Ok(())
    } else {
        tracing::error!(
            command = "run",
            errors = report.errors.len(),
            "Pipeline finished with errors"
        );
        Err(anyhow!("Run finished with {} error(s)", report.errors.len()))
    }
}

fn show_pending(config_path: PathBuf) -> Result<()> {
    let config = load_config(config_path)?;
    let pending = list_pending(&config.output.output_dir)
        .with_context(|| format!("Failed to list {:?}", config.output.output_dir))?;
    if pending.is_empty() {
        println!("No pending entries found.");
        return Ok(());
    }
    println!("Pending wiki entries ({} total)", pending.len());
    for entry in pending {
        let artifact = entry.artifact;
        println!();
        println!(
            "  [{}] {}",
            artifact.change_type.as_str().to_uppercase(),
            artifact.repo_name
        );
        println!("    File: {}", entry.file_name);
        println!("    Generated: {}", artifact.generated_at);
        println!("    Action: {}", artifact.instructions);
        for warning in &artifact.url_warnings {
            println!("    URL warning: {warning}");
        }
    }
    Ok(())
}

fn show_preview(config_path: PathBuf, file: String) -> Result<()> {
    let config = load_config(config_path)?;
    let path = config.output.output_dir.join(&file);
    let artifact =
        load_artifact(&path).with_context(|| format!("Entry not found or unreadable: {file}"))?;
    println!("Entry: {}", artifact.repo_name);
    println!("Type: {}", artifact.change_type);
    println!("Instructions: {}", artifact.instructions);
    println!();
    println!("{}", serde_json::to_string_pretty(&artifact.entry)?);
    Ok(())
}

fn show_snippets(config_path: PathBuf, entry: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;
    let artifacts = match entry {
        Some(file) => {
            let path = config.output.output_dir.join(&file);
            let artifact = load_artifact(&path)
                .with_context(|| format!("Entry not found or unreadable: {file}"))?;
            vec![artifact]
        }
        None => list_pending(&config.output.output_dir)
            .with_context(|| format!("Failed to list {:?}", config.output.output_dir))?
            .into_iter()
            .map(|pending| pending.artifact)
            .collect(),
    };

    let snippets = MergeSnippets::from_artifacts(&artifacts);
    if snippets.is_empty() {
        println!("No entries to apply.");
        return Ok(());
    }
    tracing::info!(
        command = "apply",
        entries = artifacts.len(),
        "Rendering snippets"
    );
    print!("{}", snippets.render(&config.output.declarations)?);
    Ok(())
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Run {
            config,
            scan_only,
            skip_review,
            repo,
            dry_run,
        } => {
            let options = RunOptions {
                scan_only,
                skip_review,
                target_repo: repo,
                dry_run,
            };
            run_pipeline(config, options).await
        }
        Commands::Pending { config } => show_pending(config),
        Commands::Preview { config, file } => show_preview(config, file),
        Commands::Apply { config, entry } => show_snippets(config, entry),
    }
}
