//! Builds the concrete clients the CLI hands to the core pipeline: the
//! GitHub scanner and one [`ResilientGenerator`] per configured agent.

use anyhow::{Context, Result};
use wikidraft_core::generate::{ResilientGenerator, Target};
use wikidraft_core::provider::{build_provider, ProviderConfig, ProviderKind};
use wikidraft_core::scan::{GitHubScanner, ScanConfig};

use crate::load_config::{AgentConfig, CliConfig};

fn target(kind: ProviderKind, model: &str, providers: &ProviderConfig) -> Result<Target> {
    let provider = build_provider(kind, providers)
        .with_context(|| format!("Failed to build {kind} client"))?;
    Ok(Target::new(kind, model, provider))
}

/// Generator for `agent`, honouring its `max_tokens` override.
pub fn build_generator(
    agent: &AgentConfig,
    providers: &ProviderConfig,
) -> Result<ResilientGenerator> {
    let mut providers = providers.clone();
    if let Some(max_tokens) = agent.max_tokens {
        providers.max_output_tokens = max_tokens;
    }
    let primary = target(agent.provider, &agent.model, &providers)?;
    let fallback = agent
        .fallback
        .as_ref()
        .map(|(kind, model)| target(*kind, model, &providers))
        .transpose()?;
    tracing::info!(
        provider = %agent.provider,
        model = %agent.model,
        fallback = ?agent.fallback,
        "Generator configured"
    );
    Ok(ResilientGenerator::new(primary, fallback, agent.policy.clone()))
}

pub fn build_scanner(config: &CliConfig) -> Result<GitHubScanner> {
    let scan = ScanConfig {
        username: config.github.username.clone(),
        token: config.github_token.clone(),
        exclude_repos: config.github.exclude_repos.clone(),
        lookback_days: config.github.lookback_days,
        api_base: config.github_api_base.clone(),
    };
    GitHubScanner::new(scan).context("Failed to build GitHub client")
}
