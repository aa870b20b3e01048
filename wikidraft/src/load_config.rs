/// `load_config` module: reads the static YAML config, injects secrets from the
/// environment and resolves every path against the config file's directory.
///
/// # Responsibilities
/// - Parse the user-supplied YAML into typed sections (`github`, `draft_agent`,
///   `review_agent`, `output`, `state_file`, `templates_dir`)
/// - Map provider names to [`ProviderKind`] and reject unknown ones early
/// - Read API keys, hosts and base-URL overrides from the environment
/// - Resolve relative paths so runs behave the same from any working directory
///
/// # Errors
/// All errors use `anyhow::Error` and surface at the CLI boundary.
use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use wikidraft_core::generate::RetryPolicy;
use wikidraft_core::literal::DeclarationNames;
use wikidraft_core::provider::{ProviderConfig, ProviderKind};
use wikidraft_core::scan::DEFAULT_API_BASE;

#[derive(Debug, Clone, Deserialize)]
pub struct GithubSection {
    pub username: String,
    #[serde(default)]
    pub exclude_repos: Vec<String>,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub fallback_provider: Option<String>,
    #[serde(default)]
    pub fallback_model: Option<String>,
    /// Falls back to 0.4 for drafting and 0.2 for review.
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSection {
    pub constants_file: PathBuf,
    #[serde(default = "default_drafts_dir")]
    pub drafts_dir: PathBuf,
    #[serde(default = "default_reviewed_dir")]
    pub reviewed_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub projects_declaration: Option<String>,
    #[serde(default)]
    pub tech_dives_declaration: Option<String>,
}

fn default_lookback_days() -> u32 {
    7
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    10
}
const DRAFT_TEMPERATURE: f32 = 0.4;
const REVIEW_TEMPERATURE: f32 = 0.2;

fn default_drafts_dir() -> PathBuf {
    PathBuf::from(".drafts")
}
fn default_reviewed_dir() -> PathBuf {
    PathBuf::from(".reviewed")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".output")
}
fn default_state_file() -> PathBuf {
    PathBuf::from(".state/processed.json")
}
fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    github: GithubSection,
    draft_agent: AgentSection,
    #[serde(default)]
    review_agent: Option<AgentSection>,
    output: OutputSection,
    #[serde(default = "default_state_file")]
    state_file: PathBuf,
    #[serde(default = "default_templates_dir")]
    templates_dir: PathBuf,
}

/// A drafting or reviewing agent with its provider names resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub fallback: Option<(ProviderKind, String)>,
    pub policy: RetryPolicy,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub constants_file: PathBuf,
    pub drafts_dir: PathBuf,
    pub reviewed_dir: PathBuf,
    pub output_dir: PathBuf,
    pub declarations: DeclarationNames,
}

/// Fully resolved configuration used by the CLI commands.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub github: GithubSection,
    pub github_token: Option<String>,
    pub github_api_base: String,
    pub draft_agent: AgentConfig,
    pub review_agent: Option<AgentConfig>,
    pub output: OutputPaths,
    pub state_file: PathBuf,
    pub templates_dir: PathBuf,
    pub providers: ProviderConfig,
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn parse_kind(name: &str, section: &str) -> Result<ProviderKind> {
    name.parse::<ProviderKind>()
        .map_err(|e| anyhow!("{section}: {e}"))
}

fn agent_config(
    section: &AgentSection,
    name: &str,
    default_temperature: f32,
) -> Result<AgentConfig> {
    let provider = parse_kind(&section.provider, name)?;
    let fallback = match (&section.fallback_provider, &section.fallback_model) {
        (Some(kind), Some(model)) => Some((parse_kind(kind, name)?, model.clone())),
        (Some(_), None) => bail!("{name}: fallback_provider requires fallback_model"),
        (None, _) => None,
    };
    Ok(AgentConfig {
        provider,
        model: section.model.clone(),
        fallback,
        policy: RetryPolicy {
            max_retries: section.max_retries,
            retry_delay: Duration::from_secs(section.retry_delay_seconds),
            temperature: section.temperature.unwrap_or(default_temperature),
        },
        max_tokens: section.max_tokens,
    })
}

fn providers_from_env() -> ProviderConfig {
    let defaults = ProviderConfig::default();
    ProviderConfig {
        gemini_api_key: env_var("GEMINI_API_KEY"),
        groq_api_key: env_var("GROQ_API_KEY"),
        anthropic_api_key: env_var("ANTHROPIC_API_KEY"),
        gemini_base_url: env_var("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base_url),
        groq_base_url: env_var("GROQ_BASE_URL").unwrap_or(defaults.groq_base_url),
        anthropic_base_url: env_var("ANTHROPIC_BASE_URL").unwrap_or(defaults.anthropic_base_url),
        ollama_host: env_var("OLLAMA_HOST").unwrap_or(defaults.ollama_host),
        max_output_tokens: defaults.max_output_tokens,
    }
}

fn warn_missing_key(kind: ProviderKind, providers: &ProviderConfig) {
    let (var, present) = match kind {
        ProviderKind::Gemini => ("GEMINI_API_KEY", providers.gemini_api_key.is_some()),
        ProviderKind::Groq => ("GROQ_API_KEY", providers.groq_api_key.is_some()),
        ProviderKind::Anthropic => ("ANTHROPIC_API_KEY", providers.anthropic_api_key.is_some()),
        ProviderKind::Ollama => return,
    };
    if !present {
        warn!(provider = %kind, var, "API key not set; calls to this provider will fail");
    }
}

/// Loads the YAML config at `path` and injects secrets from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let raw: RawConfig = match serde_yaml::from_str(&content) {
        Ok(conf) => conf,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let base = path_ref
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let draft_agent = agent_config(&raw.draft_agent, "draft_agent", DRAFT_TEMPERATURE)?;
    let review_agent = raw
        .review_agent
        .as_ref()
        .map(|section| agent_config(section, "review_agent", REVIEW_TEMPERATURE))
        .transpose()?;

    let providers = providers_from_env();
    for agent in std::iter::once(&draft_agent).chain(review_agent.as_ref()) {
        warn_missing_key(agent.provider, &providers);
        if let Some((kind, _)) = &agent.fallback {
            warn_missing_key(*kind, &providers);
        }
    }

    let DeclarationNames {
        projects,
        tech_dives,
    } = DeclarationNames::default();
    let output = OutputPaths {
        constants_file: resolve(&base, &raw.output.constants_file),
        drafts_dir: resolve(&base, &raw.output.drafts_dir),
        reviewed_dir: resolve(&base, &raw.output.reviewed_dir),
        output_dir: resolve(&base, &raw.output.output_dir),
        declarations: DeclarationNames {
            projects: raw.output.projects_declaration.unwrap_or(projects),
            tech_dives: raw.output.tech_dives_declaration.unwrap_or(tech_dives),
        },
    };

    let github_token = env_var("GITHUB_TOKEN");
    if github_token.is_none() {
        info!(
            "GITHUB_TOKEN not set; scanning public repositories unauthenticated"
        );
    }

    info!(config_path = ?path_ref, "Configuration loaded");
    Ok(CliConfig {
        github: raw.github,
        github_token,
        github_api_base: env_var("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        draft_agent,
        review_agent,
        output,
        state_file: resolve(&base, &raw.state_file),
        templates_dir: resolve(&base, &raw.templates_dir),
        providers,
    })
}
