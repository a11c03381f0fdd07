use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::rules::{ContextRule, DocPattern};
use crate::tools::BUILTIN_TOOL_NAMES;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    #[serde(default = "default_docs_root")]
    pub docs_root: PathBuf,
    #[serde(default = "default_doc_globs")]
    pub doc_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub ignore_file_root: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub fallback_to_rules: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            docs_root: default_docs_root(),
            doc_globs: default_doc_globs(),
            exclude_globs: Vec::new(),
            ignore_file_root: None,
            fallback_to_rules: true,
        }
    }
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_docs_root() -> PathBuf {
    PathBuf::from("docs")
}
fn default_doc_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.mdx".to_string()]
}
fn default_true() -> bool {
    true
}

/// LLM provider settings. When the `[llm]` table is absent, detection is
/// rule-based only.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            endpoint: None,
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout(),
            temperature: None,
            max_tokens: None,
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_llm_timeout() -> u64 {
    60
}

impl LlmConfig {
    /// The API key, from the inline value or the configured environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }

    /// Whether a call can be attempted at all. OpenAI needs a credential;
    /// a local Ollama endpoint does not.
    pub fn is_available(&self) -> bool {
        match self.provider.as_str() {
            "ollama" => true,
            _ => self.resolve_api_key().is_some(),
        }
    }

    pub fn endpoint_or_default(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None if self.provider == "ollama" => "http://localhost:11434".to_string(),
            None => "https://api.openai.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_content_budget")]
    pub content_budget: usize,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            allowed_tools: default_allowed_tools(),
            max_iterations: default_max_iterations(),
            content_budget: default_content_budget(),
            system_prompt: None,
        }
    }
}

fn default_allowed_tools() -> Vec<String> {
    BUILTIN_TOOL_NAMES.iter().map(|s| s.to_string()).collect()
}
fn default_max_iterations() -> usize {
    12
}
fn default_content_budget() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    24 * 60 * 60
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_job_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_job_capacity")]
    pub capacity: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_job_ttl(),
            capacity: default_job_capacity(),
        }
    }
}

fn default_job_ttl() -> u64 {
    60 * 60
}
fn default_job_capacity() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

/// A custom convention rule from `[[rules]]`.
#[derive(Debug, Deserialize, Clone)]
pub struct RuleConfig {
    pub name: String,
    #[serde(default)]
    pub doc_glob: Option<String>,
    #[serde(default)]
    pub doc_regex: Option<String>,
    pub source_patterns: Vec<String>,
    pub confidence: f64,
}

impl RuleConfig {
    pub fn to_rule(&self) -> Result<ContextRule> {
        let doc_pattern = match (&self.doc_glob, &self.doc_regex) {
            (Some(glob), None) => DocPattern::Glob(glob.clone()),
            (None, Some(regex)) => DocPattern::Regex(regex.clone()),
            _ => anyhow::bail!(
                "rule '{}' must set exactly one of doc_glob or doc_regex",
                self.name
            ),
        };
        Ok(ContextRule {
            name: self.name.clone(),
            doc_pattern,
            source_patterns: self.source_patterns.clone(),
            confidence: self.confidence,
        })
    }
}

impl Config {
    /// Defaults used when no config file exists: rule-based detection over
    /// the current directory.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` when it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_minimal(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(Config::minimal())
    }
}

fn validate(config: &Config) -> Result<()> {
    if let Some(llm) = &config.llm {
        match llm.provider.as_str() {
            "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown llm provider: '{}'. Must be openai or ollama.",
                other
            ),
        }
        if llm.model.trim().is_empty() {
            anyhow::bail!("llm.model must not be empty");
        }
    }

    if config.agent.max_iterations == 0 {
        anyhow::bail!("agent.max_iterations must be > 0");
    }
    for tool in &config.agent.allowed_tools {
        if !BUILTIN_TOOL_NAMES.contains(&tool.as_str()) {
            anyhow::bail!("agent.allowed_tools contains unknown tool '{}'", tool);
        }
    }

    if config.jobs.capacity == 0 {
        anyhow::bail!("jobs.capacity must be > 0");
    }

    for rule in &config.rules {
        if !(0.0..=1.0).contains(&rule.confidence) {
            anyhow::bail!("rule '{}': confidence must be in [0.0, 1.0]", rule.name);
        }
        rule.to_rule()?.compile()?;
    }

    Ok(())
}
