//! TOML configuration and environment secrets.
//!
//! Non-secret settings live in a TOML file (see `config/bureau.example.toml`).
//! Shared secrets and API keys are read from the process environment, with an
//! optional `.env` file loaded first by the binary.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::answer::Locale;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub callback: CallbackConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Extra CORS origin (the web frontend), in addition to localhost dev.
    #[serde(default)]
    pub frontend_origin: Option<String>,
}

/// Ordering used by the no-keyword fallback ("most recent chunks").
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecentOrder {
    /// True recency: newest `created_at` first.
    #[default]
    CreatedAt,
    /// Insertion order proxy: highest row id first.
    Id,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: i64,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default)]
    pub recent_order: RecentOrder,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            candidate_limit: default_candidate_limit(),
            max_chunk_chars: default_max_chunk_chars(),
            recent_order: RecentOrder::default(),
        }
    }
}

fn default_limit() -> i64 {
    8
}
fn default_candidate_limit() -> i64 {
    50
}
fn default_max_chunk_chars() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_answer_temperature")]
    pub answer_temperature: f32,
    #[serde(default = "default_analysis_temperature")]
    pub analysis_temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            answer_temperature: default_answer_temperature(),
            analysis_temperature: default_analysis_temperature(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "gpt-4.1-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_answer_temperature() -> f32 {
    0.2
}
fn default_analysis_temperature() -> f32 {
    0.3
}
fn default_llm_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AnswerConfig {
    #[serde(default)]
    pub locale: Locale,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CallbackConfig {
    #[serde(default = "default_callback_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_callback_timeout_secs(),
        }
    }
}

fn default_callback_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    /// Age after which a held job lock is treated as abandoned.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

fn default_lock_ttl_secs() -> i64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_ga4_api_base")]
    pub ga4_api_base: String,
    #[serde(default = "default_google_token_url")]
    pub google_token_url: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_provider_timeout_secs(),
            ga4_api_base: default_ga4_api_base(),
            google_token_url: default_google_token_url(),
        }
    }
}

fn default_provider_timeout_secs() -> u64 {
    30
}
fn default_ga4_api_base() -> String {
    "https://analyticsdata.googleapis.com/v1beta".to_string()
}
fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.retrieval.limit < 1 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }
    if config.retrieval.candidate_limit < config.retrieval.limit {
        anyhow::bail!("retrieval.candidate_limit must be >= retrieval.limit");
    }
    if config.retrieval.max_chunk_chars == 0 {
        anyhow::bail!("retrieval.max_chunk_chars must be > 0");
    }

    // Upstream calls must carry a bounded timeout.
    for (name, secs) in [
        ("llm.timeout_secs", config.llm.timeout_secs),
        ("callback.timeout_secs", config.callback.timeout_secs),
        ("providers.timeout_secs", config.providers.timeout_secs),
    ] {
        if !(1..=120).contains(&secs) {
            anyhow::bail!("{} must be in [1, 120]", name);
        }
    }

    if !(0.0..=2.0).contains(&config.llm.answer_temperature)
        || !(0.0..=2.0).contains(&config.llm.analysis_temperature)
    {
        anyhow::bail!("llm temperatures must be in [0.0, 2.0]");
    }

    if config.jobs.lock_ttl_secs < 1 {
        anyhow::bail!("jobs.lock_ttl_secs must be >= 1");
    }

    Ok(config)
}

/// Secrets and integration endpoints taken from the environment.
///
/// Every field is optional here; each surface decides whether a missing
/// value is fatal (agent runtime secret for `serve`) or disables the
/// feature (run callback, cron and intel endpoints).
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub agent_runtime_secret: Option<String>,
    pub cron_secret: Option<String>,
    pub intel_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub agenthub_base_url: Option<String>,
    pub agent_service_key: Option<String>,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            agent_runtime_secret: env_non_empty("AGENT_RUNTIME_SECRET"),
            cron_secret: env_non_empty("CRON_SECRET"),
            intel_api_key: env_non_empty("INTEL_API_KEY"),
            openai_api_key: env_non_empty("OPENAI_API_KEY"),
            agenthub_base_url: env_non_empty("AGENTHUB_BASE_URL"),
            agent_service_key: env_non_empty("AGENT_SERVICE_KEY"),
            google_client_id: env_non_empty("GOOGLE_CLIENT_ID"),
            google_client_secret: env_non_empty("GOOGLE_CLIENT_SECRET"),
        }
    }

    /// Human-readable notes about optional integrations that are disabled.
    pub fn warnings(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.cron_secret.is_none() {
            out.push("CRON_SECRET not set - /internal/cron endpoints will return 503");
        }
        if self.intel_api_key.is_none() {
            out.push("INTEL_API_KEY not set - /intelligence endpoints will return 503");
        }
        if self.agenthub_base_url.is_none() || self.agent_service_key.is_none() {
            out.push("AGENTHUB_BASE_URL/AGENT_SERVICE_KEY not set - run callbacks disabled");
        }
        if self.google_client_id.is_none() || self.google_client_secret.is_none() {
            out.push("GOOGLE_CLIENT_ID/SECRET not set - GA4 token refresh will fail");
        }
        out
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
