//! Configuration loading, validation, and management for ctxpack.
//!
//! Loads configuration from `~/.ctxpack/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use ctxpack_core::pack::{PackLayout, SectionSource};
use ctxpack_core::path::PathRules;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.ctxpack/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CtxpackConfig {
    /// Remote store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Document root and write restrictions
    #[serde(default)]
    pub documents: DocumentsConfig,

    /// Context pack layout (title, location, ordered sections)
    #[serde(default)]
    pub pack: PackLayout,

    /// Commit retry policy on reference conflicts
    #[serde(default)]
    pub retry: RetryConfig,

    /// Size-reduction cascade for downstream consumers
    #[serde(default)]
    pub prune: PruneConfig,

    /// Durable per-instance state
    #[serde(default)]
    pub state: StateConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "github" or "in_memory"
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub repo: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// API token (prefer the `CTXPACK_GITHUB_TOKEN` env var)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend() -> String {
    "github".into()
}
fn default_branch() -> String {
    "main".into()
}
fn default_api_url() -> String {
    "https://api.github.com".into()
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            owner: String::new(),
            repo: String::new(),
            branch: default_branch(),
            token: None,
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("token", &redact(&self.token))
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    /// Logical document root inside the repository
    #[serde(default = "default_root")]
    pub root: String,

    /// Subtrees intents may never write
    #[serde(default = "default_read_only")]
    pub read_only: Vec<String>,

    /// Content cap per intent; larger content is truncated
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,
}

fn default_root() -> String {
    "data".into()
}
fn default_read_only() -> Vec<String> {
    vec!["data/identity".into()]
}
fn default_max_content_bytes() -> usize {
    ctxpack_core::intent::MAX_CONTENT_BYTES
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            read_only: default_read_only(),
            max_content_bytes: default_max_content_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total submission attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    4000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneConfig {
    /// Default character budget when the caller does not pass one
    #[serde(default = "default_budget_chars")]
    pub budget_chars: usize,

    #[serde(default = "default_identity_heading")]
    pub identity_heading: String,

    /// Identity subsections that survive step 1
    #[serde(default = "default_identity_keep")]
    pub identity_keep: Vec<String>,

    #[serde(default = "default_learned_heading")]
    pub learned_heading: String,

    #[serde(default = "default_learned_keep")]
    pub learned_keep: usize,

    #[serde(default = "default_stream_heading")]
    pub stream_heading: String,

    #[serde(default = "default_stream_keep")]
    pub stream_keep: usize,

    #[serde(default = "default_monthly_heading")]
    pub monthly_heading: String,

    #[serde(default = "default_monthly_max_lines")]
    pub monthly_max_lines: usize,

    #[serde(default = "default_truncation_notice")]
    pub truncation_notice: String,
}

fn default_budget_chars() -> usize {
    24_000
}
fn default_identity_heading() -> String {
    "## Identity".into()
}
fn default_identity_keep() -> Vec<String> {
    vec!["### Mission".into(), "### Roles".into()]
}
fn default_learned_heading() -> String {
    "## Learned Context".into()
}
fn default_learned_keep() -> usize {
    15
}
fn default_stream_heading() -> String {
    "## Daily Stream".into()
}
fn default_stream_keep() -> usize {
    40
}
fn default_monthly_heading() -> String {
    "## Monthly Plan".into()
}
fn default_monthly_max_lines() -> usize {
    30
}
fn default_truncation_notice() -> String {
    "\n\n[... context truncated to fit budget ...]\n".into()
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            budget_chars: default_budget_chars(),
            identity_heading: default_identity_heading(),
            identity_keep: default_identity_keep(),
            learned_heading: default_learned_heading(),
            learned_keep: default_learned_keep(),
            stream_heading: default_stream_heading(),
            stream_keep: default_stream_keep(),
            monthly_heading: default_monthly_heading(),
            monthly_max_lines: default_monthly_max_lines(),
            truncation_notice: default_truncation_notice(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// State directory; defaults to `~/.ctxpack/state`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl CtxpackConfig {
    /// Load configuration from the default path (~/.ctxpack/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `CTXPACK_GITHUB_TOKEN`, then `GITHUB_TOKEN`
    /// - `CTXPACK_REPO` as `owner/repo`
    /// - `CTXPACK_BRANCH`
    /// - `CTXPACK_STATE_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply the environment overrides of [`Self::load`].
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(token) = env("CTXPACK_GITHUB_TOKEN").or_else(|| env("GITHUB_TOKEN")) {
            self.store.token = Some(token);
        }

        if let Some(repo) = env("CTXPACK_REPO") {
            let (owner, name) = repo.split_once('/').ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "CTXPACK_REPO must look like 'owner/repo', got '{repo}'"
                ))
            })?;
            self.store.owner = owner.into();
            self.store.repo = name.into();
        }

        if let Some(branch) = env("CTXPACK_BRANCH") {
            self.store.branch = branch;
        }

        if let Some(dir) = env("CTXPACK_STATE_DIR") {
            self.state.dir = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ctxpack")
    }

    /// State directory for durable per-instance storage.
    pub fn state_dir(&self) -> PathBuf {
        self.state
            .dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("state"))
    }

    /// Path rules derived from the documents section.
    pub fn path_rules(&self) -> PathRules {
        PathRules::new(self.documents.root.clone(), self.documents.read_only.clone())
    }

    /// Full store path of the context pack.
    pub fn pack_store_path(&self) -> String {
        self.path_rules().resolve(&self.pack.pack_path)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        if self.documents.max_content_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "documents.max_content_bytes must be > 0".into(),
            ));
        }
        if self.prune.budget_chars <= self.prune.truncation_notice.len() {
            return Err(ConfigError::ValidationError(
                "prune.budget_chars must exceed the truncation notice length".into(),
            ));
        }

        let rules = self.path_rules();
        rules
            .validate(&self.pack_store_path())
            .map_err(|e| ConfigError::ValidationError(format!("pack.pack_path: {e}")))?;

        if !self.pack.title.starts_with("# ") {
            return Err(ConfigError::ValidationError(
                "pack.title must be a level-1 heading ('# ...')".into(),
            ));
        }

        let mut seen = HashSet::new();
        for section in &self.pack.sections {
            if !section.heading.starts_with("## ") {
                return Err(ConfigError::ValidationError(format!(
                    "pack section '{}' must be a level-2 heading",
                    section.heading
                )));
            }
            if !seen.insert(section.heading.trim_end()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate pack section '{}'",
                    section.heading
                )));
            }
            if let SectionSource::Combined { parts, .. } = &section.source
                && parts.is_empty()
            {
                return Err(ConfigError::ValidationError(format!(
                    "combined section '{}' has no parts",
                    section.heading
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `ctxpack validate --print-default`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
