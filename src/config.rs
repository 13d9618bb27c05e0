//! TOML configuration.
//!
//! Every section except `[repository]` has defaults, so a minimal file
//! only names the vault:
//!
//! ```toml
//! [repository]
//! url = "https://github.com/owner/vault.git"
//! local_path = "./data/vault"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// How the vault is materialized locally.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryMode {
    /// Clone and pull a git remote.
    #[default]
    Git,
    /// Read files from `local_path` as they are. No history, no diffs.
    Local,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub local_path: PathBuf,
    /// Name of the environment variable holding an access token for
    /// private HTTPS remotes.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub mode: RepositoryMode,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

impl RepositoryConfig {
    /// Token read from `token_env`, if set and non-empty.
    pub fn token(&self) -> Option<String> {
        self.token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/vsync.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Path to a HuggingFace `tokenizer.json`. Needs the `hf-tokenizer`
    /// feature; ignored with a warning otherwise.
    #[serde(default)]
    pub tokenizer: Option<PathBuf>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            tokenizer: None,
        }
    }
}

fn default_max_tokens() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Capacity of the channel between a streaming run and its consumer.
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            progress_buffer: default_progress_buffer(),
        }
    }
}

fn default_progress_buffer() -> usize {
    64
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
    "127.0.0.1:8005".to_string()
}

impl Config {
    /// A local-mode configuration rooted at `vault`, with everything else
    /// defaulted. Used by tests and ad-hoc runs.
    pub fn minimal(vault: impl Into<PathBuf>) -> Self {
        Self {
            repository: RepositoryConfig {
                url: None,
                branch: default_branch(),
                local_path: vault.into(),
                token_env: None,
                mode: RepositoryMode::Local,
                include_globs: default_include_globs(),
                exclude_globs: Vec::new(),
            },
            db: DbConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            sync: SyncConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.repository.mode == RepositoryMode::Git {
        match config.repository.url.as_deref() {
            Some(url) if !url.trim().is_empty() => {}
            _ => bail!("repository.url is required when repository.mode = \"git\""),
        }
    }
    if config.repository.branch.trim().is_empty() {
        bail!("repository.branch must not be empty");
    }

    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    if config.sync.progress_buffer == 0 {
        bail!("sync.progress_buffer must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_git_config_gets_defaults() {
        let cfg = parse_config(
            r#"
            [repository]
            url = "https://github.com/owner/vault.git"
            local_path = "./vault"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.repository.branch, "main");
        assert_eq!(cfg.repository.mode, RepositoryMode::Git);
        assert_eq!(cfg.repository.include_globs, vec!["**/*.md"]);
        assert_eq!(cfg.chunking.max_tokens, 500);
        assert_eq!(cfg.sync.progress_buffer, 64);
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.server.bind, "127.0.0.1:8005");
    }

    #[test]
    fn git_mode_requires_url() {
        let err = parse_config("[repository]\nlocal_path = \"./vault\"\n").unwrap_err();
        assert!(err.to_string().contains("repository.url"));
    }

    #[test]
    fn local_mode_needs_no_url() {
        let cfg = parse_config("[repository]\nlocal_path = \"./vault\"\nmode = \"local\"\n").unwrap();
        assert_eq!(cfg.repository.mode, RepositoryMode::Local);
    }

    #[test]
    fn rejects_zero_max_tokens() {
        let err = parse_config(
            "[repository]\nlocal_path = \"v\"\nmode = \"local\"\n[chunking]\nmax_tokens = 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn enabled_embeddings_need_model_and_dims() {
        let err = parse_config(
            "[repository]\nlocal_path = \"v\"\nmode = \"local\"\n[embedding]\nprovider = \"openai\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = parse_config(
            "[repository]\nlocal_path = \"v\"\nmode = \"local\"\n[embedding]\nprovider = \"magic\"\nmodel = \"m\"\ndims = 3\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn token_comes_from_named_env_var() {
        let mut cfg = Config::minimal("./vault");
        cfg.repository.token_env = Some("VSYNC_TEST_TOKEN_UNSET_12345".into());
        assert!(cfg.repository.token().is_none());
    }
}
