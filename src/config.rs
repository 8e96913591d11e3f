use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Blob store backend selection. The filesystem backend keeps everything
/// local; the http backend speaks the two-step upload-target protocol of a
/// remote store.
#[derive(Debug, Deserialize, Clone)]
pub struct BlobConfig {
    #[serde(default = "default_blob_backend")]
    pub backend: String,
    #[serde(default = "default_blob_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_blob_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: default_blob_backend(),
            root: default_blob_root(),
            base_url: None,
            timeout_secs: default_blob_timeout_secs(),
        }
    }
}

fn default_blob_backend() -> String {
    "filesystem".to_string()
}
fn default_blob_root() -> PathBuf {
    PathBuf::from("./data/blobs")
}
fn default_blob_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_agent_base_url")]
    pub base_url: String,
    #[serde(default = "default_agent_model")]
    pub model: String,
    /// Environment variable holding the API key. Left unset for keyless
    /// local endpoints.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: default_agent_base_url(),
            model: default_agent_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

fn default_agent_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_agent_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_agent_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    /// Upload size cap in bytes. Checked before any extraction or transfer.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Maximum user message length after trimming.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Messages per page when listing a thread.
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_message_chars: default_max_message_chars(),
            page_size: default_page_size(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_max_message_chars() -> usize {
    1000
}
fn default_page_size() -> i64 {
    50
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    match config.blob.backend.as_str() {
        "filesystem" => {}
        "http" => {
            if config.blob.base_url.is_none() {
                anyhow::bail!("blob.base_url must be set when backend is 'http'");
            }
        }
        other => anyhow::bail!(
            "Unknown blob backend: '{}'. Must be filesystem or http.",
            other
        ),
    }

    if config.limits.max_file_bytes == 0 {
        anyhow::bail!("limits.max_file_bytes must be > 0");
    }
    if config.limits.max_message_chars == 0 {
        anyhow::bail!("limits.max_message_chars must be > 0");
    }
    if config.limits.page_size < 1 {
        anyhow::bail!("limits.page_size must be >= 1");
    }

    if config.agent.model.is_empty() {
        anyhow::bail!("agent.model must not be empty");
    }

    Ok(config)
}
