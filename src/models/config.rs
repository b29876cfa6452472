use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// How the remote access client authenticates. Chosen once per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Credentials travel with every request.
    #[default]
    CredentialPerCall,
    /// One login, then a cached bearer token.
    CachedToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub auth_mode: AuthMode,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_notice_ttl_ms")]
    pub notice_ttl_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
}

fn default_api_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_notice_ttl_ms() -> u64 {
    3000
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            auth_mode: AuthMode::default(),
            debounce_ms: default_debounce_ms(),
            notice_ttl_ms: default_notice_ttl_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            profile_dir: None,
        }
    }
}

impl ClientConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn notice_ttl(&self) -> Duration {
        Duration::from_millis(self.notice_ttl_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Directory holding the profile storage file (cached session token).
    pub fn resolve_profile_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.profile_dir {
            return dir.clone();
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("autoapply")
    }
}

fn read_config_file(path: &Path) -> Result<ClientConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: ClientConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    tracing::info!("Loaded config from: {}", path.display());
    Ok(config)
}

/// Load the ClientConfig. Resolution order:
///   1. explicit `--config` path (must exist)
///   2. `AUTOAPPLY_CONFIG_DIR/config.json`
///   3. platform config dir (`dirs::config_dir()/autoapply/config.json`)
///   4. `ClientConfig::default()`
pub fn load_config(config_path: Option<&Path>) -> Result<ClientConfig> {
    if let Some(path) = config_path {
        if path.exists() {
            return read_config_file(path);
        }
        return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
    }

    if let Ok(config_dir) = std::env::var("AUTOAPPLY_CONFIG_DIR") {
        let path = PathBuf::from(&config_dir).join("config.json");
        if path.exists() {
            return read_config_file(&path);
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join("autoapply").join("config.json");
        if path.exists() {
            return read_config_file(&path);
        }
    }

    tracing::debug!("No config file found, using defaults");
    Ok(ClientConfig::default())
}
