//! Configuration for medrelay paths and the remote API.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MEDRELAY_HOME, MEDRELAY_API_URL)
//! 2. Config file (.medrelay/config.yaml)
//! 3. Defaults (~/.medrelay, localhost API)
//!
//! Config file discovery:
//! - Searches current directory and parents for .medrelay/config.yaml
//! - Paths in the config file are relative to the config file's parent

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::sync::ServerErrorPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<std::result::Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub api: Option<ApiConfig>,
    #[serde(default)]
    pub sync: Option<SyncConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub language_code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    pub probe_interval_secs: Option<u64>,
    pub server_error_policy: Option<ServerErrorPolicy>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the app home (queue, recordings, token)
    pub home: PathBuf,
    /// Remote API base URL (the patients service root)
    pub api_base_url: String,
    /// Per-request timeout for submission delivery
    pub request_timeout: Duration,
    /// Locale hint forwarded with submissions
    pub language_code: Option<String>,
    /// How often the connectivity probe runs
    pub probe_interval: Duration,
    /// Mid-flush policy for ambiguous server failures
    pub server_error_policy: ServerErrorPolicy,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from(".medrelay"),
            api_base_url: "http://localhost:5000/patients".to_string(),
            request_timeout: Duration::from_secs(30),
            language_code: None,
            probe_interval: Duration::from_secs(10),
            server_error_policy: ServerErrorPolicy::default(),
            config_file: None,
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".medrelay").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".medrelay");

    let config_file = find_config_file();
    let file = match config_file.as_deref() {
        Some(path) => Some(load_config_file(path)?),
        None => None,
    };

    let home = if let Ok(env_home) = std::env::var("MEDRELAY_HOME") {
        PathBuf::from(env_home)
    } else if let Some(home_str) = file.as_ref().and_then(|f| f.home.as_deref()) {
        let base = config_file
            .as_deref()
            .and_then(|p| p.parent())
            .unwrap_or(Path::new("."));
        resolve_path(base, home_str)
    } else {
        default_home
    };

    let api = file.as_ref().and_then(|f| f.api.clone()).unwrap_or_default();
    let sync = file.as_ref().and_then(|f| f.sync.clone()).unwrap_or_default();

    let api_base_url = std::env::var("MEDRELAY_API_URL")
        .ok()
        .or(api.base_url)
        .unwrap_or_else(|| "http://localhost:5000/patients".to_string());

    Ok(ResolvedConfig {
        home,
        api_base_url,
        request_timeout: Duration::from_secs(api.timeout_seconds.unwrap_or(30)),
        language_code: api.language_code,
        probe_interval: Duration::from_secs(sync.probe_interval_secs.unwrap_or(10)),
        server_error_policy: sync.server_error_policy.unwrap_or_default(),
        config_file,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

// ============================================================================
// Convenience functions
// ============================================================================

/// Get the medrelay home directory
pub fn medrelay_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Path of the durable queue file ($MEDRELAY_HOME/queue.json)
pub fn queue_path() -> Result<PathBuf> {
    Ok(config()?.home.join("queue.json"))
}

/// Directory for recorded voice memos ($MEDRELAY_HOME/recordings)
pub fn recordings_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("recordings"))
}

/// Path of the stored access token ($MEDRELAY_HOME/access_token)
pub fn token_path() -> Result<PathBuf> {
    Ok(config()?.home.join("access_token"))
}
