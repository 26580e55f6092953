use std::path::{Path, PathBuf};

use directories::UserDirs;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::providers::ProviderKind;

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Path this config was loaded from - not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default, rename = "provider")]
    pub providers: Vec<ProviderConfig>,

    #[serde(default, rename = "model")]
    pub models: Vec<ModelConfig>,

    #[serde(default, rename = "feedback")]
    pub feedbacks: Vec<FeedbackConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self =
            toml::from_str(&raw).map_err(|error| ConfigError::Load(error.to_string()))?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// `~/.critiq/config.toml`, or a file next to the binary when no home
    /// directory can be determined.
    pub fn default_path() -> PathBuf {
        UserDirs::new().map_or_else(
            || PathBuf::from("critiq.toml"),
            |dirs| dirs.home_dir().join(".critiq").join("config.toml"),
        )
    }

    pub fn store_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(default_store_path)
    }
}

fn default_store_path() -> PathBuf {
    UserDirs::new().map_or_else(
        || PathBuf::from("critiq-sessions.db"),
        |dirs| dirs.home_dir().join(".critiq").join("sessions.db"),
    )
}

// ── HTTP server ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".into()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

// ── Session store ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path (default: `~/.critiq/sessions.db`)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// ── Providers ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub primary_endpoint: String,
    #[serde(default)]
    pub primary_api_key: Option<String>,
    #[serde(default)]
    pub fallback_endpoint: Option<String>,
    #[serde(default)]
    pub fallback_api_key: Option<String>,
    #[serde(default)]
    pub fallback_enabled: bool,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Azure variants only; each dialect has its own default.
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    60
}

// ── Models ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub provider: String,
    /// Backend-side identifier; for Azure OpenAI this is the deployment name.
    pub model_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

// ── Feedback plans ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    pub id: Uuid,
    #[serde(default)]
    pub task_title: String,
    #[serde(default)]
    pub task_description: String,
    #[serde(default)]
    pub task_context: String,
    #[serde(default)]
    pub course_name: String,
    #[serde(default)]
    pub course_context: String,
    #[serde(default, rename = "criterion")]
    pub criteria: Vec<CriterionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionConfig {
    pub id: Uuid,
    pub title: String,
    pub rank: u32,
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

// ── Endpoint normalization ────────────────────────────────────────

/// Admins routinely paste endpoints without a scheme; add the one the
/// dialect expects (Ollama installs are usually plain HTTP on a LAN, the
/// Azure surfaces are HTTPS-only).
pub(crate) fn normalize_endpoint(raw: &str, kind: ProviderKind) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Validation("endpoint must not be empty".into()));
    }

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        match kind {
            ProviderKind::Ollama => format!("http://{trimmed}"),
            ProviderKind::AzureAi | ProviderKind::AzureOpenai => format!("https://{trimmed}"),
        }
    };

    Url::parse(&with_scheme)
        .map_err(|error| ConfigError::Validation(format!("invalid endpoint {raw:?}: {error}")))
}
