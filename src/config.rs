use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::{RouteOptions, DEFAULT_FALLBACK_MODELS, DEFAULT_MODEL};

/// Overrides the config directory when set.
pub const CONFIG_DIR_ENV: &str = "SUPERCOIN_CONFIG_DIR";

const CONFIG_FILE: &str = "config.toml";

/// Local callback server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3100,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("Invalid server address {}: {}", addr, e))
    }
}

/// Model selection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ModelsConfig {
    /// Canonical id or alias used when no model is chosen explicitly
    pub default_model: String,
    /// Tried in order when the default model keeps failing
    pub fallback_models: Vec<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            fallback_models: DEFAULT_FALLBACK_MODELS.iter().map(|s| s.to_string()).collect(),
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Retry and fallback policy for completions.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RouterConfig {
    pub retries: u32,
    /// Per-attempt deadline in milliseconds
    pub timeout_ms: u64,
    pub fallback: bool,
    /// Longest wait between attempts, even when the server asks for more
    pub max_backoff_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout_ms: 60_000,
            fallback: true,
            max_backoff_ms: 30_000,
        }
    }
}

impl RouterConfig {
    pub fn route_options(&self) -> RouteOptions {
        RouteOptions {
            retries: self.retries,
            timeout: Duration::from_millis(self.timeout_ms),
            fallback: self.fallback,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            ..RouteOptions::default()
        }
    }
}

/// Login flow timing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// How long an OAuth login waits for the browser redirect
    pub callback_timeout_secs: u64,
    /// How often expired OAuth states are swept
    pub state_sweep_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            callback_timeout_secs: 120,
            state_sweep_interval_secs: 60,
        }
    }
}

impl AuthConfig {
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }

    pub fn state_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.state_sweep_interval_secs.max(1))
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Where credentials and this file live; see [`Config::resolve_dir`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<PathBuf>,
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub router: RouterConfig,
    pub auth: AuthConfig,
}

impl Config {
    /// Directory used when nothing overrides it: ~/.config/supercoin
    pub fn default_dir() -> Option<PathBuf> {
        std::env::var_os(CONFIG_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|p| p.join("supercoin")))
    }

    /// Returns the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        Self::default_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Explicit `config_dir`, else the environment override, else the
    /// platform config directory.
    pub fn resolve_dir(&self) -> anyhow::Result<PathBuf> {
        self.config_dir
            .clone()
            .or_else(Self::default_dir)
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
    }

    /// Load configuration from the default path, falling back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from_path(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Ignoring unreadable config: {:#}", e);
                Self::default()
            }
        }
    }

    /// Load from `<dir>/config.toml`, or defaults rooted at `dir` if the
    /// file does not exist.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let path = dir.join(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            Self::default()
        };
        config.config_dir.get_or_insert_with(|| dir.to_path_buf());
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save to `config.toml` inside the resolved config directory.
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to_path(self.resolve_dir()?.join(CONFIG_FILE))
    }

    /// Save configuration to a specific path.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        tracing::debug!(path = %path.display(), "Saved config");
        Ok(())
    }
}
