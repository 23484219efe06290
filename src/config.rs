use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr, bail};
use log::debug;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MISTRAL_BASE_URL: &str = "https://api.mistral.ai";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub bind: String,
    pub database_path: Option<PathBuf>,
    pub secret_key: Option<String>,
    pub algorithm: String,
    pub access_token_expire_minutes: i64,
    pub gemini_api_key: Option<String>,
    pub mistral_api_key: Option<String>,
    pub gemini_base_url: String,
    pub mistral_base_url: String,
    pub request_timeout_secs: u64,
    pub rate_limit: RateLimitConfig,
    pub transcript: TranscriptConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranscriptConfig {
    pub preferred_langs: Vec<String>,
    pub browser: String,
    pub browser_enabled: bool,
    pub browser_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            database_path: None,
            secret_key: None,
            algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
            gemini_api_key: None,
            mistral_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            mistral_base_url: DEFAULT_MISTRAL_BASE_URL.to_string(),
            request_timeout_secs: 30,
            rate_limit: RateLimitConfig::default(),
            transcript: TranscriptConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 50,
            window_secs: 3600,
        }
    }
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            preferred_langs: vec!["en".to_string(), "hi".to_string()],
            browser: "chromium".to_string(),
            browser_enabled: true,
            browser_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load config from the given path, or ~/.config/ytsum/config.toml if it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
        if path.exists() {
            debug!("Loading config from {}", path.display());
            let content = std::fs::read_to_string(&path)?;
            let config: Config =
                toml::from_str(&content).wrap_err_with(|| format!("invalid config file {}", path.display()))?;
            Ok(config)
        } else {
            debug!("No config file found at {}", path.display());
            Ok(Config::default())
        }
    }

    /// Override fields from environment variables (as returned by `lookup`)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("SECRET_KEY") {
            self.secret_key = Some(v);
        }
        if let Some(v) = get("ALGORITHM") {
            self.algorithm = v;
        }
        if let Some(v) = get("ACCESS_TOKEN_EXPIRE_MINUTES").and_then(|v| v.parse().ok()) {
            self.access_token_expire_minutes = v;
        }
        if let Some(v) = get("GEMINI_API_KEY") {
            self.gemini_api_key = Some(v);
        }
        if let Some(v) = get("MISTRAL_API_KEY") {
            self.mistral_api_key = Some(v);
        }
        if let Some(v) = get("DATABASE_URL") {
            self.database_path = Some(sqlite_path_from_url(&v));
        }
        if let Some(v) = get("YTSUM_BIND") {
            self.bind = v;
        }
    }

    /// Settings the HTTP service cannot run without
    pub fn validate_for_serve(&self) -> Result<()> {
        if self.secret_key.as_deref().unwrap_or_default().is_empty() {
            bail!("secret_key is not set (config file or SECRET_KEY environment variable)");
        }
        if self.algorithm != "HS256" {
            bail!("unsupported token algorithm {:?}; only HS256 is supported", self.algorithm);
        }
        if self.access_token_expire_minutes <= 0 {
            bail!("access_token_expire_minutes must be positive");
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ytsum")
                .join("ytsum.db")
        })
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("ytsum")
        .join("config.toml")
}

/// Accept either a plain path or a `sqlite:///path` style URL
fn sqlite_path_from_url(url: &str) -> PathBuf {
    let path = url
        .strip_prefix("sqlite:///")
        .or_else(|| url.strip_prefix("sqlite://"))
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    PathBuf::from(path)
}
