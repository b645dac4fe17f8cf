use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::transport::path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Scheme and authority of the backend, e.g. `https://backend.example.com`.
    pub base_url: String,
    #[serde(default = "default_api_base_path")]
    pub api_base_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Directory for the durable session. In-memory when unset.
    #[serde(default)]
    pub session_dir: Option<PathBuf>,
}

fn default_api_base_path() -> String {
    "/api".to_string()
}
fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_base_path: default_api_base_path(),
            refresh_path: default_refresh_path(),
            timeout_secs: default_timeout_secs(),
            session_dir: None,
        }
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let cfg: GatewayConfig = serde_json::from_str(&raw).context("parsing JSON")?;
        Ok(cfg)
    }

    /// Override fields from `GATEWAY_*` environment variables. Unparseable
    /// numeric values are ignored.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("GATEWAY_BASE_URL") {
            self.base_url = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_API_BASE_PATH") {
            self.api_base_path = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_REFRESH_PATH") {
            self.refresh_path = v;
        }
        if let Some(v) = std::env::var("GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.timeout_secs = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_SESSION_DIR") {
            self.session_dir = Some(PathBuf::from(v));
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Absolute URL for a caller supplied path.
    pub fn api_url(&self, raw_path: &str) -> String {
        self.join(&path::normalize(&self.api_base_path, raw_path))
    }

    /// Absolute URL for an already normalized path. Input that is still an
    /// absolute URL (normalization could not parse it) is returned as is.
    pub fn join(&self, normalized: &str) -> String {
        if path::is_absolute_url(normalized) {
            return normalized.to_string();
        }
        let base = self.api_base_path.trim_matches('/');
        let origin = self.base_url.trim_end_matches('/');
        if base.is_empty() {
            format!("{}{}", origin, normalized)
        } else {
            format!("{}/{}{}", origin, base, normalized)
        }
    }

    pub fn refresh_url(&self) -> String {
        self.api_url(&self.refresh_path)
    }
}
