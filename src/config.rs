use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Longest request line the frontend accepts.
    pub max_request_size: usize,
    /// Read timeout on host replies; `None` blocks forever.
    pub host_timeout_ms: Option<u64>,
    /// Register `help`.
    pub docs: bool,
    pub prompt: String,
    pub welcome: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_request_size: 1024,
            host_timeout_ms: Some(5000),
            docs: true,
            prompt: "> ".to_string(),
            welcome: "Hey! Listen!".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn host_timeout(&self) -> Option<Duration> {
        self.host_timeout_ms.map(Duration::from_millis)
    }
}
