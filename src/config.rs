use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Base URL of the chat backend, e.g. `http://127.0.0.1:8000`.
    pub base_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StreamConfig {
    /// Minimum interval between two applied content updates while streaming.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

fn default_frame_interval_ms() -> u64 {
    16
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub directory: Option<String>,
    pub retention_days: Option<u64>,
}

impl Config {
    pub fn load_with_path() -> Result<(Self, Option<PathBuf>)> {
        let mut candidates = Vec::new();

        if let Ok(explicit) = std::env::var("CANOPY_CONFIG") {
            candidates.push(PathBuf::from(explicit));
        }

        candidates.push(PathBuf::from("canopy.toml"));

        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("canopy").join("canopy.toml"));
        }

        candidates.push(crate::paths::canopy_home().join("canopy.toml"));

        for path in candidates {
            if path.exists() {
                let content = fs::read_to_string(&path)?;
                let config: Config = toml::from_str(&content)?;
                config.validate()?;
                return Ok((config, Some(path)));
            }
        }

        Ok((Config::default(), None))
    }

    pub fn validate(&self) -> Result<()> {
        let url_lower = self.server.base_url.trim().to_lowercase();
        if !url_lower.starts_with("http://") && !url_lower.starts_with("https://") {
            anyhow::bail!(
                "Server base_url must start with http:// or https://, got: {}",
                self.server.base_url
            );
        }
        if self.stream.frame_interval_ms > 1000 {
            anyhow::bail!("Stream frame_interval_ms must not exceed 1000");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                base_url: "http://127.0.0.1:8000".to_string(),
            },
            stream: StreamConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
