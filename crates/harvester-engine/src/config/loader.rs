use super::schema::{RunConfig, Secret};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_USERNAME: &str = "HARVESTER_USERNAME";
pub const ENV_PASSWORD: &str = "HARVESTER_PASSWORD";
pub const ENV_NOTIFICATION_URL: &str = "HARVESTER_NOTIFICATION_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./harvester.yaml
    /// 2. ~/.harvester/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<RunConfig, ConfigError> {
        let local_config = PathBuf::from("./harvester.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".harvester").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        Ok(RunConfig::default())
    }

    /// Parse a YAML (or JSON) input document.
    pub async fn load_from(path: &Path) -> Result<RunConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<RunConfig, ConfigError> {
        if content.trim().is_empty() {
            return Ok(RunConfig::default());
        }
        let config: RunConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Apply `HARVESTER_*` overrides from the process environment.
    pub fn apply_env(config: RunConfig) -> RunConfig {
        Self::apply_overrides(config, |name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    pub fn apply_overrides<F>(mut config: RunConfig, lookup: F) -> RunConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(username) = value(ENV_USERNAME) {
            config.username = username;
        }
        if let Some(password) = value(ENV_PASSWORD) {
            config.password = Secret::new(password);
        }
        if let Some(url) = value(ENV_NOTIFICATION_URL) {
            config.notification_url = url;
        }
        config
    }
}
