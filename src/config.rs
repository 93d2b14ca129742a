use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use url::Url;

use crate::services::sources::PollSettings;

pub const DEFAULT_CONFIG_PATH: &str = "genie.toml";
pub const DEFAULT_CHAT_MODEL: &str = "VertexAI-Chat";

pub const ENV_API_ENDPOINT: &str = "GENIE_API_ENDPOINT";
pub const ENV_JOBS_ENDPOINT: &str = "GENIE_JOBS_ENDPOINT";
pub const ENV_TOKEN: &str = "GENIE_TOKEN";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_jobs_endpoint")]
    pub jobs_endpoint: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            jobs_endpoint: default_jobs_endpoint(),
            token: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost/llm-service/api/v1".to_string()
}
fn default_jobs_endpoint() -> String {
    "http://localhost/jobs-service/api/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            stream: default_stream(),
            temperature: None,
        }
    }
}

fn default_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}
fn default_stream() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_polls: default_max_polls(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    10
}
fn default_max_polls() -> u32 {
    360
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.jobs.poll_interval_secs),
            max_polls: self.jobs.max_polls,
        }
    }

    /// Overlay `GENIE_*` variables, using `lookup` to read them.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(endpoint) = non_empty(ENV_API_ENDPOINT) {
            self.api.endpoint = endpoint;
        }
        if let Some(endpoint) = non_empty(ENV_JOBS_ENDPOINT) {
            self.api.jobs_endpoint = endpoint;
        }
        if let Some(token) = non_empty(ENV_TOKEN) {
            self.api.token = token;
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_endpoint("api.endpoint", &self.api.endpoint)?;
        validate_endpoint("api.jobs_endpoint", &self.api.jobs_endpoint)?;

        if self.api.token.trim().is_empty() {
            bail!("api.token must be set (or export {})", ENV_TOKEN);
        }
        if self.api.timeout_secs == 0 {
            bail!("api.timeout_secs must be > 0");
        }
        if self.chat.model.trim().is_empty() {
            bail!("chat.model must not be empty");
        }
        if let Some(t) = self.chat.temperature {
            if !(0.0..=2.0).contains(&t) {
                bail!("chat.temperature must be in [0.0, 2.0]");
            }
        }
        if self.jobs.max_polls == 0 {
            bail!("jobs.max_polls must be >= 1");
        }
        Ok(())
    }
}

fn validate_endpoint(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).with_context(|| format!("{} is not a valid URL: {}", field, value))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => bail!("{} must use http or https, got '{}'", field, other),
    }
}

/// Load configuration from `path`, or from `./genie.toml` when it exists.
/// Environment overrides are applied before validation.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default.exists() {
                read_config(&default)?
            } else {
                tracing::debug!("No {} found, using defaults", DEFAULT_CONFIG_PATH);
                Config::default()
            }
        }
    };

    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Config {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = parse(
            r#"
            [api]
            endpoint = "https://genie.example.com/llm-service/api/v1"
            token = "abc"
            "#,
        );
        assert_eq!(config.api.timeout_secs, 120);
        assert_eq!(config.chat.model, DEFAULT_CHAT_MODEL);
        assert!(config.chat.stream);
        assert_eq!(config.poll_settings().interval, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = parse(
            r#"
            [api]
            endpoint = "https://file.example.com/api"
            token = "from-file"
            "#,
        );
        config.apply_env(|key| match key {
            ENV_API_ENDPOINT => Some("https://env.example.com/api".to_string()),
            ENV_TOKEN => Some("from-env".to_string()),
            ENV_JOBS_ENDPOINT => Some("   ".to_string()),
            _ => None,
        });

        assert_eq!(config.api.endpoint, "https://env.example.com/api");
        assert_eq!(config.api.token, "from-env");
        assert_eq!(config.api.jobs_endpoint, default_jobs_endpoint());
    }

    #[test]
    fn test_validation_errors() {
        let missing_token = Config::default();
        let err = missing_token.validate().unwrap_err();
        assert!(err.to_string().contains("api.token"));

        let mut bad_scheme = Config::default();
        bad_scheme.api.token = "t".to_string();
        bad_scheme.api.endpoint = "ftp://genie.example.com".to_string();
        assert!(bad_scheme.validate().is_err());

        let mut hot = Config::default();
        hot.api.token = "t".to_string();
        hot.chat.temperature = Some(2.5);
        let err = hot.validate().unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn test_load_config_reads_explicit_file() {
        let path = std::env::temp_dir().join(format!("genie-config-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"
            [api]
            endpoint = "https://genie.example.com/llm-service/api/v1"
            jobs_endpoint = "https://genie.example.com/jobs-service/api/v1"
            token = "abc"

            [chat]
            model = "VertexAI-Chat-V2"
            stream = false
            temperature = 0.3

            [jobs]
            poll_interval_secs = 2
            max_polls = 5
            "#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.chat.model, "VertexAI-Chat-V2");
        assert!(!config.chat.stream);
        assert_eq!(config.chat.temperature, Some(0.3));
        assert_eq!(config.poll_settings().max_polls, 5);
    }

    #[test]
    fn test_load_config_missing_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/genie.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
