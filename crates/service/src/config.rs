use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use common::crypto::{Secret, SecretError};
use serde::{Deserialize, Serialize};
use url::Url;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const COLLECTIONS_DIR_NAME: &str = "collections";
pub const PUBLISHED_DIR_NAME: &str = "published";
pub const CONTENT_DIR_NAME: &str = "content";
pub const KEYRING_DIR_NAME: &str = "keyring";

pub const ENV_VERIFY_ENABLED: &str = "ENABLE_VERIFY_PUBLISH_CONTENT";
pub const ENV_VERIFY_RETRY_DELAY: &str = "VERIFY_RETRTY_DELAY";
pub const ENV_VERIFY_RETRY_COUNT: &str = "VERIFY_RETRTY_COUNT";
pub const ENV_CENTRAL_KEYRING: &str = "ENABLE_CENTRAL_KEYRING";
pub const ENV_AGENT_URL: &str = "PUBLISHING_AGENT_URL";
pub const ENV_WEBSITE_URL: &str = "PUBLIC_WEBSITE_URL";
pub const ENV_AGENT_SECRET: &str = "PUBLISHING_AGENT_SECRET";
pub const ENV_MASTER_KEY: &str = "KEYRING_MASTER_KEY";
pub const ENV_DATA_DIR: &str = "PRESS_DATA_DIR";
pub const ENV_LOG_LEVEL: &str = "PRESS_LOG_LEVEL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid secret: {0}")]
    Secret(#[from] SecretError),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Post-publish verification policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyConfig {
    /// off unless explicitly enabled
    pub enabled: bool,
    /// wait between attempts
    pub retry_delay: Duration,
    /// maximum number of attempts per file
    pub retry_count: u32,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retry_delay: Duration::from_millis(default_retry_delay_ms()),
            retry_count: default_retry_count(),
        }
    }
}

impl VerifyConfig {
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.max(1)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// root for collection descriptors, published records, content and keys
    pub data_dir: PathBuf,

    // publishing
    /// base url of the remote publishing agent
    pub publishing_agent_url: Url,
    /// base url the published website is served from, used by verification
    pub public_website_url: Url,
    /// secret shared with the publishing agent, wraps collection keys in
    ///  transit. Required to publish encrypted collections
    pub publishing_agent_secret: Option<Secret>,

    // keyring
    /// wraps collection keys at rest in the central keyring,
    ///  if not set then only the legacy in-memory keyring is available
    pub keyring_master_key: Option<Secret>,
    /// route keyring reads and writes through the central keyring
    pub central_keyring_enabled: bool,

    pub verify: VerifyConfig,

    // misc
    pub log_level: tracing::Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            publishing_agent_url: default_agent_url(),
            public_website_url: default_website_url(),
            publishing_agent_secret: None,
            keyring_master_key: None,
            central_keyring_enabled: false,
            verify: VerifyConfig::default(),
            log_level: tracing::Level::INFO,
        }
    }
}

/// On-disk (TOML) shape of [`Config`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_agent_url")]
    pub publishing_agent_url: Url,
    #[serde(default = "default_website_url")]
    pub public_website_url: Url,
    /// base64
    #[serde(default)]
    pub publishing_agent_secret: Option<String>,
    /// base64
    #[serde(default)]
    pub keyring_master_key: Option<String>,
    #[serde(default)]
    pub enable_central_keyring: bool,
    #[serde(default)]
    pub verify: FileVerifyConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVerifyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

impl Default for FileVerifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retry_delay_ms: default_retry_delay_ms(),
            retry_count: default_retry_count(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./press-data")
}

fn default_agent_url() -> Url {
    Url::parse("http://localhost:8084").expect("valid default url")
}

fn default_website_url() -> Url {
    Url::parse("http://localhost:8080").expect("valid default url")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_retry_count() -> u32 {
    10
}

impl TryFrom<FileConfig> for Config {
    type Error = ConfigError;

    fn try_from(file: FileConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            data_dir: file.data_dir,
            publishing_agent_url: file.publishing_agent_url,
            public_website_url: file.public_website_url,
            publishing_agent_secret: file
                .publishing_agent_secret
                .as_deref()
                .map(Secret::from_base64)
                .transpose()?,
            keyring_master_key: file
                .keyring_master_key
                .as_deref()
                .map(Secret::from_base64)
                .transpose()?,
            central_keyring_enabled: file.enable_central_keyring,
            verify: VerifyConfig {
                enabled: file.verify.enabled,
                retry_delay: Duration::from_millis(file.verify.retry_delay_ms),
                retry_count: file.verify.retry_count,
            },
            log_level: parse_value("log_level", &file.log_level)?,
        })
    }
}

impl Config {
    /// Load from a TOML file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(raw)?;
        file.try_into()
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`; unset keys keep their current value
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_VERIFY_ENABLED) {
            self.verify.enabled = parse_bool(ENV_VERIFY_ENABLED, &v)?;
        }
        if let Some(v) = lookup(ENV_VERIFY_RETRY_DELAY) {
            self.verify.retry_delay = Duration::from_millis(parse_value(ENV_VERIFY_RETRY_DELAY, &v)?);
        }
        if let Some(v) = lookup(ENV_VERIFY_RETRY_COUNT) {
            self.verify.retry_count = parse_value(ENV_VERIFY_RETRY_COUNT, &v)?;
        }
        if let Some(v) = lookup(ENV_CENTRAL_KEYRING) {
            self.central_keyring_enabled = parse_bool(ENV_CENTRAL_KEYRING, &v)?;
        }
        if let Some(v) = lookup(ENV_AGENT_URL) {
            self.publishing_agent_url = Url::parse(v.trim())?;
        }
        if let Some(v) = lookup(ENV_WEBSITE_URL) {
            self.public_website_url = Url::parse(v.trim())?;
        }
        if let Some(v) = lookup(ENV_AGENT_SECRET) {
            self.publishing_agent_secret = Some(Secret::from_base64(v.trim())?);
        }
        if let Some(v) = lookup(ENV_MASTER_KEY) {
            self.keyring_master_key = Some(Secret::from_base64(v.trim())?);
        }
        if let Some(v) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_LOG_LEVEL) {
            self.log_level = parse_value(ENV_LOG_LEVEL, &v)?;
        }
        Ok(())
    }

    pub fn collections_dir(&self) -> PathBuf {
        self.data_dir.join(COLLECTIONS_DIR_NAME)
    }

    pub fn published_dir(&self) -> PathBuf {
        self.data_dir.join(PUBLISHED_DIR_NAME)
    }

    pub fn content_dir(&self) -> PathBuf {
        self.data_dir.join(CONTENT_DIR_NAME)
    }

    pub fn keyring_dir(&self) -> PathBuf {
        self.data_dir.join(KEYRING_DIR_NAME)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.verify.enabled);
        assert_eq!(config.verify.retry_delay, Duration::from_millis(5000));
        assert_eq!(config.verify.retry_count, 10);
        assert!(!config.central_keyring_enabled);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml(
            r#"
            data_dir = "/var/lib/press"
            enable_central_keyring = true

            [verify]
            enabled = true
            retry_count = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/press"));
        assert!(config.central_keyring_enabled);
        assert!(config.verify.enabled);
        assert_eq!(config.verify.retry_count, 3);
        assert_eq!(config.verify.retry_delay, Duration::from_millis(5000));
        assert_eq!(config.log_level, tracing::Level::INFO);
    }

    #[test]
    fn test_env_overrides() {
        let secret = Secret::generate();
        let env: HashMap<&str, String> = [
            (ENV_VERIFY_ENABLED, "TRUE".to_string()),
            (ENV_VERIFY_RETRY_DELAY, "250".to_string()),
            (ENV_VERIFY_RETRY_COUNT, "4".to_string()),
            (ENV_CENTRAL_KEYRING, "true".to_string()),
            (ENV_AGENT_URL, "http://agent.internal:9000".to_string()),
            (ENV_AGENT_SECRET, secret.to_base64()),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_with(|k| env.get(k).cloned())
            .unwrap();
        assert!(config.verify.enabled);
        assert_eq!(config.verify.retry_delay, Duration::from_millis(250));
        assert_eq!(config.verify.retry_count, 4);
        assert!(config.central_keyring_enabled);
        assert_eq!(config.publishing_agent_url.host_str(), Some("agent.internal"));
        assert_eq!(config.publishing_agent_secret, Some(secret));
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = Config::default();
        let err = config
            .apply_env_with(|k| (k == ENV_VERIFY_RETRY_COUNT).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
