use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::DEFAULT_COUNTRY_PREFIX;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub chat: ChatConfig,
    pub llm: LlmConfig,
    pub commerce: CommerceConfig,
    pub queue: QueueConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_token: SecretString,
    pub webhook_secret: Option<SecretString>,
    /// Accept unsigned webhooks. Dangerous outside development; every
    /// accepted unsigned request is logged as a warning.
    pub allow_unsigned: bool,
    pub default_country_prefix: String,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

#[derive(Clone, Debug)]
pub struct CommerceConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub default_max_attempts: u32,
    pub immediate_priority: i32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub chat_api_token: Option<String>,
    pub chat_webhook_secret: Option<String>,
    pub chat_allow_unsigned: Option<bool>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub commerce_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://parley.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            chat: ChatConfig {
                base_url: "https://api.chat.example.com".to_string(),
                api_token: String::new().into(),
                webhook_secret: None,
                allow_unsigned: false,
                default_country_prefix: DEFAULT_COUNTRY_PREFIX.to_string(),
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 20,
                max_attempts: 2,
            },
            commerce: CommerceConfig { enabled: false, base_url: None, api_token: None },
            queue: QueueConfig { default_max_attempts: 5, immediate_priority: 100 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("parley.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(chat) = patch.chat {
            if let Some(base_url) = chat.base_url {
                self.chat.base_url = base_url;
            }
            if let Some(token) = chat.api_token {
                self.chat.api_token = token.into();
            }
            if let Some(secret) = chat.webhook_secret {
                self.chat.webhook_secret = Some(secret.into());
            }
            if let Some(allow_unsigned) = chat.allow_unsigned {
                self.chat.allow_unsigned = allow_unsigned;
            }
            if let Some(prefix) = chat.default_country_prefix {
                self.chat.default_country_prefix = prefix;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(api_key.into());
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_attempts) = llm.max_attempts {
                self.llm.max_attempts = max_attempts;
            }
        }

        if let Some(commerce) = patch.commerce {
            if let Some(enabled) = commerce.enabled {
                self.commerce.enabled = enabled;
            }
            if let Some(base_url) = commerce.base_url {
                self.commerce.base_url = Some(base_url);
            }
            if let Some(token) = commerce.api_token {
                self.commerce.api_token = Some(token.into());
            }
        }

        if let Some(queue) = patch.queue {
            if let Some(max_attempts) = queue.default_max_attempts {
                self.queue.default_max_attempts = max_attempts;
            }
            if let Some(priority) = queue.immediate_priority {
                self.queue.immediate_priority = priority;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("PARLEY_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(level) = env::var("PARLEY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(token) = env::var("PARLEY_CHAT_API_TOKEN") {
            self.chat.api_token = token.into();
        }
        if let Ok(secret) = env::var("PARLEY_CHAT_WEBHOOK_SECRET") {
            self.chat.webhook_secret = Some(secret.into());
        }
        if let Ok(raw) = env::var("PARLEY_CHAT_ALLOW_UNSIGNED") {
            self.chat.allow_unsigned = parse_bool("PARLEY_CHAT_ALLOW_UNSIGNED", &raw)?;
        }
        if let Ok(raw) = env::var("PARLEY_LLM_PROVIDER") {
            self.llm.provider = raw.parse()?;
        }
        if let Ok(key) = env::var("PARLEY_LLM_API_KEY") {
            self.llm.api_key = Some(key.into());
        }
        if let Ok(model) = env::var("PARLEY_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(raw) = env::var("PARLEY_COMMERCE_ENABLED") {
            self.commerce.enabled = parse_bool("PARLEY_COMMERCE_ENABLED", &raw)?;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(url) = overrides.database_url {
            self.database.url = url;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(token) = overrides.chat_api_token {
            self.chat.api_token = token.into();
        }
        if let Some(secret) = overrides.chat_webhook_secret {
            self.chat.webhook_secret = Some(secret.into());
        }
        if let Some(allow_unsigned) = overrides.chat_allow_unsigned {
            self.chat.allow_unsigned = allow_unsigned;
        }
        if let Some(provider) = overrides.llm_provider {
            self.llm.provider = provider;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(enabled) = overrides.commerce_enabled {
            self.commerce.enabled = enabled;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation("database.max_connections must be > 0".into()));
        }
        if !self.chat.default_country_prefix.starts_with('+') {
            return Err(ConfigError::Validation(
                "chat.default_country_prefix must start with `+`".into(),
            ));
        }
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::Validation("llm.timeout_secs must be > 0".into()));
        }
        if self.queue.default_max_attempts == 0 {
            return Err(ConfigError::Validation("queue.default_max_attempts must be > 0".into()));
        }
        if self.commerce.enabled && self.commerce.base_url.is_none() {
            return Err(ConfigError::Validation(
                "commerce.base_url is required when commerce.enabled = true".into(),
            ));
        }
        self.logging.level.parse::<tracing_level::Level>().map_err(|_| {
            ConfigError::Validation(format!("unknown logging.level `{}`", self.logging.level))
        })?;
        Ok(())
    }
}

/// Minimal stand-in for tracing's level parser so core stays free of the
/// tracing dependency; the server maps this string onto `tracing::Level`.
mod tracing_level {
    pub struct Level;

    impl std::str::FromStr for Level {
        type Err = ();

        fn from_str(value: &str) -> Result<Self, Self::Err> {
            match value.to_ascii_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => Ok(Level),
                _ => Err(()),
            }
        }
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride { key: key.to_string(), value: raw.to_string() }),
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    let default = PathBuf::from("parley.toml");
    default.exists().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let contents = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&contents)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    chat: Option<ChatPatch>,
    llm: Option<LlmPatch>,
    commerce: Option<CommercePatch>,
    queue: Option<QueuePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPatch {
    base_url: Option<String>,
    api_token: Option<String>,
    webhook_secret: Option<String>,
    allow_unsigned: Option<bool>,
    default_country_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct CommercePatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    api_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct QueuePatch {
    default_max_attempts: Option<u32>,
    immediate_priority: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    #[test]
    fn defaults_reject_unsigned_webhooks() {
        let config = AppConfig::default();
        assert!(!config.chat.allow_unsigned);
        assert!(config.chat.webhook_secret.is_none());
    }

    #[test]
    fn toml_patch_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"
[database]
url = "sqlite://test.db"

[chat]
api_token = "tok-123"
webhook_secret = "whsec-456"
default_country_prefix = "+1"

[llm]
provider = "anthropic"
model = "claude-sonnet"

[logging]
level = "debug"
format = "json"
"#
        )
        .expect("write config");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
        .expect("load");

        assert_eq!(config.database.url, "sqlite://test.db");
        assert_eq!(config.chat.api_token.expose_secret(), "tok-123");
        assert_eq!(config.chat.default_country_prefix, "+1");
        assert_eq!(config.llm.provider, LlmProvider::Anthropic);
        assert_eq!(config.llm.model, "claude-sonnet");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some("/nonexistent/parley.toml".into()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        });
        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }

    #[test]
    fn programmatic_overrides_win() {
        let config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".into()),
                chat_allow_unsigned: Some(true),
                llm_provider: Some(LlmProvider::OpenAi),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("load");

        assert_eq!(config.database.url, "sqlite::memory:");
        assert!(config.chat.allow_unsigned);
        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
    }

    #[test]
    fn validation_rejects_bad_country_prefix() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "[chat]\ndefault_country_prefix = \"52\"\n").expect("write config");

        let result = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        });
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validation_rejects_commerce_without_base_url() {
        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                commerce_enabled: Some(true),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
