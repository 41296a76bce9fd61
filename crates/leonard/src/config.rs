use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("invalid TOML at line {line}, column {column}: {message}")]
    InvalidToml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("missing required fields: {fields:?}")]
    MissingRequiredFields { fields: Vec<String> },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// May be left out of the file and supplied through `LEONARD_JID`.
    #[serde(default)]
    pub jid: String,
    /// May be left out of the file and supplied through `LEONARD_PASSWORD`.
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_resource")]
    pub resource: String,
    /// Server host; the JID domain when unset.
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl AccountConfig {
    /// The JID the bot binds as: `<jid>/<resource>`.
    pub fn full_jid(&self) -> String {
        format!("{}/{}", self.jid, self.resource)
    }

    pub fn host(&self) -> String {
        self.host.clone().unwrap_or_else(|| {
            self.jid
                .split_once('@')
                .map(|(_, domain)| domain.to_string())
                .unwrap_or_else(|| self.jid.clone())
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Rooms to join once discovered. Every discovered room when unset.
    pub join_rooms: Option<Vec<String>>,
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_room_directory")]
    pub room_directory: String,
}

impl SessionConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            join_rooms: None,
            keepalive_interval_secs: default_keepalive_interval_secs(),
            room_directory: default_room_directory(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ConfigOverrides {
    jid: Option<String>,
    password: Option<String>,
    host: Option<String>,
    log_level: Option<String>,
}

fn default_resource() -> String {
    "bot".to_string()
}

fn default_port() -> u16 {
    5222
}

fn default_keepalive_interval_secs() -> u64 {
    60
}

fn default_room_directory() -> String {
    "conf.hipchat.com".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Load configuration from a specific path, merging environment variable overrides.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    load_config_from_str_with_overrides(&contents, config_overrides_from_env())
}

/// Parse configuration from a TOML string, merging environment variable overrides.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    load_config_from_str_with_overrides(toml_str, config_overrides_from_env())
}

/// Parse configuration from a TOML string, ignoring the environment.
pub fn parse_config(toml_str: &str) -> Result<Config, ConfigError> {
    load_config_from_str_with_overrides(toml_str, ConfigOverrides::default())
}

fn load_config_from_str_with_overrides(
    toml_str: &str,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(toml_str).map_err(|e| {
        let (line, column) = e.span().map_or((0, 0), |span| {
            let before = &toml_str[..span.start];
            let line = before.chars().filter(|&c| c == '\n').count() + 1;
            let column = before
                .rfind('\n')
                .map_or(span.start + 1, |nl| span.start - nl);
            (line, column)
        });
        ConfigError::InvalidToml {
            line,
            column,
            message: e.message().to_string(),
        }
    })?;

    apply_overrides(&mut config, overrides);
    validate(&config)?;

    Ok(config)
}

fn config_overrides_from_env() -> ConfigOverrides {
    ConfigOverrides {
        jid: std::env::var("LEONARD_JID").ok(),
        password: std::env::var("LEONARD_PASSWORD").ok(),
        host: std::env::var("LEONARD_HOST").ok(),
        log_level: std::env::var("LEONARD_LOG_LEVEL").ok(),
    }
}

fn apply_overrides(config: &mut Config, overrides: ConfigOverrides) {
    if let Some(jid) = overrides.jid {
        config.account.jid = jid;
    }
    if let Some(password) = overrides.password {
        config.account.password = password;
    }
    if let Some(host) = overrides.host {
        config.account.host = Some(host);
    }
    if let Some(level) = overrides.log_level {
        config.logging.level = level;
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let mut missing = Vec::new();

    if config.account.jid.is_empty() {
        missing.push("account.jid".to_string());
    }
    if config.account.password.is_empty() {
        missing.push("account.password".to_string());
    }

    if !missing.is_empty() {
        return Err(ConfigError::MissingRequiredFields { fields: missing });
    }

    match config.account.jid.split_once('@') {
        Some((node, domain)) if !node.is_empty() && !domain.is_empty() => {}
        _ => {
            return Err(ConfigError::InvalidValue {
                field: "account.jid".to_string(),
                message: "must be of the form user@domain".to_string(),
            });
        }
    }

    if config.account.resource.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "account.resource".to_string(),
            message: "cannot be empty".to_string(),
        });
    }

    if config.session.keepalive_interval_secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: "session.keepalive_interval_secs".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }

    if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "logging.level".to_string(),
            message: format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
        });
    }

    Ok(())
}
