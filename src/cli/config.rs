//! relaybot configuration file handling
//!
//! Provides default configuration generation and loading for the relay bot.
//! Configuration files are TOML format; only `[telegram]` and `[channel]` are
//! required, every other section falls back to defaults.
//!
//! The bot token may be left out of the file and supplied through
//! `RELAYBOT_BOT_TOKEN` instead.

use relaybot::broadcast::DEFAULT_CONCURRENCY;
use relaybot::store::InviteSettings;
use relaybot::telegram::client::DEFAULT_API_BASE;
use relaybot::telegram::{BotConfig, BotToken, ChatId, UserId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding `telegram.bot_token`
pub const TOKEN_ENV: &str = "RELAYBOT_BOT_TOKEN";

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_INVITE_TTL: &str = "24h";
const DEFAULT_INVITE_BASE_URL: &str = "https://t.me";
const DEFAULT_PAGE_SIZE: u32 = 10;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_IN_FLIGHT: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config file '{0}' already exists (use --force to overwrite)")]
    Exists(PathBuf),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Relay bot configuration (operator settings)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub telegram: TelegramConfig,

    pub channel: ChannelConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub broadcast: BroadcastConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bot API connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token from @BotFather (or `RELAYBOT_BOT_TOKEN`)
    #[serde(default)]
    pub bot_token: Option<BotToken>,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Long-poll timeout for `getUpdates`
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Updates handled concurrently
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

/// Signal channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Numeric channel id (e.g. -1001234567890)
    pub id: i64,

    /// Public handle used in invite links, without '@'
    pub handle: String,

    /// Display name used in messages
    #[serde(default = "default_channel_name")]
    pub name: String,

    #[serde(default = "default_invite_base_url")]
    pub invite_base_url: String,

    /// Invite validity, humantime format ("24h", "3days")
    #[serde(default = "default_invite_ttl")]
    pub invite_ttl: String,
}

/// Operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub user_ids: Vec<i64>,

    /// Users per `/users` page
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Sends in flight per broadcast
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_poll_timeout_secs() -> u64 {
    DEFAULT_POLL_TIMEOUT_SECS
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

fn default_channel_name() -> String {
    "Signals".to_string()
}

fn default_invite_base_url() -> String {
    DEFAULT_INVITE_BASE_URL.to_string()
}

fn default_invite_ttl() -> String {
    DEFAULT_INVITE_TTL.to_string()
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            user_ids: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file, apply `RELAYBOT_BOT_TOKEN`, validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: RelayConfig = toml::from_str(&contents)?;
        config.override_token(std::env::var(TOKEN_ENV).ok());
        config.validate()?;

        Ok(config)
    }

    /// Replace the file's token with a non-empty override
    pub fn override_token(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.telegram.bot_token = Some(BotToken::new(token));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.telegram.bot_token {
            Some(token) if !token.is_empty() => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "telegram.bot_token is empty (set it in the file or via {TOKEN_ENV})"
                )))
            }
        }
        if self.channel.id == 0 {
            return Err(ConfigError::Invalid(
                "channel.id is not set (use the channel's numeric id, e.g. -1001234567890)"
                    .to_string(),
            ));
        }
        if self.channel.handle.trim_start_matches('@').is_empty() {
            return Err(ConfigError::Invalid("channel.handle is empty".to_string()));
        }
        if self.admin.page_size == 0 {
            return Err(ConfigError::Invalid("admin.page_size must be at least 1".to_string()));
        }
        if self.broadcast.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "broadcast.concurrency must be at least 1".to_string(),
            ));
        }
        if self.telegram.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "telegram.max_in_flight must be at least 1".to_string(),
            ));
        }
        self.invite_ttl()?;
        Ok(())
    }

    pub fn invite_ttl(&self) -> Result<Duration, ConfigError> {
        let ttl = humantime::parse_duration(&self.channel.invite_ttl).map_err(|e| {
            ConfigError::Invalid(format!(
                "channel.invite_ttl '{}': {e}",
                self.channel.invite_ttl
            ))
        })?;
        if ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "channel.invite_ttl must be longer than zero".to_string(),
            ));
        }
        Ok(ttl)
    }

    pub fn bot_token(&self) -> Result<BotToken, ConfigError> {
        self.telegram
            .bot_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConfigError::Invalid("telegram.bot_token is empty".to_string()))
    }

    /// Settings handed to the bot core
    pub fn bot_config(&self) -> Result<BotConfig, ConfigError> {
        Ok(BotConfig {
            channel: ChatId(self.channel.id),
            channel_name: self.channel.name.clone(),
            admins: self.admin.user_ids.iter().copied().map(UserId).collect(),
            page_size: self.admin.page_size,
            broadcast_concurrency: self.broadcast.concurrency,
            invite: InviteSettings {
                ttl: self.invite_ttl()?,
                base_url: self.channel.invite_base_url.clone(),
                channel_handle: self.channel.handle.trim_start_matches('@').to_string(),
            },
            poll_timeout_secs: self.telegram.poll_timeout_secs,
            max_in_flight: self.telegram.max_in_flight,
        })
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml(database_path: &Path) -> String {
        format!(
            r#"# relaybot configuration
#
# Only [telegram] and [channel] are required. The bot token can be left out
# here and supplied through the RELAYBOT_BOT_TOKEN environment variable.

[telegram]
# Token from @BotFather
bot_token = ""

# api_base = "{api_base}"
# Long-poll timeout in seconds
poll_timeout_secs = {poll_timeout}
# Updates handled concurrently
max_in_flight = {max_in_flight}

[channel]
# Numeric id of the signal channel (the bot must be an administrator there)
id = 0
# Public handle used in invite links, without '@'
handle = "my_signal_channel"
name = "Signals"
invite_base_url = "{invite_base_url}"
# How long an invite link stays valid ("24h", "3days", ...)
invite_ttl = "{invite_ttl}"

[admin]
# Telegram user ids allowed to use /admin, /stats, /users, /signal, /broadcast
user_ids = []
page_size = {page_size}

[broadcast]
# Messages in flight per broadcast
concurrency = {concurrency}

[storage]
database_path = "{database_path}"

[logging]
# Log level: trace, debug, info, warn, error (RUST_LOG takes precedence)
level = "info"

# Log file path (optional, logs to stderr if not specified)
# file = "/var/log/relaybot/relaybot.log"
"#,
            api_base = DEFAULT_API_BASE,
            poll_timeout = DEFAULT_POLL_TIMEOUT_SECS,
            max_in_flight = DEFAULT_MAX_IN_FLIGHT,
            invite_base_url = DEFAULT_INVITE_BASE_URL,
            invite_ttl = DEFAULT_INVITE_TTL,
            page_size = DEFAULT_PAGE_SIZE,
            concurrency = DEFAULT_CONCURRENCY,
            database_path = database_path.display()
        )
    }

    /// Write the commented default file. Refuses to overwrite unless `force`.
    pub fn create_default(
        config_path: &Path,
        database_path: &Path,
        force: bool,
    ) -> Result<(), ConfigError> {
        if config_path.exists() && !force {
            return Err(ConfigError::Exists(config_path.to_path_buf()));
        }

        let write_err = |source| ConfigError::Write {
            path: config_path.to_path_buf(),
            source,
        };

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(config_path, Self::generate_default_toml(database_path)).map_err(write_err)?;

        Ok(())
    }
}

/// Default config file: `~/.config/relaybot/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relaybot")
        .join("config.toml")
}

/// Default database: `~/.local/share/relaybot/relaybot.db`
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relaybot")
        .join("relaybot.db")
}
