//! Configuration data model.
//!
//! All structs derive `Serialize`/`Deserialize` for TOML persistence.
//! Every field has a default so the client runs without a config file.

use serde::{Deserialize, Serialize};

use super::nickname::generate_nickname;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The server to connect to and how to introduce ourselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_nickname")]
    pub nickname: String,
    /// Free-form text sent as the real name in `USER`.
    #[serde(default = "default_userinfo")]
    pub userinfo: String,
    /// Channels joined right after registration.
    #[serde(default)]
    pub channels: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            nickname: default_nickname(),
            userinfo: default_userinfo(),
            channels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default = "default_quit_message")]
    pub quit_message: String,
    /// Seconds between keepalive pings; 0 disables them.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// How long a keepalive ping may go unanswered before we give up.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            quit_message: default_quit_message(),
            keepalive_secs: default_keepalive(),
            ping_timeout_secs: default_ping_timeout(),
            timestamp_format: default_timestamp_format(),
        }
    }
}

/// Diagnostic logging (written to stderr).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of `error`, `warn`, `info`, `debug`, `trace`.
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

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    6667
}
fn default_nickname() -> String {
    generate_nickname()
}
fn default_userinfo() -> String {
    "ircline user".to_string()
}
fn default_quit_message() -> String {
    "Leaving".to_string()
}
fn default_keepalive() -> u64 {
    60
}
fn default_ping_timeout() -> u64 {
    30
}
fn default_timestamp_format() -> String {
    "%H:%M".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
