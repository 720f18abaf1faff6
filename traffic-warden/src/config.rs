//! Configuration loaded from environment variables
//!
//! Handles:
//! - Chat credentials and target channel
//! - Provider credentials (comma-separated)
//! - Thresholds, report options and refresh interval
//! - Startup behavior and pointer location

use crate::error::{Result, WardenError};
use crate::provider::ProviderCredential;
use crate::reconciler::StartupPolicy;
use crate::report::ComposerOptions;
use crate::usage::{ByteUnit, Thresholds};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone)]
pub struct WardenConfig {
    pub chat_token: String,
    pub channel_id: String,
    pub seed_message_id: Option<String>,
    pub credentials: Vec<ProviderCredential>,
    pub thresholds: Thresholds,
    pub always_send: bool,
    pub obfuscate_names: bool,
    pub per_server_messages: bool,
    pub refresh_interval: Duration,
    pub startup: StartupPolicy,
    pub state_file: PathBuf,
    pub unit: ByteUnit,
    pub http_timeout: Duration,
}

impl fmt::Debug for WardenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WardenConfig")
            .field("channel_id", &self.channel_id)
            .field("seed_message_id", &self.seed_message_id)
            .field("credentials", &self.credentials)
            .field("thresholds", &self.thresholds)
            .field("always_send", &self.always_send)
            .field("obfuscate_names", &self.obfuscate_names)
            .field("per_server_messages", &self.per_server_messages)
            .field("refresh_interval", &self.refresh_interval)
            .field("startup", &self.startup)
            .field("state_file", &self.state_file)
            .field("unit", &self.unit)
            .field("http_timeout", &self.http_timeout)
            .finish_non_exhaustive()
    }
}

pub const DEFAULT_NOTIFY_THRESHOLD: f64 = 50.0;
pub const DEFAULT_KILL_THRESHOLD: f64 = 90.0;
pub const DEFAULT_REFRESH_MINUTES: u64 = 10;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STATE_FILE: &str = "./data/message.json";

impl WardenConfig {
    /// Reads the process environment, after loading `.env` if present
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let chat_token = get("DISCORD_TOKEN").ok_or_else(|| missing("DISCORD_TOKEN"))?;
        let channel_id = get("CHANNEL_ID").ok_or_else(|| missing("CHANNEL_ID"))?;

        let tokens = get("HETZNER_API_TOKENS")
            .or_else(|| get("HETZNER_API_TOKEN"))
            .ok_or_else(|| missing("HETZNER_API_TOKENS"))?;
        let credentials = parse_credentials(&tokens);
        if credentials.is_empty() {
            return Err(WardenError::Config("HETZNER_API_TOKENS contains no token".into()));
        }

        let notify = parse_or("NOTIFY_THRESHOLD", get("NOTIFY_THRESHOLD"), DEFAULT_NOTIFY_THRESHOLD)?;
        let kill = parse_or("KILL_THRESHOLD", get("KILL_THRESHOLD"), DEFAULT_KILL_THRESHOLD)?;
        let thresholds = Thresholds::new(notify, kill)?;

        let refresh_minutes: u64 = parse_or("REFRESH_INTERVAL", get("REFRESH_INTERVAL"), DEFAULT_REFRESH_MINUTES)?;
        if refresh_minutes == 0 {
            return Err(WardenError::Config("REFRESH_INTERVAL must be at least 1 minute".into()));
        }
        let refresh_secs = refresh_minutes
            .checked_mul(60)
            .ok_or_else(|| WardenError::Config(format!("REFRESH_INTERVAL: {refresh_minutes} minutes is out of range")))?;

        let timeout_secs: u64 = parse_or("HTTP_TIMEOUT_SECS", get("HTTP_TIMEOUT_SECS"), DEFAULT_HTTP_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(WardenError::Config("HTTP_TIMEOUT_SECS must be positive".into()));
        }

        let unit = match get("TRAFFIC_UNIT") {
            Some(raw) => ByteUnit::parse(&raw)
                .ok_or_else(|| WardenError::Config(format!("TRAFFIC_UNIT: unknown unit '{raw}' (expected auto or tb)")))?,
            None => ByteUnit::Auto,
        };

        Ok(Self {
            chat_token,
            channel_id,
            seed_message_id: get("MESSAGE_ID"),
            credentials,
            thresholds,
            always_send: parse_flag("ALWAYS_SEND", get("ALWAYS_SEND"), false)?,
            obfuscate_names: parse_flag("OBFUSCATE_NAMES", get("OBFUSCATE_NAMES"), false)?,
            per_server_messages: parse_flag("PER_SERVER_MESSAGES", get("PER_SERVER_MESSAGES"), false)?,
            refresh_interval: Duration::from_secs(refresh_secs),
            startup: StartupPolicy {
                clear_history: parse_flag("CLEAR_HISTORY", get("CLEAR_HISTORY"), true)?,
                reuse_pointer: parse_flag("REUSE_MESSAGE", get("REUSE_MESSAGE"), true)?,
            },
            state_file: get("STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
            unit,
            http_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn composer_options(&self) -> ComposerOptions {
        ComposerOptions {
            always_send: self.always_send,
            obfuscate_names: self.obfuscate_names,
            per_server: self.per_server_messages,
            unit: self.unit,
            thresholds: self.thresholds,
        }
    }
}

fn missing(key: &str) -> WardenError {
    WardenError::Config(format!("{key} is required"))
}

pub fn parse_credentials(raw: &str) -> Vec<ProviderCredential> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ProviderCredential::new)
        .collect()
}

fn parse_or<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(value) => value
            .parse()
            .map_err(|_| WardenError::Config(format!("{key}: invalid value '{value}'"))),
        None => Ok(default),
    }
}

fn parse_flag(key: &str, raw: Option<String>, default: bool) -> Result<bool> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(WardenError::Config(format!("{key}: expected a boolean, got '{other}'"))),
    }
}
