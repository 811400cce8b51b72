//! LeadPulse configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LeadPulseError, Result};

/// Environment variable that overrides `telegram.bot_token`.
pub const TELEGRAM_TOKEN_ENV: &str = "LEADPULSE_TELEGRAM_TOKEN";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LeadPulseConfig {
    #[serde(default)]
    pub telegram: TelegramSettings,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub format: FormatConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl LeadPulseConfig {
    /// Load config from the default path (~/.leadpulse/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LeadPulseError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| LeadPulseError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.reminder_interval_secs == 0 {
            return Err(LeadPulseError::Config(
                "scheduler.reminder_interval_secs must be positive".into(),
            ));
        }
        if self.scheduler.send_timeout_secs == 0 {
            return Err(LeadPulseError::Config(
                "scheduler.send_timeout_secs must be positive".into(),
            ));
        }
        if self.scheduler.digest_catch_up_secs < self.scheduler.reminder_interval_secs {
            return Err(LeadPulseError::Config(
                "scheduler.digest_catch_up_secs must cover at least one reminder_interval_secs".into(),
            ));
        }
        if self.format.max_field_len == 0 {
            return Err(LeadPulseError::Config("format.max_field_len must be positive".into()));
        }
        Ok(())
    }

    /// Bot token from the environment, falling back to the config file.
    pub fn telegram_token(&self) -> Option<String> {
        std::env::var(TELEGRAM_TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| Some(self.telegram.bot_token.clone()).filter(|t| !t.is_empty()))
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the LeadPulse home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".leadpulse")
    }
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramSettings {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String { "https://api.telegram.org".into() }

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_api_base(),
        }
    }
}

/// Scan cadence and delivery limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_reminder_interval")]
    pub reminder_interval_secs: u64,
    /// Cron expression (MIN HOUR * * DOW) for the daily digest, evaluated in
    /// each tenant's local time.
    #[serde(default = "default_digest_cron")]
    pub digest_cron: String,
    /// How late a tick may still pick up a scheduled digest. Must be at least
    /// one tick long or a digest time can fall between two ticks.
    #[serde(default = "default_digest_catch_up")]
    pub digest_catch_up_secs: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    /// Tenants processed concurrently within one pass.
    #[serde(default = "default_tenant_concurrency")]
    pub tenant_concurrency: usize,
}

fn default_reminder_interval() -> u64 { 300 }
fn default_digest_cron() -> String { "0 9 * * *".into() }
fn default_digest_catch_up() -> u64 { 3600 }
fn default_send_timeout() -> u64 { 5 }
fn default_tenant_concurrency() -> usize { 4 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reminder_interval_secs: default_reminder_interval(),
            digest_cron: default_digest_cron(),
            digest_catch_up_secs: default_digest_catch_up(),
            send_timeout_secs: default_send_timeout(),
            tenant_concurrency: default_tenant_concurrency(),
        }
    }
}

/// Message rendering options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatConfig {
    /// Link appended to lead messages.
    #[serde(default)]
    pub crm_url: Option<String>,
    /// Free-text fields longer than this are cut and marked with `…`.
    #[serde(default = "default_max_field_len")]
    pub max_field_len: usize,
}

fn default_max_field_len() -> usize { 200 }

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            crm_url: None,
            max_field_len: default_max_field_len(),
        }
    }
}

/// Storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String { "~/.leadpulse/leadpulse.db".into() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}
