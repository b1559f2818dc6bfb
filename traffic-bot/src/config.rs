//! Typed bot configuration loaded from TOML, with environment overrides.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::period::{Bindings, PeriodOverride, PeriodOverrides};
use crate::query::{BytesExpression, DEFAULT_BOUNDARY};
use crate::timezone::DisplayZone;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    pub clickhouse: ClickHouseConfig,
    /// Zone used for users who never set one: `UTC+5`, `+05:30` or
    /// `Asia/Almaty`.
    pub display_timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub allowed_chat_ids: Vec<i64>,
    pub user_timezones_file: PathBuf,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            allowed_chat_ids: Vec::new(),
            user_timezones_file: PathBuf::from("data/user_timezones.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClickHouseConfig {
    pub url: String,
    pub boundary_filter: String,
    pub bytes_expression: Option<String>,
    pub timeout_sec: u64,

    pub table_1h: Option<String>,
    pub interval_sec_1h: Option<i64>,
    pub lookback_sec_1h: Option<i64>,
    pub table_6h: Option<String>,
    pub interval_sec_6h: Option<i64>,
    pub lookback_sec_6h: Option<i64>,
    pub table_24h: Option<String>,
    pub interval_sec_24h: Option<i64>,
    pub lookback_sec_24h: Option<i64>,
    pub table_7d: Option<String>,
    pub interval_sec_7d: Option<i64>,
    pub lookback_sec_7d: Option<i64>,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8123".to_owned(),
            boundary_filter: DEFAULT_BOUNDARY.to_owned(),
            bytes_expression: None,
            timeout_sec: 120,
            table_1h: None,
            interval_sec_1h: None,
            lookback_sec_1h: None,
            table_6h: None,
            interval_sec_6h: None,
            lookback_sec_6h: None,
            table_24h: None,
            interval_sec_24h: None,
            lookback_sec_24h: None,
            table_7d: None,
            interval_sec_7d: None,
            lookback_sec_7d: None,
        }
    }
}

impl ClickHouseConfig {
    pub fn period_overrides(&self) -> PeriodOverrides {
        PeriodOverrides {
            one_hour: PeriodOverride {
                table: self.table_1h.clone(),
                interval_sec: self.interval_sec_1h,
                lookback_sec: self.lookback_sec_1h,
            },
            six_hours: PeriodOverride {
                table: self.table_6h.clone(),
                interval_sec: self.interval_sec_6h,
                lookback_sec: self.lookback_sec_6h,
            },
            day: PeriodOverride {
                table: self.table_24h.clone(),
                interval_sec: self.interval_sec_24h,
                lookback_sec: self.lookback_sec_24h,
            },
            week: PeriodOverride {
                table: self.table_7d.clone(),
                interval_sec: self.interval_sec_7d,
                lookback_sec: self.lookback_sec_7d,
            },
        }
    }
}

/// The parts of the configuration that must be valid before serving.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub bindings: Bindings,
    pub bytes: BytesExpression,
    pub default_zone: DisplayZone,
}

impl AppConfig {
    /// Read the config file. A missing file yields defaults; the token check
    /// later decides whether that is enough to run.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Apply `TELEGRAM_BOT_TOKEN`, `TELEGRAM_ALLOWED_CHAT_IDS`, `CLICKHOUSE_URL`
    /// and `DISPLAY_TIMEZONE` on top of the file values.
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(token) = var("TELEGRAM_BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.telegram.bot_token = Some(token);
        }

        if let Some(ids) = var("TELEGRAM_ALLOWED_CHAT_IDS") {
            let parsed: Result<Vec<i64>, _> = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse::<i64>)
                .collect();
            match parsed {
                Ok(ids) => self.telegram.allowed_chat_ids = ids,
                Err(e) => warn!("Ignoring TELEGRAM_ALLOWED_CHAT_IDS={ids:?}: {e}"),
            }
        }

        if let Some(url) = var("CLICKHOUSE_URL").filter(|u| !u.trim().is_empty()) {
            self.clickhouse.url = url.trim().trim_end_matches('/').to_owned();
        }

        if let Some(tz) = var("DISPLAY_TIMEZONE").filter(|t| !t.trim().is_empty()) {
            self.display_timezone = Some(tz.trim().to_owned());
        }
    }

    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let bindings = Bindings::resolve_all(&self.clickhouse.period_overrides())?;
        let bytes = BytesExpression::parse(self.clickhouse.bytes_expression.as_deref())?;
        let default_zone = match &self.display_timezone {
            Some(tz) => {
                DisplayZone::parse(tz).map_err(|_| ConfigError::DisplayTimezone(tz.clone()))?
            }
            None => DisplayZone::default(),
        };

        info!(
            "Config OK: {} allowed chats, data source {}, default timezone {}",
            self.telegram.allowed_chat_ids.len(),
            self.clickhouse.url,
            default_zone.label()
        );

        Ok(ValidatedConfig {
            bindings,
            bytes,
            default_zone,
        })
    }
}
