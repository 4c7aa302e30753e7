//! Daemon configuration
//!
//! Values are resolved in this order, later sources winning:
//! 1. Built-in defaults
//! 2. JSON config file (explicit path, or the first of `./config.json`,
//!    `./catboard.json`, `~/.config/catboard/config.json`)
//! 3. Environment variables

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ratelimit::RateLimiter;

/// Config filename in the catboard config directory
const CONFIG_FILE: &str = "config.json";

/// Date format for `backfill_start_date`
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Days of history a first sync covers when no backfill date is configured
const DEFAULT_BACKFILL_DAYS: i64 = 30;

/// Settings for the sync daemon and CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub username: String,
    pub password: String,
    pub database_path: PathBuf,
    /// Upstream requests per second
    pub rate_limit: f64,
    /// First day a never-synced tracker is fetched from (`YYYY-MM-DD`)
    pub backfill_start_date: Option<String>,
    pub sync_interval_minutes: u64,
    pub log_level: String,
    pub presence_email: Option<String>,
    pub presence_password: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            database_path: PathBuf::from("./catboard.db"),
            rate_limit: RateLimiter::DEFAULT_REQUESTS_PER_SECOND,
            backfill_start_date: None,
            sync_interval_minutes: 1440,
            log_level: "info".to_string(),
            presence_email: None,
            presence_password: None,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from `path` (or the default search locations),
    /// then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::find_config_file() {
                Some(found) => Self::from_file(&found)?,
                None => Self::default(),
            },
        };

        cfg.apply_env_with(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// Load configuration from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    }

    /// First existing config file among the default locations
    pub fn find_config_file() -> Option<PathBuf> {
        let mut candidates = vec![PathBuf::from("./config.json"), PathBuf::from("./catboard.json")];
        candidates.extend(config::config_path(CONFIG_FILE));
        config::first_existing(candidates)
    }

    /// Apply overrides read through `lookup`
    ///
    /// Numeric values that fail to parse are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WEENECT_USERNAME") {
            self.username = v;
        }
        if let Some(v) = lookup("WEENECT_PASSWORD") {
            self.password = v;
        }
        if let Some(v) = lookup("WEENECT_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("WEENECT_RATE_LIMIT") {
            match v.trim().parse() {
                Ok(rate) => self.rate_limit = rate,
                Err(_) => warn!("Ignoring invalid WEENECT_RATE_LIMIT {v:?}"),
            }
        }
        if let Some(v) = lookup("WEENECT_BACKFILL_START_DATE") {
            self.backfill_start_date = Some(v);
        }
        if let Some(v) = lookup("WEENECT_SYNC_INTERVAL_MINUTES") {
            match v.trim().parse() {
                Ok(minutes) => self.sync_interval_minutes = minutes,
                Err(_) => warn!("Ignoring invalid WEENECT_SYNC_INTERVAL_MINUTES {v:?}"),
            }
        }
        if let Some(v) = lookup("WEENECT_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("PRESENCE_EMAIL") {
            self.presence_email = Some(v);
        }
        if let Some(v) = lookup("PRESENCE_PASSWORD") {
            self.presence_password = Some(v);
        }
    }

    /// Reject configurations the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            bail!("username is required (set WEENECT_USERNAME or \"username\" in the config file)");
        }
        if self.password.is_empty() {
            bail!("password is required (set WEENECT_PASSWORD or \"password\" in the config file)");
        }
        if self.database_path.as_os_str().is_empty() {
            bail!("database_path must not be empty");
        }
        if !self.rate_limit.is_finite() || self.rate_limit <= 0.0 {
            bail!("rate_limit must be positive, got {}", self.rate_limit);
        }
        if let Some(date) = &self.backfill_start_date {
            NaiveDate::parse_from_str(date, DATE_FORMAT)
                .with_context(|| format!("backfill_start_date {date:?} is not YYYY-MM-DD"))?;
        }
        if self.sync_interval_minutes == 0 {
            bail!("sync_interval_minutes must be at least 1");
        }
        Ok(())
    }

    /// Start of history for trackers that have never synced, relative to `now`
    ///
    /// Midnight UTC of `backfill_start_date`, or of 30 days ago when unset.
    /// An unparseable date falls back to midnight yesterday.
    pub fn backfill_floor(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let day = match &self.backfill_start_date {
            None => today - TimeDelta::days(DEFAULT_BACKFILL_DAYS),
            Some(raw) => match NaiveDate::parse_from_str(raw, DATE_FORMAT) {
                Ok(date) => date,
                Err(_) => {
                    warn!("Invalid backfill_start_date {raw:?}, starting from yesterday");
                    today - TimeDelta::days(1)
                }
            },
        };
        day.and_time(NaiveTime::MIN).and_utc()
    }

    /// Log filter for the configured level, `info` when unrecognized
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.trim().to_ascii_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "warn" | "warning" => "warn",
            "error" => "error",
            _ => "info",
        }
    }

    /// Whether presence credentials are configured
    pub fn has_presence(&self) -> bool {
        self.presence_email.as_deref().is_some_and(|e| !e.is_empty())
            && self.presence_password.as_deref().is_some_and(|p| !p.is_empty())
    }
}
