//! # Process configuration
//!
//! [`Settings`] gathers every tunable of an ingestion process. Values come from three layers,
//! later ones winning:
//!
//! 1. the defaults below,
//! 2. a JSON document ([`Settings::from_json`], missing keys keep their default),
//! 3. `BHULAN_*` environment variables ([`Settings::from_env`] / [`Settings::apply_env`]).
//!
//! | variable                        | field                   | default     |
//! |---------------------------------|-------------------------|-------------|
//! | `BHULAN_DB_PATH`                | `db_path`               | `bhulan.db` |
//! | `BHULAN_MAX_BATCH_SIZE`         | `max_batch_size`        | `1000`      |
//! | `BHULAN_MAX_INFLIGHT_JOBS`      | `max_inflight_jobs`     | `10`        |
//! | `BHULAN_LOG_LEVEL`              | `log_level`             | `info`      |
//! | `BHULAN_LOG_FORMAT`             | `log_format`            | `json`      |
//! | `BHULAN_STORE_BUSY_TIMEOUT_MS`  | `store_busy_timeout_ms` | `5000`      |
//! | `BHULAN_DEFAULT_VENDOR`         | `default_vendor`        | `generic`   |
//! | `BHULAN_SMOOTHING_METHOD`       | `smoother.method`       | `kalman`    |
//!
//! Every construction path ends with [`Settings::validate`].
use std::str::FromStr;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::bhulan_errors::BhulanError;
use crate::logging::LogFormat;
use crate::smoothing::{SmootherConfig, SmoothingMethod};

/// Prefix of the environment variables read by [`Settings::from_env`].
pub const ENV_PREFIX: &str = "BHULAN_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: Utf8PathBuf,
    pub max_batch_size: usize,
    pub max_inflight_jobs: usize,
    pub log_level: String,
    pub log_format: LogFormat,
    pub store_busy_timeout_ms: u64,
    pub default_vendor: String,
    pub smoother: SmootherConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: Utf8PathBuf::from("bhulan.db"),
            max_batch_size: 1000,
            max_inflight_jobs: 10,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            store_busy_timeout_ms: 5000,
            default_vendor: "generic".to_string(),
            smoother: SmootherConfig::default(),
        }
    }
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder {
            settings: Settings::default(),
        }
    }

    pub fn store_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.store_busy_timeout_ms)
    }

    /// Validation rules
    /// -----------------
    /// * `max_batch_size ≥ 1`, `max_inflight_jobs ≥ 1`
    /// * `log_level` is one of `trace`, `debug`, `info`, `warn`, `error` (any case)
    /// * `default_vendor` is not blank
    /// * `smoother` passes [`SmootherConfig::validate`]
    pub fn validate(&self) -> Result<(), BhulanError> {
        if self.max_batch_size == 0 {
            return Err(BhulanError::InvalidSettings(
                "max_batch_size must be >= 1".into(),
            ));
        }
        if self.max_inflight_jobs == 0 {
            return Err(BhulanError::InvalidSettings(
                "max_inflight_jobs must be >= 1".into(),
            ));
        }
        if tracing::Level::from_str(self.log_level.trim()).is_err() {
            return Err(BhulanError::InvalidSettings(format!(
                "invalid log_level: {}",
                self.log_level
            )));
        }
        if self.default_vendor.trim().is_empty() {
            return Err(BhulanError::InvalidSettings(
                "default_vendor must not be empty".into(),
            ));
        }
        self.smoother.validate()?;
        Ok(())
    }

    /// Parse a JSON settings document; absent keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, BhulanError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, BhulanError> {
        let mut settings = Settings::default();
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Override fields from `lookup`, which resolves a full variable name (`BHULAN_...`).
    ///
    /// Taking the lookup as a closure keeps tests independent of the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), BhulanError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("DB_PATH") {
            self.db_path = Utf8PathBuf::from(v);
        }
        if let Some(v) = var("MAX_BATCH_SIZE") {
            self.max_batch_size = parse_var("MAX_BATCH_SIZE", &v)?;
        }
        if let Some(v) = var("MAX_INFLIGHT_JOBS") {
            self.max_inflight_jobs = parse_var("MAX_INFLIGHT_JOBS", &v)?;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v.trim().to_ascii_lowercase();
        }
        if let Some(v) = var("LOG_FORMAT") {
            self.log_format = v.parse()?;
        }
        if let Some(v) = var("STORE_BUSY_TIMEOUT_MS") {
            self.store_busy_timeout_ms = parse_var("STORE_BUSY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("DEFAULT_VENDOR") {
            self.default_vendor = v.trim().to_string();
        }
        if let Some(v) = var("SMOOTHING_METHOD") {
            self.smoother.method = v.parse::<SmoothingMethod>()?;
        }
        self.validate()
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T, BhulanError> {
    value.trim().parse().map_err(|_| {
        BhulanError::InvalidSettings(format!("{ENV_PREFIX}{name}: cannot parse {value:?}"))
    })
}

#[derive(Debug, Clone)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn db_path(mut self, v: impl Into<Utf8PathBuf>) -> Self {
        self.settings.db_path = v.into();
        self
    }
    pub fn max_batch_size(mut self, v: usize) -> Self {
        self.settings.max_batch_size = v;
        self
    }
    pub fn max_inflight_jobs(mut self, v: usize) -> Self {
        self.settings.max_inflight_jobs = v;
        self
    }
    pub fn log_level(mut self, v: impl Into<String>) -> Self {
        self.settings.log_level = v.into();
        self
    }
    pub fn log_format(mut self, v: LogFormat) -> Self {
        self.settings.log_format = v;
        self
    }
    pub fn store_busy_timeout_ms(mut self, v: u64) -> Self {
        self.settings.store_busy_timeout_ms = v;
        self
    }
    pub fn default_vendor(mut self, v: impl Into<String>) -> Self {
        self.settings.default_vendor = v.into();
        self
    }
    pub fn smoother(mut self, v: SmootherConfig) -> Self {
        self.settings.smoother = v;
        self
    }

    pub fn build(self) -> Result<Settings, BhulanError> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}
