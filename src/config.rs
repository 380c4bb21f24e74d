//! Process configuration from environment variables.
//!
//! Numeric settings fall back to their defaults when missing or unparsable.
//! Mode switches must name a known value.

use std::path::PathBuf;
use std::time::Duration;

use crate::dispatch::{DispatchConfig, PendingPolicy};
use crate::error::ConfigError;
use crate::model::Boundary;
use crate::reservation::{AdmissionMode, UpdatePolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Journal appends between compactions.
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
    pub admission: AdmissionMode,
    pub update_policy: UpdatePolicy,
    pub boundary: Boundary,
    pub dispatch: DispatchConfig,
    /// `None` logs emails instead of sending them.
    pub smtp: Option<SmtpConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            sweep_interval: Duration::from_secs(60),
            admission: AdmissionMode::default(),
            update_policy: UpdatePolicy::default(),
            boundary: Boundary::default(),
            dispatch: DispatchConfig::default(),
            smtp: None,
        }
    }
}

const DEFAULT_SMTP_PORT: u16 = 2525;
const DEFAULT_SMTP_FROM: &str = "fleetbook <noreply@fleetbook.local>";

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let number = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let data_dir = lookup("FLEETBOOK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let metrics_port = lookup("FLEETBOOK_METRICS_PORT").and_then(|s| s.trim().parse().ok());
        let compact_threshold = number("FLEETBOOK_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold);
        let sweep_interval = number("FLEETBOOK_SWEEP_INTERVAL_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);

        let admission = match lookup("FLEETBOOK_ADMISSION_MODE") {
            None => defaults.admission,
            Some(v) => choice(
                "FLEETBOOK_ADMISSION_MODE",
                &v,
                &[
                    ("check_then_insert", AdmissionMode::CheckThenInsert),
                    ("exclusive", AdmissionMode::Exclusive),
                ],
            )?,
        };
        let update_policy = match lookup("FLEETBOOK_UPDATE_POLICY") {
            None => defaults.update_policy,
            Some(v) => choice(
                "FLEETBOOK_UPDATE_POLICY",
                &v,
                &[
                    ("overwrite", UpdatePolicy::Overwrite),
                    ("revalidate", UpdatePolicy::Revalidate),
                ],
            )?,
        };
        let boundary = match lookup("FLEETBOOK_BOUNDARY") {
            None => defaults.boundary,
            Some(v) => choice(
                "FLEETBOOK_BOUNDARY",
                &v,
                &[("half_open", Boundary::HalfOpen), ("closed", Boundary::Closed)],
            )?,
        };

        let budget = number("FLEETBOOK_EMAIL_BUDGET_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.dispatch.budget);
        let on_timeout = match lookup("FLEETBOOK_EMAIL_ON_TIMEOUT") {
            None => defaults.dispatch.on_timeout,
            Some(v) => choice(
                "FLEETBOOK_EMAIL_ON_TIMEOUT",
                &v,
                &[("detach", PendingPolicy::Detach), ("abort", PendingPolicy::Abort)],
            )?,
        };

        let smtp = match lookup("MAILTRAP_HOST").filter(|h| !h.trim().is_empty()) {
            None => None,
            Some(host) => Some(SmtpConfig {
                host,
                port: lookup("MAILTRAP_PORT")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(DEFAULT_SMTP_PORT),
                username: lookup("MAILTRAP_USERNAME")
                    .ok_or(ConfigError::MissingSmtpSetting("MAILTRAP_USERNAME"))?,
                password: lookup("MAILTRAP_PASSWORD")
                    .ok_or(ConfigError::MissingSmtpSetting("MAILTRAP_PASSWORD"))?,
                from: lookup("MAILTRAP_FROM").unwrap_or_else(|| DEFAULT_SMTP_FROM.to_string()),
            }),
        };

        Ok(Config {
            data_dir,
            metrics_port,
            compact_threshold,
            sweep_interval,
            admission,
            update_policy,
            boundary,
            dispatch: DispatchConfig { budget, on_timeout },
            smtp,
        })
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("fleetbook.journal")
    }
}

fn choice<T: Copy>(var: &'static str, value: &str, options: &[(&str, T)]) -> Result<T, ConfigError> {
    let wanted = value.trim().to_ascii_lowercase().replace('-', "_");
    options
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, v)| *v)
        .ok_or_else(|| ConfigError::UnknownChoice {
            var,
            value: value.to_string(),
            expected: match var {
                "FLEETBOOK_ADMISSION_MODE" => "check_then_insert, exclusive",
                "FLEETBOOK_UPDATE_POLICY" => "overwrite, revalidate",
                "FLEETBOOK_BOUNDARY" => "half_open, closed",
                _ => "detach, abort",
            },
        })
}
