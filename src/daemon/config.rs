//! Agent configuration. Read from `config.toml` in the application directory; every field is
//! optional and falls back to the defaults below.

use std::{io::ErrorKind, path::Path, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use chrono::FixedOffset;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{debug, info};

use super::{args::ConfigOverrides, gate::ShiftWindow, tracking::TrackingSettings};

pub const CONFIG_FILE: &str = "config.toml";

const DEFAULT_IGNORED_APPS: [&str; 6] = [
    "explorer.exe",
    "SearchApp.exe",
    "ShellExperienceHost.exe",
    "SystemSettings.exe",
    "TextInputHost.exe",
    "RuntimeBroker.exe",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Defaults to the host name.
    pub identity: Option<String>,
    pub endpoint_base_url: String,
    pub ignore_apps: Vec<String>,
    pub active_sample_interval_secs: u64,
    pub off_hours_interval_secs: u64,
    pub config_refresh_interval_secs: u64,
    pub min_report_threshold_secs: f64,
    pub request_timeout_secs: u64,
    pub location_timeout_secs: u64,
    pub catch_up_drain_interval_secs: u64,
    /// Offset of the timezone used for timestamps and shift hours.
    pub utc_offset_minutes: i32,
    pub default_shift: ShiftWindow,
    pub location_url: String,
    /// Skips the location lookup when set.
    pub location: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            identity: None,
            endpoint_base_url: "http://127.0.0.1:5000".into(),
            ignore_apps: DEFAULT_IGNORED_APPS.iter().map(|v| v.to_string()).collect(),
            active_sample_interval_secs: 5,
            off_hours_interval_secs: 60,
            config_refresh_interval_secs: 600,
            min_report_threshold_secs: 5.,
            request_timeout_secs: 5,
            location_timeout_secs: 3,
            catch_up_drain_interval_secs: 300,
            utc_offset_minutes: 5 * 60 + 30,
            default_shift: ShiftWindow::default(),
            location_url: "https://ipinfo.io/json".into(),
            location: None,
        }
    }
}

impl AgentConfig {
    /// Reads the configuration file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No configuration at {path:?}, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {path:?}")),
        };
        let config: Self =
            toml::from_str(&content).with_context(|| format!("Failed to parse {path:?}"))?;
        debug!("Loaded configuration {config:?}");
        Ok(config)
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(endpoint) = overrides.endpoint {
            self.endpoint_base_url = endpoint;
        }
        if let Some(identity) = overrides.identity {
            self.identity = Some(identity);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_shift.start_hour > 23 || self.default_shift.end_hour > 23 {
            bail!("default_shift hours must be within 0..=23");
        }
        if self.active_sample_interval_secs == 0
            || self.off_hours_interval_secs == 0
            || self.request_timeout_secs == 0
            || self.location_timeout_secs == 0
        {
            bail!("intervals and timeouts must be positive");
        }
        if !self.min_report_threshold_secs.is_finite() || self.min_report_threshold_secs < 0. {
            bail!("min_report_threshold_secs must be a non-negative number");
        }
        if matches!(&self.identity, Some(identity) if identity.trim().is_empty()) {
            bail!("identity can't be empty");
        }
        self.utc_offset()?;
        self.endpoint_url()?;
        self.location_url()?;
        Ok(())
    }

    pub fn identity(&self) -> Arc<str> {
        match &self.identity {
            Some(identity) => identity.as_str().into(),
            None => System::host_name()
                .unwrap_or_else(|| "unknown-host".to_string())
                .into(),
        }
    }

    pub fn endpoint_url(&self) -> Result<Url> {
        Url::parse(&self.endpoint_base_url)
            .with_context(|| format!("Invalid endpoint url {}", self.endpoint_base_url))
    }

    pub fn location_url(&self) -> Result<Url> {
        Url::parse(&self.location_url)
            .with_context(|| format!("Invalid location url {}", self.location_url))
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| anyhow!("utc_offset_minutes {} is out of range", self.utc_offset_minutes))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_secs(self.location_timeout_secs)
    }

    pub fn config_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.config_refresh_interval_secs)
    }

    pub fn tracking_settings(&self) -> Result<TrackingSettings> {
        Ok(TrackingSettings {
            identity: self.identity(),
            utc_offset: self.utc_offset()?,
            active_interval: Duration::from_secs(self.active_sample_interval_secs),
            off_hours_interval: Duration::from_secs(self.off_hours_interval_secs),
            catch_up_interval: Duration::from_secs(self.catch_up_drain_interval_secs),
            min_report: chrono::Duration::milliseconds(
                (self.min_report_threshold_secs * 1000.).round() as i64,
            ),
        })
    }
}
