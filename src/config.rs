//! Runtime settings.
//!
//! Built once at startup from defaults, `PINGBOARD_*` environment variables
//! and command-line flags (in that order), validated, then shared read-only.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::model::{AlertBasis, AlertPolicy};

/// Upper bound on the history window, keeps per-target memory small.
pub const MAX_HISTORY_WINDOW: usize = 10_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a positive, finite number, got {value}")]
    NotPositive { name: &'static str, value: f64 },
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("cannot parse {var}={value:?}: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Immutable runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Time between the starts of two probes of one target (default: 1s)
    pub probe_interval: Duration,
    /// Per-probe timeout (default: 2s)
    pub probe_timeout: Duration,
    /// Outcomes kept per target (default: 50)
    pub history_window: usize,
    /// High-latency alert threshold (default: 200ms)
    pub latency_alert: Duration,
    /// High-loss alert threshold in percent (default: 20)
    pub loss_alert: f64,
    /// Latency figure compared against `latency_alert` (default: last)
    pub alert_basis: AlertBasis,
    /// Dashboard redraw cadence (default: 250ms)
    pub render_interval: Duration,
    /// How long shutdown waits for monitors before abandoning them (default: 2s)
    pub grace_period: Duration,
    /// Probes per target before the monitor stops; `None` runs forever
    pub count: Option<u64>,
    /// Colored dashboard output (default: true)
    pub color: bool,
    /// Log destination; stderr when unset
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(2),
            history_window: 50,
            latency_alert: Duration::from_millis(200),
            loss_alert: 20.0,
            alert_basis: AlertBasis::Last,
            render_interval: Duration::from_millis(250),
            grace_period: Duration::from_secs(2),
            count: None,
            color: true,
            log_file: None,
        }
    }
}

impl Settings {
    /// Defaults overridden by the process environment.
    ///
    /// Environment variables:
    /// - `PINGBOARD_INTERVAL`: seconds between probes
    /// - `PINGBOARD_TIMEOUT`: probe timeout in seconds
    /// - `PINGBOARD_HISTORY`: history window size
    /// - `PINGBOARD_LATENCY_ALERT_MS`: latency alert threshold in milliseconds
    /// - `PINGBOARD_LOSS_ALERT`: loss alert threshold in percent
    /// - `PINGBOARD_ALERT_BASIS`: `last` or `avg`
    /// - `PINGBOARD_REFRESH_MS`: dashboard refresh in milliseconds
    /// - `PINGBOARD_GRACE`: shutdown grace period in seconds
    /// - `PINGBOARD_LOG_FILE`: write logs to this file
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        settings.apply_env(|var| env::var(var).ok())?;
        Ok(settings)
    }

    /// Apply overrides from an environment lookup. Unlike unset variables,
    /// unparsable values are errors.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env_number(&lookup, "PINGBOARD_INTERVAL")? {
            self.probe_interval = secs("probe interval", v)?;
        }
        if let Some(v) = env_number(&lookup, "PINGBOARD_TIMEOUT")? {
            self.probe_timeout = secs("probe timeout", v)?;
        }
        if let Some(raw) = lookup("PINGBOARD_HISTORY") {
            self.history_window = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Env {
                    var: "PINGBOARD_HISTORY",
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(v) = env_number(&lookup, "PINGBOARD_LATENCY_ALERT_MS")? {
            self.latency_alert = millis("latency alert threshold", v)?;
        }
        if let Some(v) = env_number(&lookup, "PINGBOARD_LOSS_ALERT")? {
            self.loss_alert = v;
        }
        if let Some(raw) = lookup("PINGBOARD_ALERT_BASIS") {
            self.alert_basis = raw.parse().map_err(|reason| ConfigError::Env {
                var: "PINGBOARD_ALERT_BASIS",
                value: raw.clone(),
                reason,
            })?;
        }
        if let Some(v) = env_number(&lookup, "PINGBOARD_REFRESH_MS")? {
            self.render_interval = millis("refresh interval", v)?;
        }
        if let Some(v) = env_number(&lookup, "PINGBOARD_GRACE")? {
            self.grace_period = grace(v)?;
        }
        if let Some(path) = lookup("PINGBOARD_LOG_FILE").filter(|p| !p.trim().is_empty()) {
            self.log_file = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Reject settings no monitor can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("probe interval", self.probe_interval),
            ("probe timeout", self.probe_timeout),
            ("latency alert threshold", self.latency_alert),
            ("refresh interval", self.render_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::NotPositive { name, value: 0.0 });
            }
        }

        if self.history_window == 0 || self.history_window > MAX_HISTORY_WINDOW {
            return Err(ConfigError::Invalid {
                name: "history window",
                reason: format!(
                    "must be between 1 and {}, got {}",
                    MAX_HISTORY_WINDOW, self.history_window
                ),
            });
        }

        if !self.loss_alert.is_finite() || !(0.0..=100.0).contains(&self.loss_alert) {
            return Err(ConfigError::Invalid {
                name: "loss alert threshold",
                reason: format!("must be between 0 and 100 percent, got {}", self.loss_alert),
            });
        }

        if self.count == Some(0) {
            return Err(ConfigError::Invalid {
                name: "count",
                reason: "use no count to probe forever".to_string(),
            });
        }

        Ok(())
    }

    pub fn alert_policy(&self) -> AlertPolicy {
        AlertPolicy {
            latency_threshold: self.latency_alert,
            loss_threshold: self.loss_alert,
            basis: self.alert_basis,
        }
    }
}

fn env_number<F>(lookup: &F, var: &'static str) -> Result<Option<f64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|raw| {
            raw.trim().parse::<f64>().map_err(|e| ConfigError::Env {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Positive, finite seconds.
pub fn secs(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::NotPositive { name, value });
    }
    Duration::try_from_secs_f64(value).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

/// Positive, finite milliseconds.
pub fn millis(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::NotPositive { name, value });
    }
    secs(name, value / 1000.0)
}

/// Non-negative, finite seconds. A zero grace period abandons in-flight
/// probes immediately.
pub fn grace(value: f64) -> Result<Duration, ConfigError> {
    if value == 0.0 {
        return Ok(Duration::ZERO);
    }
    secs("grace period", value)
}
