//! Window statistics, alert flags and lifetime packet counters.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::{serialize_opt_millis, History};
use crate::probe::ProbeOutcome;

/// Aggregates over one history window.
///
/// Latency figures only consider successful probes and are `None` when the
/// window has no success at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    #[serde(rename = "last_ms", serialize_with = "serialize_opt_millis")]
    pub last: Option<Duration>,
    #[serde(rename = "min_ms", serialize_with = "serialize_opt_millis")]
    pub min: Option<Duration>,
    #[serde(rename = "max_ms", serialize_with = "serialize_opt_millis")]
    pub max: Option<Duration>,
    #[serde(rename = "avg_ms", serialize_with = "serialize_opt_millis")]
    pub avg: Option<Duration>,
    #[serde(rename = "median_ms", serialize_with = "serialize_opt_millis")]
    pub median: Option<Duration>,
    /// Failed outcomes over all outcomes in the window, in percent.
    /// `None` for an empty window.
    pub loss_percent: Option<f64>,
    pub samples: usize,
}

impl Statistics {
    pub fn from_history(history: &History) -> Self {
        let samples = history.len();
        let loss_percent = (samples > 0)
            .then(|| history.failures() as f64 * 100.0 / samples as f64);

        let mut latencies: Vec<Duration> = history.latencies().collect();
        let last = latencies.last().copied();
        if latencies.is_empty() {
            return Self {
                loss_percent,
                samples,
                ..Self::default()
            };
        }

        let total: Duration = latencies.iter().sum();
        let avg = total / latencies.len() as u32;

        latencies.sort_unstable();
        let mid = latencies.len() / 2;
        let median = if latencies.len() % 2 == 0 {
            (latencies[mid - 1] + latencies[mid]) / 2
        } else {
            latencies[mid]
        };

        Self {
            last,
            min: latencies.first().copied(),
            max: latencies.last().copied(),
            avg: Some(avg),
            median: Some(median),
            loss_percent,
            samples,
        }
    }
}

/// Which latency figure the high-latency alert compares against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertBasis {
    /// Most recent successful probe.
    #[default]
    Last,
    /// Window average.
    Avg,
}

impl FromStr for AlertBasis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last" => Ok(Self::Last),
            "avg" | "average" => Ok(Self::Avg),
            other => Err(format!("unknown alert basis '{}' (expected last or avg)", other)),
        }
    }
}

impl fmt::Display for AlertBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Last => f.write_str("last"),
            Self::Avg => f.write_str("avg"),
        }
    }
}

/// Alert thresholds. Both comparisons are strict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertPolicy {
    pub latency_threshold: Duration,
    pub loss_threshold: f64,
    pub basis: AlertBasis,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertState {
    pub high_latency: bool,
    pub high_loss: bool,
}

impl AlertState {
    pub fn evaluate(stats: &Statistics, policy: &AlertPolicy) -> Self {
        let latency = match policy.basis {
            AlertBasis::Last => stats.last,
            AlertBasis::Avg => stats.avg,
        };

        Self {
            high_latency: latency.is_some_and(|l| l > policy.latency_threshold),
            high_loss: stats.loss_percent.is_some_and(|l| l > policy.loss_threshold),
        }
    }

    pub fn any(&self) -> bool {
        self.high_latency || self.high_loss
    }
}

/// Packet counters since the monitor started, independent of the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PacketTotals {
    pub sent: u64,
    pub received: u64,
    pub lost: u64,
}

impl PacketTotals {
    pub fn record(&mut self, outcome: &ProbeOutcome) {
        self.sent += 1;
        if outcome.is_success() {
            self.received += 1;
        } else {
            self.lost += 1;
        }
    }
}
