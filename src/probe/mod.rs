//! Probe executor.
//!
//! A probe is one latency check against one target. Every failure mode of the
//! transport is folded into a [`ProbeOutcome`], so callers only ever see data.

mod ping;

pub use ping::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::model::serialize_millis;

/// Transport-level failures. Internal to the executor; converted into a
/// [`ProbeOutcome`] before leaving [`probe`].
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("name resolution failed: {0}")]
    Resolve(String),
    #[error("destination unreachable: {0}")]
    Unreachable(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// A monitored address or hostname, kept exactly as the caller supplied it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Target(Arc<str>);

impl Target {
    pub fn new(address: impl Into<Arc<str>>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The typed result of one probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeStatus {
    Success {
        #[serde(rename = "latency_ms", serialize_with = "serialize_millis")]
        latency: Duration,
    },
    Timeout,
    /// `cause` is for display and logging only.
    Unreachable { cause: String },
    Error { cause: String },
}

/// One probe result, stamped with the time the probe was issued.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: ProbeStatus,
}

impl ProbeOutcome {
    pub fn new(at: DateTime<Utc>, status: ProbeStatus) -> Self {
        Self { at, status }
    }

    pub fn success(latency: Duration) -> Self {
        Self::new(Utc::now(), ProbeStatus::Success { latency })
    }

    pub fn timeout() -> Self {
        Self::new(Utc::now(), ProbeStatus::Timeout)
    }

    pub fn unreachable(cause: impl Into<String>) -> Self {
        Self::new(Utc::now(), ProbeStatus::Unreachable { cause: cause.into() })
    }

    pub fn error(cause: impl Into<String>) -> Self {
        Self::new(Utc::now(), ProbeStatus::Error { cause: cause.into() })
    }

    /// Round-trip time, present only for successful probes.
    pub fn latency(&self) -> Option<Duration> {
        match self.status {
            ProbeStatus::Success { latency } => Some(latency),
            ProbeStatus::Timeout | ProbeStatus::Unreachable { .. } | ProbeStatus::Error { .. } => {
                None
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ProbeStatus::Success { .. })
    }

    /// Folds a transport result into an outcome stamped with `at`.
    pub fn from_result(at: DateTime<Utc>, result: Result<Duration, ProbeError>) -> Self {
        let status = match result {
            Ok(latency) => ProbeStatus::Success { latency },
            Err(ProbeError::Timeout(_)) => ProbeStatus::Timeout,
            Err(e @ (ProbeError::Resolve(_) | ProbeError::Unreachable(_))) => {
                ProbeStatus::Unreachable { cause: e.to_string() }
            }
            Err(e @ (ProbeError::Network(_) | ProbeError::Command(_))) => {
                ProbeStatus::Error { cause: e.to_string() }
            }
        };
        Self::new(at, status)
    }
}

/// Anything that can probe a target. Implementations must return within
/// `timeout` and must not fail outside of the returned outcome.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &Target, timeout: Duration) -> ProbeOutcome;
}

/// ICMP echo prober used by the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct PingProber;

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, target: &Target, timeout: Duration) -> ProbeOutcome {
        probe(target, timeout).await
    }
}

/// Ping `target` once. Never blocks longer than `timeout`.
pub async fn probe(target: &Target, timeout: Duration) -> ProbeOutcome {
    let at = Utc::now();
    let result = match tokio::time::timeout(timeout, run_ping_probe(target.as_str(), timeout)).await
    {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    };

    // Late replies count as timeouts.
    let result = result.and_then(|latency| {
        if latency >= timeout {
            Err(ProbeError::Timeout(timeout))
        } else {
            Ok(latency)
        }
    });

    if let Err(e) = &result {
        tracing::debug!(host = %target, error = %e, "probe failed");
    }

    ProbeOutcome::from_result(at, result)
}
