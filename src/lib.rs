//! Concurrent multi-target ping monitor.
//!
//! Every target gets its own monitor task that probes on a fixed cadence and
//! publishes an immutable view after each probe. A [`scheduler::Scheduler`]
//! owns the monitors, and the dashboard reads point-in-time
//! [`scheduler::Snapshot`]s without ever waiting on a probe.

pub mod cli;
pub mod config;
pub mod dashboard;
pub mod logging;
pub mod model;
pub mod probe;
pub mod runtime;
pub mod scheduler;
