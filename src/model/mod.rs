//! Per-target history window and the statistics derived from it.

mod history;
mod stats;

pub use history::*;
pub use stats::*;

use serde::Serializer;
use std::time::Duration;

/// Serialize a duration as fractional milliseconds.
pub fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64() * 1000.0)
}

/// Serialize an optional duration as fractional milliseconds or `null`.
pub fn serialize_opt_millis<S: Serializer>(
    value: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => serialize_millis(d, serializer),
        None => serializer.serialize_none(),
    }
}
