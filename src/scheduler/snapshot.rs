//! Read-only views handed from monitors to consumers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::model::{AlertState, History, PacketTotals, Statistics};
use crate::probe::Target;

/// Everything a monitor publishes about its target after an update.
/// Replaced as a whole, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetView {
    pub target: Target,
    pub history: History,
    pub stats: Statistics,
    pub alerts: AlertState,
    pub totals: PacketTotals,
}

impl TargetView {
    /// View of a target that has not been probed yet.
    pub fn empty(target: Target, window: usize) -> Self {
        Self {
            target,
            history: History::new(window),
            stats: Statistics::default(),
            alerts: AlertState::default(),
            totals: PacketTotals::default(),
        }
    }
}

/// Per-target views of every monitored target, in startup order. Each view is
/// internally consistent; views of different targets may be a few probes
/// apart.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub targets: Vec<Arc<TargetView>>,
}

impl Snapshot {
    pub fn new(targets: Vec<Arc<TargetView>>) -> Self {
        Self {
            taken_at: Utc::now(),
            targets,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, target: &Target) -> Option<&TargetView> {
        self.targets
            .iter()
            .find(|view| &view.target == target)
            .map(Arc::as_ref)
    }

    /// Number of targets with at least one alert raised.
    pub fn alerting(&self) -> usize {
        self.targets.iter().filter(|view| view.alerts.any()).count()
    }
}
