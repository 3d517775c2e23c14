//! Scheduler module: owns one monitor per target and aggregates their views.

mod monitor;
mod snapshot;

pub use monitor::*;
pub use snapshot::*;

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::Settings;
use crate::probe::{Prober, Target};

/// Receiving side of the process-wide shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested or the sender is gone.
    pub async fn triggered(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

/// Create a shutdown flag; sending `true` stops every holder of the signal.
pub fn shutdown_channel() -> (watch::Sender<bool>, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (tx, ShutdownSignal { rx })
}

/// Read side of every monitor's published view.
#[derive(Clone)]
pub struct Aggregator {
    views: Arc<[watch::Receiver<Arc<TargetView>>]>,
}

impl Aggregator {
    /// Current view of every target. Each target's view is swapped in whole
    /// by its monitor, so no target is ever observed half-updated; reading
    /// never waits on a probe.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(
            self.views
                .iter()
                .map(|view| view.borrow().clone())
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

/// Outcome of [`Scheduler::shutdown`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: Vec<Target>,
    /// Monitors still running when the grace period ran out. Their tasks are
    /// aborted and any late probe result is dropped.
    pub abandoned: Vec<Target>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

/// Owns the monitors for a fixed set of targets.
pub struct Scheduler {
    settings: Arc<Settings>,
    targets: Vec<Target>,
    aggregator: Aggregator,
    shutdown_tx: watch::Sender<bool>,
    monitors: JoinSet<MonitorExit>,
    exited: Vec<MonitorExit>,
}

impl Scheduler {
    /// Spawn one monitor per target. Must be called inside a tokio runtime.
    pub fn start(targets: Vec<Target>, prober: Arc<dyn Prober>, settings: Arc<Settings>) -> Self {
        let (shutdown_tx, shutdown) = shutdown_channel();
        let mut monitors = JoinSet::new();
        let mut views = Vec::with_capacity(targets.len());

        tracing::info!(
            targets = targets.len(),
            interval = ?settings.probe_interval,
            timeout = ?settings.probe_timeout,
            window = settings.history_window,
            "starting scheduler"
        );

        for target in &targets {
            let (monitor, view) =
                TargetMonitor::new(target.clone(), Arc::clone(&prober), Arc::clone(&settings));
            let span = tracing::info_span!("monitor", host = %target);
            monitors.spawn(monitor.run(shutdown.clone()).instrument(span));
            views.push(view);
        }

        Self {
            settings,
            targets,
            aggregator: Aggregator {
                views: views.into(),
            },
            shutdown_tx,
            monitors,
            exited: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.aggregator.snapshot()
    }

    /// A cloneable handle for snapshot readers such as the dashboard.
    pub fn aggregator(&self) -> Aggregator {
        self.aggregator.clone()
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Resolves when every monitor has stopped on its own, which only happens
    /// with a probe count. Never resolves without monitors.
    pub async fn finished(&mut self) {
        if self.targets.is_empty() {
            std::future::pending::<()>().await;
        }
        while let Some(joined) = self.monitors.join_next().await {
            self.collect(joined);
        }
    }

    /// Stop every monitor, waiting at most the grace period.
    pub async fn shutdown(mut self) -> ShutdownReport {
        self.shutdown_tx.send_replace(true);
        let grace = self.settings.grace_period;

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.monitors.join_next().await {
                self.collect(joined);
            }
        })
        .await;

        if drained.is_err() {
            self.monitors.abort_all();
        }

        let stopped: Vec<Target> = self.exited.iter().map(|exit| exit.target.clone()).collect();
        let done: HashSet<&Target> = stopped.iter().collect();
        let abandoned: Vec<Target> = self
            .targets
            .iter()
            .filter(|target| !done.contains(target))
            .cloned()
            .collect();

        for target in &abandoned {
            tracing::warn!(host = %target, ?grace, "monitor did not stop within grace period, abandoned");
        }
        tracing::info!(
            stopped = stopped.len(),
            abandoned = abandoned.len(),
            "scheduler stopped"
        );

        ShutdownReport { stopped, abandoned }
    }

    fn collect(&mut self, joined: Result<MonitorExit, tokio::task::JoinError>) {
        match joined {
            Ok(exit) => {
                tracing::debug!(host = %exit.target, reason = ?exit.reason, probes = exit.probes, "monitor exited");
                self.exited.push(exit);
            }
            Err(e) => tracing::error!("monitor task failed: {}", e),
        }
    }
}
