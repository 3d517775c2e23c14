//! One monitor per target: probe, record, publish, wait for the next slot.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use super::{ShutdownSignal, TargetView};
use crate::config::Settings;
use crate::model::{AlertPolicy, AlertState, History, PacketTotals, Statistics};
use crate::probe::{ProbeOutcome, Prober, Target};

/// Lifecycle of a monitor. `Idle -> Probing -> Updating -> Idle` until
/// cancelled or the probe count is exhausted, then `Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Idle,
    Probing,
    Updating,
    Stopping,
    Stopped,
}

/// Why a monitor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    /// The configured probe count was reached.
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorExit {
    pub target: Target,
    pub reason: StopReason,
    pub probes: u64,
}

/// Probe start times anchored to `anchor + k * interval`.
///
/// A cycle that overruns its slot delays the next cycle, which then starts as
/// soon as the previous one ends; the one after that is back on the grid.
#[derive(Debug, Clone)]
pub(crate) struct Cadence {
    anchor: Instant,
    interval: Duration,
}

impl Cadence {
    pub(crate) fn new(anchor: Instant, interval: Duration) -> Self {
        Self { anchor, interval }
    }

    /// Deadline of the cycle after one that started at `started`: the first
    /// grid slot strictly after it.
    pub(crate) fn next_after(&self, started: Instant) -> Instant {
        let step = self.interval.as_nanos().max(1);
        let elapsed = started.saturating_duration_since(self.anchor).as_nanos();
        let slot = elapsed / step + 1;
        let offset = u64::try_from(slot * step).unwrap_or(u64::MAX);
        self.anchor + Duration::from_nanos(offset)
    }
}

pub struct TargetMonitor {
    target: Target,
    prober: Arc<dyn Prober>,
    settings: Arc<Settings>,
    policy: AlertPolicy,
    history: History,
    totals: PacketTotals,
    publisher: watch::Sender<Arc<TargetView>>,
    phase: MonitorPhase,
}

impl TargetMonitor {
    /// Create a monitor and the receiving end of its published view.
    pub fn new(
        target: Target,
        prober: Arc<dyn Prober>,
        settings: Arc<Settings>,
    ) -> (Self, watch::Receiver<Arc<TargetView>>) {
        let (publisher, view) = watch::channel(Arc::new(TargetView::empty(
            target.clone(),
            settings.history_window,
        )));

        let monitor = Self {
            policy: settings.alert_policy(),
            history: History::new(settings.history_window),
            totals: PacketTotals::default(),
            target,
            prober,
            settings,
            publisher,
            phase: MonitorPhase::Idle,
        };
        (monitor, view)
    }

    /// Probe until cancelled or until the probe count is reached.
    ///
    /// Cancellation is observed at cycle boundaries, during the inter-cycle
    /// wait and while a probe is in flight. An in-flight probe is dropped and
    /// its outcome, should one arrive, is never published.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> MonitorExit {
        let cadence = Cadence::new(Instant::now(), self.settings.probe_interval);
        let timeout = self.settings.probe_timeout;
        let mut probes: u64 = 0;

        tracing::debug!(host = %self.target, "monitor started");

        let reason = loop {
            if shutdown.is_triggered() {
                break StopReason::Cancelled;
            }
            if self.settings.count.is_some_and(|limit| probes >= limit) {
                break StopReason::Completed;
            }

            let started = Instant::now();
            self.transition(MonitorPhase::Probing);

            let prober = Arc::clone(&self.prober);
            let outcome = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    tracing::debug!(host = %self.target, "abandoning in-flight probe");
                    break StopReason::Cancelled;
                }
                outcome = prober.probe(&self.target, timeout) => outcome,
            };

            if shutdown.is_triggered() {
                tracing::debug!(host = %self.target, "discarding probe outcome after shutdown");
                break StopReason::Cancelled;
            }

            self.transition(MonitorPhase::Updating);
            self.record(outcome);
            probes += 1;

            self.transition(MonitorPhase::Idle);
            if self.settings.count.is_some_and(|limit| probes >= limit) {
                break StopReason::Completed;
            }

            let next = cadence.next_after(started);
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break StopReason::Cancelled,
                _ = tokio::time::sleep_until(next) => {}
            }
        };

        self.transition(MonitorPhase::Stopping);
        self.transition(MonitorPhase::Stopped);
        tracing::debug!(host = %self.target, probes, ?reason, "monitor stopped");

        MonitorExit {
            target: self.target,
            reason,
            probes,
        }
    }

    fn transition(&mut self, next: MonitorPhase) {
        tracing::trace!(host = %self.target, from = ?self.phase, to = ?next, "monitor phase");
        self.phase = next;
    }

    /// Fold one outcome into history, statistics and alerts, then publish
    /// the new view in a single swap.
    fn record(&mut self, outcome: ProbeOutcome) {
        match outcome.latency() {
            Some(latency) => tracing::debug!(host = %self.target, ?latency, "probe succeeded"),
            None => tracing::debug!(host = %self.target, status = ?outcome.status, "probe failed"),
        }

        self.totals.record(&outcome);
        self.history.push(outcome);

        let stats = Statistics::from_history(&self.history);
        let alerts = AlertState::evaluate(&stats, &self.policy);
        self.log_alert_changes(&alerts, &stats);

        self.publisher.send_replace(Arc::new(TargetView {
            target: self.target.clone(),
            history: self.history.clone(),
            stats,
            alerts,
            totals: self.totals,
        }));
    }

    fn log_alert_changes(&self, alerts: &AlertState, stats: &Statistics) {
        let previous = self.publisher.borrow().alerts;

        if alerts.high_latency != previous.high_latency {
            if alerts.high_latency {
                tracing::info!(
                    host = %self.target,
                    basis = %self.policy.basis,
                    threshold = ?self.policy.latency_threshold,
                    last = ?stats.last,
                    avg = ?stats.avg,
                    "high latency"
                );
            } else {
                tracing::info!(host = %self.target, "latency back under threshold");
            }
        }

        if alerts.high_loss != previous.high_loss {
            if alerts.high_loss {
                tracing::info!(
                    host = %self.target,
                    loss = ?stats.loss_percent,
                    threshold = self.policy.loss_threshold,
                    "high packet loss"
                );
            } else {
                tracing::info!(host = %self.target, "packet loss back under threshold");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::shutdown_channel;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted latencies; `None` means the probe times out after
    /// the full timeout. Records start times and concurrent probe counts.
    struct ScriptedProber {
        script: Mutex<Vec<(Duration, Option<Duration>)>>,
        starts: Mutex<Vec<Instant>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedProber {
        fn new(script: Vec<(Duration, Option<Duration>)>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().rev().collect()),
                starts: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }

        fn starts(&self) -> Vec<Instant> {
            self.starts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, _target: &Target, timeout: Duration) -> ProbeOutcome {
            self.starts.lock().unwrap().push(Instant::now());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let step = self
                .script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or((Duration::from_millis(10), Some(Duration::from_millis(10))));
            let (delay, latency) = step;
            tokio::time::sleep(delay.min(timeout)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match latency {
                Some(latency) => ProbeOutcome::success(latency),
                None => ProbeOutcome::timeout(),
            }
        }
    }

    fn settings(count: Option<u64>) -> Arc<Settings> {
        Arc::new(Settings {
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(2),
            history_window: 5,
            count,
            ..Settings::default()
        })
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_cadence_on_grid() {
        let anchor = Instant::now();
        let cadence = Cadence::new(anchor, Duration::from_secs(1));
        assert_eq!(cadence.next_after(anchor), anchor + Duration::from_secs(1));
        assert_eq!(
            cadence.next_after(anchor + ms(3000)),
            anchor + Duration::from_secs(4)
        );
        assert_eq!(
            cadence.next_after(anchor + ms(3001)),
            anchor + Duration::from_secs(4)
        );
    }

    #[test]
    fn test_cadence_realigns_after_overrun() {
        let anchor = Instant::now();
        let cadence = Cadence::new(anchor, Duration::from_secs(1));
        // A late cycle for slot 4 starting at 4.5s is followed by slot 5.
        assert_eq!(
            cadence.next_after(anchor + ms(4500)),
            anchor + Duration::from_secs(5)
        );
        // Several slots overrun: still only one interval ahead.
        assert_eq!(
            cadence.next_after(anchor + ms(7250)),
            anchor + Duration::from_secs(8)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_does_not_overlap_or_drift() {
        let mut script = vec![(ms(10), Some(ms(10))); 10];
        script[3] = (ms(1500), Some(ms(1500)));
        let prober = ScriptedProber::new(script);
        let (_tx, shutdown) = shutdown_channel();

        let (monitor, _view) =
            TargetMonitor::new(Target::new("10.0.0.1"), prober.clone(), settings(Some(10)));
        let anchor = Instant::now();
        let exit = monitor.run(shutdown).await;

        assert_eq!(exit.reason, StopReason::Completed);
        assert_eq!(exit.probes, 10);
        assert_eq!(prober.max_in_flight.load(Ordering::SeqCst), 1);

        let offsets: Vec<u128> = prober
            .starts()
            .iter()
            .map(|t| t.duration_since(anchor).as_millis())
            .collect();
        assert_eq!(
            offsets,
            vec![0, 1000, 2000, 3000, 4500, 5000, 6000, 7000, 8000, 9000]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_publishes_consistent_view() {
        let prober = ScriptedProber::new(vec![
            (ms(50), Some(ms(50))),
            (ms(60), Some(ms(60))),
            (ms(2000), None),
            (ms(40), Some(ms(40))),
        ]);
        let (_tx, shutdown) = shutdown_channel();
        let (monitor, view) =
            TargetMonitor::new(Target::new("example.net"), prober, settings(Some(4)));

        monitor.run(shutdown).await;

        let view = view.borrow().clone();
        assert_eq!(view.history.len(), 4);
        assert_eq!(view.stats.min, Some(ms(40)));
        assert_eq!(view.stats.max, Some(ms(60)));
        assert_eq!(view.stats.avg, Some(ms(50)));
        assert_eq!(view.stats.median, Some(ms(50)));
        assert_eq!(view.stats.last, Some(ms(40)));
        assert_eq!(view.stats.loss_percent, Some(25.0));
        assert_eq!(view.totals.sent, 4);
        assert_eq!(view.totals.lost, 1);
        assert!(view.alerts.high_loss);
        assert!(!view.alerts.high_latency);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_stays_bounded() {
        let prober = ScriptedProber::new(Vec::new());
        let (_tx, shutdown) = shutdown_channel();
        let (monitor, view) =
            TargetMonitor::new(Target::new("10.0.0.2"), prober, settings(Some(12)));

        monitor.run(shutdown).await;

        let view = view.borrow().clone();
        assert_eq!(view.history.len(), 5);
        assert_eq!(view.totals.sent, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_in_flight_probe() {
        let prober = ScriptedProber::new(vec![(ms(10), Some(ms(10))), (ms(1900), Some(ms(5)))]);
        let (tx, shutdown) = shutdown_channel();
        let (monitor, view) =
            TargetMonitor::new(Target::new("10.0.0.3"), prober.clone(), settings(None));

        let handle = tokio::spawn(monitor.run(shutdown));

        // Second probe starts at 1s and would finish at 2.9s.
        tokio::time::sleep(ms(1500)).await;
        assert_eq!(view.borrow().totals.sent, 1);
        tx.send_replace(true);

        let exit = handle.await.unwrap();
        assert_eq!(exit.reason, StopReason::Cancelled);
        assert_eq!(exit.probes, 1);

        tokio::time::sleep(ms(3000)).await;
        assert_eq!(view.borrow().totals.sent, 1);
        assert_eq!(prober.starts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start() {
        let prober = ScriptedProber::new(Vec::new());
        let (tx, shutdown) = shutdown_channel();
        tx.send_replace(true);

        let (monitor, _view) = TargetMonitor::new(Target::new("10.0.0.4"), prober.clone(), settings(None));
        let exit = monitor.run(shutdown).await;

        assert_eq!(exit.reason, StopReason::Cancelled);
        assert_eq!(exit.probes, 0);
        assert!(prober.starts().is_empty());
    }
}
