//! Live terminal dashboard.
//!
//! The render loop only ever calls [`Aggregator::snapshot`], so a slow or
//! stuck target can delay its own row but never a redraw.

mod canvas;
mod render;
mod terminal;

pub use canvas::*;
pub use render::*;
pub use terminal::*;

use std::io::{self, Write};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

use crate::config::Settings;
use crate::scheduler::{Aggregator, ShutdownSignal};

/// Where frames go and how wide they may be.
pub trait Surface {
    fn width(&self) -> usize;
    fn draw(&mut self, canvas: &Canvas) -> io::Result<()>;
}

impl Surface for Terminal {
    fn width(&self) -> usize {
        Terminal::width(self)
    }

    fn draw(&mut self, canvas: &Canvas) -> io::Result<()> {
        Terminal::draw(self, canvas)
    }
}

/// Redraw every `render_interval` until shutdown. Returns the surface so the
/// caller decides when the screen is restored.
pub async fn run_dashboard<S: Surface>(
    aggregator: Aggregator,
    settings: Arc<Settings>,
    mut shutdown: ShutdownSignal,
    mut surface: S,
) -> io::Result<S> {
    let renderer = Renderer::new(&settings);
    let mut ticker = tokio::time::interval(settings.render_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::debug!(refresh = ?settings.render_interval, "dashboard started");
    let mut frames: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.triggered() => break,
            _ = ticker.tick() => {
                let snapshot = aggregator.snapshot();
                let canvas = renderer.frame(&snapshot, surface.width());
                surface.draw(&canvas)?;
                frames += 1;
            }
        }
    }

    tracing::debug!(frames, "dashboard stopped");
    Ok(surface)
}

/// Write the exit report of the last snapshot to `out`.
pub fn write_summary<W: Write>(
    out: &mut W,
    aggregator: &Aggregator,
    settings: &Settings,
    json: bool,
) -> io::Result<()> {
    let snapshot = aggregator.snapshot();
    if json {
        serde_json::to_writer_pretty(&mut *out, &snapshot)?;
        writeln!(out)?;
    } else {
        let width = crossterm::terminal::size()
            .map(|(cols, _)| cols as usize)
            .unwrap_or(FALLBACK_WIDTH);
        write!(out, "{}", Renderer::new(settings).summary(&snapshot, width))?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeOutcome, Prober, Target};
    use crate::scheduler::{shutdown_channel, Scheduler};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Collects frames in memory instead of drawing them.
    #[derive(Debug, Default)]
    struct Recorder {
        width: usize,
        frames: Vec<Canvas>,
    }

    impl Surface for Recorder {
        fn width(&self) -> usize {
            self.width
        }

        fn draw(&mut self, canvas: &Canvas) -> io::Result<()> {
            self.frames.push(canvas.clone());
            Ok(())
        }
    }

    struct Instant5ms;

    #[async_trait]
    impl Prober for Instant5ms {
        async fn probe(&self, _target: &Target, _timeout: Duration) -> ProbeOutcome {
            ProbeOutcome::success(Duration::from_millis(5))
        }
    }

    /// Never answers within the timeout.
    struct Silent;

    #[async_trait]
    impl Prober for Silent {
        async fn probe(&self, _target: &Target, timeout: Duration) -> ProbeOutcome {
            tokio::time::sleep(timeout).await;
            ProbeOutcome::timeout()
        }
    }

    fn settings() -> Arc<Settings> {
        Arc::new(Settings {
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(30),
            render_interval: Duration::from_millis(250),
            grace_period: Duration::from_millis(500),
            ..Settings::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_renders_on_its_own_cadence() {
        let settings = settings();
        let scheduler = Scheduler::start(
            vec![Target::new("fast")],
            Arc::new(Instant5ms),
            Arc::clone(&settings),
        );
        let (stop_tx, stop) = shutdown_channel();
        let dashboard = tokio::spawn(run_dashboard(
            scheduler.aggregator(),
            Arc::clone(&settings),
            stop,
            Recorder {
                width: 120,
                ..Recorder::default()
            },
        ));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        stop_tx.send_replace(true);
        let recorder = dashboard.await.unwrap().unwrap();

        // Ticks at 0, 250, 500, 750, 1000ms; probes only at 0 and 1000ms.
        assert_eq!(recorder.frames.len(), 5);
        let last = recorder.frames.last().unwrap().to_text();
        assert!(last.contains("fast"));
        assert!(last.contains("5.0ms"));

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_target_does_not_stall_redraws() {
        let settings = settings();
        let scheduler = Scheduler::start(
            vec![Target::new("silent")],
            Arc::new(Silent),
            Arc::clone(&settings),
        );
        let (stop_tx, stop) = shutdown_channel();
        let dashboard = tokio::spawn(run_dashboard(
            scheduler.aggregator(),
            Arc::clone(&settings),
            stop,
            Recorder {
                width: 120,
                ..Recorder::default()
            },
        ));

        tokio::time::sleep(Duration::from_millis(2100)).await;
        stop_tx.send_replace(true);
        let recorder = dashboard.await.unwrap().unwrap();

        assert_eq!(recorder.frames.len(), 9);
        assert!(recorder.frames.iter().all(|f| f.to_text().contains("silent")));

        let report = scheduler.shutdown().await;
        assert_eq!(report.stopped.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_dashboard_until_shutdown() {
        let settings = settings();
        let scheduler = Scheduler::start(Vec::new(), Arc::new(Instant5ms), Arc::clone(&settings));
        let (stop_tx, stop) = shutdown_channel();
        let dashboard = tokio::spawn(run_dashboard(
            scheduler.aggregator(),
            settings,
            stop,
            Recorder {
                width: 80,
                ..Recorder::default()
            },
        ));

        tokio::time::sleep(Duration::from_millis(600)).await;
        stop_tx.send_replace(true);
        let recorder = dashboard.await.unwrap().unwrap();

        assert!(!recorder.frames.is_empty());
        assert!(recorder.frames[0].to_text().contains("No targets configured."));
        assert!(scheduler.shutdown().await.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_json() {
        let settings = settings();
        let scheduler = Scheduler::start(
            vec![Target::new("fast")],
            Arc::new(Instant5ms),
            Arc::clone(&settings),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut out = Vec::new();
        write_summary(&mut out, &scheduler.aggregator(), &settings, true).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["targets"][0]["target"], "fast");
        assert_eq!(json["targets"][0]["stats"]["last_ms"], 5.0);
        assert_eq!(json["targets"][0]["totals"]["sent"], 1);

        let mut out = Vec::new();
        write_summary(&mut out, &scheduler.aggregator(), &settings, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("pingboard summary"));
        assert!(text.contains("fast"));

        scheduler.shutdown().await;
    }
}
