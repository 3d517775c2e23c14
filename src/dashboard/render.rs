//! Turns a [`Snapshot`] into dashboard lines.
//!
//! Rendering only reads already-published views and never fails: missing
//! figures become [`PLACEHOLDER`], an empty snapshot becomes an empty table.
//!
//! The latency graph is scaled per target and per redraw to the min/max of
//! the current window, so the same glyph can mean different latencies over
//! time. It shows the trend of one target, not an absolute axis.

use chrono::Local;
use std::time::Duration;

use super::canvas::{Canvas, Line, Tone};
use crate::config::Settings;
use crate::model::{AlertBasis, AlertState};
use crate::probe::{ProbeOutcome, ProbeStatus};
use crate::scheduler::{Snapshot, TargetView};

/// Shown wherever a figure is undefined.
pub const PLACEHOLDER: &str = "—";

/// Graph ramp, lowest latency first.
pub const LEVELS: [char; 9] = ['_', '.', '-', '=', '+', '*', '#', '%', '@'];
pub const TIMEOUT_GLYPH: char = 'x';
pub const UNREACHABLE_GLYPH: char = 'X';
pub const ERROR_GLYPH: char = '?';

const GOOD_LATENCY: Duration = Duration::from_millis(50);
const FAIR_LATENCY: Duration = Duration::from_millis(100);
const GOOD_LOSS: f64 = 5.0;
const FAIR_LOSS: f64 = 20.0;

const MIN_TARGET_WIDTH: usize = 15;
const MAX_TARGET_WIDTH: usize = 40;
const CELL: usize = 10;
const LOSS_CELL: usize = 8;
const ALERT_CELL: usize = 10;

/// Draws dashboard frames and the exit summary.
#[derive(Debug, Clone)]
pub struct Renderer {
    interval: Duration,
    timeout: Duration,
    window: usize,
    latency_alert: Duration,
    loss_alert: f64,
    basis: AlertBasis,
}

impl Renderer {
    pub fn new(settings: &Settings) -> Self {
        Self {
            interval: settings.probe_interval,
            timeout: settings.probe_timeout,
            window: settings.history_window,
            latency_alert: settings.latency_alert,
            loss_alert: settings.loss_alert,
            basis: settings.alert_basis,
        }
    }

    /// One full dashboard frame, `width` characters wide.
    pub fn frame(&self, snapshot: &Snapshot, width: usize) -> Canvas {
        let mut canvas = Canvas::new(width);
        self.header(snapshot, &mut canvas);
        self.stats_table(snapshot, &mut canvas, true);
        self.alert_lines(snapshot, &mut canvas);
        self.packet_table(snapshot, &mut canvas);
        self.footer(&mut canvas);
        canvas
    }

    /// Plain-text report of the last snapshot, printed after the dashboard
    /// has been torn down.
    pub fn summary(&self, snapshot: &Snapshot, width: usize) -> String {
        let mut canvas = Canvas::new(width);
        canvas.push(Line::plain(format!(
            "pingboard summary at {}",
            snapshot.taken_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        )));
        canvas.rule('=', Tone::Muted);
        self.stats_table(snapshot, &mut canvas, false);
        self.alert_lines(snapshot, &mut canvas);
        self.packet_table(snapshot, &mut canvas);
        canvas.to_text()
    }

    fn header(&self, snapshot: &Snapshot, canvas: &mut Canvas) {
        let title = "PINGBOARD - multi-target ping monitor";
        let clock = snapshot
            .taken_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let gap = canvas
            .width()
            .saturating_sub(title.len() + clock.len())
            .max(2);

        canvas.push(
            Line::new()
                .with(title, Tone::Title)
                .with(" ".repeat(gap), Tone::Plain)
                .with(clock, Tone::Accent),
        );

        let alerting = snapshot.alerting();
        let mut status = Line::new().with(
            format!("{} target(s), ", snapshot.len()),
            Tone::Muted,
        );
        if alerting > 0 {
            status.push(format!("{} alerting", alerting), Tone::Bad);
        } else {
            status.push("no alerts", Tone::Good);
        }
        canvas.push(status);
        canvas.rule('=', Tone::Muted);
    }

    fn stats_table(&self, snapshot: &Snapshot, canvas: &mut Canvas, graph: bool) {
        let target_width = target_width(snapshot);
        let fixed = target_width + 5 * CELL + LOSS_CELL + 2 + ALERT_CELL + 1;
        let graph_width = if graph {
            canvas.width().saturating_sub(fixed).min(self.window)
        } else {
            0
        };

        let mut heading = format!(
            "{:<tw$}{:>c$}{:>c$}{:>c$}{:>c$}{:>c$}{:>l$}  {:<a$}",
            "TARGET",
            "LAST",
            "MIN",
            "AVG",
            "MAX",
            "MEDIAN",
            "LOSS",
            "ALERT",
            tw = target_width,
            c = CELL,
            l = LOSS_CELL,
            a = ALERT_CELL,
        );
        if graph_width > 0 {
            heading.push_str(" GRAPH");
        }
        canvas.push(Line::new().with(heading, Tone::Title));
        canvas.rule('-', Tone::Muted);

        if snapshot.is_empty() {
            canvas.push(Line::new().with("No targets configured.", Tone::Muted));
        }

        for view in &snapshot.targets {
            canvas.push(self.stats_row(view, target_width, graph_width));
        }
        canvas.blank();
    }

    fn stats_row(&self, view: &TargetView, target_width: usize, graph_width: usize) -> Line {
        let stats = &view.stats;
        let mut line = Line::new().with(
            format!("{:<w$}", clip(view.target.as_str(), target_width - 1), w = target_width),
            Tone::Plain,
        );

        let (last, last_tone) = last_cell(view.history.latest());
        line.push(format!("{:>w$}", last, w = CELL), last_tone);

        for value in [stats.min, stats.avg, stats.max, stats.median] {
            let (text, tone) = latency_cell(value);
            line.push(format!("{:>w$}", text, w = CELL), tone);
        }

        let (loss, tone) = match stats.loss_percent {
            Some(p) => (format!("{:.1}%", p), loss_tone(p)),
            None => (PLACEHOLDER.to_string(), Tone::Muted),
        };
        line.push(format!("{:>w$}", loss, w = LOSS_CELL), tone);
        line.push("  ", Tone::Plain);
        line.push(
            format!("{:<w$}", alert_marker(&view.alerts), w = ALERT_CELL),
            Tone::Bad,
        );

        if graph_width > 0 {
            line.push(" ", Tone::Plain);
            graph_spans(view, graph_width, &mut line);
        }
        line
    }

    fn alert_lines(&self, snapshot: &Snapshot, canvas: &mut Canvas) {
        if snapshot.alerting() == 0 {
            return;
        }

        canvas.push(Line::new().with("ALERTS", Tone::Title));
        for view in snapshot.targets.iter().filter(|v| v.alerts.any()) {
            if view.alerts.high_latency {
                let figure = match self.basis {
                    AlertBasis::Last => view.stats.last,
                    AlertBasis::Avg => view.stats.avg,
                };
                canvas.push(Line::new().with(
                    format!(
                        "! {}: high latency ({} {} > {})",
                        view.target,
                        self.basis,
                        figure.map(format_latency).unwrap_or_else(|| PLACEHOLDER.into()),
                        format_latency(self.latency_alert),
                    ),
                    Tone::Bad,
                ));
            }
            if view.alerts.high_loss {
                canvas.push(Line::new().with(
                    format!(
                        "! {}: high packet loss ({:.1}% > {}%)",
                        view.target,
                        view.stats.loss_percent.unwrap_or_default(),
                        self.loss_alert,
                    ),
                    Tone::Bad,
                ));
            }
        }
        canvas.blank();
    }

    fn packet_table(&self, snapshot: &Snapshot, canvas: &mut Canvas) {
        let target_width = target_width(snapshot);
        canvas.push(Line::new().with("PACKET STATISTICS (since start)", Tone::Title));
        canvas.push(Line::new().with(
            format!(
                "{:<tw$}{:>c$}{:>c$}{:>c$}{:>l$}",
                "TARGET",
                "SENT",
                "RECEIVED",
                "LOST",
                "LOSS",
                tw = target_width,
                c = CELL,
                l = LOSS_CELL,
            ),
            Tone::Title,
        ));
        canvas.rule('-', Tone::Muted);

        for view in &snapshot.targets {
            let totals = view.totals;
            let mut line = Line::new().with(
                format!(
                    "{:<tw$}{:>c$}{:>c$}",
                    clip(view.target.as_str(), target_width - 1),
                    totals.sent,
                    totals.received,
                    tw = target_width,
                    c = CELL,
                ),
                Tone::Plain,
            );
            let lost_tone = if totals.lost > 0 { Tone::Bad } else { Tone::Plain };
            line.push(format!("{:>c$}", totals.lost, c = CELL), lost_tone);

            let (loss, tone) = if totals.sent == 0 {
                (PLACEHOLDER.to_string(), Tone::Muted)
            } else {
                let p = totals.lost as f64 * 100.0 / totals.sent as f64;
                (format!("{:.1}%", p), loss_tone(p))
            };
            line.push(format!("{:>l$}", loss, l = LOSS_CELL), tone);
            canvas.push(line);
        }
        canvas.rule('=', Tone::Muted);
    }

    fn footer(&self, canvas: &mut Canvas) {
        canvas.push(Line::new().with(
            format!(
                "Interval {:.1}s | timeout {:.1}s | window {} | alert: latency ({}) > {}, loss > {}%",
                self.interval.as_secs_f64(),
                self.timeout.as_secs_f64(),
                self.window,
                self.basis,
                format_latency(self.latency_alert),
                self.loss_alert,
            ),
            Tone::Muted,
        ));
        canvas.push(Line::new().with(
            format!(
                "Graph: {} fast .. {} slow (scaled to each window), {} timeout, {} unreachable, {} error",
                LEVELS[0],
                LEVELS[LEVELS.len() - 1],
                TIMEOUT_GLYPH,
                UNREACHABLE_GLYPH,
                ERROR_GLYPH,
            ),
            Tone::Muted,
        ));
        canvas.push(Line::new().with("Ctrl+C to exit", Tone::Accent));
    }
}

pub fn format_latency(latency: Duration) -> String {
    format!("{:.1}ms", latency.as_secs_f64() * 1000.0)
}

pub fn latency_tone(latency: Duration) -> Tone {
    if latency < GOOD_LATENCY {
        Tone::Good
    } else if latency < FAIR_LATENCY {
        Tone::Warn
    } else {
        Tone::Bad
    }
}

pub fn loss_tone(percent: f64) -> Tone {
    if percent < GOOD_LOSS {
        Tone::Good
    } else if percent < FAIR_LOSS {
        Tone::Warn
    } else {
        Tone::Bad
    }
}

pub fn alert_marker(alerts: &AlertState) -> &'static str {
    match (alerts.high_latency, alerts.high_loss) {
        (true, true) => "!LAT !LOSS",
        (true, false) => "!LAT",
        (false, true) => "!LOSS",
        (false, false) => "",
    }
}

/// Ramp level of `latency` within `[min, max]`; a flat window sits mid-ramp.
pub fn graph_level(latency: Duration, min: Duration, max: Duration) -> usize {
    let top = LEVELS.len() - 1;
    if max <= min {
        return LEVELS.len() / 2;
    }
    let offset = latency.saturating_sub(min).as_secs_f64();
    let span = (max - min).as_secs_f64();
    ((offset / span * top as f64).round() as usize).min(top)
}

pub fn graph_glyph(outcome: &ProbeOutcome, min: Duration, max: Duration) -> char {
    match outcome.status {
        ProbeStatus::Success { latency } => LEVELS[graph_level(latency, min, max)],
        ProbeStatus::Timeout => TIMEOUT_GLYPH,
        ProbeStatus::Unreachable { .. } => UNREACHABLE_GLYPH,
        ProbeStatus::Error { .. } => ERROR_GLYPH,
    }
}

/// The last `width` outcomes as glyphs, newest on the right, left-padded.
pub fn latency_graph(view: &TargetView, width: usize) -> String {
    let mut line = Line::new();
    graph_spans(view, width, &mut line);
    line.text()
}

fn graph_spans(view: &TargetView, width: usize, line: &mut Line) {
    let shown = view.history.len().min(width);
    line.push(" ".repeat(width - shown), Tone::Plain);

    // Scale to the whole window, not just the visible part.
    let min = view.stats.min.unwrap_or_default();
    let max = view.stats.max.unwrap_or_default();
    for outcome in view.history.iter().skip(view.history.len() - shown) {
        let tone = match outcome.latency() {
            Some(latency) => latency_tone(latency),
            None => Tone::Bad,
        };
        line.push(graph_glyph(outcome, min, max).to_string(), tone);
    }
}

fn last_cell(latest: Option<&ProbeOutcome>) -> (String, Tone) {
    match latest.map(|o| &o.status) {
        None => (PLACEHOLDER.to_string(), Tone::Muted),
        Some(ProbeStatus::Success { latency }) => (format_latency(*latency), latency_tone(*latency)),
        Some(ProbeStatus::Timeout) => ("timeout".to_string(), Tone::Bad),
        Some(ProbeStatus::Unreachable { .. }) => ("unreach".to_string(), Tone::Bad),
        Some(ProbeStatus::Error { .. }) => ("error".to_string(), Tone::Bad),
    }
}

fn latency_cell(value: Option<Duration>) -> (String, Tone) {
    match value {
        Some(latency) => (format_latency(latency), latency_tone(latency)),
        None => (PLACEHOLDER.to_string(), Tone::Muted),
    }
}

fn target_width(snapshot: &Snapshot) -> usize {
    let longest = snapshot
        .targets
        .iter()
        .map(|v| v.target.as_str().chars().count())
        .max()
        .unwrap_or(0);
    (longest.max(MIN_TARGET_WIDTH) + 2).min(MAX_TARGET_WIDTH)
}

fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(width.saturating_sub(1)).collect();
    clipped.push('~');
    clipped
}
