//! pingboard - concurrent multi-target ping monitor with a live terminal
//! dashboard.

use clap::Parser;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pingboard::cli::{self, Cli, TargetError};
use pingboard::config::{ConfigError, Settings};
use pingboard::dashboard::{self, Terminal};
use pingboard::logging::HeldWriter;
use pingboard::probe::PingProber;
use pingboard::runtime::{self, EXIT_LINGER};
use pingboard::scheduler::{shutdown_channel, Scheduler};

#[derive(Error, Debug)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Targets(#[from] TargetError),
    #[error("cannot open log file {}: {source}", .path.display())]
    LogFile { path: PathBuf, source: io::Error },
    #[error("terminal error: {0}")]
    Terminal(#[from] io::Error),
    #[error("cannot start runtime: {0}")]
    Runtime(#[source] io::Error),
}

impl AppError {
    /// 2 for anything wrong with the invocation, 1 for runtime failures.
    fn exit_code(&self) -> ExitCode {
        match self {
            AppError::Config(_) | AppError::Targets(_) | AppError::LogFile { .. } => ExitCode::from(2),
            AppError::Terminal(_) | AppError::Runtime(_) => ExitCode::FAILURE,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = configure(&cli).and_then(|(settings, held)| {
        // The monitors stop within the grace period; leftover blocking
        // lookups get only a short linger after that.
        runtime::block_on_bounded(run(cli, settings, held), EXIT_LINGER).map_err(AppError::Runtime)?
    });
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pingboard: {}", e);
            e.exit_code()
        }
    }
}

/// Defaults, then PINGBOARD_* variables, then flags. Logging starts once the
/// settings are known to be valid.
fn configure(cli: &Cli) -> Result<(Settings, Option<HeldWriter>), AppError> {
    let mut settings = Settings::load()?;
    cli.apply(&mut settings)?;
    settings.validate()?;

    let held = init_logging(settings.log_file.as_deref())?;
    Ok((settings, held))
}

async fn run(cli: Cli, settings: Settings, held: Option<HeldWriter>) -> Result<(), AppError> {
    let targets = cli::collect_targets(&cli.targets, cli.file.as_deref())?;
    if targets.is_empty() {
        tracing::warn!("no targets given, the dashboard will stay empty");
    }

    let settings = Arc::new(settings);
    let terminal = Terminal::enter(settings.color)?;
    if let Some(held) = &held {
        held.hold();
    }
    let mut scheduler = Scheduler::start(targets, Arc::new(PingProber), Arc::clone(&settings));
    let aggregator = scheduler.aggregator();

    let (stop_tx, stop) = shutdown_channel();
    let mut renderer = tokio::spawn(dashboard::run_dashboard(
        aggregator.clone(),
        Arc::clone(&settings),
        stop,
        terminal,
    ));

    let counted = settings.count.is_some();
    let mut ended_early = None;
    tokio::select! {
        _ = shutdown_requested() => tracing::info!("shutdown requested"),
        _ = scheduler.finished(), if counted => tracing::info!("all monitors completed"),
        joined = &mut renderer => ended_early = Some(joined),
    }

    stop_tx.send_replace(true);
    let joined = match ended_early {
        Some(joined) => joined,
        None => renderer.await,
    };
    // Dropping the terminal restores the previous screen.
    let drawn = match joined {
        Ok(Ok(terminal)) => {
            drop(terminal);
            Ok(())
        }
        Ok(Err(e)) => Err(AppError::Terminal(e)),
        Err(e) => Err(AppError::Terminal(io::Error::other(e))),
    };
    if let Some(held) = &held {
        if let Err(e) = held.release() {
            eprintln!("pingboard: cannot write held log events: {}", e);
        }
    }

    let report = scheduler.shutdown().await;
    if !report.is_clean() {
        tracing::warn!(abandoned = report.abandoned.len(), "shutdown left monitors behind");
    }
    drawn?;

    dashboard::write_summary(&mut io::stdout().lock(), &aggregator, &settings, cli.json)?;
    Ok(())
}

/// Logs go to `log_file` when given, otherwise to stderr through a writer
/// that is held while the dashboard is up. `RUST_LOG` overrides the default
/// `pingboard=warn`.
fn init_logging(log_file: Option<&Path>) -> Result<Option<HeldWriter>, AppError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pingboard=warn"));
    let registry = tracing_subscriber::registry().with(filter);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| AppError::LogFile {
                    path: path.to_path_buf(),
                    source,
                })?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false),
                )
                .init();
            Ok(None)
        }
        None => {
            let held = HeldWriter::stderr();
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(held.clone()))
                .init();
            Ok(Some(held))
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_requested() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        if let Ok(mut terminate) = signal(SignalKind::terminate()) {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!("cannot listen for Ctrl+C: {}", e);
                    }
                }
                _ = terminate.recv() => {}
            }
            return;
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("cannot listen for Ctrl+C: {}", e);
    }
}
