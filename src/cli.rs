//! Command-line flags and target list loading.

use clap::Parser;
use regex::Regex;
use std::collections::HashSet;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

use crate::config::{self, ConfigError, Settings};
use crate::probe::Target;

/// pingboard - ping many hosts at once and watch latency and loss live
#[derive(Parser, Debug)]
#[command(name = "pingboard", version, about, long_about = None)]
pub struct Cli {
    /// IP addresses or hostnames to ping
    #[arg(value_name = "TARGET")]
    pub targets: Vec<String>,

    /// File with one target per line; blank lines and '#' comments are skipped
    #[arg(short, long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Seconds between two pings of the same target
    #[arg(short, long, value_name = "SECONDS")]
    pub interval: Option<f64>,

    /// Seconds to wait for each reply
    #[arg(short, long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    /// Pings per target before exiting (0 pings forever)
    #[arg(short, long, value_name = "N")]
    pub count: Option<u64>,

    /// Outcomes kept per target for statistics and the graph
    #[arg(long = "history", value_name = "N")]
    pub history: Option<usize>,

    /// Raise a latency alert above this many milliseconds
    #[arg(long = "latency-alert", value_name = "MS")]
    pub latency_alert: Option<f64>,

    /// Raise a loss alert above this percentage
    #[arg(long = "loss-alert", value_name = "PERCENT")]
    pub loss_alert: Option<f64>,

    /// Latency figure the alert compares: last or avg
    #[arg(long = "alert-basis", value_name = "BASIS")]
    pub alert_basis: Option<String>,

    /// Dashboard refresh in milliseconds
    #[arg(long = "refresh", value_name = "MS")]
    pub refresh: Option<f64>,

    /// Seconds to wait for in-flight pings on exit
    #[arg(long = "grace", value_name = "SECONDS")]
    pub grace: Option<f64>,

    /// Disable colored output
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Print the final snapshot as JSON instead of a text summary
    #[arg(long)]
    pub json: bool,

    /// Write logs to this file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Apply flags on top of `settings`; flags win over the environment.
    pub fn apply(&self, settings: &mut Settings) -> Result<(), ConfigError> {
        if let Some(v) = self.interval {
            settings.probe_interval = config::secs("probe interval", v)?;
        }
        if let Some(v) = self.timeout {
            settings.probe_timeout = config::secs("probe timeout", v)?;
        }
        if let Some(n) = self.count {
            settings.count = (n > 0).then_some(n);
        }
        if let Some(n) = self.history {
            settings.history_window = n;
        }
        if let Some(v) = self.latency_alert {
            settings.latency_alert = config::millis("latency alert threshold", v)?;
        }
        if let Some(v) = self.loss_alert {
            settings.loss_alert = v;
        }
        if let Some(basis) = &self.alert_basis {
            settings.alert_basis = basis.parse().map_err(|reason| ConfigError::Invalid {
                name: "alert basis",
                reason,
            })?;
        }
        if let Some(v) = self.refresh {
            settings.render_interval = config::millis("refresh interval", v)?;
        }
        if let Some(v) = self.grace {
            settings.grace_period = config::grace(v)?;
        }
        if self.no_color {
            settings.color = false;
        }
        if let Some(path) = &self.log_file {
            settings.log_file = Some(path.clone());
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum TargetError {
    #[error("cannot read target file {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid target '{0}': expected an IP address or hostname")]
    Invalid(String),
}

static HOSTNAME_RE: OnceLock<Regex> = OnceLock::new();

/// An IP literal or an RFC 1123 hostname. Nothing is resolved here.
pub fn is_valid_target(candidate: &str) -> bool {
    if candidate.parse::<IpAddr>().is_ok() {
        return true;
    }
    if candidate.is_empty() || candidate.len() > 253 {
        return false;
    }
    let re = HOSTNAME_RE.get_or_init(|| {
        Regex::new(
            r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*\.?$",
        )
        .expect("valid regex")
    });
    re.is_match(candidate)
}

/// Targets named in a target file. Invalid entries are skipped with a warning.
pub fn parse_target_file(contents: &str, source: &Path) -> Vec<String> {
    contents
        .lines()
        .enumerate()
        .filter_map(|(n, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            if !is_valid_target(line) {
                tracing::warn!(
                    file = %source.display(),
                    line = n + 1,
                    entry = line,
                    "skipping invalid target"
                );
                return None;
            }
            Some(line.to_string())
        })
        .collect()
}

/// Positional targets followed by the file's, first occurrence wins.
pub fn collect_targets(positional: &[String], file: Option<&Path>) -> Result<Vec<Target>, TargetError> {
    let mut names: Vec<String> = Vec::with_capacity(positional.len());
    for name in positional {
        let name = name.trim();
        if !is_valid_target(name) {
            return Err(TargetError::Invalid(name.to_string()));
        }
        names.push(name.to_string());
    }

    if let Some(path) = file {
        let contents = std::fs::read_to_string(path).map_err(|source| TargetError::File {
            path: path.to_path_buf(),
            source,
        })?;
        names.extend(parse_target_file(&contents, path));
    }

    let mut seen = HashSet::new();
    let targets: Vec<Target> = names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .map(Target::new)
        .collect();

    tracing::debug!(count = targets.len(), "targets loaded");
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlertBasis;
    use std::io::Write;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn names(targets: &[Target]) -> Vec<&str> {
        targets.iter().map(Target::as_str).collect()
    }

    #[test]
    fn test_valid_targets() {
        for ok in [
            "8.8.8.8",
            "::1",
            "2001:db8::1",
            "localhost",
            "example.com",
            "example.com.",
            "a-b.c-d.example",
            "192.168.1.1",
        ] {
            assert!(is_valid_target(ok), "{} should be valid", ok);
        }
        for bad in ["", "-leading.example", "trailing-.example", "a..b", "white space", "http://x", "a_b.example"] {
            assert!(!is_valid_target(bad), "{} should be invalid", bad);
        }
        assert!(!is_valid_target(&"a".repeat(64)));
        assert!(!is_valid_target(&format!("{}.com", "a.".repeat(130))));
    }

    #[test]
    fn test_target_file_skips_comments_and_invalid_entries() {
        let contents = "# core routers\n8.8.8.8\n\n   \n  1.1.1.1  \nnot a host\n#google.com\nexample.com\n";
        let parsed = parse_target_file(contents, Path::new("targets.txt"));
        assert_eq!(parsed, vec!["8.8.8.8", "1.1.1.1", "example.com"]);
    }

    #[test]
    fn test_collect_targets_merges_and_dedupes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# hosts").unwrap();
        writeln!(file, "1.1.1.1").unwrap();
        writeln!(file, "8.8.8.8").unwrap();
        writeln!(file, "example.com").unwrap();

        let positional = vec!["8.8.8.8".to_string(), "localhost".to_string()];
        let targets = assert_ok!(collect_targets(&positional, Some(file.path())));
        assert_eq!(names(&targets), vec!["8.8.8.8", "localhost", "1.1.1.1", "example.com"]);
    }

    #[test]
    fn test_collect_targets_errors() {
        let err = assert_err!(collect_targets(&["bad host".to_string()], None));
        assert!(matches!(err, TargetError::Invalid(ref t) if t == "bad host"));

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt");
        let err = assert_err!(collect_targets(&[], Some(missing.as_path())));
        assert!(err.to_string().contains("missing.txt"));
    }

    #[test]
    fn test_empty_target_list_is_allowed() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let targets = assert_ok!(collect_targets(&[], Some(file.path())));
        assert!(targets.is_empty());
        assert!(assert_ok!(collect_targets(&[], None)).is_empty());
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "pingboard",
            "-i",
            "0.5",
            "-t",
            "1",
            "-c",
            "10",
            "--history",
            "30",
            "--latency-alert",
            "150",
            "--loss-alert",
            "5",
            "--alert-basis",
            "avg",
            "--refresh",
            "500",
            "--grace",
            "1",
            "--no-color",
            "--json",
            "-f",
            "hosts.txt",
            "8.8.8.8",
            "1.1.1.1",
        ])
        .unwrap();
        assert_eq!(cli.targets, vec!["8.8.8.8", "1.1.1.1"]);
        assert_eq!(cli.file, Some(PathBuf::from("hosts.txt")));
        assert!(cli.json);

        let mut settings = Settings::default();
        assert_ok!(cli.apply(&mut settings));
        assert_eq!(settings.probe_interval, Duration::from_millis(500));
        assert_eq!(settings.probe_timeout, Duration::from_secs(1));
        assert_eq!(settings.count, Some(10));
        assert_eq!(settings.history_window, 30);
        assert_eq!(settings.latency_alert, Duration::from_millis(150));
        assert_eq!(settings.loss_alert, 5.0);
        assert_eq!(settings.alert_basis, AlertBasis::Avg);
        assert_eq!(settings.render_interval, Duration::from_millis(500));
        assert_eq!(settings.grace_period, Duration::from_secs(1));
        assert!(!settings.color);
        assert_ok!(settings.validate());
    }

    #[test]
    fn test_flags_override_environment() {
        let mut settings = Settings::default();
        settings
            .apply_env(|var| (var == "PINGBOARD_INTERVAL").then(|| "5".to_string()))
            .unwrap();
        assert_eq!(settings.probe_interval, Duration::from_secs(5));

        let cli = Cli::try_parse_from(["pingboard", "--interval", "2"]).unwrap();
        assert_ok!(cli.apply(&mut settings));
        assert_eq!(settings.probe_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_zero_count_means_forever() {
        let mut settings = Settings {
            count: Some(3),
            ..Settings::default()
        };
        let cli = Cli::try_parse_from(["pingboard", "-c", "0"]).unwrap();
        assert_ok!(cli.apply(&mut settings));
        assert_eq!(settings.count, None);
    }

    #[test]
    fn test_bad_flag_values() {
        let mut settings = Settings::default();
        for args in [
            vec!["pingboard", "--interval", "0"],
            vec!["pingboard", "--timeout", "-1"],
            vec!["pingboard", "--alert-basis", "p99"],
            vec!["pingboard", "--refresh", "0"],
            vec!["pingboard", "--grace", "-2"],
        ] {
            let cli = Cli::try_parse_from(args.clone()).unwrap();
            assert_err!(cli.apply(&mut settings), "{:?}", args);
        }

        assert!(Cli::try_parse_from(["pingboard", "--interval", "soon"]).is_err());
    }
}
