//! Process runtime.
//!
//! Blocking work such as name lookups runs on tokio's blocking pool, and a
//! cancelled lookup keeps its thread until the OS call returns. The runtime
//! is therefore shut down with a bound instead of waiting for those threads.

use std::future::Future;
use std::io;
use std::time::Duration;

/// How long leftover blocking work may delay the exit once `main` is done.
pub const EXIT_LINGER: Duration = Duration::from_millis(100);

/// Run `future` to completion on a multi-threaded runtime, then give leftover
/// blocking tasks at most `linger` before returning.
pub fn block_on_bounded<F: Future>(future: F, linger: Duration) -> io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(linger);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::probe::{ProbeOutcome, Prober, Target};
    use crate::scheduler::Scheduler;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Instant;

    /// Waits on a blocking thread that outlives the probe when it is dropped,
    /// like a name lookup stuck in the resolver.
    struct BlockingLookupProber;

    #[async_trait]
    impl Prober for BlockingLookupProber {
        async fn probe(&self, _target: &Target, _timeout: Duration) -> ProbeOutcome {
            let lookup = tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(5)));
            let _ = lookup.await;
            ProbeOutcome::success(Duration::from_millis(1))
        }
    }

    #[test]
    fn test_exit_is_bounded_by_grace_period() {
        let settings = Arc::new(Settings {
            probe_timeout: Duration::from_secs(10),
            grace_period: Duration::from_millis(300),
            ..Settings::default()
        });

        let started = Instant::now();
        let report = block_on_bounded(
            async move {
                let scheduler = Scheduler::start(
                    vec![Target::new("198.51.100.7")],
                    Arc::new(BlockingLookupProber),
                    settings,
                );
                tokio::time::sleep(Duration::from_millis(200)).await;
                scheduler.shutdown().await
            },
            EXIT_LINGER,
        )
        .unwrap();

        assert!(report.is_clean());
        // 200ms of running, 300ms grace, 100ms linger, plus slack.
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_millis(1500), "exit took {:?}", elapsed);
    }

    #[test]
    fn test_output_is_returned() {
        let value = block_on_bounded(async { 7 }, Duration::ZERO).unwrap();
        assert_eq!(value, 7);
    }
}
