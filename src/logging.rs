//! Log output while the dashboard owns the screen.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

struct State {
    held: Option<Vec<u8>>,
    sink: Box<dyn Write + Send>,
}

/// Log writer that can hold events back and write them out later.
///
/// Events written to stderr would land on top of the alternate screen, so
/// they are held while the dashboard draws and released once the previous
/// screen is back.
#[derive(Clone)]
pub struct HeldWriter {
    state: Arc<Mutex<State>>,
}

impl HeldWriter {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                held: None,
                sink: Box::new(sink),
            })),
        }
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Buffer everything written from now until [`release`](Self::release).
    pub fn hold(&self) {
        self.lock().held.get_or_insert_with(Vec::new);
    }

    /// Write out held events and go back to writing straight through.
    pub fn release(&self) -> io::Result<()> {
        let mut state = self.lock();
        if let Some(held) = state.held.take() {
            state.sink.write_all(&held)?;
            state.sink.flush()?;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while logging leaves the buffer usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Write for HeldWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        match state.held.as_mut() {
            Some(held) => {
                held.extend_from_slice(buf);
                Ok(buf.len())
            }
            None => state.sink.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        match state.held {
            Some(_) => Ok(()),
            None => state.sink.flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for HeldWriter {
    type Writer = HeldWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_events_are_held_until_release() {
        let captured = Captured::default();
        let writer = HeldWriter::new(captured.clone());
        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer.clone())
                .with_ansi(false),
        );

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("before the dashboard");
            writer.hold();
            tracing::warn!("native ping not permitted");
            assert!(captured.text().contains("before the dashboard"));
            assert!(!captured.text().contains("not permitted"));

            writer.release().unwrap();
            assert!(captured.text().contains("native ping not permitted"));

            tracing::warn!("after the dashboard");
            assert!(captured.text().contains("after the dashboard"));
        });
    }

    #[test]
    fn test_release_without_hold_writes_nothing() {
        let captured = Captured::default();
        let writer = HeldWriter::new(captured.clone());
        writer.release().unwrap();
        assert!(captured.text().is_empty());
    }
}
