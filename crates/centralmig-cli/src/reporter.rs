//! Console output for management commands.
//!
//! [`ConsoleReporter`] writes human-readable lines to stdout (or any writer)
//! and turns executor progress notifications into the familiar
//! `Applying billing.0001_init... OK` output.

use std::io::Write;
use std::sync::{Arc, Mutex};

use centralmig_migrations::{ProgressAction, ProgressCallback, UnitKey};

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Writes command output.
///
/// Cloning a reporter shares the underlying writer.
#[derive(Clone)]
pub struct ConsoleReporter {
    out: SharedWriter,
    verbosity: u8,
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::stdout()
    }
}

impl ConsoleReporter {
    /// Creates a reporter that writes to stdout.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// Creates a reporter over an arbitrary writer.
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
            verbosity: 1,
        }
    }

    /// Sets the verbosity. `0` silences everything but errors.
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Returns the verbosity.
    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// Writes a full line.
    pub fn line(&self, text: impl AsRef<str>) {
        if self.verbosity >= 1 {
            self.write(&format!("{}\n", text.as_ref()));
        }
    }

    /// Writes text without a trailing newline and flushes.
    pub fn partial(&self, text: impl AsRef<str>) {
        if self.verbosity >= 1 {
            self.write(text.as_ref());
        }
    }

    fn write(&self, text: &str) {
        if let Ok(mut out) = self.out.lock() {
            if let Err(err) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
                tracing::warn!(error = %err, "failed to write command output");
            }
        }
    }

    /// Returns a progress callback that reports into this reporter.
    pub fn progress_callback(&self) -> ProgressCallback {
        let reporter = self.clone();
        Arc::new(move |action: ProgressAction, unit: Option<&UnitKey>, fake: bool| {
            let unit = unit.map(ToString::to_string).unwrap_or_default();
            let done = if fake { " FAKED" } else { " OK" };
            match action {
                ProgressAction::RenderStart => {
                    if reporter.verbosity >= 2 {
                        reporter.partial("  Rendering unit states...");
                    }
                }
                ProgressAction::RenderSuccess => {
                    if reporter.verbosity >= 2 {
                        reporter.line(" DONE");
                    }
                }
                ProgressAction::ApplyStart => reporter.partial(format!("  Applying {unit}...")),
                ProgressAction::UnapplyStart => {
                    reporter.partial(format!("  Unapplying {unit}..."));
                }
                ProgressAction::ApplySuccess | ProgressAction::UnapplySuccess => {
                    reporter.line(done);
                }
            }
        })
    }
}

/// A cloneable in-memory writer for capturing output in tests.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns everything written so far.
    pub fn contents(&self) -> String {
        self.0
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| std::io::Error::other("output buffer poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
