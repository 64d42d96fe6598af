//! Presentation of comparison outcomes.
//!
//! The pipeline itself never prints; hosts pick a [`Reporter`]. The CLI uses
//! [`ConsoleReporter`] by default and [`JsonReporter`] with `--json`.

use crate::{CompareResult, Error, Progress};
use std::io::{self, Write};
use std::path::Path;

pub trait Reporter {
    /// A pipeline step is about to start
    fn progress(&mut self, step: &Progress<'_>) -> io::Result<()>;

    /// Final result of a comparison run with the threshold it was judged by
    fn comparison(&mut self, result: &CompareResult, threshold: f64) -> io::Result<()>;

    /// A standalone capture was written
    fn saved(&mut self, path: &Path) -> io::Result<()>;

    /// The run failed
    fn failure(&mut self, error: &Error) -> io::Result<()>;
}

/// `threshold * 100` without float noise, e.g. `10` for `0.1`
fn threshold_percentage(threshold: f64) -> String {
    let pct = (threshold * 100.0 * 1e6).round() / 1e6;
    format!("{}", pct)
}

/// Human readable line output
pub struct ConsoleReporter<W: Write = io::Stdout, E: Write = io::Stderr> {
    out: W,
    err: E,
}

impl ConsoleReporter {
    pub fn stdout() -> Self {
        Self {
            out: io::stdout(),
            err: io::stderr(),
        }
    }
}

impl<W: Write, E: Write> ConsoleReporter<W, E> {
    pub fn new(out: W, err: E) -> Self {
        Self { out, err }
    }

    pub fn into_inner(self) -> (W, E) {
        (self.out, self.err)
    }
}

impl<W: Write, E: Write> Reporter for ConsoleReporter<W, E> {
    fn progress(&mut self, step: &Progress<'_>) -> io::Result<()> {
        match step {
            Progress::CapturingFirst(url) => writeln!(self.out, "Capturing first website: {}", url),
            Progress::CapturingSecond(url) => writeln!(self.out, "Capturing second website: {}", url),
            Progress::Comparing => writeln!(self.out, "Comparing screenshots..."),
        }
    }

    fn comparison(&mut self, result: &CompareResult, threshold: f64) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "Comparison results:")?;
        writeln!(self.out, "Total pixels: {}", result.total_pixels)?;
        writeln!(self.out, "Different pixels: {}", result.diff_pixels)?;
        writeln!(self.out, "Difference percentage: {}%", result.diff_percentage)?;
        if let Some(path) = &result.diff_path {
            writeln!(self.out, "Diff image saved to: {}", path.display())?;
        }
        writeln!(self.out)?;

        let limit = threshold_percentage(threshold);
        if result.passed {
            writeln!(
                self.out,
                "Test passed! Difference percentage {}% is below threshold {}%",
                result.diff_percentage, limit
            )
        } else {
            writeln!(
                self.out,
                "Test failed! Difference percentage {}% exceeds threshold {}%",
                result.diff_percentage, limit
            )
        }
    }

    fn saved(&mut self, path: &Path) -> io::Result<()> {
        writeln!(self.out, "Screenshot saved to: {}", path.display())
    }

    fn failure(&mut self, error: &Error) -> io::Result<()> {
        writeln!(self.err, "Execution failed: {}", error)
    }
}

/// One JSON document per outcome on stdout; progress is not reported.
pub struct JsonReporter<W: Write = io::Stdout> {
    out: W,
}

impl JsonReporter {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, value: &serde_json::Value) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut self.out, value)?;
        writeln!(self.out)
    }
}

impl<W: Write> Reporter for JsonReporter<W> {
    fn progress(&mut self, _step: &Progress<'_>) -> io::Result<()> {
        Ok(())
    }

    fn comparison(&mut self, result: &CompareResult, _threshold: f64) -> io::Result<()> {
        let value = serde_json::to_value(result)?;
        self.emit(&value)
    }

    fn saved(&mut self, path: &Path) -> io::Result<()> {
        self.emit(&serde_json::json!({ "output": path }))
    }

    fn failure(&mut self, error: &Error) -> io::Result<()> {
        self.emit(&serde_json::json!({ "error": error.to_string() }))
    }
}
