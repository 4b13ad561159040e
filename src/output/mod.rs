//! Result sink.
//!
//! Formats each finished cycle and writes it out in one go. The default
//! layout is a single-line JSON array per cycle; `lines` writes one JSON
//! object per line instead. Nothing is written until the cycle's join
//! barrier has completed.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Write;
use tracing::debug;

use crate::types::CycleReport;

/// How a cycle's results are laid out on the writer.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// `[{..},{..}]` followed by a newline.
    #[default]
    Array,
    /// `{..}` per line.
    Lines,
}

/// Consumer of finished cycles.
pub trait ResultSink: Send {
    fn emit(&mut self, report: &CycleReport) -> Result<()>;
}

/// Writes cycles as JSON to any `Write` (stdout in production).
pub struct JsonSink<W: Write + Send> {
    writer: W,
    format: OutputFormat,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self { writer, format }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonSink<std::io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(std::io::stdout(), format)
    }
}

impl<W: Write + Send> ResultSink for JsonSink<W> {
    fn emit(&mut self, report: &CycleReport) -> Result<()> {
        match self.format {
            OutputFormat::Array => {
                serde_json::to_writer(&mut self.writer, &report.results)
                    .context("Failed to serialise cycle results")?;
                writeln!(self.writer).context("Failed to write cycle results")?;
            }
            OutputFormat::Lines => {
                for result in &report.results {
                    serde_json::to_writer(&mut self.writer, result)
                        .context("Failed to serialise tracking result")?;
                    writeln!(self.writer).context("Failed to write tracking result")?;
                }
            }
        }
        self.writer.flush().context("Failed to flush output")?;

        debug!(cycle = %report.id, count = report.results.len(), "Cycle emitted");
        Ok(())
    }
}
