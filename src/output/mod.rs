//! Interval and end-of-run reports
//!
//! The scheduler hands every interval delta to a [`ReportSink`]. Two sinks
//! exist: [`text::TextSink`] prints a column table for people, and
//! [`json::JsonSink`] prints one JSON object per line for scripts.

pub mod json;
pub mod text;

use crate::blocked::BlockSummary;
use crate::stats::StatsSnapshot;
use crate::Result;
use std::io::{self, Write};

/// Receiver for interval and summary reports
pub trait ReportSink {
    /// Statistics of one interval; `number` starts at 1
    fn interval(&mut self, number: u64, delta: &StatsSnapshot) -> Result<()>;

    /// Totals once all workers have stopped
    fn summary(&mut self, summary: &RunSummary) -> Result<()>;
}

/// What a finished run reports
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub intervals: u64,
    /// Cumulative statistics over the whole run
    pub totals: StatsSnapshot,
    pub blocks: BlockSummary,
    pub data_errors: u64,
}

/// Sink writing to stdout in the requested format
pub fn stdout_sink(json: bool) -> Box<dyn ReportSink> {
    if json {
        Box::new(json::JsonSink::new(io::stdout()))
    } else {
        Box::new(text::TextSink::new(io::stdout()))
    }
}

/// Write a line and flush so reports show up while the run is going
fn emit<W: Write>(out: &mut W, line: &str) -> Result<()> {
    writeln!(out, "{}", line)?;
    out.flush()?;
    Ok(())
}
