//! Human-readable text output

use super::{emit, ReportSink, RunSummary};
use crate::stats::{AggregateStats, OperationKind, StatsSnapshot};
use crate::util::time::format_rate;
use crate::Result;
use std::io::Write;

/// Repeat the column header every this many intervals
const HEADER_EVERY: u64 = 20;

/// Kinds shown in their own columns; every other kind with activity is
/// appended as `name=rate`
const COLUMNS: [OperationKind; 2] = [OperationKind::Read, OperationKind::Write];

/// Column table on any writer
pub struct TextSink<W: Write> {
    out: W,
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn header(&mut self) -> Result<()> {
        emit(
            &mut self.out,
            &format!(
                "{:<12} {:>5} {:>9} {:>8} {:>9} {:>9} {:>8} {:>8} {:>6}  other",
                "time", "int", "ops/s", "resp_ms", "read/s", "write/s", "MB/s_r", "MB/s_w", "errors"
            ),
        )
    }
}

/// One table row for `stats`, labelled with `label`
fn row(label: &str, number: &str, stats: &AggregateStats) -> String {
    let (mb_read, mb_write) = stats.mb_per_sec();
    let mut line = format!(
        "{:<12} {:>5} {:>9} {:>8.3} {:>9} {:>9} {:>8.2} {:>8.2} {:>6}",
        label,
        number,
        format_rate(stats.total_rate()),
        stats.total_avg_response_ms(),
        format_rate(stats.rate(COLUMNS[0])),
        format_rate(stats.rate(COLUMNS[1])),
        mb_read,
        mb_write,
        stats.errors(),
    );
    let others: Vec<String> = OperationKind::ALL
        .iter()
        .filter(|kind| !COLUMNS.contains(kind))
        .filter(|&&kind| stats.counter(kind).operations > 0)
        .map(|&kind| format!("{}={}", kind, format_rate(stats.rate(kind))))
        .collect();
    if !others.is_empty() {
        line.push_str("  ");
        line.push_str(&others.join(" "));
    }
    line
}

impl<W: Write> ReportSink for TextSink<W> {
    fn interval(&mut self, number: u64, delta: &StatsSnapshot) -> Result<()> {
        if number % HEADER_EVERY == 1 {
            self.header()?;
        }
        let time = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
        emit(&mut self.out, &row(&time, &number.to_string(), &delta.total))
    }

    fn summary(&mut self, summary: &RunSummary) -> Result<()> {
        let totals = &summary.totals;
        emit(&mut self.out, "")?;
        emit(
            &mut self.out,
            &format!(
                "Run complete: {} intervals, {:.1}s",
                summary.intervals,
                totals.total.elapsed_micros as f64 / 1_000_000.0
            ),
        )?;
        self.header()?;
        emit(&mut self.out, &row("total", "", &totals.total))?;
        for (name, stats) in &totals.per_workload {
            emit(&mut self.out, &row(name, "", stats))?;
        }

        let histogram = totals.total.total_histogram()?;
        if histogram.total() > 0 {
            emit(
                &mut self.out,
                &format!(
                    "Response (us): p50<={} p90<={} p99<={}",
                    histogram.percentile(50.0),
                    histogram.percentile(90.0),
                    histogram.percentile(99.0)
                ),
            )?;
        }

        let blocks: Vec<String> = summary
            .blocks
            .non_zero()
            .map(|(reason, count)| format!("  {:<24} {:>12}", reason.label(), format_number(count)))
            .collect();
        if !blocks.is_empty() {
            emit(&mut self.out, "Counters:")?;
            for line in blocks {
                emit(&mut self.out, &line)?;
            }
        }
        if summary.data_errors > 0 {
            emit(&mut self.out, &format!("Data errors: {}", summary.data_errors))?;
        }
        Ok(())
    }
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocked::{BlockCounters, BlockReason};
    use crate::stats::BucketLayout;
    use std::sync::Arc;

    fn snapshot() -> StatsSnapshot {
        let layout = Arc::new(BucketLayout::default());
        let mut snap = StatsSnapshot::empty(Arc::clone(&layout));
        snap.total.record(OperationKind::Read, 100, 4096);
        snap.total.record(OperationKind::Mkdir, 50, 0);
        snap.total.elapsed_micros = 1_000_000;
        snap
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_interval_prints_header_then_row() {
        let mut sink = TextSink::new(Vec::new());
        sink.interval(1, &snapshot()).unwrap();
        sink.interval(2, &snapshot()).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("time"));
        assert!(lines[1].contains("mkdir=1.0"));
        assert!(!lines[2].starts_with("time"));
    }

    #[test]
    fn test_summary_lists_counters() {
        let counters = BlockCounters::new();
        counters.count(BlockReason::FileBusy);
        counters.count(BlockReason::FileBusy);
        let summary = RunSummary {
            intervals: 2,
            totals: snapshot(),
            blocks: counters.summary(),
            data_errors: 0,
        };
        let mut sink = TextSink::new(Vec::new());
        sink.summary(&summary).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert!(text.contains("Run complete: 2 intervals"));
        assert!(text.contains(BlockReason::FileBusy.label()));
        assert!(text.contains("p50<="));
        assert!(!text.contains("Data errors"));
    }
}
