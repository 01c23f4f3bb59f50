//! JSON lines output
//!
//! Every interval and the final summary are written as one JSON object per
//! line. Rates are operations per second, response times are milliseconds,
//! throughput is MB (2^20 bytes) per second.

use super::{emit, ReportSink, RunSummary};
use crate::stats::{AggregateStats, OperationKind, StatsSnapshot};
use crate::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

/// Counters of one operation kind
#[derive(Debug, Clone, Serialize)]
pub struct JsonKind {
    pub operations: u64,
    pub rate: f64,
    pub avg_response_ms: f64,
    pub errors: u64,
}

/// Response time percentiles in microseconds (bucket upper edges)
#[derive(Debug, Clone, Serialize)]
pub struct JsonPercentiles {
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
}

/// One reporting scope: the run total or a single workload
#[derive(Debug, Clone, Serialize)]
pub struct JsonStats {
    pub elapsed_micros: u64,
    pub rate: f64,
    pub avg_response_ms: f64,
    pub read_mb_per_sec: f64,
    pub write_mb_per_sec: f64,
    pub errors: u64,
    /// Only kinds with activity
    pub kinds: BTreeMap<&'static str, JsonKind>,
    pub response_us: JsonPercentiles,
}

impl JsonStats {
    pub fn from_stats(stats: &AggregateStats) -> Result<Self> {
        let (read_mb_per_sec, write_mb_per_sec) = stats.mb_per_sec();
        let kinds = OperationKind::ALL
            .iter()
            .filter_map(|&kind| {
                let counter = stats.counter(kind);
                if counter.operations == 0 && counter.errors == 0 {
                    return None;
                }
                Some((
                    kind.label(),
                    JsonKind {
                        operations: counter.operations,
                        rate: stats.rate(kind),
                        avg_response_ms: counter.avg_response_ms(),
                        errors: counter.errors,
                    },
                ))
            })
            .collect();
        let histogram = stats.total_histogram()?;
        Ok(Self {
            elapsed_micros: stats.elapsed_micros,
            rate: stats.total_rate(),
            avg_response_ms: stats.total_avg_response_ms(),
            read_mb_per_sec,
            write_mb_per_sec,
            errors: stats.errors(),
            kinds,
            response_us: JsonPercentiles {
                p50: histogram.percentile(50.0),
                p90: histogram.percentile(90.0),
                p99: histogram.percentile(99.0),
            },
        })
    }
}

fn workloads(snapshot: &StatsSnapshot) -> Result<BTreeMap<String, JsonStats>> {
    snapshot
        .per_workload
        .iter()
        .map(|(name, stats)| Ok((name.clone(), JsonStats::from_stats(stats)?)))
        .collect()
}

#[derive(Debug, Serialize)]
struct JsonInterval {
    record: &'static str,
    timestamp: String,
    interval: u64,
    total: JsonStats,
    workloads: BTreeMap<String, JsonStats>,
}

#[derive(Debug, Serialize)]
struct JsonSummary {
    record: &'static str,
    timestamp: String,
    intervals: u64,
    total: JsonStats,
    workloads: BTreeMap<String, JsonStats>,
    counters: BTreeMap<&'static str, u64>,
    data_errors: u64,
}

/// JSON lines on any writer
pub struct JsonSink<W: Write> {
    out: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportSink for JsonSink<W> {
    fn interval(&mut self, number: u64, delta: &StatsSnapshot) -> Result<()> {
        let record = JsonInterval {
            record: "interval",
            timestamp: chrono::Local::now().to_rfc3339(),
            interval: number,
            total: JsonStats::from_stats(&delta.total)?,
            workloads: workloads(delta)?,
        };
        emit(&mut self.out, &serde_json::to_string(&record)?)
    }

    fn summary(&mut self, summary: &RunSummary) -> Result<()> {
        let record = JsonSummary {
            record: "summary",
            timestamp: chrono::Local::now().to_rfc3339(),
            intervals: summary.intervals,
            total: JsonStats::from_stats(&summary.totals.total)?,
            workloads: workloads(&summary.totals)?,
            counters: summary.blocks.non_zero().map(|(r, n)| (r.label(), n)).collect(),
            data_errors: summary.data_errors,
        };
        emit(&mut self.out, &serde_json::to_string(&record)?)
    }
}
