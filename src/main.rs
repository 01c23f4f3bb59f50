//! FSPulse CLI entry point

use anyhow::{Context, Result};
use fspulse::config::cli::Cli;
use fspulse::config::{toml, validator, Config};
use fspulse::engine::sync::SyncIo;
use fspulse::output;
use fspulse::util::time::format_rate;
use fspulse::Runner;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;

    // RUST_LOG wins over --debug
    let level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fspulse={}", level)));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = toml::load_config(&cli)?;
    validator::validate_config(&config).context("Configuration validation failed")?;

    eprintln!("FSPulse v{}", env!("CARGO_PKG_VERSION"));
    print_configuration(&config);

    if cli.dry_run {
        eprintln!();
        eprintln!("Dry run mode - configuration validated successfully");
        return Ok(());
    }

    let mut sink = output::stdout_sink(config.run.json_output);
    let runner = Runner::new(config, Arc::new(SyncIo::new()))?;
    let summary = runner.run(sink.as_mut())?;

    let total = &summary.totals.total;
    tracing::info!(
        intervals = summary.intervals,
        ops_per_sec = %format_rate(total.total_rate()),
        data_errors = summary.data_errors,
        "run finished"
    );
    Ok(())
}

fn print_configuration(config: &Config) {
    eprintln!("Configuration:");
    eprintln!(
        "  Run: {}s, interval {}s{}",
        config.run.elapsed,
        config.run.interval,
        if config.run.validate { ", validation on" } else { "" }
    );

    eprintln!("  Anchors:");
    for anchor in &config.anchors {
        eprintln!(
            "    {}: {} (depth {}, width {}, {} files per directory, {} total)",
            anchor.name,
            anchor.path.display(),
            anchor.depth,
            anchor.width,
            anchor.files,
            anchor.file_count().unwrap_or(0)
        );
    }

    eprintln!("  Workloads:");
    for workload in &config.workloads {
        let target = workload
            .target_anchor
            .as_deref()
            .map(|t| format!(" -> {}", t))
            .unwrap_or_default();
        eprintln!(
            "    {}: {} on {}{}, {} threads, {}, {:?} selection",
            workload.name,
            workload.operation,
            workload.anchor,
            target,
            workload.threads,
            if workload.sequential { "sequential" } else { "random" },
            workload.select
        );
    }
    eprintln!();
}
