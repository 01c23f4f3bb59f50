//! TOML configuration file parsing

use super::*;
use crate::config::cli::{Cli, OperationArg};
use crate::util::time::{parse_duration, parse_size};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Name of the anchor and workload a quick run builds
const QUICK_NAME: &str = "default";

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Configuration from the file named on the command line, or a quick run
/// of one workload against PATH; CLI options are applied on top either way
pub fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => parse_toml_file(path)?,
        None => quick_config(cli)?,
    };
    merge_cli_with_config(cli, config)
}

/// Single anchor at PATH with one workload, before overrides
fn quick_config(cli: &Cli) -> Result<Config> {
    let path = cli
        .path
        .clone()
        .context("An anchor PATH is required without --config")?;
    let operation = cli.operation.map(operation_from_arg).unwrap_or(OperationType::Read);

    Ok(Config {
        run: RunConfig::default(),
        anchors: vec![AnchorConfig {
            name: QUICK_NAME.to_string(),
            path,
            depth: 1,
            width: 1,
            files: 1,
            sizes: FileSizes::default(),
            distribution: FileDistribution::default(),
        }],
        workloads: vec![WorkloadConfig::new(QUICK_NAME, QUICK_NAME, operation)],
    })
}

fn operation_from_arg(arg: OperationArg) -> OperationType {
    match arg {
        OperationArg::Read => OperationType::Read,
        OperationArg::Write => OperationType::Write,
        OperationArg::Create => OperationType::Create,
        OperationArg::Delete => OperationType::Delete,
        OperationArg::Mkdir => OperationType::Mkdir,
        OperationArg::Rmdir => OperationType::Rmdir,
        OperationArg::Copy => OperationType::Copy,
        OperationArg::Open => OperationType::Open,
        OperationArg::Close => OperationType::Close,
        OperationArg::Getattr => OperationType::GetAttr,
        OperationArg::Setattr => OperationType::SetAttr,
        OperationArg::Access => OperationType::Access,
        OperationArg::Readwrite => OperationType::ReadWrite,
    }
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
///
/// Namespace options apply to every anchor, workload options to every
/// workload.
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Override run settings
    if let Some(elapsed) = &cli.elapsed {
        config.run.elapsed = parse_duration(elapsed)?;
    }
    if let Some(interval) = &cli.interval {
        config.run.interval = parse_duration(interval)?;
    }
    if cli.json {
        config.run.json_output = true;
    }

    // Override anchors
    if cli.config.is_some() {
        if let (Some(path), Some(first)) = (&cli.path, config.anchors.first_mut()) {
            first.path = path.clone();
        }
    }
    let size = cli.size.as_deref().map(parse_size).transpose()?;
    for anchor in &mut config.anchors {
        if let Some(depth) = cli.depth {
            anchor.depth = depth;
        }
        if let Some(width) = cli.width {
            anchor.width = width;
        }
        if let Some(files) = cli.files {
            anchor.files = files;
        }
        if let Some(size) = size {
            anchor.sizes = FileSizes::Fixed(size);
        }
    }

    // Override workloads
    let xfersize = cli.xfersize.as_deref().map(parse_size).transpose()?;
    for workload in &mut config.workloads {
        if let Some(operation) = cli.operation {
            workload.operation = operation_from_arg(operation);
        }
        if let Some(threads) = cli.threads {
            workload.threads = threads;
        }
        if let Some(xfersize) = xfersize {
            workload.xfersizes = TransferSizes::Fixed(xfersize);
        }
        if let Some(sequential) = cli.sequential {
            workload.sequential = sequential;
        }
        if let Some(read_pct) = cli.read_pct {
            workload.read_pct = read_pct;
        }
    }

    Ok(config)
}
