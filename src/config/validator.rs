//! Configuration validation

use super::*;
use anyhow::Result;
use std::collections::HashSet;

/// Largest tree a single anchor may describe
const MAX_FILES_PER_ANCHOR: u64 = 100_000_000;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_run(&config.run)?;
    validate_anchors(&config.anchors)?;

    if config.workloads.is_empty() {
        anyhow::bail!("at least one workload is required");
    }
    for workload in &config.workloads {
        validate_workload(workload, config)?;
    }

    Ok(())
}

/// Validate run-wide settings
pub fn validate_run(run: &RunConfig) -> Result<()> {
    if run.interval == 0 {
        anyhow::bail!("interval must be at least 1 second");
    }
    if run.elapsed == 0 {
        anyhow::bail!("elapsed must be at least 1 second");
    }
    if run.interval > run.elapsed {
        anyhow::bail!(
            "interval ({}s) must not be longer than elapsed ({}s)",
            run.interval,
            run.elapsed
        );
    }
    if run.max_consecutive_blocks == 0 {
        anyhow::bail!("max_consecutive_blocks must be at least 1");
    }
    if let Some(bounds) = &run.histogram_bounds {
        crate::stats::BucketLayout::from_bounds(bounds.clone())?;
    }
    Ok(())
}

/// Validate anchor shapes and name uniqueness
pub fn validate_anchors(anchors: &[AnchorConfig]) -> Result<()> {
    if anchors.is_empty() {
        anyhow::bail!("at least one anchor is required");
    }
    let mut names = HashSet::new();
    for anchor in anchors {
        if !names.insert(anchor.name.as_str()) {
            anyhow::bail!("anchor name {} is used twice", anchor.name);
        }
        validate_anchor(anchor)?;
    }
    Ok(())
}

fn validate_anchor(anchor: &AnchorConfig) -> Result<()> {
    if anchor.depth == 0 || anchor.width == 0 || anchor.files == 0 {
        anyhow::bail!(
            "anchor {}: depth, width and files must all be at least 1 (got {}, {}, {})",
            anchor.name,
            anchor.depth,
            anchor.width,
            anchor.files
        );
    }
    match anchor.file_count() {
        Some(n) if n <= MAX_FILES_PER_ANCHOR => {}
        _ => anyhow::bail!(
            "anchor {}: more than {} files",
            anchor.name,
            MAX_FILES_PER_ANCHOR
        ),
    }
    if let FileSizes::Weighted(list) = &anchor.sizes {
        validate_weights(list, &format!("anchor {} sizes", anchor.name))?;
    }
    Ok(())
}

/// Weighted lists must be non-empty and sum to 100
fn validate_weights(list: &[SizeWeight], what: &str) -> Result<()> {
    if list.is_empty() {
        anyhow::bail!("{}: list is empty", what);
    }
    if list.iter().any(|e| e.percent < 0.0) {
        anyhow::bail!("{}: negative percentage", what);
    }
    let total: f64 = list.iter().map(|e| e.percent).sum();
    if (total - 100.0).abs() > 0.01 {
        anyhow::bail!("{}: percentages must sum to 100, got {}", what, total);
    }
    Ok(())
}

/// Validate one workload against the anchors of `config`
pub fn validate_workload(workload: &WorkloadConfig, config: &Config) -> Result<()> {
    let name = &workload.name;
    if workload.threads == 0 {
        anyhow::bail!("workload {}: threads must be at least 1", name);
    }
    let anchor = config
        .anchor(&workload.anchor)
        .ok_or_else(|| anyhow::anyhow!("workload {}: unknown anchor {}", name, workload.anchor))?;

    match (workload.operation, &workload.target_anchor) {
        (OperationType::Copy, None) => {
            anyhow::bail!("workload {}: copy needs a target_anchor", name);
        }
        (OperationType::Copy, Some(target_name)) => {
            let target = config.anchor(target_name).ok_or_else(|| {
                anyhow::anyhow!("workload {}: unknown target anchor {}", name, target_name)
            })?;
            if target.name == anchor.name {
                anyhow::bail!("workload {}: copy source and target are the same anchor", name);
            }
            if target.file_count() != anchor.file_count() {
                anyhow::bail!(
                    "workload {}: anchors {} and {} have different file counts",
                    name,
                    anchor.name,
                    target.name
                );
            }
        }
        (_, Some(_)) => {
            anyhow::bail!("workload {}: target_anchor is only used by copy", name);
        }
        (_, None) => {}
    }

    if !(0.0..=100.0).contains(&workload.read_pct) {
        anyhow::bail!(
            "workload {}: read_pct must be between 0 and 100, got {}",
            name,
            workload.read_pct
        );
    }

    match &workload.xfersizes {
        TransferSizes::Fixed(0) => {
            anyhow::bail!("workload {}: transfer size must be at least 1 byte", name);
        }
        TransferSizes::Fixed(_) => {}
        TransferSizes::Weighted(list) => {
            validate_weights(list, &format!("workload {} xfersizes", name))?;
            if list.iter().any(|e| e.size == 0) {
                anyhow::bail!("workload {}: transfer size must be at least 1 byte", name);
            }
        }
    }

    if let Some(stop_after) = workload.stop_after {
        if stop_after == 0 || stop_after < -100 {
            anyhow::bail!(
                "workload {}: stop_after must be a positive block count or a percentage from -1 to -100, got {}",
                name,
                stop_after
            );
        }
    }

    Ok(())
}
