//! Configuration module
//!
//! Handles the TOML run description, CLI overrides, and validation.

pub mod cli;
pub mod toml;
pub mod validator;

use crate::stats::OperationKind;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Complete run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    pub anchors: Vec<AnchorConfig>,
    pub workloads: Vec<WorkloadConfig>,
}

impl Config {
    /// Look up an anchor by name
    pub fn anchor(&self, name: &str) -> Option<&AnchorConfig> {
        self.anchors.iter().find(|a| a.name == name)
    }

    /// Total number of worker threads over all workloads
    pub fn total_threads(&self) -> usize {
        self.workloads.iter().map(|w| w.threads).sum()
    }
}

/// Run-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Run length in seconds
    #[serde(default = "default_elapsed")]
    pub elapsed: u64,
    /// Reporting interval in seconds
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Sleep after a blocked selection (microseconds, 0 disables)
    #[serde(default = "default_backoff_micros")]
    pub backoff_micros: u64,
    /// Consecutive blocks without progress before a worker gives up with an error
    #[serde(default = "default_max_consecutive_blocks")]
    pub max_consecutive_blocks: u64,
    /// Abort once this many read/write errors have been counted
    #[serde(default)]
    pub max_data_errors: Option<u64>,
    /// Record written blocks in the key map
    #[serde(default)]
    pub validate: bool,
    /// Emit interval reports as JSON lines instead of text
    #[serde(default)]
    pub json_output: bool,
    /// Response histogram bucket bounds in microseconds (default: doubling from 1us)
    #[serde(default)]
    pub histogram_bounds: Option<Vec<u64>>,
    /// Create missing anchor directories before the workers start
    #[serde(default = "default_format_dirs")]
    pub format_dirs: bool,
}

fn default_elapsed() -> u64 {
    30
}

fn default_interval() -> u64 {
    1
}

fn default_backoff_micros() -> u64 {
    200
}

fn default_max_consecutive_blocks() -> u64 {
    10_000
}

fn default_format_dirs() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            elapsed: default_elapsed(),
            interval: default_interval(),
            backoff_micros: default_backoff_micros(),
            max_consecutive_blocks: default_max_consecutive_blocks(),
            max_data_errors: None,
            validate: false,
            json_output: false,
            histogram_bounds: None,
            format_dirs: default_format_dirs(),
        }
    }
}

/// Shape of one managed directory tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorConfig {
    pub name: String,
    /// Root directory of the tree
    pub path: PathBuf,
    /// Directory levels below the root
    #[serde(default = "default_fanout")]
    pub depth: usize,
    /// Subdirectories per directory
    #[serde(default = "default_fanout")]
    pub width: usize,
    /// Files per directory holding files
    pub files: usize,
    /// File size distribution
    #[serde(default)]
    pub sizes: FileSizes,
    /// Which directories hold files
    #[serde(default)]
    pub distribution: FileDistribution,
}

fn default_fanout() -> usize {
    1
}

impl AnchorConfig {
    /// Number of file slots the tree will have, `None` on overflow
    pub fn file_count(&self) -> Option<u64> {
        let width = self.width as u64;
        let mut level = 1u64;
        let mut holding = 0u64;
        for depth in 1..=self.depth {
            level = level.checked_mul(width)?;
            if self.distribution == FileDistribution::All || depth == self.depth {
                holding = holding.checked_add(level)?;
            }
        }
        holding.checked_mul(self.files as u64)
    }
}

/// Size weight pair used by size and transfer size lists
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SizeWeight {
    pub size: u64,
    pub percent: f64,
}

/// Pick a size from a weighted list. Percentages are expected to sum to 100.
fn pick_weighted<R: Rng + ?Sized>(list: &[SizeWeight], rng: &mut R) -> u64 {
    let draw = rng.gen::<f64>() * 100.0;
    let mut cumulative = 0.0;
    for entry in list {
        cumulative += entry.percent;
        if draw < cumulative {
            return entry.size;
        }
    }
    list.last().map(|e| e.size).unwrap_or(0)
}

/// File size distribution of an anchor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FileSizes {
    /// Every file has the same size
    Fixed(u64),
    /// Sizes picked from a weighted list
    Weighted(Vec<SizeWeight>),
    /// Sizes spread uniformly between 1 byte and twice the average
    Variable { average: u64 },
}

impl Default for FileSizes {
    fn default() -> Self {
        Self::Fixed(4096)
    }
}

impl FileSizes {
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        match self {
            FileSizes::Fixed(size) => *size,
            FileSizes::Weighted(list) => pick_weighted(list, rng),
            FileSizes::Variable { average } => {
                if *average == 0 {
                    0
                } else {
                    rng.gen_range(1..=average.saturating_mul(2))
                }
            }
        }
    }

    /// Largest size this distribution can produce
    pub fn max(&self) -> u64 {
        match self {
            FileSizes::Fixed(size) => *size,
            FileSizes::Weighted(list) => list.iter().map(|e| e.size).max().unwrap_or(0),
            FileSizes::Variable { average } => average.saturating_mul(2),
        }
    }
}

/// Which directories of a tree hold files
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileDistribution {
    /// Only the deepest directories
    Bottom,
    /// Every directory
    All,
}

impl Default for FileDistribution {
    fn default() -> Self {
        Self::Bottom
    }
}

/// How files and directories are picked from an anchor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    Random,
    Sequential,
}

impl Default for SelectionMode {
    fn default() -> Self {
        Self::Random
    }
}

/// Operation a workload performs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Read,
    Write,
    Create,
    Delete,
    Mkdir,
    Rmdir,
    Copy,
    Open,
    Close,
    GetAttr,
    SetAttr,
    Access,
    ReadWrite,
}

impl OperationType {
    /// Statistics kind recorded for this operation; mixed read/write records both
    pub fn kind(self) -> Option<OperationKind> {
        match self {
            OperationType::Read => Some(OperationKind::Read),
            OperationType::Write => Some(OperationKind::Write),
            OperationType::Create => Some(OperationKind::Create),
            OperationType::Delete => Some(OperationKind::Delete),
            OperationType::Mkdir => Some(OperationKind::Mkdir),
            OperationType::Rmdir => Some(OperationKind::Rmdir),
            OperationType::Copy => Some(OperationKind::Copy),
            OperationType::Open => Some(OperationKind::Open),
            OperationType::Close => Some(OperationKind::Close),
            OperationType::GetAttr => Some(OperationKind::GetAttr),
            OperationType::SetAttr => Some(OperationKind::SetAttr),
            OperationType::Access => Some(OperationKind::Access),
            OperationType::ReadWrite => None,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "{}", kind),
            None => write!(f, "readwrite"),
        }
    }
}

/// Transfer sizes used by read/write/copy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TransferSizes {
    Fixed(u64),
    Weighted(Vec<SizeWeight>),
}

impl Default for TransferSizes {
    fn default() -> Self {
        Self::Fixed(4096)
    }
}

impl TransferSizes {
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        match self {
            TransferSizes::Fixed(size) => *size,
            TransferSizes::Weighted(list) => pick_weighted(list, rng),
        }
    }

    pub fn max(&self) -> u64 {
        match self {
            TransferSizes::Fixed(size) => *size,
            TransferSizes::Weighted(list) => list.iter().map(|e| e.size).max().unwrap_or(0),
        }
    }
}

/// One group of identical worker threads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub name: String,
    /// Anchor the workload runs against
    pub anchor: String,
    /// Second anchor receiving copies
    #[serde(default)]
    pub target_anchor: Option<String>,
    pub operation: OperationType,
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Sequential (true) or random (false) file I/O
    #[serde(default = "default_sequential")]
    pub sequential: bool,
    /// File and directory selection
    #[serde(default)]
    pub select: SelectionMode,
    /// Sequential selection stops after one pass over the anchor
    #[serde(default)]
    pub select_once: bool,
    #[serde(default)]
    pub xfersizes: TransferSizes,
    /// Read percentage for mixed read/write
    #[serde(default = "default_read_pct")]
    pub read_pct: f64,
    /// Per-file quota: blocks when positive, percent of file size when negative
    #[serde(default)]
    pub stop_after: Option<i64>,
    /// Sequential writes delete an existing file before rewriting it
    #[serde(default)]
    pub delete_before_write: bool,
    /// Create writes the file to its full size instead of closing it empty
    #[serde(default)]
    pub fill_on_create: bool,
}

fn default_threads() -> usize {
    1
}

fn default_sequential() -> bool {
    true
}

fn default_read_pct() -> f64 {
    50.0
}

impl WorkloadConfig {
    /// Minimal workload of one operation against one anchor
    pub fn new(name: &str, anchor: &str, operation: OperationType) -> Self {
        Self {
            name: name.to_string(),
            anchor: anchor.to_string(),
            target_anchor: None,
            operation,
            threads: default_threads(),
            sequential: default_sequential(),
            select: SelectionMode::default(),
            select_once: false,
            xfersizes: TransferSizes::default(),
            read_pct: default_read_pct(),
            stop_after: None,
            delete_before_write: false,
            fill_on_create: false,
        }
    }
}
