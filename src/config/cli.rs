//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Operation for quick runs and `--operation` overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OperationArg {
    Read,
    Write,
    Create,
    Delete,
    Mkdir,
    Rmdir,
    Copy,
    Open,
    Close,
    Getattr,
    Setattr,
    Access,
    /// Mixed read/write, see --read-pct
    Readwrite,
}

/// FSPulse - concurrent filesystem workload engine
#[derive(Parser, Debug)]
#[command(name = "fspulse")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML run description
    #[arg(short = 'c', long, env = "FSPULSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Anchor root directory
    ///
    /// Required without --config; with --config it replaces the path of the
    /// first anchor.
    #[arg(value_name = "PATH")]
    pub path: Option<PathBuf>,

    // === Workload Options ===
    /// Operation every workload performs
    #[arg(short = 'o', long, value_enum)]
    pub operation: Option<OperationArg>,

    /// Threads per workload
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Transfer size (e.g., 4k, 64k, 1M)
    #[arg(short = 'x', long)]
    pub xfersize: Option<String>,

    /// Sequential file I/O (true) or random offsets (false)
    #[arg(long)]
    pub sequential: Option<bool>,

    /// Read percentage for readwrite workloads (0-100)
    #[arg(long)]
    pub read_pct: Option<f64>,

    // === Namespace Options ===
    /// Directory levels below the anchor root
    #[arg(long)]
    pub depth: Option<usize>,

    /// Subdirectories per directory
    #[arg(long)]
    pub width: Option<usize>,

    /// Files per leaf directory
    #[arg(long)]
    pub files: Option<usize>,

    /// File size (e.g., 4k, 1M)
    #[arg(short = 's', long)]
    pub size: Option<String>,

    // === Run Options ===
    /// Run length (e.g., 30s, 5m)
    #[arg(short = 'e', long)]
    pub elapsed: Option<String>,

    /// Reporting interval (e.g., 1s, 5s)
    #[arg(short = 'i', long)]
    pub interval: Option<String>,

    /// Print interval reports as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    pub dry_run: bool,

    /// Debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Checks that need no configuration file
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.config.is_none() && self.path.is_none() {
            anyhow::bail!("either --config or an anchor PATH is required");
        }
        if self.threads == Some(0) {
            anyhow::bail!("threads must be at least 1");
        }
        if let Some(pct) = self.read_pct {
            if !(0.0..=100.0).contains(&pct) {
                anyhow::bail!("read_pct must be between 0 and 100");
            }
        }
        if self.operation == Some(OperationArg::Copy) && self.config.is_none() {
            anyhow::bail!("copy needs a target anchor, which only a --config file can describe");
        }
        Ok(())
    }
}
