//! Size, duration and rate formatting
//!
//! Parsing of the human-friendly values accepted on the command line, and the
//! formatting used by the report sinks.

use anyhow::{Context, Result};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Parse a size string (e.g., "4k", "100M", "1g") to bytes
///
/// # Examples
///
/// ```
/// use fspulse::util::time::parse_size;
///
/// assert_eq!(parse_size("4k").unwrap(), 4096);
/// assert_eq!(parse_size("2MB").unwrap(), 2 * 1024 * 1024);
/// assert_eq!(parse_size("512").unwrap(), 512);
/// ```
pub fn parse_size(s: &str) -> Result<u64> {
    let lower = s.trim().to_lowercase();
    let trimmed = lower.strip_suffix('b').unwrap_or(&lower);

    let (num_str, multiplier) = match trimmed.chars().last() {
        Some('k') => (&trimmed[..trimmed.len() - 1], 1024u64),
        Some('m') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('g') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        Some('t') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024 * 1024),
        _ => (trimmed, 1),
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid size format: {}", s))?;

    num.checked_mul(multiplier)
        .with_context(|| format!("Size out of range: {}", s))
}

/// Parse a duration string (e.g., "60s", "5m", "1h") to seconds
pub fn parse_duration(s: &str) -> Result<u64> {
    let lower = s.trim().to_lowercase();

    let (num_str, multiplier) = match lower.chars().last() {
        Some('s') => (&lower[..lower.len() - 1], 1u64),
        Some('m') => (&lower[..lower.len() - 1], 60),
        Some('h') => (&lower[..lower.len() - 1], 3600),
        _ => (lower.as_str(), 1),
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration format: {}", s))?;

    Ok(num * multiplier)
}

/// Wall-clock milliseconds since the Unix epoch
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Format a duration in human-readable form
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fspulse::util::time::format_duration;
///
/// assert_eq!(format_duration(Duration::from_micros(500)), "500us");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(5)), "5.00s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();

    if micros < 1_000 {
        format!("{}us", micros)
    } else if micros < 1_000_000 {
        format!("{:.2}ms", micros as f64 / 1_000.0)
    } else {
        format!("{:.2}s", micros as f64 / 1_000_000.0)
    }
}

/// Format a rate (operations per second)
///
/// # Examples
///
/// ```
/// use fspulse::util::time::format_rate;
///
/// assert_eq!(format_rate(500.0), "500.0");
/// assert_eq!(format_rate(1500.0), "1.50K");
/// assert_eq!(format_rate(2_500_000.0), "2.50M");
/// ```
pub fn format_rate(rate: f64) -> String {
    if rate < 1_000.0 {
        format!("{:.1}", rate)
    } else if rate < 1_000_000.0 {
        format!("{:.2}K", rate / 1_000.0)
    } else {
        format!("{:.2}M", rate / 1_000_000.0)
    }
}
