//! Timing and formatting helpers

pub mod fast_time;
pub mod time;
