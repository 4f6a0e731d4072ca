//! # Data Log Module
//!
//! Read-only view of the energy log consumed by the uplink.
//!
//! This module handles:
//! - The [`LogRecord`] snapshot type (timestamp, elapsed hours, channel accumulators)
//! - The [`LogStore`] collaborator trait
//! - An in-memory store ([`MemoryLog`]) and a JSON-lines follower ([`JsonlLog`])

pub mod jsonl;
pub mod memory;

pub use jsonl::{JsonlLog, LogFollower};
pub use memory::MemoryLog;

use serde::{Deserialize, Serialize};

use crate::error::Result;

fn unset() -> f64 {
    f64::NAN
}

/// Cumulative integral of one input channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelAccumulator {
    /// Running value-hours; NaN when the channel was never logged
    #[serde(default = "unset")]
    pub accum1: f64,
}

impl ChannelAccumulator {
    pub fn new(accum1: f64) -> Self {
        Self { accum1 }
    }

    /// Accumulated value with unset (NaN) read as zero
    pub fn value(&self) -> f64 {
        if self.accum1.is_nan() {
            0.0
        } else {
            self.accum1
        }
    }
}

/// Timestamped snapshot of every channel accumulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Unix time of the record, seconds
    pub timestamp: u32,

    /// Cumulative logged hours; NaN when never set
    #[serde(default = "unset")]
    pub elapsed_hours: f64,

    /// One accumulator per input channel, index aligned with the device
    #[serde(default)]
    pub channels: Vec<ChannelAccumulator>,
}

impl LogRecord {
    pub fn new(timestamp: u32, elapsed_hours: f64, accumulators: &[f64]) -> Self {
        Self {
            timestamp,
            elapsed_hours,
            channels: accumulators.iter().copied().map(ChannelAccumulator::new).collect(),
        }
    }

    /// Elapsed hours with unset (NaN) read as zero
    pub fn hours(&self) -> f64 {
        if self.elapsed_hours.is_nan() {
            0.0
        } else {
            self.elapsed_hours
        }
    }

    /// Accumulator of channel `index`, zero for missing or unset channels
    pub fn accum(&self, index: usize) -> f64 {
        self.channels.get(index).map(ChannelAccumulator::value).unwrap_or(0.0)
    }
}

/// Read-only log collaborator
///
/// Implementations must tolerate concurrent reads while a writer appends.
pub trait LogStore: Send + Sync {
    /// True once the log holds at least one record
    fn is_open(&self) -> bool;

    /// Timestamp of the oldest record (0 when empty)
    fn first_key(&self) -> u32;

    /// Timestamp of the newest record (0 when empty)
    fn last_key(&self) -> u32;

    /// Newest record at or before `key`; the oldest record when `key` precedes the log
    fn read_by_key(&self, key: u32) -> Result<LogRecord>;
}
