//! # JSON-Lines Log Follower
//!
//! Tails a file holding one [`LogRecord`] per line, as written by the device
//! logger, and exposes it as a [`LogStore`]. Only complete lines are consumed;
//! a partially written trailing line is picked up by the next refresh.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::{LogRecord, LogStore, MemoryLog};
use crate::error::{Result, UplinkError};
use crate::scheduler::{NextWake, Priority, Service};

/// Log store backed by a JSON-lines file
#[derive(Debug)]
pub struct JsonlLog {
    path: PathBuf,
    records: MemoryLog,
    offset: Mutex<u64>,
}

impl JsonlLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            records: MemoryLog::new(),
            offset: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read records appended since the last refresh
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of records added
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or read. A missing file is
    /// not an error; the log simply stays closed.
    pub fn refresh(&self) -> Result<usize> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut offset = self
            .offset
            .lock()
            .map_err(|_| UplinkError::Log("offset lock poisoned".to_string()))?;

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(*offset))?;

        let mut added = 0;
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line)?;
            if read == 0 || line.last() != Some(&b'\n') {
                break;
            }
            *offset += read as u64;

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice::<LogRecord>(&line) {
                Ok(record) => match self.records.append(record) {
                    Ok(()) => added += 1,
                    Err(e) => warn!("Skipping log line: {}", e),
                },
                Err(e) => warn!("Skipping malformed log line in {}: {}", self.path.display(), e),
            }
        }

        if added > 0 {
            debug!("Loaded {} new log records from {}", added, self.path.display());
        }
        Ok(added)
    }
}

impl LogStore for JsonlLog {
    fn is_open(&self) -> bool {
        self.records.is_open()
    }

    fn first_key(&self) -> u32 {
        self.records.first_key()
    }

    /// Picks up complete lines written since the last refresh before answering
    fn last_key(&self) -> u32 {
        if let Err(e) = self.refresh() {
            warn!("Failed to refresh {}: {}", self.path.display(), e);
        }
        self.records.last_key()
    }

    fn read_by_key(&self, key: u32) -> Result<LogRecord> {
        self.records.read_by_key(key)
    }
}

/// High-priority service that keeps a [`JsonlLog`] loaded between uplink reads
///
/// Opens the log as soon as the file appears; uplinks also refresh it
/// through [`LogStore::last_key`] when they check for a new interval.
pub struct LogFollower {
    log: Arc<JsonlLog>,
    period: u32,
}

impl LogFollower {
    pub fn new(log: Arc<JsonlLog>, period: u32) -> Self {
        Self {
            log,
            period: period.max(1),
        }
    }
}

impl Service for LogFollower {
    fn name(&self) -> &str {
        "datalog"
    }

    fn priority(&self) -> Priority {
        Priority::High
    }

    fn step(&mut self, now: u32) -> NextWake {
        if let Err(e) = self.log.refresh() {
            warn!("Failed to refresh {}: {}", self.log.path().display(), e);
        }
        NextWake::At(now + self.period)
    }
}
