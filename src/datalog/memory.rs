//! In-memory log store keyed by timestamp.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{LogRecord, LogStore};
use crate::error::{Result, UplinkError};

/// Append-only record map shared between one writer and any number of readers
#[derive(Debug, Default)]
pub struct MemoryLog {
    records: RwLock<BTreeMap<u32, LogRecord>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from records in any order
    pub fn from_records<I: IntoIterator<Item = LogRecord>>(records: I) -> Self {
        let map = records.into_iter().map(|r| (r.timestamp, r)).collect();
        Self {
            records: RwLock::new(map),
        }
    }

    /// Append a record newer than every record already held
    ///
    /// # Errors
    ///
    /// Returns [`UplinkError::Log`] if the timestamp does not advance the log
    pub fn append(&self, record: LogRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| UplinkError::Log("log lock poisoned".to_string()))?;

        if let Some((&last, _)) = records.iter().next_back() {
            if record.timestamp <= last {
                return Err(UplinkError::Log(format!(
                    "record at {} does not follow last key {}",
                    record.timestamp, last
                )));
            }
        }

        records.insert(record.timestamp, record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogStore for MemoryLog {
    fn is_open(&self) -> bool {
        !self.is_empty()
    }

    fn first_key(&self) -> u32 {
        self.records
            .read()
            .ok()
            .and_then(|r| r.keys().next().copied())
            .unwrap_or(0)
    }

    fn last_key(&self) -> u32 {
        self.records
            .read()
            .ok()
            .and_then(|r| r.keys().next_back().copied())
            .unwrap_or(0)
    }

    fn read_by_key(&self, key: u32) -> Result<LogRecord> {
        let records = self
            .records
            .read()
            .map_err(|_| UplinkError::Log("log lock poisoned".to_string()))?;

        records
            .range(..=key)
            .next_back()
            .or_else(|| records.iter().next())
            .map(|(_, record)| record.clone())
            .ok_or_else(|| UplinkError::Log("log is empty".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryLog {
        MemoryLog::from_records([
            LogRecord::new(600, 0.1, &[2.0]),
            LogRecord::new(0, 0.0, &[0.0]),
            LogRecord::new(300, 0.05, &[1.0]),
        ])
    }

    #[test]
    fn test_empty_log_is_closed() {
        let log = MemoryLog::new();
        assert!(!log.is_open());
        assert_eq!(log.first_key(), 0);
        assert_eq!(log.last_key(), 0);
        assert!(log.read_by_key(100).is_err());
    }

    #[test]
    fn test_keys_are_ordered() {
        let log = sample();
        assert!(log.is_open());
        assert_eq!(log.first_key(), 0);
        assert_eq!(log.last_key(), 600);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_read_exact_key() {
        let log = sample();
        assert_eq!(log.read_by_key(300).unwrap().timestamp, 300);
    }

    #[test]
    fn test_read_between_keys_returns_previous() {
        let log = sample();
        assert_eq!(log.read_by_key(450).unwrap().timestamp, 300);
        assert_eq!(log.read_by_key(9999).unwrap().timestamp, 600);
    }

    #[test]
    fn test_read_before_first_key_returns_first() {
        let log = MemoryLog::from_records([LogRecord::new(1000, 1.0, &[5.0])]);
        assert_eq!(log.read_by_key(10).unwrap().timestamp, 1000);
    }

    #[test]
    fn test_append_must_advance() {
        let log = sample();
        assert!(log.append(LogRecord::new(600, 0.2, &[3.0])).is_err());
        assert!(log.append(LogRecord::new(900, 0.2, &[3.0])).is_ok());
        assert_eq!(log.last_key(), 900);
    }
}
