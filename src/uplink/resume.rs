//! # Resume Protocol
//!
//! Works out where posting should restart from the remote `input/get`
//! listing and the range of records held locally.
//!
//! The listing is parsed as JSON and every `time` field at any depth is
//! considered. Anything that is not a recognisable listing is an error so
//! the caller retries the query instead of guessing a resume point.

use serde_json::Value;

use super::cursor::floor_boundary;
use crate::error::{Result, UplinkError};

const NODE_MISSING: &str = "\"Node does not exist\"";

/// What the remote knows about this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteProgress {
    /// Node has never posted
    NodeMissing,
    /// Node exists but reports no input times
    NoInputs,
    /// Latest input time the remote holds
    LastPosted(u32),
}

/// Classify an `input/get` response body
///
/// # Errors
///
/// Returns [`UplinkError::Protocol`] for bodies that are not UTF-8, not JSON,
/// carry `"success": false`, or are a bare scalar other than the missing-node
/// message
pub fn parse_input_listing(body: &[u8]) -> Result<RemoteProgress> {
    let text = std::str::from_utf8(body)
        .map_err(|_| UplinkError::Protocol("input listing is not UTF-8".to_string()))?
        .trim();

    if text.starts_with(NODE_MISSING) {
        return Ok(RemoteProgress::NodeMissing);
    }

    let value: Value = serde_json::from_str(text)
        .map_err(|e| UplinkError::Protocol(format!("malformed input listing: {}", e)))?;

    match &value {
        Value::Object(map) if map.get("success") == Some(&Value::Bool(false)) => {
            let message = map.get("message").and_then(Value::as_str).unwrap_or("no message");
            Err(UplinkError::Protocol(format!("input listing refused: {}", message)))
        }
        Value::Object(_) | Value::Array(_) => {
            let mut latest = None;
            collect_times(&value, &mut latest);
            Ok(latest.map_or(RemoteProgress::NoInputs, RemoteProgress::LastPosted))
        }
        other => Err(UplinkError::Protocol(format!("unexpected input listing: {}", other))),
    }
}

fn collect_times(value: &Value, latest: &mut Option<u32>) {
    match value {
        Value::Object(map) => {
            for (key, item) in map {
                if key == "time" {
                    if let Some(t) = as_time(item) {
                        *latest = Some(latest.map_or(t, |l| l.max(t)));
                    }
                } else {
                    collect_times(item, latest);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_times(item, latest)),
        _ => {}
    }
}

fn as_time(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
            .and_then(|t| u32::try_from(t).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

/// Pick the log key to resume from
///
/// # Arguments
///
/// * `progress` - Parsed remote state
/// * `now` - Current time
/// * `interval` - Posting interval, seconds
/// * `first_key` / `last_key` - Range of records held locally
pub fn resume_point(progress: RemoteProgress, now: u32, interval: u32, first_key: u32, last_key: u32) -> u32 {
    match progress {
        RemoteProgress::NodeMissing => floor_boundary(now, interval),
        RemoteProgress::NoInputs => last_key,
        RemoteProgress::LastPosted(t) => t.clamp(first_key, last_key.max(first_key)),
    }
}
