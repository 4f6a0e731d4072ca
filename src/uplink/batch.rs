//! # Batch Accumulator
//!
//! Turns the difference between two log snapshots into one row of period
//! averages and appends it to the pending bulk batch.
//!
//! ## Row format
//!
//! ```text
//! time={base}&data=[[dt,"node",v0,v1,...],[dt,"node",v0,v1,...]]
//! ```
//!
//! `base` is the start of the first folded interval and `dt` is each row's
//! posting time relative to it. Each value is
//! `(accum_now - accum_then) / elapsed_hours`.
//!
//! | Column source | Formatting |
//! |---------------|------------|
//! | Voltage channel | one decimal |
//! | Power / other channel | rounded integer |
//! | Unconfigured channel | `null` |
//! | Derived output | `0` inside (-1, 1), else one decimal |
//! | Missing derived column | `null` |

use serde::Deserialize;

use super::script::OutputScript;
use crate::datalog::LogRecord;

/// Batches stop growing past this size once the bulk threshold is met
pub const MAX_BATCH_BYTES: usize = 1000;

/// Physical channel type, selects numeric formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Voltage,
    Power,
    #[default]
    Other,
}

/// Which columns a row carries
pub enum Layout {
    /// Index-aligned with the device channels; `None` for unconfigured inputs
    Channels(Vec<Option<ChannelKind>>),
    /// Sparse derived outputs
    Outputs(Box<dyn OutputScript>),
}

impl std::fmt::Debug for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Layout::Channels(kinds) => f.debug_tuple("Channels").field(kinds).finish(),
            Layout::Outputs(script) => f
                .debug_struct("Outputs")
                .field("count", &script.count())
                .finish_non_exhaustive(),
        }
    }
}

/// The "then" side of a delta: accumulators and hours of the last folded record
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccumulatorSnapshot {
    accum: Vec<f64>,
    elapsed_hours: f64,
}

impl AccumulatorSnapshot {
    /// Copy a record's values, reading unset (NaN) values as zero
    pub fn capture(record: &LogRecord) -> Self {
        Self {
            accum: record.channels.iter().map(|c| c.value()).collect(),
            elapsed_hours: record.hours(),
        }
    }

    pub fn accum(&self, index: usize) -> f64 {
        self.accum.get(index).copied().unwrap_or(0.0)
    }

    pub fn elapsed_hours(&self) -> f64 {
        self.elapsed_hours
    }

    /// Hours between this snapshot and `record`
    pub fn elapsed_until(&self, record: &LogRecord) -> f64 {
        record.hours() - self.elapsed_hours
    }
}

fn format_channel(kind: ChannelKind, value: f64) -> String {
    if !value.is_finite() {
        return "null".to_string();
    }
    match kind {
        ChannelKind::Voltage => format!("{:.1}", value),
        ChannelKind::Power | ChannelKind::Other => format!("{}", value.round() as i64),
    }
}

fn format_output(value: f64) -> String {
    if !value.is_finite() {
        "null".to_string()
    } else if value > -1.0 && value < 1.0 {
        "0".to_string()
    } else {
        format!("{:.1}", value)
    }
}

/// Serialize one row of period averages, comma separated
///
/// # Arguments
///
/// * `layout` - Channel or derived-output columns
/// * `then` - Snapshot of the previously folded record
/// * `now` - Record closing this interval
/// * `elapsed_hours` - Non-zero hours between the two
pub fn format_values(layout: &Layout, then: &AccumulatorSnapshot, now: &LogRecord, elapsed_hours: f64) -> String {
    let delta = |channel: usize| (now.accum(channel) - then.accum(channel)) / elapsed_hours;

    let columns: Vec<String> = match layout {
        Layout::Channels(kinds) => kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| match kind {
                Some(kind) => format_channel(*kind, delta(i)),
                None => "null".to_string(),
            })
            .collect(),
        Layout::Outputs(script) => {
            let mut columns = Vec::with_capacity(script.count());
            for i in 0..script.count() {
                let column = script.index_of(i);
                while columns.len() + 1 < column {
                    columns.push("null".to_string());
                }
                columns.push(format_output(script.evaluate(i, &delta)));
            }
            columns
        }
    };

    columns.join(",")
}

/// Bulk request body under construction
///
/// The body is always well formed: the closing bracket is rewritten on every
/// append rather than added at send time.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBatch {
    base_timestamp: u32,
    entries: u32,
    body: String,
}

impl PendingBatch {
    /// Empty batch whose rows are relative to `base_timestamp`
    pub fn open(base_timestamp: u32) -> Self {
        Self {
            base_timestamp,
            entries: 0,
            body: format!("time={}&data=[]", base_timestamp),
        }
    }

    /// Append one row
    ///
    /// # Arguments
    ///
    /// * `timestamp` - Posting time of the row
    /// * `node` - Node field, already JSON quoted
    /// * `values` - Output of [`format_values`]
    pub fn push(&mut self, timestamp: u32, node: &str, values: &str) {
        self.body.pop();
        if self.entries > 0 {
            self.body.push(',');
        }

        let dt = timestamp.saturating_sub(self.base_timestamp);
        self.body.push('[');
        self.body.push_str(&dt.to_string());
        self.body.push(',');
        self.body.push_str(node);
        if !values.is_empty() {
            self.body.push(',');
            self.body.push_str(values);
        }
        self.body.push_str("]]");

        self.entries += 1;
    }

    pub fn base_timestamp(&self) -> u32 {
        self.base_timestamp
    }

    pub fn entries_count(&self) -> u32 {
        self.entries
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn approx_byte_length(&self) -> usize {
        self.body.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uplink::script::ChannelSumOutputs;

    const NODE: &str = "\"5\"";

    #[test]
    fn test_single_power_channel_average() {
        let then = AccumulatorSnapshot::capture(&LogRecord::new(0, 0.0, &[0.0]));
        let now = LogRecord::new(300, 300.0 / 3600.0, &[150.0]);
        let layout = Layout::Channels(vec![Some(ChannelKind::Power)]);

        let elapsed = then.elapsed_until(&now);
        let values = format_values(&layout, &then, &now, elapsed);
        assert_eq!(values, "1800");

        let mut batch = PendingBatch::open(0);
        batch.push(300, NODE, &values);
        assert_eq!(batch.body(), "time=0&data=[[300,\"5\",1800]]");
        assert_eq!(batch.entries_count(), 1);
    }

    #[test]
    fn test_channel_kinds_formatting() {
        let then = AccumulatorSnapshot::capture(&LogRecord::new(0, 1.0, &[100.0, 0.0, 0.0, 5.0]));
        let now = LogRecord::new(10, 2.0, &[340.66, 1234.5, 99.4, 7.0]);
        let layout = Layout::Channels(vec![
            Some(ChannelKind::Voltage),
            Some(ChannelKind::Power),
            Some(ChannelKind::Other),
            None,
        ]);

        let values = format_values(&layout, &then, &now, 1.0);
        assert_eq!(values, "240.7,1235,99,null");
    }

    #[test]
    fn test_negative_power_rounds() {
        let then = AccumulatorSnapshot::capture(&LogRecord::new(0, 0.0, &[0.0]));
        let now = LogRecord::new(10, 1.0, &[-3.7]);
        let layout = Layout::Channels(vec![Some(ChannelKind::Power)]);

        assert_eq!(format_values(&layout, &then, &now, 1.0), "-4");
    }

    #[test]
    fn test_unset_accumulators_read_as_zero() {
        let then = AccumulatorSnapshot::capture(&LogRecord::new(0, f64::NAN, &[f64::NAN]));
        assert_eq!(then.accum(0), 0.0);
        assert_eq!(then.elapsed_hours(), 0.0);

        let now = LogRecord::new(10, 0.5, &[50.0]);
        let layout = Layout::Channels(vec![Some(ChannelKind::Power)]);
        assert_eq!(format_values(&layout, &then, &now, then.elapsed_until(&now)), "100");
    }

    #[test]
    fn test_channel_missing_from_record() {
        let then = AccumulatorSnapshot::capture(&LogRecord::new(0, 0.0, &[0.0]));
        let now = LogRecord::new(10, 1.0, &[10.0]);
        let layout = Layout::Channels(vec![Some(ChannelKind::Power), Some(ChannelKind::Voltage)]);

        assert_eq!(format_values(&layout, &then, &now, 1.0), "10,0.0");
    }

    #[test]
    fn test_derived_outputs_fill_gaps_and_snap_noise() {
        let then = AccumulatorSnapshot::capture(&LogRecord::new(0, 0.0, &[0.0, 0.0, 0.0]));
        let now = LogRecord::new(10, 1.0, &[0.4, 500.0, 25.3]);
        let script = ChannelSumOutputs::new(vec![(1, vec![0]), (3, vec![1, 2]), (4, vec![2])]);
        let layout = Layout::Outputs(Box::new(script));

        assert_eq!(format_values(&layout, &then, &now, 1.0), "0,null,525.3,25.3");
    }

    #[test]
    fn test_derived_output_leading_gap() {
        let then = AccumulatorSnapshot::capture(&LogRecord::new(0, 0.0, &[0.0]));
        let now = LogRecord::new(10, 1.0, &[-2.0]);
        let layout = Layout::Outputs(Box::new(ChannelSumOutputs::new(vec![(3, vec![0])])));

        assert_eq!(format_values(&layout, &then, &now, 1.0), "null,null,-2.0");
    }

    #[test]
    fn test_batch_rows_relative_to_base() {
        let mut batch = PendingBatch::open(1_000);
        batch.push(1_010, NODE, "1,2");
        batch.push(1_020, NODE, "3,4");

        assert_eq!(batch.base_timestamp(), 1_000);
        assert_eq!(batch.entries_count(), 2);
        assert_eq!(
            batch.body(),
            "time=1000&data=[[10,\"5\",1,2],[20,\"5\",3,4]]"
        );
        assert_eq!(batch.approx_byte_length(), batch.body().len());
    }

    #[test]
    fn test_row_without_columns() {
        let mut batch = PendingBatch::open(0);
        batch.push(10, NODE, "");
        assert_eq!(batch.body(), "time=0&data=[[10,\"5\"]]");
    }

    #[test]
    fn test_layout_debug() {
        let layout = Layout::Outputs(Box::new(ChannelSumOutputs::new(vec![(1, vec![0])])));
        assert!(format!("{:?}", layout).contains("count: 1"));
    }
}
