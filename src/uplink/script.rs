//! # Derived Outputs
//!
//! Swappable capability that turns per-channel period averages into named
//! output columns. The uplink only needs the column positions and a way to
//! evaluate each output against a channel-delta function.

use crate::config::OutputConfig;

/// Derived-output evaluator
pub trait OutputScript: Send {
    /// Number of outputs
    fn count(&self) -> usize;

    /// 1-based column of output `i` in the posted row; strictly increasing in `i`
    fn index_of(&self, i: usize) -> usize;

    /// Evaluate output `i`; `delta(channel)` yields that channel's period average
    fn evaluate(&self, i: usize, delta: &dyn Fn(usize) -> f64) -> f64;
}

/// Outputs defined as the sum of a set of channels
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSumOutputs {
    outputs: Vec<(usize, Vec<usize>)>,
}

impl ChannelSumOutputs {
    pub fn new(mut outputs: Vec<(usize, Vec<usize>)>) -> Self {
        outputs.sort_by_key(|(index, _)| *index);
        Self { outputs }
    }

    pub fn from_config(outputs: &[OutputConfig]) -> Self {
        Self::new(outputs.iter().map(|o| (o.index, o.channels.clone())).collect())
    }
}

impl OutputScript for ChannelSumOutputs {
    fn count(&self) -> usize {
        self.outputs.len()
    }

    fn index_of(&self, i: usize) -> usize {
        self.outputs[i].0
    }

    fn evaluate(&self, i: usize, delta: &dyn Fn(usize) -> f64) -> f64 {
        self.outputs[i].1.iter().map(|&channel| delta(channel)).sum()
    }
}
