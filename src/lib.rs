//! # Emon Uplink Library
//!
//! Relay energy-monitor log intervals to EmonCMS, batched and resumable.
//!
//! This library provides the posting state machine, its codec and
//! collaborator seams, and the cooperative scheduler that drives it.

pub mod codec;
pub mod config;
pub mod datalog;
pub mod error;
pub mod http;
pub mod link;
pub mod logging;
pub mod scheduler;
pub mod uplink;
