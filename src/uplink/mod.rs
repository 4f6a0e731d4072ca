//! # EmonCMS Uplink
//!
//! Relays energy-log intervals to an EmonCMS `input/bulk` endpoint.
//!
//! ## Pipeline
//!
//! 1. **Resume**: ask the remote for its latest input time and pick the
//!    matching local record ([`resume`])
//! 2. **Accumulate**: fold one interval at a time into a bulk batch
//!    ([`batch`])
//! 3. **Seal**: in secure mode, encrypt and sign the batch ([`secure`])
//! 4. **Send**: post and check the acknowledgement, retrying the unchanged
//!    batch until it is accepted ([`service`])
//!
//! Each configured endpoint runs as its own [`EmonUplink`] instance.

pub mod batch;
pub mod cursor;
pub mod resume;
pub mod script;
pub mod secure;
pub mod service;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use batch::{AccumulatorSnapshot, ChannelKind, Layout, PendingBatch, MAX_BATCH_BYTES};
pub use cursor::PostingCursor;
pub use resume::RemoteProgress;
pub use script::{ChannelSumOutputs, OutputScript};
pub use secure::SecureEnvelope;
pub use service::{EmonUplink, State};

use crate::codec::AES_KEY_SIZE;
use crate::config::{TransportMode, UplinkConfig};
use crate::error::Result;

/// External stop and re-initialize signals for one uplink
///
/// Cloned handles share the same flags; the uplink checks them at the top of
/// every step.
#[derive(Debug, Clone, Default)]
pub struct ServiceControl {
    stop: Arc<AtomicBool>,
    reinitialize: Arc<AtomicBool>,
}

impl ServiceControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Halt the uplink and drop all in-flight work
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Lift a previous [`stop`](Self::stop)
    pub fn start(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    /// Drop in-flight work and resync on the next step
    pub fn reinitialize(&self) {
        self.reinitialize.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Consume a pending re-initialize request
    pub fn take_reinitialize(&self) -> bool {
        self.reinitialize.swap(false, Ordering::SeqCst)
    }
}

/// How batches travel to the endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Plain,
    Secure {
        username: String,
        key: [u8; AES_KEY_SIZE],
    },
}

impl Transport {
    pub fn label(&self) -> &'static str {
        match self {
            Transport::Plain => "plain",
            Transport::Secure { .. } => "secure",
        }
    }
}

/// Immutable settings of one uplink instance
#[derive(Debug)]
pub struct UplinkSettings {
    pub name: String,
    /// Base URL without trailing slash
    pub url: String,
    pub node: String,
    pub api_key: String,
    /// Posting interval, seconds
    pub interval: u32,
    /// Minimum rows per request
    pub bulk_send: u32,
    pub transport: Transport,
    pub layout: Layout,
}

impl UplinkSettings {
    /// Build settings from a validated `[[uplink]]` section
    ///
    /// Derived outputs replace the channel layout when any are configured.
    ///
    /// # Errors
    ///
    /// Returns error if secure mode is selected and the key does not decode
    pub fn from_config(config: &UplinkConfig, channels: Vec<Option<ChannelKind>>) -> Result<Self> {
        let transport = match config.transport {
            TransportMode::Plain => Transport::Plain,
            TransportMode::Secure => Transport::Secure {
                username: config.username.clone(),
                key: config.crypto_key_bytes()?,
            },
        };

        let layout = if config.outputs.is_empty() {
            Layout::Channels(channels)
        } else {
            Layout::Outputs(Box::new(ChannelSumOutputs::from_config(&config.outputs)))
        };

        Ok(Self {
            name: config.name.clone(),
            url: config.url.trim_end_matches('/').to_string(),
            node: config.node.clone(),
            api_key: config.api_key.clone(),
            interval: config.interval_s,
            bulk_send: config.bulk_send,
            transport,
            layout,
        })
    }
}
