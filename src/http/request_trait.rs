//! Trait abstraction for the non-blocking HTTP request handle, to enable testing

use bytes::Bytes;

use crate::error::Result;

/// Request methods used by the uplink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Progress of the current exchange, mirroring XHR ready states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Nothing opened yet, or aborted
    Unsent,
    /// Opened, headers may be set, not sent
    Opened,
    /// Sent, response not complete
    Loading,
    /// Response complete (or the exchange failed)
    Done,
}

/// Polled HTTP request handle
///
/// One exchange at a time. `open` discards whatever the handle held before.
/// Nothing here may block: `send` starts the exchange and returns, and
/// `ready_state` only observes progress.
pub trait HttpRequest: Send {
    /// Start a new exchange
    fn open(&mut self, method: Method, url: &str) -> Result<()>;

    /// Add a request header; only valid after `open`
    fn set_header(&mut self, name: &str, value: &str);

    /// Send the opened request with an optional body
    fn send(&mut self, body: Option<String>) -> Result<()>;

    /// Observe progress of the exchange
    fn ready_state(&mut self) -> ReadyState;

    /// HTTP status once `Done`; `None` when the exchange failed below HTTP
    fn status(&self) -> Option<u16>;

    /// Response body once `Done`; empty otherwise
    fn body(&self) -> Bytes;

    /// Abandon the current exchange without waiting for it
    fn abort(&mut self);
}
