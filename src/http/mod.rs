//! # HTTP Module
//!
//! Non-blocking HTTP request handle for the uplink state machine.
//!
//! This module handles:
//! - The polled [`HttpRequest`] collaborator trait
//! - A reqwest-backed implementation that runs each exchange as a tokio task
//! - Collecting the response through a oneshot channel without ever awaiting it

pub mod request_trait;

pub use request_trait::{HttpRequest, Method, ReadyState};

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, UplinkError};

/// Completed exchange as seen by the state machine
#[derive(Debug, Clone, Default)]
struct Outcome {
    status: Option<u16>,
    body: Bytes,
}

struct Opened {
    method: Method,
    url: String,
    headers: HeaderMap,
}

struct InFlight {
    rx: oneshot::Receiver<Outcome>,
    task: JoinHandle<()>,
}

/// [`HttpRequest`] backed by `reqwest` on the current tokio runtime
///
/// `send` spawns the exchange and returns at once; `ready_state` checks the
/// oneshot receiver with `try_recv`. Timeouts surface as `Done` with no status.
pub struct AsyncHttpRequest {
    client: reqwest::Client,
    runtime: Handle,
    opened: Option<Opened>,
    in_flight: Option<InFlight>,
    outcome: Option<Outcome>,
}

impl std::fmt::Debug for AsyncHttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncHttpRequest")
            .field("in_flight", &self.in_flight.is_some())
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

impl AsyncHttpRequest {
    /// Create a handle bound to the current tokio runtime
    ///
    /// # Arguments
    ///
    /// * `timeout` - Whole-exchange timeout for each request
    ///
    /// # Errors
    ///
    /// Returns error if called outside a tokio runtime or the client cannot be built
    pub fn new(timeout: Duration) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| UplinkError::Http(format!("No tokio runtime for HTTP requests: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UplinkError::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            runtime,
            opened: None,
            in_flight: None,
            outcome: None,
        })
    }

    fn cancel(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.task.abort();
        }
        self.opened = None;
        self.outcome = None;
    }
}

impl HttpRequest for AsyncHttpRequest {
    fn open(&mut self, method: Method, url: &str) -> Result<()> {
        self.cancel();
        reqwest::Url::parse(url).map_err(|e| UplinkError::Http(format!("Invalid URL {}: {}", url, e)))?;

        self.opened = Some(Opened {
            method,
            url: url.to_string(),
            headers: HeaderMap::new(),
        });
        Ok(())
    }

    fn set_header(&mut self, name: &str, value: &str) {
        let Some(opened) = self.opened.as_mut() else {
            warn!("Header {} set before open, ignored", name);
            return;
        };

        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                opened.headers.insert(name, value);
            }
            _ => warn!("Invalid header {}, ignored", name),
        }
    }

    fn send(&mut self, body: Option<String>) -> Result<()> {
        let opened = self
            .opened
            .take()
            .ok_or_else(|| UplinkError::Http("send called before open".to_string()))?;

        let method = match opened.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, &opened.url).headers(opened.headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let (tx, rx) = oneshot::channel();
        let url = opened.url;
        let task = self.runtime.spawn(async move {
            let outcome = match builder.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    match response.bytes().await {
                        Ok(body) => Outcome {
                            status: Some(status),
                            body,
                        },
                        Err(e) => {
                            debug!("Failed to read response from {}: {}", url, e);
                            Outcome::default()
                        }
                    }
                }
                Err(e) => {
                    debug!("Request to {} failed: {}", url, e);
                    Outcome::default()
                }
            };
            // Receiver is gone when the exchange was abandoned
            let _ = tx.send(outcome);
        });

        self.in_flight = Some(InFlight { rx, task });
        Ok(())
    }

    fn ready_state(&mut self) -> ReadyState {
        if self.outcome.is_some() {
            return ReadyState::Done;
        }

        let Some(in_flight) = self.in_flight.as_mut() else {
            return if self.opened.is_some() {
                ReadyState::Opened
            } else {
                ReadyState::Unsent
            };
        };

        match in_flight.rx.try_recv() {
            Ok(outcome) => {
                self.outcome = Some(outcome);
                self.in_flight = None;
                ReadyState::Done
            }
            Err(oneshot::error::TryRecvError::Empty) => ReadyState::Loading,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.outcome = Some(Outcome::default());
                self.in_flight = None;
                ReadyState::Done
            }
        }
    }

    fn status(&self) -> Option<u16> {
        self.outcome.as_ref().and_then(|o| o.status)
    }

    fn body(&self) -> Bytes {
        self.outcome.as_ref().map(|o| o.body.clone()).unwrap_or_default()
    }

    fn abort(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_outside_runtime_fails() {
        let result = AsyncHttpRequest::new(Duration::from_secs(1));
        assert!(matches!(result, Err(UplinkError::Http(_))));
    }

    #[tokio::test]
    async fn test_states_before_send() {
        let mut request = AsyncHttpRequest::new(Duration::from_secs(1)).unwrap();
        assert_eq!(request.ready_state(), ReadyState::Unsent);

        request.open(Method::Get, "http://127.0.0.1:9/input/get?node=1").unwrap();
        request.set_header("Authorization", "Bearer abc");
        assert_eq!(request.ready_state(), ReadyState::Opened);

        request.abort();
        assert_eq!(request.ready_state(), ReadyState::Unsent);
        assert_eq!(request.status(), None);
        assert!(request.body().is_empty());
    }

    #[tokio::test]
    async fn test_open_rejects_bad_url() {
        let mut request = AsyncHttpRequest::new(Duration::from_secs(1)).unwrap();
        assert!(request.open(Method::Post, "not a url").is_err());
    }

    #[tokio::test]
    async fn test_send_without_open_fails() {
        let mut request = AsyncHttpRequest::new(Duration::from_secs(1)).unwrap();
        assert!(request.send(None).is_err());
    }

    #[tokio::test]
    async fn test_refused_connection_completes_without_status() {
        let mut request = AsyncHttpRequest::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) is closed on any sane test host
        request.open(Method::Get, "http://127.0.0.1:9/").unwrap();
        request.send(None).unwrap();

        let mut state = request.ready_state();
        for _ in 0..100 {
            if state == ReadyState::Done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            state = request.ready_state();
        }

        assert_eq!(state, ReadyState::Done);
        assert_eq!(request.status(), None);
    }
}
