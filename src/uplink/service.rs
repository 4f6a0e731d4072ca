//! # Posting State Machine
//!
//! One [`EmonUplink`] per endpoint. Every call to [`Service::step`] inspects
//! the request handle, makes one bounded step of progress and returns when it
//! wants to run again. Nothing here blocks.
//!
//! ## States
//!
//! ```text
//! Initialize -> SyncQuery -> SyncWait -> Accumulate -> [SecurePrep] -> Send -> WaitResponse
//!                  ^             |           ^                          ^           |
//!                  +-- failure --+           +------- accepted ---------+-- failed -+
//! ```
//!
//! A rejected batch is resent unchanged. Secure retries go back through
//! `SecurePrep` so every attempt carries a fresh IV.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::batch::{format_values, AccumulatorSnapshot, PendingBatch, MAX_BATCH_BYTES};
use super::cursor::{floor_boundary, PostingCursor};
use super::resume::{parse_input_listing, resume_point};
use super::secure::SecureEnvelope;
use super::{ServiceControl, Transport, UplinkSettings};
use crate::datalog::LogStore;
use crate::error::{Result, UplinkError};
use crate::http::{HttpRequest, Method, ReadyState};
use crate::link::Connectivity;
use crate::scheduler::{NextWake, Priority, Service};

/// Seconds to wait for the log store to open
const LOG_WAIT_SECS: u32 = 5;

/// Seconds between polls of pending I/O and connectivity
const POLL_SECS: u32 = 1;

/// Seconds before retrying a failed resume query
const SYNC_RETRY_SECS: u32 = 5;

/// Failures between retry log messages
const RETRY_LOG_EVERY: u32 = 10;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const SECURE_CONTENT_TYPE: &str = "aes128cbc";

/// Position in the posting cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initialize,
    SyncQuery,
    SyncWait,
    Accumulate,
    SecurePrep,
    Send,
    WaitResponse,
}

/// Consecutive failed post attempts; retries are never bounded
#[derive(Debug, Default)]
struct RetryState {
    count: u32,
}

impl RetryState {
    fn record(&mut self, uplink: &str, reason: &str) {
        self.count += 1;
        debug!("{}: post attempt failed: {}", uplink, reason);
        if self.count % RETRY_LOG_EVERY == 0 {
            warn!("{}: {} consecutive post failures, last: {}", uplink, self.count, reason);
        }
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// Posting service for one EmonCMS endpoint
pub struct EmonUplink {
    settings: UplinkSettings,
    /// JSON-quoted node, as written in every row
    node_field: String,
    log: Arc<dyn LogStore>,
    request: Box<dyn HttpRequest>,
    link: Box<dyn Connectivity>,
    control: ServiceControl,
    state: State,
    priority: Priority,
    halted: bool,
    cursor: PostingCursor,
    snapshot: AccumulatorSnapshot,
    batch: Option<PendingBatch>,
    envelope: Option<SecureEnvelope>,
    retry: RetryState,
}

impl EmonUplink {
    /// Create an uplink in `Initialize`
    ///
    /// # Arguments
    ///
    /// * `settings` - Endpoint, credentials and row layout
    /// * `log` - Energy log to read intervals from
    /// * `request` - Request handle reused for every exchange
    /// * `link` - Connectivity status
    pub fn new(
        settings: UplinkSettings,
        log: Arc<dyn LogStore>,
        request: Box<dyn HttpRequest>,
        link: Box<dyn Connectivity>,
    ) -> Self {
        let node_field = serde_json::Value::String(settings.node.clone()).to_string();
        let cursor = PostingCursor::resume_from(0, settings.interval);

        Self {
            settings,
            node_field,
            log,
            request,
            link,
            control: ServiceControl::new(),
            state: State::Initialize,
            priority: Priority::High,
            halted: false,
            cursor,
            snapshot: AccumulatorSnapshot::default(),
            batch: None,
            envelope: None,
            retry: RetryState::default(),
        }
    }

    /// Handle for stopping or re-initializing this uplink from elsewhere
    pub fn control(&self) -> ServiceControl {
        self.control.clone()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry.count
    }

    pub fn cursor(&self) -> &PostingCursor {
        &self.cursor
    }

    pub fn pending_batch(&self) -> Option<&PendingBatch> {
        self.batch.as_ref()
    }

    /// Drop all progress and go back to `Initialize`
    fn reset(&mut self) {
        if matches!(self.state, State::SyncWait | State::WaitResponse) {
            self.request.abort();
        }
        self.state = State::Initialize;
        self.priority = Priority::High;
        self.cursor = PostingCursor::resume_from(0, self.settings.interval);
        self.snapshot = AccumulatorSnapshot::default();
        self.batch = None;
        self.envelope = None;
        self.retry.reset();
    }

    fn open_and_send(&mut self, method: Method, url: &str, headers: &[(&str, &str)], body: Option<String>) -> Result<()> {
        self.request.open(method, url)?;
        for (name, value) in headers {
            self.request.set_header(name, value);
        }
        self.request.send(body)
    }

    fn initialize(&mut self, now: u32) -> NextWake {
        if !self.log.is_open() {
            return NextWake::At(now + LOG_WAIT_SECS);
        }

        info!(
            "{}: started, url: {}, node: {}, interval: {}s, transport: {}",
            self.settings.name,
            self.settings.url,
            self.settings.node,
            self.settings.interval,
            self.settings.transport.label()
        );
        self.state = State::SyncQuery;
        self.sync_query(now)
    }

    fn sync_query(&mut self, now: u32) -> NextWake {
        if !self.link.is_connected() {
            return NextWake::At(now + POLL_SECS);
        }

        let url = format!("{}/input/get?node={}", self.settings.url, self.settings.node);
        let auth = format!("Bearer {}", self.settings.api_key);
        match self.open_and_send(Method::Get, &url, &[("Authorization", auth.as_str())], None) {
            Ok(()) => {
                self.state = State::SyncWait;
                NextWake::Soon
            }
            Err(e) => {
                warn!("{}: input list request failed: {}", self.settings.name, e);
                NextWake::At(now + SYNC_RETRY_SECS)
            }
        }
    }

    fn sync_wait(&mut self, now: u32) -> NextWake {
        if self.request.ready_state() != ReadyState::Done {
            return NextWake::At(now + POLL_SECS);
        }

        match self.resume(now) {
            Ok(next) => {
                self.priority = Priority::Low;
                self.state = State::Accumulate;
                NextWake::At(next)
            }
            Err(e) => {
                warn!("{}: get input list failed: {}", self.settings.name, e);
                self.state = State::SyncQuery;
                NextWake::At(now + SYNC_RETRY_SECS)
            }
        }
    }

    /// Position the cursor from the completed `input/get` exchange
    fn resume(&mut self, now: u32) -> Result<u32> {
        match self.request.status() {
            Some(200) => {}
            Some(code) => return Err(UplinkError::Http(format!("status {}", code))),
            None => return Err(UplinkError::Http("no response".to_string())),
        }

        let progress = parse_input_listing(&self.request.body())?;
        let key = resume_point(
            progress,
            now,
            self.settings.interval,
            self.log.first_key(),
            self.log.last_key(),
        );
        let record = self.log.read_by_key(key)?;

        self.snapshot = AccumulatorSnapshot::capture(&record);
        self.cursor = PostingCursor::resume_from(record.timestamp, self.settings.interval);
        info!(
            "{}: remote reports {:?}, start posting at {}",
            self.settings.name,
            progress,
            self.cursor.next_posting()
        );
        Ok(self.cursor.next_posting())
    }

    fn accumulate(&mut self, now: u32) -> NextWake {
        if !self.link.is_connected() {
            return NextWake::At(now + POLL_SECS);
        }

        let next = self.cursor.next_posting();
        if self.log.last_key() < next {
            // The record for the current boundary may still be on its way
            if next >= floor_boundary(now, self.settings.interval) {
                return NextWake::At(next.max(now + POLL_SECS));
            }
            self.cursor.realign(now);
            return NextWake::At(self.cursor.next_posting());
        }

        let record = match self.log.read_by_key(self.cursor.next_posting()) {
            Ok(record) => record,
            Err(e) => {
                warn!("{}: log read failed: {}", self.settings.name, e);
                return NextWake::At(now + LOG_WAIT_SECS);
            }
        };

        let elapsed = self.snapshot.elapsed_until(&record);
        if elapsed == 0.0 {
            self.cursor.skip();
            return NextWake::At(self.cursor.next_posting());
        }

        let values = format_values(&self.settings.layout, &self.snapshot, &record, elapsed);
        let base = self.cursor.interval_start();
        self.batch
            .get_or_insert_with(|| PendingBatch::open(base))
            .push(self.cursor.next_posting(), &self.node_field, &values);
        self.snapshot = AccumulatorSnapshot::capture(&record);
        self.cursor.advance();

        let (entries, size) = match &self.batch {
            Some(batch) => (batch.entries_count(), batch.approx_byte_length()),
            None => (0, 0),
        };
        let catching_up = self.log.last_key() > self.cursor.next_posting() && size < MAX_BATCH_BYTES;
        if entries < self.settings.bulk_send || catching_up {
            return NextWake::At(self.cursor.next_posting());
        }

        debug!("{}: batch ready, {} entries, {} bytes", self.settings.name, entries, size);
        self.state = match self.settings.transport {
            Transport::Plain => State::Send,
            Transport::Secure { .. } => State::SecurePrep,
        };
        NextWake::Soon
    }

    fn secure_prep(&mut self, now: u32) -> NextWake {
        let sealed = match (&self.batch, &self.settings.transport) {
            (Some(batch), Transport::Secure { username, key }) => SecureEnvelope::seal(batch.body(), username, key),
            _ => {
                self.state = State::Accumulate;
                return NextWake::Soon;
            }
        };

        match sealed {
            Ok(envelope) => {
                self.envelope = Some(envelope);
                self.state = State::Send;
                NextWake::Soon
            }
            Err(e) => self.fail(now, &e.to_string()),
        }
    }

    fn send(&mut self, now: u32) -> NextWake {
        if !self.link.is_connected() {
            return NextWake::At(now + POLL_SECS);
        }

        let (authorization, content_type, body) = match (&self.settings.transport, &self.batch, &self.envelope) {
            (Transport::Plain, Some(batch), _) => (
                format!("Bearer {}", self.settings.api_key),
                FORM_CONTENT_TYPE,
                batch.body().to_string(),
            ),
            (Transport::Secure { .. }, Some(_), Some(envelope)) => (
                envelope.authorization.clone(),
                SECURE_CONTENT_TYPE,
                envelope.body.clone(),
            ),
            (Transport::Secure { .. }, Some(_), None) => {
                self.state = State::SecurePrep;
                return NextWake::Soon;
            }
            (_, None, _) => {
                self.state = State::Accumulate;
                return NextWake::Soon;
            }
        };

        let url = format!("{}/input/bulk", self.settings.url);
        let headers = [("Authorization", authorization.as_str()), ("Content-Type", content_type)];
        match self.open_and_send(Method::Post, &url, &headers, Some(body)) {
            Ok(()) => {
                self.state = State::WaitResponse;
                NextWake::Soon
            }
            Err(e) => self.fail(now, &e.to_string()),
        }
    }

    fn wait_response(&mut self, now: u32) -> NextWake {
        if self.request.ready_state() != ReadyState::Done {
            return NextWake::At(now + POLL_SECS);
        }

        let status = self.request.status();
        if status != Some(200) {
            let reason = match status {
                Some(code) => format!("status {}", code),
                None => "no response".to_string(),
            };
            return self.fail(now, &reason);
        }

        let response = self.request.body();
        let accepted = match &self.envelope {
            Some(envelope) => envelope.acknowledged_by(&response),
            None => response.starts_with(b"ok"),
        };
        if !accepted {
            let reason = format!("unexpected response: {}", String::from_utf8_lossy(&response));
            return self.fail(now, &reason);
        }

        if let Some(batch) = self.batch.take() {
            debug!(
                "{}: posted {} entries from {}",
                self.settings.name,
                batch.entries_count(),
                batch.base_timestamp()
            );
        }
        self.envelope = None;
        self.retry.reset();
        self.state = State::Accumulate;
        NextWake::At(self.cursor.next_posting())
    }

    /// Count a failed attempt and schedule a resend of the same batch
    fn fail(&mut self, now: u32, reason: &str) -> NextWake {
        self.retry.record(&self.settings.name, reason);
        self.envelope = None;
        self.state = match self.settings.transport {
            Transport::Plain => State::Send,
            Transport::Secure { .. } => State::SecurePrep,
        };
        NextWake::At(now + POLL_SECS)
    }
}

impl Service for EmonUplink {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn step(&mut self, now: u32) -> NextWake {
        if self.control.is_stopped() {
            if !self.halted {
                self.reset();
                self.halted = true;
                info!("{}: stopped", self.settings.name);
            }
            return NextWake::Halt;
        }
        self.halted = false;

        if self.control.take_reinitialize() {
            debug!("{}: re-initializing", self.settings.name);
            self.reset();
        }

        match self.state {
            State::Initialize => self.initialize(now),
            State::SyncQuery => self.sync_query(now),
            State::SyncWait => self.sync_wait(now),
            State::Accumulate => self.accumulate(now),
            State::SecurePrep => self.secure_prep(now),
            State::Send => self.send(now),
            State::WaitResponse => self.wait_response(now),
        }
    }
}
