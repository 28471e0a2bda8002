//! Connection handling for xwire
//!
//! A connection owns its transport and demultiplexes the inbound stream:
//! - Sequence numbering of outbound requests
//! - Parking replies and errors until their cookie is redeemed
//! - The event queue
//! - Connection state management

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::cookie::Cookie;
use super::transport::{OutgoingRequest, Transport, TransportError};
use crate::config::ConnectionConfig;
use crate::extension::{Extension, ExtensionDescriptor, ExtensionInfo, Namespace, Registry, ServerError};
use crate::protocol::{
    padded_len, widen_sequence, ByteOrder, Frame, FrameKind, RequestEncoder, Unpacker, WireError,
    REQUEST_HEADER_SIZE,
};
use crate::wire::{AnyEvent, Reply, Wire};
use crate::xproto::{self, Setup, XprotoExtension};

/// Why a connection was shut down
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    #[error("socket, pipe or other stream error")]
    StreamError,

    #[error("extension not supported")]
    ExtensionNotSupported,

    #[error("insufficient memory")]
    MemoryExhausted,

    #[error("request length exceeds what the server accepts")]
    RequestTooLong,

    #[error("display string could not be parsed")]
    ParseError,

    #[error("disconnected")]
    Disconnected,
}

/// Violations of the wire protocol by either side
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("Malformed request: {len} byte body is shorter than the request header")]
    MalformedRequest { len: usize },

    #[error("Unknown opcode {opcode} in namespace {namespace}")]
    UnknownOpcode { namespace: Namespace, opcode: u8 },

    #[error("Decode error: {0}")]
    Decode(#[from] WireError),

    #[error("Frame for unknown sequence {sequence}")]
    UnknownSequence { sequence: u64 },

    #[error("No frame arrived for sequence {sequence:?}")]
    MissingFrame { sequence: Option<u64> },
}

/// Misuse of the request API, detected before blocking
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    #[error("Request produces no reply")]
    VoidReply,

    #[error("Request was sent unchecked")]
    UncheckedRequest,

    #[error("Request expects a reply; redeem it with reply()")]
    CheckOnReply,
}

/// Connection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection closed: {0}")]
    Closed(CloseReason),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),
}

impl From<WireError> for ConnectionError {
    fn from(err: WireError) -> Self {
        ConnectionError::Protocol(ProtocolViolation::Decode(err))
    }
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Reading the setup and querying extensions
    Connecting,
    /// Ready for requests
    Open,
    /// Shut down; every further operation fails with the reason
    Closed(CloseReason),
}

/// Connection statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Requests sent
    pub requests_sent: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Reply frames received
    pub replies_received: u64,
    /// Error frames received
    pub errors_received: u64,
    /// Event frames received
    pub events_received: u64,
    /// Frames dropped because their cookie was discarded
    pub frames_dropped: u64,
}

/// A request whose reply or error someone may still redeem
#[derive(Debug, Clone, Copy)]
struct Pending {
    void: bool,
    discarded: bool,
}

struct Inner {
    transport: Box<dyn Transport>,
    state: ConnectionState,
    /// Sequence of the most recent request
    last_sent: u64,
    /// Highest sequence carried by any inbound frame
    last_seen: u64,
    pending: HashMap<u64, Pending>,
    /// Replies and errors awaiting redemption, by sequence
    parked: HashMap<u64, Frame>,
    /// Events and errors of unchecked requests, in arrival order
    events: VecDeque<Frame>,
    stats: ConnectionStats,
}

impl Inner {
    fn ensure_open(&self) -> ConnectionResult<()> {
        match self.state {
            ConnectionState::Closed(reason) => Err(ConnectionError::Closed(reason)),
            ConnectionState::Connecting | ConnectionState::Open => Ok(()),
        }
    }

    /// Shut the connection down, keeping the first reason given
    fn close(&mut self, reason: CloseReason) -> ConnectionError {
        match self.state {
            ConnectionState::Closed(first) => ConnectionError::Closed(first),
            _ => {
                self.state = ConnectionState::Closed(reason);
                self.transport.disconnect();
                if reason == CloseReason::Disconnected {
                    tracing::info!("Connection closed");
                } else {
                    tracing::warn!("Connection closed: {}", reason);
                }
                ConnectionError::Closed(reason)
            }
        }
    }

    fn transport_failed(&mut self, err: TransportError) -> ConnectionError {
        tracing::error!("Transport error: {}", err);
        self.close(CloseReason::StreamError)
    }

    /// Sort one inbound frame into the parked table or the event queue
    fn route(&mut self, frame: Frame, event_queue_limit: usize) -> ConnectionResult<()> {
        let sequence = frame
            .wire_sequence()
            .map(|wire| widen_sequence(wire, self.last_sent));
        if let Some(sequence) = sequence {
            self.last_seen = self.last_seen.max(sequence);
        }

        match (frame.kind(), sequence) {
            (FrameKind::Reply, Some(sequence)) | (FrameKind::Error, Some(sequence)) => {
                let is_error = frame.kind() == FrameKind::Error;
                if is_error {
                    self.stats.errors_received += 1;
                } else {
                    self.stats.replies_received += 1;
                }

                match self.pending.get(&sequence) {
                    Some(pending) if pending.discarded => {
                        self.pending.remove(&sequence);
                        self.stats.frames_dropped += 1;
                        tracing::debug!("Dropped frame for discarded sequence {}", sequence);
                    }
                    Some(_) => {
                        tracing::trace!("Parked {:?} for sequence {}", frame.kind(), sequence);
                        self.parked.insert(sequence, frame);
                    }
                    None if is_error => {
                        tracing::trace!("Queued error for unchecked sequence {}", sequence);
                        self.queue_event(frame, event_queue_limit)?;
                    }
                    None => {
                        self.stats.frames_dropped += 1;
                        tracing::warn!("Dropped reply for unknown sequence {}", sequence);
                    }
                }
            }
            (kind, _) => {
                self.stats.events_received += 1;
                tracing::trace!("Queued {:?}", kind);
                self.queue_event(frame, event_queue_limit)?;
            }
        }

        self.retire_discarded();
        Ok(())
    }

    /// Read frames until the reply or error for `sequence` is parked
    fn await_reply(&mut self, sequence: u64, event_queue_limit: usize) -> ConnectionResult<Frame> {
        loop {
            if let Some(frame) = self.parked.remove(&sequence) {
                return Ok(frame);
            }

            match self.transport.wait_for_frame(Some(sequence)) {
                Ok(Some(frame)) => self.route(frame, event_queue_limit)?,
                Ok(None) => {
                    return Err(ProtocolViolation::MissingFrame {
                        sequence: Some(sequence),
                    }
                    .into())
                }
                Err(err) => return Err(self.transport_failed(err)),
            }
        }
    }

    /// Read frames until a checked void request either errored or is
    /// known to be processed
    fn await_check(&mut self, sequence: u64, event_queue_limit: usize) -> ConnectionResult<Option<Frame>> {
        loop {
            if let Some(frame) = self.parked.remove(&sequence) {
                return Ok(Some(frame));
            }

            // A frame for a later request means this one was processed.
            if self.last_seen >= sequence {
                return Ok(None);
            }

            match self.transport.wait_for_frame(Some(sequence)) {
                Ok(Some(frame)) => self.route(frame, event_queue_limit)?,
                Ok(None) => return Ok(None),
                Err(err) => return Err(self.transport_failed(err)),
            }
        }
    }

    /// Drop all bookkeeping for a sequence whose waiter has finished
    fn forget(&mut self, sequence: u64) {
        self.pending.remove(&sequence);
        self.parked.remove(&sequence);
    }

    fn queue_event(&mut self, frame: Frame, limit: usize) -> ConnectionResult<()> {
        if self.events.len() >= limit {
            tracing::error!("Event queue exceeded {} entries", limit);
            return Err(self.close(CloseReason::MemoryExhausted));
        }
        self.events.push_back(frame);
        Ok(())
    }

    /// Forget discarded void requests once a later frame proves they
    /// completed without error
    fn retire_discarded(&mut self) {
        let last_seen = self.last_seen;
        self.pending
            .retain(|&sequence, pending| !(pending.discarded && pending.void && sequence < last_seen));
    }

    fn discard(&mut self, sequence: u64) {
        if self.parked.remove(&sequence).is_some() {
            self.pending.remove(&sequence);
            self.stats.frames_dropped += 1;
            tracing::debug!("Discarded parked frame for sequence {}", sequence);
            return;
        }
        if let Some(pending) = self.pending.get_mut(&sequence) {
            pending.discarded = true;
        }
        self.retire_discarded();
    }
}

/// A client connection to a server speaking the protocol
///
/// The connection is used from one thread; its mutable state lives in a
/// `RefCell`, so it is not `Sync`.
pub struct Connection {
    inner: RefCell<Inner>,
    registry: Registry,
    setup: Setup,
    order: ByteOrder,
    encoder: RequestEncoder,
    event_queue_limit: usize,
    maximum_request_length: u32,
}

impl Connection {
    /// Open a connection over an already connected transport, with the
    /// core protocol and the configured known extensions
    pub fn connect(transport: Box<dyn Transport>, config: &ConnectionConfig) -> ConnectionResult<Self> {
        let extensions: Vec<&'static ExtensionDescriptor> = xproto::extensions()
            .iter()
            .copied()
            .filter(|descriptor| {
                descriptor
                    .namespace
                    .extension_name()
                    .map_or(false, |name| config.wants_extension(name))
            })
            .collect();

        Self::with_extensions(transport, config, xproto::descriptor(), &extensions)
    }

    /// Open a connection with explicit namespace tables
    pub fn with_extensions(
        transport: Box<dyn Transport>,
        config: &ConnectionConfig,
        core: &'static ExtensionDescriptor,
        extensions: &[&'static ExtensionDescriptor],
    ) -> ConnectionResult<Self> {
        let mut inner = Inner {
            transport,
            state: ConnectionState::Connecting,
            last_sent: 0,
            last_seen: 0,
            pending: HashMap::new(),
            parked: HashMap::new(),
            events: VecDeque::new(),
            stats: ConnectionStats::default(),
        };

        let order = config.byte_order;
        let setup_bytes = inner.transport.setup_bytes();
        let setup = match Setup::decode(&mut Unpacker::new(setup_bytes).with_order(order)) {
            Ok(setup) => setup,
            Err(err) => {
                tracing::error!("Invalid setup block: {}", err);
                inner.transport.disconnect();
                return Err(err.into());
            }
        };

        let mut registry = Registry::new(core);
        for descriptor in extensions {
            let Some(name) = descriptor.namespace.extension_name() else {
                continue;
            };
            let info = match inner.transport.query_extension(name) {
                Ok(info) => info,
                Err(err) => return Err(inner.transport_failed(err)),
            };
            match info {
                Some(info) => tracing::debug!(
                    "Extension {}: major opcode {}, first event {}, first error {}",
                    name,
                    info.major_opcode,
                    info.first_event,
                    info.first_error
                ),
                None => tracing::debug!("Extension {} not supported by the server", name),
            }
            registry.register(descriptor, info);
        }

        let server_maximum = inner.transport.maximum_request_length();
        let maximum_request_length = config
            .max_request_length
            .map_or(server_maximum, |cap| cap.min(server_maximum));

        inner.state = ConnectionState::Open;
        tracing::info!(
            "Connected to '{}' ({}.{}), {} screen(s), {}",
            setup.vendor_name(),
            setup.protocol_major_version,
            setup.protocol_minor_version,
            setup.roots.len(),
            order
        );

        Ok(Self {
            inner: RefCell::new(inner),
            registry,
            setup,
            order,
            encoder: RequestEncoder::new(order),
            event_queue_limit: config.event_queue_limit,
            maximum_request_length,
        })
    }

    fn ensure_open(&self) -> ConnectionResult<()> {
        self.inner.borrow().ensure_open()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.borrow().state
    }

    /// Whether the connection has been shut down
    pub fn has_error(&self) -> bool {
        self.close_reason().is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        match self.inner.borrow().state {
            ConnectionState::Closed(reason) => Some(reason),
            _ => None,
        }
    }

    /// The setup block decoded when the connection was made
    pub fn setup(&self) -> ConnectionResult<&Setup> {
        self.ensure_open()?;
        Ok(&self.setup)
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn stats(&self) -> ConnectionStats {
        self.inner.borrow().stats.clone()
    }

    /// Sequence number of the most recent request
    pub fn last_sequence(&self) -> u64 {
        self.inner.borrow().last_sent
    }

    /// Largest request accepted, in 4-byte units
    pub fn maximum_request_length(&self) -> ConnectionResult<u32> {
        self.ensure_open()?;
        Ok(self.maximum_request_length)
    }

    /// Numbering of a supported extension, `None` if unsupported or unknown
    pub fn extension_info(&self, name: &str) -> ConnectionResult<Option<ExtensionInfo>> {
        self.ensure_open()?;
        Ok(self.registry.info_by_name(name))
    }

    /// Request encoders for an extension namespace
    pub fn extension<'c, E: Extension<'c>>(&'c self) -> E {
        E::new(self)
    }

    /// Request encoders for the core protocol
    pub fn core(&self) -> XprotoExtension<'_> {
        XprotoExtension::new(self)
    }

    /// Send one request and return the cookie for its reply or error
    ///
    /// `body` starts with a 4-byte header placeholder that is filled with
    /// the opcodes and the request length.
    pub fn send_request<R: Reply>(
        &self,
        namespace: Namespace,
        opcode: u8,
        body: Bytes,
        is_checked: bool,
    ) -> ConnectionResult<Cookie<'_, R>> {
        self.ensure_open()?;

        if body.len() < REQUEST_HEADER_SIZE {
            return Err(ProtocolViolation::MalformedRequest { len: body.len() }.into());
        }

        let request_name = self
            .registry
            .request_name(namespace, opcode)
            .ok_or(ProtocolViolation::UnknownOpcode { namespace, opcode })?;

        let mut inner = self.inner.borrow_mut();

        let (major_opcode, minor_opcode) = match namespace {
            Namespace::Core => (opcode, None),
            Namespace::Extension(key) => match self.registry.info(&key) {
                Some(info) => (info.major_opcode, Some(opcode)),
                None => return Err(inner.close(CloseReason::ExtensionNotSupported)),
            },
        };

        let length = padded_len(body.len());
        if length / 4 > self.maximum_request_length as usize {
            return Err(inner.close(CloseReason::RequestTooLong));
        }

        let mut bytes = BytesMut::with_capacity(length);
        if let Err(err) = self.encoder.encode(major_opcode, minor_opcode, &body, &mut bytes) {
            return Err(match err {
                WireError::FrameTooLarge(..) => inner.close(CloseReason::RequestTooLong),
                other => other.into(),
            });
        }

        let request = OutgoingRequest {
            namespace,
            opcode,
            is_checked,
            is_void: R::IS_VOID,
            bytes: bytes.freeze(),
        };

        let sequence = match inner.transport.send(request) {
            Ok(sequence) => sequence,
            Err(err) => return Err(inner.transport_failed(err)),
        };
        if sequence != inner.last_sent + 1 {
            tracing::warn!(
                "Transport assigned sequence {} after {}",
                sequence,
                inner.last_sent
            );
        }
        inner.last_sent = sequence;

        if !R::IS_VOID || is_checked {
            inner.pending.insert(
                sequence,
                Pending {
                    void: R::IS_VOID,
                    discarded: false,
                },
            );
        }

        inner.stats.requests_sent += 1;
        inner.stats.bytes_sent += length as u64;
        tracing::debug!(
            "Sent {} {} request as sequence {}{}",
            namespace,
            request_name,
            sequence,
            if is_checked { " (checked)" } else { "" }
        );
        drop(inner);

        self.ensure_open()?;
        Ok(Cookie::new(self, sequence, is_checked))
    }

    /// Block until the reply for `sequence` arrives and return its bytes
    ///
    /// An error frame for the sequence is decoded and returned as
    /// [`ConnectionError::Server`].
    pub fn wait_for_reply(&self, sequence: u64) -> ConnectionResult<Bytes> {
        self.ensure_open()?;

        let frame = {
            let mut inner = self.inner.borrow_mut();
            if !inner.pending.contains_key(&sequence) {
                return Err(ProtocolViolation::UnknownSequence { sequence }.into());
            }

            let outcome = inner.await_reply(sequence, self.event_queue_limit);
            inner.forget(sequence);
            outcome?
        };

        self.ensure_open()?;
        match frame.kind() {
            FrameKind::Error => Err(self.server_error(&frame, sequence)?.into()),
            _ => Ok(frame.into_bytes()),
        }
    }

    /// Block until a checked void request is known to have succeeded or
    /// its error arrives
    pub fn check_request(&self, sequence: u64) -> ConnectionResult<()> {
        self.ensure_open()?;

        let frame = {
            let mut inner = self.inner.borrow_mut();
            let outcome = inner.await_check(sequence, self.event_queue_limit);
            inner.forget(sequence);
            outcome?
        };

        self.ensure_open()?;
        match frame {
            Some(frame) if frame.kind() == FrameKind::Error => Err(self.server_error(&frame, sequence)?.into()),
            _ => Ok(()),
        }
    }

    /// The next event, blocking until one arrives
    ///
    /// Errors of unchecked requests are delivered here in arrival order as
    /// [`ConnectionError::Server`].
    pub fn wait_for_event(&self) -> ConnectionResult<Box<dyn AnyEvent>> {
        self.ensure_open()?;

        let frame = {
            let mut inner = self.inner.borrow_mut();
            loop {
                if let Some(frame) = inner.events.pop_front() {
                    break frame;
                }

                match inner.transport.wait_for_frame(None) {
                    Ok(Some(frame)) => inner.route(frame, self.event_queue_limit)?,
                    Ok(None) => return Err(ProtocolViolation::MissingFrame { sequence: None }.into()),
                    Err(err) => return Err(inner.transport_failed(err)),
                }
            }
        };

        self.ensure_open()?;
        self.deliver(frame)
    }

    /// The next event if one is available without blocking
    pub fn poll_for_event(&self) -> ConnectionResult<Option<Box<dyn AnyEvent>>> {
        self.ensure_open()?;

        let frame = {
            let mut inner = self.inner.borrow_mut();
            loop {
                if let Some(frame) = inner.events.pop_front() {
                    break Some(frame);
                }

                match inner.transport.poll_frame() {
                    Ok(Some(frame)) => inner.route(frame, self.event_queue_limit)?,
                    Ok(None) => break None,
                    Err(err) => return Err(inner.transport_failed(err)),
                }
            }
        };

        self.ensure_open()?;
        frame.map(|frame| self.deliver(frame)).transpose()
    }

    fn deliver(&self, frame: Frame) -> ConnectionResult<Box<dyn AnyEvent>> {
        match frame.kind() {
            FrameKind::Error => {
                let sequence = frame
                    .wire_sequence()
                    .map_or(0, |wire| widen_sequence(wire, self.last_sequence()));
                Err(self.server_error(&frame, sequence)?.into())
            }
            _ => Ok(self.registry.decode_event(frame.bytes(), self.order)?),
        }
    }

    fn server_error(&self, frame: &Frame, sequence: u64) -> ConnectionResult<ServerError> {
        let error = self.registry.decode_error(frame.bytes(), sequence, self.order)?;
        tracing::debug!("{}", error);
        Ok(error)
    }

    /// A fresh resource identifier
    pub fn generate_id(&self) -> ConnectionResult<u32> {
        self.ensure_open()?;
        let id = {
            let mut inner = self.inner.borrow_mut();
            match inner.transport.generate_id() {
                Ok(id) => id,
                Err(err) => return Err(inner.transport_failed(err)),
            }
        };
        self.ensure_open()?;
        Ok(id)
    }

    /// Write out buffered requests
    pub fn flush(&self) -> ConnectionResult<()> {
        self.ensure_open()?;
        {
            let mut inner = self.inner.borrow_mut();
            if let Err(err) = inner.transport.flush() {
                return Err(inner.transport_failed(err));
            }
        }
        self.ensure_open()
    }

    /// Close the connection; every later operation fails
    pub fn disconnect(&self) -> ConnectionResult<()> {
        self.ensure_open()?;
        self.inner.borrow_mut().close(CloseReason::Disconnected);
        Ok(())
    }

    /// Drop whatever arrives for `sequence`; used by unredeemed cookies
    pub(crate) fn discard(&self, sequence: u64) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.discard(sequence);
        }
    }

    /// Requests still awaiting redemption
    pub fn pending_requests(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    /// Events and unchecked errors waiting to be delivered
    pub fn queued_events(&self) -> usize {
        self.inner.borrow().events.len()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state == ConnectionState::Open {
            inner.transport.disconnect();
        }
    }
}
