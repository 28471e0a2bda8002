//! In-process transport
//!
//! Stands in for a server: requests are recorded instead of written to a
//! socket, and inbound frames are whatever bytes the paired
//! [`MemoryHandle`] injects. Used by the demo command and by tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};

use super::transport::{OutgoingRequest, Transport, TransportError, TransportResult};
use crate::extension::ExtensionInfo;
use crate::protocol::{build_error, build_reply, ByteOrder, Frame, FrameDecoder, SEND_EVENT_MASK};
use crate::wire::{Event, Wire};
use crate::xproto::Setup;

/// A request as the transport received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRequest {
    pub sequence: u64,
    pub request: OutgoingRequest,
}

struct Shared {
    inbound: BytesMut,
    decoder: FrameDecoder,
    sent: Vec<SentRequest>,
    last_sequence: u64,
    next_id: u32,
    flushes: usize,
    failure: Option<String>,
    disconnected: bool,
}

/// Transport half of an in-memory connection
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
    setup: Bytes,
    resource_id_base: u32,
    resource_id_mask: u32,
    maximum_request_length: u32,
    extensions: HashMap<String, ExtensionInfo>,
}

/// Test-side half of an in-memory connection
#[derive(Clone)]
pub struct MemoryHandle {
    shared: Arc<Mutex<Shared>>,
    order: ByteOrder,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryTransport {
    /// A transport whose server presents `setup`, little-endian
    pub fn new(setup: &Setup) -> TransportResult<(Self, MemoryHandle)> {
        Self::with_byte_order(setup, ByteOrder::Little)
    }

    pub fn with_byte_order(setup: &Setup, order: ByteOrder) -> TransportResult<(Self, MemoryHandle)> {
        let shared = Arc::new(Mutex::new(Shared {
            inbound: BytesMut::new(),
            decoder: FrameDecoder::new(order),
            sent: Vec::new(),
            last_sequence: 0,
            next_id: 0,
            flushes: 0,
            failure: None,
            disconnected: false,
        }));

        let transport = Self {
            shared: shared.clone(),
            setup: setup.to_bytes_in(order)?,
            resource_id_base: setup.resource_id_base,
            resource_id_mask: setup.resource_id_mask,
            maximum_request_length: setup.maximum_request_length as u32,
            extensions: HashMap::new(),
        };

        Ok((transport, MemoryHandle { shared, order }))
    }

    /// Advertise an extension with the given numbering
    pub fn with_extension(mut self, name: &str, info: ExtensionInfo) -> Self {
        self.extensions.insert(name.to_string(), info);
        self
    }

    fn check(&self) -> TransportResult<MutexGuard<'_, Shared>> {
        let shared = lock(&self.shared);
        if shared.disconnected {
            return Err(TransportError::Disconnected);
        }
        if let Some(reason) = &shared.failure {
            return Err(TransportError::Failed(reason.clone()));
        }
        Ok(shared)
    }

    fn next_frame(&self) -> TransportResult<Option<Frame>> {
        let mut guard = self.check()?;
        let shared = &mut *guard;
        Ok(shared.decoder.decode(&mut shared.inbound)?)
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, request: OutgoingRequest) -> TransportResult<u64> {
        let mut shared = self.check()?;
        shared.last_sequence += 1;
        let sequence = shared.last_sequence;
        shared.sent.push(SentRequest { sequence, request });
        Ok(sequence)
    }

    fn flush(&mut self) -> TransportResult<()> {
        self.check()?.flushes += 1;
        Ok(())
    }

    // Injected bytes are all there is, so an empty buffer means no frame is
    // coming for anyone.
    fn wait_for_frame(&mut self, _sequence: Option<u64>) -> TransportResult<Option<Frame>> {
        self.next_frame()
    }

    fn poll_frame(&mut self) -> TransportResult<Option<Frame>> {
        self.next_frame()
    }

    fn generate_id(&mut self) -> TransportResult<u32> {
        let mut shared = self.check()?;
        let step = self.resource_id_mask & self.resource_id_mask.wrapping_neg();
        if step == 0 {
            return Err(TransportError::IdsExhausted);
        }

        let offset = shared.next_id;
        if offset > self.resource_id_mask - step {
            return Err(TransportError::IdsExhausted);
        }
        shared.next_id = offset + step;
        Ok(self.resource_id_base | offset)
    }

    fn query_extension(&mut self, name: &str) -> TransportResult<Option<ExtensionInfo>> {
        self.check()?;
        Ok(self.extensions.get(name).copied())
    }

    fn maximum_request_length(&self) -> u32 {
        self.maximum_request_length
    }

    fn setup_bytes(&self) -> Bytes {
        self.setup.clone()
    }

    fn disconnect(&mut self) {
        lock(&self.shared).disconnected = true;
    }
}

impl MemoryHandle {
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Queue raw inbound bytes
    pub fn inject(&self, bytes: &[u8]) {
        lock(&self.shared).inbound.extend_from_slice(bytes);
    }

    /// Queue a reply frame; `body` starts at byte 8
    pub fn inject_reply(&self, sequence: u16, data: u8, body: &[u8]) {
        self.inject(&build_reply(self.order, sequence, data, body));
    }

    /// Queue an encoded reply value
    pub fn inject_reply_value<R: Wire>(&self, reply: &R) -> TransportResult<()> {
        self.inject(&reply.to_bytes_in(self.order)?);
        Ok(())
    }

    pub fn inject_error(&self, code: u8, sequence: u16, bad_value: u32, minor_opcode: u16, major_opcode: u8) {
        self.inject(&build_error(self.order, code, sequence, bad_value, minor_opcode, major_opcode));
    }

    /// Queue an event, offsetting its code by `first_event` for extension
    /// events (zero for core events)
    pub fn inject_event<E: Event>(&self, event: &E, first_event: u8) -> TransportResult<()> {
        let mut bytes = BytesMut::from(&event.to_bytes_in(self.order)?[..]);
        let synthetic = bytes[0] & SEND_EVENT_MASK;
        bytes[0] = ((bytes[0] & !SEND_EVENT_MASK).wrapping_add(first_event)) | synthetic;
        self.inject(&bytes);
        Ok(())
    }

    /// Requests received so far, in send order
    pub fn sent(&self) -> Vec<SentRequest> {
        lock(&self.shared).sent.clone()
    }

    pub fn last_sequence(&self) -> u64 {
        lock(&self.shared).last_sequence
    }

    pub fn flushes(&self) -> usize {
        lock(&self.shared).flushes
    }

    /// Bytes injected but not yet taken as frames
    pub fn pending_bytes(&self) -> usize {
        lock(&self.shared).inbound.len()
    }

    /// Make every further transport call fail
    pub fn fail(&self, reason: &str) {
        lock(&self.shared).failure = Some(reason.to_string());
    }

    pub fn is_disconnected(&self) -> bool {
        lock(&self.shared).disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::Namespace;
    use crate::protocol::FrameKind;

    fn request(opcode: u8) -> OutgoingRequest {
        OutgoingRequest {
            namespace: Namespace::Core,
            opcode,
            is_checked: false,
            is_void: true,
            bytes: Bytes::from_static(&[127, 0, 1, 0]),
        }
    }

    #[test]
    fn test_sequences_start_at_one() {
        let (mut transport, handle) = MemoryTransport::new(&Setup::virtual_screen("xwire", 640, 480)).unwrap();
        assert_eq!(transport.send(request(127)).unwrap(), 1);
        assert_eq!(transport.send(request(127)).unwrap(), 2);
        assert_eq!(handle.sent().len(), 2);
        assert_eq!(handle.last_sequence(), 2);
    }

    #[test]
    fn test_injected_frames_are_delimited() {
        let (mut transport, handle) = MemoryTransport::new(&Setup::virtual_screen("xwire", 640, 480)).unwrap();
        handle.inject_reply(1, 0, &[0; 40]);
        handle.inject_error(3, 2, 7, 0, 2);

        let reply = transport.poll_frame().unwrap().unwrap();
        assert_eq!(reply.kind(), FrameKind::Reply);
        assert_eq!(reply.len(), 48);

        let error = transport.wait_for_frame(Some(2)).unwrap().unwrap();
        assert_eq!(error.kind(), FrameKind::Error);
        assert!(transport.poll_frame().unwrap().is_none());
    }

    #[test]
    fn test_resource_ids() {
        let (mut transport, _handle) = MemoryTransport::new(&Setup::virtual_screen("xwire", 640, 480)).unwrap();
        let first = transport.generate_id().unwrap();
        let second = transport.generate_id().unwrap();
        assert_eq!(first, 0x0040_0000);
        assert_eq!(second, 0x0040_0001);
    }

    #[test]
    fn test_failure_and_disconnect() {
        let (mut transport, handle) = MemoryTransport::new(&Setup::virtual_screen("xwire", 640, 480)).unwrap();
        handle.fail("broken pipe");
        assert!(matches!(transport.flush(), Err(TransportError::Failed(_))));

        transport.disconnect();
        assert!(handle.is_disconnected());
        assert!(matches!(transport.send(request(127)), Err(TransportError::Disconnected)));
    }
}
