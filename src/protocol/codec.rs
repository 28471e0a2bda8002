//! Frame codec for requests and inbound frames
//!
//! Handles request header filling and the delimitation of inbound
//! reply/error/event frames.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{padded_len, ByteOrder};

/// Size of every inbound frame before any extra reply data
pub const FRAME_SIZE: usize = 32;

/// Maximum inbound frame size accepted by the decoder (64 MB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Minimum request size: the 4-byte request header
pub const REQUEST_HEADER_SIZE: usize = 4;

/// Category byte of an error frame
pub const ERROR_CODE: u8 = 0;

/// Category byte of a reply frame
pub const REPLY_CODE: u8 = 1;

/// Event code of a generic (extension, variable-length) event
pub const GENERIC_EVENT_CODE: u8 = 35;

/// Event code of KeymapNotify, the only frame without a sequence number
pub const KEYMAP_NOTIFY_CODE: u8 = 11;

/// Bit set in byte 0 of events produced by SendEvent
pub const SEND_EVENT_MASK: u8 = 0x80;

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Buffer underrun: needed {needed} bytes, {available} available")]
    BufferUnderrun { needed: usize, available: usize },

    #[error("Format error: {0}")]
    Format(String),

    #[error("Invalid region: offset {offset} + size {size} exceeds buffer of {len} bytes")]
    InvalidRegion { offset: usize, size: usize, len: usize },

    #[error("Length mismatch: expected {expected} elements, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Frame length mismatch: header declares {declared} bytes, got {actual}")]
    FrameLength { declared: usize, actual: usize },

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),
}

pub type WireResult<T> = Result<T, WireError>;

/// Category of an inbound frame, from its first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Error,
    Reply,
    Event {
        /// Event code with the send-event bit cleared
        code: u8,
        /// Whether the event was produced by SendEvent
        synthetic: bool,
    },
}

impl FrameKind {
    pub fn classify(first: u8) -> Self {
        match first {
            ERROR_CODE => FrameKind::Error,
            REPLY_CODE => FrameKind::Reply,
            other => FrameKind::Event {
                code: other & !SEND_EVENT_MASK,
                synthetic: other & SEND_EVENT_MASK != 0,
            },
        }
    }

    /// Whether frames of this kind carry a sequence number
    pub fn has_sequence(&self) -> bool {
        !matches!(self, FrameKind::Event { code: KEYMAP_NOTIFY_CODE, .. })
    }
}

fn read_u16(bytes: &[u8], at: usize, order: ByteOrder) -> u16 {
    let raw = [bytes[at], bytes[at + 1]];
    match order {
        ByteOrder::Little => u16::from_le_bytes(raw),
        ByteOrder::Big => u16::from_be_bytes(raw),
    }
}

fn read_u32(bytes: &[u8], at: usize, order: ByteOrder) -> u32 {
    let raw = [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
    match order {
        ByteOrder::Little => u32::from_le_bytes(raw),
        ByteOrder::Big => u32::from_be_bytes(raw),
    }
}

/// Total length of the frame whose first 32 bytes are `header`
pub fn frame_length(header: &[u8], order: ByteOrder) -> WireResult<usize> {
    if header.len() < FRAME_SIZE {
        return Err(WireError::BufferUnderrun {
            needed: FRAME_SIZE,
            available: header.len(),
        });
    }

    let extended = match FrameKind::classify(header[0]) {
        FrameKind::Reply => true,
        FrameKind::Event { code, .. } => code == GENERIC_EVENT_CODE,
        FrameKind::Error => false,
    };

    if !extended {
        return Ok(FRAME_SIZE);
    }

    let words = read_u32(header, 4, order) as usize;
    let total = words
        .checked_mul(4)
        .and_then(|extra| extra.checked_add(FRAME_SIZE))
        .ok_or(WireError::FrameTooLarge(usize::MAX, MAX_FRAME_SIZE))?;

    if total > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(total, MAX_FRAME_SIZE));
    }
    Ok(total)
}

/// Widen a 16-bit wire sequence number against the last request sent
///
/// A frame can only answer a request that was already sent, so the
/// result is the largest value not above `last_sent` whose low 16 bits
/// equal `wire`.
pub fn widen_sequence(wire: u16, last_sent: u64) -> u64 {
    let candidate = (last_sent & !0xffff) | wire as u64;
    if candidate > last_sent && candidate >= 0x1_0000 {
        candidate - 0x1_0000
    } else {
        candidate
    }
}

/// One complete inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    wire_sequence: Option<u16>,
    bytes: Bytes,
}

impl Frame {
    /// Validate and wrap one complete frame
    pub fn parse(bytes: Bytes, order: ByteOrder) -> WireResult<Self> {
        let declared = frame_length(&bytes, order)?;
        if declared != bytes.len() {
            return Err(WireError::FrameLength {
                declared,
                actual: bytes.len(),
            });
        }

        let kind = FrameKind::classify(bytes[0]);
        let wire_sequence = kind.has_sequence().then(|| read_u16(&bytes, 2, order));

        Ok(Self {
            kind,
            wire_sequence,
            bytes,
        })
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// The 16-bit sequence number as it appears on the wire
    pub fn wire_sequence(&self) -> Option<u16> {
        self.wire_sequence
    }

    /// Byte 1: error code for errors, data byte for replies, detail for events
    pub fn detail(&self) -> u8 {
        self.bytes[1]
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Decodes inbound frames from a byte stream
pub struct FrameDecoder {
    order: ByteOrder,
    state: DecodeState,
}

#[derive(Default)]
enum DecodeState {
    #[default]
    Header,
    Body {
        length: usize,
    },
}

impl FrameDecoder {
    pub fn new(order: ByteOrder) -> Self {
        Self {
            order,
            state: DecodeState::Header,
        }
    }

    /// Attempt to decode a frame from the buffer
    /// Returns Ok(None) if more data is needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> WireResult<Option<Frame>> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if buf.len() < FRAME_SIZE {
                        return Ok(None);
                    }
                    let length = frame_length(&buf[..FRAME_SIZE], self.order)?;
                    self.state = DecodeState::Body { length };
                }
                DecodeState::Body { length } => {
                    if buf.len() < length {
                        return Ok(None);
                    }

                    let bytes = buf.split_to(length).freeze();
                    self.state = DecodeState::Header;

                    return Frame::parse(bytes, self.order).map(Some);
                }
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(ByteOrder::Little)
    }
}

/// Fills request headers and pads request bodies
pub struct RequestEncoder {
    order: ByteOrder,
}

impl RequestEncoder {
    pub fn new(order: ByteOrder) -> Self {
        Self { order }
    }

    /// Encode a request into `dst`
    ///
    /// The first four bytes of `body` are a header placeholder: byte 0
    /// becomes `major_opcode`, byte 1 becomes `minor_opcode` when given
    /// (extension requests) and is kept otherwise, bytes 2-3 become the
    /// padded length in 4-byte units.
    pub fn encode(
        &self,
        major_opcode: u8,
        minor_opcode: Option<u8>,
        body: &[u8],
        dst: &mut BytesMut,
    ) -> WireResult<()> {
        if body.len() < REQUEST_HEADER_SIZE {
            return Err(WireError::BufferUnderrun {
                needed: REQUEST_HEADER_SIZE,
                available: body.len(),
            });
        }

        let total = padded_len(body.len());
        let words = u16::try_from(total / 4)
            .map_err(|_| WireError::FrameTooLarge(total, u16::MAX as usize * 4))?;

        dst.reserve(total);
        dst.put_u8(major_opcode);
        dst.put_u8(minor_opcode.unwrap_or(body[1]));
        match self.order {
            ByteOrder::Little => dst.put_u16_le(words),
            ByteOrder::Big => dst.put_u16(words),
        }
        dst.put_slice(&body[REQUEST_HEADER_SIZE..]);
        dst.put_bytes(0, total - body.len());
        Ok(())
    }
}

impl Default for RequestEncoder {
    fn default() -> Self {
        Self::new(ByteOrder::Little)
    }
}

fn put_u16(dst: &mut BytesMut, value: u16, order: ByteOrder) {
    match order {
        ByteOrder::Little => dst.put_u16_le(value),
        ByteOrder::Big => dst.put_u16(value),
    }
}

fn put_u32(dst: &mut BytesMut, value: u32, order: ByteOrder) {
    match order {
        ByteOrder::Little => dst.put_u32_le(value),
        ByteOrder::Big => dst.put_u32(value),
    }
}

/// Build a reply frame: header with `data` in byte 1, then `body`
///
/// `body` starts at byte 8; it is zero-filled up to the 32-byte minimum
/// and padded to a 4-byte boundary, and the length field is derived
/// from the result.
pub fn build_reply(order: ByteOrder, sequence: u16, data: u8, body: &[u8]) -> Bytes {
    let total = padded_len((8 + body.len()).max(FRAME_SIZE));
    let mut buf = BytesMut::with_capacity(total);
    buf.put_u8(REPLY_CODE);
    buf.put_u8(data);
    put_u16(&mut buf, sequence, order);
    put_u32(&mut buf, ((total - FRAME_SIZE) / 4) as u32, order);
    buf.put_slice(body);
    buf.put_bytes(0, total - buf.len());
    buf.freeze()
}

/// Build a 32-byte error frame
pub fn build_error(
    order: ByteOrder,
    code: u8,
    sequence: u16,
    bad_value: u32,
    minor_opcode: u16,
    major_opcode: u8,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_SIZE);
    buf.put_u8(ERROR_CODE);
    buf.put_u8(code);
    put_u16(&mut buf, sequence, order);
    put_u32(&mut buf, bad_value, order);
    put_u16(&mut buf, minor_opcode, order);
    buf.put_u8(major_opcode);
    buf.put_bytes(0, FRAME_SIZE - buf.len());
    buf.freeze()
}
