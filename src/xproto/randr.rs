//! RandR extension subset
//!
//! Exercises extension addressing: requests carry the server-assigned major
//! opcode with the request number as minor opcode, and event and error
//! numbers are offset by the extension's first event and first error.

use crate::extension::{event_decoder, EventDecoder, Extension, ExtensionDescriptor, ExtensionKey, Namespace};
use crate::network::{Connection, ConnectionResult, Cookie};
use crate::protocol::{Packer, Unpacker, WireResult, SEND_EVENT_MASK};
use crate::wire::{finish_event, put_event_code, Event, Reply, Wire};

use super::{finish_reply, put_reply, read_reply_header};

pub const KEY: ExtensionKey = ExtensionKey::new("RANDR");
pub const NAMESPACE: Namespace = Namespace::Extension(KEY);

pub const MAJOR_VERSION: u32 = 1;
pub const MINOR_VERSION: u32 = 6;

pub const QUERY_VERSION: u8 = 0;

const REQUESTS: [(u8, &str); 1] = [(QUERY_VERSION, "QueryVersion")];

const EVENTS: [(u8, EventDecoder); 1] = [(0, event_decoder::<ScreenChangeNotifyEvent> as EventDecoder)];

const ERRORS: [(u8, &str); 4] = [(0, "BadOutput"), (1, "BadCrtc"), (2, "BadMode"), (3, "BadProvider")];

pub(crate) const DESCRIPTOR: ExtensionDescriptor = ExtensionDescriptor {
    namespace: NAMESPACE,
    requests: &REQUESTS,
    events: &EVENTS,
    generic_events: &[],
    errors: &ERRORS,
};

pub fn descriptor() -> &'static ExtensionDescriptor {
    &DESCRIPTOR
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryVersionReply {
    pub sequence: u16,
    pub major_version: u32,
    pub minor_version: u32,
}

impl Wire for QueryVersionReply {
    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let (_, sequence, length) = read_reply_header(unpacker)?;
        let major_version = unpacker.read_u32()?;
        let minor_version = unpacker.read_u32()?;
        finish_reply(unpacker, length)?;
        Ok(Self {
            sequence,
            major_version,
            minor_version,
        })
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        put_reply(packer, 0, self.sequence, |body| {
            body.put_u32(self.major_version);
            body.put_u32(self.minor_version);
            Ok(())
        })
    }
}

impl Reply for QueryVersionReply {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenChangeNotifyEvent {
    pub synthetic: bool,
    pub rotation: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub config_timestamp: u32,
    pub root: u32,
    pub request_window: u32,
    pub size_id: u16,
    pub subpixel_order: u16,
    pub width: u16,
    pub height: u16,
    pub mwidth: u16,
    pub mheight: u16,
}

impl Wire for ScreenChangeNotifyEvent {
    const FIXED_SIZE: Option<usize> = Some(32);

    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let synthetic = unpacker.read_u8()? & SEND_EVENT_MASK != 0;
        let rotation = unpacker.read_u8()?;
        let sequence = unpacker.read_u16()?;
        let timestamp = unpacker.read_u32()?;
        let config_timestamp = unpacker.read_u32()?;
        let root = unpacker.read_u32()?;
        let request_window = unpacker.read_u32()?;
        let size_id = unpacker.read_u16()?;
        let subpixel_order = unpacker.read_u16()?;
        let width = unpacker.read_u16()?;
        let height = unpacker.read_u16()?;
        let mwidth = unpacker.read_u16()?;
        let mheight = unpacker.read_u16()?;

        Ok(Self {
            synthetic,
            rotation,
            sequence,
            timestamp,
            config_timestamp,
            root,
            request_window,
            size_id,
            subpixel_order,
            width,
            height,
            mwidth,
            mheight,
        })
    }

    /// Writes the event number relative to the extension; the sender adds
    /// the server's first event code
    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        put_event_code::<Self>(packer, 0, self.synthetic);
        packer.put_u8(self.rotation);
        packer.put_u16(self.sequence);
        packer.put_u32(self.timestamp);
        packer.put_u32(self.config_timestamp);
        packer.put_u32(self.root);
        packer.put_u32(self.request_window);
        packer.put_u16(self.size_id);
        packer.put_u16(self.subpixel_order);
        packer.put_u16(self.width);
        packer.put_u16(self.height);
        packer.put_u16(self.mwidth);
        packer.put_u16(self.mheight);
        finish_event(packer)
    }
}

impl Event for ScreenChangeNotifyEvent {
    const NUMBER: u8 = 0;
    const NAME: &'static str = "ScreenChangeNotify";
}

pub struct RandrExtension<'c> {
    conn: &'c Connection,
}

impl<'c> Extension<'c> for RandrExtension<'c> {
    const DESCRIPTOR: &'static ExtensionDescriptor = &DESCRIPTOR;

    fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn connection(&self) -> &'c Connection {
        self.conn
    }
}

impl<'c> RandrExtension<'c> {
    pub fn query_version(
        &self,
        major_version: u32,
        minor_version: u32,
    ) -> ConnectionResult<Cookie<'c, QueryVersionReply>> {
        let mut body = Packer::with_order(self.conn.byte_order());
        body.pad(4);
        body.put_u32(major_version);
        body.put_u32(minor_version);
        self.send_request(QUERY_VERSION, body, true)
    }
}
