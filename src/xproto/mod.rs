//! Core protocol namespace
//!
//! A hand-written subset of the core protocol: enough requests, replies,
//! events and errors to drive a connection end to end. Extension
//! namespaces live in submodules.

mod events;
pub mod randr;
mod setup;

pub use events::*;
pub use setup::*;

use crate::extension::{event_decoder, EventDecoder, Extension, ExtensionDescriptor, Namespace};
use crate::network::{Connection, ConnectionResult, Cookie};
use crate::protocol::{padded_len, Packer, Unpacker, WireError, WireResult, FRAME_SIZE, REPLY_CODE};
use crate::wire::{List, Reply, Void, Wire};

pub const CREATE_WINDOW: u8 = 1;
pub const CHANGE_WINDOW_ATTRIBUTES: u8 = 2;
pub const GET_GEOMETRY: u8 = 14;
pub const QUERY_TREE: u8 = 15;
pub const GET_INPUT_FOCUS: u8 = 43;
pub const LIST_EXTENSIONS: u8 = 99;
pub const NO_OPERATION: u8 = 127;

const REQUESTS: [(u8, &str); 7] = [
    (CREATE_WINDOW, "CreateWindow"),
    (CHANGE_WINDOW_ATTRIBUTES, "ChangeWindowAttributes"),
    (GET_GEOMETRY, "GetGeometry"),
    (QUERY_TREE, "QueryTree"),
    (GET_INPUT_FOCUS, "GetInputFocus"),
    (LIST_EXTENSIONS, "ListExtensions"),
    (NO_OPERATION, "NoOperation"),
];

const EVENTS: [(u8, EventDecoder); 3] = [
    (11, event_decoder::<KeymapNotifyEvent> as EventDecoder),
    (16, event_decoder::<CreateNotifyEvent> as EventDecoder),
    (33, event_decoder::<ClientMessageEvent> as EventDecoder),
];

const ERRORS: [(u8, &str); 17] = [
    (1, "Request"),
    (2, "Value"),
    (3, "Window"),
    (4, "Pixmap"),
    (5, "Atom"),
    (6, "Cursor"),
    (7, "Font"),
    (8, "Match"),
    (9, "Drawable"),
    (10, "Access"),
    (11, "Alloc"),
    (12, "Colormap"),
    (13, "GContext"),
    (14, "IDChoice"),
    (15, "Name"),
    (16, "Length"),
    (17, "Implementation"),
];

const DESCRIPTOR: ExtensionDescriptor = ExtensionDescriptor {
    namespace: Namespace::Core,
    requests: &REQUESTS,
    events: &EVENTS,
    generic_events: &[],
    errors: &ERRORS,
};

/// Decoding tables of the core protocol
pub fn descriptor() -> &'static ExtensionDescriptor {
    &DESCRIPTOR
}

/// Extension namespaces known to this crate
pub fn extensions() -> &'static [&'static ExtensionDescriptor] {
    const KNOWN: &[&ExtensionDescriptor] = &[&randr::DESCRIPTOR];
    KNOWN
}

/// Read the 8-byte reply header: `(data byte, sequence, length)`
pub(crate) fn read_reply_header(unpacker: &mut Unpacker) -> WireResult<(u8, u16, u32)> {
    let code = unpacker.read_u8()?;
    if code != REPLY_CODE {
        return Err(WireError::Format(format!("expected a reply frame, got code {}", code)));
    }
    let data = unpacker.read_u8()?;
    let sequence = unpacker.read_u16()?;
    let length = unpacker.read_u32()?;
    Ok((data, sequence, length))
}

/// Write a reply frame whose body (after the 8-byte header) is produced
/// by `body`; the length field is computed from what it writes
pub(crate) fn put_reply<F>(packer: &mut Packer, data: u8, sequence: u16, body: F) -> WireResult<()>
where
    F: FnOnce(&mut Packer) -> WireResult<()>,
{
    let mut inner = Packer::with_order(packer.order());
    body(&mut inner)?;
    let total = padded_len((8 + inner.len()).max(FRAME_SIZE));

    packer.put_u8(REPLY_CODE);
    packer.put_u8(data);
    packer.put_u16(sequence);
    packer.put_u32(((total - FRAME_SIZE) / 4) as u32);
    let written = inner.len();
    packer.put_slice(&inner.freeze());
    packer.pad(total - 8 - written);
    Ok(())
}

/// Skip the rest of a reply whose extra length is `length` words
pub(crate) fn finish_reply(unpacker: &mut Unpacker, length: u32) -> WireResult<()> {
    let total = FRAME_SIZE + length as usize * 4;
    if unpacker.offset() < total {
        unpacker.skip(total - unpacker.offset())?;
    }
    Ok(())
}

/// STR: a length-prefixed byte string
#[derive(Debug, Clone, PartialEq)]
pub struct Str {
    pub name_len: u8,
    pub name: List<u8>,
}

impl Str {
    pub fn new(name: &str) -> Self {
        let name = List::from_str_bytes(name);
        Self {
            name_len: name.len() as u8,
            name,
        }
    }

    pub fn to_string_lossy(&self) -> String {
        self.name.to_string_lossy()
    }
}

impl Wire for Str {
    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let name_len = unpacker.read_u8()?;
        let name = List::decode_bulk(unpacker, name_len as usize)?;
        Ok(Self { name_len, name })
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        let len = u8::try_from(self.name.len())
            .map_err(|_| WireError::FrameTooLarge(self.name.len(), u8::MAX as usize))?;
        packer.put_u8(len);
        self.name.encode(packer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetGeometryReply {
    pub sequence: u16,
    pub depth: u8,
    pub root: u32,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub border_width: u16,
}

impl Wire for GetGeometryReply {
    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let (depth, sequence, length) = read_reply_header(unpacker)?;
        let root = unpacker.read_u32()?;
        let x = unpacker.read_i16()?;
        let y = unpacker.read_i16()?;
        let width = unpacker.read_u16()?;
        let height = unpacker.read_u16()?;
        let border_width = unpacker.read_u16()?;
        finish_reply(unpacker, length)?;
        Ok(Self {
            sequence,
            depth,
            root,
            x,
            y,
            width,
            height,
            border_width,
        })
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        put_reply(packer, self.depth, self.sequence, |body| {
            body.put_u32(self.root);
            body.put_i16(self.x);
            body.put_i16(self.y);
            body.put_u16(self.width);
            body.put_u16(self.height);
            body.put_u16(self.border_width);
            Ok(())
        })
    }
}

impl Reply for GetGeometryReply {}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryTreeReply {
    pub sequence: u16,
    pub root: u32,
    pub parent: u32,
    pub children: List<u32>,
}

impl Wire for QueryTreeReply {
    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let (_, sequence, length) = read_reply_header(unpacker)?;
        let root = unpacker.read_u32()?;
        let parent = unpacker.read_u32()?;
        let children_len = unpacker.read_u16()?;
        unpacker.skip(14)?;
        let children = List::decode_bulk(unpacker, children_len as usize)?;
        finish_reply(unpacker, length)?;
        Ok(Self {
            sequence,
            root,
            parent,
            children,
        })
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        let children_len = u16::try_from(self.children.len())
            .map_err(|_| WireError::FrameTooLarge(self.children.len(), u16::MAX as usize))?;
        put_reply(packer, 0, self.sequence, |body| {
            body.put_u32(self.root);
            body.put_u32(self.parent);
            body.put_u16(children_len);
            body.pad(14);
            self.children.encode(body)
        })
    }
}

impl Reply for QueryTreeReply {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetInputFocusReply {
    pub sequence: u16,
    pub revert_to: u8,
    pub focus: u32,
}

impl Wire for GetInputFocusReply {
    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let (revert_to, sequence, length) = read_reply_header(unpacker)?;
        let focus = unpacker.read_u32()?;
        finish_reply(unpacker, length)?;
        Ok(Self {
            sequence,
            revert_to,
            focus,
        })
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        put_reply(packer, self.revert_to, self.sequence, |body| {
            body.put_u32(self.focus);
            Ok(())
        })
    }
}

impl Reply for GetInputFocusReply {}

#[derive(Debug, Clone, PartialEq)]
pub struct ListExtensionsReply {
    pub sequence: u16,
    pub names_len: u8,
    pub names: List<Str>,
}

impl ListExtensionsReply {
    pub fn new(sequence: u16, names: &[&str]) -> Self {
        Self {
            sequence,
            names_len: names.len() as u8,
            names: names.iter().map(|name| Str::new(name)).collect(),
        }
    }

    pub fn name_strings(&self) -> Vec<String> {
        self.names.iter().map(Str::to_string_lossy).collect()
    }
}

impl Wire for ListExtensionsReply {
    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let (names_len, sequence, length) = read_reply_header(unpacker)?;
        unpacker.skip(24)?;
        let names = List::decode(unpacker, names_len as usize)?;
        unpacker.align(4)?;
        finish_reply(unpacker, length)?;
        Ok(Self {
            sequence,
            names_len,
            names,
        })
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        let names_len = u8::try_from(self.names.len())
            .map_err(|_| WireError::FrameTooLarge(self.names.len(), u8::MAX as usize))?;
        put_reply(packer, names_len, self.sequence, |body| {
            body.pad(24);
            self.names.encode(body)?;
            body.align(4);
            Ok(())
        })
    }
}

impl Reply for ListExtensionsReply {}

/// Window attributes accompanying CreateWindow and ChangeWindowAttributes
///
/// `value_mask` selects which attributes follow, one 32-bit value per set
/// bit in ascending bit order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueList {
    pub value_mask: u32,
    pub values: Vec<u32>,
}

impl ValueList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` for the attribute selected by the single-bit mask `bit`,
    /// keeping bit order
    pub fn with(mut self, bit: u32, value: u32) -> Self {
        if !bit.is_power_of_two() {
            return self;
        }
        let index = (self.value_mask & (bit - 1)).count_ones() as usize;
        if self.value_mask & bit != 0 {
            self.values[index] = value;
        } else {
            self.value_mask |= bit;
            self.values.insert(index, value);
        }
        self
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        if self.values.len() != self.value_mask.count_ones() as usize {
            return Err(WireError::LengthMismatch {
                expected: self.value_mask.count_ones() as usize,
                actual: self.values.len(),
            });
        }
        packer.put_u32(self.value_mask);
        for value in &self.values {
            packer.put_u32(*value);
        }
        Ok(())
    }
}

/// Parameters of a CreateWindow request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateWindowRequest {
    pub depth: u8,
    pub wid: u32,
    pub parent: u32,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub border_width: u16,
    pub class: u16,
    pub visual: u32,
    pub values: ValueList,
}

/// Request encoders of the core protocol
pub struct XprotoExtension<'c> {
    conn: &'c Connection,
}

impl<'c> Extension<'c> for XprotoExtension<'c> {
    const DESCRIPTOR: &'static ExtensionDescriptor = &DESCRIPTOR;

    fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn connection(&self) -> &'c Connection {
        self.conn
    }
}

impl<'c> XprotoExtension<'c> {
    fn request(&self) -> Packer {
        Packer::with_order(self.conn.byte_order())
    }

    pub fn create_window(&self, request: &CreateWindowRequest, is_checked: bool) -> ConnectionResult<Cookie<'c, Void>> {
        let mut body = self.request();
        body.pad(1);
        body.put_u8(request.depth);
        body.pad(2);
        body.put_u32(request.wid);
        body.put_u32(request.parent);
        body.put_i16(request.x);
        body.put_i16(request.y);
        body.put_u16(request.width);
        body.put_u16(request.height);
        body.put_u16(request.border_width);
        body.put_u16(request.class);
        body.put_u32(request.visual);
        request.values.encode(&mut body)?;
        self.send_request(CREATE_WINDOW, body, is_checked)
    }

    pub fn create_window_checked(&self, request: &CreateWindowRequest) -> ConnectionResult<Cookie<'c, Void>> {
        self.create_window(request, true)
    }

    pub fn change_window_attributes(
        &self,
        window: u32,
        values: &ValueList,
        is_checked: bool,
    ) -> ConnectionResult<Cookie<'c, Void>> {
        let mut body = self.request();
        body.pad(4);
        body.put_u32(window);
        values.encode(&mut body)?;
        self.send_request(CHANGE_WINDOW_ATTRIBUTES, body, is_checked)
    }

    pub fn change_window_attributes_checked(
        &self,
        window: u32,
        values: &ValueList,
    ) -> ConnectionResult<Cookie<'c, Void>> {
        self.change_window_attributes(window, values, true)
    }

    pub fn get_geometry(&self, drawable: u32) -> ConnectionResult<Cookie<'c, GetGeometryReply>> {
        let mut body = self.request();
        body.pad(4);
        body.put_u32(drawable);
        self.send_request(GET_GEOMETRY, body, true)
    }

    pub fn query_tree(&self, window: u32) -> ConnectionResult<Cookie<'c, QueryTreeReply>> {
        let mut body = self.request();
        body.pad(4);
        body.put_u32(window);
        self.send_request(QUERY_TREE, body, true)
    }

    pub fn get_input_focus(&self) -> ConnectionResult<Cookie<'c, GetInputFocusReply>> {
        let mut body = self.request();
        body.pad(4);
        self.send_request(GET_INPUT_FOCUS, body, true)
    }

    pub fn list_extensions(&self) -> ConnectionResult<Cookie<'c, ListExtensionsReply>> {
        let mut body = self.request();
        body.pad(4);
        self.send_request(LIST_EXTENSIONS, body, true)
    }

    pub fn no_operation(&self, is_checked: bool) -> ConnectionResult<Cookie<'c, Void>> {
        let mut body = self.request();
        body.pad(4);
        self.send_request(NO_OPERATION, body, is_checked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_reply, ByteOrder};

    #[test]
    fn test_list_extensions_reply_decode() {
        let mut body = vec![0u8; 24];
        body.extend_from_slice(&[1, b'A', 2, b'B', b'C']);
        let frame = build_reply(ByteOrder::Little, 1, 2, &body);

        let reply = ListExtensionsReply::from_bytes(frame.clone()).unwrap();
        assert_eq!(reply.names_len, 2);
        assert_eq!(reply.name_strings(), vec!["A", "BC"]);
        assert_eq!(reply.to_bytes().unwrap(), frame);
    }

    #[test]
    fn test_reply_encode_recomputes_counts() {
        let mut reply = ListExtensionsReply::new(9, &["RANDR"]);
        reply.names.push(Str::new("XFIXES"));

        let bytes = reply.to_bytes().unwrap();
        assert_eq!(bytes[1], 2);
        let length = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        assert_eq!(bytes.len(), 32 + length * 4);

        let decoded = ListExtensionsReply::from_bytes(bytes).unwrap();
        assert_eq!(decoded.names_len, 2);
        assert_eq!(decoded.name_strings(), vec!["RANDR", "XFIXES"]);
    }

    #[test]
    fn test_query_tree_reply_roundtrip() {
        let reply = QueryTreeReply {
            sequence: 3,
            root: 0x1e6,
            parent: 0,
            children: List::new(vec![0x0040_0001, 0x0040_0002, 0x0040_0003]),
        };
        let bytes = reply.to_bytes_in(ByteOrder::Big).unwrap();
        assert_eq!(bytes.len(), 32 + 12);

        let mut unpacker = Unpacker::new(bytes).with_order(ByteOrder::Big);
        assert_eq!(QueryTreeReply::decode(&mut unpacker).unwrap(), reply);
        assert!(unpacker.is_empty());
    }

    #[test]
    fn test_short_reply_padded_to_frame() {
        let reply = GetInputFocusReply {
            sequence: 1,
            revert_to: 2,
            focus: 0x1e6,
        };
        let bytes = reply.to_bytes().unwrap();
        assert_eq!(bytes.len(), FRAME_SIZE);
        assert_eq!(GetInputFocusReply::from_bytes(bytes).unwrap(), reply);
    }

    #[test]
    fn test_value_list_orders_by_bit() {
        let values = ValueList::new().with(0x800, 7).with(0x2, 1).with(0x800, 8);
        assert_eq!(values.value_mask, 0x802);
        assert_eq!(values.values, vec![1, 8]);
    }

    #[test]
    fn test_descriptor_tables() {
        assert_eq!(descriptor().errors.len(), 17);
        assert_eq!(descriptor().error_name(17), Some("Implementation"));
        assert_eq!(extensions().len(), 1);
    }
}
