//! Core protocol events

use crate::protocol::{ByteOrder, Packer, Unpacker, WireError, WireResult, SEND_EVENT_MASK};
use crate::wire::{finish_event, finish_union, overlay, put_event_code, Event, List, Union, Wire};

/// Read the code byte, returning whether the event was sent by a client
fn read_event_code(unpacker: &mut Unpacker) -> WireResult<bool> {
    Ok(unpacker.read_u8()? & SEND_EVENT_MASK != 0)
}

/// Current state of the keyboard; carries no sequence number
#[derive(Debug, Clone, PartialEq)]
pub struct KeymapNotifyEvent {
    pub synthetic: bool,
    /// Bit vector for keycodes 8 through 255
    pub keys: List<u8>,
}

impl Wire for KeymapNotifyEvent {
    const FIXED_SIZE: Option<usize> = Some(32);

    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let synthetic = read_event_code(unpacker)?;
        let keys = List::decode_bulk(unpacker, 31)?;
        Ok(Self { synthetic, keys })
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        if self.keys.len() > 31 {
            return Err(WireError::LengthMismatch {
                expected: 31,
                actual: self.keys.len(),
            });
        }
        put_event_code::<Self>(packer, 0, self.synthetic);
        self.keys.encode(packer)?;
        finish_event(packer)
    }
}

impl Event for KeymapNotifyEvent {
    const NUMBER: u8 = 11;
    const NAME: &'static str = "KeymapNotify";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNotifyEvent {
    pub synthetic: bool,
    pub sequence: u16,
    pub parent: u32,
    pub window: u32,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub border_width: u16,
    pub override_redirect: bool,
}

impl Wire for CreateNotifyEvent {
    const FIXED_SIZE: Option<usize> = Some(32);

    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let synthetic = read_event_code(unpacker)?;
        unpacker.skip(1)?;
        let sequence = unpacker.read_u16()?;
        let parent = unpacker.read_u32()?;
        let window = unpacker.read_u32()?;
        let x = unpacker.read_i16()?;
        let y = unpacker.read_i16()?;
        let width = unpacker.read_u16()?;
        let height = unpacker.read_u16()?;
        let border_width = unpacker.read_u16()?;
        let override_redirect = unpacker.read_bool()?;
        unpacker.skip(9)?;

        Ok(Self {
            synthetic,
            sequence,
            parent,
            window,
            x,
            y,
            width,
            height,
            border_width,
            override_redirect,
        })
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        put_event_code::<Self>(packer, 0, self.synthetic);
        packer.pad(1);
        packer.put_u16(self.sequence);
        packer.put_u32(self.parent);
        packer.put_u32(self.window);
        packer.put_i16(self.x);
        packer.put_i16(self.y);
        packer.put_u16(self.width);
        packer.put_u16(self.height);
        packer.put_u16(self.border_width);
        packer.put_bool(self.override_redirect);
        finish_event(packer)
    }
}

impl Event for CreateNotifyEvent {
    const NUMBER: u8 = 16;
    const NAME: &'static str = "CreateNotify";
}

/// Which view of [`ClientMessageData`] is written on encode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessageFormat {
    Data8,
    Data16,
    Data32,
}

impl ClientMessageFormat {
    /// The value of the event's format byte
    pub fn bits(self) -> u8 {
        match self {
            ClientMessageFormat::Data8 => 8,
            ClientMessageFormat::Data16 => 16,
            ClientMessageFormat::Data32 => 32,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            8 => Some(ClientMessageFormat::Data8),
            16 => Some(ClientMessageFormat::Data16),
            32 => Some(ClientMessageFormat::Data32),
            _ => None,
        }
    }
}

/// Twenty bytes of client message payload, viewed three ways
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMessageData {
    pub data8: List<u8>,
    pub data16: List<u16>,
    pub data32: List<u32>,
    active: ClientMessageFormat,
}

impl ClientMessageData {
    /// Build from the 8-bit view; the other views read the bytes in `order`
    pub fn from_data8(values: [u8; 20], order: ByteOrder) -> WireResult<Self> {
        Self::from_active(List::new(values.to_vec()), ClientMessageFormat::Data8, order)
    }

    pub fn from_data16(values: [u16; 10], order: ByteOrder) -> WireResult<Self> {
        Self::from_active(List::new(values.to_vec()), ClientMessageFormat::Data16, order)
    }

    pub fn from_data32(values: [u32; 5], order: ByteOrder) -> WireResult<Self> {
        Self::from_active(List::new(values.to_vec()), ClientMessageFormat::Data32, order)
    }

    pub fn set_data8(&mut self, values: [u8; 20], order: ByteOrder) -> WireResult<()> {
        *self = Self::from_data8(values, order)?;
        Ok(())
    }

    pub fn set_data16(&mut self, values: [u16; 10], order: ByteOrder) -> WireResult<()> {
        *self = Self::from_data16(values, order)?;
        Ok(())
    }

    pub fn set_data32(&mut self, values: [u32; 5], order: ByteOrder) -> WireResult<()> {
        *self = Self::from_data32(values, order)?;
        Ok(())
    }

    /// Encode one member, then rebuild every overlay from those bytes
    fn from_active<T: Wire>(member: List<T>, active: ClientMessageFormat, order: ByteOrder) -> WireResult<Self> {
        let mut packer = Packer::with_order(order);
        member.encode(&mut packer)?;
        finish_union(&mut packer, 0, Self::SIZE)?;

        let mut data = Self::decode(&mut Unpacker::new(packer.freeze()).with_order(order))?;
        data.active = active;
        Ok(data)
    }
}

impl Wire for ClientMessageData {
    const FIXED_SIZE: Option<usize> = Some(20);

    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let data8 = overlay(unpacker, |u| List::decode_bulk(u, 20))?;
        let data16 = overlay(unpacker, |u| List::decode_bulk(u, 10))?;
        let data32 = overlay(unpacker, |u| List::decode_bulk(u, 5))?;
        unpacker.skip(Self::SIZE)?;
        Ok(Self {
            data8,
            data16,
            data32,
            active: ClientMessageFormat::Data32,
        })
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        let start = packer.len();
        match self.active {
            ClientMessageFormat::Data8 => self.data8.encode(packer)?,
            ClientMessageFormat::Data16 => self.data16.encode(packer)?,
            ClientMessageFormat::Data32 => self.data32.encode(packer)?,
        }
        finish_union(packer, start, Self::SIZE)
    }
}

impl Union for ClientMessageData {
    type Member = ClientMessageFormat;
    const SIZE: usize = 20;

    fn active(&self) -> ClientMessageFormat {
        self.active
    }

    fn select(&mut self, member: ClientMessageFormat) {
        self.active = member;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientMessageEvent {
    pub synthetic: bool,
    pub sequence: u16,
    pub window: u32,
    pub message_type: u32,
    pub data: ClientMessageData,
}

impl ClientMessageEvent {
    /// Format byte derived from the active data member
    pub fn format(&self) -> u8 {
        self.data.active().bits()
    }
}

impl Wire for ClientMessageEvent {
    const FIXED_SIZE: Option<usize> = Some(32);

    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let synthetic = read_event_code(unpacker)?;
        let format = unpacker.read_u8()?;
        let sequence = unpacker.read_u16()?;
        let window = unpacker.read_u32()?;
        let message_type = unpacker.read_u32()?;
        let mut data = ClientMessageData::decode(unpacker)?;

        // An unrecognised format keeps the 32-bit view.
        if let Some(member) = ClientMessageFormat::from_bits(format) {
            data.select(member);
        }

        Ok(Self {
            synthetic,
            sequence,
            window,
            message_type,
            data,
        })
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        put_event_code::<Self>(packer, 0, self.synthetic);
        packer.put_u8(self.format());
        packer.put_u16(self.sequence);
        packer.put_u32(self.window);
        packer.put_u32(self.message_type);
        self.data.encode(packer)?;
        finish_event(packer)
    }
}

impl Event for ClientMessageEvent {
    const NUMBER: u8 = 33;
    const NAME: &'static str = "ClientMessage";
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_keymap_notify_has_no_sequence() {
        let mut frame = vec![0u8; 32];
        frame[0] = 11;
        frame[1] = 0xff;
        frame[31] = 0x80;

        let event = KeymapNotifyEvent::from_bytes(Bytes::from(frame.clone())).unwrap();
        assert_eq!(event.keys.len(), 31);
        assert_eq!(event.keys[0], 0xff);
        assert_eq!(event.keys[30], 0x80);
        assert_eq!(&event.to_bytes().unwrap()[..], &frame[..]);
    }

    #[test]
    fn test_create_notify_roundtrip() {
        let event = CreateNotifyEvent {
            synthetic: false,
            sequence: 0x1234,
            parent: 0x1e6,
            window: 0x0040_0001,
            x: -10,
            y: 20,
            width: 640,
            height: 480,
            border_width: 1,
            override_redirect: true,
        };
        let bytes = event.to_bytes().unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[2..4], &[0x34, 0x12]);
        assert_eq!(bytes[22], 1);
        assert_eq!(CreateNotifyEvent::from_bytes(bytes).unwrap(), event);
    }

    #[test]
    fn test_client_message_union_views() {
        let mut frame = vec![0u8; 32];
        frame[0] = 33;
        frame[1] = 32;
        frame[12..20].copy_from_slice(&[1, 0, 0, 0, 2, 0, 0, 0]);

        let event = ClientMessageEvent::from_bytes(Bytes::from(frame.clone())).unwrap();
        assert_eq!(event.data.active(), ClientMessageFormat::Data32);
        assert_eq!(&event.data.data32[..2], &[1, 2]);
        assert_eq!(&event.data.data16[..4], &[1, 0, 2, 0]);
        assert_eq!(event.data.data8[4], 2);
        assert_eq!(&event.to_bytes().unwrap()[..], &frame[..]);
    }

    #[test]
    fn test_client_message_format_follows_active_member() {
        let mut event = ClientMessageEvent {
            synthetic: true,
            sequence: 0,
            window: 7,
            message_type: 300,
            data: ClientMessageData::from_data32([0; 5], ByteOrder::Little).unwrap(),
        };
        event.data.set_data16([0xabcd, 0, 0, 0, 0, 0, 0, 0, 0, 1], ByteOrder::Little).unwrap();

        assert_eq!(event.format(), 16);
        assert_eq!(event.data.data32[0], 0xabcd);
        assert_eq!(event.data.data8[18], 1);

        let bytes = event.to_bytes().unwrap();
        assert_eq!(bytes[0], 33 | SEND_EVENT_MASK);
        assert_eq!(bytes[1], 16);
        let decoded = ClientMessageEvent::from_bytes(bytes).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_client_message_views_follow_byte_order() {
        let data = ClientMessageData::from_data32([0x0001_0002, 0, 0, 0, 0x0304_0506], ByteOrder::Big).unwrap();
        assert_eq!(&data.data16[..2], &[1, 2]);
        assert_eq!(&data.data8[..4], &[0, 1, 0, 2]);
        assert_eq!(&data.data8[16..], &[3, 4, 5, 6]);

        let mut packer = Packer::with_order(ByteOrder::Big);
        data.encode(&mut packer).unwrap();
        let decoded = ClientMessageData::decode(&mut Unpacker::new(packer.freeze()).with_order(ByteOrder::Big)).unwrap();
        assert_eq!(decoded, data);

        let little = ClientMessageData::from_data32([0x0001_0002, 0, 0, 0, 0], ByteOrder::Little).unwrap();
        assert_eq!(&little.data16[..2], &[2, 1]);
    }
}
