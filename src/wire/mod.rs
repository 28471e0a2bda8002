//! Wire value model
//!
//! Typed views decoded from an [`Unpacker`] and encoded into a [`Packer`]:
//! structs, unions, lists, and the event/reply categories recognised at the
//! protocol boundary.

mod list;
mod union;

pub use list::*;
pub use union::*;

use std::any::Any;
use std::fmt;

use bytes::Bytes;

use crate::protocol::{ByteOrder, Code, Packer, Unpacker, Value, WireError, WireResult};

/// A value with a packed wire representation
///
/// `decode` reads fields in declaration order, so later fields may depend
/// on earlier ones (a count governing a following list). `encode` writes
/// the same order from the current field values, recomputing any length
/// prefixes from the live collections.
pub trait Wire: Sized {
    /// Encoded size when it does not depend on the value
    const FIXED_SIZE: Option<usize> = None;

    fn decode(unpacker: &mut Unpacker) -> WireResult<Self>;

    fn encode(&self, packer: &mut Packer) -> WireResult<()>;

    /// Decode from the start of a little-endian buffer
    fn from_bytes(buf: Bytes) -> WireResult<Self> {
        Self::decode(&mut Unpacker::new(buf))
    }

    /// Encode into a fresh little-endian buffer
    fn to_bytes(&self) -> WireResult<Bytes> {
        self.to_bytes_in(ByteOrder::Little)
    }

    fn to_bytes_in(&self, order: ByteOrder) -> WireResult<Bytes> {
        let mut packer = Packer::with_order(order);
        self.encode(&mut packer)?;
        Ok(packer.freeze())
    }
}

/// Decode a value and report how many bytes it consumed
pub fn decode_sized<T: Wire>(unpacker: &mut Unpacker) -> WireResult<(T, usize)> {
    let start = unpacker.offset();
    let value = T::decode(unpacker)?;
    Ok((value, unpacker.offset() - start))
}

/// Scalar element types that lists can decode in one bulk unpack
pub trait Primitive: Wire + Copy {
    const CODE: Code;

    fn from_value(value: Value) -> Option<Self>;

    fn into_value(self) -> Value;
}

macro_rules! primitive {
    ($($ty:ty => $code:ident, $variant:ident, $read:ident, $put:ident);* $(;)?) => {
        $(
            impl Wire for $ty {
                const FIXED_SIZE: Option<usize> = Some(std::mem::size_of::<$ty>());

                fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
                    unpacker.$read()
                }

                fn encode(&self, packer: &mut Packer) -> WireResult<()> {
                    packer.$put(*self);
                    Ok(())
                }
            }

            impl Primitive for $ty {
                const CODE: Code = Code::$code;

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v),
                        _ => None,
                    }
                }

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }
            }
        )*
    };
}

primitive! {
    u8 => U8, U8, read_u8, put_u8;
    i8 => I8, I8, read_i8, put_i8;
    bool => Bool, Bool, read_bool, put_bool;
    u16 => U16, U16, read_u16, put_u16;
    i16 => I16, I16, read_i16, put_i16;
    u32 => U32, U32, read_u32, put_u32;
    i32 => I32, I32, read_i32, put_i32;
    u64 => U64, U64, read_u64, put_u64;
    i64 => I64, I64, read_i64, put_i64;
    f32 => F32, F32, read_f32, put_f32;
    f64 => F64, F64, read_f64, put_f64;
}

/// A reply type a cookie can decode its frame into
pub trait Reply: Wire {
    /// Requests whose cookie carries a void reply never produce a reply frame
    const IS_VOID: bool = false;
}

/// Reply type of requests that produce no reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Void;

impl Wire for Void {
    const FIXED_SIZE: Option<usize> = Some(0);

    fn decode(_unpacker: &mut Unpacker) -> WireResult<Self> {
        Ok(Void)
    }

    fn encode(&self, _packer: &mut Packer) -> WireResult<()> {
        Ok(())
    }
}

impl Reply for Void {
    const IS_VOID: bool = true;
}

/// A 32-byte (or generic, longer) event frame
///
/// `NUMBER` is relative to the event's namespace: core events use their
/// wire code, extension events are offset by the extension's first event.
pub trait Event: Wire + fmt::Debug + Send + 'static {
    const NUMBER: u8;
    const NAME: &'static str;
}

/// A decoded event of any registered type
pub trait AnyEvent: Any + fmt::Debug + Send {
    fn name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<E: Event> AnyEvent for E {
    fn name(&self) -> &'static str {
        E::NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl dyn AnyEvent {
    pub fn is<E: AnyEvent>(&self) -> bool {
        self.as_any().is::<E>()
    }

    pub fn downcast_ref<E: AnyEvent>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    pub fn downcast<E: AnyEvent>(self: Box<Self>) -> Option<Box<E>> {
        self.into_any().downcast::<E>().ok()
    }
}

/// An event whose code has no registered decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEvent {
    /// Raw first byte, including the send-event bit
    pub response_type: u8,
    pub bytes: Bytes,
}

impl UnknownEvent {
    pub fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let response_type = unpacker.copy().read_u8()?;
        let bytes = unpacker.take(unpacker.remaining())?;
        Ok(Self { response_type, bytes })
    }
}

impl AnyEvent for UnknownEvent {
    fn name(&self) -> &'static str {
        "Unknown"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Write an event's code byte, honouring the send-event flag
pub fn put_event_code<E: Event>(packer: &mut Packer, first_event: u8, synthetic: bool) {
    let code = E::NUMBER.wrapping_add(first_event);
    packer.put_u8(if synthetic { code | crate::protocol::SEND_EVENT_MASK } else { code });
}

/// Pad an encoded event to the fixed 32-byte frame size
pub fn finish_event(packer: &mut Packer) -> WireResult<()> {
    if packer.len() > crate::protocol::FRAME_SIZE {
        return Err(WireError::FrameTooLarge(packer.len(), crate::protocol::FRAME_SIZE));
    }
    packer.pad_to(crate::protocol::FRAME_SIZE);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping {
        sequence: u16,
        stamp: u32,
    }

    impl Wire for Ping {
        const FIXED_SIZE: Option<usize> = Some(32);

        fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
            unpacker.skip(2)?;
            let sequence = unpacker.read_u16()?;
            let stamp = unpacker.read_u32()?;
            unpacker.skip(24)?;
            Ok(Self { sequence, stamp })
        }

        fn encode(&self, packer: &mut Packer) -> WireResult<()> {
            put_event_code::<Self>(packer, 0, false);
            packer.pad(1);
            packer.put_u16(self.sequence);
            packer.put_u32(self.stamp);
            finish_event(packer)
        }
    }

    impl Event for Ping {
        const NUMBER: u8 = 40;
        const NAME: &'static str = "Ping";
    }

    #[test]
    fn test_primitive_wire() {
        let bytes = 0x1234_5678u32.to_bytes().unwrap();
        assert_eq!(&bytes[..], &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(u32::from_bytes(bytes).unwrap(), 0x1234_5678);
        assert_eq!(u16::FIXED_SIZE, Some(2));
    }

    #[test]
    fn test_decode_sized() {
        let mut unpacker = Unpacker::new(Bytes::from_static(&[1, 0, 2, 0, 0, 0]));
        let (value, size) = decode_sized::<u16>(&mut unpacker).unwrap();
        assert_eq!((value, size), (1, 2));
        let (value, size) = decode_sized::<u32>(&mut unpacker).unwrap();
        assert_eq!((value, size), (2, 4));
    }

    #[test]
    fn test_event_downcast() {
        let ping = Ping { sequence: 3, stamp: 9 };
        let bytes = ping.to_bytes().unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[0], 40);

        let event: Box<dyn AnyEvent> = Box::new(Ping::from_bytes(bytes).unwrap());
        assert_eq!(event.name(), "Ping");
        assert!(event.is::<Ping>());
        assert!(!event.is::<UnknownEvent>());
        assert_eq!(event.downcast_ref::<Ping>(), Some(&ping));
        assert_eq!(*event.downcast::<Ping>().unwrap(), ping);
    }

    #[test]
    fn test_void_reply() {
        assert!(Void::IS_VOID);
        assert_eq!(Void.to_bytes().unwrap().len(), 0);
    }
}
