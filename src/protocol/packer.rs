//! Append-only byte accumulator

use bytes::{BufMut, Bytes, BytesMut};

use super::codec::{WireError, WireResult};
use super::format::{ByteOrder, Code, Format, Item, Value};
use super::pad;

/// Writes scalars, raw runs and padding in a fixed byte order
#[derive(Debug, Clone, Default)]
pub struct Packer {
    buf: BytesMut,
    order: ByteOrder,
}

impl Packer {
    /// Little-endian packer
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(order: ByteOrder) -> Self {
        Self {
            buf: BytesMut::new(),
            order,
        }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    pub fn put_u16(&mut self, value: u16) {
        Self::put_u16_in(&mut self.buf, value, self.order);
    }

    pub fn put_i16(&mut self, value: i16) {
        self.put_u16(value as u16);
    }

    pub fn put_u32(&mut self, value: u32) {
        Self::put_u32_in(&mut self.buf, value, self.order);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.put_u32(value as u32);
    }

    pub fn put_u64(&mut self, value: u64) {
        Self::put_u64_in(&mut self.buf, value, self.order);
    }

    pub fn put_i64(&mut self, value: i64) {
        self.put_u64(value as u64);
    }

    pub fn put_f32(&mut self, value: f32) {
        self.put_u32(value.to_bits());
    }

    pub fn put_f64(&mut self, value: f64) {
        self.put_u64(value.to_bits());
    }

    /// Append a raw byte run
    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Append `n` zero bytes
    pub fn pad(&mut self, n: usize) {
        self.buf.put_bytes(0, n);
    }

    /// Pad with zeros to the next multiple of `align`
    pub fn align(&mut self, align: usize) {
        self.pad(super::align_pad(self.buf.len(), align));
    }

    /// Pad with zeros up to `len` bytes; longer buffers are left alone
    pub fn pad_to(&mut self, len: usize) {
        if self.buf.len() < len {
            self.pad(len - self.buf.len());
        }
    }

    fn put_u16_in(buf: &mut BytesMut, value: u16, order: ByteOrder) {
        match order {
            ByteOrder::Little => buf.put_u16_le(value),
            ByteOrder::Big => buf.put_u16(value),
        }
    }

    fn put_u32_in(buf: &mut BytesMut, value: u32, order: ByteOrder) {
        match order {
            ByteOrder::Little => buf.put_u32_le(value),
            ByteOrder::Big => buf.put_u32(value),
        }
    }

    fn put_u64_in(buf: &mut BytesMut, value: u64, order: ByteOrder) {
        match order {
            ByteOrder::Little => buf.put_u64_le(value),
            ByteOrder::Big => buf.put_u64(value),
        }
    }

    fn put_value(&mut self, value: Value, order: ByteOrder) {
        match value {
            Value::Char(v) | Value::U8(v) => self.buf.put_u8(v),
            Value::I8(v) => self.buf.put_i8(v),
            Value::Bool(v) => self.buf.put_u8(v as u8),
            Value::I16(v) => Self::put_u16_in(&mut self.buf, v as u16, order),
            Value::U16(v) => Self::put_u16_in(&mut self.buf, v, order),
            Value::I32(v) => Self::put_u32_in(&mut self.buf, v as u32, order),
            Value::U32(v) => Self::put_u32_in(&mut self.buf, v, order),
            Value::I64(v) => Self::put_u64_in(&mut self.buf, v as u64, order),
            Value::U64(v) => Self::put_u64_in(&mut self.buf, v, order),
            Value::F32(v) => Self::put_u32_in(&mut self.buf, v.to_bits(), order),
            Value::F64(v) => Self::put_u64_in(&mut self.buf, v.to_bits(), order),
        }
    }

    /// Append `values` laid out according to `format`
    ///
    /// Every value is checked against its format code before anything is
    /// written, so a failed pack leaves the packer unchanged.
    pub fn pack(&mut self, format: &Format, values: &[Value]) -> WireResult<()> {
        if values.len() != format.value_count() {
            return Err(WireError::Format(format!(
                "format {} takes {} values, got {}",
                format,
                format.value_count(),
                values.len()
            )));
        }

        let mut coerced = Vec::with_capacity(values.len());
        let mut remaining = values.iter();
        for item in format.items() {
            if let Item::Field { code, count } = *item {
                if code == Code::Pad {
                    continue;
                }
                for value in remaining.by_ref().take(count) {
                    coerced.push(value.coerce(code)?);
                }
            }
        }

        let order = format.order().unwrap_or(self.order);
        let mut coerced = coerced.into_iter();
        for item in format.items() {
            match *item {
                Item::Field { code: Code::Pad, count } => self.pad(count),
                Item::Field { count, .. } => {
                    for value in coerced.by_ref().take(count) {
                        self.put_value(value, order);
                    }
                }
                Item::Align(align) => self.align(align),
            }
        }
        Ok(())
    }

    /// Parse `format` and pack `values` with it
    pub fn pack_fmt(&mut self, format: &str, values: &[Value]) -> WireResult<()> {
        self.pack(&Format::parse(format)?, values)
    }

    /// Finish, returning the packed bytes
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Finish, padding the output to a 4-byte boundary
    pub fn freeze_padded(mut self) -> Bytes {
        let n = pad(self.buf.len());
        self.pad(n);
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Unpacker;

    #[test]
    fn test_pack_create_window_body() {
        let mut packer = Packer::new();
        packer
            .pack_fmt(
                "=xB2xIIhhHHHHI",
                &[
                    24u8.into(),
                    0x0040_0001u32.into(),
                    0x0000_01e6u32.into(),
                    0i16.into(),
                    (-5i16).into(),
                    1u16.into(),
                    1u16.into(),
                    0u16.into(),
                    1u16.into(),
                    0x21u32.into(),
                ],
            )
            .unwrap();
        assert_eq!(packer.len(), 28);
        assert_eq!(&packer.as_bytes()[..4], &[0, 24, 0, 0]);
        assert_eq!(&packer.as_bytes()[12..14], &[0, 0]);
        assert_eq!(&packer.as_bytes()[14..16], &[0xfb, 0xff]);
    }

    #[test]
    fn test_pack_unpack_agree() {
        let values = vec![Value::U8(3), Value::I32(-2), Value::U64(1 << 40), Value::F32(1.5)];
        let format = Format::parse("B4aiQf").unwrap();

        let mut packer = Packer::with_order(ByteOrder::Big);
        packer.pack(&format, &values).unwrap();
        assert_eq!(packer.len(), format.size());

        let mut unpacker = Unpacker::new(packer.freeze()).with_order(ByteOrder::Big);
        assert_eq!(unpacker.unpack(&format).unwrap(), values);
    }

    #[test]
    fn test_pack_arity_mismatch() {
        let mut packer = Packer::new();
        assert!(matches!(
            packer.pack_fmt("BB", &[Value::U8(1)]),
            Err(WireError::Format(_))
        ));
        assert!(packer.is_empty());
    }

    #[test]
    fn test_pack_out_of_range_leaves_packer_untouched() {
        let mut packer = Packer::new();
        assert!(packer.pack_fmt("BB", &[Value::U8(1), Value::U32(256)]).is_err());
        assert!(packer.is_empty());
    }

    #[test]
    fn test_freeze_padded() {
        let mut packer = Packer::new();
        packer.put_u8(1);
        packer.put_u16(2);
        let bytes = packer.freeze_padded();
        assert_eq!(&bytes[..], &[1, 2, 0, 0]);
    }

    #[test]
    fn test_alignment() {
        let mut packer = Packer::new();
        packer.put_u8(1);
        packer.align(4);
        packer.put_u32(7);
        assert_eq!(packer.as_bytes(), &[1, 0, 0, 0, 7, 0, 0, 0]);
    }
}
