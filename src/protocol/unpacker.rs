//! Offset-tracked read cursor over an immutable byte buffer

use bytes::{Buf, Bytes};

use super::codec::{WireError, WireResult};
use super::format::{ByteOrder, Code, Format, Item, Value};

/// Sequential read view over a region of a shared buffer
///
/// Cloning an `Unpacker` is cheap and yields an independent cursor at the
/// same position, which is how unions read several overlays of the same
/// bytes.
#[derive(Debug, Clone)]
pub struct Unpacker {
    buf: Bytes,
    /// Absolute start of the region; alignment is measured from here
    start: usize,
    /// Absolute read position
    pos: usize,
    /// Absolute end of the region
    end: usize,
    order: ByteOrder,
}

impl Unpacker {
    /// Cursor over the whole buffer, little-endian
    pub fn new(buf: Bytes) -> Self {
        let end = buf.len();
        Self {
            buf,
            start: 0,
            pos: 0,
            end,
            order: ByteOrder::Little,
        }
    }

    /// Cursor over `size` bytes starting at `offset`
    ///
    /// Without an explicit size the region extends to the end of the buffer.
    pub fn with_region(buf: Bytes, offset: usize, size: Option<usize>) -> WireResult<Self> {
        let len = buf.len();
        let size = match size {
            Some(size) => size,
            None => len.checked_sub(offset).ok_or(WireError::InvalidRegion {
                offset,
                size: 0,
                len,
            })?,
        };

        match offset.checked_add(size) {
            Some(end) if end <= len => Ok(Self {
                buf,
                start: offset,
                pos: offset,
                end,
                order: ByteOrder::Little,
            }),
            _ => Err(WireError::InvalidRegion { offset, size, len }),
        }
    }

    pub fn with_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Bytes consumed since the start of the region
    pub fn offset(&self) -> usize {
        self.pos - self.start
    }

    /// Bytes this view may still consume
    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    /// Total size of the region
    pub fn bufsize(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// An independent cursor at the current position
    pub fn copy(&self) -> Self {
        self.clone()
    }

    fn ensure(&self, needed: usize) -> WireResult<()> {
        if needed > self.remaining() {
            return Err(WireError::BufferUnderrun {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    fn chunk(&mut self, n: usize) -> WireResult<&[u8]> {
        self.ensure(n)?;
        let at = self.pos;
        self.pos += n;
        Ok(&self.buf[at..at + n])
    }

    /// Skip `n` bytes
    pub fn skip(&mut self, n: usize) -> WireResult<()> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    /// Skip to the next multiple of `align`, measured from the region start
    pub fn align(&mut self, align: usize) -> WireResult<()> {
        self.skip(super::align_pad(self.offset(), align))
    }

    /// Take `n` raw bytes without copying
    pub fn take(&mut self, n: usize) -> WireResult<Bytes> {
        self.ensure(n)?;
        let bytes = self.buf.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(bytes)
    }

    /// Carve the next `n` bytes into a child cursor and advance past them
    pub fn sub(&mut self, n: usize) -> WireResult<Unpacker> {
        self.ensure(n)?;
        let child = Unpacker {
            buf: self.buf.clone(),
            start: self.pos,
            pos: self.pos,
            end: self.pos + n,
            order: self.order,
        };
        self.pos += n;
        Ok(child)
    }

    /// The unread bytes of the region
    pub fn rest(&self) -> Bytes {
        self.buf.slice(self.pos..self.end)
    }

    pub fn read_u8(&mut self) -> WireResult<u8> {
        Ok(self.chunk(1)?[0])
    }

    pub fn read_i8(&mut self) -> WireResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> WireResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> WireResult<u16> {
        self.read_u16_in(self.order)
    }

    pub fn read_i16(&mut self) -> WireResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> WireResult<u32> {
        self.read_u32_in(self.order)
    }

    pub fn read_i32(&mut self) -> WireResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> WireResult<u64> {
        self.read_u64_in(self.order)
    }

    pub fn read_i64(&mut self) -> WireResult<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> WireResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> WireResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    fn read_u16_in(&mut self, order: ByteOrder) -> WireResult<u16> {
        let mut chunk = self.chunk(2)?;
        Ok(match order {
            ByteOrder::Little => chunk.get_u16_le(),
            ByteOrder::Big => chunk.get_u16(),
        })
    }

    fn read_u32_in(&mut self, order: ByteOrder) -> WireResult<u32> {
        let mut chunk = self.chunk(4)?;
        Ok(match order {
            ByteOrder::Little => chunk.get_u32_le(),
            ByteOrder::Big => chunk.get_u32(),
        })
    }

    fn read_u64_in(&mut self, order: ByteOrder) -> WireResult<u64> {
        let mut chunk = self.chunk(8)?;
        Ok(match order {
            ByteOrder::Little => chunk.get_u64_le(),
            ByteOrder::Big => chunk.get_u64(),
        })
    }

    fn read_value(&mut self, code: Code, order: ByteOrder) -> WireResult<Value> {
        let value = match code {
            Code::Pad => unreachable!("pad items are skipped, not read"),
            Code::Char => Value::Char(self.read_u8()?),
            Code::I8 => Value::I8(self.read_i8()?),
            Code::U8 => Value::U8(self.read_u8()?),
            Code::Bool => Value::Bool(self.read_bool()?),
            Code::I16 => Value::I16(self.read_u16_in(order)? as i16),
            Code::U16 => Value::U16(self.read_u16_in(order)?),
            Code::I32 => Value::I32(self.read_u32_in(order)? as i32),
            Code::U32 => Value::U32(self.read_u32_in(order)?),
            Code::I64 => Value::I64(self.read_u64_in(order)? as i64),
            Code::U64 => Value::U64(self.read_u64_in(order)?),
            Code::F32 => Value::F32(f32::from_bits(self.read_u32_in(order)?)),
            Code::F64 => Value::F64(f64::from_bits(self.read_u64_in(order)?)),
        };
        Ok(value)
    }

    /// Decode values according to `format`, advancing past every byte it
    /// describes including padding
    ///
    /// The whole format is bounds-checked before anything is consumed, so
    /// a failed unpack leaves the cursor where it was.
    pub fn unpack(&mut self, format: &Format) -> WireResult<Vec<Value>> {
        self.ensure(format.size_at(self.offset()))?;

        let order = format.order().unwrap_or(self.order);
        let mut values = Vec::with_capacity(format.value_count());

        for item in format.items() {
            match *item {
                Item::Field { code: Code::Pad, count } => self.skip(count)?,
                Item::Field { code, count } => {
                    for _ in 0..count {
                        values.push(self.read_value(code, order)?);
                    }
                }
                Item::Align(align) => self.align(align)?,
            }
        }
        Ok(values)
    }

    /// Parse `format` and unpack it
    pub fn unpack_fmt(&mut self, format: &str) -> WireResult<Vec<Value>> {
        self.unpack(&Format::parse(format)?)
    }
}
