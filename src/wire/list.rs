//! Homogeneous lists of wire values

use std::ops::Deref;

use crate::protocol::{Format, Packer, Unpacker, WireError, WireResult};

use super::{decode_sized, Primitive, Wire};

/// A decoded sequence of elements
///
/// Primitive lists decode in one bulk unpack; lists of structs decode one
/// element at a time, each element consuming however many bytes its own
/// layout needs. `bufsize` is the number of bytes the decode consumed and
/// is zero for lists built in memory.
#[derive(Debug, Clone)]
pub struct List<T> {
    items: Vec<T>,
    bufsize: usize,
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T> List<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items, bufsize: 0 }
    }

    /// Bytes consumed by the decode that produced this list
    pub fn bufsize(&self) -> usize {
        self.bufsize
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T: Primitive> List<T> {
    /// Decode `count` primitives with a single fixed-format unpack
    pub fn decode_bulk(unpacker: &mut Unpacker, count: usize) -> WireResult<Self> {
        let format = Format::repeat(T::CODE, count);
        let start = unpacker.offset();
        let values = unpacker.unpack(&format)?;

        let items = values
            .into_iter()
            .map(|value| {
                T::from_value(value).ok_or_else(|| {
                    WireError::Format(format!("unexpected {:?} in a '{}' list", value, T::CODE.symbol()))
                })
            })
            .collect::<WireResult<Vec<T>>>()?;

        Ok(Self {
            items,
            bufsize: unpacker.offset() - start,
        })
    }
}

impl<T: Wire> List<T> {
    /// Decode `length` elements one at a time
    pub fn decode(unpacker: &mut Unpacker, length: usize) -> WireResult<Self> {
        let start = unpacker.offset();
        // Lengths come off the wire; cap the preallocation by what could fit.
        let mut items = Vec::with_capacity(length.min(unpacker.remaining()));

        for _ in 0..length {
            let (item, _size) = decode_sized::<T>(unpacker)?;
            items.push(item);
        }

        Ok(Self {
            items,
            bufsize: unpacker.offset() - start,
        })
    }

    /// Decode elements until the region is exhausted
    pub fn decode_remaining(unpacker: &mut Unpacker) -> WireResult<Self> {
        let start = unpacker.offset();
        let mut items = Vec::new();

        while !unpacker.is_empty() {
            let (item, size) = decode_sized::<T>(unpacker)?;
            if size == 0 {
                return Err(WireError::Format("zero-sized element in an unbounded list".to_string()));
            }
            items.push(item);
        }

        Ok(Self {
            items,
            bufsize: unpacker.offset() - start,
        })
    }

    /// Encode every element in order
    pub fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        for item in &self.items {
            item.encode(packer)?;
        }
        Ok(())
    }
}

impl List<u8> {
    /// Build a byte list from a string, as used by STRING8 fields
    pub fn from_str_bytes(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }

    /// Interpret the bytes as text, replacing invalid UTF-8
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.items).into_owned()
    }
}

/// Encode a slice of values back to back
pub fn pack_list<T: Wire>(packer: &mut Packer, items: &[T]) -> WireResult<()> {
    for item in items {
        item.encode(packer)?;
    }
    Ok(())
}

// Equality compares elements only; `bufsize` is decode bookkeeping.
impl<T: PartialEq> PartialEq for List<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T> Deref for List<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T> From<Vec<T>> for List<T> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items)
    }
}

impl<T> FromIterator<T> for List<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<T> IntoIterator for List<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a List<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use proptest::prelude::*;

    use super::*;

    /// STR: a length-prefixed byte string
    #[derive(Debug, Clone, PartialEq)]
    struct Str {
        name_len: u8,
        name: List<u8>,
    }

    impl Str {
        fn new(name: &str) -> Self {
            Self {
                name_len: name.len() as u8,
                name: List::from_str_bytes(name),
            }
        }
    }

    impl Wire for Str {
        fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
            let name_len = unpacker.read_u8()?;
            let name = List::decode_bulk(unpacker, name_len as usize)?;
            Ok(Self { name_len, name })
        }

        fn encode(&self, packer: &mut Packer) -> WireResult<()> {
            packer.put_u8(self.name.len() as u8);
            self.name.encode(packer)
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct AxisInfo {
        resolution: u32,
        minimum: i32,
        maximum: i32,
    }

    impl Wire for AxisInfo {
        const FIXED_SIZE: Option<usize> = Some(12);

        fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
            let values = unpacker.unpack_fmt("Iii")?;
            let field = |i: usize| values[i].as_i64().ok_or_else(|| WireError::Format("integer expected".into()));
            Ok(Self {
                resolution: field(0)? as u32,
                minimum: field(1)? as i32,
                maximum: field(2)? as i32,
            })
        }

        fn encode(&self, packer: &mut Packer) -> WireResult<()> {
            packer.pack_fmt("=Iii", &[self.resolution.into(), self.minimum.into(), self.maximum.into()])
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct ValuatorInfo {
        class_id: u8,
        len: u8,
        axes_len: u8,
        mode: u8,
        motion_size: u32,
        axes: List<AxisInfo>,
    }

    impl Wire for ValuatorInfo {
        fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
            let class_id = unpacker.read_u8()?;
            let len = unpacker.read_u8()?;
            let axes_len = unpacker.read_u8()?;
            let mode = unpacker.read_u8()?;
            let motion_size = unpacker.read_u32()?;
            let axes = List::decode(unpacker, axes_len as usize)?;
            Ok(Self { class_id, len, axes_len, mode, motion_size, axes })
        }

        fn encode(&self, packer: &mut Packer) -> WireResult<()> {
            packer.put_u8(self.class_id);
            packer.put_u8(self.len);
            packer.put_u8(self.axes.len() as u8);
            packer.put_u8(self.mode);
            packer.put_u32(self.motion_size);
            self.axes.encode(packer)
        }
    }

    #[test]
    fn test_bulk_list() {
        let mut unpacker = Unpacker::new(Bytes::from_static(&[1, 0, 2, 0, 3, 0]));
        let list = List::<u16>::decode_bulk(&mut unpacker, 3).unwrap();
        assert_eq!(list.as_slice(), &[1, 2, 3]);
        assert_eq!(list.bufsize(), 6);
    }

    #[test]
    fn test_bulk_list_underrun() {
        let mut unpacker = Unpacker::new(Bytes::from_static(&[1, 0, 2]));
        assert!(matches!(
            List::<u16>::decode_bulk(&mut unpacker, 2),
            Err(WireError::BufferUnderrun { needed: 4, available: 3 })
        ));
    }

    #[test]
    fn test_variable_size_elements() {
        let mut packer = Packer::new();
        pack_list(&mut packer, &[Str::new("A"), Str::new("BC")]).unwrap();
        assert_eq!(packer.as_bytes(), &[1, b'A', 2, b'B', b'C']);

        let mut unpacker = Unpacker::new(packer.freeze());
        let names = List::<Str>::decode(&mut unpacker, 2).unwrap();
        assert_eq!(names.bufsize(), 5);
        let text: Vec<String> = names.iter().map(|s| s.name.to_string_lossy()).collect();
        assert_eq!(text, vec!["A", "BC"]);
    }

    #[test]
    fn test_decode_remaining() {
        let mut unpacker = Unpacker::new(Bytes::from_static(&[1, b'x', 0, 2, b'y', b'z']));
        let names = List::<Str>::decode_remaining(&mut unpacker).unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(names[1].name_len, 0);
        assert!(unpacker.is_empty());
    }

    #[test]
    fn test_nested_struct_roundtrip() {
        let info = ValuatorInfo {
            class_id: 2,
            len: 8,
            axes_len: 2,
            mode: 1,
            motion_size: 0,
            axes: List::new(vec![
                AxisInfo { resolution: 1000, minimum: -5, maximum: 65535 },
                AxisInfo { resolution: 1, minimum: 0, maximum: 10 },
            ]),
        };

        let bytes = info.to_bytes().unwrap();
        assert_eq!(bytes.len(), 8 + 2 * 12);

        let mut unpacker = Unpacker::new(bytes.clone());
        let (decoded, size) = decode_sized::<ValuatorInfo>(&mut unpacker).unwrap();
        assert_eq!(decoded, info);
        assert_eq!(size, bytes.len());
    }

    #[test]
    fn test_encode_recomputes_length_prefix() {
        let mut info = ValuatorInfo {
            class_id: 2,
            len: 8,
            axes_len: 0,
            mode: 0,
            motion_size: 0,
            axes: List::default(),
        };
        info.axes.push(AxisInfo { resolution: 1, minimum: 2, maximum: 3 });

        let decoded = ValuatorInfo::from_bytes(info.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.axes_len, 1);
        assert_eq!(decoded.axes.len(), 1);
    }

    #[test]
    fn test_default_list_of_structs() {
        let axes: List<AxisInfo> = List::default();
        assert!(axes.is_empty());
        assert_eq!(axes.bufsize(), 0);
    }

    #[test]
    fn test_padding_excluded_from_fields() {
        let name = Str::new("A");
        let mut packer = Packer::new();
        name.encode(&mut packer).unwrap();
        let padded = packer.freeze_padded();
        assert_eq!(padded.len() % 4, 0);
        assert_eq!(&padded[..], &[1, b'A', 0, 0]);

        let mut unpacker = Unpacker::new(padded);
        let decoded = Str::decode(&mut unpacker).unwrap();
        assert_eq!(decoded, name);
        assert_eq!(unpacker.remaining(), 2);
    }

    proptest! {
        #[test]
        fn prop_bulk_matches_iterative(words in proptest::collection::vec(any::<u32>(), 0..64)) {
            let mut packer = Packer::new();
            pack_list(&mut packer, &words).unwrap();
            let bytes = packer.freeze();

            let bulk = List::<u32>::decode_bulk(&mut Unpacker::new(bytes.clone()), words.len()).unwrap();
            let iterative = List::<u32>::decode(&mut Unpacker::new(bytes), words.len()).unwrap();

            prop_assert_eq!(bulk.as_slice(), iterative.as_slice());
            prop_assert_eq!(bulk.bufsize(), iterative.bufsize());
            prop_assert_eq!(bulk.as_slice(), &words[..]);
        }

        #[test]
        fn prop_str_list_roundtrip(names in proptest::collection::vec("[a-zA-Z]{0,12}", 0..16)) {
            let list: List<Str> = names.iter().map(|n| Str::new(n)).collect();
            let mut packer = Packer::new();
            list.encode(&mut packer).unwrap();
            let encoded_len = packer.len();

            let mut unpacker = Unpacker::new(packer.freeze());
            let decoded = List::<Str>::decode(&mut unpacker, names.len()).unwrap();
            prop_assert_eq!(&decoded, &list);
            prop_assert_eq!(decoded.bufsize(), encoded_len);
        }
    }
}
