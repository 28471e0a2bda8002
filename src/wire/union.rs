//! Discriminated overlays of the same bytes

use std::fmt::Debug;

use crate::protocol::{Packer, Unpacker, WireError, WireResult};

use super::Wire;

/// A fixed-size region read as several interpretations at once
///
/// Decoding builds every member from its own copy of the cursor, then
/// advances the caller's cursor by `SIZE`. Encoding writes only the
/// active member, zero-padded to `SIZE`.
pub trait Union: Wire {
    /// Names the members of the union
    type Member: Copy + Eq + Debug;

    /// Size in bytes of the region every member overlays
    const SIZE: usize;

    fn active(&self) -> Self::Member;

    /// Make `member` the one written by `encode`
    fn select(&mut self, member: Self::Member);
}

/// Decode one overlay from an independent copy of `unpacker`
pub fn overlay<T, F>(unpacker: &Unpacker, decode: F) -> WireResult<T>
where
    F: FnOnce(&mut Unpacker) -> WireResult<T>,
{
    decode(&mut unpacker.copy())
}

/// Pad the active member's encoding out to the union size
///
/// `start` is the packer length before the member was written.
pub fn finish_union(packer: &mut Packer, start: usize, size: usize) -> WireResult<()> {
    let written = packer.len() - start;
    if written > size {
        return Err(WireError::LengthMismatch {
            expected: size,
            actual: written,
        });
    }
    packer.pad(size - written);
    Ok(())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::wire::List;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Member {
        Words,
        Halves,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Pair {
        words: List<u32>,
        halves: List<u16>,
        active: Member,
    }

    impl Pair {
        fn set_halves(&mut self, halves: [u16; 4]) -> WireResult<()> {
            self.halves = List::new(halves.to_vec());
            self.select(Member::Halves);
            *self = Self::from_bytes(self.to_bytes()?)?.with_active(Member::Halves);
            Ok(())
        }

        fn with_active(mut self, member: Member) -> Self {
            self.active = member;
            self
        }
    }

    impl Wire for Pair {
        const FIXED_SIZE: Option<usize> = Some(8);

        fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
            let words = overlay(unpacker, |u| List::decode_bulk(u, 2))?;
            let halves = overlay(unpacker, |u| List::decode_bulk(u, 4))?;
            unpacker.skip(Self::SIZE)?;
            Ok(Self {
                words,
                halves,
                active: Member::Words,
            })
        }

        fn encode(&self, packer: &mut Packer) -> WireResult<()> {
            let start = packer.len();
            match self.active {
                Member::Words => self.words.encode(packer)?,
                Member::Halves => self.halves.encode(packer)?,
            }
            finish_union(packer, start, Self::SIZE)
        }
    }

    impl Union for Pair {
        type Member = Member;
        const SIZE: usize = 8;

        fn active(&self) -> Member {
            self.active
        }

        fn select(&mut self, member: Member) {
            self.active = member;
        }
    }

    #[test]
    fn test_overlays_share_bytes() {
        let mut unpacker = Unpacker::new(Bytes::from_static(&[1, 0, 0, 0, 2, 0, 0, 0, 9]));
        let pair = Pair::decode(&mut unpacker).unwrap();
        assert_eq!(pair.words.as_slice(), &[1, 2]);
        assert_eq!(pair.halves.as_slice(), &[1, 0, 2, 0]);
        assert_eq!(unpacker.offset(), 8);
    }

    #[test]
    fn test_encode_writes_active_member() {
        let mut pair = Pair::from_bytes(Bytes::from_static(&[1, 0, 0, 0, 2, 0, 0, 0])).unwrap();
        pair.set_halves([7, 0, 0, 1]).unwrap();
        assert_eq!(pair.active(), Member::Halves);
        assert_eq!(pair.words.as_slice(), &[7, 0x0001_0000]);
        assert_eq!(&pair.to_bytes().unwrap()[..], &[7, 0, 0, 0, 0, 0, 1, 0]);
    }

    #[test]
    fn test_short_member_is_padded() {
        let mut packer = Packer::new();
        packer.put_u16(5);
        finish_union(&mut packer, 0, 8).unwrap();
        assert_eq!(packer.as_bytes(), &[5, 0, 0, 0, 0, 0, 0, 0]);

        let mut packer = Packer::new();
        packer.put_u64(1);
        packer.put_u8(1);
        assert!(finish_union(&mut packer, 0, 8).is_err());
    }
}
