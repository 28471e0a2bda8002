//! Protocol module - Codec primitives for the X11-style wire protocol
//!
//! The protocol uses a packed binary format:
//! - Requests: 1 byte major opcode, 1 byte data/minor opcode, 2 byte length
//!   (in 4-byte units), then the body padded to a 4-byte boundary
//! - Inbound frames: 32 bytes, byte 0 is the category (0 error, 1 reply,
//!   2..=127 event), bytes 2-3 the sequence number; replies and generic
//!   events carry `4 * length` extra bytes
//!
//! Multi-byte fields follow the byte order of the cursor reading them,
//! little-endian unless configured otherwise.

mod codec;
mod format;
mod packer;
mod unpacker;

pub use codec::*;
pub use format::*;
pub use packer::*;
pub use unpacker::*;

/// Major version of the modelled core protocol
pub const X_PROTOCOL: u16 = 11;

/// Minor version of the modelled core protocol
pub const X_PROTOCOL_REVISION: u16 = 0;

/// The "no resource" identifier
pub const NONE: u32 = 0;

/// Value meaning "inherit from the parent window"
pub const COPY_FROM_PARENT: u32 = 0;

/// Timestamp value meaning "the server's current time"
pub const CURRENT_TIME: u32 = 0;

/// Keysym value meaning "no symbol"
pub const NO_SYMBOL: u32 = 0;

/// Number of bytes needed to pad `n` to a 4-byte boundary
pub fn pad(n: usize) -> usize {
    (4 - (n % 4)) % 4
}

/// `n` rounded up to a 4-byte boundary
pub fn padded_len(n: usize) -> usize {
    n + pad(n)
}

/// Number of bytes needed to move `offset` to the next multiple of `align`
pub fn align_pad(offset: usize, align: usize) -> usize {
    if align <= 1 {
        return 0;
    }
    (align - (offset % align)) % align
}
