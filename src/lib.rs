//! xwire - X11-style wire protocol codec and request/reply correlation
//!
//! The protocol layer reads and writes binary records; the wire layer maps
//! them onto typed values; the network layer numbers requests, routes
//! replies, errors and events, and hands out cookies.

pub mod config;
pub mod extension;
pub mod network;
pub mod protocol;
pub mod wire;
pub mod xproto;

pub use extension::{Extension, ExtensionInfo, Namespace, ServerError};
pub use network::{CloseReason, Connection, ConnectionError, ConnectionResult, Cookie, MemoryTransport, Transport};
pub use protocol::{ByteOrder, Packer, Unpacker, WireError, WireResult};
pub use wire::{AnyEvent, Event, List, Reply, Void, Wire};
