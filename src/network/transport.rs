//! The byte-stream side of a connection
//!
//! A [`Transport`] owns the socket (or stand-in) and the connection
//! handshake. The connection only asks it to write request bytes, to hand
//! over inbound frames, and for a few values it learned while connecting.

use bytes::Bytes;
use thiserror::Error;

use crate::extension::{ExtensionInfo, Namespace};
use crate::protocol::{Frame, WireError};

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Framing error: {0}")]
    Framing(#[from] WireError),

    #[error("Transport disconnected")]
    Disconnected,

    #[error("Resource identifiers exhausted")]
    IdsExhausted,

    #[error("Transport failed: {0}")]
    Failed(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A request ready to be written, header filled and body padded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    pub namespace: Namespace,
    /// Request number within its namespace
    pub opcode: u8,
    pub is_checked: bool,
    /// The request produces no reply
    pub is_void: bool,
    pub bytes: Bytes,
}

/// The transport collaborator of a [`Connection`](super::Connection)
///
/// Blocking calls may block indefinitely; there is no timeout.
pub trait Transport {
    /// Write one request and return the sequence number assigned to it
    fn send(&mut self, request: OutgoingRequest) -> TransportResult<u64>;

    /// Write out any buffered requests
    fn flush(&mut self) -> TransportResult<()>;

    /// Block for the next inbound frame
    ///
    /// With a sequence, returns `None` once no frame for that request can
    /// arrive any more; without one, once the stream has no further frames.
    fn wait_for_frame(&mut self, sequence: Option<u64>) -> TransportResult<Option<Frame>>;

    /// The next inbound frame if one is already available
    fn poll_frame(&mut self) -> TransportResult<Option<Frame>>;

    /// A fresh resource identifier
    fn generate_id(&mut self) -> TransportResult<u32>;

    /// Ask the server whether it supports an extension
    fn query_extension(&mut self, name: &str) -> TransportResult<Option<ExtensionInfo>>;

    /// Largest request the server accepts, in 4-byte units
    fn maximum_request_length(&self) -> u32;

    /// The setup block received during the handshake
    fn setup_bytes(&self) -> Bytes;

    fn disconnect(&mut self);
}
