//! Network module - Connection to a server speaking the wire protocol
//!
//! Provides:
//! - The transport seam and an in-memory transport
//! - Connection management and frame routing
//! - Cookies for requests in flight

mod connection;
mod cookie;
mod memory;
mod transport;

pub use connection::*;
pub use cookie::*;
pub use memory::*;
pub use transport::*;
