//! Extension namespaces
//!
//! Each namespace (the core protocol or a named extension) is described by
//! a static [`ExtensionDescriptor`]: the requests it declares, the events it
//! can decode and the names of the errors it reports. Descriptors are
//! registered with a connection's [`Registry`] when the connection is made;
//! request encoders are typed wrappers implementing [`Extension`].

mod registry;

pub use registry::*;

use std::fmt;

use crate::network::{Connection, ConnectionResult, Cookie};
use crate::protocol::{Packer, Unpacker, WireResult};
use crate::wire::{AnyEvent, Event, Reply};

/// Identifies an extension by the name the server advertises it under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionKey {
    name: &'static str,
}

impl ExtensionKey {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for ExtensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The opcode space a request, event or error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Core,
    Extension(ExtensionKey),
}

impl Namespace {
    /// Extension name, `None` for the core protocol
    pub fn extension_name(&self) -> Option<&'static str> {
        match self {
            Namespace::Core => None,
            Namespace::Extension(key) => Some(key.name()),
        }
    }

    pub fn label(&self) -> &'static str {
        self.extension_name().unwrap_or("core")
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Server-assigned numbering for a supported extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtensionInfo {
    pub major_opcode: u8,
    pub first_event: u8,
    pub first_error: u8,
}

/// Decodes one event frame, positioned at its first byte
pub type EventDecoder = fn(&mut Unpacker) -> WireResult<Box<dyn AnyEvent>>;

/// The [`EventDecoder`] for a concrete event type
pub fn event_decoder<E: Event>(unpacker: &mut Unpacker) -> WireResult<Box<dyn AnyEvent>> {
    Ok(Box::new(E::decode(unpacker)?))
}

/// Static decoding tables for one namespace
pub struct ExtensionDescriptor {
    pub namespace: Namespace,
    /// Declared request opcodes and their names
    pub requests: &'static [(u8, &'static str)],
    /// Event decoders keyed by event number relative to the namespace
    pub events: &'static [(u8, EventDecoder)],
    /// Generic (code 35) event decoders keyed by event type
    pub generic_events: &'static [(u16, EventDecoder)],
    /// Error names keyed by error number relative to the namespace
    pub errors: &'static [(u8, &'static str)],
}

impl ExtensionDescriptor {
    pub fn request_name(&self, opcode: u8) -> Option<&'static str> {
        self.requests
            .iter()
            .find(|(number, _)| *number == opcode)
            .map(|(_, name)| *name)
    }

    pub fn declares(&self, opcode: u8) -> bool {
        self.request_name(opcode).is_some()
    }

    pub fn event_decoder(&self, number: u8) -> Option<EventDecoder> {
        self.events
            .iter()
            .find(|(n, _)| *n == number)
            .map(|(_, decoder)| *decoder)
    }

    pub fn generic_event_decoder(&self, event_type: u16) -> Option<EventDecoder> {
        self.generic_events
            .iter()
            .find(|(t, _)| *t == event_type)
            .map(|(_, decoder)| *decoder)
    }

    pub fn error_name(&self, number: u8) -> Option<&'static str> {
        self.errors
            .iter()
            .find(|(n, _)| *n == number)
            .map(|(_, name)| *name)
    }
}

impl fmt::Debug for ExtensionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDescriptor")
            .field("namespace", &self.namespace)
            .field("requests", &self.requests.len())
            .field("events", &self.events.len())
            .field("generic_events", &self.generic_events.len())
            .field("errors", &self.errors.len())
            .finish()
    }
}

/// Request encoders for one namespace, bound to a connection
pub trait Extension<'c>: Sized {
    const DESCRIPTOR: &'static ExtensionDescriptor;

    fn new(conn: &'c Connection) -> Self;

    fn connection(&self) -> &'c Connection;

    /// Send a packed request body in this namespace
    ///
    /// The first four bytes of `body` are the request header placeholder.
    fn send_request<R: Reply>(
        &self,
        opcode: u8,
        body: Packer,
        is_checked: bool,
    ) -> ConnectionResult<Cookie<'c, R>> {
        self.connection()
            .send_request(Self::DESCRIPTOR.namespace, opcode, body.freeze(), is_checked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_labels() {
        let randr = Namespace::Extension(ExtensionKey::new("RANDR"));
        assert_eq!(Namespace::Core.label(), "core");
        assert_eq!(randr.to_string(), "RANDR");
        assert_eq!(randr.extension_name(), Some("RANDR"));
        assert_ne!(randr, Namespace::Extension(ExtensionKey::new("XFIXES")));
    }

    #[test]
    fn test_descriptor_lookups() {
        let core = crate::xproto::descriptor();
        assert_eq!(core.request_name(99), Some("ListExtensions"));
        assert!(core.declares(127));
        assert!(!core.declares(200));
        assert_eq!(core.error_name(3), Some("Window"));
        assert!(core.event_decoder(16).is_some());
        assert!(core.event_decoder(60).is_none());
    }
}
