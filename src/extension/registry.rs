//! Per-connection lookup of requests, events and errors across namespaces

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;

use super::{ExtensionDescriptor, ExtensionInfo, ExtensionKey, Namespace};
use crate::protocol::{ByteOrder, Unpacker, WireResult, GENERIC_EVENT_CODE, SEND_EVENT_MASK};
use crate::wire::{AnyEvent, UnknownEvent};

/// Core event codes occupy the range below the first extension event
const FIRST_EXTENSION_EVENT: u8 = 64;

/// Core error codes occupy the range below the first extension error
const FIRST_EXTENSION_ERROR: u8 = 128;

/// An error reported by the server for a request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name} error (code {code}) for request {major_opcode}.{minor_opcode}, sequence {sequence}, bad value {bad_value:#x}")]
pub struct ServerError {
    /// Registered name of the error, `"Unknown"` when none is registered
    pub name: &'static str,
    /// Extension that reported the error, `None` for the core protocol
    pub namespace: Option<&'static str>,
    /// Error code as it appeared on the wire
    pub code: u8,
    /// Error number relative to its namespace
    pub number: u8,
    pub sequence: u64,
    pub bad_value: u32,
    pub minor_opcode: u16,
    pub major_opcode: u8,
}

#[derive(Debug)]
struct Registered {
    descriptor: &'static ExtensionDescriptor,
    /// `None` when the server does not support the extension
    info: Option<ExtensionInfo>,
}

/// Decoding tables for the core protocol and every registered extension
#[derive(Debug)]
pub struct Registry {
    core: &'static ExtensionDescriptor,
    extensions: HashMap<ExtensionKey, Registered>,
}

impl Registry {
    pub fn new(core: &'static ExtensionDescriptor) -> Self {
        Self {
            core,
            extensions: HashMap::new(),
        }
    }

    /// Register an extension's tables with the numbering the server assigned
    pub fn register(&mut self, descriptor: &'static ExtensionDescriptor, info: Option<ExtensionInfo>) {
        if let Namespace::Extension(key) = descriptor.namespace {
            self.extensions.insert(key, Registered { descriptor, info });
        }
    }

    /// Tables for a namespace, if it is the core or a registered extension
    pub fn descriptor(&self, namespace: Namespace) -> Option<&'static ExtensionDescriptor> {
        match namespace {
            Namespace::Core => Some(self.core),
            Namespace::Extension(key) => self.extensions.get(&key).map(|r| r.descriptor),
        }
    }

    /// Numbering of a registered extension the server supports
    pub fn info(&self, key: &ExtensionKey) -> Option<ExtensionInfo> {
        self.extensions.get(key).and_then(|r| r.info)
    }

    /// Look up an extension by the name the server advertises
    pub fn info_by_name(&self, name: &str) -> Option<ExtensionInfo> {
        self.extensions
            .iter()
            .find(|(key, _)| key.name() == name)
            .and_then(|(_, r)| r.info)
    }

    /// Registered extension names with their numbering, sorted by name
    pub fn extensions(&self) -> Vec<(&'static str, Option<ExtensionInfo>)> {
        let mut list: Vec<_> = self.extensions.iter().map(|(key, r)| (key.name(), r.info)).collect();
        list.sort_by_key(|(name, _)| *name);
        list
    }

    pub fn request_name(&self, namespace: Namespace, opcode: u8) -> Option<&'static str> {
        self.descriptor(namespace)?.request_name(opcode)
    }

    fn supported(&self) -> impl Iterator<Item = (&'static ExtensionDescriptor, ExtensionInfo)> + '_ {
        self.extensions
            .values()
            .filter_map(|r| r.info.map(|info| (r.descriptor, info)))
    }

    /// The supported extension whose base is the highest one not above
    /// `code`, with the code's number relative to that base
    ///
    /// A base of zero means the extension defines no codes of that kind.
    fn nearest(&self, code: u8, base: impl Fn(&ExtensionInfo) -> u8) -> Option<(&'static ExtensionDescriptor, u8)> {
        self.supported()
            .map(|(descriptor, info)| (descriptor, base(&info)))
            .filter(|&(_, first)| first != 0 && first <= code)
            .max_by_key(|&(_, first)| first)
            .map(|(descriptor, first)| (descriptor, code - first))
    }

    /// Resolve a wire error code to `(namespace, number, name)`
    pub fn error_name(&self, code: u8) -> (Option<&'static str>, u8, &'static str) {
        if code < FIRST_EXTENSION_ERROR {
            if let Some(name) = self.core.error_name(code) {
                return (None, code, name);
            }
        }

        if let Some((descriptor, number)) = self.nearest(code, |info| info.first_error) {
            if let Some(name) = descriptor.error_name(number) {
                return (descriptor.namespace.extension_name(), number, name);
            }
        }

        (None, code, "Unknown")
    }

    /// Decode a 32-byte error frame
    pub fn decode_error(&self, frame: &Bytes, sequence: u64, order: ByteOrder) -> WireResult<ServerError> {
        let mut unpacker = Unpacker::new(frame.clone()).with_order(order);
        unpacker.skip(1)?;
        let code = unpacker.read_u8()?;
        unpacker.skip(2)?;
        let bad_value = unpacker.read_u32()?;
        let minor_opcode = unpacker.read_u16()?;
        let major_opcode = unpacker.read_u8()?;

        let (namespace, number, name) = self.error_name(code);
        Ok(ServerError {
            name,
            namespace,
            code,
            number,
            sequence,
            bad_value,
            minor_opcode,
            major_opcode,
        })
    }

    /// Decode an event frame with the decoder registered for its code
    ///
    /// Codes with no registered decoder yield an [`UnknownEvent`].
    pub fn decode_event(&self, frame: &Bytes, order: ByteOrder) -> WireResult<Box<dyn AnyEvent>> {
        let mut unpacker = Unpacker::new(frame.clone()).with_order(order);
        let code = unpacker.copy().read_u8()? & !SEND_EVENT_MASK;

        let decoder = if code == GENERIC_EVENT_CODE {
            self.generic_decoder(&unpacker)?
        } else if code < FIRST_EXTENSION_EVENT {
            self.core.event_decoder(code)
        } else {
            self.nearest(code, |info| info.first_event)
                .and_then(|(descriptor, number)| descriptor.event_decoder(number))
        };

        match decoder {
            Some(decode) => decode(&mut unpacker),
            None => {
                tracing::trace!("No decoder for event code {}", code);
                Ok(Box::new(UnknownEvent::decode(&mut unpacker)?))
            }
        }
    }

    /// Generic events name their extension by major opcode in byte 1 and
    /// their type in the 16-bit field at offset 8
    fn generic_decoder(&self, unpacker: &Unpacker) -> WireResult<Option<super::EventDecoder>> {
        let mut header = unpacker.copy();
        header.skip(1)?;
        let major_opcode = header.read_u8()?;
        header.skip(6)?;
        let event_type = header.read_u16()?;

        if let Some(decoder) = self.core.generic_event_decoder(event_type).filter(|_| major_opcode == 0) {
            return Ok(Some(decoder));
        }

        Ok(self
            .supported()
            .filter(|(_, info)| info.major_opcode == major_opcode)
            .find_map(|(descriptor, _)| descriptor.generic_event_decoder(event_type)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_error, FRAME_SIZE};
    use crate::wire::Wire;
    use crate::extension::{event_decoder, EventDecoder};
    use crate::xproto::{self, randr, CreateNotifyEvent};

    const XFIXES_EVENTS: [(u8, EventDecoder); 1] = [(1, event_decoder::<CreateNotifyEvent> as EventDecoder)];

    const XFIXES: ExtensionDescriptor = ExtensionDescriptor {
        namespace: Namespace::Extension(ExtensionKey::new("XFIXES")),
        requests: &[],
        events: &XFIXES_EVENTS,
        generic_events: &[],
        errors: &[(0, "BadRegion")],
    };

    fn registry() -> Registry {
        let mut registry = Registry::new(xproto::descriptor());
        registry.register(
            randr::descriptor(),
            Some(ExtensionInfo {
                major_opcode: 140,
                first_event: 89,
                first_error: 147,
            }),
        );
        registry
    }

    #[test]
    fn test_core_error_names() {
        let registry = registry();
        let frame = build_error(ByteOrder::Little, 3, 7, 0x0040_0001, 0, 2);
        let error = registry.decode_error(&frame, 7, ByteOrder::Little).unwrap();
        assert_eq!(error.name, "Window");
        assert_eq!(error.namespace, None);
        assert_eq!(error.bad_value, 0x0040_0001);
        assert_eq!(error.major_opcode, 2);
    }

    #[test]
    fn test_extension_error_names() {
        let registry = registry();
        assert_eq!(registry.error_name(148), (Some("RANDR"), 1, "BadCrtc"));
        assert_eq!(registry.error_name(250), (None, 250, "Unknown"));
        assert_eq!(registry.error_name(100), (None, 100, "Unknown"));
    }

    #[test]
    fn test_core_event_dispatch() {
        let registry = registry();
        let event = CreateNotifyEvent {
            synthetic: true,
            sequence: 4,
            parent: 1,
            window: 2,
            x: 0,
            y: 0,
            width: 10,
            height: 10,
            border_width: 0,
            override_redirect: false,
        };
        let frame = event.to_bytes().unwrap();
        assert_eq!(frame[0], 16 | SEND_EVENT_MASK);

        let decoded = registry.decode_event(&frame, ByteOrder::Little).unwrap();
        assert_eq!(decoded.name(), "CreateNotify");
        assert_eq!(decoded.downcast_ref::<CreateNotifyEvent>(), Some(&event));
    }

    #[test]
    fn test_extension_event_dispatch() {
        let registry = registry();
        let mut frame = vec![0u8; FRAME_SIZE];
        frame[0] = 89;
        let decoded = registry.decode_event(&Bytes::from(frame), ByteOrder::Little).unwrap();
        assert_eq!(decoded.name(), "ScreenChangeNotify");
    }

    #[test]
    fn test_unknown_event() {
        let registry = registry();
        let mut frame = vec![0u8; FRAME_SIZE];
        frame[0] = 120;
        let decoded = registry.decode_event(&Bytes::from(frame), ByteOrder::Little).unwrap();
        let unknown = decoded.downcast_ref::<UnknownEvent>().unwrap();
        assert_eq!(unknown.response_type, 120);
        assert_eq!(unknown.bytes.len(), FRAME_SIZE);
    }

    #[test]
    fn test_overlapping_ranges_resolve_to_nearest_base() {
        let mut registry = registry();
        registry.register(
            &XFIXES,
            Some(ExtensionInfo {
                major_opcode: 138,
                first_event: 88,
                first_error: 148,
            }),
        );

        assert_eq!(registry.error_name(147), (Some("RANDR"), 0, "BadOutput"));
        assert_eq!(registry.error_name(148), (Some("XFIXES"), 0, "BadRegion"));
        assert_eq!(registry.error_name(149), (None, 149, "Unknown"));

        let mut frame = vec![0u8; FRAME_SIZE];
        frame[0] = 89;
        let decoded = registry.decode_event(&Bytes::from(frame), ByteOrder::Little).unwrap();
        assert_eq!(decoded.name(), "ScreenChangeNotify");
    }

    #[test]
    fn test_unsupported_extension_is_not_consulted() {
        let mut registry = Registry::new(xproto::descriptor());
        registry.register(randr::descriptor(), None);
        assert_eq!(registry.error_name(148).2, "Unknown");
        assert!(registry.descriptor(randr::NAMESPACE).is_some());
        assert!(registry.info(&randr::KEY).is_none());
        assert_eq!(registry.extensions(), vec![("RANDR", None)]);
    }
}
