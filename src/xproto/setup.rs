//! Connection setup information

use crate::protocol::{ByteOrder, Packer, Unpacker, WireError, WireResult, X_PROTOCOL, X_PROTOCOL_REVISION};
use crate::wire::{List, Wire};

/// Setup status byte of an accepted connection
pub const SETUP_SUCCESS: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixmapFormat {
    pub depth: u8,
    pub bits_per_pixel: u8,
    pub scanline_pad: u8,
}

impl Wire for PixmapFormat {
    const FIXED_SIZE: Option<usize> = Some(8);

    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let depth = unpacker.read_u8()?;
        let bits_per_pixel = unpacker.read_u8()?;
        let scanline_pad = unpacker.read_u8()?;
        unpacker.skip(5)?;
        Ok(Self {
            depth,
            bits_per_pixel,
            scanline_pad,
        })
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        packer.put_u8(self.depth);
        packer.put_u8(self.bits_per_pixel);
        packer.put_u8(self.scanline_pad);
        packer.pad(5);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisualType {
    pub visual_id: u32,
    pub class: u8,
    pub bits_per_rgb_value: u8,
    pub colormap_entries: u16,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
}

impl Wire for VisualType {
    const FIXED_SIZE: Option<usize> = Some(24);

    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let visual_id = unpacker.read_u32()?;
        let class = unpacker.read_u8()?;
        let bits_per_rgb_value = unpacker.read_u8()?;
        let colormap_entries = unpacker.read_u16()?;
        let red_mask = unpacker.read_u32()?;
        let green_mask = unpacker.read_u32()?;
        let blue_mask = unpacker.read_u32()?;
        unpacker.skip(4)?;
        Ok(Self {
            visual_id,
            class,
            bits_per_rgb_value,
            colormap_entries,
            red_mask,
            green_mask,
            blue_mask,
        })
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        packer.put_u32(self.visual_id);
        packer.put_u8(self.class);
        packer.put_u8(self.bits_per_rgb_value);
        packer.put_u16(self.colormap_entries);
        packer.put_u32(self.red_mask);
        packer.put_u32(self.green_mask);
        packer.put_u32(self.blue_mask);
        packer.pad(4);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Depth {
    pub depth: u8,
    pub visuals: List<VisualType>,
}

impl Wire for Depth {
    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let depth = unpacker.read_u8()?;
        unpacker.skip(1)?;
        let visuals_len = unpacker.read_u16()?;
        unpacker.skip(4)?;
        let visuals = List::decode(unpacker, visuals_len as usize)?;
        Ok(Self { depth, visuals })
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        packer.put_u8(self.depth);
        packer.pad(1);
        packer.put_u16(len_u16(self.visuals.len())?);
        packer.pad(4);
        self.visuals.encode(packer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Screen {
    pub root: u32,
    pub default_colormap: u32,
    pub white_pixel: u32,
    pub black_pixel: u32,
    pub current_input_masks: u32,
    pub width_in_pixels: u16,
    pub height_in_pixels: u16,
    pub width_in_millimeters: u16,
    pub height_in_millimeters: u16,
    pub min_installed_maps: u16,
    pub max_installed_maps: u16,
    pub root_visual: u32,
    pub backing_stores: u8,
    pub save_unders: bool,
    pub root_depth: u8,
    pub allowed_depths: List<Depth>,
}

impl Wire for Screen {
    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let root = unpacker.read_u32()?;
        let default_colormap = unpacker.read_u32()?;
        let white_pixel = unpacker.read_u32()?;
        let black_pixel = unpacker.read_u32()?;
        let current_input_masks = unpacker.read_u32()?;
        let width_in_pixels = unpacker.read_u16()?;
        let height_in_pixels = unpacker.read_u16()?;
        let width_in_millimeters = unpacker.read_u16()?;
        let height_in_millimeters = unpacker.read_u16()?;
        let min_installed_maps = unpacker.read_u16()?;
        let max_installed_maps = unpacker.read_u16()?;
        let root_visual = unpacker.read_u32()?;
        let backing_stores = unpacker.read_u8()?;
        let save_unders = unpacker.read_bool()?;
        let root_depth = unpacker.read_u8()?;
        let allowed_depths_len = unpacker.read_u8()?;
        let allowed_depths = List::decode(unpacker, allowed_depths_len as usize)?;

        Ok(Self {
            root,
            default_colormap,
            white_pixel,
            black_pixel,
            current_input_masks,
            width_in_pixels,
            height_in_pixels,
            width_in_millimeters,
            height_in_millimeters,
            min_installed_maps,
            max_installed_maps,
            root_visual,
            backing_stores,
            save_unders,
            root_depth,
            allowed_depths,
        })
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        packer.put_u32(self.root);
        packer.put_u32(self.default_colormap);
        packer.put_u32(self.white_pixel);
        packer.put_u32(self.black_pixel);
        packer.put_u32(self.current_input_masks);
        packer.put_u16(self.width_in_pixels);
        packer.put_u16(self.height_in_pixels);
        packer.put_u16(self.width_in_millimeters);
        packer.put_u16(self.height_in_millimeters);
        packer.put_u16(self.min_installed_maps);
        packer.put_u16(self.max_installed_maps);
        packer.put_u32(self.root_visual);
        packer.put_u8(self.backing_stores);
        packer.put_bool(self.save_unders);
        packer.put_u8(self.root_depth);
        packer.put_u8(len_u8(self.allowed_depths.len())?);
        self.allowed_depths.encode(packer)
    }
}

/// The server's reply to a successful connection handshake
///
/// Decoded once when a connection is made and immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Setup {
    pub status: u8,
    pub protocol_major_version: u16,
    pub protocol_minor_version: u16,
    pub release_number: u32,
    pub resource_id_base: u32,
    pub resource_id_mask: u32,
    pub motion_buffer_size: u32,
    /// In 4-byte units
    pub maximum_request_length: u16,
    pub image_byte_order: u8,
    pub bitmap_format_bit_order: u8,
    pub bitmap_format_scanline_unit: u8,
    pub bitmap_format_scanline_pad: u8,
    pub min_keycode: u8,
    pub max_keycode: u8,
    pub vendor: List<u8>,
    pub pixmap_formats: List<PixmapFormat>,
    pub roots: List<Screen>,
}

impl Setup {
    /// A single-screen setup for in-process servers and tests
    pub fn virtual_screen(vendor: &str, width: u16, height: u16) -> Self {
        let visual = VisualType {
            visual_id: 0x21,
            class: 4,
            bits_per_rgb_value: 8,
            colormap_entries: 256,
            red_mask: 0x00ff_0000,
            green_mask: 0x0000_ff00,
            blue_mask: 0x0000_00ff,
        };

        let screen = Screen {
            root: 0x0000_01e6,
            default_colormap: 0x0000_0020,
            white_pixel: 0x00ff_ffff,
            black_pixel: 0,
            current_input_masks: 0,
            width_in_pixels: width,
            height_in_pixels: height,
            width_in_millimeters: (width as u32 * 254 / 960) as u16,
            height_in_millimeters: (height as u32 * 254 / 960) as u16,
            min_installed_maps: 1,
            max_installed_maps: 1,
            root_visual: visual.visual_id,
            backing_stores: 0,
            save_unders: false,
            root_depth: 24,
            allowed_depths: List::new(vec![
                Depth {
                    depth: 24,
                    visuals: List::new(vec![visual]),
                },
                Depth {
                    depth: 1,
                    visuals: List::default(),
                },
            ]),
        };

        Self {
            status: SETUP_SUCCESS,
            protocol_major_version: X_PROTOCOL,
            protocol_minor_version: X_PROTOCOL_REVISION,
            release_number: 1,
            resource_id_base: 0x0040_0000,
            resource_id_mask: 0x001f_ffff,
            motion_buffer_size: 256,
            maximum_request_length: u16::MAX,
            image_byte_order: 0,
            bitmap_format_bit_order: 0,
            bitmap_format_scanline_unit: 32,
            bitmap_format_scanline_pad: 32,
            min_keycode: 8,
            max_keycode: 255,
            vendor: List::from_str_bytes(vendor),
            pixmap_formats: List::new(vec![
                PixmapFormat {
                    depth: 1,
                    bits_per_pixel: 1,
                    scanline_pad: 32,
                },
                PixmapFormat {
                    depth: 24,
                    bits_per_pixel: 32,
                    scanline_pad: 32,
                },
            ]),
            roots: List::new(vec![screen]),
        }
    }

    pub fn vendor_name(&self) -> String {
        self.vendor.to_string_lossy()
    }

    /// Image byte order the server declared
    pub fn byte_order(&self) -> ByteOrder {
        if self.image_byte_order == 0 {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }
}

impl Wire for Setup {
    fn decode(unpacker: &mut Unpacker) -> WireResult<Self> {
        let status = unpacker.read_u8()?;
        unpacker.skip(1)?;
        let protocol_major_version = unpacker.read_u16()?;
        let protocol_minor_version = unpacker.read_u16()?;
        let length = unpacker.read_u16()? as usize;

        // The length field counts the 4-byte units after the first 8 bytes.
        let declared = 8 + length * 4;
        if declared > unpacker.bufsize() {
            return Err(WireError::LengthMismatch {
                expected: declared,
                actual: unpacker.bufsize(),
            });
        }

        let release_number = unpacker.read_u32()?;
        let resource_id_base = unpacker.read_u32()?;
        let resource_id_mask = unpacker.read_u32()?;
        let motion_buffer_size = unpacker.read_u32()?;
        let vendor_len = unpacker.read_u16()?;
        let maximum_request_length = unpacker.read_u16()?;
        let roots_len = unpacker.read_u8()?;
        let pixmap_formats_len = unpacker.read_u8()?;
        let image_byte_order = unpacker.read_u8()?;
        let bitmap_format_bit_order = unpacker.read_u8()?;
        let bitmap_format_scanline_unit = unpacker.read_u8()?;
        let bitmap_format_scanline_pad = unpacker.read_u8()?;
        let min_keycode = unpacker.read_u8()?;
        let max_keycode = unpacker.read_u8()?;
        unpacker.skip(4)?;
        let vendor = List::decode_bulk(unpacker, vendor_len as usize)?;
        unpacker.align(4)?;
        let pixmap_formats = List::decode(unpacker, pixmap_formats_len as usize)?;
        let roots = List::decode(unpacker, roots_len as usize)?;

        Ok(Self {
            status,
            protocol_major_version,
            protocol_minor_version,
            release_number,
            resource_id_base,
            resource_id_mask,
            motion_buffer_size,
            maximum_request_length,
            image_byte_order,
            bitmap_format_bit_order,
            bitmap_format_scanline_unit,
            bitmap_format_scanline_pad,
            min_keycode,
            max_keycode,
            vendor,
            pixmap_formats,
            roots,
        })
    }

    fn encode(&self, packer: &mut Packer) -> WireResult<()> {
        let mut body = Packer::with_order(packer.order());
        body.put_u32(self.release_number);
        body.put_u32(self.resource_id_base);
        body.put_u32(self.resource_id_mask);
        body.put_u32(self.motion_buffer_size);
        body.put_u16(len_u16(self.vendor.len())?);
        body.put_u16(self.maximum_request_length);
        body.put_u8(len_u8(self.roots.len())?);
        body.put_u8(len_u8(self.pixmap_formats.len())?);
        body.put_u8(self.image_byte_order);
        body.put_u8(self.bitmap_format_bit_order);
        body.put_u8(self.bitmap_format_scanline_unit);
        body.put_u8(self.bitmap_format_scanline_pad);
        body.put_u8(self.min_keycode);
        body.put_u8(self.max_keycode);
        body.pad(4);
        self.vendor.encode(&mut body)?;
        body.align(4);
        self.pixmap_formats.encode(&mut body)?;
        self.roots.encode(&mut body)?;
        let body = body.freeze_padded();

        packer.put_u8(self.status);
        packer.pad(1);
        packer.put_u16(self.protocol_major_version);
        packer.put_u16(self.protocol_minor_version);
        packer.put_u16(len_u16(body.len() / 4)?);
        packer.put_slice(&body);
        Ok(())
    }
}

fn len_u8(len: usize) -> WireResult<u8> {
    u8::try_from(len).map_err(|_| WireError::FrameTooLarge(len, u8::MAX as usize))
}

fn len_u16(len: usize) -> WireResult<u16> {
    u16::try_from(len).map_err(|_| WireError::FrameTooLarge(len, u16::MAX as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETUP_HEADER_SIZE: usize = 40;

    #[test]
    fn test_setup_layout() {
        let setup = Setup::virtual_screen("xwire", 1920, 1080);
        let bytes = setup.to_bytes().unwrap();

        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(bytes[0], SETUP_SUCCESS);
        let length = u16::from_le_bytes([bytes[6], bytes[7]]) as usize;
        assert_eq!(8 + length * 4, bytes.len());
        // vendor starts after the fixed header
        assert_eq!(&bytes[SETUP_HEADER_SIZE..SETUP_HEADER_SIZE + 5], b"xwire");
    }

    #[test]
    fn test_setup_roundtrip() {
        let setup = Setup::virtual_screen("Virtual X", 800, 600);
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let bytes = setup.to_bytes_in(order).unwrap();
            let mut unpacker = Unpacker::new(bytes.clone()).with_order(order);
            let decoded = Setup::decode(&mut unpacker).unwrap();
            assert_eq!(decoded, setup);
            assert_eq!(unpacker.offset(), bytes.len());
        }
    }

    #[test]
    fn test_screen_contents() {
        let setup = Setup::virtual_screen("xwire", 1024, 768);
        let decoded = Setup::from_bytes(setup.to_bytes().unwrap()).unwrap();
        let screen = &decoded.roots[0];
        assert_eq!(decoded.vendor_name(), "xwire");
        assert_eq!(screen.width_in_pixels, 1024);
        assert_eq!(screen.allowed_depths.len(), 2);
        assert_eq!(screen.allowed_depths[0].visuals[0].visual_id, screen.root_visual);
        assert!(screen.allowed_depths[1].visuals.is_empty());
    }

    #[test]
    fn test_truncated_setup() {
        let bytes = Setup::virtual_screen("xwire", 640, 480).to_bytes().unwrap();
        let truncated = bytes.slice(..bytes.len() - 4);
        assert!(matches!(
            Setup::from_bytes(truncated),
            Err(WireError::LengthMismatch { .. })
        ));
    }
}
