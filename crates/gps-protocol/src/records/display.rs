//! Screen bitmap transfer
//!
//! A screenshot arrives as a series of display data packets, each opening
//! with a little-endian `u32` section tag:
//!
//! ```text
//! 0 header:  tag fingerprint_a:u32 fingerprint_b:u32 bytes_per_line:u32
//!            bits_per_pixel:u32 width:u32 height:u32
//! 1 palette: tag index:u32 r:u8 g:u8 b:u8 pad:u8
//! 2 image:   tag offset:u32 packed pixels...
//! ```
//!
//! Pixels are packed most significant bits first. Some panels scan in a
//! different orientation than they are viewed; the fingerprint words of the
//! header select a [`Rotation`] applied while pixels are placed.

use crate::datatypes::{RecordReader, RecordWriter};
use crate::error::ParseError;

const SECTION_HEADER: u32 = 0;
const SECTION_PALETTE: u32 = 1;
const SECTION_IMAGE: u32 = 2;

/// Depth whose palette arrives in palette packets
const INDEXED_DEPTH: u32 = 4;

/// Largest width or height accepted from a device
pub const MAX_DIMENSION: u32 = 2048;

/// An RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::gray(0xFF);
    pub const BLACK: Rgb = Rgb::gray(0x00);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn gray(level: u8) -> Self {
        Self::new(level, level, level)
    }
}

/// Orientation of the scanned image relative to the viewed screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    UpsideDown,
    CounterClockwise90,
}

/// Known header fingerprints and the rotation their panels need
///
/// Best effort: only fingerprints seen from real panels are listed and
/// anything else is shown as scanned.
static FINGERPRINTS: &[(u32, u32, Rotation)] = &[
    // monochrome portrait panels scanned column-wise
    (0x0000_0001, 0x0000_0030, Rotation::Clockwise90),
    // 2 bpp portrait panels mounted the other way round
    (0x0000_0002, 0x0000_0030, Rotation::CounterClockwise90),
    // 16 color landscape panels scanned bottom-up
    (0x0000_0004, 0x0000_0100, Rotation::UpsideDown),
];

impl Rotation {
    /// Look up the rotation for a header fingerprint
    pub fn from_fingerprint(fingerprint_a: u32, fingerprint_b: u32) -> Self {
        FINGERPRINTS
            .iter()
            .find(|(a, b, _)| *a == fingerprint_a && *b == fingerprint_b)
            .map(|(_, _, rotation)| *rotation)
            .unwrap_or_default()
    }

    /// Whether width and height swap
    pub fn is_transposed(&self) -> bool {
        matches!(self, Rotation::Clockwise90 | Rotation::CounterClockwise90)
    }

    /// Map a scanned pixel to its viewed position
    ///
    /// `width` and `height` are the scanned dimensions.
    pub fn apply(&self, x: u32, y: u32, width: u32, height: u32) -> (u32, u32) {
        match self {
            Rotation::None => (x, y),
            Rotation::Clockwise90 => (height - 1 - y, x),
            Rotation::UpsideDown => (width - 1 - x, height - 1 - y),
            Rotation::CounterClockwise90 => (y, width - 1 - x),
        }
    }

    pub fn degrees(&self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 90,
            Rotation::UpsideDown => 180,
            Rotation::CounterClockwise90 => 270,
        }
    }
}

/// Dimensions and depth of the scanned screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DisplayHeader {
    pub fingerprint_a: u32,
    pub fingerprint_b: u32,
    /// Bytes per scan line; 0 means packed without padding
    pub bytes_per_line: u32,
    pub bits_per_pixel: u32,
    pub width: u32,
    pub height: u32,
}

impl DisplayHeader {
    /// Scan line length in bytes
    pub fn line_len(&self) -> u32 {
        if self.bytes_per_line != 0 {
            self.bytes_per_line
        } else {
            self.width.saturating_mul(self.bits_per_pixel).div_ceil(8)
        }
    }

    pub fn pixels_per_byte(&self) -> u32 {
        8 / self.bits_per_pixel.clamp(1, 8)
    }

    /// Size of the scanned image in bytes
    pub fn image_len(&self) -> u32 {
        self.line_len().saturating_mul(self.height)
    }

    pub fn rotation(&self) -> Rotation {
        Rotation::from_fingerprint(self.fingerprint_a, self.fingerprint_b)
    }

    /// Palette packets that follow the header
    pub fn palette_len(&self) -> u32 {
        if self.bits_per_pixel == INDEXED_DEPTH {
            1 << INDEXED_DEPTH
        } else {
            0
        }
    }

    fn validate(&self) -> Result<(), ParseError> {
        if !matches!(self.bits_per_pixel, 1 | 2 | 4 | 8) {
            return Err(ParseError::InvalidValue {
                field: "bits_per_pixel",
                value: self.bits_per_pixel.to_string(),
            });
        }
        let dimension = 1..=MAX_DIMENSION;
        if !dimension.contains(&self.width) || !dimension.contains(&self.height) {
            return Err(ParseError::InvalidValue {
                field: "dimensions",
                value: format!("{}x{}", self.width, self.height),
            });
        }
        if self.bytes_per_line > MAX_DIMENSION {
            return Err(ParseError::InvalidValue {
                field: "bytes_per_line",
                value: self.bytes_per_line.to_string(),
            });
        }
        Ok(())
    }
}

/// One display data packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayPacket {
    Header(DisplayHeader),
    Palette { index: u32, color: Rgb },
    Image { offset: u32, data: Vec<u8> },
}

impl DisplayPacket {
    pub fn decode(data: &[u8]) -> Result<Self, ParseError> {
        let mut r = RecordReader::new(data);
        match r.u32()? {
            SECTION_HEADER => {
                r.require(28)?;
                Ok(DisplayPacket::Header(DisplayHeader {
                    fingerprint_a: r.u32()?,
                    fingerprint_b: r.u32()?,
                    bytes_per_line: r.u32()?,
                    bits_per_pixel: r.u32()?,
                    width: r.u32()?,
                    height: r.u32()?,
                }))
            }
            SECTION_PALETTE => {
                r.require(12)?;
                let index = r.u32()?;
                let color = Rgb::new(r.u8()?, r.u8()?, r.u8()?);
                Ok(DisplayPacket::Palette { index, color })
            }
            SECTION_IMAGE => {
                let offset = r.u32()?;
                Ok(DisplayPacket::Image {
                    offset,
                    data: r.rest().to_vec(),
                })
            }
            other => Err(ParseError::UnknownDisplaySection(other)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = RecordWriter::new();
        match self {
            DisplayPacket::Header(h) => {
                w.u32(SECTION_HEADER)
                    .u32(h.fingerprint_a)
                    .u32(h.fingerprint_b)
                    .u32(h.bytes_per_line)
                    .u32(h.bits_per_pixel)
                    .u32(h.width)
                    .u32(h.height);
            }
            DisplayPacket::Palette { index, color } => {
                w.u32(SECTION_PALETTE)
                    .u32(*index)
                    .u8(color.r)
                    .u8(color.g)
                    .u8(color.b)
                    .u8(0);
            }
            DisplayPacket::Image { offset, data } => {
                w.u32(SECTION_IMAGE).u32(*offset).bytes(data);
            }
        }
        w.finish()
    }
}

/// Pack palette indices MSB first at the given depth
pub fn pack_pixels(bits_per_pixel: u32, indices: &[u8]) -> Vec<u8> {
    let ppb = (8 / bits_per_pixel.clamp(1, 8)) as usize;
    let mask = ((1u16 << bits_per_pixel.clamp(1, 8)) - 1) as u8;
    indices
        .chunks(ppb)
        .map(|group| {
            group.iter().enumerate().fold(0u8, |acc, (k, &value)| {
                let shift = 8 - bits_per_pixel as usize * (k + 1);
                acc | ((value & mask) << shift)
            })
        })
        .collect()
}

/// Grayscale ramp from white (index 0) to black (highest index)
pub fn grayscale_ramp(bits_per_pixel: u32) -> Vec<Rgb> {
    let n = 1u32 << bits_per_pixel.clamp(1, 8);
    (0..n)
        .map(|i| Rgb::gray((255 - i * 255 / (n - 1)) as u8))
        .collect()
}

/// A finished (or partially received) screenshot
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bitmap {
    /// Viewed width
    pub width: u32,
    /// Viewed height
    pub height: u32,
    pub bits_per_pixel: u32,
    pub rotation: Rotation,
    pub palette: Vec<Rgb>,
    /// Palette indices, row-major in viewed orientation
    pub pixels: Vec<u8>,
}

impl Bitmap {
    pub fn index(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    pub fn color(&self, x: u32, y: u32) -> Option<Rgb> {
        self.index(x, y)
            .and_then(|i| self.palette.get(usize::from(i)).copied())
    }

    /// Expand to packed 8-bit RGB, row-major
    pub fn to_rgb(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|&i| {
                let c = self.palette.get(usize::from(i)).copied().unwrap_or_default();
                [c.r, c.g, c.b]
            })
            .collect()
    }
}

/// Where a transfer stands after a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayProgress {
    /// Still waiting for image data
    Pending,
    /// An image packet reached the end of the scan buffer
    Complete,
}

/// Builds a [`Bitmap`] from display data packets
///
/// A second pass (after [`DisplayAssembler::begin_overlay`]) writes into
/// the same buffer, so lines lost to corruption in the first pass are filled
/// in while good lines survive.
#[derive(Debug, Clone, Default)]
pub struct DisplayAssembler {
    header: Option<DisplayHeader>,
    bitmap: Option<Bitmap>,
    palette_received: u32,
    complete: bool,
}

impl DisplayAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&self) -> Option<&DisplayHeader> {
        self.header.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Palette packets received for an indexed-depth header
    pub fn palette_received(&self) -> u32 {
        self.palette_received
    }

    /// Drop everything and wait for a fresh header
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Keep the buffer and accept a second transfer on top of it
    pub fn begin_overlay(&mut self) {
        self.complete = false;
    }

    /// Feed one decoded packet
    pub fn push(&mut self, packet: &DisplayPacket) -> Result<DisplayProgress, ParseError> {
        match packet {
            DisplayPacket::Header(header) => self.start(*header)?,
            DisplayPacket::Palette { index, color } => {
                if let Some(bitmap) = self.bitmap.as_mut() {
                    if let Some(slot) = bitmap.palette.get_mut(*index as usize) {
                        *slot = *color;
                        self.palette_received += 1;
                    }
                }
            }
            DisplayPacket::Image { offset, data } => {
                if self.place(*offset, data) {
                    self.complete = true;
                }
            }
        }
        Ok(if self.complete {
            DisplayProgress::Complete
        } else {
            DisplayProgress::Pending
        })
    }

    /// Decode and feed one display data payload
    pub fn push_payload(&mut self, payload: &[u8]) -> Result<DisplayProgress, ParseError> {
        let packet = DisplayPacket::decode(payload)?;
        self.push(&packet)
    }

    /// Current bitmap, complete or not
    pub fn bitmap(&self) -> Option<&Bitmap> {
        self.bitmap.as_ref()
    }

    pub fn take(&mut self) -> Option<Bitmap> {
        let bitmap = self.bitmap.take();
        self.reset();
        bitmap
    }

    fn start(&mut self, header: DisplayHeader) -> Result<(), ParseError> {
        header.validate()?;
        self.complete = false;
        self.palette_received = 0;
        // Same screen again: overlay onto what we have
        if self.header == Some(header) && self.bitmap.is_some() {
            return Ok(());
        }

        let rotation = header.rotation();
        let (width, height) = if rotation.is_transposed() {
            (header.height, header.width)
        } else {
            (header.width, header.height)
        };
        tracing::debug!(
            "Screen {}x{} at {} bpp, rotation {}°",
            header.width,
            header.height,
            header.bits_per_pixel,
            rotation.degrees()
        );
        self.bitmap = Some(Bitmap {
            width,
            height,
            bits_per_pixel: header.bits_per_pixel,
            rotation,
            palette: grayscale_ramp(header.bits_per_pixel),
            pixels: vec![0u8; (width * height) as usize],
        });
        self.header = Some(header);
        Ok(())
    }

    /// Unpack one run of image bytes; true when it wrote the last byte of
    /// the scan
    fn place(&mut self, offset: u32, data: &[u8]) -> bool {
        let (Some(header), Some(bitmap)) = (self.header, self.bitmap.as_mut()) else {
            tracing::debug!("Image data before screen header, ignoring");
            return false;
        };
        let image_len = header.image_len();
        if data.is_empty() || offset >= image_len {
            tracing::debug!(
                "Image data at offset {} outside the {} byte scan, ignoring",
                offset,
                image_len
            );
            return false;
        }
        let bpl = header.line_len();
        let ppb = header.pixels_per_byte();
        let bpp = header.bits_per_pixel;
        let mask = ((1u16 << bpp) - 1) as u8;
        let rotation = bitmap.rotation;
        let end = u64::from(offset) + data.len() as u64;

        for (pos, &byte) in (offset..image_len).zip(data) {
            let y = pos / bpl;
            if y >= header.height {
                break;
            }
            let x0 = (pos % bpl) * ppb;
            for k in 0..ppb {
                let x = x0 + k;
                if x >= header.width {
                    break;
                }
                let shift = 8 - bpp * (k + 1);
                let value = (byte >> shift) & mask;
                let (vx, vy) = rotation.apply(x, y, header.width, header.height);
                let idx = (vy * bitmap.width + vx) as usize;
                if let Some(px) = bitmap.pixels.get_mut(idx) {
                    *px = value;
                }
            }
        }
        end >= u64::from(image_len)
    }
}

/// Split a scanned image into display data payloads of whole lines
pub fn encode_screen(header: &DisplayHeader, palette: &[Rgb], scan: &[u8], lines_per_packet: u32) -> Vec<Vec<u8>> {
    let mut out = vec![DisplayPacket::Header(*header).encode()];
    if header.palette_len() > 0 {
        out.extend(palette.iter().take(header.palette_len() as usize).enumerate().map(|(i, color)| {
            DisplayPacket::Palette {
                index: i as u32,
                color: *color,
            }
            .encode()
        }));
    }
    let chunk = (header.line_len() * lines_per_packet.max(1)) as usize;
    for (i, data) in scan.chunks(chunk.max(1)).enumerate() {
        out.push(
            DisplayPacket::Image {
                offset: (i * chunk) as u32,
                data: data.to_vec(),
            }
            .encode(),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_48x160(fingerprint_a: u32, fingerprint_b: u32) -> DisplayHeader {
        DisplayHeader {
            fingerprint_a,
            fingerprint_b,
            bytes_per_line: 0,
            bits_per_pixel: 2,
            width: 48,
            height: 160,
        }
    }

    #[test]
    fn test_48x160_2bpp_first_byte_sets_four_pixels() {
        let mut asm = DisplayAssembler::new();
        asm.push(&DisplayPacket::Header(header_48x160(0, 0))).unwrap();
        let progress = asm
            .push(&DisplayPacket::Image {
                offset: 0,
                data: vec![0b00_01_10_11],
            })
            .unwrap();
        assert_eq!(progress, DisplayProgress::Pending);

        let bitmap = asm.bitmap().unwrap();
        assert_eq!((bitmap.width, bitmap.height), (48, 160));
        let ramp = grayscale_ramp(2);
        for x in 0..4 {
            assert_eq!(bitmap.index(x, 0), Some(x as u8));
            assert_eq!(bitmap.color(x, 0), Some(ramp[x as usize]));
        }
        assert_eq!(bitmap.color(0, 0), Some(Rgb::WHITE));
        assert_eq!(bitmap.color(3, 0), Some(Rgb::BLACK));
        assert_eq!(bitmap.index(4, 0), Some(0));
    }

    #[test]
    fn test_48x160_2bpp_rotated_by_fingerprint() {
        let mut asm = DisplayAssembler::new();
        asm.push(&DisplayPacket::Header(header_48x160(2, 0x30))).unwrap();
        asm.push(&DisplayPacket::Image {
            offset: 0,
            data: vec![0b00_01_10_11],
        })
        .unwrap();

        let bitmap = asm.bitmap().unwrap();
        assert_eq!(bitmap.rotation, Rotation::CounterClockwise90);
        assert_eq!((bitmap.width, bitmap.height), (160, 48));
        // scanned (x, 0) is viewed at (0, 47 - x)
        for x in 0..4u32 {
            assert_eq!(bitmap.index(0, 47 - x), Some(x as u8));
        }
    }

    #[test]
    fn test_transfer_completes_at_end_of_buffer() {
        let header = header_48x160(0, 0);
        assert_eq!(header.line_len(), 12);
        let mut asm = DisplayAssembler::new();
        asm.push(&DisplayPacket::Header(header)).unwrap();
        let last = asm
            .push(&DisplayPacket::Image {
                offset: 12 * 159,
                data: vec![0xFF; 12],
            })
            .unwrap();
        assert_eq!(last, DisplayProgress::Complete);
        assert_eq!(asm.bitmap().unwrap().index(47, 159), Some(3));
    }

    #[test]
    fn test_indexed_palette() {
        let header = DisplayHeader {
            bits_per_pixel: 4,
            width: 4,
            height: 1,
            ..Default::default()
        };
        assert_eq!(header.palette_len(), 16);
        let mut palette: Vec<Rgb> = (0..16).map(|i| Rgb::new(i * 16, 0, 0)).collect();
        palette[5] = Rgb::new(0, 200, 0);
        let scan = pack_pixels(4, &[5, 0, 15, 1]);
        assert_eq!(scan, vec![0x50, 0xF1]);

        let mut asm = DisplayAssembler::new();
        let mut progress = DisplayProgress::Pending;
        for payload in encode_screen(&header, &palette, &scan, 1) {
            progress = asm.push_payload(&payload).unwrap();
        }
        assert_eq!(progress, DisplayProgress::Complete);
        assert_eq!(asm.palette_received(), 16);
        let bitmap = asm.take().unwrap();
        assert_eq!(bitmap.color(0, 0), Some(Rgb::new(0, 200, 0)));
        assert_eq!(bitmap.color(2, 0), Some(Rgb::new(240, 0, 0)));
        assert_eq!(bitmap.to_rgb().len(), 12);
        assert!(asm.bitmap().is_none());
    }

    #[test]
    fn test_overlay_keeps_good_lines() {
        let header = DisplayHeader {
            bits_per_pixel: 8,
            width: 2,
            height: 2,
            ..Default::default()
        };
        let mut asm = DisplayAssembler::new();
        asm.push(&DisplayPacket::Header(header)).unwrap();
        asm.push(&DisplayPacket::Image {
            offset: 0,
            data: vec![7, 8],
        })
        .unwrap();
        // second line lost; retry sends only the second line
        asm.begin_overlay();
        asm.push(&DisplayPacket::Header(header)).unwrap();
        let progress = asm
            .push(&DisplayPacket::Image {
                offset: 2,
                data: vec![9, 10],
            })
            .unwrap();
        assert_eq!(progress, DisplayProgress::Complete);
        assert_eq!(asm.bitmap().unwrap().pixels, vec![7, 8, 9, 10]);
    }

    #[test]
    fn test_decode_rejects_unknown_section() {
        assert_eq!(
            DisplayPacket::decode(&[9, 0, 0, 0]),
            Err(ParseError::UnknownDisplaySection(9))
        );
    }

    #[test]
    fn test_invalid_depth() {
        let mut asm = DisplayAssembler::new();
        let header = DisplayHeader {
            bits_per_pixel: 3,
            width: 8,
            height: 8,
            ..Default::default()
        };
        assert!(asm.push(&DisplayPacket::Header(header)).is_err());
    }

    #[test]
    fn test_oversized_header_is_rejected() {
        let mut asm = DisplayAssembler::new();
        let cases = [
            (0x10000, 0x10000, 0),
            (60_000, 60_000, 0),
            (48, 160, u32::MAX),
        ];
        for (width, height, bytes_per_line) in cases {
            let header = DisplayHeader {
                bits_per_pixel: 8,
                width,
                height,
                bytes_per_line,
                ..Default::default()
            };
            assert!(matches!(
                asm.push(&DisplayPacket::Header(header)),
                Err(ParseError::InvalidValue { .. })
            ));
            assert!(asm.bitmap().is_none());
        }
        let huge = DisplayHeader {
            bits_per_pixel: 8,
            width: u32::MAX,
            height: u32::MAX,
            ..Default::default()
        };
        assert_eq!(huge.image_len(), u32::MAX);
    }

    #[test]
    fn test_image_outside_buffer_does_not_complete() {
        let mut asm = DisplayAssembler::new();
        asm.push(&DisplayPacket::Header(header_48x160(0, 0))).unwrap();
        for offset in [u32::MAX, 48 * 160 / 4] {
            let progress = asm
                .push(&DisplayPacket::Image {
                    offset,
                    data: vec![0xFF; 16],
                })
                .unwrap();
            assert_eq!(progress, DisplayProgress::Pending);
        }
        let progress = asm
            .push(&DisplayPacket::Image {
                offset: 0,
                data: Vec::new(),
            })
            .unwrap();
        assert_eq!(progress, DisplayProgress::Pending);
        assert!(asm.bitmap().unwrap().pixels.iter().all(|&p| p == 0));
    }

    #[test]
    fn test_rotation_table() {
        assert_eq!(Rotation::from_fingerprint(0xDEAD, 0xBEEF), Rotation::None);
        assert_eq!(Rotation::from_fingerprint(1, 0x30), Rotation::Clockwise90);
        assert_eq!(Rotation::UpsideDown.apply(0, 0, 10, 5), (9, 4));
        assert_eq!(Rotation::Clockwise90.apply(0, 0, 10, 5), (4, 0));
    }

    #[test]
    fn test_grayscale_ramp() {
        assert_eq!(grayscale_ramp(1), vec![Rgb::WHITE, Rgb::BLACK]);
        let ramp = grayscale_ramp(2);
        assert_eq!(ramp, vec![Rgb::gray(255), Rgb::gray(170), Rgb::gray(85), Rgb::gray(0)]);
    }
}
