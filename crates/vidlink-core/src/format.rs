//! Packed pixel formats and frame sizing rules.

use serde::{Deserialize, Serialize};

use crate::{VidlinkError, VidlinkResult};

/// Horizontal block size of one encode/decode thread group, in pixels.
pub const BLOCK_WIDTH: u32 = 16;
/// Vertical block size of one encode/decode thread group, in pixels.
pub const BLOCK_HEIGHT: u32 = 8;

/// Packed wire layout produced and consumed by the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 4:2:2 chroma-subsampled, no alpha (2 bytes per pixel).
    Uyvy,
    /// UYVY followed by a full-resolution 8-bit alpha plane (3 bytes per pixel).
    Uyva,
}

impl PixelFormat {
    /// Pick the layout for a given alpha setting.
    pub fn from_alpha(alpha: bool) -> Self {
        if alpha {
            PixelFormat::Uyva
        } else {
            PixelFormat::Uyvy
        }
    }

    pub fn has_alpha(self) -> bool {
        self == PixelFormat::Uyva
    }

    pub fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Uyvy => FourCC::Uyvy,
            PixelFormat::Uyva => FourCC::Uyva,
        }
    }

    /// Line stride of the UYVY plane in bytes.
    pub fn line_stride(self, width: u32) -> u32 {
        width * 2
    }
}

/// Four-character codes understood by the transport.
///
/// Only `Uyvy` and `Uyva` map to a [`PixelFormat`]; the RGBA family and the
/// planar codes pass through untouched. Unknown codes map to `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FourCC {
    Uyvy,
    Uyva,
    Yv12,
    Nv12,
    I420,
    Bgra,
    Bgrx,
    Rgba,
    Rgbx,
    Invalid,
}

const fn make_code(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

impl FourCC {
    const TABLE: [(FourCC, u32); 9] = [
        (FourCC::Uyvy, make_code(b'U', b'Y', b'V', b'Y')),
        (FourCC::Uyva, make_code(b'U', b'Y', b'V', b'A')),
        (FourCC::Yv12, make_code(b'Y', b'V', b'1', b'2')),
        (FourCC::Nv12, make_code(b'N', b'V', b'1', b'2')),
        (FourCC::I420, make_code(b'I', b'4', b'2', b'0')),
        (FourCC::Bgra, make_code(b'B', b'G', b'R', b'A')),
        (FourCC::Bgrx, make_code(b'B', b'G', b'R', b'X')),
        (FourCC::Rgba, make_code(b'R', b'G', b'B', b'A')),
        (FourCC::Rgbx, make_code(b'R', b'G', b'B', b'X')),
    ];

    /// Decode a raw wire code. Unknown codes yield `FourCC::Invalid`.
    pub fn from_code(code: u32) -> Self {
        Self::TABLE
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(f, _)| *f)
            .unwrap_or(FourCC::Invalid)
    }

    /// Raw wire code; `Invalid` encodes as zero.
    pub fn code(self) -> u32 {
        Self::TABLE
            .iter()
            .find(|(f, _)| *f == self)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    /// The packed layout for this code, if the converter can handle it.
    pub fn pixel_format(self) -> Option<PixelFormat> {
        match self {
            FourCC::Uyvy => Some(PixelFormat::Uyvy),
            FourCC::Uyva => Some(PixelFormat::Uyva),
            _ => None,
        }
    }
}

/// Number of 32-bit elements in a packed frame.
///
/// Exact when `width` is a multiple of 4 and `height` a multiple of 2;
/// [`FrameGeometry::new`] rejects everything else before this is used to
/// size a buffer.
pub fn frame_element_count(width: u32, height: u32, alpha: bool) -> usize {
    let per_pixel = if alpha { 3 } else { 2 };
    (width as usize) * (height as usize) * per_pixel / 4
}

/// Validated frame dimensions plus alpha setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub alpha: bool,
}

impl FrameGeometry {
    /// Validate dimensions against the converter's block size.
    pub fn new(width: u32, height: u32, alpha: bool) -> VidlinkResult<Self> {
        if width == 0 || height == 0 {
            return Err(VidlinkError::dimensions(width, height, "frame is empty"));
        }
        if width % BLOCK_WIDTH != 0 {
            return Err(VidlinkError::dimensions(
                width,
                height,
                format!("width must be a multiple of {}", BLOCK_WIDTH),
            ));
        }
        if height % BLOCK_HEIGHT != 0 {
            return Err(VidlinkError::dimensions(
                width,
                height,
                format!("height must be a multiple of {}", BLOCK_HEIGHT),
            ));
        }
        Ok(Self {
            width,
            height,
            alpha,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::from_alpha(self.alpha)
    }

    pub fn element_count(&self) -> usize {
        frame_element_count(self.width, self.height, self.alpha)
    }

    pub fn byte_size(&self) -> usize {
        self.element_count() * 4
    }

    /// Thread-group grid covering the frame.
    pub fn dispatch_groups(&self) -> [u32; 3] {
        [self.width / BLOCK_WIDTH, self.height / BLOCK_HEIGHT, 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_count_opaque() {
        assert_eq!(frame_element_count(64, 64, false), 2048);
        assert_eq!(frame_element_count(1920, 1080, false), 1920 * 1080 / 2);
    }

    #[test]
    fn test_element_count_alpha() {
        assert_eq!(frame_element_count(64, 64, true), 3072);
        assert_eq!(frame_element_count(16, 8, true), 96);
    }

    #[test]
    fn test_element_count_is_deterministic() {
        for w in (4..=256).step_by(4) {
            for h in (2..=64).step_by(2) {
                for alpha in [false, true] {
                    let a = frame_element_count(w, h, alpha);
                    let b = frame_element_count(w, h, alpha);
                    assert_eq!(a, b);
                    assert_eq!(a * 4, (w * h * if alpha { 3 } else { 2 }) as usize);
                }
            }
        }
    }

    #[test]
    fn test_fourcc_codes() {
        assert_eq!(FourCC::Uyvy.code(), 0x5956_5955);
        assert_eq!(FourCC::Uyva.code(), 0x4156_5955);
        assert_eq!(FourCC::Bgra.code(), 0x4152_4742);
        assert_eq!(FourCC::from_code(0x5956_5955), FourCC::Uyvy);
        assert_eq!(FourCC::from_code(0xdead_beef), FourCC::Invalid);
        assert_eq!(FourCC::Invalid.code(), 0);
    }

    #[test]
    fn test_fourcc_pixel_format_mapping() {
        assert_eq!(FourCC::Uyva.pixel_format(), Some(PixelFormat::Uyva));
        assert_eq!(FourCC::Rgba.pixel_format(), None);
        assert_eq!(PixelFormat::Uyvy.fourcc(), FourCC::Uyvy);
        assert_eq!(PixelFormat::from_alpha(true), PixelFormat::Uyva);
    }

    #[test]
    fn test_geometry_rejects_unaligned() {
        assert!(FrameGeometry::new(64, 64, false).is_ok());
        assert!(FrameGeometry::new(60, 64, false).is_err());
        assert!(FrameGeometry::new(64, 60, false).is_err());
        assert!(FrameGeometry::new(0, 64, false).is_err());
    }

    #[test]
    fn test_geometry_dispatch_groups() {
        let g = FrameGeometry::new(1920, 1080, true).unwrap();
        assert_eq!(g.dispatch_groups(), [120, 135, 1]);
        assert_eq!(g.byte_size(), 1920 * 1080 * 3);
    }
}
