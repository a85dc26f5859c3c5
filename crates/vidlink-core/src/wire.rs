//! Structs exchanged with the transport collaborator.
//!
//! The layouts follow the transport's C ABI, so [`VideoFrame`] carries raw
//! pointers. Whoever builds a frame is responsible for keeping those
//! pointers valid for as long as the transport contract requires.

use std::ffi::c_char;

use serde::{Deserialize, Serialize};

use crate::format::{FourCC, PixelFormat};
use crate::pool::FrameEntry;

/// Timecode value asking the transport to synthesize one.
pub const TIMECODE_SYNTHESIZE: i64 = i64::MAX;

/// Scan order of a video frame. Only `Progressive` is produced here.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Interleaved = 0,
    Progressive = 1,
    Field0 = 2,
    Field1 = 3,
}

/// One video frame as the transport sees it.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame {
    pub width: i32,
    pub height: i32,
    /// Raw FourCC code, see [`FourCC::from_code`].
    pub fourcc: u32,
    pub frame_rate_n: i32,
    pub frame_rate_d: i32,
    pub aspect_ratio: f32,
    pub frame_format: FrameFormat,
    pub timecode: i64,
    pub data: *const u8,
    pub line_stride: i32,
    pub metadata: *const c_char,
    pub timestamp: i64,
}

impl VideoFrame {
    /// Describe a pool entry's packed image for an asynchronous send. The
    /// frame rate is left at 0/0 for the transport to fill in.
    pub fn from_entry(entry: &FrameEntry) -> Self {
        let format = PixelFormat::from_alpha(entry.alpha());
        Self {
            width: entry.width() as i32,
            height: entry.height() as i32,
            fourcc: format.fourcc().code(),
            frame_rate_n: 0,
            frame_rate_d: 0,
            aspect_ratio: 0.0,
            frame_format: FrameFormat::Progressive,
            timecode: TIMECODE_SYNTHESIZE,
            data: entry.image_ptr(),
            line_stride: format.line_stride(entry.width()) as i32,
            metadata: entry.metadata_ptr(),
            timestamp: 0,
        }
    }

    pub fn with_frame_rate(mut self, numerator: i32, denominator: i32) -> Self {
        self.frame_rate_n = numerator;
        self.frame_rate_d = denominator;
        self
    }

    pub fn fourcc(&self) -> FourCC {
        FourCC::from_code(self.fourcc)
    }

    /// Byte length of the pixel payload implied by the header.
    ///
    /// Packed formats carry a trailing alpha plane after the UYVY rows.
    pub fn payload_len(&self) -> usize {
        let rows = self.height.max(0) as usize;
        let stride = self.line_stride.max(0) as usize;
        match self.fourcc().pixel_format() {
            Some(PixelFormat::Uyva) => rows * stride + rows * self.width.max(0) as usize,
            _ => rows * stride,
        }
    }

    /// View the pixel payload.
    ///
    /// # Safety
    /// `data` must point to at least [`payload_len`](Self::payload_len)
    /// readable bytes for the lifetime of the returned slice.
    pub unsafe fn payload(&self) -> &[u8] {
        if self.data.is_null() {
            return &[];
        }
        std::slice::from_raw_parts(self.data, self.payload_len())
    }
}

/// A source visible on the network. Compared by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub address: Option<String>,
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// Receive bandwidth preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bandwidth {
    MetadataOnly,
    AudioOnly,
    Lowest,
    Highest,
}

/// Preferred pixel delivery format on the receive side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorFormat {
    BgrxBgra,
    UyvyBgra,
    RgbxRgba,
    UyvyRgba,
    Fastest,
}

/// Parameters for opening a receive connection.
#[derive(Debug, Clone, PartialEq)]
pub struct RecvSettings {
    pub source: SourceDescriptor,
    pub color_format: ColorFormat,
    pub bandwidth: Bandwidth,
    pub allow_video_fields: bool,
}

impl RecvSettings {
    /// Highest bandwidth, fastest color path, progressive only.
    pub fn fastest(source: SourceDescriptor) -> Self {
        Self {
            source,
            color_format: ColorFormat::Fastest,
            bandwidth: Bandwidth::Highest,
            allow_video_fields: false,
        }
    }
}

/// Program/preview state reported by the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub on_program: bool,
    pub on_preview: bool,
}
