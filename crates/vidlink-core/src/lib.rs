//! # vidlink-core
//!
//! Core types for the Vidlink frame streaming pipeline.
//! This crate contains the pieces shared by every other Vidlink crate:
//! packed pixel formats, the host-side frame pool, the transport wire
//! structs, configuration and the error type.

pub mod config;
pub mod error;
pub mod format;
pub mod frame;
pub mod pool;
pub mod wire;

pub use config::*;

pub use error::{VidlinkError, VidlinkResult};
pub use format::{frame_element_count, FourCC, FrameGeometry, PixelFormat};
pub use frame::FrameBuffer;
pub use pool::{BufferIdentity, EntryId, FrameEntry, FramePool, PoolStats};
pub use wire::{
    Bandwidth, ColorFormat, FrameFormat, RecvSettings, SourceDescriptor, Tally, VideoFrame,
};
