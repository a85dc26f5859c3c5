//! # vidlink-stream
//!
//! The send and receive pipelines. A [`SendPipeline`] captures an image
//! each tick, packs it on the compute device and hands it to a transport
//! sender through a pooled asynchronous readback. A [`ReceivePipeline`]
//! finds a named source, decodes its frames and publishes them to the
//! configured outputs.

pub mod capture;
pub mod output;
pub mod receive;
pub mod send;

pub use capture::{
    CameraCapture, CameraId, CaptureSource, Captured, ScreenCapture, ScreenGrabber,
    TextureCapture,
};
pub use output::{MaterialBinding, PropertyBlock};
pub use receive::{ReceivePipeline, ReceiveState};
pub use send::{SendPipeline, SendState};
