//! # vidlink-transport
//!
//! The seam between Vidlink pipelines and a network video transport:
//! traits for the transport's finder, sender and receiver objects, a
//! [`Registry`] holding the process-wide shared ones, and an in-process
//! [`LoopbackTransport`].

pub mod loopback;
pub mod registry;
pub mod transport;

pub use loopback::{LoopbackStats, LoopbackTransport};
pub use registry::{Registry, SenderHandle, SharedFinder, SharedSender};
pub use transport::{SourceFinder, Transport, VideoReceiver, VideoSender};
