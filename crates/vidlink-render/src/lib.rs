//! # vidlink-render
//!
//! The compute side of Vidlink: the [`ComputeDevice`] seam, the packed
//! format converter, and two devices that run the packing kernels. The wgpu
//! device executes the WGSL kernels on a headless GPU; the software device
//! runs the same math on the CPU.

pub mod converter;
pub mod device;
pub mod gpu;
pub mod kernels;
pub mod packing;
pub mod soft;
pub mod wgpu_device;

pub use converter::{ConverterStats, FormatConverter};
pub use device::{
    Command, CommandList, CompletionQueue, CompletionSender, ComputeDevice, DeviceBuffer,
    DeviceImage, DispatchParams, Kernel, Pass, ReadbackCompletion, ReadbackTicket,
};
pub use gpu::GpuContext;
pub use kernels::KernelBundle;
pub use soft::{SoftBuffer, SoftDevice, SoftDeviceStats, SoftImage};
pub use wgpu_device::{WgpuBuffer, WgpuDevice, WgpuImage};
