//! The compute-device seam.
//!
//! A [`ComputeDevice`] owns images and packed buffers, executes recorded
//! [`CommandList`]s and reports asynchronous readbacks through a
//! single-consumer [`CompletionQueue`]. Device callbacks only enqueue; the
//! owner drains the queue at points of its own choosing.

use std::sync::mpsc::{self, Receiver, Sender};

use vidlink_core::{BufferIdentity, FrameBuffer, VidlinkResult};

/// An RGBA image living on a device.
pub trait DeviceImage {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

/// A buffer of packed 32-bit elements living on a device.
pub trait DeviceBuffer {
    fn element_count(&self) -> usize;

    fn byte_size(&self) -> usize {
        self.element_count() * 4
    }
}

/// One of the two compute programs in the kernel bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    Encoder,
    Decoder,
}

/// Kernel variant: opaque (UYVY) or with an alpha plane (UYVA).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    Opaque,
    Alpha,
}

impl Pass {
    pub fn from_alpha(alpha: bool) -> Self {
        if alpha {
            Pass::Alpha
        } else {
            Pass::Opaque
        }
    }
}

/// Per-dispatch constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchParams {
    pub width: u32,
    pub height: u32,
    /// Apply the linear to sRGB transfer before encoding.
    pub linear: bool,
}

/// Ticket identifying one readback inside a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadbackTicket(pub u64);

/// Completion notice for an asynchronous readback.
///
/// On success the bytes are held by the device until the owner calls
/// [`ComputeDevice::resolve_readback`] or [`ComputeDevice::discard_readback`].
#[derive(Debug, Clone)]
pub struct ReadbackCompletion {
    pub ticket: ReadbackTicket,
    /// Identity of the host buffer the readback is destined for.
    pub identity: BufferIdentity,
    pub status: Result<(), String>,
}

pub type CompletionSender = Sender<ReadbackCompletion>;

/// Single-consumer queue of readback completions.
#[derive(Debug)]
pub struct CompletionQueue {
    tx: Sender<ReadbackCompletion>,
    rx: Receiver<ReadbackCompletion>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    /// A sender to attach to readback commands.
    pub fn sender(&self) -> CompletionSender {
        self.tx.clone()
    }

    /// Take every completion delivered so far without blocking.
    pub fn drain(&self) -> Vec<ReadbackCompletion> {
        self.rx.try_iter().collect()
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A recorded GPU command.
pub enum Command<D: ComputeDevice> {
    SetTexture {
        kernel: Kernel,
        pass: Pass,
        image: D::Image,
    },
    SetBuffer {
        kernel: Kernel,
        pass: Pass,
        buffer: D::Buffer,
    },
    Dispatch {
        kernel: Kernel,
        pass: Pass,
        groups: [u32; 3],
        params: DispatchParams,
    },
    /// Resample the whole source onto the target (bilinear; a plain copy at
    /// equal sizes).
    Blit { source: D::Image, target: D::Image },
    /// Asynchronously copy a packed buffer back to host memory.
    Readback {
        buffer: D::Buffer,
        identity: BufferIdentity,
        reply: CompletionSender,
    },
}

/// An ordered list of commands, executed by [`ComputeDevice::submit`].
pub struct CommandList<D: ComputeDevice> {
    commands: Vec<Command<D>>,
}

impl<D: ComputeDevice> CommandList<D> {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    pub fn set_texture(&mut self, kernel: Kernel, pass: Pass, image: D::Image) {
        self.commands.push(Command::SetTexture {
            kernel,
            pass,
            image,
        });
    }

    pub fn set_buffer(&mut self, kernel: Kernel, pass: Pass, buffer: D::Buffer) {
        self.commands.push(Command::SetBuffer {
            kernel,
            pass,
            buffer,
        });
    }

    pub fn dispatch(&mut self, kernel: Kernel, pass: Pass, groups: [u32; 3], params: DispatchParams) {
        self.commands.push(Command::Dispatch {
            kernel,
            pass,
            groups,
            params,
        });
    }

    pub fn blit(&mut self, source: D::Image, target: D::Image) {
        self.commands.push(Command::Blit { source, target });
    }

    pub fn readback(&mut self, buffer: D::Buffer, identity: BufferIdentity, reply: CompletionSender) {
        self.commands.push(Command::Readback {
            buffer,
            identity,
            reply,
        });
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command<D>] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command<D>> {
        self.commands
    }
}

impl<D: ComputeDevice> Default for CommandList<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// A device able to run the packing kernels.
///
/// All methods take `&self`; implementations synchronize internally so a
/// device can be shared between pipelines behind an `Arc`.
pub trait ComputeDevice: Sized {
    type Image: DeviceImage + Clone;
    type Buffer: DeviceBuffer + Clone;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    fn create_buffer(&self, element_count: usize) -> VidlinkResult<Self::Buffer>;
    fn create_image(&self, width: u32, height: u32) -> VidlinkResult<Self::Image>;

    /// Borrow a scratch image of the given size, pooled per size.
    fn acquire_temporary(&self, width: u32, height: u32) -> VidlinkResult<Self::Image>;
    /// Return a scratch image obtained from [`acquire_temporary`](Self::acquire_temporary).
    fn release_temporary(&self, image: Self::Image);

    /// Copy raw host bytes into the start of a packed buffer.
    fn upload(&self, buffer: &Self::Buffer, bytes: &[u8]) -> VidlinkResult<()>;

    /// Blocking host to device image transfer.
    fn write_image(&self, image: &Self::Image, frame: &FrameBuffer) -> VidlinkResult<()>;
    /// Blocking device to host image transfer.
    fn read_image(&self, image: &Self::Image) -> VidlinkResult<FrameBuffer>;

    fn submit(&self, commands: CommandList<Self>) -> VidlinkResult<()>;

    /// Copy the bytes of a completed readback into `dest` and forget the ticket.
    fn resolve_readback(&self, ticket: ReadbackTicket, dest: &mut [u8]) -> VidlinkResult<()>;
    /// Forget a readback without copying it.
    fn discard_readback(&self, ticket: ReadbackTicket);

    /// Deliver any completions that are ready, without blocking.
    fn poll(&self);
    /// Block until every submitted readback has delivered its completion.
    fn wait_all(&self);
}
