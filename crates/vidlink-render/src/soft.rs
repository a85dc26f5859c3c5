//! CPU implementation of [`ComputeDevice`].
//!
//! Runs the same packing math as the WGSL kernels with rayon. Readbacks
//! snapshot the buffer at submit time and complete after a configurable
//! number of [`poll`](ComputeDevice::poll) calls, which lets tests hold
//! several readbacks in flight at once.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use vidlink_core::{BufferIdentity, FrameBuffer, VidlinkError, VidlinkResult};

use crate::device::{
    Command, CommandList, CompletionSender, ComputeDevice, DeviceBuffer, DeviceImage,
    DispatchParams, Kernel, Pass, ReadbackCompletion, ReadbackTicket,
};
use crate::packing;

/// Shared handle to a host-resident RGBA image.
#[derive(Debug, Clone)]
pub struct SoftImage {
    pixels: Arc<RwLock<FrameBuffer>>,
}

impl SoftImage {
    pub fn from_frame(frame: FrameBuffer) -> Self {
        Self {
            pixels: Arc::new(RwLock::new(frame)),
        }
    }

    /// Copy of the current pixels.
    pub fn snapshot(&self) -> FrameBuffer {
        self.pixels.read().clone()
    }

    pub fn ptr_eq(&self, other: &SoftImage) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl DeviceImage for SoftImage {
    fn width(&self) -> u32 {
        self.pixels.read().width
    }

    fn height(&self) -> u32 {
        self.pixels.read().height
    }
}

/// Shared handle to a packed element buffer.
#[derive(Debug, Clone)]
pub struct SoftBuffer {
    words: Arc<RwLock<Vec<u32>>>,
}

impl SoftBuffer {
    pub fn snapshot(&self) -> Vec<u32> {
        self.words.read().clone()
    }

    pub fn ptr_eq(&self, other: &SoftBuffer) -> bool {
        Arc::ptr_eq(&self.words, &other.words)
    }
}

impl DeviceBuffer for SoftBuffer {
    fn element_count(&self) -> usize {
        self.words.read().len()
    }
}

/// Counters exposed for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftDeviceStats {
    pub buffers_created: usize,
    pub images_created: usize,
    pub temporaries_acquired: usize,
    pub temporaries_released: usize,
    pub dispatches: usize,
    pub blits: usize,
    pub readbacks_submitted: usize,
    pub readbacks_completed: usize,
}

struct PendingReadback {
    ticket: ReadbackTicket,
    identity: BufferIdentity,
    reply: CompletionSender,
    bytes: Vec<u8>,
    remaining_polls: u32,
    fail: bool,
}

#[derive(Default)]
struct SoftState {
    next_ticket: u64,
    latency: u32,
    fail_next: bool,
    pending: Vec<PendingReadback>,
    resolved: HashMap<ReadbackTicket, Vec<u8>>,
    temporaries: HashMap<(u32, u32), Vec<SoftImage>>,
    stats: SoftDeviceStats,
}

#[derive(Default)]
struct Bindings {
    image: Option<SoftImage>,
    buffer: Option<SoftBuffer>,
}

/// A [`ComputeDevice`] that executes on the CPU.
pub struct SoftDevice {
    state: Mutex<SoftState>,
}

impl SoftDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SoftState::default()),
        }
    }

    /// Number of polls a readback waits before completing. Zero completes on
    /// the first poll after submission.
    pub fn set_readback_latency(&self, polls: u32) {
        self.state.lock().latency = polls;
    }

    /// Make the next submitted readback complete with an error.
    pub fn fail_next_readback(&self) {
        self.state.lock().fail_next = true;
    }

    pub fn pending_readbacks(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn stats(&self) -> SoftDeviceStats {
        self.state.lock().stats
    }

    fn dispatch(
        kernel: Kernel,
        pass: Pass,
        params: DispatchParams,
        bound: &Bindings,
    ) -> VidlinkResult<()> {
        let (Some(image), Some(buffer)) = (&bound.image, &bound.buffer) else {
            return Err(VidlinkError::Gpu(format!(
                "{:?}/{:?} dispatched without both bindings",
                kernel, pass
            )));
        };
        let alpha = pass == Pass::Alpha;
        let needed = vidlink_core::frame_element_count(params.width, params.height, alpha);
        if buffer.element_count() < needed {
            return Err(VidlinkError::Gpu(format!(
                "packed buffer holds {} elements, dispatch needs {}",
                buffer.element_count(),
                needed
            )));
        }
        if image.width() < params.width || image.height() < params.height {
            return Err(VidlinkError::Gpu(format!(
                "image {}x{} smaller than dispatch {}x{}",
                image.width(),
                image.height(),
                params.width,
                params.height
            )));
        }

        match kernel {
            Kernel::Encoder => {
                let frame = image.pixels.read();
                let mut words = buffer.words.write();
                packing::encode_frame(
                    &frame,
                    params.width,
                    params.height,
                    alpha,
                    params.linear,
                    &mut words,
                );
            }
            Kernel::Decoder => {
                let words = buffer.words.read();
                let mut frame = image.pixels.write();
                packing::decode_frame(&words, params.width, params.height, alpha, &mut frame);
            }
        }
        Ok(())
    }

    fn complete(state: &mut SoftState, pending: PendingReadback) {
        state.stats.readbacks_completed += 1;
        let status = if pending.fail {
            Err("injected readback failure".to_string())
        } else {
            Ok(())
        };
        let delivered = pending
            .reply
            .send(ReadbackCompletion {
                ticket: pending.ticket,
                identity: pending.identity,
                status: status.clone(),
            })
            .is_ok();
        if delivered && status.is_ok() {
            state.resolved.insert(pending.ticket, pending.bytes);
        }
    }
}

impl Default for SoftDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeDevice for SoftDevice {
    type Image = SoftImage;
    type Buffer = SoftBuffer;

    fn name(&self) -> &str {
        "software"
    }

    fn create_buffer(&self, element_count: usize) -> VidlinkResult<SoftBuffer> {
        self.state.lock().stats.buffers_created += 1;
        Ok(SoftBuffer {
            words: Arc::new(RwLock::new(vec![0; element_count])),
        })
    }

    fn create_image(&self, width: u32, height: u32) -> VidlinkResult<SoftImage> {
        self.state.lock().stats.images_created += 1;
        Ok(SoftImage::from_frame(FrameBuffer::new(width, height)))
    }

    fn acquire_temporary(&self, width: u32, height: u32) -> VidlinkResult<SoftImage> {
        let mut state = self.state.lock();
        state.stats.temporaries_acquired += 1;
        if let Some(image) = state
            .temporaries
            .get_mut(&(width, height))
            .and_then(|free| free.pop())
        {
            return Ok(image);
        }
        Ok(SoftImage::from_frame(FrameBuffer::new(width, height)))
    }

    fn release_temporary(&self, image: SoftImage) {
        let key = (image.width(), image.height());
        let mut state = self.state.lock();
        state.stats.temporaries_released += 1;
        state.temporaries.entry(key).or_default().push(image);
    }

    fn upload(&self, buffer: &SoftBuffer, bytes: &[u8]) -> VidlinkResult<()> {
        let mut words = buffer.words.write();
        if bytes.len() % 4 != 0 || bytes.len() > words.len() * 4 {
            return Err(VidlinkError::InvalidArgument(format!(
                "cannot upload {} bytes into a buffer of {} elements",
                bytes.len(),
                words.len()
            )));
        }
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(())
    }

    fn write_image(&self, image: &SoftImage, frame: &FrameBuffer) -> VidlinkResult<()> {
        let mut pixels = image.pixels.write();
        if pixels.width != frame.width || pixels.height != frame.height {
            return Err(VidlinkError::dimensions(
                frame.width,
                frame.height,
                format!("image is {}x{}", pixels.width, pixels.height),
            ));
        }
        pixels.data.copy_from_slice(&frame.data);
        Ok(())
    }

    fn read_image(&self, image: &SoftImage) -> VidlinkResult<FrameBuffer> {
        Ok(image.snapshot())
    }

    fn submit(&self, commands: CommandList<Self>) -> VidlinkResult<()> {
        let mut bindings: HashMap<(Kernel, Pass), Bindings> = HashMap::new();

        for command in commands.into_commands() {
            match command {
                Command::SetTexture {
                    kernel,
                    pass,
                    image,
                } => bindings.entry((kernel, pass)).or_default().image = Some(image),
                Command::SetBuffer {
                    kernel,
                    pass,
                    buffer,
                } => bindings.entry((kernel, pass)).or_default().buffer = Some(buffer),
                Command::Dispatch {
                    kernel,
                    pass,
                    params,
                    ..
                } => {
                    let bound = bindings.entry((kernel, pass)).or_default();
                    Self::dispatch(kernel, pass, params, bound)?;
                    self.state.lock().stats.dispatches += 1;
                }
                Command::Blit { source, target } => {
                    if !source.ptr_eq(&target) {
                        let src = source.pixels.read();
                        target.pixels.write().blit_scaled(&src);
                    }
                    self.state.lock().stats.blits += 1;
                }
                Command::Readback {
                    buffer,
                    identity,
                    reply,
                } => {
                    let bytes = bytemuck::cast_slice::<u32, u8>(&buffer.words.read()).to_vec();
                    let mut state = self.state.lock();
                    let ticket = ReadbackTicket(state.next_ticket);
                    state.next_ticket += 1;
                    let fail = std::mem::take(&mut state.fail_next);
                    let remaining_polls = state.latency;
                    state.stats.readbacks_submitted += 1;
                    state.pending.push(PendingReadback {
                        ticket,
                        identity,
                        reply,
                        bytes,
                        remaining_polls,
                        fail,
                    });
                    tracing::trace!(ticket = ticket.0, "software readback queued");
                }
            }
        }
        Ok(())
    }

    fn resolve_readback(&self, ticket: ReadbackTicket, dest: &mut [u8]) -> VidlinkResult<()> {
        let bytes = self
            .state
            .lock()
            .resolved
            .remove(&ticket)
            .ok_or_else(|| VidlinkError::Readback(format!("unknown ticket {}", ticket.0)))?;
        if bytes.len() != dest.len() {
            return Err(VidlinkError::Readback(format!(
                "readback of {} bytes into {} byte destination",
                bytes.len(),
                dest.len()
            )));
        }
        dest.copy_from_slice(&bytes);
        Ok(())
    }

    fn discard_readback(&self, ticket: ReadbackTicket) {
        self.state.lock().resolved.remove(&ticket);
    }

    fn poll(&self) {
        let mut state = self.state.lock();
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
            .into_iter()
            .partition(|p| p.remaining_polls == 0);
        state.pending = waiting
            .into_iter()
            .map(|mut p| {
                p.remaining_polls -= 1;
                p
            })
            .collect();
        for pending in ready {
            Self::complete(&mut state, pending);
        }
    }

    fn wait_all(&self) {
        let mut state = self.state.lock();
        for pending in std::mem::take(&mut state.pending) {
            Self::complete(&mut state, pending);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CompletionQueue;

    fn gradient(width: u32, height: u32) -> FrameBuffer {
        let mut frame = FrameBuffer::new(width, height);
        for y in 0..height {
            for x in 0..width {
                frame.set_pixel(x, y, [(x * 4) as u8, (y * 4) as u8, 128, 255]);
            }
        }
        frame
    }

    fn queue_readback(device: &SoftDevice, queue: &CompletionQueue, id: usize) -> SoftBuffer {
        let buffer = device.create_buffer(8).unwrap();
        device.upload(&buffer, &[id as u8; 32]).unwrap();
        let mut cmd = CommandList::new();
        cmd.readback(buffer.clone(), BufferIdentity(id), queue.sender());
        device.submit(cmd).unwrap();
        buffer
    }

    #[test]
    fn test_readback_latency() {
        let device = SoftDevice::new();
        let queue = CompletionQueue::new();
        device.set_readback_latency(2);
        queue_readback(&device, &queue, 1);

        device.poll();
        device.poll();
        assert!(queue.drain().is_empty());
        device.poll();
        let done = queue.drain();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].identity, BufferIdentity(1));

        let mut dest = [0u8; 32];
        device.resolve_readback(done[0].ticket, &mut dest).unwrap();
        assert_eq!(dest, [1u8; 32]);
        assert!(device.resolve_readback(done[0].ticket, &mut dest).is_err());
    }

    #[test]
    fn test_readback_snapshots_at_submit() {
        let device = SoftDevice::new();
        let queue = CompletionQueue::new();
        let buffer = queue_readback(&device, &queue, 7);
        device.upload(&buffer, &[0xff; 32]).unwrap();
        device.poll();
        let done = queue.drain();
        let mut dest = [0u8; 32];
        device.resolve_readback(done[0].ticket, &mut dest).unwrap();
        assert_eq!(dest, [7u8; 32]);
    }

    #[test]
    fn test_injected_failure() {
        let device = SoftDevice::new();
        let queue = CompletionQueue::new();
        device.fail_next_readback();
        queue_readback(&device, &queue, 1);
        queue_readback(&device, &queue, 2);
        device.wait_all();
        let done = queue.drain();
        assert!(done[0].status.is_err());
        assert!(done[1].status.is_ok());
        assert_eq!(device.pending_readbacks(), 0);
    }

    #[test]
    fn test_dispatch_requires_bindings() {
        let device = SoftDevice::new();
        let mut cmd = CommandList::new();
        cmd.dispatch(
            Kernel::Encoder,
            Pass::Opaque,
            [1, 1, 1],
            DispatchParams {
                width: 16,
                height: 8,
                linear: false,
            },
        );
        assert!(matches!(device.submit(cmd), Err(VidlinkError::Gpu(_))));
    }

    #[test]
    fn test_encode_decode_dispatch() {
        let device = SoftDevice::new();
        let source = SoftImage::from_frame(gradient(32, 16));
        let packed = device.create_buffer(32 * 16 / 2).unwrap();
        let output = device.create_image(32, 16).unwrap();
        let params = DispatchParams {
            width: 32,
            height: 16,
            linear: false,
        };

        let mut cmd = CommandList::new();
        cmd.set_texture(Kernel::Encoder, Pass::Opaque, source.clone());
        cmd.set_buffer(Kernel::Encoder, Pass::Opaque, packed.clone());
        cmd.dispatch(Kernel::Encoder, Pass::Opaque, [2, 2, 1], params);
        cmd.set_buffer(Kernel::Decoder, Pass::Opaque, packed.clone());
        cmd.set_texture(Kernel::Decoder, Pass::Opaque, output.clone());
        cmd.dispatch(Kernel::Decoder, Pass::Opaque, [2, 2, 1], params);
        device.submit(cmd).unwrap();

        let error = source.snapshot().mean_abs_error(&output.snapshot()).unwrap();
        assert!(error < 4.0, "mean error {}", error);
        assert_eq!(device.stats().dispatches, 2);
    }

    #[test]
    fn test_temporaries_are_pooled() {
        let device = SoftDevice::new();
        let a = device.acquire_temporary(64, 32).unwrap();
        device.release_temporary(a.clone());
        let b = device.acquire_temporary(64, 32).unwrap();
        assert!(a.ptr_eq(&b));
        let c = device.acquire_temporary(32, 32).unwrap();
        assert!(!a.ptr_eq(&c));
    }

    #[test]
    fn test_blit_scales_source_to_target() {
        let device = SoftDevice::new();
        let source = SoftImage::from_frame(FrameBuffer::solid(8, 8, [255, 0, 0, 255]));
        let target = device.create_image(16, 4).unwrap();
        let mut cmd = CommandList::new();
        cmd.blit(source, target.clone());
        device.submit(cmd).unwrap();
        let out = target.snapshot();
        assert_eq!(out.get_pixel(7, 3), Some([255, 0, 0, 255]));
        assert_eq!(out.get_pixel(15, 0), Some([255, 0, 0, 255]));
        assert_eq!(device.stats().blits, 1);
    }
}
