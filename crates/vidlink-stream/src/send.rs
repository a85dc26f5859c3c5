//! Capture, pack and hand frames to the transport without stalling the
//! render loop.
//!
//! Each tick records the encode plus an asynchronous readback into a fresh
//! pool entry. When a readback completes, the entry is sent and *marked*:
//! the transport may keep reading it until the following send, so it is
//! only freed right after that next send (or at teardown, after the sender
//! has been flushed or destroyed).

use std::sync::Arc;

use tracing::{debug, info, warn};
use vidlink_core::{
    CaptureMode, FramePool, SenderConfig, Tally, VidlinkError, VidlinkResult, VideoFrame,
};
use vidlink_render::{
    CommandList, CompletionQueue, ComputeDevice, ConverterStats, DeviceImage, FormatConverter,
    ReadbackCompletion,
};
use vidlink_transport::{Registry, SenderHandle};

use crate::capture::{CameraId, CaptureSource, Captured, ScreenGrabber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// Sub-objects not created yet.
    Idle,
    /// Ready to capture; no readback in flight.
    DeviceReady,
    Capturing,
    Converting,
    /// At least one readback has not completed yet.
    ReadbackPending,
    Completing,
    Disposing,
}

pub struct SendPipeline<D: ComputeDevice> {
    device: Arc<D>,
    registry: Arc<Registry>,
    sender: Option<SenderHandle>,
    converter: FormatConverter<D>,
    pool: FramePool,
    completions: CompletionQueue,
    source: CaptureSource<D>,
    name: String,
    keep_alpha: bool,
    metadata: Option<String>,
    frame_rate: (i32, i32),
    state: SendState,
    enabled: bool,
    in_flight: usize,
    frames_sent: usize,
}

impl<D: ComputeDevice> SendPipeline<D> {
    pub fn new(device: Arc<D>, registry: Arc<Registry>, config: &SenderConfig) -> Self {
        Self {
            device,
            registry,
            sender: None,
            converter: FormatConverter::new(),
            pool: FramePool::new(),
            completions: CompletionQueue::new(),
            source: CaptureSource::new(config.capture, config.linear_color),
            name: config.name.clone(),
            keep_alpha: config.keep_alpha,
            metadata: config.metadata.clone(),
            frame_rate: (config.frame_rate_n, config.frame_rate_d),
            state: SendState::Idle,
            enabled: true,
            in_flight: 0,
            frames_sent: 0,
        }
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    pub fn converter_stats(&self) -> ConverterStats {
        self.converter.stats()
    }

    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.source.mode
    }

    /// Name of the sender frames currently go to, if one exists.
    pub fn sender_name(&self) -> Option<String> {
        self.sender.as_ref().map(|s| s.name())
    }

    /// Program/preview state of the current sender; all-false without one.
    pub fn tally(&self) -> Tally {
        self.sender
            .as_ref()
            .and_then(|s| s.tally())
            .unwrap_or_default()
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Tear everything down. Blocks until outstanding readbacks complete.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.teardown();
    }

    /// Change the advertised name. Restarts the sender.
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name != self.name {
            info!(from = %self.name, to = %name, "sender renamed");
            self.name = name;
            self.restart();
        }
    }

    pub fn set_capture_mode(&mut self, mode: CaptureMode) {
        if mode != self.source.mode {
            info!(?mode, "capture mode changed");
            self.source.mode = mode;
            self.restart();
        }
    }

    /// Re-attach the camera hook; nothing else restarts.
    pub fn set_source_camera(&mut self, camera: Option<CameraId>) {
        self.source.camera.attach(camera);
    }

    pub fn set_source_texture(&mut self, texture: Option<D::Image>) {
        self.source.texture.set_texture(texture);
    }

    pub fn set_screen_grabber(&mut self, grabber: Option<Box<dyn ScreenGrabber<D>>>) {
        self.source.screen.set_grabber(grabber);
    }

    pub fn set_keep_alpha(&mut self, keep_alpha: bool) {
        self.keep_alpha = keep_alpha;
    }

    pub fn set_metadata(&mut self, metadata: Option<String>) {
        self.metadata = metadata;
    }

    /// Frame rate stamped on outgoing frames; 0/0 leaves it to the transport.
    pub fn set_frame_rate(&mut self, numerator: i32, denominator: i32) {
        self.frame_rate = (numerator, denominator);
    }

    pub fn set_linear_color(&mut self, linear: bool) {
        self.source.linear = linear;
    }

    /// Host render callback for `camera`. Returns whether a copy was recorded.
    pub fn on_camera_render(
        &mut self,
        cmd: &mut CommandList<D>,
        camera: CameraId,
        source: &D::Image,
    ) -> VidlinkResult<bool> {
        if !self.enabled || self.source.mode != CaptureMode::Camera {
            return Ok(false);
        }
        self.source.camera.on_render(&self.device, cmd, camera, source)
    }

    /// Run one frame of the pipeline. Call at the end of every host frame.
    pub fn tick(&mut self) {
        if !self.enabled {
            return;
        }
        self.drain_completions();
        if self.state == SendState::Idle {
            self.prepare();
        }

        self.state = SendState::Capturing;
        match self.source.capture(&self.device) {
            Ok(Some(captured)) => {
                self.state = SendState::Converting;
                if let Err(e) = self.convert(&captured) {
                    warn!(error = %e, "frame skipped");
                }
                self.source.release(&self.device, captured);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "capture failed"),
        }

        self.device.poll();
        self.drain_completions();
        self.settle();
    }

    fn settle(&mut self) {
        self.state = if self.in_flight > 0 {
            SendState::ReadbackPending
        } else {
            SendState::DeviceReady
        };
    }

    fn prepare(&mut self) {
        let sender = match self.source.mode {
            CaptureMode::Screen => self.registry.screen_sender().map(SenderHandle::Shared),
            CaptureMode::Camera | CaptureMode::Texture => {
                self.registry.create_sender(&self.name).map(SenderHandle::Owned)
            }
        };
        match sender {
            Ok(sender) => {
                info!(name = %sender.name(), shared = sender.is_shared(), "send pipeline ready");
                self.sender = Some(sender);
            }
            Err(e) => {
                warn!(name = %self.name, error = %e, "no sender; frames will be dropped");
                self.sender = None;
            }
        }
        self.state = SendState::DeviceReady;
    }

    /// Record the encode and a readback into a fresh pool entry, then submit.
    fn convert(&mut self, captured: &Captured<D::Image>) -> VidlinkResult<()> {
        let mut cmd = CommandList::new();
        let buffer = self.converter.encode_deferred(
            &self.device,
            &mut cmd,
            &captured.image,
            self.keep_alpha,
            captured.linear,
        )?;

        let (width, height) = (captured.image.width(), captured.image.height());
        let id = self
            .pool
            .allocate(width, height, self.keep_alpha, self.metadata.as_deref());
        let Some(identity) = self.pool.entry(id).and_then(|e| e.identity()) else {
            self.pool.free(id);
            return Err(VidlinkError::Other("pool entry has no storage".into()));
        };
        cmd.readback(buffer, identity, self.completions.sender());

        if let Err(e) = self.device.submit(cmd) {
            self.pool.free(id);
            return Err(e);
        }
        self.in_flight += 1;
        self.state = SendState::ReadbackPending;
        debug!(width, height, alpha = self.keep_alpha, "readback queued");
        Ok(())
    }

    fn drain_completions(&mut self) {
        for completion in self.completions.drain() {
            self.in_flight = self.in_flight.saturating_sub(1);
            let previous = self.state;
            self.state = SendState::Completing;
            self.complete(completion);
            self.state = previous;
        }
    }

    fn complete(&mut self, completion: ReadbackCompletion) {
        let ReadbackCompletion {
            ticket,
            identity,
            status,
        } = completion;

        let Some(id) = self.pool.find_by_identity(identity) else {
            debug!(ticket = ticket.0, "stale readback completion ignored");
            self.device.discard_readback(ticket);
            return;
        };

        if let Err(reason) = status {
            warn!(ticket = ticket.0, %reason, "readback failed; frame dropped");
            self.device.discard_readback(ticket);
            self.pool.free(id);
            return;
        }

        let Some(sender) = self.sender.as_mut().filter(|s| s.is_valid()) else {
            self.device.discard_readback(ticket);
            self.pool.free(id);
            return;
        };

        let resolved = match self.pool.entry_mut(id) {
            Some(entry) => self.device.resolve_readback(ticket, entry.image_mut()),
            None => Err(VidlinkError::Readback("entry vanished".into())),
        };
        if let Err(e) = resolved {
            warn!(error = %e, "readback could not be resolved; frame dropped");
            self.pool.free(id);
            return;
        }

        let Some(entry) = self.pool.entry(id) else {
            return;
        };
        let (rate_n, rate_d) = self.frame_rate;
        let frame = VideoFrame::from_entry(entry).with_frame_rate(rate_n, rate_d);
        // SAFETY: the entry stays hot until the next send has been issued
        // (it is marked below), or until teardown has flushed or destroyed
        // the sender.
        unsafe { sender.send_video_async(&frame) };
        self.pool.free_marked();
        self.pool.mark(id);
        self.frames_sent += 1;
    }

    fn restart(&mut self) {
        self.teardown();
    }

    /// Ordered shutdown: detach the sender, wait for the device, clean up
    /// late completions, release the sender, then drop converter and pool.
    fn teardown(&mut self) {
        if self.state == SendState::Idle && self.sender.is_none() && self.pool.hot_count() == 0 {
            return;
        }
        self.state = SendState::Disposing;

        let sender = self.sender.take();
        self.device.wait_all();
        self.drain_completions();
        if let Some(sender) = sender {
            debug!(name = %sender.name(), "releasing sender");
            sender.release();
        }
        self.converter.dispose();
        self.pool.dispose();
        self.in_flight = 0;
        self.state = SendState::Idle;
    }
}

impl<D: ComputeDevice> Drop for SendPipeline<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}
