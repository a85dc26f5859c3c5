//! Process-wide transport objects shared between pipelines.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};
use vidlink_core::{RecvSettings, Tally, TransportConfig, VidlinkError, VidlinkResult, VideoFrame};

use crate::transport::{SourceFinder, Transport, VideoReceiver, VideoSender};

pub type SharedFinder = Arc<Mutex<Box<dyn SourceFinder>>>;
pub type SharedSender = Arc<Mutex<Box<dyn VideoSender>>>;

#[derive(Default)]
struct Shared {
    finder: Option<SharedFinder>,
    screen_sender: Option<SharedSender>,
    shut_down: bool,
}

/// Owns the transport and the objects every pipeline shares: one source
/// finder and one screen sender, both created on first use.
pub struct Registry {
    transport: Arc<dyn Transport>,
    screen_sender_name: String,
    shared: Mutex<Shared>,
}

impl Registry {
    pub fn init(transport: Arc<dyn Transport>, config: &TransportConfig) -> Arc<Self> {
        info!(screen_sender = %config.screen_sender_name, "transport registry initialized");
        Arc::new(Self {
            transport,
            screen_sender_name: config.screen_sender_name.clone(),
            shared: Mutex::new(Shared::default()),
        })
    }

    fn ensure_live(shared: &Shared) -> VidlinkResult<()> {
        if shared.shut_down {
            return Err(VidlinkError::transport("registry has been shut down"));
        }
        Ok(())
    }

    pub fn finder(&self) -> VidlinkResult<SharedFinder> {
        let mut shared = self.shared.lock();
        Self::ensure_live(&shared)?;
        if let Some(finder) = &shared.finder {
            return Ok(Arc::clone(finder));
        }
        let finder = Arc::new(Mutex::new(self.transport.create_finder()?));
        shared.finder = Some(Arc::clone(&finder));
        Ok(finder)
    }

    /// The sender used by every screen-capture pipeline.
    pub fn screen_sender(&self) -> VidlinkResult<SharedSender> {
        let mut shared = self.shared.lock();
        Self::ensure_live(&shared)?;
        if let Some(sender) = &shared.screen_sender {
            return Ok(Arc::clone(sender));
        }
        let sender = Arc::new(Mutex::new(
            self.transport.create_sender(&self.screen_sender_name)?,
        ));
        shared.screen_sender = Some(Arc::clone(&sender));
        Ok(sender)
    }

    pub fn create_sender(&self, name: &str) -> VidlinkResult<Box<dyn VideoSender>> {
        Self::ensure_live(&self.shared.lock())?;
        self.transport.create_sender(name)
    }

    pub fn create_receiver(&self, settings: &RecvSettings) -> VidlinkResult<Box<dyn VideoReceiver>> {
        Self::ensure_live(&self.shared.lock())?;
        self.transport.create_receiver(settings)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().shut_down
    }

    /// Release the shared finder and screen sender. Pipelines must have been
    /// disabled first; a screen sender still referenced elsewhere is flushed
    /// and lives until its last handle drops.
    pub fn shutdown(&self) {
        let mut shared = self.shared.lock();
        if shared.shut_down {
            return;
        }
        shared.shut_down = true;
        shared.finder = None;
        if let Some(sender) = shared.screen_sender.take() {
            sender.lock().flush();
            if Arc::strong_count(&sender) > 1 {
                warn!("screen sender still in use at registry shutdown");
            }
        }
        info!("transport registry shut down");
    }
}

/// A pipeline's sender: owned outright, or the registry's shared one.
pub enum SenderHandle {
    Owned(Box<dyn VideoSender>),
    Shared(SharedSender),
}

impl SenderHandle {
    pub fn name(&self) -> String {
        match self {
            SenderHandle::Owned(sender) => sender.name().to_string(),
            SenderHandle::Shared(sender) => sender.lock().name().to_string(),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, SenderHandle::Shared(_))
    }

    /// # Safety
    /// Same contract as [`VideoSender::send_video_async`].
    pub unsafe fn send_video_async(&mut self, frame: &VideoFrame) {
        match self {
            SenderHandle::Owned(sender) => sender.send_video_async(frame),
            SenderHandle::Shared(sender) => sender.lock().send_video_async(frame),
        }
    }

    pub fn flush(&mut self) {
        match self {
            SenderHandle::Owned(sender) => sender.flush(),
            SenderHandle::Shared(sender) => sender.lock().flush(),
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            SenderHandle::Owned(sender) => sender.is_valid(),
            SenderHandle::Shared(sender) => sender.lock().is_valid(),
        }
    }

    pub fn tally(&self) -> Option<Tally> {
        match self {
            SenderHandle::Owned(sender) => sender.tally(),
            SenderHandle::Shared(sender) => sender.lock().tally(),
        }
    }

    /// Give the sender up. An owned sender is destroyed, which transmits its
    /// frame in flight; a shared sender is only flushed.
    pub fn release(mut self) {
        if self.is_shared() {
            self.flush();
        }
    }
}
