//! In-process transport connecting senders and receivers by name.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use vidlink_core::{
    FrameFormat, RecvSettings, SourceDescriptor, Tally, VidlinkError, VidlinkResult, VideoFrame,
};

use crate::transport::{SourceFinder, Transport, VideoReceiver, VideoSender};

/// An owned copy of a transmitted frame.
#[derive(Debug)]
struct Published {
    width: i32,
    height: i32,
    fourcc: u32,
    frame_rate_n: i32,
    frame_rate_d: i32,
    aspect_ratio: f32,
    timecode: i64,
    line_stride: i32,
    timestamp: i64,
    data: Vec<u8>,
    metadata: Option<CString>,
}

impl Published {
    /// # Safety
    /// The frame's pointers must be valid as described by
    /// [`VideoFrame::payload`].
    unsafe fn copy_of(frame: &VideoFrame) -> Self {
        let metadata = if frame.metadata.is_null() {
            None
        } else {
            Some(CStr::from_ptr(frame.metadata).to_owned())
        };
        Self {
            width: frame.width,
            height: frame.height,
            fourcc: frame.fourcc,
            frame_rate_n: frame.frame_rate_n,
            frame_rate_d: frame.frame_rate_d,
            aspect_ratio: frame.aspect_ratio,
            timecode: frame.timecode,
            line_stride: frame.line_stride,
            timestamp: frame.timestamp,
            data: frame.payload().to_vec(),
            metadata,
        }
    }
}

#[derive(Debug, Default)]
struct Channel {
    sender_alive: bool,
    receivers: usize,
    sequence: u64,
    latest: Option<Arc<Published>>,
}

/// Lifecycle counters of a [`LoopbackTransport`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    pub senders_created: usize,
    pub senders_destroyed: usize,
    pub receivers_created: usize,
    pub frames_published: usize,
    pub frames_per_sender: HashMap<String, usize>,
}

#[derive(Debug, Default)]
struct Network {
    channels: HashMap<String, Channel>,
    stats: LoopbackStats,
}

impl Network {
    /// Forget a channel once nobody sends or listens on it.
    fn prune(&mut self, name: &str) {
        if self
            .channels
            .get(name)
            .is_some_and(|c| !c.sender_alive && c.receivers == 0)
        {
            self.channels.remove(name);
            debug!(name, "loopback channel removed");
        }
    }
}

/// A transport whose network is a map in process memory.
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    network: Arc<Mutex<Network>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> LoopbackStats {
        self.network.lock().stats.clone()
    }

    /// Frames transmitted so far by senders with this name.
    pub fn frames_sent(&self, name: &str) -> usize {
        self.network
            .lock()
            .stats
            .frames_per_sender
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

impl Transport for LoopbackTransport {
    fn create_finder(&self) -> VidlinkResult<Box<dyn SourceFinder>> {
        Ok(Box::new(LoopbackFinder {
            network: Arc::clone(&self.network),
        }))
    }

    fn create_sender(&self, name: &str) -> VidlinkResult<Box<dyn VideoSender>> {
        if name.is_empty() {
            return Err(VidlinkError::transport("sender name must not be empty"));
        }
        let mut network = self.network.lock();
        let channel = network.channels.entry(name.to_string()).or_default();
        if channel.sender_alive {
            return Err(VidlinkError::transport(format!(
                "a sender named '{}' already exists",
                name
            )));
        }
        channel.sender_alive = true;
        network.stats.senders_created += 1;
        info!(name, "loopback sender created");

        Ok(Box::new(LoopbackSender {
            name: name.to_string(),
            network: Arc::clone(&self.network),
            pending: None,
        }))
    }

    fn create_receiver(&self, settings: &RecvSettings) -> VidlinkResult<Box<dyn VideoReceiver>> {
        let name = settings.source.name.clone();
        let mut network = self.network.lock();
        // Receivers for a name nobody sends on stay disconnected and do not
        // open a channel.
        let (counted, last_seen) = match network.channels.get_mut(&name) {
            Some(channel) => {
                channel.receivers += 1;
                (true, channel.sequence)
            }
            None => (false, 0),
        };
        network.stats.receivers_created += 1;
        info!(source = %name, "loopback receiver created");

        Ok(Box::new(LoopbackReceiver {
            source: name,
            network: Arc::clone(&self.network),
            last_seen,
            counted,
            held: Vec::new(),
        }))
    }
}

struct LoopbackFinder {
    network: Arc<Mutex<Network>>,
}

impl SourceFinder for LoopbackFinder {
    fn current_sources(&self) -> Vec<SourceDescriptor> {
        let network = self.network.lock();
        let mut sources: Vec<_> = network
            .channels
            .iter()
            .filter(|(_, channel)| channel.sender_alive)
            .map(|(name, _)| {
                SourceDescriptor::new(name.clone()).with_address(format!("loopback://{}", name))
            })
            .collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        sources
    }
}

/// Frame handed to `send_video_async` and not yet transmitted.
struct PendingFrame(VideoFrame);

// SAFETY: the pointers inside are only dereferenced by the sender's owner
// while it calls send, flush or drop, which the send contract covers.
unsafe impl Send for PendingFrame {}

struct LoopbackSender {
    name: String,
    network: Arc<Mutex<Network>>,
    pending: Option<PendingFrame>,
}

impl LoopbackSender {
    /// Transmit the pending frame, if any.
    fn transmit(&mut self) {
        let Some(PendingFrame(frame)) = self.pending.take() else {
            return;
        };
        // SAFETY: the frame was handed to `send_video_async`, whose caller
        // keeps it valid until this send, flush or drop.
        let published = Arc::new(unsafe { Published::copy_of(&frame) });

        let mut network = self.network.lock();
        let channel = network.channels.entry(self.name.clone()).or_default();
        channel.sequence += 1;
        channel.latest = Some(published);
        network.stats.frames_published += 1;
        *network
            .stats
            .frames_per_sender
            .entry(self.name.clone())
            .or_default() += 1;
        debug!(name = %self.name, "loopback frame transmitted");
    }
}

impl VideoSender for LoopbackSender {
    fn name(&self) -> &str {
        &self.name
    }

    unsafe fn send_video_async(&mut self, frame: &VideoFrame) {
        self.transmit();
        self.pending = Some(PendingFrame(*frame));
    }

    fn flush(&mut self) {
        self.transmit();
    }

    fn tally(&self) -> Option<Tally> {
        let network = self.network.lock();
        let receivers = network
            .channels
            .get(&self.name)
            .map(|c| c.receivers)
            .unwrap_or(0);
        Some(Tally {
            on_program: receivers > 0,
            on_preview: false,
        })
    }
}

impl Drop for LoopbackSender {
    fn drop(&mut self) {
        self.transmit();
        let mut network = self.network.lock();
        if let Some(channel) = network.channels.get_mut(&self.name) {
            channel.sender_alive = false;
        }
        network.prune(&self.name);
        network.stats.senders_destroyed += 1;
        info!(name = %self.name, "loopback sender destroyed");
    }
}

struct HeldFrame {
    frame: Arc<Published>,
    metadata: Option<CString>,
}

struct LoopbackReceiver {
    source: String,
    network: Arc<Mutex<Network>>,
    last_seen: u64,
    /// Whether this receiver is included in its channel's receiver count.
    counted: bool,
    held: Vec<HeldFrame>,
}

impl VideoReceiver for LoopbackReceiver {
    fn capture_video(&mut self) -> Option<VideoFrame> {
        let latest = {
            let network = self.network.lock();
            let channel = network.channels.get(&self.source)?;
            if channel.sequence == self.last_seen {
                return None;
            }
            self.last_seen = channel.sequence;
            Arc::clone(channel.latest.as_ref()?)
        };

        let metadata = latest.metadata.clone();
        let frame = VideoFrame {
            width: latest.width,
            height: latest.height,
            fourcc: latest.fourcc,
            frame_rate_n: latest.frame_rate_n,
            frame_rate_d: latest.frame_rate_d,
            aspect_ratio: latest.aspect_ratio,
            frame_format: FrameFormat::Progressive,
            timecode: latest.timecode,
            data: latest.data.as_ptr(),
            line_stride: latest.line_stride,
            metadata: metadata
                .as_ref()
                .map(|m| m.as_ptr())
                .unwrap_or(std::ptr::null()),
            timestamp: latest.timestamp,
        };
        self.held.push(HeldFrame {
            frame: latest,
            metadata,
        });
        Some(frame)
    }

    fn free_video(&mut self, frame: VideoFrame) {
        self.held.retain(|held| held.frame.data.as_ptr() != frame.data);
    }

    fn is_connected(&self) -> bool {
        self.network
            .lock()
            .channels
            .get(&self.source)
            .map(|c| c.sender_alive)
            .unwrap_or(false)
    }
}

impl LoopbackReceiver {
    #[cfg(test)]
    fn held_frames(&self) -> usize {
        self.held.len()
    }
}

impl Drop for LoopbackReceiver {
    fn drop(&mut self) {
        if !self.counted {
            return;
        }
        let mut network = self.network.lock();
        if let Some(channel) = network.channels.get_mut(&self.source) {
            channel.receivers = channel.receivers.saturating_sub(1);
        }
        network.prune(&self.source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidlink_core::FramePool;

    fn frame_for(pool: &mut FramePool, fill: u8) -> VideoFrame {
        let id = pool.allocate(16, 8, false, Some("take 1"));
        pool.entry_mut(id).unwrap().image_mut().fill(fill);
        VideoFrame::from_entry(pool.entry(id).unwrap())
    }

    #[test]
    fn test_empty_name_rejected() {
        let transport = LoopbackTransport::new();
        assert!(matches!(
            transport.create_sender(""),
            Err(VidlinkError::Transport(_))
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let transport = LoopbackTransport::new();
        let _a = transport.create_sender("Cam").unwrap();
        assert!(transport.create_sender("Cam").is_err());
    }

    #[test]
    fn test_frame_transmitted_on_next_send() {
        let transport = LoopbackTransport::new();
        let mut pool = FramePool::new();
        let mut sender = transport.create_sender("Cam").unwrap();

        let first = frame_for(&mut pool, 1);
        unsafe { sender.send_video_async(&first) };
        assert_eq!(transport.frames_sent("Cam"), 0);

        let second = frame_for(&mut pool, 2);
        unsafe { sender.send_video_async(&second) };
        assert_eq!(transport.frames_sent("Cam"), 1);

        sender.flush();
        assert_eq!(transport.frames_sent("Cam"), 2);
        sender.flush();
        assert_eq!(transport.frames_sent("Cam"), 2);
    }

    #[test]
    fn test_receiver_gets_owned_copy() {
        let transport = LoopbackTransport::new();
        let mut pool = FramePool::new();
        let mut sender = transport.create_sender("Cam").unwrap();
        let mut receiver = LoopbackReceiver {
            source: "Cam".into(),
            network: Arc::clone(&transport.network),
            last_seen: 0,
            counted: false,
            held: Vec::new(),
        };

        assert!(receiver.capture_video().is_none());
        let frame = frame_for(&mut pool, 7);
        unsafe { sender.send_video_async(&frame) };
        sender.flush();
        pool.dispose();

        let received = receiver.capture_video().unwrap();
        assert_eq!(received.width, 16);
        assert_eq!(receiver.held_frames(), 1);
        let bytes = unsafe { received.payload() };
        assert!(bytes.iter().all(|b| *b == 7));
        let metadata = unsafe { CStr::from_ptr(received.metadata) };
        assert_eq!(metadata.to_str().unwrap(), "take 1");

        assert!(receiver.capture_video().is_none());
        receiver.free_video(received);
        assert_eq!(receiver.held_frames(), 0);
    }

    #[test]
    fn test_finder_and_connection_state() {
        let transport = LoopbackTransport::new();
        let finder = transport.create_finder().unwrap();
        assert!(finder.current_sources().is_empty());

        let sender = transport.create_sender("Stage").unwrap();
        let sources = finder.current_sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name, "Stage");
        assert_eq!(sources[0].address.as_deref(), Some("loopback://Stage"));

        let receiver = transport
            .create_receiver(&RecvSettings::fastest(sources[0].clone()))
            .unwrap();
        assert!(receiver.is_connected());
        assert_eq!(
            sender.tally(),
            Some(Tally {
                on_program: true,
                on_preview: false
            })
        );

        drop(sender);
        assert!(!receiver.is_connected());
        assert!(finder.current_sources().is_empty());
        assert_eq!(transport.stats().senders_destroyed, 1);
    }

    #[test]
    fn test_channels_do_not_outlive_their_users() {
        let transport = LoopbackTransport::new();
        let channels = |t: &LoopbackTransport| t.network.lock().channels.len();

        for i in 0..5 {
            let settings = RecvSettings::fastest(SourceDescriptor::new(format!("Ghost {}", i)));
            let receiver = transport.create_receiver(&settings).unwrap();
            assert!(!receiver.is_connected());
        }
        assert_eq!(channels(&transport), 0);
        assert_eq!(transport.stats().receivers_created, 5);

        let sender = transport.create_sender("Stage").unwrap();
        let receiver = transport
            .create_receiver(&RecvSettings::fastest(SourceDescriptor::new("Stage")))
            .unwrap();
        assert_eq!(channels(&transport), 1);

        drop(sender);
        assert_eq!(channels(&transport), 1);
        drop(receiver);
        assert_eq!(channels(&transport), 0);

        let again = transport.create_sender("Stage").unwrap();
        assert_eq!(again.tally().map(|t| t.on_program), Some(false));
        drop(again);
        assert_eq!(channels(&transport), 0);
    }
}
