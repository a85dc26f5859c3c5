use vidlink_core::{RecvSettings, SourceDescriptor, Tally, VidlinkResult, VideoFrame};

/// Factory for the transport's finder, sender and receiver objects.
pub trait Transport: Send + Sync {
    fn create_finder(&self) -> VidlinkResult<Box<dyn SourceFinder>>;

    fn create_sender(&self, name: &str) -> VidlinkResult<Box<dyn VideoSender>>;

    fn create_receiver(&self, settings: &RecvSettings) -> VidlinkResult<Box<dyn VideoReceiver>>;
}

/// Discovers sources currently visible on the network.
pub trait SourceFinder: Send {
    fn current_sources(&self) -> Vec<SourceDescriptor>;
}

/// An asynchronous video sender.
///
/// The transport keeps at most one frame in flight: the frame passed to
/// [`send_video_async`](Self::send_video_async) is read some time before
/// the next send, [`flush`](Self::flush) or drop returns.
pub trait VideoSender: Send {
    fn name(&self) -> &str;

    /// Queue `frame` for transmission and return immediately.
    ///
    /// # Safety
    /// The memory behind `frame.data` and `frame.metadata` must stay valid
    /// and unmodified until the next call to `send_video_async`, `flush`, or
    /// until the sender is dropped.
    unsafe fn send_video_async(&mut self, frame: &VideoFrame);

    /// Block until the frame in flight, if any, has been consumed.
    fn flush(&mut self);

    fn is_valid(&self) -> bool {
        true
    }

    /// Program/preview state, when the transport reports one.
    fn tally(&self) -> Option<Tally> {
        None
    }
}

/// A connection to one remote source.
pub trait VideoReceiver: Send {
    /// Non-blocking: the next frame if one has arrived.
    ///
    /// The returned frame's memory belongs to the receiver until it is given
    /// back with [`free_video`](Self::free_video).
    fn capture_video(&mut self) -> Option<VideoFrame>;

    fn free_video(&mut self, frame: VideoFrame);

    fn is_connected(&self) -> bool {
        true
    }
}
