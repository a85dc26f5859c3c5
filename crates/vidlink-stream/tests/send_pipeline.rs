use std::sync::Arc;

use parking_lot::Mutex;
use vidlink_core::{
    BufferIdentity, CaptureMode, FrameBuffer, RecvSettings, SenderConfig, SourceDescriptor,
    TransportConfig, VidlinkError, VidlinkResult, VideoFrame,
};
use vidlink_render::{CommandList, ComputeDevice, SoftDevice, SoftImage};
use vidlink_stream::{CameraId, ScreenGrabber, SendPipeline, SendState};
use vidlink_transport::{
    LoopbackTransport, Registry, SourceFinder, Transport, VideoReceiver, VideoSender,
};

fn setup() -> (Arc<SoftDevice>, LoopbackTransport, Arc<Registry>) {
    let transport = LoopbackTransport::new();
    let registry = Registry::init(Arc::new(transport.clone()), &TransportConfig::default());
    (Arc::new(SoftDevice::new()), transport, registry)
}

fn texture_config(name: &str) -> SenderConfig {
    SenderConfig {
        name: name.to_string(),
        capture: CaptureMode::Texture,
        ..SenderConfig::default()
    }
}

fn card(width: u32, height: u32) -> SoftImage {
    let mut frame = FrameBuffer::new(width, height);
    for y in 0..height {
        for x in 0..width {
            frame.set_pixel(x, y, [(x * 3) as u8, (y * 3) as u8, 200, 255]);
        }
    }
    SoftImage::from_frame(frame)
}

#[test]
fn test_fixed_texture_second_send_frees_first_entry() {
    let (device, transport, registry) = setup();
    let mut pipeline = SendPipeline::new(device, registry, &texture_config("Studio"));
    pipeline.set_source_texture(Some(card(64, 64)));

    pipeline.tick();
    assert_eq!(pipeline.frames_sent(), 1);
    let first = pipeline.pool().marked().expect("first frame marked");
    assert_eq!(pipeline.pool().entry(first).unwrap().image().len(), 2048 * 4);
    assert_eq!(pipeline.pool().stats().frees, 0);

    pipeline.tick();
    assert_eq!(pipeline.frames_sent(), 2);
    let second = pipeline.pool().marked().expect("second frame marked");
    assert_ne!(first, second);
    assert!(!pipeline.pool().is_hot(first));
    assert_eq!(pipeline.pool().hot_count(), 1);
    assert_eq!(pipeline.pool().stats().frees, 1);

    // The first frame went out on the wire when the second send was issued.
    assert_eq!(transport.frames_sent("Studio"), 1);
    assert_eq!(pipeline.state(), SendState::DeviceReady);
}

#[test]
fn test_rename_disposes_old_sender_once() {
    let (device, transport, registry) = setup();
    let mut pipeline = SendPipeline::new(device, registry, &texture_config("Before"));
    pipeline.set_source_texture(Some(card(32, 16)));
    pipeline.tick();
    pipeline.tick();

    pipeline.set_name("After");
    assert_eq!(pipeline.state(), SendState::Idle);
    assert_eq!(transport.stats().senders_destroyed, 1);
    assert_eq!(transport.frames_sent("Before"), 2);

    pipeline.tick();
    pipeline.tick();
    assert_eq!(pipeline.sender_name().as_deref(), Some("After"));
    assert_eq!(transport.stats().senders_created, 2);
    assert_eq!(transport.stats().senders_destroyed, 1);

    pipeline.set_name("After");
    assert_eq!(transport.stats().senders_destroyed, 1);

    drop(pipeline);
    assert_eq!(transport.stats().senders_destroyed, 2);
}

#[test]
fn test_dimension_change_reallocates_once() {
    let (device, _transport, registry) = setup();
    let mut pipeline = SendPipeline::new(device, registry, &texture_config("Sizes"));
    pipeline.set_source_texture(Some(card(64, 64)));
    pipeline.tick();
    pipeline.tick();
    assert_eq!(pipeline.converter_stats().encode_buffer_allocations, 1);

    pipeline.set_source_texture(Some(card(128, 64)));
    pipeline.tick();
    pipeline.tick();
    pipeline.tick();
    assert_eq!(pipeline.converter_stats().encode_buffer_allocations, 2);
    assert_eq!(pipeline.frames_sent(), 5);
}

#[test]
fn test_unaligned_texture_is_skipped() {
    let (device, transport, registry) = setup();
    let mut pipeline = SendPipeline::new(device.clone(), registry, &texture_config("Odd"));
    pipeline.set_source_texture(Some(card(60, 64)));
    pipeline.tick();
    pipeline.tick();

    assert_eq!(pipeline.frames_sent(), 0);
    assert_eq!(pipeline.pool().stats().allocations, 0);
    assert_eq!(pipeline.converter_stats().total(), 0);
    assert_eq!(device.stats().dispatches, 0);
    assert_eq!(pipeline.state(), SendState::DeviceReady);
    // The sender itself still exists.
    assert_eq!(transport.stats().senders_created, 1);
}

#[test]
fn test_unset_texture_skips_tick() {
    let (device, _transport, registry) = setup();
    let mut pipeline = SendPipeline::new(device.clone(), registry, &texture_config("Empty"));
    pipeline.tick();
    assert_eq!(pipeline.frames_sent(), 0);
    assert_eq!(device.stats().readbacks_submitted, 0);
}

#[test]
fn test_readback_failure_drops_frame() {
    let (device, _transport, registry) = setup();
    let mut pipeline = SendPipeline::new(device.clone(), registry, &texture_config("Flaky"));
    pipeline.set_source_texture(Some(card(32, 16)));

    device.fail_next_readback();
    pipeline.tick();
    assert_eq!(pipeline.frames_sent(), 0);
    assert_eq!(pipeline.pool().hot_count(), 0);
    assert_eq!(pipeline.pool().stats().frees, 1);

    pipeline.tick();
    assert_eq!(pipeline.frames_sent(), 1);
}

#[test]
fn test_teardown_waits_for_readbacks_and_frees_everything() {
    let (device, transport, registry) = setup();
    device.set_readback_latency(5);
    let mut pipeline = SendPipeline::new(device.clone(), registry, &texture_config("Slow"));
    pipeline.set_source_texture(Some(card(32, 16)));

    for _ in 0..3 {
        pipeline.tick();
    }
    assert_eq!(pipeline.state(), SendState::ReadbackPending);
    assert_eq!(pipeline.pool().hot_count(), 3);
    assert_eq!(device.pending_readbacks(), 3);

    pipeline.disable();
    assert_eq!(pipeline.state(), SendState::Idle);
    assert_eq!(device.pending_readbacks(), 0);
    assert_eq!(pipeline.pool().hot_count(), 0);
    // Late completions only cleaned the pool.
    assert_eq!(pipeline.frames_sent(), 0);
    assert_eq!(transport.stats().senders_destroyed, 1);

    pipeline.tick();
    assert_eq!(pipeline.state(), SendState::Idle);
}

#[test]
fn test_empty_name_degrades_to_no_connection() {
    let (device, transport, registry) = setup();
    let mut pipeline = SendPipeline::new(device, registry, &texture_config(""));
    pipeline.set_source_texture(Some(card(32, 16)));
    pipeline.tick();

    assert_eq!(pipeline.sender_name(), None);
    assert_eq!(pipeline.frames_sent(), 0);
    assert_eq!(pipeline.pool().hot_count(), 0);
    assert!(!pipeline.tally().on_program);
    assert_eq!(transport.stats().senders_created, 0);
}

#[test]
fn test_tally_follows_receivers() {
    let (device, transport, registry) = setup();
    let mut pipeline = SendPipeline::new(device, registry, &texture_config("Tally"));
    pipeline.set_source_texture(Some(card(32, 16)));
    pipeline.tick();
    assert!(!pipeline.tally().on_program);

    let _receiver = transport
        .create_receiver(&RecvSettings::fastest(SourceDescriptor::new("Tally")))
        .unwrap();
    assert!(pipeline.tally().on_program);
}

struct Bars;

impl ScreenGrabber<SoftDevice> for Bars {
    fn screen_size(&self) -> (u32, u32) {
        (64, 32)
    }

    fn capture_into(&mut self, device: &SoftDevice, target: &SoftImage) -> VidlinkResult<()> {
        device.write_image(target, &FrameBuffer::solid(64, 32, [0, 128, 255, 255]))
    }
}

#[test]
fn test_screen_pipelines_share_one_sender() {
    let (device, transport, registry) = setup();
    let config = SenderConfig::default();
    assert_eq!(config.capture, CaptureMode::Screen);

    let mut a = SendPipeline::new(device.clone(), registry.clone(), &config);
    let mut b = SendPipeline::new(device.clone(), registry.clone(), &config);
    a.set_screen_grabber(Some(Box::new(Bars)));
    b.set_screen_grabber(Some(Box::new(Bars)));
    a.tick();
    b.tick();

    assert_eq!(a.sender_name().as_deref(), Some("Screen"));
    assert_eq!(transport.stats().senders_created, 1);
    assert_eq!(device.stats().temporaries_acquired, 2);
    assert_eq!(device.stats().temporaries_released, 2);

    a.disable();
    b.disable();
    assert_eq!(transport.stats().senders_destroyed, 0);
    assert_eq!(transport.frames_sent("Screen"), 2);

    registry.shutdown();
    assert_eq!(transport.stats().senders_destroyed, 1);
}

#[test]
fn test_camera_change_only_reattaches_hook() {
    let (device, transport, registry) = setup();
    let config = SenderConfig {
        name: "Cam".into(),
        capture: CaptureMode::Camera,
        linear_color: true,
        ..SenderConfig::default()
    };
    let mut pipeline = SendPipeline::new(device.clone(), registry, &config);
    pipeline.set_source_camera(Some(CameraId(1)));
    let rendered = card(32, 16);

    let render = |pipeline: &mut SendPipeline<SoftDevice>, camera: u64| {
        let mut cmd = CommandList::new();
        let recorded = pipeline
            .on_camera_render(&mut cmd, CameraId(camera), &rendered)
            .unwrap();
        device.submit(cmd).unwrap();
        recorded
    };

    assert!(render(&mut pipeline, 1));
    pipeline.tick();
    assert_eq!(pipeline.frames_sent(), 1);

    pipeline.set_source_camera(Some(CameraId(2)));
    assert!(!render(&mut pipeline, 1));
    pipeline.tick();
    assert_eq!(pipeline.frames_sent(), 1);

    assert!(render(&mut pipeline, 2));
    pipeline.tick();
    assert_eq!(pipeline.frames_sent(), 2);
    assert_eq!(transport.stats().senders_created, 1);
    assert_eq!(transport.stats().senders_destroyed, 0);
}

#[test]
fn test_capture_mode_change_restarts() {
    let (device, transport, registry) = setup();
    let mut pipeline = SendPipeline::new(device, registry, &texture_config("Modes"));
    pipeline.set_source_texture(Some(card(32, 16)));
    pipeline.set_screen_grabber(Some(Box::new(Bars)));
    pipeline.tick();
    assert_eq!(pipeline.sender_name().as_deref(), Some("Modes"));

    pipeline.set_capture_mode(CaptureMode::Screen);
    assert_eq!(transport.stats().senders_destroyed, 1);
    pipeline.tick();
    assert_eq!(pipeline.sender_name().as_deref(), Some("Screen"));
    assert_eq!(pipeline.capture_mode(), CaptureMode::Screen);
}

/// Records what each send handed over, so the test can check the pool
/// keeps it alive and untouched while the transport may still read it.
#[derive(Default, Clone)]
struct SendLog {
    sends: Arc<Mutex<Vec<(usize, u64)>>>,
}

struct ProbeSender {
    log: SendLog,
}

fn checksum(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc.wrapping_mul(31).wrapping_add(*b as u64 ^ i as u64))
}

impl VideoSender for ProbeSender {
    fn name(&self) -> &str {
        "Probe"
    }

    unsafe fn send_video_async(&mut self, frame: &VideoFrame) {
        let sum = checksum(frame.payload());
        self.log.sends.lock().push((frame.data as usize, sum));
    }

    fn flush(&mut self) {}
}

struct NoSources;

impl SourceFinder for NoSources {
    fn current_sources(&self) -> Vec<SourceDescriptor> {
        Vec::new()
    }
}

struct ProbeTransport {
    log: SendLog,
}

impl Transport for ProbeTransport {
    fn create_finder(&self) -> VidlinkResult<Box<dyn SourceFinder>> {
        Ok(Box::new(NoSources))
    }

    fn create_sender(&self, _name: &str) -> VidlinkResult<Box<dyn VideoSender>> {
        Ok(Box::new(ProbeSender {
            log: self.log.clone(),
        }))
    }

    fn create_receiver(&self, _settings: &RecvSettings) -> VidlinkResult<Box<dyn VideoReceiver>> {
        Err(VidlinkError::transport("probe transport cannot receive"))
    }
}

#[test]
fn test_sent_frame_stays_alive_until_next_send() {
    let log = SendLog::default();
    let registry = Registry::init(
        Arc::new(ProbeTransport { log: log.clone() }),
        &TransportConfig::default(),
    );
    let device = Arc::new(SoftDevice::new());
    device.set_readback_latency(2);
    let mut pipeline = SendPipeline::new(device, registry, &texture_config("Probe"));

    for tick in 0..12u32 {
        // A different image every tick so stale bytes would show.
        let mut frame = FrameBuffer::new(32, 16);
        for x in 0..32 {
            frame.set_pixel(x, tick % 16, [255, (tick * 20) as u8, x as u8, 255]);
        }
        pipeline.set_source_texture(Some(SoftImage::from_frame(frame)));
        pipeline.tick();

        // In flight: up to three readbacks, plus the marked entry.
        assert!(pipeline.pool().hot_count() <= 4);

        let sends = log.sends.lock().clone();
        if let Some(&(address, sum)) = sends.last() {
            let id = pipeline
                .pool()
                .find_by_identity(BufferIdentity(address))
                .expect("last sent frame is still in the pool");
            assert_eq!(pipeline.pool().marked(), Some(id));
            let entry = pipeline.pool().entry(id).unwrap();
            assert_eq!(checksum(entry.image()), sum);
        }
    }

    // Readbacks lag two ticks behind captures.
    assert_eq!(pipeline.frames_sent(), 10);
    pipeline.disable();
    assert_eq!(pipeline.pool().hot_count(), 0);
}

#[test]
fn test_frame_rate_comes_from_config() {
    let (device, transport, registry) = setup();
    let config = SenderConfig {
        frame_rate_n: 30_000,
        frame_rate_d: 1_001,
        ..texture_config("Paced")
    };
    let mut pipeline = SendPipeline::new(device, registry, &config);
    pipeline.set_source_texture(Some(card(32, 16)));
    pipeline.tick();

    let mut receiver = transport
        .create_receiver(&RecvSettings::fastest(SourceDescriptor::new("Paced")))
        .unwrap();
    pipeline.tick();
    let frame = receiver.capture_video().unwrap();
    assert_eq!((frame.frame_rate_n, frame.frame_rate_d), (30_000, 1_001));
    receiver.free_video(frame);

    pipeline.set_frame_rate(0, 0);
    pipeline.tick();
    let frame = receiver.capture_video().unwrap();
    // Sent before the change.
    assert_eq!(frame.frame_rate_n, 30_000);
    receiver.free_video(frame);
    pipeline.tick();
    let frame = receiver.capture_video().unwrap();
    assert_eq!((frame.frame_rate_n, frame.frame_rate_d), (0, 0));
    receiver.free_video(frame);
}
