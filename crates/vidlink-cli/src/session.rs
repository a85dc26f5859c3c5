//! A send and a receive pipeline joined by the loopback transport.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use vidlink_core::{CaptureMode, FrameBuffer, ReceiverConfig, VidlinkConfig};
use vidlink_render::{CommandList, ComputeDevice};
use vidlink_stream::{CameraId, MaterialBinding, PropertyBlock, ReceivePipeline, SendPipeline};
use vidlink_transport::{LoopbackTransport, Registry};

use crate::pattern::{test_card, PatternScreen};

const DEMO_CAMERA: CameraId = CameraId(0);

pub struct SessionOptions {
    pub frames: u32,
    pub width: u32,
    pub height: u32,
    pub dump: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub backend: String,
    pub capture: CaptureMode,
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub frames_sent: usize,
    pub frames_received: usize,
    /// Mean absolute RGB error of the last received frame against the
    /// closest transmitted test card.
    pub mean_abs_error: Option<f64>,
    pub encode_buffer_allocations: usize,
    pub decode_image_allocations: usize,
}

pub fn run<D: ComputeDevice>(
    device: Arc<D>,
    config: &VidlinkConfig,
    options: &SessionOptions,
) -> Result<SessionSummary> {
    let (width, height) = (options.width, options.height);
    let transport = LoopbackTransport::new();
    let registry = Registry::init(Arc::new(transport.clone()), &config.transport);

    let mut sender = SendPipeline::new(device.clone(), registry.clone(), &config.sender);
    let mut texture = None;
    match config.sender.capture {
        CaptureMode::Screen => {
            sender.set_screen_grabber(Some(Box::new(PatternScreen::new(width, height))));
        }
        CaptureMode::Camera => sender.set_source_camera(Some(DEMO_CAMERA)),
        CaptureMode::Texture => {
            let image = device.create_image(width, height)?;
            sender.set_source_texture(Some(image.clone()));
            texture = Some(image);
        }
    }
    let rendered = match config.sender.capture {
        CaptureMode::Camera => Some(device.create_image(width, height)?),
        _ => None,
    };

    let source = if !config.receiver.source_name.is_empty() {
        config.receiver.source_name.clone()
    } else if config.sender.capture == CaptureMode::Screen {
        config.transport.screen_sender_name.clone()
    } else {
        config.sender.name.clone()
    };
    let mut receiver = ReceivePipeline::new(
        device.clone(),
        registry.clone(),
        &ReceiverConfig {
            source_name: source.clone(),
            ..config.receiver.clone()
        },
    );
    let block = PropertyBlock::new();
    if let Some(property) = &config.receiver.material_property {
        receiver.set_material(Some(MaterialBinding::new(block.clone(), property.clone())));
    }

    for frame in 0..options.frames {
        let card = test_card(width, height, frame);
        if let Some(image) = &texture {
            device.write_image(image, &card)?;
        }
        if let Some(image) = &rendered {
            device.write_image(image, &card)?;
            let mut cmd = CommandList::new();
            sender.on_camera_render(&mut cmd, DEMO_CAMERA, image)?;
            device.submit(cmd)?;
        }
        sender.tick();
        receiver.tick();
    }

    let last = match receiver.texture() {
        Some(image) => Some(device.read_image(image)?),
        None => None,
    };
    let mean_abs_error = last.as_ref().and_then(|decoded| {
        (0..options.frames)
            .filter_map(|f| test_card(width, height, f).mean_abs_error(decoded))
            .min_by(|a, b| a.total_cmp(b))
    });

    if let (Some(path), Some(decoded)) = (&options.dump, &last) {
        dump_png(path, decoded)?;
        tracing::info!(path = %path.display(), "last received frame written");
    }
    if let Some(property) = &config.receiver.material_property {
        tracing::info!(
            property = %property,
            bound = block.texture(property).is_some(),
            "material binding"
        );
    }

    let summary = SessionSummary {
        backend: device.name().to_string(),
        capture: config.sender.capture,
        source,
        width,
        height,
        frames_sent: sender.frames_sent(),
        frames_received: receiver.frames_received(),
        mean_abs_error,
        encode_buffer_allocations: sender.converter_stats().encode_buffer_allocations,
        decode_image_allocations: receiver.converter_stats().decode_image_allocations,
    };

    sender.disable();
    drop(receiver);
    registry.shutdown();
    Ok(summary)
}

fn dump_png(path: &Path, frame: &FrameBuffer) -> Result<()> {
    let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.data.clone())
        .context("decoded frame has an unexpected size")?;
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

