//! Pull packed frames from the transport and decode them into images.

use std::sync::Arc;

use tracing::{debug, info, warn};
use vidlink_core::{
    FourCC, RecvSettings, ReceiverConfig, VidlinkError, VidlinkResult, VideoFrame,
};
use vidlink_render::{CommandList, ComputeDevice, ConverterStats, FormatConverter};
use vidlink_transport::{Registry, VideoReceiver};

use crate::output::MaterialBinding;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    Disconnected,
    Searching,
    Connected,
}

pub struct ReceivePipeline<D: ComputeDevice> {
    device: Arc<D>,
    registry: Arc<Registry>,
    source_name: String,
    receiver: Option<Box<dyn VideoReceiver>>,
    converter: FormatConverter<D>,
    state: ReceiveState,
    target_texture: Option<D::Image>,
    material: Option<MaterialBinding<D::Image>>,
    texture: Option<D::Image>,
    frames_received: usize,
}

impl<D: ComputeDevice> ReceivePipeline<D> {
    pub fn new(device: Arc<D>, registry: Arc<Registry>, config: &ReceiverConfig) -> Self {
        Self {
            device,
            registry,
            source_name: config.source_name.clone(),
            receiver: None,
            converter: FormatConverter::new(),
            state: ReceiveState::Disconnected,
            target_texture: None,
            material: None,
            texture: None,
            frames_received: 0,
        }
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// The most recently decoded image. Kept across disconnects.
    pub fn texture(&self) -> Option<&D::Image> {
        self.texture.as_ref()
    }

    pub fn frames_received(&self) -> usize {
        self.frames_received
    }

    pub fn converter_stats(&self) -> ConverterStats {
        self.converter.stats()
    }

    /// Blit every decoded frame into `target`, scaled to its size.
    pub fn set_target_texture(&mut self, target: Option<D::Image>) {
        self.target_texture = target;
    }

    /// Override a material property with every decoded frame.
    pub fn set_material(&mut self, binding: Option<MaterialBinding<D::Image>>) {
        self.material = binding;
    }

    pub fn set_source_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name != self.source_name {
            self.source_name = name;
            self.request_reconnect();
        }
    }

    /// Drop the connection; the next tick searches again.
    pub fn request_reconnect(&mut self) {
        if self.receiver.take().is_some() {
            info!(source = %self.source_name, "receiver disconnected");
        }
        self.state = ReceiveState::Disconnected;
    }

    pub fn tick(&mut self) {
        match self.state {
            ReceiveState::Disconnected | ReceiveState::Searching => self.connect(),
            ReceiveState::Connected => self.receive(),
        }
    }

    fn connect(&mut self) {
        if self.source_name.is_empty() {
            return;
        }
        self.state = ReceiveState::Searching;

        let found = self.registry.finder().map(|finder| {
            finder
                .lock()
                .current_sources()
                .into_iter()
                .find(|s| s.name == self.source_name)
        });
        let source = match found {
            Ok(Some(source)) => source,
            Ok(None) => {
                self.state = ReceiveState::Disconnected;
                return;
            }
            Err(e) => {
                warn!(error = %e, "source lookup failed");
                self.state = ReceiveState::Disconnected;
                return;
            }
        };

        match self.registry.create_receiver(&RecvSettings::fastest(source)) {
            Ok(receiver) => {
                info!(source = %self.source_name, "receiver connected");
                self.receiver = Some(receiver);
                self.state = ReceiveState::Connected;
            }
            Err(e) => {
                warn!(source = %self.source_name, error = %e, "receiver creation failed");
                self.state = ReceiveState::Disconnected;
            }
        }
    }

    fn receive(&mut self) {
        let Some(receiver) = self.receiver.as_mut() else {
            self.state = ReceiveState::Disconnected;
            return;
        };
        if !receiver.is_connected() {
            self.request_reconnect();
            return;
        }
        let Some(frame) = receiver.capture_video() else {
            return;
        };

        let decoded = Self::decode(&self.device, &mut self.converter, &frame);
        receiver.free_video(frame);

        match decoded {
            Ok(image) => {
                self.frames_received += 1;
                if let Err(e) = self.publish(&image) {
                    warn!(error = %e, "publishing decoded frame failed");
                }
                self.texture = Some(image);
            }
            Err(e) => warn!(error = %e, "frame dropped"),
        }
    }

    fn decode(
        device: &D,
        converter: &mut FormatConverter<D>,
        frame: &VideoFrame,
    ) -> VidlinkResult<D::Image> {
        let format = FourCC::from_code(frame.fourcc)
            .pixel_format()
            .ok_or(VidlinkError::UnsupportedFormat(frame.fourcc))?;
        let (Ok(width), Ok(height)) = (u32::try_from(frame.width), u32::try_from(frame.height))
        else {
            return Err(VidlinkError::dimensions(0, 0, "negative frame size"));
        };
        if frame.line_stride != format.line_stride(width) as i32 {
            return Err(VidlinkError::InvalidArgument(format!(
                "line stride {} for a {} pixel wide packed frame",
                frame.line_stride, width
            )));
        }
        debug!(width, height, ?format, "decoding frame");
        // SAFETY: the receiver owns the frame memory until `free_video`,
        // which is called only after decoding has copied it.
        let data = unsafe { frame.payload() };
        converter.decode(device, width, height, format.has_alpha(), data)
    }

    fn publish(&self, image: &D::Image) -> VidlinkResult<()> {
        if let Some(target) = &self.target_texture {
            let mut cmd = CommandList::new();
            cmd.blit(image.clone(), target.clone());
            self.device.submit(cmd)?;
        }
        if let Some(material) = &self.material {
            material.apply(image);
        }
        Ok(())
    }
}
