//! Where the send pipeline's source image comes from each tick.

use tracing::debug;
use vidlink_core::{CaptureMode, VidlinkResult};
use vidlink_render::{CommandList, ComputeDevice, DeviceImage};

/// Host identifier of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CameraId(pub u64);

/// An image ready for conversion this tick.
#[derive(Debug, Clone)]
pub struct Captured<I> {
    pub image: I,
    /// Pixel values are linear light.
    pub linear: bool,
    /// The image came from [`ComputeDevice::acquire_temporary`] and must be
    /// released once the conversion has been submitted.
    pub temporary: bool,
}

/// The host's presented output, as seen by screen capture.
pub trait ScreenGrabber<D: ComputeDevice> {
    /// Current display size in pixels.
    fn screen_size(&self) -> (u32, u32);

    /// Copy the current output into `target`, which has the display size.
    fn capture_into(&mut self, device: &D, target: &D::Image) -> VidlinkResult<()>;
}

/// Snapshots the presented output into a per-tick temporary.
pub struct ScreenCapture<D: ComputeDevice> {
    grabber: Option<Box<dyn ScreenGrabber<D>>>,
}

impl<D: ComputeDevice> ScreenCapture<D> {
    pub fn new() -> Self {
        Self { grabber: None }
    }

    pub fn set_grabber(&mut self, grabber: Option<Box<dyn ScreenGrabber<D>>>) {
        self.grabber = grabber;
    }

    pub fn capture(&mut self, device: &D) -> VidlinkResult<Option<Captured<D::Image>>> {
        let Some(grabber) = self.grabber.as_mut() else {
            return Ok(None);
        };
        let (width, height) = grabber.screen_size();
        if width == 0 || height == 0 {
            return Ok(None);
        }
        let image = device.acquire_temporary(width, height)?;
        if let Err(e) = grabber.capture_into(device, &image) {
            device.release_temporary(image);
            return Err(e);
        }
        Ok(Some(Captured {
            image,
            linear: false,
            temporary: true,
        }))
    }
}

/// Render hook on one camera. The host forwards every camera's render
/// callback; only the attached camera's output is kept.
pub struct CameraCapture<D: ComputeDevice> {
    camera: Option<CameraId>,
    target: Option<D::Image>,
    fresh: bool,
}

impl<D: ComputeDevice> CameraCapture<D> {
    pub fn new() -> Self {
        Self {
            camera: None,
            target: None,
            fresh: false,
        }
    }

    pub fn camera(&self) -> Option<CameraId> {
        self.camera
    }

    /// Re-attach the hook. A pending image from the previous camera is dropped.
    pub fn attach(&mut self, camera: Option<CameraId>) {
        if self.camera != camera {
            debug!(?camera, "camera hook attached");
            self.camera = camera;
            self.fresh = false;
        }
    }

    /// Record a copy of `source` into the hook's target. Returns `false`
    /// when `camera` is not the attached one.
    pub fn on_render(
        &mut self,
        device: &D,
        cmd: &mut CommandList<D>,
        camera: CameraId,
        source: &D::Image,
    ) -> VidlinkResult<bool> {
        if self.camera != Some(camera) {
            return Ok(false);
        }
        let (width, height) = (source.width(), source.height());
        let target = match &self.target {
            Some(target) if target.width() == width && target.height() == height => target.clone(),
            _ => {
                let target = device.create_image(width, height)?;
                self.target = Some(target.clone());
                target
            }
        };
        cmd.blit(source.clone(), target);
        self.fresh = true;
        Ok(true)
    }

    pub fn capture(&mut self, linear: bool) -> Option<Captured<D::Image>> {
        if !std::mem::take(&mut self.fresh) {
            return None;
        }
        self.target.clone().map(|image| Captured {
            image,
            linear,
            temporary: false,
        })
    }
}

/// Passes a caller-supplied image through.
pub struct TextureCapture<D: ComputeDevice> {
    texture: Option<D::Image>,
}

impl<D: ComputeDevice> TextureCapture<D> {
    pub fn new() -> Self {
        Self { texture: None }
    }

    pub fn set_texture(&mut self, texture: Option<D::Image>) {
        self.texture = texture;
    }

    pub fn capture(&self, linear: bool) -> Option<Captured<D::Image>> {
        self.texture.clone().map(|image| Captured {
            image,
            linear,
            temporary: false,
        })
    }
}

/// All three capture variants; `mode` selects the active one.
pub struct CaptureSource<D: ComputeDevice> {
    pub mode: CaptureMode,
    pub linear: bool,
    pub screen: ScreenCapture<D>,
    pub camera: CameraCapture<D>,
    pub texture: TextureCapture<D>,
}

impl<D: ComputeDevice> CaptureSource<D> {
    pub fn new(mode: CaptureMode, linear: bool) -> Self {
        Self {
            mode,
            linear,
            screen: ScreenCapture::new(),
            camera: CameraCapture::new(),
            texture: TextureCapture::new(),
        }
    }

    /// The next source image, or `None` when nothing is available this tick.
    pub fn capture(&mut self, device: &D) -> VidlinkResult<Option<Captured<D::Image>>> {
        match self.mode {
            CaptureMode::Screen => self.screen.capture(device),
            CaptureMode::Camera => Ok(self.camera.capture(self.linear)),
            CaptureMode::Texture => Ok(self.texture.capture(self.linear)),
        }
    }

    /// Give back whatever `capture` lent out.
    pub fn release(&self, device: &D, captured: Captured<D::Image>) {
        if captured.temporary {
            device.release_temporary(captured.image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidlink_core::FrameBuffer;
    use vidlink_render::{SoftDevice, SoftImage};

    struct Solid(u32, u32);

    impl ScreenGrabber<SoftDevice> for Solid {
        fn screen_size(&self) -> (u32, u32) {
            (self.0, self.1)
        }

        fn capture_into(&mut self, device: &SoftDevice, target: &SoftImage) -> VidlinkResult<()> {
            device.write_image(target, &FrameBuffer::solid(self.0, self.1, [9, 9, 9, 255]))
        }
    }

    #[test]
    fn test_texture_unset_is_unavailable() {
        let device = SoftDevice::new();
        let mut source = CaptureSource::<SoftDevice>::new(CaptureMode::Texture, false);
        assert!(source.capture(&device).unwrap().is_none());

        source
            .texture
            .set_texture(Some(SoftImage::from_frame(FrameBuffer::new(16, 8))));
        let captured = source.capture(&device).unwrap().unwrap();
        assert!(!captured.temporary);
        assert_eq!(captured.image.width(), 16);
    }

    #[test]
    fn test_screen_uses_temporary() {
        let device = SoftDevice::new();
        let mut source = CaptureSource::new(CaptureMode::Screen, true);
        assert!(source.capture(&device).unwrap().is_none());

        source.screen.set_grabber(Some(Box::new(Solid(32, 16))));
        let captured = source.capture(&device).unwrap().unwrap();
        assert!(captured.temporary);
        assert!(!captured.linear);
        assert_eq!(captured.image.snapshot().get_pixel(0, 0), Some([9, 9, 9, 255]));
        source.release(&device, captured);

        let stats = device.stats();
        assert_eq!(stats.temporaries_acquired, 1);
        assert_eq!(stats.temporaries_released, 1);
    }

    #[test]
    fn test_camera_hook_ignores_other_cameras() {
        let device = SoftDevice::new();
        let mut source = CaptureSource::new(CaptureMode::Camera, true);
        source.camera.attach(Some(CameraId(1)));
        let frame = SoftImage::from_frame(FrameBuffer::solid(16, 8, [1, 2, 3, 4]));

        let mut cmd = CommandList::new();
        assert!(!source
            .camera
            .on_render(&device, &mut cmd, CameraId(2), &frame)
            .unwrap());
        assert!(cmd.is_empty());
        assert!(source.capture(&device).unwrap().is_none());

        assert!(source
            .camera
            .on_render(&device, &mut cmd, CameraId(1), &frame)
            .unwrap());
        device.submit(cmd).unwrap();
        let captured = source.capture(&device).unwrap().unwrap();
        assert!(captured.linear);
        assert_eq!(captured.image.snapshot().get_pixel(3, 3), Some([1, 2, 3, 4]));

        // One image per render.
        assert!(source.capture(&device).unwrap().is_none());
    }
}
