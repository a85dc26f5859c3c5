//! RGBA image <-> packed UYVY/UYVA conversion on a [`ComputeDevice`].

use tracing::debug;
use vidlink_core::{FrameGeometry, VidlinkError, VidlinkResult};

use crate::device::{
    CommandList, ComputeDevice, DeviceBuffer, DeviceImage, DispatchParams, Kernel, Pass,
};

/// Allocation counters for the converter's cached resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConverterStats {
    pub encode_buffer_allocations: usize,
    pub decode_buffer_allocations: usize,
    pub decode_image_allocations: usize,
}

impl ConverterStats {
    pub fn total(&self) -> usize {
        self.encode_buffer_allocations + self.decode_buffer_allocations + self.decode_image_allocations
    }
}

/// Converts between RGBA images and packed frames.
///
/// Holds at most one encode output buffer, one decode input buffer and one
/// decode output image. Each is reallocated whole when the required size
/// changes and reused otherwise.
pub struct FormatConverter<D: ComputeDevice> {
    encoder_output: Option<D::Buffer>,
    decoder_input: Option<D::Buffer>,
    decoder_output: Option<D::Image>,
    stats: ConverterStats,
}

impl<D: ComputeDevice> FormatConverter<D> {
    pub fn new() -> Self {
        Self {
            encoder_output: None,
            decoder_input: None,
            decoder_output: None,
            stats: ConverterStats::default(),
        }
    }

    pub fn stats(&self) -> ConverterStats {
        self.stats
    }

    /// Encode `source` and submit immediately. Returns the converter-owned
    /// packed buffer, valid until the next encode.
    pub fn encode(
        &mut self,
        device: &D,
        source: &D::Image,
        alpha: bool,
        linear: bool,
    ) -> VidlinkResult<D::Buffer> {
        let mut cmd = CommandList::new();
        let buffer = self.encode_deferred(device, &mut cmd, source, alpha, linear)?;
        device.submit(cmd)?;
        Ok(buffer)
    }

    /// Record the encode into `cmd` for later submission.
    pub fn encode_deferred(
        &mut self,
        device: &D,
        cmd: &mut CommandList<D>,
        source: &D::Image,
        alpha: bool,
        linear: bool,
    ) -> VidlinkResult<D::Buffer> {
        let geometry = FrameGeometry::new(source.width(), source.height(), alpha)?;
        let count = geometry.element_count();

        let buffer = match &self.encoder_output {
            Some(buffer) if buffer.element_count() == count => buffer.clone(),
            _ => {
                debug!(count, "allocating encoder output");
                let buffer = device.create_buffer(count)?;
                self.stats.encode_buffer_allocations += 1;
                self.encoder_output = Some(buffer.clone());
                buffer
            }
        };

        let pass = Pass::from_alpha(alpha);
        cmd.set_texture(Kernel::Encoder, pass, source.clone());
        cmd.set_buffer(Kernel::Encoder, pass, buffer.clone());
        cmd.dispatch(
            Kernel::Encoder,
            pass,
            geometry.dispatch_groups(),
            DispatchParams {
                width: geometry.width,
                height: geometry.height,
                linear,
            },
        );
        Ok(buffer)
    }

    /// Decode a packed frame. Returns the converter-owned output image,
    /// overwritten by the next decode.
    pub fn decode(
        &mut self,
        device: &D,
        width: u32,
        height: u32,
        alpha: bool,
        data: &[u8],
    ) -> VidlinkResult<D::Image> {
        let geometry = FrameGeometry::new(width, height, alpha)?;
        let count = geometry.element_count();
        if data.len() < count * 4 {
            return Err(VidlinkError::InvalidArgument(format!(
                "packed {}x{} frame needs {} bytes, got {}",
                width,
                height,
                count * 4,
                data.len()
            )));
        }

        let input = match &self.decoder_input {
            Some(buffer) if buffer.element_count() == count => buffer.clone(),
            _ => {
                debug!(count, "allocating decoder input");
                let buffer = device.create_buffer(count)?;
                self.stats.decode_buffer_allocations += 1;
                self.decoder_input = Some(buffer.clone());
                buffer
            }
        };
        device.upload(&input, &data[..count * 4])?;

        let output = match &self.decoder_output {
            Some(image) if image.width() == width && image.height() == height => image.clone(),
            _ => {
                debug!(width, height, "allocating decoder output");
                let image = device.create_image(width, height)?;
                self.stats.decode_image_allocations += 1;
                self.decoder_output = Some(image.clone());
                image
            }
        };

        let pass = Pass::from_alpha(alpha);
        let mut cmd = CommandList::new();
        cmd.set_buffer(Kernel::Decoder, pass, input);
        cmd.set_texture(Kernel::Decoder, pass, output.clone());
        cmd.dispatch(
            Kernel::Decoder,
            pass,
            geometry.dispatch_groups(),
            DispatchParams {
                width,
                height,
                linear: false,
            },
        );
        device.submit(cmd)?;
        Ok(output)
    }

    /// Release every cached resource. Safe to call more than once.
    pub fn dispose(&mut self) {
        self.encoder_output = None;
        self.decoder_input = None;
        self.decoder_output = None;
    }

    pub fn is_empty(&self) -> bool {
        self.encoder_output.is_none() && self.decoder_input.is_none() && self.decoder_output.is_none()
    }
}

impl<D: ComputeDevice> Default for FormatConverter<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::{SoftDevice, SoftImage};
    use vidlink_core::FrameBuffer;

    fn gradient(width: u32, height: u32, alpha: bool) -> FrameBuffer {
        let mut frame = FrameBuffer::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let a = if alpha { ((x + y) * 3 % 256) as u8 } else { 255 };
                frame.set_pixel(
                    x,
                    y,
                    [(x * 255 / width) as u8, (y * 255 / height) as u8, 96, a],
                );
            }
        }
        frame
    }

    fn packed_bytes(buffer: &crate::soft::SoftBuffer) -> Vec<u8> {
        bytemuck::cast_slice(&buffer.snapshot()).to_vec()
    }

    #[test]
    fn test_decode_reallocates_once_per_change() {
        let device = SoftDevice::new();
        let mut converter = FormatConverter::new();
        let data = vec![0x80u8; 64 * 32 * 3];

        for _ in 0..3 {
            converter.decode(&device, 32, 16, false, &data).unwrap();
        }
        assert_eq!(converter.stats().decode_buffer_allocations, 1);
        assert_eq!(converter.stats().decode_image_allocations, 1);

        for _ in 0..3 {
            converter.decode(&device, 64, 32, false, &data).unwrap();
        }
        assert_eq!(converter.stats().decode_buffer_allocations, 2);
        assert_eq!(converter.stats().decode_image_allocations, 2);

        // Alpha changes the packed size but not the image size.
        for _ in 0..3 {
            converter.decode(&device, 64, 32, true, &data).unwrap();
        }
        assert_eq!(converter.stats().decode_buffer_allocations, 3);
        assert_eq!(converter.stats().decode_image_allocations, 2);
        assert_eq!(converter.stats().encode_buffer_allocations, 0);
    }

    #[test]
    fn test_round_trip_opaque() {
        let device = SoftDevice::new();
        let mut converter = FormatConverter::new();
        let frame = gradient(64, 32, false);
        let source = SoftImage::from_frame(frame.clone());

        let packed = converter.encode(&device, &source, false, false).unwrap();
        assert_eq!(packed.element_count(), 64 * 32 / 2);
        let decoded = converter
            .decode(&device, 64, 32, false, &packed_bytes(&packed))
            .unwrap();
        let error = frame.mean_abs_error(&decoded.snapshot()).unwrap();
        assert!(error < 4.0, "mean error {}", error);
    }

    #[test]
    fn test_round_trip_preserves_alpha() {
        let device = SoftDevice::new();
        let mut converter = FormatConverter::new();
        let frame = gradient(32, 16, true);
        let source = SoftImage::from_frame(frame.clone());

        let packed = converter.encode(&device, &source, true, false).unwrap();
        let decoded = converter
            .decode(&device, 32, 16, true, &packed_bytes(&packed))
            .unwrap()
            .snapshot();
        for y in 0..16 {
            for x in 0..32 {
                assert_eq!(decoded.get_pixel(x, y).map(|p| p[3]), frame.get_pixel(x, y).map(|p| p[3]));
            }
        }
    }

    #[test]
    fn test_rejects_unaligned_dimensions() {
        let device = SoftDevice::new();
        let mut converter = FormatConverter::new();
        let source = SoftImage::from_frame(FrameBuffer::new(60, 32));
        let err = converter.encode(&device, &source, false, false).unwrap_err();
        assert!(matches!(err, VidlinkError::Dimensions { .. }));
        assert_eq!(converter.stats().total(), 0);
        assert_eq!(device.stats().dispatches, 0);
    }

    #[test]
    fn test_decode_rejects_short_data() {
        let device = SoftDevice::new();
        let mut converter = FormatConverter::new();
        let err = converter.decode(&device, 16, 8, false, &[0u8; 100]).unwrap_err();
        assert!(matches!(err, VidlinkError::InvalidArgument(_)));
    }

    #[test]
    fn test_reallocates_only_on_size_change() {
        let device = SoftDevice::new();
        let mut converter = FormatConverter::new();
        let small = SoftImage::from_frame(FrameBuffer::new(32, 16));
        let large = SoftImage::from_frame(FrameBuffer::new(64, 32));

        let a = converter.encode(&device, &small, false, false).unwrap();
        let b = converter.encode(&device, &small, false, false).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(converter.stats().encode_buffer_allocations, 1);

        converter.encode(&device, &large, false, false).unwrap();
        assert_eq!(converter.stats().encode_buffer_allocations, 2);
        converter.encode(&device, &large, false, false).unwrap();
        assert_eq!(converter.stats().encode_buffer_allocations, 2);

        // Same pixel count, different alpha setting: new element count.
        converter.encode(&device, &large, true, false).unwrap();
        assert_eq!(converter.stats().encode_buffer_allocations, 3);
    }

    #[test]
    fn test_deferred_encode_records_commands() {
        let device = SoftDevice::new();
        let mut converter = FormatConverter::new();
        let source = SoftImage::from_frame(FrameBuffer::new(32, 16));
        let mut cmd = CommandList::new();
        converter
            .encode_deferred(&device, &mut cmd, &source, false, true)
            .unwrap();
        assert_eq!(cmd.len(), 3);
        match &cmd.commands()[2] {
            crate::device::Command::Dispatch {
                kernel,
                pass,
                groups,
                params,
            } => {
                assert_eq!((*kernel, *pass), (Kernel::Encoder, Pass::Opaque));
                assert_eq!(*groups, [2, 2, 1]);
                assert!(params.linear);
            }
            _ => panic!("third command should be the dispatch"),
        }
        assert_eq!(device.stats().dispatches, 0);
        device.submit(cmd).unwrap();
        assert_eq!(device.stats().dispatches, 1);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let device = SoftDevice::new();
        let mut converter = FormatConverter::new();
        converter.decode(&device, 16, 8, false, &[0u8; 256]).unwrap();
        assert!(!converter.is_empty());
        converter.dispose();
        converter.dispose();
        assert!(converter.is_empty());
    }
}
