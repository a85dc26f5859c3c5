//! Moving test card used as the demo source.

use vidlink_core::{FrameBuffer, VidlinkResult};
use vidlink_render::ComputeDevice;
use vidlink_stream::ScreenGrabber;

/// Colour bars with a bright bar sweeping across, one step per frame.
pub fn test_card(width: u32, height: u32, frame: u32) -> FrameBuffer {
    const BARS: [[u8; 3]; 8] = [
        [235, 235, 235],
        [235, 235, 16],
        [16, 235, 235],
        [16, 235, 16],
        [235, 16, 235],
        [235, 16, 16],
        [16, 16, 235],
        [16, 16, 16],
    ];
    let mut card = FrameBuffer::new(width, height);
    let sweep = (frame * 8) % width.max(1);
    for y in 0..height {
        for x in 0..width {
            let bar = BARS[(x * 8 / width.max(1)) as usize % 8];
            let alpha = if y < height / 4 { 128 } else { 255 };
            let rgba = if x.abs_diff(sweep) < 4 {
                [255, 255, 255, alpha]
            } else {
                [bar[0], bar[1], bar[2], alpha]
            };
            card.set_pixel(x, y, rgba);
        }
    }
    card
}

/// Presents the test card as the host's screen.
pub struct PatternScreen {
    width: u32,
    height: u32,
    frame: u32,
}

impl PatternScreen {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame: 0,
        }
    }
}

impl<D: ComputeDevice> ScreenGrabber<D> for PatternScreen {
    fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capture_into(&mut self, device: &D, target: &D::Image) -> VidlinkResult<()> {
        let card = test_card(self.width, self.height, self.frame);
        self.frame += 1;
        device.write_image(target, &card)
    }
}
