/// An 8-bit RGBA image in host memory (4 bytes per pixel, rows top to bottom).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    /// Raw pixel data.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer filled with zeros (transparent black).
    pub fn new(width: u32, height: u32) -> Self {
        let size = (width as usize) * (height as usize) * 4;
        Self {
            data: vec![0u8; size],
            width,
            height,
        }
    }

    /// Create a frame buffer filled with a solid RGBA color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixel_count = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixel_count * 4);
        for _ in 0..pixel_count {
            data.extend_from_slice(&rgba);
        }
        Self {
            data,
            width,
            height,
        }
    }

    /// Total number of pixels.
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Total byte size of the pixel data.
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    /// Get the RGBA value at a pixel coordinate. Returns None if out of bounds.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    /// Set the RGBA value at a pixel coordinate. No-op if out of bounds.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        self.data[offset..offset + 4].copy_from_slice(&rgba);
    }

    /// Resample all of `src` onto `self` with bilinear filtering, sampling at
    /// pixel centres with edges clamped. Equal sizes copy the pixels as-is.
    pub fn blit_scaled(&mut self, src: &FrameBuffer) {
        if self.data.is_empty() || src.data.is_empty() {
            return;
        }
        if self.width == src.width && self.height == src.height {
            self.data.copy_from_slice(&src.data);
            return;
        }
        let sx_scale = src.width as f32 / self.width as f32;
        let sy_scale = src.height as f32 / self.height as f32;
        let max_x = (src.width - 1) as f32;
        let max_y = (src.height - 1) as f32;
        let stride = src.width as usize * 4;
        let texel = |x: usize, y: usize, c: usize| src.data[y * stride + x * 4 + c] as f32;

        for y in 0..self.height {
            let fy = ((y as f32 + 0.5) * sy_scale - 0.5).clamp(0.0, max_y);
            let y0 = fy.floor() as usize;
            let y1 = (y0 + 1).min(src.height as usize - 1);
            let ty = fy - y0 as f32;
            for x in 0..self.width {
                let fx = ((x as f32 + 0.5) * sx_scale - 0.5).clamp(0.0, max_x);
                let x0 = fx.floor() as usize;
                let x1 = (x0 + 1).min(src.width as usize - 1);
                let tx = fx - x0 as f32;
                let offset = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
                for c in 0..4 {
                    let top = texel(x0, y0, c) * (1.0 - tx) + texel(x1, y0, c) * tx;
                    let bottom = texel(x0, y1, c) * (1.0 - tx) + texel(x1, y1, c) * tx;
                    let value = top * (1.0 - ty) + bottom * ty;
                    self.data[offset + c] = value.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }

    /// Mean absolute per-channel difference over RGB, or None when sizes differ.
    ///
    /// Used to judge lossy round trips, where bit-exact equality is not expected.
    pub fn mean_abs_error(&self, other: &FrameBuffer) -> Option<f64> {
        if self.width != other.width || self.height != other.height {
            return None;
        }
        if self.data.is_empty() {
            return Some(0.0);
        }
        let mut total = 0u64;
        for (a, b) in self.data.chunks_exact(4).zip(other.data.chunks_exact(4)) {
            for c in 0..3 {
                total += (a[c] as i32 - b[c] as i32).unsigned_abs() as u64;
            }
        }
        Some(total as f64 / (self.pixel_count() * 3) as f64)
    }
}
