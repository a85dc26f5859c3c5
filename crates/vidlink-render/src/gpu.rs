use std::collections::HashMap;

use anyhow::Result;
use parking_lot::Mutex;
use wgpu::{
    Adapter, Buffer, BufferUsages, Device, Extent3d, Instance, Queue, Texture,
    TextureDescriptor, TextureFormat, TextureUsages,
};

/// Format of every image the converter reads or writes.
pub const IMAGE_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Usages of converter images: sampled by the encoder, written by the
/// decoder, copied by blits and host transfers.
pub const IMAGE_USAGE: TextureUsages = TextureUsages::TEXTURE_BINDING
    .union(TextureUsages::STORAGE_BINDING)
    .union(TextureUsages::COPY_SRC)
    .union(TextureUsages::COPY_DST);

/// Recycles scratch textures per size.
pub struct TexturePool {
    free_textures: Mutex<HashMap<(u32, u32), Vec<Texture>>>,
}

impl TexturePool {
    pub fn new() -> Self {
        Self {
            free_textures: Mutex::new(HashMap::new()),
        }
    }

    pub fn acquire(&self, device: &Device, width: u32, height: u32) -> Texture {
        if let Some(texture) = self
            .free_textures
            .lock()
            .get_mut(&(width, height))
            .and_then(|textures| textures.pop())
        {
            return texture;
        }

        create_image_texture(device, Some("vidlink_temporary"), width, height)
    }

    pub fn release(&self, texture: Texture) {
        let key = (texture.width(), texture.height());
        self.free_textures.lock().entry(key).or_default().push(texture);
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Recycles mappable readback buffers per byte size.
pub struct StagingPool {
    free_buffers: Mutex<HashMap<u64, Vec<Buffer>>>,
}

impl StagingPool {
    pub fn new() -> Self {
        Self {
            free_buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn acquire(&self, device: &Device, size: u64) -> Buffer {
        if let Some(buffer) = self
            .free_buffers
            .lock()
            .get_mut(&size)
            .and_then(|buffers| buffers.pop())
        {
            return buffer;
        }

        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vidlink_readback_staging"),
            size,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Return an unmapped staging buffer.
    pub fn release(&self, buffer: Buffer) {
        self.free_buffers
            .lock()
            .entry(buffer.size())
            .or_default()
            .push(buffer);
    }
}

impl Default for StagingPool {
    fn default() -> Self {
        Self::new()
    }
}

pub fn create_image_texture(device: &Device, label: Option<&str>, width: u32, height: u32) -> Texture {
    device.create_texture(&TextureDescriptor {
        label,
        size: Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: IMAGE_FORMAT,
        usage: IMAGE_USAGE,
        view_formats: &[],
    })
}

/// A headless wgpu device plus the pools built on it.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
    pub texture_pool: TexturePool,
    pub staging_pool: StagingPool,
}

impl GpuContext {
    /// Initializes wgpu on the best available backend (Metal, Vulkan, DX12, etc.)
    pub fn init() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| anyhow::anyhow!("Failed to find suitable wgpu adapter"))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Vidlink Headless GPU Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))?;

        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "wgpu device ready");

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            texture_pool: TexturePool::new(),
            staging_pool: StagingPool::new(),
        })
    }
}
