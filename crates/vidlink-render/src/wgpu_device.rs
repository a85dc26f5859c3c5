//! [`ComputeDevice`] on top of wgpu compute pipelines.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use vidlink_core::{BufferIdentity, FrameBuffer, VidlinkError, VidlinkResult};
use wgpu::util::DeviceExt;

use crate::device::{
    Command, CommandList, CompletionSender, ComputeDevice, DeviceBuffer, DeviceImage,
    DispatchParams, Kernel, Pass, ReadbackCompletion, ReadbackTicket,
};
use crate::gpu::{create_image_texture, GpuContext};
use crate::kernels::{KernelBundle, BLIT_ENTRY_POINT};

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct KernelParams {
    width: u32,
    height: u32,
    linear: u32,
    _pad: u32,
}

impl From<DispatchParams> for KernelParams {
    fn from(p: DispatchParams) -> Self {
        Self {
            width: p.width,
            height: p.height,
            linear: p.linear as u32,
            _pad: 0,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct BlitParams {
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
}

/// Workgroup edge of the blit program, in pixels.
const BLIT_GROUP: u32 = 8;

#[derive(Debug, Clone)]
pub struct WgpuImage {
    texture: Arc<wgpu::Texture>,
}

impl WgpuImage {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }
}

impl DeviceImage for WgpuImage {
    fn width(&self) -> u32 {
        self.texture.width()
    }

    fn height(&self) -> u32 {
        self.texture.height()
    }
}

#[derive(Debug, Clone)]
pub struct WgpuBuffer {
    buffer: Arc<wgpu::Buffer>,
    element_count: usize,
}

impl DeviceBuffer for WgpuBuffer {
    fn element_count(&self) -> usize {
        self.element_count
    }
}

struct KernelPipelines {
    layout: wgpu::BindGroupLayout,
    opaque: wgpu::ComputePipeline,
    alpha: wgpu::ComputePipeline,
}

impl KernelPipelines {
    fn pipeline(&self, pass: Pass) -> &wgpu::ComputePipeline {
        match pass {
            Pass::Opaque => &self.opaque,
            Pass::Alpha => &self.alpha,
        }
    }
}

struct BlitPipeline {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

struct InFlight {
    staging: wgpu::Buffer,
    /// Set by the map callback once the staging buffer is readable.
    mapped: Arc<Mutex<Option<Result<(), String>>>>,
}

struct Bound {
    image: Option<WgpuImage>,
    buffer: Option<WgpuBuffer>,
}

/// The packing kernels running on a [`GpuContext`].
pub struct WgpuDevice {
    gpu: Arc<GpuContext>,
    encoder: KernelPipelines,
    decoder: KernelPipelines,
    blit: BlitPipeline,
    next_ticket: Mutex<u64>,
    in_flight: Mutex<HashMap<ReadbackTicket, InFlight>>,
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn sampled_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn storage_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: crate::gpu::IMAGE_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl WgpuDevice {
    pub fn new(gpu: Arc<GpuContext>) -> Self {
        Self::with_kernels(gpu, KernelBundle::builtin())
    }

    /// Initialize a headless context and build the kernels on it.
    pub fn init() -> VidlinkResult<Self> {
        let gpu = GpuContext::init().map_err(|e| VidlinkError::Gpu(e.to_string()))?;
        Ok(Self::new(Arc::new(gpu)))
    }

    pub fn with_kernels(gpu: Arc<GpuContext>, kernels: KernelBundle) -> Self {
        let device = &gpu.device;

        let encoder_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("vidlink_encoder_bind_group_layout"),
            entries: &[sampled_texture_entry(0), storage_entry(1, false), uniform_entry(2)],
        });
        let decoder_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("vidlink_decoder_bind_group_layout"),
            entries: &[storage_entry(0, true), storage_texture_entry(1), uniform_entry(2)],
        });

        let encoder = Self::build_kernel(device, &kernels, Kernel::Encoder, encoder_layout);
        let decoder = Self::build_kernel(device, &kernels, Kernel::Decoder, decoder_layout);
        let blit = Self::build_blit(device, &kernels);

        Self {
            gpu,
            encoder,
            decoder,
            blit,
            next_ticket: Mutex::new(0),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn build_kernel(
        device: &wgpu::Device,
        kernels: &KernelBundle,
        kernel: Kernel,
        layout: wgpu::BindGroupLayout,
    ) -> KernelPipelines {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(match kernel {
                Kernel::Encoder => "vidlink_encoder",
                Kernel::Decoder => "vidlink_decoder",
            }),
            source: wgpu::ShaderSource::Wgsl(kernels.source(kernel).into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("vidlink_kernel_pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let build = |pass: Pass| {
            let entry_point = KernelBundle::entry_point(kernel, pass);
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            })
        };
        KernelPipelines {
            opaque: build(Pass::Opaque),
            alpha: build(Pass::Alpha),
            layout,
        }
    }

    fn build_blit(device: &wgpu::Device, kernels: &KernelBundle) -> BlitPipeline {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("vidlink_blit_bind_group_layout"),
            entries: &[sampled_texture_entry(0), storage_texture_entry(1), uniform_entry(2)],
        });
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("vidlink_blit"),
            source: wgpu::ShaderSource::Wgsl(kernels.blit.into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("vidlink_blit_pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(BLIT_ENTRY_POINT),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: BLIT_ENTRY_POINT,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });
        BlitPipeline { layout, pipeline }
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.gpu
    }

    fn kernel(&self, kernel: Kernel) -> &KernelPipelines {
        match kernel {
            Kernel::Encoder => &self.encoder,
            Kernel::Decoder => &self.decoder,
        }
    }

    fn record_dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        kernel: Kernel,
        pass: Pass,
        groups: [u32; 3],
        params: DispatchParams,
        bound: &Bound,
    ) -> VidlinkResult<()> {
        let (Some(image), Some(buffer)) = (&bound.image, &bound.buffer) else {
            return Err(VidlinkError::Gpu(format!(
                "{:?}/{:?} dispatched without both bindings",
                kernel, pass
            )));
        };
        let device = &self.gpu.device;
        let uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("vidlink_kernel_params"),
            contents: bytemuck::cast_slice(&[KernelParams::from(params)]),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let view = image.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let pipelines = self.kernel(kernel);
        let (image_binding, buffer_binding) = match kernel {
            Kernel::Encoder => (0, 1),
            Kernel::Decoder => (1, 0),
        };
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("vidlink_kernel_bind_group"),
            layout: &pipelines.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: image_binding,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: buffer_binding,
                    resource: buffer.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniforms.as_entire_binding(),
                },
            ],
        });

        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(KernelBundle::entry_point(kernel, pass)),
            timestamp_writes: None,
        });
        cpass.set_pipeline(pipelines.pipeline(pass));
        cpass.set_bind_group(0, &bind_group, &[]);
        cpass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        Ok(())
    }

    /// Copy `source` onto `target`, resampling when the sizes differ.
    fn record_blit(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        source: &WgpuImage,
        target: &WgpuImage,
    ) {
        let (sw, sh) = (source.width(), source.height());
        let (dw, dh) = (target.width(), target.height());
        if (sw, sh) == (dw, dh) {
            encoder.copy_texture_to_texture(
                source.texture.as_image_copy(),
                target.texture.as_image_copy(),
                wgpu::Extent3d {
                    width: sw,
                    height: sh,
                    depth_or_array_layers: 1,
                },
            );
            return;
        }

        let device = &self.gpu.device;
        let uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("vidlink_blit_params"),
            contents: bytemuck::cast_slice(&[BlitParams {
                src_width: sw,
                src_height: sh,
                dst_width: dw,
                dst_height: dh,
            }]),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let src_view = source.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let dst_view = target.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("vidlink_blit_bind_group"),
            layout: &self.blit.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&src_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&dst_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniforms.as_entire_binding(),
                },
            ],
        });

        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(BLIT_ENTRY_POINT),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&self.blit.pipeline);
        cpass.set_bind_group(0, &bind_group, &[]);
        cpass.dispatch_workgroups(dw.div_ceil(BLIT_GROUP), dh.div_ceil(BLIT_GROUP), 1);
    }

    fn issue_ticket(&self) -> ReadbackTicket {
        let mut next = self.next_ticket.lock();
        let ticket = ReadbackTicket(*next);
        *next += 1;
        ticket
    }
}

impl ComputeDevice for WgpuDevice {
    type Image = WgpuImage;
    type Buffer = WgpuBuffer;

    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_buffer(&self, element_count: usize) -> VidlinkResult<WgpuBuffer> {
        let buffer = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vidlink_packed"),
            size: (element_count * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(WgpuBuffer {
            buffer: Arc::new(buffer),
            element_count,
        })
    }

    fn create_image(&self, width: u32, height: u32) -> VidlinkResult<WgpuImage> {
        let texture = create_image_texture(&self.gpu.device, Some("vidlink_image"), width, height);
        Ok(WgpuImage {
            texture: Arc::new(texture),
        })
    }

    fn acquire_temporary(&self, width: u32, height: u32) -> VidlinkResult<WgpuImage> {
        let texture = self.gpu.texture_pool.acquire(&self.gpu.device, width, height);
        Ok(WgpuImage {
            texture: Arc::new(texture),
        })
    }

    fn release_temporary(&self, image: WgpuImage) {
        // A temporary still referenced elsewhere is simply dropped.
        if let Ok(texture) = Arc::try_unwrap(image.texture) {
            self.gpu.texture_pool.release(texture);
        }
    }

    fn upload(&self, buffer: &WgpuBuffer, bytes: &[u8]) -> VidlinkResult<()> {
        if bytes.len() % 4 != 0 || bytes.len() > buffer.byte_size() {
            return Err(VidlinkError::InvalidArgument(format!(
                "cannot upload {} bytes into a buffer of {} elements",
                bytes.len(),
                buffer.element_count
            )));
        }
        self.gpu.queue.write_buffer(&buffer.buffer, 0, bytes);
        Ok(())
    }

    fn write_image(&self, image: &WgpuImage, frame: &FrameBuffer) -> VidlinkResult<()> {
        if image.width() != frame.width || image.height() != frame.height {
            return Err(VidlinkError::dimensions(
                frame.width,
                frame.height,
                format!("image is {}x{}", image.width(), image.height()),
            ));
        }
        self.gpu.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &image.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn read_image(&self, image: &WgpuImage) -> VidlinkResult<FrameBuffer> {
        let (width, height) = (image.width(), image.height());
        let padded_bytes_per_row = (width * 4 + 255) & !255;
        let readback = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vidlink_image_readback"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &image.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        self.gpu.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(VidlinkError::Readback(e.to_string())),
            Err(_) => return Err(VidlinkError::Readback("map callback dropped".into())),
        }

        let mut frame = FrameBuffer::new(width, height);
        {
            let data = slice.get_mapped_range();
            let row_bytes = (width * 4) as usize;
            for (y, dst) in frame.data.chunks_exact_mut(row_bytes).enumerate() {
                let start = y * padded_bytes_per_row as usize;
                dst.copy_from_slice(&data[start..start + row_bytes]);
            }
        }
        readback.unmap();
        Ok(frame)
    }

    fn submit(&self, commands: CommandList<Self>) -> VidlinkResult<()> {
        let device = &self.gpu.device;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("vidlink_submit"),
        });
        let mut bindings: HashMap<(Kernel, Pass), Bound> = HashMap::new();
        let mut readbacks: Vec<(ReadbackTicket, BufferIdentity, CompletionSender, wgpu::Buffer)> =
            Vec::new();

        for command in commands.into_commands() {
            match command {
                Command::SetTexture {
                    kernel,
                    pass,
                    image,
                } => {
                    bindings
                        .entry((kernel, pass))
                        .or_insert(Bound {
                            image: None,
                            buffer: None,
                        })
                        .image = Some(image)
                }
                Command::SetBuffer {
                    kernel,
                    pass,
                    buffer,
                } => {
                    bindings
                        .entry((kernel, pass))
                        .or_insert(Bound {
                            image: None,
                            buffer: None,
                        })
                        .buffer = Some(buffer)
                }
                Command::Dispatch {
                    kernel,
                    pass,
                    groups,
                    params,
                } => {
                    let bound = bindings.get(&(kernel, pass)).ok_or_else(|| {
                        VidlinkError::Gpu(format!("{:?}/{:?} dispatched unbound", kernel, pass))
                    })?;
                    self.record_dispatch(&mut encoder, kernel, pass, groups, params, bound)?;
                }
                Command::Blit { source, target } => {
                    if !Arc::ptr_eq(&source.texture, &target.texture) {
                        self.record_blit(&mut encoder, &source, &target);
                    }
                }
                Command::Readback {
                    buffer,
                    identity,
                    reply,
                } => {
                    let size = buffer.byte_size() as u64;
                    let staging = self.gpu.staging_pool.acquire(device, size);
                    encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, size);
                    readbacks.push((self.issue_ticket(), identity, reply, staging));
                }
            }
        }

        self.gpu.queue.submit(Some(encoder.finish()));

        let mut in_flight = self.in_flight.lock();
        for (ticket, identity, reply, staging) in readbacks {
            let mapped = Arc::new(Mutex::new(None));
            let flag = Arc::clone(&mapped);
            staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                let status = result.map_err(|e| e.to_string());
                *flag.lock() = Some(status.clone());
                let _ = reply.send(ReadbackCompletion {
                    ticket,
                    identity,
                    status,
                });
            });
            in_flight.insert(ticket, InFlight { staging, mapped });
        }
        Ok(())
    }

    fn resolve_readback(&self, ticket: ReadbackTicket, dest: &mut [u8]) -> VidlinkResult<()> {
        let Some(flight) = self.in_flight.lock().remove(&ticket) else {
            return Err(VidlinkError::Readback(format!("unknown ticket {}", ticket.0)));
        };
        let result = match flight.mapped.lock().clone() {
            Some(Ok(())) => {
                let data = flight.staging.slice(..).get_mapped_range();
                if data.len() == dest.len() {
                    dest.copy_from_slice(&data);
                    Ok(())
                } else {
                    Err(VidlinkError::Readback(format!(
                        "readback of {} bytes into {} byte destination",
                        data.len(),
                        dest.len()
                    )))
                }
            }
            Some(Err(e)) => Err(VidlinkError::Readback(e)),
            None => Err(VidlinkError::Readback(format!(
                "ticket {} resolved before completion",
                ticket.0
            ))),
        };
        self.recycle(flight);
        result
    }

    fn discard_readback(&self, ticket: ReadbackTicket) {
        if let Some(flight) = self.in_flight.lock().remove(&ticket) {
            self.recycle(flight);
        }
    }

    fn poll(&self) {
        self.gpu.device.poll(wgpu::Maintain::Poll);
    }

    fn wait_all(&self) {
        self.gpu.device.poll(wgpu::Maintain::Wait);
    }
}

impl WgpuDevice {
    fn recycle(&self, flight: InFlight) {
        if matches!(*flight.mapped.lock(), Some(Ok(()))) {
            flight.staging.unmap();
            self.gpu.staging_pool.release(flight.staging);
        }
        // Buffers still pending a map are dropped; wgpu cancels the mapping.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CompletionQueue;

    // Adapters are not guaranteed on CI machines; each test bails out quietly
    // when none is found.
    fn device() -> Option<WgpuDevice> {
        WgpuDevice::init().ok()
    }

    #[test]
    fn test_image_write_read() {
        let Some(device) = device() else { return };
        let image = device.create_image(16, 8).unwrap();
        let frame = FrameBuffer::solid(16, 8, [10, 20, 30, 40]);
        device.write_image(&image, &frame).unwrap();
        assert_eq!(device.read_image(&image).unwrap(), frame);
    }

    #[test]
    fn test_buffer_readback() {
        let Some(device) = device() else { return };
        let queue = CompletionQueue::new();
        let buffer = device.create_buffer(64).unwrap();
        device.upload(&buffer, &[9u8; 256]).unwrap();

        let mut cmd = CommandList::new();
        cmd.readback(buffer, BufferIdentity(42), queue.sender());
        device.submit(cmd).unwrap();
        device.wait_all();

        let done = queue.drain();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].identity, BufferIdentity(42));
        let mut dest = vec![0u8; 256];
        device.resolve_readback(done[0].ticket, &mut dest).unwrap();
        assert!(dest.iter().all(|b| *b == 9));
    }

    #[test]
    fn test_blit_scales_like_host_resample() {
        let Some(device) = device() else { return };
        let mut frame = FrameBuffer::new(32, 16);
        for y in 0..16 {
            for x in 0..32 {
                frame.set_pixel(x, y, [(x * 8) as u8, (y * 16) as u8, 255 - (x * 8) as u8, 255]);
            }
        }
        let source = device.create_image(32, 16).unwrap();
        device.write_image(&source, &frame).unwrap();
        let target = device.create_image(16, 8).unwrap();

        let mut cmd = CommandList::new();
        cmd.blit(source, target.clone());
        device.submit(cmd).unwrap();

        let mut expected = FrameBuffer::new(16, 8);
        expected.blit_scaled(&frame);
        let out = device.read_image(&target).unwrap();
        for (a, b) in out.data.iter().zip(expected.data.iter()) {
            assert!(a.abs_diff(*b) <= 1, "{} vs {}", a, b);
        }
    }
}
