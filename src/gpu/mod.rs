//! wgpu backend: every pass runs on the device.
//!
//! The attribute buffer stays resident between frames and is only re-uploaded
//! when a new conversion produced a buffer with a different generation. Frame
//! buffers (screen records, sort keys/values, scan scratch) are sized for the
//! buffer's capacity and reused across frames.

mod conversion;
mod prepass;
mod radix_sort;
mod splatting;

use bytemuck::Pod;
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;

use crate::backend::SplatBackend;
use crate::camera::Camera;
use crate::compositor::Framebuffer;
use crate::config::{ConversionSettings, RenderSettings};
use crate::conversion::ConversionStats;
use crate::error::{Result, SplatError};
use crate::gaussian::{AttributeBuffer, Gaussian};
use crate::mesh::Mesh;
use crate::prepass::ScreenRecord;

pub use conversion::ConversionPass;
pub use prepass::PrepassPass;
pub use radix_sort::GpuRadixSort;
pub use splatting::SplattingPass;

const COMMON_WGSL: &str = include_str!("shaders/common.wgsl");

/// Threads per workgroup in every compute kernel.
pub(crate) const WORKGROUP_SIZE: u32 = 256;

pub(crate) fn workgroups(count: u32) -> u32 {
    count.div_ceil(WORKGROUP_SIZE)
}

/// Prefix the shared struct declarations to a pass shader.
pub(crate) fn shader_module(device: &wgpu::Device, label: &str, body: &str) -> wgpu::ShaderModule {
    let source = format!("{}\n{}", COMMON_WGSL, body);
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}

pub(crate) fn storage_entry(binding: u32, read_only: bool, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

/// Device, queue and the limits every allocation is checked against.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
}

impl GpuContext {
    /// Headless context with graceful fallback: hardware → software → error.
    pub async fn request() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
        {
            Some(a) => a,
            None => {
                warn!("no hardware adapter; trying software fallback");
                instance
                    .request_adapter(&wgpu::RequestAdapterOptions {
                        power_preference: wgpu::PowerPreference::LowPower,
                        compatible_surface: None,
                        force_fallback_adapter: true,
                    })
                    .await
                    .ok_or(SplatError::NoGpuAdapter)?
            }
        };

        let info = adapter.get_info();
        let limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("splat_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| SplatError::DeviceCreation(e.to_string()))?;

        info!(adapter = %info.name, backend = ?info.backend, "created GPU device");
        Ok(Self {
            device,
            queue,
            info,
            limits,
        })
    }

    /// Blocking wrapper around [`GpuContext::request`].
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::request())
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.info
    }

    /// Largest storage buffer this device can bind.
    pub fn max_storage_bytes(&self) -> u64 {
        self.limits
            .max_buffer_size
            .min(self.limits.max_storage_buffer_binding_size as u64)
    }

    /// Fail with a resource error rather than letting wgpu panic on allocation.
    pub fn check_buffer(&self, what: &'static str, bytes: u64) -> Result<()> {
        let limit = self.max_storage_bytes();
        if bytes > limit {
            return Err(SplatError::Resource {
                what,
                requested: bytes,
                limit,
            });
        }
        Ok(())
    }

    pub(crate) fn storage_buffer(&self, label: &'static str, bytes: u64, extra: wgpu::BufferUsages) -> Result<wgpu::Buffer> {
        self.check_buffer(label, bytes)?;
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            // Zero-sized bindings are invalid.
            size: bytes.max(4),
            usage: wgpu::BufferUsages::STORAGE | extra,
            mapped_at_creation: false,
        }))
    }

    pub(crate) fn uniform_buffer<T: Pod>(&self, label: &str, value: &T) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::bytes_of(value),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })
    }

    /// Block until the device is idle, then wait for a mapped slice.
    pub(crate) fn map_read(&self, slice: wgpu::BufferSlice<'_>) -> Result<()> {
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| SplatError::RenderFailed(format!("Map callback dropped: {}", e)))?
            .map_err(|e| SplatError::RenderFailed(format!("Failed to map buffer: {}", e)))
    }

    /// Copy the first `len` elements of `buffer` back to the host.
    pub fn read_buffer<T: Pod>(&self, buffer: &wgpu::Buffer, len: usize) -> Result<Vec<T>> {
        let bytes = (len * std::mem::size_of::<T>()) as u64;
        if bytes == 0 {
            return Ok(Vec::new());
        }
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging"),
            size: bytes,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        self.map_read(slice)?;
        let data = slice.get_mapped_range();
        let out = bytemuck::pod_collect_to_vec(&data[..]);
        drop(data);
        staging.unmap();
        Ok(out)
    }
}

/// Attribute buffer uploaded to the device.
struct Resident {
    generation: u64,
    capacity: u32,
    gaussians: wgpu::Buffer,
}

/// Per-frame scratch shared by the prepass, sort and splatting passes.
pub(crate) struct FrameBuffers {
    pub capacity: u32,
    /// Slot-indexed screen records; radius 0 marks a culled slot.
    pub records: wgpu::Buffer,
    pub local_offsets: wgpu::Buffer,
    pub block_counts: wgpu::Buffer,
    pub visible_count: wgpu::Buffer,
    /// Ping-pong key/value pairs. Pass output and sorted result live in `[0]`.
    pub keys: [wgpu::Buffer; 2],
    pub values: [wgpu::Buffer; 2],
    pub spine: wgpu::Buffer,
}

impl FrameBuffers {
    fn new(ctx: &GpuContext, capacity: u32) -> Result<Self> {
        let n = capacity as u64;
        let blocks = workgroups(capacity) as u64;
        let record_bytes = n * std::mem::size_of::<ScreenRecord>() as u64;
        let copy = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        Ok(Self {
            capacity,
            records: ctx.storage_buffer("screen_records", record_bytes, copy)?,
            local_offsets: ctx.storage_buffer("local_offsets", n * 4, copy)?,
            block_counts: ctx.storage_buffer("block_counts", blocks * 4, copy)?,
            visible_count: ctx.storage_buffer("visible_count", 4, copy)?,
            keys: [
                ctx.storage_buffer("sort_keys_a", n * 4, copy)?,
                ctx.storage_buffer("sort_keys_b", n * 4, copy)?,
            ],
            values: [
                ctx.storage_buffer("sort_values_a", n * 4, copy)?,
                ctx.storage_buffer("sort_values_b", n * 4, copy)?,
            ],
            spine: ctx.storage_buffer("sort_spine", blocks * radix_sort::RADIX as u64 * 4, copy)?,
        })
    }
}

/// [`SplatBackend`] that runs all four passes with wgpu.
pub struct GpuBackend {
    ctx: GpuContext,
    conversion: ConversionPass,
    prepass: PrepassPass,
    sort: GpuRadixSort,
    splatting: SplattingPass,
    resident: Option<Resident>,
    frame: Option<FrameBuffers>,
    visible: u32,
}

impl GpuBackend {
    pub fn new() -> Result<Self> {
        Ok(Self::with_context(GpuContext::new()?))
    }

    pub fn with_context(ctx: GpuContext) -> Self {
        let conversion = ConversionPass::new(&ctx);
        let prepass = PrepassPass::new(&ctx);
        let sort = GpuRadixSort::new(&ctx);
        let splatting = SplattingPass::new(&ctx);
        Self {
            ctx,
            conversion,
            prepass,
            sort,
            splatting,
            resident: None,
            frame: None,
            visible: 0,
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// Visible count from the last prepass.
    pub fn visible(&self) -> u32 {
        self.visible
    }

    /// Sorted slot indices from the last frame.
    pub fn read_draw_order(&self) -> Result<Vec<u32>> {
        match &self.frame {
            Some(frame) => self.ctx.read_buffer(&frame.values[0], self.visible as usize),
            None => Ok(Vec::new()),
        }
    }

    fn ensure_resident(&mut self, buffer: &AttributeBuffer) -> Result<()> {
        if self
            .resident
            .as_ref()
            .is_some_and(|r| r.generation == buffer.generation())
        {
            return Ok(());
        }
        self.ctx.check_buffer("gaussian attributes", buffer.size_bytes())?;
        debug!(
            capacity = buffer.capacity(),
            bytes = buffer.size_bytes(),
            "uploading attribute buffer"
        );
        let gaussians = self
            .ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("gaussians"),
                contents: bytemuck::cast_slice(buffer.as_slice()),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            });
        self.resident = Some(Resident {
            generation: buffer.generation(),
            capacity: buffer.capacity() as u32,
            gaussians,
        });
        Ok(())
    }

    fn ensure_frame(&mut self, capacity: u32) -> Result<()> {
        if self.frame.as_ref().is_some_and(|f| f.capacity == capacity) {
            return Ok(());
        }
        self.frame = Some(FrameBuffers::new(&self.ctx, capacity)?);
        Ok(())
    }
}

impl SplatBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn convert(
        &mut self,
        mesh: &Mesh,
        settings: &ConversionSettings,
    ) -> Result<(AttributeBuffer, ConversionStats)> {
        let (buffer, stats, device_buffer) = self.conversion.run(&self.ctx, mesh, settings)?;
        // The device copy is already current; skip the upload on the next frame.
        self.resident = Some(Resident {
            generation: buffer.generation(),
            capacity: buffer.capacity() as u32,
            gaussians: device_buffer,
        });
        Ok((buffer, stats))
    }

    fn prepass(
        &mut self,
        buffer: &AttributeBuffer,
        camera: &Camera,
        settings: &RenderSettings,
    ) -> Result<usize> {
        self.ensure_resident(buffer)?;
        let capacity = buffer.capacity() as u32;
        self.ensure_frame(capacity)?;
        let (Some(resident), Some(frame)) = (&self.resident, &self.frame) else {
            return Err(SplatError::RenderFailed("frame buffers missing".into()));
        };
        debug_assert_eq!(resident.capacity, capacity);
        self.visible = self
            .prepass
            .run(&self.ctx, &resident.gaussians, frame, camera, settings)?;
        Ok(self.visible as usize)
    }

    fn sort(&mut self) -> Result<()> {
        let Some(frame) = &self.frame else {
            return Ok(());
        };
        self.sort.sort_frame(&self.ctx, frame, self.visible)
    }

    fn splat(&mut self, settings: &RenderSettings, target: &mut Framebuffer) -> Result<()> {
        let Some(frame) = &self.frame else {
            return Ok(());
        };
        self.splatting
            .run(&self.ctx, frame, self.visible, settings, target)
    }
}

/// Slot buffer handed back by the conversion kernel, with invalid slots
/// normalized to [`Gaussian::INVALID`].
pub(crate) fn normalize_slots(mut slots: Vec<Gaussian>) -> Vec<Gaussian> {
    for g in slots.iter_mut() {
        if !g.is_valid() {
            *g = Gaussian::INVALID;
        }
    }
    slots
}
