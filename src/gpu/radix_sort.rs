//! Device radix sort over `(key, value)` pairs.
//!
//! Same digit schedule as [`crate::sort::RadixSort`]: four 8-bit passes,
//! least-significant digit first, ping-ponging between the two halves of
//! the frame's key/value buffers so the result ends up back in `[0]`.

use bytemuck::{Pod, Zeroable};
use tracing::debug;
use wgpu::util::DeviceExt;

use super::{compute_pipeline, shader_module, storage_entry, uniform_entry, workgroups, FrameBuffers, GpuContext};
use crate::error::{Result, SplatError};
use crate::sort::{PASSES, RADIX_BITS};

const SHADER_SRC: &str = include_str!("shaders/radix_sort.wgsl");

pub(crate) const RADIX: u32 = 1 << RADIX_BITS;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct SortParams {
    count: u32,
    shift: u32,
    blocks: u32,
    _pad: u32,
}

pub struct GpuRadixSort {
    bgl: wgpu::BindGroupLayout,
    upsweep: wgpu::ComputePipeline,
    spine_scan: wgpu::ComputePipeline,
    downsweep: wgpu::ComputePipeline,
}

impl GpuRadixSort {
    pub fn new(ctx: &GpuContext) -> Self {
        let device = &ctx.device;
        let module = shader_module(device, "radix_sort_shader", SHADER_SRC);
        let compute = wgpu::ShaderStages::COMPUTE;

        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("radix_sort_bgl"),
            entries: &[
                uniform_entry(0, compute),
                storage_entry(1, true, compute),
                storage_entry(2, true, compute),
                storage_entry(3, false, compute),
                storage_entry(4, false, compute),
                storage_entry(5, false, compute),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("radix_sort_pipeline_layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        Self {
            upsweep: compute_pipeline(device, "radix_upsweep", &layout, &module, "upsweep"),
            spine_scan: compute_pipeline(device, "radix_spine_scan", &layout, &module, "spine_scan"),
            downsweep: compute_pipeline(device, "radix_downsweep", &layout, &module, "downsweep"),
            bgl,
        }
    }

    /// Sort the first `count` pairs of `keys[0]`/`values[0]` in place.
    pub(crate) fn sort_buffers(
        &self,
        ctx: &GpuContext,
        keys: &[wgpu::Buffer; 2],
        values: &[wgpu::Buffer; 2],
        spine: &wgpu::Buffer,
        count: u32,
    ) -> Result<()> {
        if count <= 1 {
            return Ok(());
        }
        let blocks = workgroups(count);

        // One uniform buffer per pass: queue writes would all land before the
        // encoder runs.
        let bind_groups: Vec<wgpu::BindGroup> = (0..PASSES)
            .map(|pass| {
                let (src, dst) = (pass % 2, (pass + 1) % 2);
                let params = ctx.uniform_buffer(
                    "radix_sort_params",
                    &SortParams {
                        count,
                        shift: pass * RADIX_BITS,
                        blocks,
                        _pad: 0,
                    },
                );
                ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("radix_sort_bg"),
                    layout: &self.bgl,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: params.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: keys[src as usize].as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: values[src as usize].as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: keys[dst as usize].as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 4,
                            resource: values[dst as usize].as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 5,
                            resource: spine.as_entire_binding(),
                        },
                    ],
                })
            })
            .collect();

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("radix_sort_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("radix_sort"),
                timestamp_writes: None,
            });
            for bg in &bind_groups {
                pass.set_bind_group(0, bg, &[]);
                pass.set_pipeline(&self.upsweep);
                pass.dispatch_workgroups(blocks, 1, 1);
                pass.set_pipeline(&self.spine_scan);
                pass.dispatch_workgroups(1, 1, 1);
                pass.set_pipeline(&self.downsweep);
                pass.dispatch_workgroups(blocks, 1, 1);
            }
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));
        debug!(count, passes = PASSES, "gpu radix sort");
        Ok(())
    }

    pub(crate) fn sort_frame(&self, ctx: &GpuContext, frame: &FrameBuffers, count: u32) -> Result<()> {
        self.sort_buffers(ctx, &frame.keys, &frame.values, &frame.spine, count)
    }

    /// Standalone sort: upload, sort, read back the reordered values.
    pub fn sort(&self, ctx: &GpuContext, keys: &[u32], values: &[u32]) -> Result<Vec<u32>> {
        if keys.len() != values.len() {
            return Err(SplatError::Input(format!(
                "{} keys but {} values",
                keys.len(),
                values.len()
            )));
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let count = keys.len() as u32;
        let bytes = keys.len() as u64 * 4;
        ctx.check_buffer("sort keys", bytes)?;

        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        let init = |label, data: &[u32]| {
            ctx.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(data),
                    usage,
                })
        };
        let key_bufs = [
            init("sort_keys_a", keys),
            ctx.storage_buffer("sort_keys_b", bytes, wgpu::BufferUsages::COPY_SRC)?,
        ];
        let value_bufs = [
            init("sort_values_a", values),
            ctx.storage_buffer("sort_values_b", bytes, wgpu::BufferUsages::COPY_SRC)?,
        ];
        let spine = ctx.storage_buffer(
            "sort_spine",
            workgroups(count) as u64 * RADIX as u64 * 4,
            wgpu::BufferUsages::empty(),
        )?;

        self.sort_buffers(ctx, &key_bufs, &value_bufs, &spine, count)?;
        ctx.read_buffer(&value_bufs[0], keys.len())
    }
}
