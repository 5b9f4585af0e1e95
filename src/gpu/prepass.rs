//! Gaussian prepass on the GPU: project, scan survivor counts, compact.

use bytemuck::{Pod, Zeroable};
use tracing::debug;

use super::{compute_pipeline, shader_module, storage_entry, uniform_entry, workgroups, FrameBuffers, GpuContext};
use crate::camera::Camera;
use crate::config::RenderSettings;
use crate::error::Result;

const SHADER_SRC: &str = include_str!("shaders/prepass.wgsl");

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct PrepassParams {
    view: [[f32; 4]; 4],
    fx: f32,
    fy: f32,
    width: f32,
    height: f32,
    near: f32,
    far: f32,
    mode: u32,
    count: u32,
}

pub struct PrepassPass {
    bgl: wgpu::BindGroupLayout,
    project: wgpu::ComputePipeline,
    scan_blocks: wgpu::ComputePipeline,
    compact: wgpu::ComputePipeline,
}

impl PrepassPass {
    pub fn new(ctx: &GpuContext) -> Self {
        let device = &ctx.device;
        let module = shader_module(device, "prepass_shader", SHADER_SRC);
        let compute = wgpu::ShaderStages::COMPUTE;

        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("prepass_bgl"),
            entries: &[
                uniform_entry(0, compute),
                storage_entry(1, true, compute),
                storage_entry(2, false, compute),
                storage_entry(3, false, compute),
                storage_entry(4, false, compute),
                storage_entry(5, false, compute),
                storage_entry(6, false, compute),
                storage_entry(7, false, compute),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("prepass_pipeline_layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        Self {
            project: compute_pipeline(device, "prepass_project", &layout, &module, "project"),
            scan_blocks: compute_pipeline(device, "prepass_scan_blocks", &layout, &module, "scan_blocks"),
            compact: compute_pipeline(device, "prepass_compact", &layout, &module, "compact"),
            bgl,
        }
    }

    /// Run the prepass over every slot of `gaussians` and return the visible
    /// count. Survivors land in `frame.keys[0]` / `frame.values[0]`.
    pub fn run(
        &self,
        ctx: &GpuContext,
        gaussians: &wgpu::Buffer,
        frame: &FrameBuffers,
        camera: &Camera,
        settings: &RenderSettings,
    ) -> Result<u32> {
        let viewport = settings.viewport;
        let (fx, fy) = camera.focal_lengths(viewport);
        let params = ctx.uniform_buffer(
            "prepass_params",
            &PrepassParams {
                view: camera.view_matrix(),
                fx,
                fy,
                width: viewport.width as f32,
                height: viewport.height as f32,
                near: camera.near,
                far: camera.far,
                mode: settings.render_mode.as_index(),
                count: frame.capacity,
            },
        );

        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("prepass_bg"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: gaussians.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: frame.records.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: frame.local_offsets.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: frame.block_counts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: frame.visible_count.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: frame.keys[0].as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: frame.values[0].as_entire_binding(),
                },
            ],
        });

        let blocks = workgroups(frame.capacity);
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("prepass_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("prepass"),
                timestamp_writes: None,
            });
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_pipeline(&self.project);
            pass.dispatch_workgroups(blocks, 1, 1);
            pass.set_pipeline(&self.scan_blocks);
            pass.dispatch_workgroups(1, 1, 1);
            pass.set_pipeline(&self.compact);
            pass.dispatch_workgroups(blocks, 1, 1);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));

        // The sort needs the survivor count to size its dispatches.
        let visible = ctx
            .read_buffer::<u32>(&frame.visible_count, 1)?
            .first()
            .copied()
            .unwrap_or(0);
        debug!(visible, total = frame.capacity, "gpu prepass");
        Ok(visible)
    }
}
