//! Splatting on the GPU: instanced quads in sorted order, blended "over" into
//! an sRGB target that is read back into the host framebuffer.

use bytemuck::{Pod, Zeroable};

use super::{shader_module, storage_entry, uniform_entry, FrameBuffers, GpuContext};
use crate::compositor::Framebuffer;
use crate::config::RenderSettings;
use crate::error::Result;
use crate::mesh::srgb_to_linear;

const SHADER_SRC: &str = include_str!("shaders/splatting.wgsl");
const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct SplatParams {
    width: f32,
    height: f32,
    _pad: [f32; 2],
}

/// Offscreen target and staging buffer for one viewport size.
struct Target {
    width: u32,
    height: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    staging: wgpu::Buffer,
    padded_bytes_per_row: u32,
}

impl Target {
    fn new(ctx: &GpuContext, width: u32, height: u32) -> Self {
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("splat_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bytes_per_pixel = 4u32;
        let unpadded_bytes_per_row = bytes_per_pixel * width;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;
        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("splat_staging"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            width,
            height,
            texture,
            view,
            staging,
            padded_bytes_per_row,
        }
    }
}

pub struct SplattingPass {
    bgl: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
    target: Option<Target>,
}

impl SplattingPass {
    pub fn new(ctx: &GpuContext) -> Self {
        let device = &ctx.device;
        let module = shader_module(device, "splatting_shader", SHADER_SRC);
        let stages = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;

        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("splatting_bgl"),
            entries: &[
                uniform_entry(0, stages),
                storage_entry(1, true, wgpu::ShaderStages::VERTEX),
                storage_entry(2, true, wgpu::ShaderStages::VERTEX),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("splatting_pipeline_layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("splatting_pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: Some(wgpu::BlendState {
                        color: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::SrcAlpha,
                            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                            operation: wgpu::BlendOperation::Add,
                        },
                        alpha: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::One,
                            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                            operation: wgpu::BlendOperation::Add,
                        },
                    }),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            bgl,
            pipeline,
            target: None,
        }
    }

    /// Draw the first `visible` sorted splats and copy the image into `out`.
    pub fn run(
        &mut self,
        ctx: &GpuContext,
        frame: &FrameBuffers,
        visible: u32,
        settings: &RenderSettings,
        out: &mut Framebuffer,
    ) -> Result<()> {
        let (width, height) = (out.width, out.height);
        if width == 0 || height == 0 {
            return Ok(());
        }
        if !self
            .target
            .as_ref()
            .is_some_and(|t| t.width == width && t.height == height)
        {
            self.target = Some(Target::new(ctx, width, height));
        }
        let Some(target) = self.target.as_ref() else {
            return Ok(());
        };

        let params = ctx.uniform_buffer(
            "splat_params",
            &SplatParams {
                width: width as f32,
                height: height as f32,
                _pad: [0.0; 2],
            },
        );
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("splatting_bg"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: frame.records.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: frame.values[0].as_entire_binding(),
                },
            ],
        });

        let bg = settings.background;
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("splatting_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("splatting_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: bg[0] as f64,
                            g: bg[1] as f64,
                            b: bg[2] as f64,
                            a: bg[3] as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if visible > 0 {
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..6, 0..visible);
            }
        }

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &target.staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(target.padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = target.staging.slice(..);
        ctx.map_read(buffer_slice)?;
        let data = buffer_slice.get_mapped_range();
        let row_pixels = width as usize;
        for row in 0..height as usize {
            let start = row * target.padded_bytes_per_row as usize;
            let src = &data[start..start + row_pixels * 4];
            let dst = &mut out.pixels[row * row_pixels..(row + 1) * row_pixels];
            for (px, c) in dst.iter_mut().zip(src.chunks_exact(4)) {
                *px = [
                    srgb_to_linear(c[0] as f32 / 255.0),
                    srgb_to_linear(c[1] as f32 / 255.0),
                    srgb_to_linear(c[2] as f32 / 255.0),
                    c[3] as f32 / 255.0,
                ];
            }
        }
        drop(data);
        target.staging.unmap();
        Ok(())
    }
}
