//! Conversion pass on the GPU: the mesh is drawn in UV space into an `R×R`
//! coverage target and every fragment writes its Gaussian to the slot buffer.
//!
//! Triangle setup is shared with the CPU path ([`crate::conversion::prepare`]),
//! so both backends agree on which triangles are degenerate.

use bytemuck::{Pod, Zeroable};
use tracing::{debug, info};
use wgpu::util::DeviceExt;

use super::{normalize_slots, shader_module, storage_entry, uniform_entry, GpuContext};
use crate::config::ConversionSettings;
use crate::conversion::{self, ConversionStats, ConversionVertex, THICKNESS_RATIO};
use crate::error::Result;
use crate::gaussian::{AttributeBuffer, Gaussian};
use crate::mesh::{Material, Mesh, Texture};

const SHADER_SRC: &str = include_str!("shaders/conversion.wgsl");
const COVERAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct ConversionParams {
    resolution: u32,
    std_dev: f32,
    opacity: f32,
    thickness: f32,
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct MaterialParams {
    base_color_factor: [f32; 4],
    metallic_factor: f32,
    roughness_factor: f32,
    _pad: [f32; 2],
}

pub struct ConversionPass {
    pipeline: wgpu::RenderPipeline,
    scene_bgl: wgpu::BindGroupLayout,
    material_bgl: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl ConversionPass {
    pub fn new(ctx: &GpuContext) -> Self {
        let device = &ctx.device;
        let module = shader_module(device, "conversion_shader", SHADER_SRC);
        let fragment = wgpu::ShaderStages::FRAGMENT;

        let scene_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("conversion_scene_bgl"),
            entries: &[
                uniform_entry(0, fragment),
                storage_entry(1, false, fragment),
                storage_entry(2, true, fragment),
            ],
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: fragment,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let material_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("conversion_material_bgl"),
            entries: &[
                uniform_entry(0, fragment),
                texture_entry(1),
                texture_entry(2),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: fragment,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("conversion_pipeline_layout"),
            bind_group_layouts: &[&scene_bgl, &material_bgl],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("conversion_pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<ConversionVertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![
                        0 => Float32x3,
                        1 => Float32x3,
                        2 => Float32x2
                    ],
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COVERAGE_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                // UV winding is arbitrary.
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("material_sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            pipeline,
            scene_bgl,
            material_bgl,
            sampler,
        }
    }

    /// Convert `mesh` and return the host copy, the stats and the device
    /// buffer the Gaussians were written to.
    pub fn run(
        &self,
        ctx: &GpuContext,
        mesh: &Mesh,
        settings: &ConversionSettings,
    ) -> Result<(AttributeBuffer, ConversionStats, wgpu::Buffer)> {
        let resolution = settings.resolution;
        let r = resolution.get();
        let capacity = resolution.capacity();
        let bytes = (capacity * std::mem::size_of::<Gaussian>()) as u64;

        let gaussians = ctx.storage_buffer(
            "gaussians",
            bytes,
            wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        )?;

        let prepared = conversion::prepare(mesh);
        let device = &ctx.device;

        let params = ctx.uniform_buffer(
            "conversion_params",
            &ConversionParams {
                resolution: r,
                std_dev: settings.std_dev,
                opacity: settings.opacity,
                thickness: THICKNESS_RATIO,
            },
        );

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("conversion_encoder"),
        });
        encoder.clear_buffer(&gaussians, 0, None);

        if prepared.triangle_count() > 0 {
            let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("conversion_vertices"),
                contents: bytemuck::cast_slice(&prepared.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
            let frames = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("triangle_frames"),
                contents: bytemuck::cast_slice(&prepared.frames),
                usage: wgpu::BufferUsages::STORAGE,
            });

            let scene_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("conversion_scene_bg"),
                layout: &self.scene_bgl,
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
                        resource: frames.as_entire_binding(),
                    },
                ],
            });

            let material_bgs: Vec<wgpu::BindGroup> = prepared
                .batches
                .iter()
                .map(|b| self.material_bind_group(ctx, mesh.material(b.material)))
                .collect();

            let coverage = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("uv_coverage"),
                size: wgpu::Extent3d {
                    width: r,
                    height: r,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: COVERAGE_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            let coverage_view = coverage.create_view(&wgpu::TextureViewDescriptor::default());

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("conversion_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &coverage_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Discard,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &scene_bg, &[]);
            pass.set_vertex_buffer(0, vertices.slice(..));
            for (batch, bg) in prepared.batches.iter().zip(&material_bgs) {
                let first = batch.first_triangle * 3;
                pass.set_bind_group(1, bg, &[]);
                pass.draw(first..first + batch.triangle_count * 3, 0..1);
            }
            drop(pass);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let slots: Vec<Gaussian> = normalize_slots(ctx.read_buffer(&gaussians, capacity)?);
        let buffer = AttributeBuffer::from_slots(resolution, slots);
        let stats = ConversionStats {
            resolution: r,
            total_triangles: prepared.total_triangles,
            degenerate_triangles: prepared.degenerate_triangles,
            unmapped_triangles: prepared.unmapped_triangles,
            out_of_bounds_triangles: prepared.out_of_bounds_triangles,
            // Overlapping writes race on the device and are not counted.
            overwritten_texels: 0,
            valid_gaussians: buffer.valid_count(),
        };
        debug!(batches = prepared.batches.len(), "conversion draws submitted");
        info!(
            resolution = r,
            gaussians = stats.valid_gaussians,
            degenerate = stats.degenerate_triangles,
            unmapped = stats.unmapped_triangles,
            out_of_bounds = stats.out_of_bounds_triangles,
            "conversion finished"
        );
        Ok((buffer, stats, gaussians))
    }

    fn material_bind_group(&self, ctx: &GpuContext, material: &Material) -> wgpu::BindGroup {
        let params = ctx.uniform_buffer(
            "material_params",
            &MaterialParams {
                base_color_factor: material.base_color_factor,
                metallic_factor: material.metallic_factor,
                roughness_factor: material.roughness_factor,
                _pad: [0.0; 2],
            },
        );
        let white_srgb = Texture::solid([255; 4], true);
        let white = Texture::solid([255; 4], false);
        let base = upload_texture(
            ctx,
            "base_color",
            material.base_color_texture.as_ref().unwrap_or(&white_srgb),
        );
        let mr = upload_texture(
            ctx,
            "metallic_roughness",
            material.metallic_roughness_texture.as_ref().unwrap_or(&white),
        );

        ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("material_{}", material.name)),
            layout: &self.material_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&base),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&mr),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }
}

/// sRGB textures decode to linear on sample, matching [`Texture::sample`].
fn upload_texture(ctx: &GpuContext, label: &str, texture: &Texture) -> wgpu::TextureView {
    let size = wgpu::Extent3d {
        width: texture.width,
        height: texture.height,
        depth_or_array_layers: 1,
    };
    let format = if texture.srgb {
        wgpu::TextureFormat::Rgba8UnormSrgb
    } else {
        wgpu::TextureFormat::Rgba8Unorm
    };
    let tex = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    ctx.queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &tex,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &texture.pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(texture.width * 4),
            rows_per_image: Some(texture.height),
        },
        size,
    );
    tex.create_view(&wgpu::TextureViewDescriptor::default())
}
