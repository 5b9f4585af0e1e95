//! Mesh → 3D Gaussian splat conversion and rendering.
//!
//! A textured triangle mesh is rasterized in UV space into a square grid; every
//! covered texel becomes one Gaussian carrying position, orientation, scale and
//! PBR attributes. The splats are rendered with a prepass (projection and
//! culling), a back-to-front radix sort and alpha compositing, and can be
//! exported as PLY.
//!
//! Passes run either on the CPU ([`backend::CpuBackend`]) or with wgpu
//! (`gpu::GpuBackend`, feature `gpu`). [`pipeline::Renderer`] sequences them
//! under the [`pipeline::PipelineController`] state machine.

pub mod backend;
pub mod batch;
pub mod camera;
pub mod compositor;
pub mod config;
pub mod conversion;
pub mod error;
pub mod export;
pub mod gaussian;
pub mod math;
pub mod mesh;
pub mod pipeline;
pub mod prepass;
pub mod sort;
pub mod uv;

#[cfg(feature = "gltf")]
pub mod loader;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use backend::{CpuBackend, FrameStats, SplatBackend};
pub use camera::{Camera, Viewport};
pub use compositor::Framebuffer;
pub use config::{ConversionSettings, PipelineConfig, RenderMode, RenderSettings, Resolution};
pub use conversion::ConversionStats;
pub use error::{Result, SplatError};
pub use export::{export_ply, ExportFormat};
pub use gaussian::{AttributeBuffer, Gaussian};
pub use mesh::{Material, Mesh, Primitive, Texture};
pub use pipeline::{PassKind, PassSet, PipelineController, PipelineState, Renderer};

#[cfg(feature = "gltf")]
pub use loader::load_mesh;

#[cfg(feature = "gpu")]
pub use gpu::{GpuBackend, GpuContext};
