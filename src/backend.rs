//! Execution backends for the four pipeline passes.
//!
//! [`crate::pipeline::Renderer`] drives a backend pass by pass, skipping any
//! pass the controller has disabled. Passes communicate through state held by
//! the backend (the prepass output feeds the sort, the sort feeds splatting),
//! so a backend may keep everything device-resident between them.

use tracing::debug;

use crate::camera::Camera;
use crate::compositor::{self, Framebuffer};
use crate::config::{ConversionSettings, RenderSettings};
use crate::conversion::{self, ConversionStats};
use crate::error::Result;
use crate::gaussian::AttributeBuffer;
use crate::mesh::Mesh;
use crate::prepass::{self, PrepassOutput, Projection};
use crate::sort::RadixSort;

/// Totals exposed to callers after each frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Valid Gaussians in the attribute buffer.
    pub total: usize,
    /// Gaussians that survived the prepass.
    pub visible: usize,
}

pub trait SplatBackend {
    fn name(&self) -> &'static str;

    /// Conversion pass. Builds a fresh buffer; never touches the previous one.
    fn convert(
        &mut self,
        mesh: &Mesh,
        settings: &ConversionSettings,
    ) -> Result<(AttributeBuffer, ConversionStats)>;

    /// Prepass for `camera`. Returns the visible count.
    fn prepass(
        &mut self,
        buffer: &AttributeBuffer,
        camera: &Camera,
        settings: &RenderSettings,
    ) -> Result<usize>;

    /// Order the last prepass output back-to-front.
    fn sort(&mut self) -> Result<()>;

    /// Composite the sorted splats over `target`, which is already cleared.
    fn splat(&mut self, settings: &RenderSettings, target: &mut Framebuffer) -> Result<()>;
}

impl<B: SplatBackend + ?Sized> SplatBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn convert(
        &mut self,
        mesh: &Mesh,
        settings: &ConversionSettings,
    ) -> Result<(AttributeBuffer, ConversionStats)> {
        (**self).convert(mesh, settings)
    }

    fn prepass(
        &mut self,
        buffer: &AttributeBuffer,
        camera: &Camera,
        settings: &RenderSettings,
    ) -> Result<usize> {
        (**self).prepass(buffer, camera, settings)
    }

    fn sort(&mut self) -> Result<()> {
        (**self).sort()
    }

    fn splat(&mut self, settings: &RenderSettings, target: &mut Framebuffer) -> Result<()> {
        (**self).splat(settings, target)
    }
}

/// Runs every pass on the host with rayon.
#[derive(Debug, Default)]
pub struct CpuBackend {
    prepass: PrepassOutput,
    sorter: RadixSort,
    keys: Vec<u32>,
    order: Vec<u32>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot indices in the order the last frame drew them.
    pub fn draw_order(&self) -> &[u32] {
        &self.order
    }

    pub fn prepass_output(&self) -> &PrepassOutput {
        &self.prepass
    }
}

impl SplatBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn convert(
        &mut self,
        mesh: &Mesh,
        settings: &ConversionSettings,
    ) -> Result<(AttributeBuffer, ConversionStats)> {
        Ok(conversion::convert(mesh, settings))
    }

    fn prepass(
        &mut self,
        buffer: &AttributeBuffer,
        camera: &Camera,
        settings: &RenderSettings,
    ) -> Result<usize> {
        let projection = Projection::new(camera, settings.viewport, settings.render_mode);
        prepass::run(buffer, &projection, &mut self.prepass);
        self.order.clear();
        Ok(self.prepass.visible_count())
    }

    fn sort(&mut self) -> Result<()> {
        self.keys.clone_from(&self.prepass.keys);
        self.order.clone_from(&self.prepass.indices);
        self.sorter.sort_pairs(&mut self.keys, &mut self.order)?;
        debug!(count = self.order.len(), "sorted splats");
        Ok(())
    }

    fn splat(&mut self, _settings: &RenderSettings, target: &mut Framebuffer) -> Result<()> {
        compositor::composite(target, &self.order, &self.prepass);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Viewport;
    use crate::config::Resolution;

    #[test]
    fn cpu_backend_draws_farthest_first() {
        let mesh = Mesh::unit_cube();
        let mut backend = CpuBackend::new();
        let settings = ConversionSettings::new().with_resolution(Resolution::new(64).unwrap());
        let (buffer, stats) = backend.convert(&mesh, &settings).unwrap();
        assert_eq!(stats.valid_gaussians, 64 * 64);

        let render = RenderSettings {
            viewport: Viewport::new(160, 120),
            ..RenderSettings::default()
        };
        let camera = Camera::framing(&mesh.bounds(), 35.0, 25.0, 1.0, 45.0, render.viewport.aspect());
        let visible = backend.prepass(&buffer, &camera, &render).unwrap();
        assert!(visible > 0);
        backend.sort().unwrap();

        let order = backend.draw_order();
        assert_eq!(order.len(), visible);
        let pre = backend.prepass_output();
        let depth = |i: u32| pre.records[pre.position_of(i).unwrap()].depth;
        for w in order.windows(2) {
            assert!(depth(w[0]) >= depth(w[1]));
        }

        let mut fb = Framebuffer::new(render.viewport, render.background);
        backend.splat(&render, &mut fb).unwrap();
        let center = fb.pixel(80, 60).unwrap();
        assert!(center[0] > 0.1, "cube should cover the image center");
    }
}
