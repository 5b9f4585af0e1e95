//! Pipeline controller state machine and the renderer that drives a backend.
//!
//! The controller owns which passes run and which viewport they target. The
//! [`Renderer`] consults it every frame and never writes the attribute buffer
//! outside a conversion run.

use std::fmt;
use std::path::Path;

use tracing::{debug, info};

use crate::backend::{FrameStats, SplatBackend};
use crate::camera::{Camera, Viewport};
use crate::compositor::Framebuffer;
use crate::config::{ConversionSettings, RenderSettings};
use crate::conversion::ConversionStats;
use crate::error::{Result, SplatError};
use crate::export::{self, ExportFormat};
use crate::gaussian::AttributeBuffer;
use crate::mesh::Mesh;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    ModelLoaded,
    Converting,
    Viewing,
}

impl PipelineState {
    pub fn name(self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::ModelLoaded => "model-loaded",
            PipelineState::Converting => "converting",
            PipelineState::Viewing => "viewing",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Conversion,
    GaussianPrepass,
    RadixSort,
    GaussianSplatting,
}

impl PassKind {
    pub const ALL: [PassKind; 4] = [
        PassKind::Conversion,
        PassKind::GaussianPrepass,
        PassKind::RadixSort,
        PassKind::GaussianSplatting,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PassKind::Conversion => "conversion",
            PassKind::GaussianPrepass => "gaussianPrepass",
            PassKind::RadixSort => "radixSort",
            PassKind::GaussianSplatting => "gaussianSplatting",
        }
    }

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Set of enabled passes.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSet(u8);

impl PassSet {
    pub const fn empty() -> Self {
        PassSet(0)
    }

    pub fn conversion() -> Self {
        Self::empty().with(PassKind::Conversion)
    }

    /// Prepass, sort and splatting.
    pub fn display() -> Self {
        Self::empty()
            .with(PassKind::GaussianPrepass)
            .with(PassKind::RadixSort)
            .with(PassKind::GaussianSplatting)
    }

    pub fn with(mut self, pass: PassKind) -> Self {
        self.insert(pass);
        self
    }

    pub fn insert(&mut self, pass: PassKind) {
        self.0 |= pass.bit();
    }

    pub fn remove(&mut self, pass: PassKind) {
        self.0 &= !pass.bit();
    }

    pub fn contains(self, pass: PassKind) -> bool {
        self.0 & pass.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = PassKind> {
        PassKind::ALL.into_iter().filter(move |p| self.contains(*p))
    }
}

impl fmt::Debug for PassSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(PassKind::name)).finish()
    }
}

/// Explicit state machine replacing ad hoc "pass enabled" flags.
#[derive(Debug, Clone)]
pub struct PipelineController {
    state: PipelineState,
    passes: PassSet,
    display_viewport: Viewport,
    conversion_viewport: Option<Viewport>,
    /// State to return to if the running conversion is aborted.
    resume: PipelineState,
}

impl PipelineController {
    pub fn new(display_viewport: Viewport) -> Self {
        Self {
            state: PipelineState::Idle,
            passes: PassSet::empty(),
            display_viewport,
            conversion_viewport: None,
            resume: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn passes(&self) -> PassSet {
        self.passes
    }

    pub fn display_viewport(&self) -> Viewport {
        self.display_viewport
    }

    /// Viewport passes should target right now.
    pub fn current_viewport(&self) -> Viewport {
        self.conversion_viewport.unwrap_or(self.display_viewport)
    }

    fn reject(&self, action: &'static str) -> SplatError {
        SplatError::InvalidTransition {
            from: self.state.name(),
            action,
        }
    }

    fn transition(&mut self, to: PipelineState, passes: PassSet) {
        debug!(from = %self.state, to = %to, passes = ?passes, "pipeline transition");
        self.state = to;
        self.passes = passes;
    }

    pub fn load_model(&mut self) -> Result<()> {
        if self.state == PipelineState::Converting {
            return Err(self.reject("load a model"));
        }
        self.conversion_viewport = None;
        self.transition(PipelineState::ModelLoaded, PassSet::empty());
        Ok(())
    }

    pub fn request_conversion(&mut self, settings: &ConversionSettings) -> Result<()> {
        match self.state {
            PipelineState::ModelLoaded | PipelineState::Viewing => {}
            _ => return Err(self.reject("start a conversion")),
        }
        self.resume = self.state;
        self.conversion_viewport = Some(Viewport::square(settings.resolution.get()));
        self.transition(PipelineState::Converting, PassSet::conversion());
        Ok(())
    }

    pub fn complete_conversion(&mut self) -> Result<()> {
        if self.state != PipelineState::Converting {
            return Err(self.reject("complete a conversion"));
        }
        self.conversion_viewport = None;
        self.transition(PipelineState::Viewing, PassSet::display());
        Ok(())
    }

    /// Leave `Converting` without a new buffer, restoring the prior state.
    pub fn abort_conversion(&mut self) -> Result<()> {
        if self.state != PipelineState::Converting {
            return Err(self.reject("abort a conversion"));
        }
        self.conversion_viewport = None;
        let passes = if self.resume == PipelineState::Viewing {
            PassSet::display()
        } else {
            PassSet::empty()
        };
        self.transition(self.resume, passes);
        Ok(())
    }

    /// Takes effect immediately, or once the running conversion finishes.
    pub fn resize_display(&mut self, viewport: Viewport) {
        self.display_viewport = viewport;
    }
}

/// Owns the controller, a backend and everything a frame needs.
pub struct Renderer<B: SplatBackend> {
    backend: B,
    controller: PipelineController,
    render: RenderSettings,
    mesh: Option<Mesh>,
    buffer: Option<AttributeBuffer>,
    conversion: Option<(ConversionSettings, ConversionStats)>,
    framebuffer: Framebuffer,
    last_frame: FrameStats,
}

impl<B: SplatBackend> Renderer<B> {
    pub fn new(backend: B, render: RenderSettings) -> Self {
        Self {
            backend,
            controller: PipelineController::new(render.viewport),
            framebuffer: Framebuffer::new(render.viewport, render.background),
            render,
            mesh: None,
            buffer: None,
            conversion: None,
            last_frame: FrameStats::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn controller(&self) -> &PipelineController {
        &self.controller
    }

    pub fn state(&self) -> PipelineState {
        self.controller.state()
    }

    pub fn render_settings(&self) -> &RenderSettings {
        &self.render
    }

    pub fn set_render_settings(&mut self, render: RenderSettings) {
        self.controller.resize_display(render.viewport);
        self.render = render;
    }

    pub fn resize_display(&mut self, viewport: Viewport) {
        self.controller.resize_display(viewport);
        self.render.viewport = viewport;
    }

    pub fn mesh(&self) -> Option<&Mesh> {
        self.mesh.as_ref()
    }

    pub fn buffer(&self) -> Option<&AttributeBuffer> {
        self.buffer.as_ref()
    }

    pub fn conversion_stats(&self) -> Option<&ConversionStats> {
        self.conversion.as_ref().map(|(_, s)| s)
    }

    pub fn last_frame(&self) -> FrameStats {
        self.last_frame
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    /// Replace the model. Drops any previous attribute buffer.
    pub fn load_model(&mut self, mesh: Mesh) -> Result<()> {
        self.controller.load_model()?;
        info!(name = %mesh.name, triangles = mesh.triangle_count(), "model loaded");
        self.mesh = Some(mesh);
        self.buffer = None;
        self.conversion = None;
        self.last_frame = FrameStats::default();
        Ok(())
    }

    /// Run one conversion. On failure the previous buffer stays in place.
    pub fn run_conversion(&mut self, settings: &ConversionSettings) -> Result<ConversionStats> {
        settings.validate()?;
        self.controller.request_conversion(settings)?;
        let result = match self.mesh.as_ref() {
            Some(mesh) => self.backend.convert(mesh, settings),
            None => Err(SplatError::Input("no model loaded".into())),
        };
        match result {
            Ok((buffer, stats)) => {
                self.buffer = Some(buffer);
                self.conversion = Some((settings.clone(), stats));
                self.last_frame = FrameStats {
                    total: stats.valid_gaussians,
                    visible: 0,
                };
                self.controller.complete_conversion()?;
                Ok(stats)
            }
            Err(e) => {
                self.controller.abort_conversion()?;
                Err(e)
            }
        }
    }

    /// Render one frame with every enabled display pass.
    pub fn render_frame(&mut self, camera: &Camera) -> Result<FrameStats> {
        if self.controller.state() != PipelineState::Viewing {
            return Err(SplatError::InvalidTransition {
                from: self.controller.state().name(),
                action: "render a frame",
            });
        }
        let Some(buffer) = self.buffer.as_ref() else {
            return Err(SplatError::RenderFailed("no attribute buffer".into()));
        };

        let passes = self.controller.passes();
        let settings = RenderSettings {
            viewport: self.controller.current_viewport(),
            ..self.render.clone()
        };
        self.framebuffer.clear(settings.viewport, settings.background);

        let mut visible = 0;
        if passes.contains(PassKind::GaussianPrepass) {
            visible = self.backend.prepass(buffer, camera, &settings)?;
        }
        if passes.contains(PassKind::RadixSort) {
            self.backend.sort()?;
        }
        if passes.contains(PassKind::GaussianSplatting) {
            self.backend.splat(&settings, &mut self.framebuffer)?;
        }

        self.last_frame = FrameStats {
            total: buffer.valid_count(),
            visible,
        };
        Ok(self.last_frame)
    }

    /// Serialize the current buffer. Requires a completed conversion.
    pub fn export<P: AsRef<Path>>(&self, path: P, format: ExportFormat) -> Result<usize> {
        if self.controller.state() != PipelineState::Viewing {
            return Err(SplatError::InvalidTransition {
                from: self.controller.state().name(),
                action: "export",
            });
        }
        let buffer = self
            .buffer
            .as_ref()
            .ok_or_else(|| SplatError::Export("no attribute buffer".into()))?;
        export::export_ply(buffer, path, format)
    }
}
