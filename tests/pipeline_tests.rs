use std::cell::Cell;
use std::rc::Rc;

use meshsplat::backend::{CpuBackend, SplatBackend};
use meshsplat::camera::{Camera, Viewport};
use meshsplat::compositor::Framebuffer;
use meshsplat::config::{ConversionSettings, RenderMode, RenderSettings, Resolution};
use meshsplat::conversion::ConversionStats;
use meshsplat::error::{Result, SplatError};
use meshsplat::gaussian::AttributeBuffer;
use meshsplat::mesh::Mesh;
use meshsplat::pipeline::{PassKind, PipelineState, Renderer};

fn renderer() -> Renderer<CpuBackend> {
    let render = RenderSettings {
        viewport: Viewport::new(128, 96),
        ..RenderSettings::default()
    };
    Renderer::new(CpuBackend::new(), render)
}

fn settings(r: u32) -> ConversionSettings {
    ConversionSettings::new().with_resolution(Resolution::new(r).unwrap())
}

fn camera(mesh: &Mesh) -> Camera {
    Camera::framing(&mesh.bounds(), 30.0, 20.0, 1.0, 45.0, 128.0 / 96.0)
}

#[test]
fn test_full_cycle_load_convert_view() {
    let mesh = Mesh::unit_cube();
    let cam = camera(&mesh);
    let mut r = renderer();
    assert_eq!(r.state(), PipelineState::Idle);

    r.load_model(mesh).unwrap();
    assert_eq!(r.state(), PipelineState::ModelLoaded);

    let stats = r.run_conversion(&settings(64)).unwrap();
    assert_eq!(r.state(), PipelineState::Viewing);
    assert_eq!(stats.valid_gaussians, 64 * 64);
    let passes = r.controller().passes();
    assert!(!passes.contains(PassKind::Conversion));
    assert!(passes.contains(PassKind::GaussianSplatting));

    let frame = r.render_frame(&cam).unwrap();
    assert_eq!(frame.total, 64 * 64);
    assert!(frame.visible > 0 && frame.visible <= frame.total);
    assert_eq!(r.framebuffer().width, 128);
    assert_eq!(r.framebuffer().height, 96);
}

#[test]
fn test_rendering_before_conversion_is_rejected() {
    let mut r = renderer();
    let cam = Camera::default();
    assert!(matches!(
        r.render_frame(&cam),
        Err(SplatError::InvalidTransition { .. })
    ));
    r.load_model(Mesh::unit_cube()).unwrap();
    assert!(r.render_frame(&cam).is_err());
    assert!(r.export(std::env::temp_dir().join("never.ply"), Default::default()).is_err());
}

#[test]
fn test_reconversion_replaces_buffer() {
    let mut r = renderer();
    r.load_model(Mesh::unit_cube()).unwrap();
    r.run_conversion(&settings(64)).unwrap();
    let first = r.buffer().unwrap().generation();
    r.run_conversion(&settings(128)).unwrap();
    let buffer = r.buffer().unwrap();
    assert_ne!(buffer.generation(), first);
    assert_eq!(buffer.capacity(), 128 * 128);
    assert_eq!(r.state(), PipelineState::Viewing);
}

#[test]
fn test_loading_a_new_model_drops_the_buffer() {
    let mut r = renderer();
    r.load_model(Mesh::unit_cube()).unwrap();
    r.run_conversion(&settings(64)).unwrap();
    r.load_model(Mesh::unit_cube()).unwrap();
    assert!(r.buffer().is_none());
    assert_eq!(r.state(), PipelineState::ModelLoaded);
}

#[test]
fn test_resize_applies_to_next_frame() {
    let mesh = Mesh::unit_cube();
    let cam = camera(&mesh);
    let mut r = renderer();
    r.load_model(mesh).unwrap();
    r.run_conversion(&settings(64)).unwrap();
    r.resize_display(Viewport::new(64, 48));
    r.render_frame(&cam).unwrap();
    assert_eq!(r.framebuffer().width, 64);
    assert_eq!(r.framebuffer().height, 48);
}

#[test]
fn test_render_modes_change_the_image() {
    let mesh = Mesh::unit_cube();
    let cam = camera(&mesh);
    let mut r = renderer();
    r.load_model(mesh).unwrap();
    r.run_conversion(&settings(64)).unwrap();

    r.render_frame(&cam).unwrap();
    let albedo = r.framebuffer().pixel(64, 48).unwrap();

    let mut settings = r.render_settings().clone();
    settings.render_mode = RenderMode::Depth;
    r.set_render_settings(settings);
    r.render_frame(&cam).unwrap();
    let depth = r.framebuffer().pixel(64, 48).unwrap();

    assert_ne!(albedo, depth);
    // Depth mode is grey.
    assert!((depth[0] - depth[1]).abs() < 1e-4 && (depth[1] - depth[2]).abs() < 1e-4);
}

#[test]
fn test_zero_visible_frame_is_background() {
    let mesh = Mesh::unit_cube();
    let mut r = renderer();
    r.load_model(mesh).unwrap();
    r.run_conversion(&settings(64)).unwrap();
    // Looking away from the cube.
    let cam = Camera {
        eye: [0.0, 0.0, 5.0],
        target: [0.0, 0.0, 10.0],
        ..Camera::default()
    };
    let frame = r.render_frame(&cam).unwrap();
    assert_eq!(frame.visible, 0);
    let bg = r.render_settings().background;
    assert!(r.framebuffer().pixels.iter().all(|p| *p == bg));
}

/// CPU backend whose conversion can be switched to fail.
struct SwitchableBackend {
    inner: CpuBackend,
    fail_convert: Rc<Cell<bool>>,
}

impl SplatBackend for SwitchableBackend {
    fn name(&self) -> &'static str {
        "switchable"
    }

    fn convert(
        &mut self,
        mesh: &Mesh,
        settings: &ConversionSettings,
    ) -> Result<(AttributeBuffer, ConversionStats)> {
        if self.fail_convert.get() {
            return Err(SplatError::Resource {
                what: "attribute buffer",
                requested: 1 << 40,
                limit: 1 << 30,
            });
        }
        self.inner.convert(mesh, settings)
    }

    fn prepass(
        &mut self,
        buffer: &AttributeBuffer,
        camera: &Camera,
        settings: &RenderSettings,
    ) -> Result<usize> {
        self.inner.prepass(buffer, camera, settings)
    }

    fn sort(&mut self) -> Result<()> {
        self.inner.sort()
    }

    fn splat(&mut self, settings: &RenderSettings, target: &mut Framebuffer) -> Result<()> {
        self.inner.splat(settings, target)
    }
}

#[test]
fn test_failed_reconversion_keeps_previous_buffer() {
    let mesh = Mesh::unit_cube();
    let cam = camera(&mesh);
    let fail_convert = Rc::new(Cell::new(false));
    let backend = SwitchableBackend {
        inner: CpuBackend::new(),
        fail_convert: Rc::clone(&fail_convert),
    };
    let mut r = Renderer::new(backend, RenderSettings::default());
    r.load_model(mesh).unwrap();
    r.run_conversion(&settings(64)).unwrap();
    let generation = r.buffer().unwrap().generation();
    let before = r.render_frame(&cam).unwrap();

    fail_convert.set(true);
    let err = r.run_conversion(&settings(128)).unwrap_err();
    assert!(matches!(err, SplatError::Resource { .. }));
    assert_eq!(r.state(), PipelineState::Viewing);
    let buffer = r.buffer().unwrap();
    assert_eq!(buffer.generation(), generation);
    assert_eq!(buffer.capacity(), 64 * 64);
    assert_eq!(r.conversion_stats().unwrap().resolution, 64);
    assert!(r.controller().passes().contains(PassKind::GaussianPrepass));

    let after = r.render_frame(&cam).unwrap();
    assert_eq!(after, before);
}

#[test]
fn test_failed_first_conversion_returns_to_model_loaded() {
    let fail_convert = Rc::new(Cell::new(true));
    let backend = SwitchableBackend {
        inner: CpuBackend::new(),
        fail_convert: Rc::clone(&fail_convert),
    };
    let mut r = Renderer::new(backend, RenderSettings::default());
    r.load_model(Mesh::unit_cube()).unwrap();
    assert!(r.run_conversion(&settings(64)).is_err());
    assert_eq!(r.state(), PipelineState::ModelLoaded);
    assert!(r.buffer().is_none());

    fail_convert.set(false);
    r.run_conversion(&settings(64)).unwrap();
    assert_eq!(r.state(), PipelineState::Viewing);
}

#[test]
fn test_invalid_settings_are_rejected_before_converting() {
    let mut r = renderer();
    r.load_model(Mesh::unit_cube()).unwrap();
    r.run_conversion(&settings(64)).unwrap();
    let generation = r.buffer().unwrap().generation();

    let bad = settings(64).with_std_dev(-2.0);
    assert!(matches!(r.run_conversion(&bad), Err(SplatError::Input(_))));
    assert_eq!(r.state(), PipelineState::Viewing);
    assert_eq!(r.buffer().unwrap().generation(), generation);
}
