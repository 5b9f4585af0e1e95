//! Headless entry point: load → convert → view → export, once.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::backend::{CpuBackend, SplatBackend};
use crate::camera::Camera;
use crate::config::{PipelineConfig, Resolution};
use crate::conversion::ConversionStats;
use crate::error::{Result, SplatError};
use crate::export::ExportFormat;
use crate::mesh::Mesh;
use crate::pipeline::Renderer;

pub const USAGE: &str = "\
Usage: meshsplat <input.glb> [output.ply] [resolution] [flags...]
  input.glb    - Input GLB/GLTF mesh file
  output.ply   - Output PLY file (optional, defaults to input name with .ply extension)
  resolution   - Conversion resolution (optional, 64-2048, defaults to 512)

Flags:
  --format=N       Export layout: 0 standard 3DGS, 1 with PBR channels, 2 points
  --std-dev=F      Splat size multiplier (default 1.0)
  --render=out.png Also write a preview render of the converted splats
  --cpu            Run every pass on the CPU
  --config=path    JSON pipeline configuration";

/// Parsed command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchArgs {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    /// Raw resolution argument; validated (with fallback) at run time.
    pub resolution: Option<String>,
    pub format: Option<ExportFormat>,
    pub std_dev: Option<f32>,
    pub render: Option<PathBuf>,
    pub cpu: bool,
    pub config: Option<PathBuf>,
}

impl BatchArgs {
    pub fn new<P: Into<PathBuf>>(input: P) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run(BatchArgs),
    Help,
}

/// Parse arguments (without the program name).
pub fn parse_args<I, S>(args: I) -> Result<Command>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut positional: Vec<String> = Vec::new();
    let mut parsed = BatchArgs::default();

    for (i, arg) in args.into_iter().enumerate() {
        let arg = arg.as_ref();
        if matches!(arg, "-h" | "--help") || (i == 0 && matches!(arg, "/?" | "help")) {
            return Ok(Command::Help);
        } else if arg == "--cpu" {
            parsed.cpu = true;
        } else if let Some(v) = arg.strip_prefix("--format=") {
            let index: u32 = v
                .parse()
                .map_err(|_| SplatError::Input(format!("invalid format '{}'", v)))?;
            parsed.format = Some(ExportFormat::from_index(index)?);
        } else if let Some(v) = arg.strip_prefix("--std-dev=") {
            let std_dev: f32 = v
                .parse()
                .map_err(|_| SplatError::Input(format!("invalid std-dev '{}'", v)))?;
            if !(std_dev > 0.0 && std_dev.is_finite()) {
                return Err(SplatError::Input(format!("std-dev must be positive, got {}", v)));
            }
            parsed.std_dev = Some(std_dev);
        } else if let Some(v) = arg.strip_prefix("--render=") {
            parsed.render = Some(PathBuf::from(v));
        } else if let Some(v) = arg.strip_prefix("--config=") {
            parsed.config = Some(PathBuf::from(v));
        } else if arg.starts_with("--") {
            return Err(SplatError::Input(format!("unknown flag '{}'", arg)));
        } else {
            positional.push(arg.to_string());
        }
    }

    let mut positional = positional.into_iter();
    let Some(input) = positional.next() else {
        return Err(SplatError::Input("missing input file".into()));
    };
    parsed.input = PathBuf::from(input);
    parsed.output = positional.next().map(PathBuf::from);
    parsed.resolution = positional.next();
    if let Some(extra) = positional.next() {
        return Err(SplatError::Input(format!("unexpected argument '{}'", extra)));
    }
    Ok(Command::Run(parsed))
}

/// Same directory and stem as `input`, with the export extension.
pub fn default_output_path(input: &Path, format: ExportFormat) -> PathBuf {
    input.with_extension(format.extension())
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub output: PathBuf,
    pub resolution: Resolution,
    pub format: ExportFormat,
    /// Gaussians written to `output`.
    pub total: usize,
    /// Gaussians visible in the preview frame.
    pub visible: usize,
    pub stats: ConversionStats,
    pub preview: Option<PathBuf>,
    /// User-facing warnings raised along the way (also logged).
    pub warnings: Vec<String>,
    pub backend: &'static str,
}

/// Run one batch conversion, choosing the backend from `args`.
pub fn run(args: &BatchArgs) -> Result<BatchReport> {
    if !args.input.exists() {
        return Err(SplatError::MissingInput(args.input.clone()));
    }
    let backend = create_backend(args.cpu)?;
    let mesh = load(&args.input)?;
    run_with(backend, mesh, args)
}

fn create_backend(cpu: bool) -> Result<Box<dyn SplatBackend>> {
    if cpu {
        return Ok(Box::new(CpuBackend::new()));
    }
    #[cfg(feature = "gpu")]
    {
        Ok(Box::new(crate::gpu::GpuBackend::new()?))
    }
    #[cfg(not(feature = "gpu"))]
    {
        Ok(Box::new(CpuBackend::new()))
    }
}

fn load(path: &Path) -> Result<Mesh> {
    #[cfg(feature = "gltf")]
    {
        crate::loader::load_mesh(path)
    }
    #[cfg(not(feature = "gltf"))]
    {
        Err(SplatError::Load(format!(
            "{}: built without glTF support",
            path.display()
        )))
    }
}

/// Run the cycle on an already loaded mesh with a given backend.
pub fn run_with<B: SplatBackend>(backend: B, mesh: Mesh, args: &BatchArgs) -> Result<BatchReport> {
    let mut warnings = Vec::new();
    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };

    let mut conversion = config.conversion.clone();
    let resolution = match &args.resolution {
        Some(raw) => {
            let (r, warning) = Resolution::parse_or_default(raw);
            if let Some(w) = warning {
                warn!("{}", w);
                warnings.push(w);
            }
            r
        }
        None => conversion.resolution,
    };
    conversion.resolution = resolution;
    if let Some(format) = args.format {
        conversion = conversion.with_format(format);
    }
    if let Some(std_dev) = args.std_dev {
        conversion = conversion.with_std_dev(std_dev);
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input, conversion.format));
    info!(
        input = %args.input.display(),
        output = %output.display(),
        resolution = %resolution,
        backend = backend.name(),
        "batch conversion"
    );

    let backend_name = backend.name();
    let bounds = mesh.bounds();
    let mut renderer = Renderer::new(backend, config.render.clone());
    renderer.load_model(mesh)?;
    let stats = renderer.run_conversion(&conversion)?;
    if stats.reduced_coverage() {
        let w = format!(
            "coverage is reduced: {} triangles had degenerate UVs, {} had none, {} were out of bounds",
            stats.degenerate_triangles, stats.unmapped_triangles, stats.out_of_bounds_triangles
        );
        warn!("{}", w);
        warnings.push(w);
    }
    if stats.valid_gaussians == 0 {
        let w = "conversion produced no Gaussians; the export is empty".to_string();
        warn!("{}", w);
        warnings.push(w);
    }

    let viewport = renderer.render_settings().viewport;
    let camera = Camera::framing(&bounds, 45.0, 30.0, 1.0, 45.0, viewport.aspect());
    let frame = renderer.render_frame(&camera)?;
    if let Some(path) = &args.render {
        renderer.framebuffer().save_png(path)?;
        info!(path = %path.display(), visible = frame.visible, "wrote preview");
    }

    let total = renderer.export(&output, conversion.format)?;
    Ok(BatchReport {
        output,
        resolution,
        format: conversion.format,
        total,
        visible: frame.visible,
        stats,
        preview: args.render.clone(),
        warnings,
        backend: backend_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(args: &[&str]) -> BatchArgs {
        match parse_args(args.iter().copied()).unwrap() {
            Command::Run(a) => a,
            Command::Help => panic!("unexpected help"),
        }
    }

    #[test]
    fn positional_arguments_in_order() {
        let a = run_args(&["model.glb", "out.ply", "1024"]);
        assert_eq!(a.input, PathBuf::from("model.glb"));
        assert_eq!(a.output, Some(PathBuf::from("out.ply")));
        assert_eq!(a.resolution.as_deref(), Some("1024"));
    }

    #[test]
    fn flags_mix_with_positionals() {
        let a = run_args(&["--cpu", "model.glb", "--format=2", "--std-dev=0.5"]);
        assert!(a.cpu);
        assert_eq!(a.format, Some(ExportFormat::Points));
        assert_eq!(a.std_dev, Some(0.5));
        assert_eq!(a.output, None);
    }

    #[test]
    fn help_flag_anywhere_help_word_only_first() {
        assert_eq!(parse_args(["model.glb", "--help"]).unwrap(), Command::Help);
        assert_eq!(parse_args(["help"]).unwrap(), Command::Help);
        assert_eq!(parse_args(["/?"]).unwrap(), Command::Help);

        let a = run_args(&["model.glb", "help"]);
        assert_eq!(a.input, PathBuf::from("model.glb"));
        assert_eq!(a.output, Some(PathBuf::from("help")));
    }

    #[test]
    fn bad_flags_are_input_errors() {
        assert!(parse_args(["m.glb", "--format=9"]).is_err());
        assert!(parse_args(["m.glb", "--std-dev=-1"]).is_err());
        assert!(parse_args(["m.glb", "--bogus"]).is_err());
        assert!(parse_args(Vec::<String>::new()).is_err());
    }

    #[test]
    fn default_output_replaces_extension() {
        let out = default_output_path(Path::new("/data/models/chair.glb"), ExportFormat::Standard);
        assert_eq!(out, PathBuf::from("/data/models/chair.ply"));
    }
}
