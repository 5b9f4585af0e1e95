//! PLY serialization of the attribute buffer.
//!
//! Only valid Gaussians are written. Files are binary little-endian and are
//! written atomically: the data goes to a sibling temp file which is renamed
//! over the destination once complete.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SplatError};
use crate::gaussian::{AttributeBuffer, Gaussian};
use crate::mesh::linear_to_srgb;

/// Zeroth-order spherical harmonic basis constant.
pub const SH_C0: f32 = 0.282_094_8;

/// Attribute layout written by the exporter, selected by integer in the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// 3DGS layout readable by standard splat viewers.
    #[default]
    Standard,
    /// Standard plus `metallic` and `roughness`.
    Pbr,
    /// Position and 8-bit color only.
    Points,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Standard, ExportFormat::Pbr, ExportFormat::Points];

    pub fn from_index(index: u32) -> Result<Self> {
        Self::ALL
            .get(index as usize)
            .copied()
            .ok_or_else(|| SplatError::Input(format!("unknown export format {}", index)))
    }

    pub fn as_index(self) -> u32 {
        match self {
            ExportFormat::Standard => 0,
            ExportFormat::Pbr => 1,
            ExportFormat::Points => 2,
        }
    }

    pub fn extension(self) -> &'static str {
        "ply"
    }

    fn properties(self) -> &'static [(&'static str, &'static str)] {
        const STANDARD: &[(&str, &str)] = &[
            ("float", "x"),
            ("float", "y"),
            ("float", "z"),
            ("float", "nx"),
            ("float", "ny"),
            ("float", "nz"),
            ("float", "f_dc_0"),
            ("float", "f_dc_1"),
            ("float", "f_dc_2"),
            ("float", "opacity"),
            ("float", "scale_0"),
            ("float", "scale_1"),
            ("float", "scale_2"),
            ("float", "rot_0"),
            ("float", "rot_1"),
            ("float", "rot_2"),
            ("float", "rot_3"),
        ];
        const PBR: &[(&str, &str)] = &[
            ("float", "x"),
            ("float", "y"),
            ("float", "z"),
            ("float", "nx"),
            ("float", "ny"),
            ("float", "nz"),
            ("float", "f_dc_0"),
            ("float", "f_dc_1"),
            ("float", "f_dc_2"),
            ("float", "opacity"),
            ("float", "scale_0"),
            ("float", "scale_1"),
            ("float", "scale_2"),
            ("float", "rot_0"),
            ("float", "rot_1"),
            ("float", "rot_2"),
            ("float", "rot_3"),
            ("float", "metallic"),
            ("float", "roughness"),
        ];
        const POINTS: &[(&str, &str)] = &[
            ("float", "x"),
            ("float", "y"),
            ("float", "z"),
            ("uchar", "red"),
            ("uchar", "green"),
            ("uchar", "blue"),
        ];
        match self {
            ExportFormat::Standard => STANDARD,
            ExportFormat::Pbr => PBR,
            ExportFormat::Points => POINTS,
        }
    }

    /// Bytes per vertex record.
    pub fn stride(self) -> usize {
        self.properties()
            .iter()
            .map(|(ty, _)| if *ty == "uchar" { 1 } else { 4 })
            .sum()
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExportFormat::Standard => "standard",
            ExportFormat::Pbr => "pbr",
            ExportFormat::Points => "points",
        };
        write!(f, "{}", name)
    }
}

fn logit(p: f32) -> f32 {
    let p = p.clamp(1e-6, 1.0 - 1e-6);
    (p / (1.0 - p)).ln()
}

fn sh_dc(c: f32) -> f32 {
    (linear_to_srgb(c) - 0.5) / SH_C0
}

fn write_vertex<W: Write>(w: &mut W, g: &Gaussian, format: ExportFormat) -> std::io::Result<()> {
    let mut put = |v: f32| w.write_all(&v.to_le_bytes());
    put(g.position[0])?;
    put(g.position[1])?;
    put(g.position[2])?;
    if format == ExportFormat::Points {
        let rgb = [
            (linear_to_srgb(g.color[0]) * 255.0).round() as u8,
            (linear_to_srgb(g.color[1]) * 255.0).round() as u8,
            (linear_to_srgb(g.color[2]) * 255.0).round() as u8,
        ];
        return w.write_all(&rgb);
    }

    for v in g.normal {
        put(v)?;
    }
    for c in &g.color[..3] {
        put(sh_dc(*c))?;
    }
    put(logit(g.opacity))?;
    for s in g.scale {
        put(s.max(1e-12).ln())?;
    }
    let [x, y, z, qw] = g.rotation;
    for v in [qw, x, y, z] {
        put(v)?;
    }
    if format == ExportFormat::Pbr {
        put(g.metallic)?;
        put(g.roughness)?;
    }
    Ok(())
}

/// Write the PLY stream for `buffer` into `w`. Returns the vertex count.
pub fn write_ply<W: Write>(w: &mut W, buffer: &AttributeBuffer, format: ExportFormat) -> Result<usize> {
    let count = buffer.valid_count();
    let mut header = String::new();
    header.push_str("ply\nformat binary_little_endian 1.0\n");
    header.push_str(&format!("comment meshsplat {} format\n", format));
    header.push_str(&format!("element vertex {}\n", count));
    for (ty, name) in format.properties() {
        header.push_str(&format!("property {} {}\n", ty, name));
    }
    header.push_str("end_header\n");
    w.write_all(header.as_bytes())?;

    for (_, g) in buffer.iter_valid() {
        write_vertex(w, g, format)?;
    }
    Ok(count)
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());
    path.with_file_name(format!(".{}.partial", name))
}

/// Export `buffer` to `path`. Returns the number of points written.
///
/// An empty buffer yields a valid PLY with zero vertices. On failure nothing
/// is left at `path` from this call.
pub fn export_ply<P: AsRef<Path>>(buffer: &AttributeBuffer, path: P, format: ExportFormat) -> Result<usize> {
    let path = path.as_ref();
    if buffer.valid_count() == 0 {
        warn!(path = %path.display(), "exporting an empty splat cloud");
    }
    let tmp = temp_path(path);

    let result = (|| -> Result<usize> {
        let file = File::create(&tmp)?;
        let mut w = BufWriter::new(file);
        let count = write_ply(&mut w, buffer, format)?;
        w.flush()?;
        w.get_ref().sync_all()?;
        drop(w);
        fs::rename(&tmp, path)?;
        Ok(count)
    })();

    match result {
        Ok(count) => {
            info!(path = %path.display(), count, %format, "exported splats");
            Ok(count)
        }
        Err(e) => {
            if tmp.exists() {
                if let Err(rm) = fs::remove_file(&tmp) {
                    warn!(path = %tmp.display(), error = %rm, "failed to remove partial export");
                }
            }
            Err(match e {
                SplatError::Io(io) => SplatError::Export(format!("{}: {}", path.display(), io)),
                other => other,
            })
        }
    }
}

/// Vertex count declared in a PLY header.
pub fn read_ply_vertex_count<P: AsRef<Path>>(path: P) -> Result<usize> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    for line in reader.split(b'\n') {
        let line = line?;
        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if let Some(rest) = text.strip_prefix("element vertex ") {
            return rest
                .trim()
                .parse()
                .map_err(|_| SplatError::Export(format!("bad vertex count '{}'", rest)));
        }
        if text == "end_header" {
            break;
        }
    }
    Err(SplatError::Export("PLY header has no vertex element".into()))
}
