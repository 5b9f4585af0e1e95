//! GLB/glTF loading into the in-memory [`Mesh`] model.
//!
//! Every triangle primitive reachable from the default scene is flattened with
//! its node transform baked in. Primitives without texture coordinates get the
//! fallback per-triangle atlas so they still convert.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{Result, SplatError};
use crate::math::{mat4_mul, Mat4, MAT4_IDENTITY};
use crate::mesh::{Material, Mesh, Primitive, Texture};
use crate::uv;

/// Load every mesh in the default scene of a `.glb`/`.gltf` file.
pub fn load_mesh<P: AsRef<Path>>(path: P) -> Result<Mesh> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SplatError::MissingInput(path.to_path_buf()));
    }

    let (document, buffers, images) =
        gltf::import(path).map_err(|e| SplatError::Load(format!("{}: {}", path.display(), e)))?;

    let materials: Vec<Material> = document
        .materials()
        .map(|m| convert_material(&m, &images))
        .collect();

    let mut mesh = Mesh {
        name: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        primitives: Vec::new(),
        materials,
    };

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| SplatError::Load(format!("{}: file has no scene", path.display())))?;

    let mut stack: Vec<(gltf::Node, Mat4)> =
        scene.nodes().map(|n| (n, MAT4_IDENTITY)).collect();
    while let Some((node, parent)) = stack.pop() {
        let world = mat4_mul(parent, node.transform().matrix());
        if let Some(m) = node.mesh() {
            for prim in m.primitives() {
                if let Some(p) = read_primitive(&prim, &buffers, &world)? {
                    mesh.primitives.push(p);
                }
            }
        }
        stack.extend(node.children().map(|c| (c, world)));
    }

    if mesh.triangle_count() == 0 {
        return Err(SplatError::Load(format!(
            "{}: no triangle geometry in default scene",
            path.display()
        )));
    }
    info!(
        path = %path.display(),
        primitives = mesh.primitives.len(),
        triangles = mesh.triangle_count(),
        materials = mesh.materials.len(),
        "loaded mesh"
    );
    Ok(mesh)
}

fn read_primitive(
    prim: &gltf::Primitive,
    buffers: &[gltf::buffer::Data],
    world: &Mat4,
) -> Result<Option<Primitive>> {
    if prim.mode() != gltf::mesh::Mode::Triangles {
        debug!(mode = ?prim.mode(), "skipping non-triangle primitive");
        return Ok(None);
    }
    let reader = prim.reader(|b| buffers.get(b.index()).map(|d| &d.0[..]));

    let Some(positions) = reader.read_positions() else {
        return Err(SplatError::Load("primitive has no POSITION attribute".into()));
    };
    let positions: Vec<[f32; 3]> = positions.collect();
    let normals: Vec<[f32; 3]> = reader
        .read_normals()
        .map(|n| n.collect())
        .unwrap_or_default();
    let uvs: Option<Vec<[f32; 2]>> = reader.read_tex_coords(0).map(|t| t.into_f32().collect());
    let indices: Vec<u32> = match reader.read_indices() {
        Some(i) => i.into_u32().collect(),
        None => (0..positions.len() as u32).collect(),
    };

    let mut out = Primitive {
        normals: if normals.len() == positions.len() {
            normals
        } else {
            Vec::new()
        },
        positions,
        uvs,
        indices,
        material: prim.material().index().unwrap_or(usize::MAX),
    };
    if out.normals.is_empty() {
        out.generate_normals();
    }
    out.apply_transform(world);

    let report = uv::validate(&out);
    if report.missing {
        warn!(
            triangles = report.triangles,
            "primitive has no texture coordinates; generating a per-triangle atlas"
        );
        uv::unwrap_per_triangle(&mut out);
    } else if !report.is_clean() {
        warn!(
            degenerate = report.degenerate,
            out_of_range = report.out_of_range,
            "primitive UVs are not a clean atlas; coverage will be reduced"
        );
    }
    Ok(Some(out))
}

fn convert_material(m: &gltf::Material, images: &[gltf::image::Data]) -> Material {
    let pbr = m.pbr_metallic_roughness();
    let texture = |info: Option<gltf::texture::Info>, srgb: bool| -> Option<Texture> {
        let info = info?;
        let data = images.get(info.texture().source().index())?;
        let tex = to_rgba8(data, srgb);
        if tex.is_none() {
            warn!(format = ?data.format, "unsupported texture format; using factor only");
        }
        tex
    };

    Material {
        name: m.name().unwrap_or("material").to_string(),
        base_color_factor: pbr.base_color_factor(),
        base_color_texture: texture(pbr.base_color_texture(), true),
        metallic_factor: pbr.metallic_factor(),
        roughness_factor: pbr.roughness_factor(),
        metallic_roughness_texture: texture(pbr.metallic_roughness_texture(), false),
    }
}

/// Expand any 8-bit glTF image to RGBA8.
fn to_rgba8(data: &gltf::image::Data, srgb: bool) -> Option<Texture> {
    use gltf::image::Format;

    let px = &data.pixels;
    let pixels: Vec<u8> = match data.format {
        Format::R8G8B8A8 => px.clone(),
        Format::R8G8B8 => px
            .chunks_exact(3)
            .flat_map(|c| [c[0], c[1], c[2], 255])
            .collect(),
        Format::R8G8 => px
            .chunks_exact(2)
            .flat_map(|c| [c[0], c[1], 0, 255])
            .collect(),
        Format::R8 => px.iter().flat_map(|&v| [v, v, v, 255]).collect(),
        _ => return None,
    };
    Some(Texture::new(data.width, data.height, pixels, srgb))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_reported_as_missing_input() {
        let err = load_mesh("/definitely/not/here.glb").unwrap_err();
        assert!(matches!(err, SplatError::MissingInput(_)));
    }

    #[test]
    fn garbage_file_is_a_load_error() {
        let path = std::env::temp_dir().join(format!("meshsplat_garbage_{}.glb", std::process::id()));
        std::fs::write(&path, b"not a gltf file").unwrap();
        let err = load_mesh(&path).unwrap_err();
        assert!(matches!(err, SplatError::Load(_)), "{:?}", err);
        let _ = std::fs::remove_file(&path);
    }
}
