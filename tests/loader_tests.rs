#![cfg(feature = "gltf")]

use std::path::{Path, PathBuf};

use meshsplat::config::{ConversionSettings, Resolution};
use meshsplat::conversion::convert;
use meshsplat::loader::load_mesh;

fn fixture_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("meshsplat_gltf_{}_{}", std::process::id(), name));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Unit quad with UVs, a red material and a node translation of +5 on Z.
fn write_quad(dir: &Path, with_uvs: bool) -> PathBuf {
    let mut bin: Vec<u8> = Vec::new();
    for p in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]] {
        for c in p {
            bin.extend_from_slice(&c.to_le_bytes());
        }
    }
    for uv in [[0.0f32, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]] {
        for c in uv {
            bin.extend_from_slice(&c.to_le_bytes());
        }
    }
    for i in [0u16, 1, 2, 0, 2, 3] {
        bin.extend_from_slice(&i.to_le_bytes());
    }
    assert_eq!(bin.len(), 92);
    std::fs::write(dir.join("quad.bin"), &bin).unwrap();

    let attributes = if with_uvs {
        r#"{ "POSITION": 0, "TEXCOORD_0": 1 }"#
    } else {
        r#"{ "POSITION": 0 }"#
    };
    let gltf = format!(
        r#"{{
  "asset": {{ "version": "2.0" }},
  "scene": 0,
  "scenes": [{{ "nodes": [0] }}],
  "nodes": [{{ "mesh": 0, "translation": [0.0, 0.0, 5.0] }}],
  "meshes": [{{ "primitives": [{{ "attributes": {attributes}, "indices": 2, "material": 0 }}] }}],
  "materials": [{{ "pbrMetallicRoughness": {{
    "baseColorFactor": [1.0, 0.0, 0.0, 1.0], "metallicFactor": 0.25, "roughnessFactor": 0.5 }} }}],
  "buffers": [{{ "uri": "quad.bin", "byteLength": 92 }}],
  "bufferViews": [
    {{ "buffer": 0, "byteOffset": 0, "byteLength": 48 }},
    {{ "buffer": 0, "byteOffset": 48, "byteLength": 32 }},
    {{ "buffer": 0, "byteOffset": 80, "byteLength": 12 }}
  ],
  "accessors": [
    {{ "bufferView": 0, "componentType": 5126, "count": 4, "type": "VEC3",
       "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] }},
    {{ "bufferView": 1, "componentType": 5126, "count": 4, "type": "VEC2" }},
    {{ "bufferView": 2, "componentType": 5123, "count": 6, "type": "SCALAR" }}
  ]
}}"#
    );
    let path = dir.join("quad.gltf");
    std::fs::write(&path, gltf).unwrap();
    path
}

#[test]
fn test_load_quad_with_node_transform() {
    let dir = fixture_dir("quad");
    let mesh = load_mesh(write_quad(&dir, true)).unwrap();
    assert_eq!(mesh.name, "quad");
    assert_eq!(mesh.triangle_count(), 2);
    assert_eq!(mesh.materials.len(), 1);

    let bounds = mesh.bounds();
    assert!((bounds.min[2] - 5.0).abs() < 1e-6);
    assert!((bounds.max[0] - 1.0).abs() < 1e-6);

    let prim = &mesh.primitives[0];
    assert_eq!(prim.normals.len(), 4);
    assert!((prim.normals[0][2] - 1.0).abs() < 1e-5);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_loaded_material_reaches_gaussians() {
    let dir = fixture_dir("material");
    let mesh = load_mesh(write_quad(&dir, true)).unwrap();
    let settings = ConversionSettings::new().with_resolution(Resolution::new(64).unwrap());
    let (buffer, stats) = convert(&mesh, &settings);
    assert_eq!(stats.valid_gaussians, 64 * 64);
    let g = buffer.iter_valid().next().unwrap().1;
    assert_eq!(g.color, [1.0, 0.0, 0.0, 1.0]);
    assert!((g.metallic - 0.25).abs() < 1e-6);
    assert!((g.roughness - 0.5).abs() < 1e-6);
    assert!((g.position[2] - 5.0).abs() < 1e-5);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_missing_uvs_get_a_fallback_atlas() {
    let dir = fixture_dir("no_uv");
    let mesh = load_mesh(write_quad(&dir, false)).unwrap();
    assert!(mesh.primitives[0].uvs.is_some());
    let settings = ConversionSettings::new().with_resolution(Resolution::new(64).unwrap());
    let (buffer, stats) = convert(&mesh, &settings);
    assert_eq!(stats.unmapped_triangles, 0);
    assert!(buffer.valid_count() > 0);
    let _ = std::fs::remove_dir_all(&dir);
}
