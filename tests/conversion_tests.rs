use meshsplat::config::{ConversionSettings, Resolution};
use meshsplat::conversion::{convert, prepare, MAX_UV_EXTENT};
use meshsplat::math::{dot3, length3, quat_to_mat3};
use meshsplat::mesh::{Material, Mesh, Primitive, Texture};

fn settings(r: u32) -> ConversionSettings {
    ConversionSettings::new().with_resolution(Resolution::new(r).unwrap())
}

/// Unit quad in the XY plane covering the whole UV square.
fn quad(material: Material) -> Mesh {
    Mesh {
        name: "quad".into(),
        primitives: vec![Primitive {
            positions: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            normals: vec![[0.0, 0.0, 1.0]; 4],
            uvs: Some(vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]]),
            indices: vec![0, 1, 2, 0, 2, 3],
            material: 0,
        }],
        materials: vec![material],
    }
}

#[test]
fn test_cube_fills_every_texel() {
    let (buffer, stats) = convert(&Mesh::unit_cube(), &settings(64));
    assert_eq!(buffer.capacity(), 64 * 64);
    assert_eq!(stats.valid_gaussians, 64 * 64);
    assert_eq!(stats.total_triangles, 12);
    assert_eq!(stats.overwritten_texels, 0);
    assert!(!stats.reduced_coverage());
}

#[test]
fn test_conversion_is_deterministic() {
    let mesh = Mesh::unit_cube();
    let (a, _) = convert(&mesh, &settings(128));
    let (b, _) = convert(&mesh, &settings(128));
    assert_eq!(a.as_slice(), b.as_slice());
    assert_ne!(a.generation(), b.generation());
}

#[test]
fn test_gaussians_lie_on_the_surface() {
    let (buffer, _) = convert(&Mesh::unit_cube(), &settings(64));
    for (_, g) in buffer.iter_valid() {
        let on_face = g.position.iter().any(|c| (c.abs() - 0.5).abs() < 1e-4);
        assert!(on_face, "{:?} is not on a cube face", g.position);
        assert!(g.position.iter().all(|c| c.abs() <= 0.5 + 1e-4));
    }
}

#[test]
fn test_rotation_aligns_third_axis_with_normal() {
    let (buffer, _) = convert(&quad(Material::default()), &settings(64));
    for (_, g) in buffer.iter_valid() {
        let r = quat_to_mat3(g.rotation);
        assert!((dot3(r[2], [0.0, 0.0, 1.0]) - 1.0).abs() < 1e-4);
        assert!((length3(g.normal) - 1.0).abs() < 1e-4);
        // Thin along the normal.
        assert!(g.scale[2] < g.scale[0] && g.scale[2] < g.scale[1]);
    }
}

#[test]
fn test_scale_follows_texel_footprint_and_std_dev() {
    let mesh = quad(Material::default());
    let (small, _) = convert(&mesh, &settings(64));
    let (wide, _) = convert(&mesh, &settings(64).with_std_dev(2.0));
    let g = small.iter_valid().next().unwrap().1;
    // One texel of a unit quad at R = 64.
    assert!((g.scale[0] - 1.0 / 64.0).abs() < 1e-5);
    assert!((g.scale[1] - 1.0 / 64.0).abs() < 1e-5);
    let w = wide.iter_valid().next().unwrap().1;
    assert!((w.scale[0] - 2.0 * g.scale[0]).abs() < 1e-6);
}

#[test]
fn test_material_factors_and_texture_are_sampled() {
    let red = Material::default()
        .with_base_color([1.0, 0.0, 0.0, 1.0])
        .with_metallic_roughness(0.25, 0.5);
    let (buffer, _) = convert(&quad(red), &settings(64));
    let g = buffer.iter_valid().next().unwrap().1;
    assert_eq!(g.color, [1.0, 0.0, 0.0, 1.0]);
    assert!((g.metallic - 0.25).abs() < 1e-6);
    assert!((g.roughness - 0.5).abs() < 1e-6);

    let half = Material::default().with_base_color_texture(Texture::solid([255, 255, 255, 128], false));
    let (buffer, _) = convert(&quad(half), &settings(64));
    let g = buffer.iter_valid().next().unwrap().1;
    assert!((g.opacity - 128.0 / 255.0).abs() < 1e-3);
}

#[test]
fn test_missing_uvs_reduce_coverage_without_failing() {
    let mut mesh = quad(Material::default());
    mesh.primitives[0].uvs = None;
    let (buffer, stats) = convert(&mesh, &settings(64));
    assert_eq!(buffer.valid_count(), 0);
    assert_eq!(stats.unmapped_triangles, 2);
    assert!(stats.reduced_coverage());
}

#[test]
fn test_degenerate_uv_triangles_are_skipped() {
    let mut mesh = quad(Material::default());
    // Collapse the second triangle in UV space.
    mesh.primitives[0].uvs = Some(vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [1.0, 0.0]]);
    let prepared = prepare(&mesh);
    assert_eq!(prepared.triangle_count(), 2 - prepared.degenerate_triangles);
    let (buffer, stats) = convert(&mesh, &settings(64));
    assert!(stats.degenerate_triangles >= 1);
    assert!(buffer.valid_count() > 0);
    assert!(buffer.valid_count() < 64 * 64);
}

#[test]
fn test_uv_overlap_counts_overwrites() {
    let mut mesh = quad(Material::default());
    let prim = mesh.primitives[0].clone();
    mesh.primitives.push(prim);
    let (buffer, stats) = convert(&mesh, &settings(64));
    assert_eq!(buffer.valid_count(), 64 * 64);
    assert_eq!(stats.overwritten_texels, 64 * 64);
}

fn uv_triangle(uvs: [[f32; 2]; 3]) -> Mesh {
    Mesh {
        name: "tri".into(),
        primitives: vec![Primitive {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 3],
            uvs: Some(uvs.to_vec()),
            indices: vec![0, 1, 2],
            material: 0,
        }],
        materials: vec![Material::default()],
    }
}

#[test]
fn test_huge_uvs_are_dropped_not_rasterized() {
    let mesh = uv_triangle([[0.0, 0.0], [8000.0, 0.0], [0.0, 8000.0]]);
    let (buffer, stats) = convert(&mesh, &settings(2048));
    assert_eq!(buffer.valid_count(), 0);
    assert_eq!(stats.out_of_bounds_triangles, 1);
    assert!(stats.reduced_coverage());

    let nan = uv_triangle([[0.0, 0.0], [f32::NAN, 0.0], [0.0, 1.0]]);
    let (_, stats) = convert(&nan, &settings(64));
    assert_eq!(stats.out_of_bounds_triangles, 1);
}

#[test]
fn test_tiled_uvs_cover_atlas_and_wrap_texture() {
    let texture = Texture::new(2, 2, vec![200; 16], false);
    let mut mesh = uv_triangle([[0.0, 0.0], [4.0, 0.0], [0.0, 4.0]]);
    mesh.materials[0] = Material::default().with_base_color_texture(texture);
    let (buffer, stats) = convert(&mesh, &settings(64));
    assert_eq!(stats.out_of_bounds_triangles, 0);
    assert_eq!(buffer.valid_count(), 64 * 64);
    let expected = 200.0 / 255.0;
    assert!(buffer
        .iter_valid()
        .all(|(_, g)| (g.color[0] - expected).abs() < 1e-3));
    assert!(MAX_UV_EXTENT >= 4.0);
}
