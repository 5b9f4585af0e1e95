//! UV atlas checks and the fallback unwrapper.
//!
//! The conversion pass needs a non-overlapping UV atlas. Meshes that arrive
//! without texture coordinates get a per-triangle grid atlas here so they
//! still convert; triangles whose UVs are degenerate simply produce no
//! Gaussians and are counted.

use crate::math::Vec2;
use crate::mesh::Primitive;

/// Twice the signed UV-space area below which a triangle is treated as degenerate.
pub const DEGENERATE_UV_AREA: f32 = 1e-12;

/// Fraction of a grid cell left empty around each fallback triangle.
const CELL_GUTTER: f32 = 0.05;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UvReport {
    pub triangles: usize,
    /// Zero-area triangles in UV space.
    pub degenerate: usize,
    /// Triangles with at least one coordinate outside `[0, 1]`.
    pub out_of_range: usize,
    /// The primitive had no UV channel at all.
    pub missing: bool,
}

impl UvReport {
    pub fn is_clean(&self) -> bool {
        !self.missing && self.degenerate == 0 && self.out_of_range == 0
    }
}

pub fn signed_area2(a: Vec2, b: Vec2, c: Vec2) -> f32 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

pub fn validate(primitive: &Primitive) -> UvReport {
    let triangles = primitive.triangle_count();
    let Some(uvs) = primitive.uvs.as_ref() else {
        return UvReport {
            triangles,
            missing: true,
            ..Default::default()
        };
    };

    let mut report = UvReport {
        triangles,
        ..Default::default()
    };
    for t in 0..triangles {
        let Some([a, b, c]) = primitive.triangle(t) else {
            report.degenerate += 1;
            continue;
        };
        let (Some(&ua), Some(&ub), Some(&uc)) = (uvs.get(a), uvs.get(b), uvs.get(c)) else {
            report.degenerate += 1;
            continue;
        };
        if signed_area2(ua, ub, uc).abs() <= DEGENERATE_UV_AREA {
            report.degenerate += 1;
        }
        if [ua, ub, uc]
            .iter()
            .any(|uv| !(0.0..=1.0).contains(&uv[0]) || !(0.0..=1.0).contains(&uv[1]))
        {
            report.out_of_range += 1;
        }
    }
    report
}

/// Give every triangle its own region of a square grid atlas.
///
/// Vertices are de-indexed first since neighbouring triangles no longer share
/// UVs. Two triangles share each cell, split along the cell's anti-diagonal.
/// Texel density follows the grid, not the triangle's world-space size.
pub fn unwrap_per_triangle(primitive: &mut Primitive) {
    let triangles: Vec<[usize; 3]> = (0..primitive.triangle_count())
        .filter_map(|t| primitive.triangle(t))
        .collect();

    let cells = triangles.len().div_ceil(2).max(1);
    let cols = (cells as f64).sqrt().ceil() as usize;
    let cell = 1.0 / cols as f32;
    let g = cell * CELL_GUTTER;

    let mut positions = Vec::with_capacity(triangles.len() * 3);
    let mut normals = Vec::with_capacity(triangles.len() * 3);
    let mut uvs = Vec::with_capacity(triangles.len() * 3);
    let has_normals = primitive.normals.len() == primitive.positions.len();

    for (t, tri) in triangles.iter().enumerate() {
        let c = t / 2;
        let x0 = (c % cols) as f32 * cell;
        let y0 = (c / cols) as f32 * cell;
        let (x1, y1) = (x0 + cell, y0 + cell);
        let corners: [Vec2; 3] = if t % 2 == 0 {
            [[x0 + g, y0 + g], [x1 - 2.0 * g, y0 + g], [x0 + g, y1 - 2.0 * g]]
        } else {
            [[x1 - g, y1 - g], [x0 + 2.0 * g, y1 - g], [x1 - g, y0 + 2.0 * g]]
        };
        for (k, &v) in tri.iter().enumerate() {
            positions.push(primitive.positions[v]);
            if has_normals {
                normals.push(primitive.normals[v]);
            }
            uvs.push(corners[k]);
        }
    }

    primitive.indices = (0..positions.len() as u32).collect();
    primitive.positions = positions;
    primitive.uvs = Some(uvs);
    if has_normals {
        primitive.normals = normals;
    } else {
        primitive.generate_normals();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;

    #[test]
    fn cube_atlas_is_clean() {
        let cube = Mesh::unit_cube();
        let report = validate(&cube.primitives[0]);
        assert_eq!(report.triangles, 12);
        assert!(report.is_clean(), "{:?}", report);
    }

    #[test]
    fn missing_uvs_are_reported() {
        let mut prim = Mesh::unit_cube().primitives.remove(0);
        prim.uvs = None;
        assert!(validate(&prim).missing);
    }

    #[test]
    fn collapsed_uvs_are_degenerate() {
        let mut prim = Mesh::unit_cube().primitives.remove(0);
        prim.uvs = Some(vec![[0.25, 0.25]; prim.positions.len()]);
        let report = validate(&prim);
        assert_eq!(report.degenerate, 12);
    }

    #[test]
    fn fallback_unwrap_produces_disjoint_in_range_triangles() {
        let mut prim = Mesh::unit_cube().primitives.remove(0);
        prim.uvs = None;
        unwrap_per_triangle(&mut prim);
        let report = validate(&prim);
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(prim.positions.len(), 36);
        assert_eq!(prim.normals.len(), 36);
    }
}
