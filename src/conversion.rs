//! Conversion pass: mesh surface → one Gaussian per covered UV texel.
//!
//! Every triangle is rasterized into the `R×R` UV grid. For each texel whose
//! center falls inside a triangle, world position, normal and material are
//! interpolated barycentrically and a Gaussian is written to the texel's
//! row-major slot. The triangle's UV→world Jacobian gives the texel footprint
//! that sizes the splat.
//!
//! Triangle setup ([`prepare`]) is shared with the GPU conversion pass, which
//! uploads the same vertex stream and per-triangle frames.

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::{ConversionSettings, Resolution};
use crate::gaussian::{AttributeBuffer, Gaussian};
use crate::math::{
    blend3, cross3, dot3, length3, mat3_to_quat, normalize3, scale3, sub3, Vec2, Vec3,
};
use crate::mesh::{Material, Mesh};
use crate::uv::DEGENERATE_UV_AREA;

/// Normal-axis scale as a fraction of the smaller tangent-plane scale.
pub const THICKNESS_RATIO: f32 = 0.01;

/// Sub-texel precision of the rasterizer (8 bits, as on GPU rasterizers).
const SUBPIXEL_BITS: u32 = 8;
const SUBPIXEL_ONE: i64 = 1 << SUBPIXEL_BITS;

/// Squared world-space area (×4) below which a triangle is dropped.
const DEGENERATE_WORLD_AREA: f32 = 1e-20;

/// Largest snapped coordinate the integer edge functions handle without
/// overflowing `i64`.
const MAX_SNAPPED: f32 = (1u32 << 29) as f32;

/// UV magnitude beyond which a triangle cannot be rasterized at
/// [`Resolution::MAX`].
pub const MAX_UV_EXTENT: f32 = MAX_SNAPPED / (Resolution::MAX * SUBPIXEL_ONE as u32) as f32;

/// Vertex fed to the conversion rasterizer. Matches the GPU vertex layout.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ConversionVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

/// Per-triangle surface frame, matching `struct TriangleFrame` in
/// `conversion.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct TriangleFrame {
    /// Unit `∂P/∂u` direction.
    pub tangent: Vec3,
    /// World length of one unit of `u` (`|∂P/∂u|`).
    pub du_len: f32,
    /// Geometric normal, used when interpolated normals vanish.
    pub face_normal: Vec3,
    /// World length of one unit of `v` (`|∂P/∂v|`).
    pub dv_len: f32,
}

impl TriangleFrame {
    /// `None` for triangles that are degenerate in UV or world space.
    pub fn new(p: [Vec3; 3], uv: [Vec2; 3]) -> Option<Self> {
        let e1 = sub3(p[1], p[0]);
        let e2 = sub3(p[2], p[0]);
        let (du1, dv1) = (uv[1][0] - uv[0][0], uv[1][1] - uv[0][1]);
        let (du2, dv2) = (uv[2][0] - uv[0][0], uv[2][1] - uv[0][1]);

        let det = du1 * dv2 - du2 * dv1;
        if det.abs() <= DEGENERATE_UV_AREA {
            return None;
        }
        let face = cross3(e1, e2);
        if dot3(face, face) <= DEGENERATE_WORLD_AREA {
            return None;
        }

        let inv = 1.0 / det;
        let dpdu = scale3(sub3(scale3(e1, dv2), scale3(e2, dv1)), inv);
        let dpdv = scale3(sub3(scale3(e2, du1), scale3(e1, du2)), inv);

        Some(Self {
            tangent: normalize3(dpdu),
            du_len: length3(dpdu),
            face_normal: normalize3(face),
            dv_len: length3(dpdv),
        })
    }
}

/// Contiguous run of triangles sharing one material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub material: usize,
    pub first_triangle: u32,
    pub triangle_count: u32,
}

/// Mesh flattened into a de-indexed triangle stream ready for rasterization.
#[derive(Debug, Clone, Default)]
pub struct PreparedMesh {
    /// Three vertices per triangle.
    pub vertices: Vec<ConversionVertex>,
    /// One frame per triangle.
    pub frames: Vec<TriangleFrame>,
    pub batches: Vec<Batch>,
    pub total_triangles: usize,
    /// Triangles dropped for zero UV or world area.
    pub degenerate_triangles: usize,
    /// Triangles dropped because their primitive had no UVs.
    pub unmapped_triangles: usize,
    /// Triangles dropped for non-finite UVs or UVs beyond [`MAX_UV_EXTENT`].
    pub out_of_bounds_triangles: usize,
}

impl PreparedMesh {
    pub fn triangle_count(&self) -> usize {
        self.frames.len()
    }

    pub fn triangle(&self, t: usize) -> [ConversionVertex; 3] {
        [
            self.vertices[t * 3],
            self.vertices[t * 3 + 1],
            self.vertices[t * 3 + 2],
        ]
    }
}

pub fn prepare(mesh: &Mesh) -> PreparedMesh {
    let mut out = PreparedMesh::default();

    for prim in &mesh.primitives {
        let count = prim.triangle_count();
        out.total_triangles += count;
        let Some(uvs) = prim.uvs.as_ref() else {
            out.unmapped_triangles += count;
            continue;
        };

        let first = out.frames.len() as u32;
        for t in 0..count {
            let Some(tri) = prim.triangle(t) else {
                out.degenerate_triangles += 1;
                continue;
            };
            let (Some(&a), Some(&b), Some(&c)) = (uvs.get(tri[0]), uvs.get(tri[1]), uvs.get(tri[2]))
            else {
                out.degenerate_triangles += 1;
                continue;
            };
            if ![a, b, c].iter().flatten().all(|v| v.is_finite() && v.abs() <= MAX_UV_EXTENT) {
                out.out_of_bounds_triangles += 1;
                continue;
            }
            let p = tri.map(|v| prim.positions[v]);
            let Some(frame) = TriangleFrame::new(p, [a, b, c]) else {
                out.degenerate_triangles += 1;
                continue;
            };
            let uv = [a, b, c];
            for k in 0..3 {
                let normal = prim
                    .normals
                    .get(tri[k])
                    .copied()
                    .unwrap_or(frame.face_normal);
                out.vertices.push(ConversionVertex {
                    position: p[k],
                    normal,
                    uv: uv[k],
                });
            }
            out.frames.push(frame);
        }
        let emitted = out.frames.len() as u32 - first;
        if emitted > 0 {
            out.batches.push(Batch {
                material: prim.material,
                first_triangle: first,
                triangle_count: emitted,
            });
        }
    }
    out
}

/// Texel covered by a triangle plus the barycentric weights at its center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fragment {
    pub x: u32,
    pub y: u32,
    pub weights: Vec3,
}

fn edge(a: (i64, i64), b: (i64, i64), p: (i64, i64)) -> i64 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

/// Top-left fill rule for positively oriented triangles in y-down texel space.
fn is_top_left(a: (i64, i64), b: (i64, i64)) -> bool {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    (dy == 0 && dx > 0) || dy < 0
}

/// Texels whose centers lie inside the UV triangle, under the top-left rule.
///
/// Vertices are snapped to an 8-bit sub-texel grid so edge tests are exact
/// integers: a texel center on an edge shared by two triangles belongs to
/// exactly one of them. Triangles reaching past the fixed-point range produce
/// nothing.
pub fn rasterize(uv: [Vec2; 3], resolution: u32) -> Vec<Fragment> {
    let r = resolution as f32;
    let scale = r * SUBPIXEL_ONE as f32;
    if !uv.iter().flatten().all(|v| (v * scale).abs() <= MAX_SNAPPED) {
        return Vec::new();
    }
    let snap = |v: Vec2| -> (i64, i64) { ((v[0] * scale).round() as i64, (v[1] * scale).round() as i64) };
    let mut p = [snap(uv[0]), snap(uv[1]), snap(uv[2])];
    let mut order = [0usize, 1, 2];

    let mut area = edge(p[0], p[1], p[2]);
    if area == 0 {
        return Vec::new();
    }
    if area < 0 {
        p.swap(1, 2);
        order.swap(1, 2);
        area = -area;
    }

    let half = SUBPIXEL_ONE / 2;
    let min_x = p.iter().map(|v| v.0).min().unwrap_or(0);
    let max_x = p.iter().map(|v| v.0).max().unwrap_or(0);
    let min_y = p.iter().map(|v| v.1).min().unwrap_or(0);
    let max_y = p.iter().map(|v| v.1).max().unwrap_or(0);

    // Texel x has its center at x*ONE + ONE/2.
    let to_texel_lo = |v: i64| ((v - half) as f64 / SUBPIXEL_ONE as f64).ceil() as i64;
    let to_texel_hi = |v: i64| ((v - half) as f64 / SUBPIXEL_ONE as f64).floor() as i64;
    let x_lo = to_texel_lo(min_x).max(0);
    let x_hi = to_texel_hi(max_x).min(resolution as i64 - 1);
    let y_lo = to_texel_lo(min_y).max(0);
    let y_hi = to_texel_hi(max_y).min(resolution as i64 - 1);
    if x_lo > x_hi || y_lo > y_hi {
        return Vec::new();
    }

    let bias = [
        !is_top_left(p[1], p[2]),
        !is_top_left(p[2], p[0]),
        !is_top_left(p[0], p[1]),
    ];
    let inv_area = 1.0 / area as f32;

    let mut out = Vec::new();
    for y in y_lo..=y_hi {
        let cy = y * SUBPIXEL_ONE + half;
        for x in x_lo..=x_hi {
            let c = (x * SUBPIXEL_ONE + half, cy);
            let w = [edge(p[1], p[2], c), edge(p[2], p[0], c), edge(p[0], p[1], c)];
            let inside = w
                .iter()
                .zip(bias)
                .all(|(&e, reject_zero)| e > 0 || (e == 0 && !reject_zero));
            if !inside {
                continue;
            }
            let mut weights = [0.0f32; 3];
            for k in 0..3 {
                weights[order[k]] = w[k] as f32 * inv_area;
            }
            out.push(Fragment {
                x: x as u32,
                y: y as u32,
                weights,
            });
        }
    }
    out
}

/// Orthonormal splat frame: tangent projected onto the shading normal's plane.
fn splat_basis(normal: Vec3, tangent: Vec3) -> [Vec3; 3] {
    let n = normal;
    let mut t = sub3(tangent, scale3(n, dot3(n, tangent)));
    if dot3(t, t) < 1e-12 {
        // Tangent parallel to the normal; any perpendicular axis will do.
        let helper = if n[0].abs() < 0.9 {
            [1.0, 0.0, 0.0]
        } else {
            [0.0, 1.0, 0.0]
        };
        t = cross3(helper, n);
    }
    let t = normalize3(t);
    let b = cross3(n, t);
    [t, b, n]
}

/// Build the Gaussian for one covered texel.
pub fn shade_fragment(
    tri: &[ConversionVertex; 3],
    frame: &TriangleFrame,
    material: &Material,
    weights: Vec3,
    settings: &ConversionSettings,
) -> Gaussian {
    let r = settings.resolution.get() as f32;
    let position = blend3(tri[0].position, tri[1].position, tri[2].position, weights);
    let mut normal = normalize3(blend3(tri[0].normal, tri[1].normal, tri[2].normal, weights));
    if dot3(normal, normal) < 0.5 {
        normal = frame.face_normal;
    }
    let uv = [
        tri[0].uv[0] * weights[0] + tri[1].uv[0] * weights[1] + tri[2].uv[0] * weights[2],
        tri[0].uv[1] * weights[0] + tri[1].uv[1] * weights[1] + tri[2].uv[1] * weights[2],
    ];
    let sample = material.sample(uv);

    let su = settings.std_dev * frame.du_len / r;
    let sv = settings.std_dev * frame.dv_len / r;
    let basis = splat_basis(normal, frame.tangent);

    Gaussian {
        position,
        valid: 1,
        scale: [su, sv, THICKNESS_RATIO * su.min(sv)],
        opacity: (sample.base_color[3] * settings.opacity).clamp(0.0, 1.0),
        rotation: mat3_to_quat(&basis),
        color: sample.base_color,
        normal,
        metallic: sample.metallic,
        roughness: sample.roughness,
        _pad: [0.0; 3],
    }
}

/// Outcome of one conversion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionStats {
    pub resolution: u32,
    pub total_triangles: usize,
    pub degenerate_triangles: usize,
    pub unmapped_triangles: usize,
    pub out_of_bounds_triangles: usize,
    /// Texel writes that landed on an already-written slot (UV overlap).
    pub overwritten_texels: usize,
    /// Number of valid Gaussians produced.
    pub valid_gaussians: usize,
}

impl ConversionStats {
    /// Triangles that produced no Gaussians because of UV problems.
    pub fn reduced_coverage(&self) -> bool {
        self.degenerate_triangles > 0
            || self.unmapped_triangles > 0
            || self.out_of_bounds_triangles > 0
    }
}

/// Run the conversion pass on the CPU.
///
/// Triangles are rasterized in parallel, then written in mesh order so that on
/// UV overlap the later triangle wins deterministically.
pub fn convert(mesh: &Mesh, settings: &ConversionSettings) -> (AttributeBuffer, ConversionStats) {
    let prepared = prepare(mesh);
    convert_prepared(mesh, &prepared, settings)
}

pub fn convert_prepared(
    mesh: &Mesh,
    prepared: &PreparedMesh,
    settings: &ConversionSettings,
) -> (AttributeBuffer, ConversionStats) {
    let resolution: Resolution = settings.resolution;
    let r = resolution.get();

    let per_triangle: Vec<Vec<(usize, Gaussian)>> = prepared
        .batches
        .par_iter()
        .flat_map_iter(|batch| {
            let first = batch.first_triangle as usize;
            (first..first + batch.triangle_count as usize).map(move |t| (batch.material, t))
        })
        .map(|(material, t)| {
            let tri = prepared.triangle(t);
            let frame = &prepared.frames[t];
            let material = mesh.material(material);
            rasterize([tri[0].uv, tri[1].uv, tri[2].uv], r)
                .into_iter()
                .map(|f| {
                    let index = f.y as usize * r as usize + f.x as usize;
                    (index, shade_fragment(&tri, frame, material, f.weights, settings))
                })
                .collect()
        })
        .collect();

    let mut slots = vec![Gaussian::INVALID; resolution.capacity()];
    let mut overwritten = 0usize;
    for (index, g) in per_triangle.into_iter().flatten() {
        if slots[index].is_valid() {
            overwritten += 1;
        }
        slots[index] = g;
    }

    let buffer = AttributeBuffer::from_slots(resolution, slots);
    let stats = ConversionStats {
        resolution: r,
        total_triangles: prepared.total_triangles,
        degenerate_triangles: prepared.degenerate_triangles,
        unmapped_triangles: prepared.unmapped_triangles,
        out_of_bounds_triangles: prepared.out_of_bounds_triangles,
        overwritten_texels: overwritten,
        valid_gaussians: buffer.valid_count(),
    };
    if overwritten > 0 {
        debug!(overwritten, "UV atlas overlaps; later triangles won");
    }
    info!(
        resolution = r,
        gaussians = stats.valid_gaussians,
        degenerate = stats.degenerate_triangles,
        unmapped = stats.unmapped_triangles,
        out_of_bounds = stats.out_of_bounds_triangles,
        "conversion finished"
    );
    (buffer, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_square_covers_every_texel_once() {
        let r = 64;
        let a = rasterize([[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]], r);
        let b = rasterize([[0.0, 0.0], [1.0, 1.0], [0.0, 1.0]], r);
        let mut hits = vec![0u32; (r * r) as usize];
        for f in a.iter().chain(b.iter()) {
            hits[(f.y * r + f.x) as usize] += 1;
        }
        assert!(hits.iter().all(|&h| h == 1));
    }

    #[test]
    fn winding_does_not_change_coverage() {
        let cw = rasterize([[0.1, 0.1], [0.9, 0.2], [0.4, 0.8]], 64);
        let ccw = rasterize([[0.1, 0.1], [0.4, 0.8], [0.9, 0.2]], 64);
        assert_eq!(cw.len(), ccw.len());
        assert!(!cw.is_empty());
    }

    #[test]
    fn barycentrics_sum_to_one_and_follow_vertices() {
        let uv = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        for f in rasterize(uv, 64) {
            let sum: f32 = f.weights.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
            let u = f.weights[1];
            let expected = (f.x as f32 + 0.5) / 64.0;
            assert!((u - expected).abs() < 1e-2);
        }
    }

    #[test]
    fn degenerate_uv_triangle_has_no_fragments() {
        assert!(rasterize([[0.2, 0.2], [0.4, 0.4], [0.6, 0.6]], 128).is_empty());
    }

    #[test]
    fn triangle_outside_atlas_is_clipped() {
        assert!(rasterize([[1.5, 1.5], [2.0, 1.5], [1.5, 2.0]], 64).is_empty());
    }

    #[test]
    fn coordinates_past_fixed_point_range_produce_nothing() {
        assert!(rasterize([[0.0, 0.0], [8000.0, 0.0], [0.0, 8000.0]], 2048).is_empty());
        assert!(rasterize([[0.0, 0.0], [f32::NAN, 0.0], [0.0, 1.0]], 64).is_empty());
        assert!(rasterize([[0.0, 0.0], [f32::MAX, 0.0], [0.0, -f32::MAX]], 64).is_empty());
    }

    #[test]
    fn tiled_triangle_within_range_covers_atlas() {
        let r = 64;
        let hits = rasterize([[0.0, 0.0], [MAX_UV_EXTENT, 0.0], [0.0, MAX_UV_EXTENT]], r);
        assert_eq!(hits.len(), (r * r) as usize);
    }

    #[test]
    fn frame_measures_uv_jacobian() {
        // A 2x1 world quad half mapped onto the full UV square.
        let frame = TriangleFrame::new(
            [[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
        )
        .unwrap();
        assert!((frame.du_len - 2.0).abs() < 1e-5);
        assert!((frame.dv_len - 1.0).abs() < 1e-5);
        assert!((frame.tangent[0] - 1.0).abs() < 1e-5);
        assert!((frame.face_normal[2] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn splat_basis_is_orthonormal() {
        let [t, b, n] = splat_basis(normalize3([0.0, 1.0, 1.0]), [1.0, 0.5, 0.0]);
        assert!(dot3(t, n).abs() < 1e-5);
        assert!(dot3(b, n).abs() < 1e-5);
        assert!(dot3(t, b).abs() < 1e-5);
        assert!((length3(b) - 1.0).abs() < 1e-5);
    }
}
