//! Per-frame projection of Gaussians to screen space, with culling.
//!
//! Each valid Gaussian's 3D covariance is projected through the perspective
//! Jacobian (EWA splatting) to a 2D covariance, stored inverted as a conic.
//! Survivors are compacted in ascending slot order together with their depth
//! sort keys.

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use crate::camera::{Camera, Viewport};
use crate::config::RenderMode;
use crate::gaussian::{AttributeBuffer, Gaussian};
use crate::math::{mat4_to_mat3, transform_point, Mat3, Mat4, Vec4};
use crate::sort::depth_key;

/// Low-pass filter added to the 2D covariance diagonal (px²).
pub const COVARIANCE_DILATION: f32 = 0.3;
/// Footprint radius in standard deviations.
pub const RADIUS_SIGMAS: f32 = 3.0;
/// Splats fainter than this contribute nothing visible.
pub const MIN_OPACITY: f32 = 1.0 / 255.0;

const CHUNK: usize = 4096;

/// Screen-space draw record, matching `struct ScreenRecord` in the shaders.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ScreenRecord {
    /// Pixel coordinates, y down.
    pub center: [f32; 2],
    /// View-space distance along the camera axis.
    pub depth: f32,
    pub radius: f32,
    /// Inverse 2D covariance `[a, b, c]` for `a·dx² + 2b·dx·dy + c·dy²`.
    pub conic: [f32; 3],
    pub opacity: f32,
    /// Display color for the active render mode, linear RGBA.
    pub color: Vec4,
}

/// Camera state flattened for projection.
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    pub view: Mat4,
    pub fx: f32,
    pub fy: f32,
    pub viewport: Viewport,
    pub near: f32,
    pub far: f32,
    pub mode: RenderMode,
}

impl Projection {
    pub fn new(camera: &Camera, viewport: Viewport, mode: RenderMode) -> Self {
        let (fx, fy) = camera.focal_lengths(viewport);
        Self {
            view: camera.view_matrix(),
            fx,
            fy,
            viewport,
            near: camera.near,
            far: camera.far,
            mode,
        }
    }
}

pub fn display_color(g: &Gaussian, depth: f32, mode: RenderMode) -> Vec4 {
    match mode {
        RenderMode::Albedo => [g.color[0], g.color[1], g.color[2], 1.0],
        RenderMode::Normal => [
            g.normal[0] * 0.5 + 0.5,
            g.normal[1] * 0.5 + 0.5,
            g.normal[2] * 0.5 + 0.5,
            1.0,
        ],
        RenderMode::Depth => {
            let v = 1.0 / (1.0 + depth);
            [v, v, v, 1.0]
        }
        RenderMode::Metallic => [g.metallic, g.metallic, g.metallic, 1.0],
        RenderMode::Roughness => [g.roughness, g.roughness, g.roughness, 1.0],
    }
}

/// Project one Gaussian. `None` when it is culled.
pub fn project(g: &Gaussian, p: &Projection) -> Option<ScreenRecord> {
    if !g.is_valid() || g.opacity < MIN_OPACITY {
        return None;
    }

    let v = transform_point(&p.view, g.position);
    let depth = -v[2];
    if !(depth >= p.near && depth <= p.far) {
        return None;
    }

    let inv_d = 1.0 / depth;
    let (w, h) = (p.viewport.width as f32, p.viewport.height as f32);
    let center = [
        p.fx * v[0] * inv_d + w * 0.5,
        -p.fy * v[1] * inv_d + h * 0.5,
    ];

    // Jacobian of pixel coordinates w.r.t. view-space position.
    let j = [
        [p.fx * inv_d, 0.0, p.fx * v[0] * inv_d * inv_d],
        [0.0, -p.fy * inv_d, -p.fy * v[1] * inv_d * inv_d],
    ];
    // Row-major view rotation.
    let r: Mat3 = mat4_to_mat3(&p.view);
    let mut t = [[0.0f32; 3]; 2];
    for (row, trow) in t.iter_mut().enumerate() {
        for (col, tv) in trow.iter_mut().enumerate() {
            *tv = (0..3).map(|k| j[row][k] * r[col][k]).sum();
        }
    }

    let sigma = g.covariance();
    let mut cov = [[0.0f32; 2]; 2];
    for a in 0..2 {
        for b in 0..2 {
            let mut sum = 0.0;
            for i in 0..3 {
                for k in 0..3 {
                    sum += t[a][i] * sigma[k][i] * t[b][k];
                }
            }
            cov[a][b] = sum;
        }
    }
    let (ca, cb, cc) = (
        cov[0][0] + COVARIANCE_DILATION,
        cov[0][1],
        cov[1][1] + COVARIANCE_DILATION,
    );

    let det = ca * cc - cb * cb;
    if !(det > 0.0) {
        return None;
    }
    let mid = 0.5 * (ca + cc);
    let lambda = mid + (mid * mid - det).max(0.1).sqrt();
    let radius = RADIUS_SIGMAS * lambda.sqrt();

    if center[0] + radius < 0.0
        || center[0] - radius > w
        || center[1] + radius < 0.0
        || center[1] - radius > h
    {
        return None;
    }

    let inv_det = 1.0 / det;
    Some(ScreenRecord {
        center,
        depth,
        radius,
        conic: [cc * inv_det, -cb * inv_det, ca * inv_det],
        opacity: g.opacity,
        color: display_color(g, depth, p.mode),
    })
}

/// Compacted prepass result. Entry `i` of each vector describes the same splat.
#[derive(Debug, Clone, Default)]
pub struct PrepassOutput {
    /// Slot indices of visible Gaussians, ascending.
    pub indices: Vec<u32>,
    pub keys: Vec<u32>,
    pub records: Vec<ScreenRecord>,
}

impl PrepassOutput {
    pub fn visible_count(&self) -> usize {
        self.indices.len()
    }

    pub fn clear(&mut self) {
        self.indices.clear();
        self.keys.clear();
        self.records.clear();
    }

    /// Position of slot `index` in the compacted arrays.
    pub fn position_of(&self, index: u32) -> Option<usize> {
        self.indices.binary_search(&index).ok()
    }
}

/// Run the prepass on the CPU into `out`, reusing its allocations.
pub fn run(buffer: &AttributeBuffer, projection: &Projection, out: &mut PrepassOutput) {
    let chunks: Vec<Vec<(u32, ScreenRecord)>> = buffer
        .as_slice()
        .par_chunks(CHUNK)
        .enumerate()
        .map(|(c, chunk)| {
            let base = (c * CHUNK) as u32;
            chunk
                .iter()
                .enumerate()
                .filter_map(|(i, g)| project(g, projection).map(|r| (base + i as u32, r)))
                .collect()
        })
        .collect();

    out.clear();
    for (index, record) in chunks.into_iter().flatten() {
        out.indices.push(index);
        out.keys.push(depth_key(record.depth));
        out.records.push(record);
    }
}
