//! The Gaussian record and the fixed-capacity buffer that holds them.
//!
//! A Gaussian's identity is its slot: the row-major index of the UV texel that
//! produced it. The slot index is carried unchanged through the prepass and
//! the sort, which is how draw order joins back to attribute data.

use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};

use crate::config::Resolution;
use crate::math::{mat3_mul, mat3_transpose, quat_to_mat3, Mat3, Vec3, Vec4};

/// One splat, laid out to match `struct Gaussian` in the WGSL shaders
/// (std430, 96 bytes).
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Gaussian {
    pub position: Vec3,
    /// Non-zero when the slot holds a real splat.
    pub valid: u32,
    /// Standard deviations along the local axes.
    pub scale: Vec3,
    pub opacity: f32,
    /// Unit quaternion `[x, y, z, w]`.
    pub rotation: Vec4,
    /// Linear RGB base color, alpha in `w`.
    pub color: Vec4,
    pub normal: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    pub _pad: [f32; 3],
}

impl Gaussian {
    pub const INVALID: Gaussian = Gaussian {
        position: [0.0; 3],
        valid: 0,
        scale: [0.0; 3],
        opacity: 0.0,
        rotation: [0.0, 0.0, 0.0, 1.0],
        color: [0.0; 4],
        normal: [0.0; 3],
        metallic: 0.0,
        roughness: 0.0,
        _pad: [0.0; 3],
    };

    pub fn is_valid(&self) -> bool {
        self.valid != 0
    }

    /// 3D covariance `R S Sᵀ Rᵀ`.
    pub fn covariance(&self) -> Mat3 {
        let r = quat_to_mat3(self.rotation);
        let rs = [
            [r[0][0] * self.scale[0], r[0][1] * self.scale[0], r[0][2] * self.scale[0]],
            [r[1][0] * self.scale[1], r[1][1] * self.scale[1], r[1][2] * self.scale[1]],
            [r[2][0] * self.scale[2], r[2][1] * self.scale[2], r[2][2] * self.scale[2]],
        ];
        mat3_mul(&rs, &mat3_transpose(&rs))
    }
}

impl Default for Gaussian {
    fn default() -> Self {
        Self::INVALID
    }
}

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Owns every Gaussian for the current mesh + resolution.
///
/// Capacity is always `resolution²`. The buffer is replaced wholesale by each
/// conversion run and is read-only to every other stage.
#[derive(Debug, Clone)]
pub struct AttributeBuffer {
    resolution: Resolution,
    gaussians: Vec<Gaussian>,
    valid_count: usize,
    generation: u64,
}

impl AttributeBuffer {
    /// All-invalid buffer sized for `resolution`.
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            gaussians: vec![Gaussian::INVALID; resolution.capacity()],
            valid_count: 0,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Wrap conversion output. `gaussians.len()` must equal `resolution²`.
    pub(crate) fn from_slots(resolution: Resolution, gaussians: Vec<Gaussian>) -> Self {
        debug_assert_eq!(gaussians.len(), resolution.capacity());
        let valid_count = gaussians.iter().filter(|g| g.is_valid()).count();
        Self {
            resolution,
            gaussians,
            valid_count,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Unique per conversion run; lets device-side caches detect a new buffer.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn capacity(&self) -> usize {
        self.gaussians.len()
    }

    /// Total Gaussian count: slots with `valid` set.
    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    pub fn as_slice(&self) -> &[Gaussian] {
        &self.gaussians
    }

    pub fn get(&self, index: usize) -> Option<&Gaussian> {
        self.gaussians.get(index)
    }

    /// Valid Gaussians with their slot index, in slot order.
    pub fn iter_valid(&self) -> impl Iterator<Item = (u32, &Gaussian)> {
        self.gaussians
            .iter()
            .enumerate()
            .filter(|(_, g)| g.is_valid())
            .map(|(i, g)| (i as u32, g))
    }

    /// Texel `(x, y)` that produced slot `index`.
    pub fn texel_of(&self, index: usize) -> (u32, u32) {
        let r = self.resolution.get() as usize;
        ((index % r) as u32, (index / r) as u32)
    }

    pub fn size_bytes(&self) -> u64 {
        std::mem::size_of_val(self.gaussians.as_slice()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_matches_shader_layout() {
        assert_eq!(std::mem::size_of::<Gaussian>(), 96);
        assert_eq!(std::mem::size_of::<Gaussian>() % 16, 0);
    }

    #[test]
    fn new_buffer_is_all_invalid() {
        let buf = AttributeBuffer::new(Resolution::new(64).unwrap());
        assert_eq!(buf.capacity(), 64 * 64);
        assert_eq!(buf.valid_count(), 0);
        assert_eq!(buf.iter_valid().count(), 0);
    }

    #[test]
    fn texel_of_is_row_major() {
        let buf = AttributeBuffer::new(Resolution::new(64).unwrap());
        assert_eq!(buf.texel_of(0), (0, 0));
        assert_eq!(buf.texel_of(65), (1, 1));
        assert_eq!(buf.texel_of(64 * 64 - 1), (63, 63));
    }

    #[test]
    fn covariance_of_axis_aligned_gaussian_is_diagonal() {
        let g = Gaussian {
            valid: 1,
            scale: [2.0, 3.0, 0.5],
            ..Gaussian::INVALID
        };
        let c = g.covariance();
        assert!((c[0][0] - 4.0).abs() < 1e-5);
        assert!((c[1][1] - 9.0).abs() < 1e-5);
        assert!((c[2][2] - 0.25).abs() < 1e-5);
        assert!(c[0][1].abs() < 1e-6);
    }
}
