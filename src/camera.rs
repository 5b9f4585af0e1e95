//! Camera configuration and view/projection math for the splatting passes.

use serde::{Deserialize, Serialize};

use crate::math::{
    cross3, dot3, look_at, mat4_mul, normalize3, perspective, sub3, Mat4, Vec3,
};
use crate::mesh::Bounds;

/// Size of the surface a pass renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1080, 720)
    }
}

/// Perspective camera. View space is right-handed, looking down `-Z`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_deg: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: [0.0, 0.0, 5.0],
            target: [0.0, 0.0, 0.0],
            up: [0.0, 1.0, 0.0],
            fov_deg: 45.0,
            near: 0.01,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn with_fov(mut self, fov_deg: f32) -> Self {
        self.fov_deg = fov_deg;
        self
    }

    pub fn with_clip(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    /// Orbit camera that frames `bounds` from the given angles.
    ///
    /// `zoom` multiplies the fitted distance; near/far are derived from it.
    pub fn framing(bounds: &Bounds, yaw_deg: f32, pitch_deg: f32, zoom: f32, fov_deg: f32, aspect: f32) -> Self {
        let center = bounds.center();

        let yaw = yaw_deg.to_radians();
        let pitch = pitch_deg.to_radians();
        let fov = fov_deg.to_radians();

        let dir = normalize3([
            -(pitch.cos() * yaw.sin()),
            -(pitch.sin()),
            -(pitch.cos() * yaw.cos()),
        ]);

        let forward = dir;
        let right = normalize3(cross3(forward, [0.0, 1.0, 0.0]));
        let up = cross3(right, forward);

        let half_fov_y = fov * 0.5;
        let half_fov_x = (half_fov_y.tan() * aspect).atan();

        let mut max_dist = 1.0f32;
        for c in &bounds.corners() {
            let rel = sub3(*c, center);
            let proj_right = dot3(rel, right).abs();
            let proj_up = dot3(rel, up).abs();
            let proj_depth = -dot3(rel, forward);
            let dist_h = proj_right / half_fov_x.tan() + proj_depth;
            let dist_v = proj_up / half_fov_y.tan() + proj_depth;
            max_dist = max_dist.max(dist_h).max(dist_v);
        }

        let distance = max_dist * 1.1 * zoom;
        let eye = [
            center[0] - dir[0] * distance,
            center[1] - dir[1] * distance,
            center[2] - dir[2] * distance,
        ];

        Self {
            eye,
            target: center,
            up: [0.0, 1.0, 0.0],
            fov_deg,
            near: distance * 0.01,
            far: distance * 10.0,
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        look_at(self.eye, self.target, self.up)
    }

    pub fn projection(&self, aspect: f32) -> Mat4 {
        perspective(self.fov_deg.to_radians(), aspect, self.near, self.far)
    }

    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        mat4_mul(self.projection(aspect), self.view_matrix())
    }

    /// Focal lengths in pixels `(fx, fy)` for `viewport`.
    pub fn focal_lengths(&self, viewport: Viewport) -> (f32, f32) {
        let tan_half_y = (self.fov_deg.to_radians() * 0.5).tan();
        let tan_half_x = tan_half_y * viewport.aspect();
        (
            viewport.width as f32 / (2.0 * tan_half_x),
            viewport.height as f32 / (2.0 * tan_half_y),
        )
    }
}
