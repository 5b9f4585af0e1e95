//! In-memory mesh model handed to the conversion pass.
//!
//! This is the contract with the mesh loader: flat position/normal/UV/index
//! arrays per primitive plus the material each primitive binds. Loaders
//! (see [`crate::loader`]) and tests build these directly.

use crate::math::{
    add3, cross3, mat3_transpose, mat4_inverse, mat4_to_mat3, normalize3, sub3, transform_point,
    Mat3, Mat4, Vec2, Vec3, Vec4,
};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub const EMPTY: Bounds = Bounds {
        min: [f32::MAX; 3],
        max: [f32::MIN; 3],
    };

    pub fn is_empty(&self) -> bool {
        self.min[0] > self.max[0]
    }

    pub fn extend(&mut self, p: Vec3) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    pub fn merge(&mut self, other: &Bounds) {
        if !other.is_empty() {
            self.extend(other.min);
            self.extend(other.max);
        }
    }

    pub fn center(&self) -> Vec3 {
        if self.is_empty() {
            return [0.0; 3];
        }
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            [a[0], a[1], a[2]],
            [b[0], a[1], a[2]],
            [a[0], b[1], a[2]],
            [b[0], b[1], a[2]],
            [a[0], a[1], b[2]],
            [b[0], a[1], b[2]],
            [a[0], b[1], b[2]],
            [b[0], b[1], b[2]],
        ]
    }
}

/// RGBA8 texture as decoded by the loader.
#[derive(Debug, Clone)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    /// Stored values are sRGB-encoded and must be linearized before filtering.
    pub srgb: bool,
}

impl Texture {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, srgb: bool) -> Self {
        Self {
            width,
            height,
            pixels,
            srgb,
        }
    }

    pub fn solid(color: [u8; 4], srgb: bool) -> Self {
        Self::new(1, 1, color.to_vec(), srgb)
    }

    fn texel(&self, x: i64, y: i64) -> Vec4 {
        let w = self.width.max(1) as i64;
        let h = self.height.max(1) as i64;
        let xi = x.rem_euclid(w) as usize;
        let yi = y.rem_euclid(h) as usize;
        let offset = (yi * w as usize + xi) * 4;
        let Some(px) = self.pixels.get(offset..offset + 4) else {
            return [1.0; 4];
        };
        let mut out = [
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
            px[3] as f32 / 255.0,
        ];
        if self.srgb {
            for c in out.iter_mut().take(3) {
                *c = srgb_to_linear(*c);
            }
        }
        out
    }

    /// Bilinear sample with repeat wrapping, the same filtering the GPU
    /// conversion pass configures on its sampler.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        // Fold into [0, 1); exact under repeat wrapping.
        let wrap = |c: f32| if c.is_finite() { c.rem_euclid(1.0) } else { 0.0 };
        let x = wrap(uv[0]) * self.width as f32 - 0.5;
        let y = wrap(uv[1]) * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let a = self.texel(x0, y0);
        let b = self.texel(x0 + 1, y0);
        let c = self.texel(x0, y0 + 1);
        let d = self.texel(x0 + 1, y0 + 1);

        let mut out = [0.0f32; 4];
        for i in 0..4 {
            let top = a[i] + (b[i] - a[i]) * fx;
            let bottom = c[i] + (d[i] - c[i]) * fx;
            out[i] = top + (bottom - top) * fy;
        }
        out
    }
}

pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

pub fn linear_to_srgb(c: f32) -> f32 {
    let c = c.clamp(0.0, 1.0);
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/// Metallic-roughness material, the subset of glTF PBR the conversion samples.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub base_color_factor: Vec4,
    pub base_color_texture: Option<Texture>,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    /// glTF packing: G = roughness, B = metallic.
    pub metallic_roughness_texture: Option<Texture>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color_factor: [1.0, 1.0, 1.0, 1.0],
            base_color_texture: None,
            metallic_factor: 0.0,
            roughness_factor: 1.0,
            metallic_roughness_texture: None,
        }
    }
}

/// Material channels evaluated at one surface point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialSample {
    /// Linear RGBA.
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
}

impl Material {
    pub fn with_base_color(mut self, color: Vec4) -> Self {
        self.base_color_factor = color;
        self
    }

    pub fn with_base_color_texture(mut self, texture: Texture) -> Self {
        self.base_color_texture = Some(texture);
        self
    }

    pub fn with_metallic_roughness(mut self, metallic: f32, roughness: f32) -> Self {
        self.metallic_factor = metallic;
        self.roughness_factor = roughness;
        self
    }

    pub fn sample(&self, uv: Vec2) -> MaterialSample {
        let mut base_color = self.base_color_factor;
        if let Some(tex) = &self.base_color_texture {
            let t = tex.sample(uv);
            for i in 0..4 {
                base_color[i] *= t[i];
            }
        }
        let (mut metallic, mut roughness) = (self.metallic_factor, self.roughness_factor);
        if let Some(tex) = &self.metallic_roughness_texture {
            let t = tex.sample(uv);
            roughness *= t[1];
            metallic *= t[2];
        }
        MaterialSample {
            base_color,
            metallic,
            roughness,
        }
    }
}

/// One drawable piece of a mesh with a single material.
#[derive(Debug, Clone, Default)]
pub struct Primitive {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    /// `None` when the source had no texture coordinates.
    pub uvs: Option<Vec<Vec2>>,
    pub indices: Vec<u32>,
    pub material: usize,
}

impl Primitive {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn triangle(&self, t: usize) -> Option<[usize; 3]> {
        let i = self.indices.get(t * 3..t * 3 + 3)?;
        let tri = [i[0] as usize, i[1] as usize, i[2] as usize];
        if tri.iter().any(|&v| v >= self.positions.len()) {
            return None;
        }
        Some(tri)
    }

    /// Area-weighted smooth normals, used when the source has none.
    pub fn generate_normals(&mut self) {
        let mut normals = vec![[0.0f32; 3]; self.positions.len()];
        for t in 0..self.triangle_count() {
            let Some([a, b, c]) = self.triangle(t) else {
                continue;
            };
            let n = cross3(
                sub3(self.positions[b], self.positions[a]),
                sub3(self.positions[c], self.positions[a]),
            );
            for v in [a, b, c] {
                normals[v] = add3(normals[v], n);
            }
        }
        self.normals = normals.into_iter().map(normalize3).collect();
    }

    /// Bake a model transform into positions and normals.
    pub fn apply_transform(&mut self, transform: &Mat4) {
        let m: Mat3 = mat3_transpose(&mat4_to_mat3(&mat4_inverse(*transform)));
        for p in &mut self.positions {
            *p = transform_point(transform, *p);
        }
        for n in &mut self.normals {
            *n = normalize3([
                m[0][0] * n[0] + m[1][0] * n[1] + m[2][0] * n[2],
                m[0][1] * n[0] + m[1][1] * n[1] + m[2][1] * n[2],
                m[0][2] * n[0] + m[1][2] * n[1] + m[2][2] * n[2],
            ]);
        }
    }

    pub fn bounds(&self) -> Bounds {
        let mut b = Bounds::EMPTY;
        for p in &self.positions {
            b.extend(*p);
        }
        b
    }
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub name: String,
    pub primitives: Vec<Primitive>,
    pub materials: Vec<Material>,
}

impl Mesh {
    pub fn triangle_count(&self) -> usize {
        self.primitives.iter().map(Primitive::triangle_count).sum()
    }

    pub fn bounds(&self) -> Bounds {
        let mut b = Bounds::EMPTY;
        for p in &self.primitives {
            b.merge(&p.bounds());
        }
        b
    }

    pub fn material(&self, index: usize) -> &Material {
        static DEFAULT: std::sync::OnceLock<Material> = std::sync::OnceLock::new();
        self.materials
            .get(index)
            .unwrap_or_else(|| DEFAULT.get_or_init(Material::default))
    }

    /// Bake a model transform into every primitive.
    pub fn apply_transform(&mut self, transform: &Mat4) {
        for prim in &mut self.primitives {
            prim.apply_transform(transform);
        }
    }

    /// Unit cube centered at the origin. Each face owns one cell of a 3x2 UV
    /// atlas, so the six faces tile the whole texture without overlap.
    pub fn unit_cube() -> Mesh {
        // (normal, right, up) with right x up == normal so faces wind CCW outward.
        const FACES: [(Vec3, Vec3, Vec3); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ];

        let mut prim = Primitive::default();
        let mut uvs = Vec::with_capacity(24);
        for (k, (n, r, u)) in FACES.iter().enumerate() {
            let c = [n[0] * 0.5, n[1] * 0.5, n[2] * 0.5];
            let corner = |sr: f32, su: f32| -> Vec3 {
                [
                    c[0] + (r[0] * sr + u[0] * su) * 0.5,
                    c[1] + (r[1] * sr + u[1] * su) * 0.5,
                    c[2] + (r[2] * sr + u[2] * su) * 0.5,
                ]
            };
            let (cx, cy) = ((k % 3) as f32, (k / 3) as f32);
            let (u0, u1) = (cx / 3.0, (cx + 1.0) / 3.0);
            let (v0, v1) = (cy / 2.0, (cy + 1.0) / 2.0);

            let base = prim.positions.len() as u32;
            prim.positions.extend([
                corner(-1.0, -1.0),
                corner(1.0, -1.0),
                corner(1.0, 1.0),
                corner(-1.0, 1.0),
            ]);
            prim.normals.extend([*n; 4]);
            uvs.extend([[u0, v1], [u1, v1], [u1, v0], [u0, v0]]);
            prim.indices
                .extend([base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        prim.uvs = Some(uvs);

        Mesh {
            name: "unit_cube".to_string(),
            primitives: vec![prim],
            materials: vec![Material {
                name: "cube".to_string(),
                ..Material::default()
            }
            .with_base_color([0.8, 0.5, 0.2, 1.0])
            .with_metallic_roughness(0.0, 0.6)],
        }
    }
}
