//! Back-to-front splat compositing into an RGBA framebuffer.

use std::path::Path;

use rayon::prelude::*;

use crate::camera::Viewport;
use crate::error::{Result, SplatError};
use crate::mesh::linear_to_srgb;
use crate::prepass::{PrepassOutput, ScreenRecord, MIN_OPACITY};

/// Per-splat alpha never reaches 1 so later splats can still show through.
pub const MAX_ALPHA: f32 = 0.99;

/// Rows composited together; splats are binned per band.
const BAND_ROWS: usize = 16;

/// Linear RGBA image the compositor draws into.
#[derive(Debug, Clone, PartialEq)]
pub struct Framebuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[f32; 4]>,
}

impl Framebuffer {
    pub fn new(viewport: Viewport, background: [f32; 4]) -> Self {
        Self {
            width: viewport.width,
            height: viewport.height,
            pixels: vec![background; viewport.pixel_count()],
        }
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.width, self.height)
    }

    /// Reset every pixel, resizing if the viewport changed.
    pub fn clear(&mut self, viewport: Viewport, background: [f32; 4]) {
        self.width = viewport.width;
        self.height = viewport.height;
        self.pixels.clear();
        self.pixels.resize(viewport.pixel_count(), background);
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// sRGB-encoded RGBA8 bytes, row-major.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() * 4);
        for p in &self.pixels {
            out.push((linear_to_srgb(p[0]) * 255.0).round() as u8);
            out.push((linear_to_srgb(p[1]) * 255.0).round() as u8);
            out.push((linear_to_srgb(p[2]) * 255.0).round() as u8);
            out.push((p[3].clamp(0.0, 1.0) * 255.0).round() as u8);
        }
        out
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        encode_png(&self.to_rgba8(), self.width, self.height)
    }

    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let png = self.encode_png()?;
        std::fs::write(path, png)?;
        Ok(())
    }
}

/// Encode RGBA8 pixels to PNG bytes.
pub fn encode_png(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let img = image::RgbaImage::from_raw(width, height, pixels.to_vec())
        .ok_or_else(|| SplatError::Image("Failed to create image from pixels".into()))?;
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| SplatError::Image(e.to_string()))?;
    Ok(buf.into_inner())
}

/// Blend one splat's contribution at pixel center `(px, py)`.
#[inline]
pub fn blend(dst: &mut [f32; 4], rec: &ScreenRecord, px: f32, py: f32) {
    let dx = px - rec.center[0];
    let dy = py - rec.center[1];
    let [a, b, c] = rec.conic;
    let power = -0.5 * (a * dx * dx + c * dy * dy) - b * dx * dy;
    if power > 0.0 {
        return;
    }
    let alpha = (rec.opacity * power.exp()).min(MAX_ALPHA);
    if alpha < MIN_OPACITY {
        return;
    }
    let keep = 1.0 - alpha;
    dst[0] = rec.color[0] * alpha + dst[0] * keep;
    dst[1] = rec.color[1] * alpha + dst[1] * keep;
    dst[2] = rec.color[2] * alpha + dst[2] * keep;
    dst[3] = alpha + dst[3] * keep;
}

/// Draw splats in `order` (slot indices, back-to-front) over `target`.
///
/// Slots missing from `prepass` are skipped. Bands of rows are composited in
/// parallel; within a pixel the supplied order is always respected.
pub fn composite(target: &mut Framebuffer, order: &[u32], prepass: &PrepassOutput) {
    let draw: Vec<&ScreenRecord> = order
        .iter()
        .filter_map(|&i| prepass.position_of(i).map(|p| &prepass.records[p]))
        .collect();
    if draw.is_empty() || target.width == 0 {
        return;
    }

    let width = target.width as usize;
    let height = target.height as f32;
    target
        .pixels
        .par_chunks_mut(width * BAND_ROWS)
        .enumerate()
        .for_each(|(band, pixels)| {
            let y0 = (band * BAND_ROWS) as f32;
            let y1 = (y0 + BAND_ROWS as f32).min(height);
            let in_band: Vec<&ScreenRecord> = draw
                .iter()
                .copied()
                .filter(|r| r.center[1] + r.radius >= y0 && r.center[1] - r.radius <= y1)
                .collect();

            for rec in in_band {
                let x_lo = (rec.center[0] - rec.radius).floor().max(0.0) as usize;
                let x_hi = ((rec.center[0] + rec.radius).ceil().max(0.0) as usize).min(width);
                let ry_lo = ((rec.center[1] - rec.radius).floor() - y0).max(0.0) as usize;
                let ry_hi = ((rec.center[1] + rec.radius).ceil() - y0).max(0.0) as usize;
                for (row, line) in pixels
                    .chunks_mut(width)
                    .enumerate()
                    .take(ry_hi.min(BAND_ROWS))
                    .skip(ry_lo)
                {
                    let py = y0 + row as f32 + 0.5;
                    for x in x_lo..x_hi {
                        blend(&mut line[x], rec, x as f32 + 0.5, py);
                    }
                }
            }
        });
}
