//! The compositor's drawing target: an owned RGBA8 pixel buffer.
//!
//! Headless by design — no window handle, no GPU context. The worker
//! protocol moves a `Surface` into the worker thread's closure as an
//! offscreen buffer handed over once at init; the render loop and blender
//! never see anything else.

use crate::fit::DrawInstruction;
use crate::types::Image;

/// An owned RGBA8 framebuffer, straight (non-premultiplied) alpha.
#[derive(Debug, Clone)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, rgba: vec![0; (width as usize) * (height as usize) * 4] }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.rgba = vec![0; (width as usize) * (height as usize) * 4];
    }

    /// Fills the whole surface with a flat background color. Always the
    /// first write of a `render` call (see the flicker-free policy).
    pub fn clear(&mut self, bg: [u8; 4]) {
        for px in self.rgba.chunks_exact_mut(4) {
            px.copy_from_slice(&bg);
        }
    }

    #[inline]
    fn set_px(&mut self, x: i64, y: i64, rgba: [u8; 4]) {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        let dst = &mut self.rgba[idx..idx + 4];
        alpha_blend(dst, rgba);
    }

    /// Fast path: opaque, unrotated, unscaled relative to source — a direct
    /// axis-aligned blit with nearest-neighbor resampling when the dest rect
    /// size differs from the source image.
    pub fn draw_identity(&mut self, image: &Image, instr: &DrawInstruction) {
        self.draw_axis_aligned(image, instr.x, instr.y, instr.width, instr.height, 1.0);
    }

    /// Slow path: honors opacity, rotation (about the anchor point) and
    /// per-axis scale. Implemented as an inverse mapping from destination
    /// pixels back into source-image space so every pixel is visited once
    /// regardless of rotation angle.
    pub fn draw_transformed(&mut self, image: &Image, instr: &DrawInstruction) {
        if instr.is_identity() {
            self.draw_axis_aligned(image, instr.x, instr.y, instr.width, instr.height, instr.opacity);
            return;
        }
        let dw = instr.width * instr.scale_x;
        let dh = instr.height * instr.scale_y;
        let pivot_x = instr.x + instr.width * instr.anchor_x;
        let pivot_y = instr.y + instr.height * instr.anchor_y;
        let cos_a = instr.rotation_radians.cos();
        let sin_a = instr.rotation_radians.sin();

        // Bounding box of the rotated rect, clamped to the surface.
        let half_diag = ((dw * dw + dh * dh).sqrt() / 2.0).ceil() as i64;
        let min_x = ((pivot_x as i64) - half_diag).max(0);
        let max_x = ((pivot_x as i64) + half_diag).min(self.width as i64 - 1);
        let min_y = ((pivot_y as i64) - half_diag).max(0);
        let max_y = ((pivot_y as i64) + half_diag).min(self.height as i64 - 1);

        if image.width == 0 || image.height == 0 || dw <= 0.0 || dh <= 0.0 {
            return;
        }

        for sy in min_y..=max_y {
            for sx in min_x..=max_x {
                // Translate to pivot-relative, then undo rotation and scale
                // to land back in the unrotated dest rect's local space.
                let rx = sx as f64 + 0.5 - pivot_x;
                let ry = sy as f64 + 0.5 - pivot_y;
                let ux = rx * cos_a + ry * sin_a;
                let uy = -rx * sin_a + ry * cos_a;
                let local_x = ux + instr.width * instr.anchor_x;
                let local_y = uy + instr.height * instr.anchor_y;
                if local_x < 0.0 || local_y < 0.0 || local_x >= instr.width || local_y >= instr.height {
                    continue;
                }
                let u = local_x / instr.width;
                let v = local_y / instr.height;
                let src_x = (u * image.width as f64) as u32;
                let src_y = (v * image.height as f64) as u32;
                if let Some(px) = sample(image, src_x, src_y) {
                    let blended = apply_opacity(px, instr.opacity);
                    self.set_px(sx, sy, blended);
                }
            }
        }
    }

    fn draw_axis_aligned(&mut self, image: &Image, x: f64, y: f64, w: f64, h: f64, opacity: f64) {
        if image.width == 0 || image.height == 0 || w <= 0.0 || h <= 0.0 {
            return;
        }
        let min_x = (x.floor() as i64).max(0);
        let min_y = (y.floor() as i64).max(0);
        let max_x = ((x + w).ceil() as i64).min(self.width as i64);
        let max_y = ((y + h).ceil() as i64).min(self.height as i64);

        for dy in min_y..max_y {
            let v = (dy as f64 + 0.5 - y) / h;
            if !(0.0..1.0).contains(&v) {
                continue;
            }
            let src_y = (v * image.height as f64) as u32;
            for dx in min_x..max_x {
                let u = (dx as f64 + 0.5 - x) / w;
                if !(0.0..1.0).contains(&u) {
                    continue;
                }
                let src_x = (u * image.width as f64) as u32;
                if let Some(px) = sample(image, src_x, src_y) {
                    let blended = if opacity >= 1.0 { px } else { apply_opacity(px, opacity) };
                    self.set_px(dx, dy, blended);
                }
            }
        }
    }
}

fn sample(image: &Image, x: u32, y: u32) -> Option<[u8; 4]> {
    if x >= image.width || y >= image.height {
        return None;
    }
    let idx = (y as usize * image.width as usize + x as usize) * 4;
    let slice = image.rgba.get(idx..idx + 4)?;
    Some([slice[0], slice[1], slice[2], slice[3]])
}

fn apply_opacity(mut px: [u8; 4], opacity: f64) -> [u8; 4] {
    px[3] = ((px[3] as f64) * opacity.clamp(0.0, 1.0)).round() as u8;
    px
}

/// Straight-alpha "source over" compositing of `src` onto `dst` in place.
fn alpha_blend(dst: &mut [u8], src: [u8; 4]) {
    if src[3] == 255 {
        dst.copy_from_slice(&src);
        return;
    }
    if src[3] == 0 {
        return;
    }
    let sa = src[3] as f64 / 255.0;
    let da = dst[3] as f64 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        dst.copy_from_slice(&[0, 0, 0, 0]);
        return;
    }
    for c in 0..3 {
        let s = src[c] as f64 / 255.0;
        let d = dst[c] as f64 / 255.0;
        let out = (s * sa + d * da * (1.0 - sa)) / out_a;
        dst[c] = (out * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::{compute_fit, resolve_transform};
    use crate::types::{FitMode, Transform};

    fn solid_image(w: u32, h: u32, rgba: [u8; 4]) -> Image {
        Image { width: w, height: h, rgba: rgba.repeat((w * h) as usize) }
    }

    #[test]
    fn clear_fills_every_pixel() {
        let mut s = Surface::new(4, 4);
        s.clear([10, 20, 30, 255]);
        assert!(s.rgba.chunks_exact(4).all(|px| px == [10, 20, 30, 255]));
    }

    #[test]
    fn opaque_identity_blit_overwrites_background() {
        let mut s = Surface::new(10, 10);
        s.clear([0, 0, 0, 255]);
        let img = solid_image(2, 2, [255, 0, 0, 255]);
        let fitted = compute_fit(FitMode::Fill, 2.0, 2.0, 10.0, 10.0);
        let instr = resolve_transform(&Transform::default(), fitted);
        s.draw_identity(&img, &instr);
        let idx = (5 * 10 + 5) * 4;
        assert_eq!(&s.rgba[idx..idx + 4], &[255, 0, 0, 255]);
    }

    #[test]
    fn half_opacity_blends_toward_background() {
        let mut s = Surface::new(4, 4);
        s.clear([0, 0, 0, 255]);
        let img = solid_image(4, 4, [255, 255, 255, 255]);
        let fitted = compute_fit(FitMode::Fill, 4.0, 4.0, 4.0, 4.0);
        let mut t = Transform::default();
        t.opacity = 0.5;
        let instr = resolve_transform(&t, fitted);
        s.draw_transformed(&img, &instr);
        let idx = (2 * 4 + 2) * 4;
        let px = &s.rgba[idx..idx + 4];
        assert!((px[0] as i32 - 128).abs() <= 2);
    }

    #[test]
    fn transparent_source_pixel_is_skipped() {
        let mut s = Surface::new(2, 2);
        s.clear([7, 7, 7, 255]);
        let img = solid_image(2, 2, [255, 0, 0, 0]);
        let instr = resolve_transform(&Transform::default(), compute_fit(FitMode::Fill, 2.0, 2.0, 2.0, 2.0));
        s.draw_identity(&img, &instr);
        assert_eq!(&s.rgba[0..4], &[7, 7, 7, 255]);
    }
}
