//! Fit-mode and transform math for the layer blender. Pure functions over
//! plain numbers so they can be unit tested without a decoder or a surface.

use crate::types::{FitMode, Transform};

/// A draw rectangle in surface space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Computes the fitted draw rect for a source of intrinsic size `(sw, sh)`
/// onto a surface of size `(cw, ch)`, before any layer transform is applied.
///
/// `FitMode::Auto` must be resolved by the caller to the compositor's global
/// mode before calling this (mirrors `effectiveFit = layer.fitMode unless
/// 'auto', else compositor.fitMode`).
pub fn compute_fit(mode: FitMode, sw: f64, sh: f64, cw: f64, ch: f64) -> Rect {
    match mode {
        FitMode::Fill => Rect { x: 0.0, y: 0.0, width: cw, height: ch },
        FitMode::Cover => {
            if sw <= 0.0 || sh <= 0.0 {
                return Rect { x: 0.0, y: 0.0, width: cw, height: ch };
            }
            let scale = (cw / sw).max(ch / sh);
            let width = sw * scale;
            let height = sh * scale;
            Rect { x: (cw - width) / 2.0, y: (ch - height) / 2.0, width, height }
        }
        FitMode::Contain | FitMode::Auto => {
            if sw <= 0.0 || sh <= 0.0 {
                return Rect { x: 0.0, y: 0.0, width: cw, height: ch };
            }
            let scale = (cw / sw).min(ch / sh);
            let width = sw * scale;
            let height = sh * scale;
            Rect { x: (cw - width) / 2.0, y: (ch - height) / 2.0, width, height }
        }
    }
}

/// A drawing instruction resolved from fit + transform: the destination
/// rect in surface space, plus everything needed by the slow path (rotation,
/// scale, opacity, anchor). The fast path is signaled by `is_identity()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawInstruction {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub rotation_radians: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub opacity: f64,
    pub anchor_x: f64,
    pub anchor_y: f64,
}

impl DrawInstruction {
    /// True when the fast path applies: opaque, unrotated, unscaled.
    pub fn is_identity(&self) -> bool {
        self.opacity == 1.0 && self.rotation_radians == 0.0 && self.scale_x == 1.0 && self.scale_y == 1.0
    }
}

/// Resolves a layer's transform against its fitted rect into a concrete
/// draw instruction. Mirrors the "transform application" algorithm.
pub fn resolve_transform(transform: &Transform, fitted: Rect) -> DrawInstruction {
    let tx = transform.x + fitted.x;
    let ty = transform.y + fitted.y;
    let width = transform.width.unwrap_or(fitted.width);
    let height = transform.height.unwrap_or(fitted.height);
    DrawInstruction {
        x: tx,
        y: ty,
        width,
        height,
        rotation_radians: transform.rotation.to_radians(),
        scale_x: transform.scale_x,
        scale_y: transform.scale_y,
        opacity: transform.opacity,
        anchor_x: transform.anchor_x,
        anchor_y: transform.anchor_y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn contain_letterboxes_1000x500_surface_with_400x400_source() {
        // scale = min(1000/400, 500/400) = 1.25 -> 500x500 centered.
        let r = compute_fit(FitMode::Contain, 400.0, 400.0, 1000.0, 500.0);
        assert!(approx(r.x, 250.0));
        assert!(approx(r.y, 0.0));
        assert!(approx(r.width, 500.0));
        assert!(approx(r.height, 500.0));
    }

    #[test]
    fn cover_crops_1000x500_surface_with_400x400_source() {
        let r = compute_fit(FitMode::Cover, 400.0, 400.0, 1000.0, 500.0);
        assert!(approx(r.x, 0.0));
        assert!(approx(r.y, -250.0));
        assert!(approx(r.width, 1000.0));
        assert!(approx(r.height, 1000.0));
    }

    #[test]
    fn fill_ignores_aspect_ratio() {
        let r = compute_fit(FitMode::Fill, 400.0, 400.0, 1000.0, 500.0);
        assert_eq!(r, Rect { x: 0.0, y: 0.0, width: 1000.0, height: 500.0 });
    }

    #[test]
    fn identity_transform_takes_fast_path() {
        let fitted = compute_fit(FitMode::Contain, 400.0, 400.0, 1000.0, 500.0);
        let instr = resolve_transform(&Transform::default(), fitted);
        assert!(instr.is_identity());
        assert!(approx(instr.x, 250.0));
        assert!(approx(instr.width, 500.0));
    }

    #[test]
    fn rotated_transform_takes_slow_path() {
        let fitted = compute_fit(FitMode::Fill, 100.0, 100.0, 100.0, 100.0);
        let mut t = Transform::default();
        t.rotation = 90.0;
        let instr = resolve_transform(&t, fitted);
        assert!(!instr.is_identity());
        assert!(approx(instr.rotation_radians, std::f64::consts::FRAC_PI_2));
    }
}
