//! Text source: rasterizes `loadText` options into an immutable RGBA bitmap
//! sized to the tight bounding box of the wrapped text. Duration is
//! infinite, same as image sources.
//!
//! No bundled font — `ab_glyph` only gives us outline rasterization, so this
//! module resolves a system font file by family name (falling back to a
//! handful of common installation paths) rather than fabricating an embedded
//! font asset.

use ab_glyph::{Font, FontVec, Glyph, OutlinedGlyph, PxScale, ScaleFont};

use framecast_core::{CompositorError, ErrorCode, Image, TextOptions};

/// Owns the decoded font bytes so the `FontRef` borrow stays valid.
enum LoadedFont {
    Owned(FontVec),
}

impl LoadedFont {
    fn as_font(&self) -> &FontVec {
        match self {
            LoadedFont::Owned(f) => f,
        }
    }
}

fn candidate_paths(family: Option<&str>, bold: bool) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    if let Some(family) = family {
        let variant = if bold { format!("{family} Bold") } else { family.to_string() };
        out.push(std::path::PathBuf::from(format!(
            "/usr/share/fonts/truetype/{}/{}.ttf",
            family.to_lowercase().replace(' ', ""),
            variant.replace(' ', "")
        )));
    }
    let dejavu = if bold { "DejaVuSans-Bold.ttf" } else { "DejaVuSans.ttf" };
    out.push(std::path::PathBuf::from(format!("/usr/share/fonts/truetype/dejavu/{dejavu}")));
    let liberation = if bold { "LiberationSans-Bold.ttf" } else { "LiberationSans-Regular.ttf" };
    out.push(std::path::PathBuf::from(format!(
        "/usr/share/fonts/truetype/liberation/{liberation}"
    )));
    out
}

fn load_font(family: Option<&str>, weight: u16) -> framecast_core::Result<LoadedFont> {
    let bold = weight >= 700;
    for path in candidate_paths(family, bold) {
        if let Ok(bytes) = std::fs::read(&path) {
            if let Ok(font) = FontVec::try_from_vec(bytes) {
                return Ok(LoadedFont::Owned(font));
            }
        }
    }
    Err(CompositorError::new(
        ErrorCode::MediaNotSupported,
        "no usable system font found for text source",
    ))
}

struct LaidOutGlyph {
    glyph: OutlinedGlyph,
}

/// Lays out `text` at `scale`, wrapping at `max_width` (if set), and returns
/// the outlined glyphs plus the tight bounding box (width, height, baselines).
fn layout(
    font: &FontVec,
    text: &str,
    scale: PxScale,
    max_width: Option<f64>,
    line_height: Option<f64>,
) -> (Vec<LaidOutGlyph>, f32, f32) {
    let scaled = font.as_scaled(scale);
    let line_gap = line_height.map(|h| h as f32).unwrap_or(scaled.height() * 1.2);
    let max_w = max_width.map(|w| w as f32);

    let mut glyphs: Vec<LaidOutGlyph> = Vec::new();
    let mut cursor_y = scaled.ascent();
    let mut max_x_seen: f32 = 0.0;

    for line in text.split('\n') {
        let mut cursor_x = 0.0f32;
        let mut last_glyph: Option<Glyph> = None;

        for word in line.split_inclusive(' ') {
            let word_start_x = cursor_x;
            let mut word_glyphs: Vec<(char, Glyph)> = Vec::new();
            for ch in word.chars() {
                let mut glyph = font.glyph_id(ch).with_scale(scale);
                if let Some(prev) = &last_glyph {
                    cursor_x += scaled.kern(prev.id, glyph.id);
                }
                glyph.position = ab_glyph::point(cursor_x, cursor_y);
                cursor_x += scaled.h_advance(glyph.id);
                last_glyph = Some(glyph.clone());
                word_glyphs.push((ch, glyph));
            }

            if let Some(mw) = max_w {
                if cursor_x > mw && word_start_x > 0.0 {
                    // Wrap: restart this word on a new line.
                    cursor_y += line_gap;
                    cursor_x = 0.0;
                    last_glyph = None;
                    for (ch, _) in &word_glyphs {
                        let mut glyph = font.glyph_id(*ch).with_scale(scale);
                        if let Some(prev) = &last_glyph {
                            cursor_x += scaled.kern(prev.id, glyph.id);
                        }
                        glyph.position = ab_glyph::point(cursor_x, cursor_y);
                        cursor_x += scaled.h_advance(glyph.id);
                        last_glyph = Some(glyph.clone());
                        if let Some(outlined) = font.outline_glyph(glyph) {
                            max_x_seen = max_x_seen.max(cursor_x);
                            glyphs.push(LaidOutGlyph { glyph: outlined });
                        }
                    }
                    continue;
                }
            }

            for (_, glyph) in word_glyphs {
                if let Some(outlined) = font.outline_glyph(glyph) {
                    max_x_seen = max_x_seen.max(cursor_x);
                    glyphs.push(LaidOutGlyph { glyph: outlined });
                }
            }
        }
        cursor_y += line_gap;
    }

    let total_height = if glyphs.is_empty() { scaled.height() } else { cursor_y - line_gap + scaled.descent().abs() };
    (glyphs, max_x_seen.max(1.0), total_height.max(1.0))
}

/// Blends `color` (with per-pixel coverage) into `buf` at `(dst_x, dst_y)`.
fn blend_coverage(buf: &mut [u8], width: u32, height: u32, dst_x: i32, dst_y: i32, coverage: f32, color: [u8; 4]) {
    if dst_x < 0 || dst_y < 0 || dst_x as u32 >= width || dst_y as u32 >= height {
        return;
    }
    let idx = (dst_y as usize * width as usize + dst_x as usize) * 4;
    let Some(px) = buf.get_mut(idx..idx + 4) else { return };
    let src_a = coverage.clamp(0.0, 1.0) * (color[3] as f32 / 255.0);
    let dst_a = px[3] as f32 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return;
    }
    for c in 0..3 {
        let s = color[c] as f32 / 255.0;
        let d = px[c] as f32 / 255.0;
        px[c] = (((s * src_a + d * dst_a * (1.0 - src_a)) / out_a) * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    px[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

pub struct TextSource {
    pub image: Image,
}

impl TextSource {
    /// Rasterizes `opts` into a tight RGBA bitmap: background (if any),
    /// drop shadow, stroke outline, then glyph fill, in that paint order.
    pub fn rasterize(opts: &TextOptions) -> framecast_core::Result<Self> {
        let font = load_font(opts.font_family.as_deref(), opts.weight)?;
        let font = font.as_font();
        let scale = PxScale::from(opts.size as f32);

        let (glyphs, text_w, text_h) =
            layout(font, &opts.text, scale, opts.max_width, opts.line_height);

        let shadow_pad = opts.shadow.map(|s| (s.offset_x.abs() + s.blur).ceil() as u32).unwrap_or(0);
        let stroke_pad = opts.stroke.map(|s| s.width.ceil() as u32).unwrap_or(0);
        let pad = shadow_pad.max(stroke_pad).max(2);

        let width = text_w.ceil() as u32 + pad * 2;
        let height = text_h.ceil() as u32 + pad * 2;
        let mut rgba = vec![0u8; (width as usize) * (height as usize) * 4];

        if let Some(bg) = opts.background {
            for px in rgba.chunks_exact_mut(4) {
                px.copy_from_slice(&bg);
            }
        }

        if let Some(shadow) = opts.shadow {
            paint_glyphs(
                &mut rgba,
                width,
                height,
                &glyphs,
                pad as i32 + shadow.offset_x.round() as i32,
                pad as i32 + shadow.offset_y.round() as i32,
                shadow.blur.max(0.0) as i32,
                shadow.color,
            );
        }

        if let Some(stroke) = opts.stroke {
            paint_glyphs(
                &mut rgba,
                width,
                height,
                &glyphs,
                pad as i32,
                pad as i32,
                stroke.width.round() as i32,
                stroke.color,
            );
        }

        paint_glyphs(&mut rgba, width, height, &glyphs, pad as i32, pad as i32, 0, opts.color);

        Ok(Self { image: Image { width, height, rgba } })
    }

    pub fn get_frame_at(&self, _t: f64) -> Option<Image> {
        Some(self.image.clone())
    }
}

/// Paints every outlined glyph's coverage mask into `buf`, offset by
/// `(origin_x, origin_y)` and optionally dilated by `spread` pixels (used
/// for both the stroke outline and the shadow's cheap box-blur stand-in).
fn paint_glyphs(
    buf: &mut [u8],
    width: u32,
    height: u32,
    glyphs: &[LaidOutGlyph],
    origin_x: i32,
    origin_y: i32,
    spread: i32,
    color: [u8; 4],
) {
    for g in glyphs {
        let bounds = g.glyph.px_bounds();
        let min_x = bounds.min.x as i32 + origin_x;
        let min_y = bounds.min.y as i32 + origin_y;
        g.glyph.draw(|gx, gy, coverage| {
            if coverage <= 0.0 {
                return;
            }
            if spread == 0 {
                blend_coverage(buf, width, height, min_x + gx as i32, min_y + gy as i32, coverage, color);
            } else {
                for dy in -spread..=spread {
                    for dx in -spread..=spread {
                        blend_coverage(
                            buf,
                            width,
                            height,
                            min_x + gx as i32 + dx,
                            min_y + gy as i32 + dy,
                            coverage * 0.5,
                            color,
                        );
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_coverage_ignores_out_of_bounds() {
        let mut buf = vec![0u8; 4 * 4 * 4];
        blend_coverage(&mut buf, 4, 4, -1, 0, 1.0, [255, 0, 0, 255]);
        blend_coverage(&mut buf, 4, 4, 4, 0, 1.0, [255, 0, 0, 255]);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn blend_coverage_full_opaque_overwrites() {
        let mut buf = vec![10u8; 4];
        blend_coverage(&mut buf, 1, 1, 0, 0, 1.0, [200, 100, 50, 255]);
        assert_eq!(buf, vec![200, 100, 50, 255]);
    }
}
