//! CPU-side glyph shaping and rasterization backing `create_text_format` /
//! `draw_text` / `draw_glyph_run`. Uses `ab_glyph` to rasterize glyph
//! coverage masks with no windowing-system dependency, which is what a
//! `wgpu`-based backend needs to then upload as a texture.

use ab_glyph::{Font, FontVec, Glyph, GlyphId, OutlinedGlyph, Point, ScaleFont};

use crate::{GraphicsError, TextFormatDesc};

/// A loaded, sized font face plus the cached advance/glyph-id table for
/// the ten digit glyphs ("glyph indices for digits '0'..'9' are
/// cached at start").
pub struct TextFormat {
    pub desc: TextFormatDesc,
    font: FontVec,
    scale: ab_glyph::PxScale,
    /// glyph ids for '0'..='9', indexed by digit value.
    digit_glyphs: [GlyphId; 10],
    /// tabular advance shared by every digit, derived from '0'.
    pub tabular_advance: f32,
}

impl TextFormat {
    pub fn load(desc: TextFormatDesc, font_bytes: Vec<u8>) -> Result<Self, GraphicsError> {
        let font = FontVec::try_from_vec(font_bytes)
            .map_err(|_| GraphicsError::FontNotFound(desc.font_family.clone()))?;

        let scale = ab_glyph::PxScale::from(desc.size);
        let scaled = font.as_scaled(scale);

        let mut digit_glyphs = [GlyphId(0); 10];
        for (digit, slot) in digit_glyphs.iter_mut().enumerate() {
            let ch = char::from_digit(digit as u32, 10).unwrap();
            *slot = font.glyph_id(ch);
        }

        let zero_advance = scaled.h_advance(digit_glyphs[0]);

        Ok(Self {
            desc,
            font,
            scale,
            digit_glyphs,
            tabular_advance: zero_advance,
        })
    }

    fn glyph_for_digit(&self, digit: u8) -> GlyphId {
        self.digit_glyphs[(digit % 10) as usize]
    }

    /// Shapes an ASCII string (digits use the tabular advance table;
    /// non-digit characters fall back to their natural advance) into a
    /// list of positioned glyphs and the overall bounding box width.
    pub fn shape(&self, text: &str) -> (Vec<Glyph>, f32) {
        let scaled = self.font.as_scaled(self.scale);
        let mut glyphs = Vec::with_capacity(text.len());
        let mut cursor = 0.0f32;

        for ch in text.chars() {
            let (id, advance) = if let Some(digit) = ch.to_digit(10) {
                (self.glyph_for_digit(digit as u8), self.tabular_advance)
            } else {
                let id = self.font.glyph_id(ch);
                (id, scaled.h_advance(id))
            };

            glyphs.push(Glyph {
                id,
                scale: self.scale,
                position: Point { x: cursor, y: scaled.ascent() },
            });

            cursor += advance;
        }

        (glyphs, cursor)
    }

    /// Rasterizes a shaped glyph run into an RGBA8 coverage buffer sized
    /// `width x height`, applying the fill colour and, if
    /// `desc.border_size > 0`, a dilated-mask border underneath it, standing
    /// in for a true stroke-to-fill outline since no path-geometry stroke
    /// API is available in this rasterizer.
    pub fn rasterize(&self, glyphs: &[Glyph], width: u32, height: u32) -> Vec<u8> {
        let mut coverage = vec![0f32; (width * height) as usize];

        for glyph in glyphs {
            if let Some(outlined) = self.font.outline_glyph(glyph.clone()) {
                paint_glyph(&outlined, width, height, &mut coverage);
            }
        }

        let border = self.desc.border_size.max(0.0).round() as u32;
        let mut out = vec![0u8; (width * height * 4) as usize];

        let dilated = if border > 0 {
            dilate(&coverage, width, height, border)
        } else {
            coverage.clone()
        };

        for y in 0..height {
            for x in 0..width {
                let idx = (y * width + x) as usize;
                let fill = coverage[idx];
                let border_cov = (dilated[idx] - fill).max(0.0);

                let px = blend(self.desc.color, self.desc.border_color, fill, border_cov);
                out[idx * 4] = px[0];
                out[idx * 4 + 1] = px[1];
                out[idx * 4 + 2] = px[2];
                out[idx * 4 + 3] = px[3];
            }
        }

        out
    }
}

fn paint_glyph(outlined: &OutlinedGlyph, width: u32, height: u32, coverage: &mut [f32]) {
    let bounds = outlined.px_bounds();
    outlined.draw(|gx, gy, c| {
        let x = bounds.min.x as i32 + gx as i32;
        let y = bounds.min.y as i32 + gy as i32;
        if x < 0 || y < 0 || x as u32 >= width || y as u32 >= height {
            return;
        }

        let idx = (y as u32 * width + x as u32) as usize;
        coverage[idx] = coverage[idx].max(c);
    });
}

/// Morphological dilation by `radius` pixels (max over a square window),
/// used to approximate a stroked border around the glyph fill.
fn dilate(coverage: &[f32], width: u32, height: u32, radius: u32) -> Vec<f32> {
    let r = radius as i32;
    let mut out = vec![0f32; coverage.len()];

    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let mut max = 0f32;
            for dy in -r..=r {
                for dx in -r..=r {
                    let (sx, sy) = (x + dx, y + dy);
                    if sx < 0 || sy < 0 || sx as u32 >= width || sy as u32 >= height {
                        continue;
                    }
                    let v = coverage[(sy as u32 * width + sx as u32) as usize];
                    if v > max {
                        max = v;
                    }
                }
            }
            out[(y as u32 * width + x as u32) as usize] = max;
        }
    }

    out
}

fn blend(fill: [f32; 4], border: [f32; 4], fill_cov: f32, border_cov: f32) -> [u8; 4] {
    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let mut out = [0f32; 4];
    for i in 0..4 {
        out[i] = border[i] * border_cov + fill[i] * fill_cov;
    }
    [to_u8(out[0]), to_u8(out[1]), to_u8(out[2]), to_u8(out[3].max(fill_cov).max(border_cov))]
}
