//! Pixel-surface helpers on top of `tiny_skia::Pixmap`.
//!
//! Compositing goes through `draw_pixmap` so per-area opacity and blending
//! match tiny-skia's premultiplied model; the operations tiny-skia has no
//! primitive for (quarter-turn rotation, brightness scaling, raw pixel pokes)
//! are manual loops over the premultiplied RGBA buffer.

use thiserror::Error;
use tiny_skia::{
    BlendMode, Color, FilterQuality, Pixmap, PixmapPaint, PremultipliedColorU8, Transform,
};

use ledwall_core::program::model::Rotation;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("zero-sized or oversized surface {0}x{1}")]
    BadDimensions(u32, u32),
}

/// Allocates a transparent surface.
///
/// # Errors
///
/// Returns [`SurfaceError::BadDimensions`] when either dimension is zero or
/// exceeds tiny-skia's limits.
pub fn new_surface(width: u32, height: u32) -> Result<Pixmap, SurfaceError> {
    Pixmap::new(width, height).ok_or(SurfaceError::BadDimensions(width, height))
}

/// Fills the whole surface with an opaque color.
pub fn fill(surface: &mut Pixmap, r: u8, g: u8, b: u8) {
    surface.fill(Color::from_rgba8(r, g, b, 255));
}

/// Source-over blit of `src` at (`x`, `y`) with `alpha` 0–255.
pub fn blit(dst: &mut Pixmap, src: &Pixmap, x: i32, y: i32, alpha: u8) {
    let paint = PixmapPaint {
        opacity: alpha as f32 / 255.0,
        blend_mode: BlendMode::SourceOver,
        quality: FilterQuality::Nearest,
    };
    dst.draw_pixmap(x, y, src.as_ref(), &paint, Transform::identity(), None);
}

/// Sets one pixel to an opaque color.  Out-of-bounds coordinates are ignored.
pub fn set_pixel(surface: &mut Pixmap, x: i32, y: i32, r: u8, g: u8, b: u8) {
    if x < 0 || y < 0 || x as u32 >= surface.width() || y as u32 >= surface.height() {
        return;
    }
    let idx = y as usize * surface.width() as usize + x as usize;
    if let Some(px) = PremultipliedColorU8::from_rgba(r, g, b, 255) {
        surface.pixels_mut()[idx] = px;
    }
}

/// Reads one pixel as premultiplied (r, g, b, a); `None` out of bounds.
pub fn get_pixel(surface: &Pixmap, x: u32, y: u32) -> Option<(u8, u8, u8, u8)> {
    if x >= surface.width() || y >= surface.height() {
        return None;
    }
    let px = surface.pixels()[y as usize * surface.width() as usize + x as usize];
    Some((px.red(), px.green(), px.blue(), px.alpha()))
}

/// Returns a copy of `src` rotated by the given quarter turn.  Deg90 and
/// Deg270 swap the surface dimensions.
pub fn rotate(src: &Pixmap, rotation: Rotation) -> Pixmap {
    if rotation == Rotation::Deg0 {
        return src.clone();
    }
    let (w, h) = (src.width(), src.height());
    let (out_w, out_h) = match rotation {
        Rotation::Deg90 | Rotation::Deg270 => (h, w),
        _ => (w, h),
    };
    // Dimensions of a valid pixmap are always valid swapped.
    let mut out = Pixmap::new(out_w, out_h).unwrap_or_else(|| src.clone());
    let src_px = src.pixels();
    let out_px = out.pixels_mut();
    for y in 0..h {
        for x in 0..w {
            let (dx, dy) = match rotation {
                Rotation::Deg0 => (x, y),
                // Clockwise quarter turns.
                Rotation::Deg90 => (h - 1 - y, x),
                Rotation::Deg180 => (w - 1 - x, h - 1 - y),
                Rotation::Deg270 => (y, w - 1 - x),
            };
            out_px[(dy * out_w + dx) as usize] = src_px[(y * w + x) as usize];
        }
    }
    out
}

/// Scales the color channels by `level`/100, alpha untouched.  Scaling only
/// downward keeps the premultiplied channel ≤ alpha invariant intact.
pub fn apply_brightness(surface: &mut Pixmap, level: u8) {
    let level = level.min(100) as u32;
    if level == 100 {
        return;
    }
    for chunk in surface.data_mut().chunks_exact_mut(4) {
        chunk[0] = ((chunk[0] as u32 * level) / 100) as u8;
        chunk[1] = ((chunk[1] as u32 * level) / 100) as u8;
        chunk[2] = ((chunk[2] as u32 * level) / 100) as u8;
    }
}

/// Maps the surface through a 256-entry lookup table, alpha untouched.
pub fn apply_gamma(surface: &mut Pixmap, table: &[u8]) {
    if table.len() != 256 {
        return;
    }
    for chunk in surface.data_mut().chunks_exact_mut(4) {
        chunk[0] = table[chunk[0] as usize];
        chunk[1] = table[chunk[1] as usize];
        chunk[2] = table[chunk[2] as usize];
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blit_respects_position() {
        let mut dst = new_surface(8, 8).expect("dst");
        let mut src = new_surface(2, 2).expect("src");
        fill(&mut src, 0, 255, 0);

        blit(&mut dst, &src, 3, 4, 255);

        assert_eq!(get_pixel(&dst, 3, 4), Some((0, 255, 0, 255)));
        assert_eq!(get_pixel(&dst, 4, 5), Some((0, 255, 0, 255)));
        assert_eq!(get_pixel(&dst, 2, 4), Some((0, 0, 0, 0)));
    }

    #[test]
    fn test_rotate_90_moves_corner_pixel() {
        let mut src = new_surface(4, 2).expect("src");
        set_pixel(&mut src, 0, 0, 255, 0, 0);

        let out = rotate(&src, Rotation::Deg90);

        assert_eq!(out.width(), 2);
        assert_eq!(out.height(), 4);
        // Top-left lands at top-right under a clockwise quarter turn.
        assert_eq!(get_pixel(&out, 1, 0), Some((255, 0, 0, 255)));
    }

    #[test]
    fn test_rotate_180_moves_corner_to_opposite_corner() {
        let mut src = new_surface(3, 3).expect("src");
        set_pixel(&mut src, 0, 0, 0, 0, 255);

        let out = rotate(&src, Rotation::Deg180);
        assert_eq!(get_pixel(&out, 2, 2), Some((0, 0, 255, 255)));
    }

    #[test]
    fn test_brightness_half_scales_channels() {
        let mut surface = new_surface(1, 1).expect("surface");
        fill(&mut surface, 200, 100, 50);

        apply_brightness(&mut surface, 50);

        let (r, g, b, _) = get_pixel(&surface, 0, 0).expect("pixel");
        assert_eq!((r, g, b), (100, 50, 25));
    }

    #[test]
    fn test_brightness_100_is_identity() {
        let mut surface = new_surface(1, 1).expect("surface");
        fill(&mut surface, 12, 34, 56);
        apply_brightness(&mut surface, 100);
        assert_eq!(get_pixel(&surface, 0, 0), Some((12, 34, 56, 255)));
    }

    #[test]
    fn test_gamma_lookup_applies_table() {
        let mut surface = new_surface(1, 1).expect("surface");
        fill(&mut surface, 10, 20, 30);

        let table: Vec<u8> = (0..=255u16).map(|v| (v * 2).min(255) as u8).collect();
        apply_gamma(&mut surface, &table);

        let (r, g, b, a) = get_pixel(&surface, 0, 0).expect("pixel");
        assert_eq!((r, g, b), (20, 40, 60));
        assert_eq!(a, 255);
    }
}
