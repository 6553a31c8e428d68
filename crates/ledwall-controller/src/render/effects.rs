//! Scene transitions and area border effects.

use tiny_skia::Pixmap;

use ledwall_core::program::model::{parse_color, BorderEffect, TransitionKind};

use super::surface::{blit, set_pixel};

/// Composites the outgoing and incoming scene frames into `dst` at linear
/// `progress` in 0.0..=1.0.
pub fn blend_scenes(
    dst: &mut Pixmap,
    outgoing: &Pixmap,
    incoming: &Pixmap,
    kind: TransitionKind,
    progress: f32,
) {
    let progress = progress.clamp(0.0, 1.0);
    let w = dst.width() as i32;
    let h = dst.height() as i32;
    match kind {
        TransitionKind::Cut => {
            let shown = if progress < 1.0 { outgoing } else { incoming };
            blit(dst, shown, 0, 0, 255);
        }
        TransitionKind::Fade => {
            blit(dst, outgoing, 0, 0, 255);
            blit(dst, incoming, 0, 0, (progress * 255.0) as u8);
        }
        TransitionKind::SlideLeft => {
            let shift = (progress * w as f32) as i32;
            blit(dst, outgoing, -shift, 0, 255);
            blit(dst, incoming, w - shift, 0, 255);
        }
        TransitionKind::SlideUp => {
            let shift = (progress * h as f32) as i32;
            blit(dst, outgoing, 0, -shift, 255);
            blit(dst, incoming, 0, h - shift, 255);
        }
    }
}

/// Length in pixels of one marching segment of the neon border.
const NEON_SEGMENT: u64 = 4;

/// Draws the area border onto an area-sized surface.  `elapsed_ms` drives the
/// neon march; a solid border ignores it.
pub fn draw_border(surface: &mut Pixmap, border: &BorderEffect, elapsed_ms: u64) {
    let (r, g, b) = parse_color(&border.color);
    let w = surface.width() as i32;
    let h = surface.height() as i32;

    let perimeter = perimeter_points(w, h);
    if perimeter.is_empty() {
        return;
    }

    if border.effect == "neon" {
        // Speed 0 freezes the march; 8 advances one segment every ~31 ms.
        let step = if border.speed == 0 {
            0
        } else {
            elapsed_ms * border.speed as u64 / 250
        };
        for (i, &(x, y)) in perimeter.iter().enumerate() {
            let lit = ((i as u64 + step) / NEON_SEGMENT) % 2 == 0;
            if lit {
                set_pixel(surface, x, y, r, g, b);
            }
        }
    } else {
        for &(x, y) in &perimeter {
            set_pixel(surface, x, y, r, g, b);
        }
    }
}

/// Clockwise perimeter walk starting at the top-left corner, each point once.
fn perimeter_points(w: i32, h: i32) -> Vec<(i32, i32)> {
    if w <= 0 || h <= 0 {
        return Vec::new();
    }
    if w == 1 {
        return (0..h).map(|y| (0, y)).collect();
    }
    if h == 1 {
        return (0..w).map(|x| (x, 0)).collect();
    }
    let mut points = Vec::with_capacity((2 * (w + h) - 4) as usize);
    for x in 0..w {
        points.push((x, 0));
    }
    for y in 1..h {
        points.push((w - 1, y));
    }
    for x in (0..w - 1).rev() {
        points.push((x, h - 1));
    }
    for y in (1..h - 1).rev() {
        points.push((0, y));
    }
    points
}

// ── Tests ─────────────────────────────────────────────────────────────────────
