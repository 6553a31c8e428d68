//! Installer test patterns: color bars, grid, checkerboard.

use ledwall_core::program::model::Content;

use super::{ContentPlugin, PluginRenderError, RenderCtx};
use crate::render::surface::set_pixel;

/// The eight SMPTE-ish bar colors, left to right.
const BARS: [(u8, u8, u8); 8] = [
    (255, 255, 255),
    (255, 255, 0),
    (0, 255, 255),
    (0, 255, 0),
    (255, 0, 255),
    (255, 0, 0),
    (0, 0, 255),
    (0, 0, 0),
];

const CELL: u32 = 8;

pub struct TestPatternPlugin;

impl ContentPlugin for TestPatternPlugin {
    fn render(&mut self, ctx: &mut RenderCtx<'_>) -> Result<(), PluginRenderError> {
        let Content::SceneTest(content) = ctx.content else {
            return Ok(());
        };
        let w = ctx.surface.width();
        let h = ctx.surface.height();

        match content.pattern.as_str() {
            "grid" => {
                for y in 0..h {
                    for x in 0..w {
                        if x % CELL == 0 || y % CELL == 0 || x == w - 1 || y == h - 1 {
                            set_pixel(ctx.surface, x as i32, y as i32, 255, 255, 255);
                        } else {
                            set_pixel(ctx.surface, x as i32, y as i32, 0, 0, 0);
                        }
                    }
                }
            }
            "checker" => {
                for y in 0..h {
                    for x in 0..w {
                        let on = ((x / CELL) + (y / CELL)) % 2 == 0;
                        let v = if on { 255 } else { 0 };
                        set_pixel(ctx.surface, x as i32, y as i32, v, v, v);
                    }
                }
            }
            // Default: vertical color bars.
            _ => {
                let bar_w = (w / BARS.len() as u32).max(1);
                for y in 0..h {
                    for x in 0..w {
                        let (r, g, b) = BARS[((x / bar_w) as usize).min(BARS.len() - 1)];
                        set_pixel(ctx.surface, x as i32, y as i32, r, g, b);
                    }
                }
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
