//! Static and scrolling text rendering.
//!
//! The rendered text strip is cached and keyed by a hash of the text
//! configuration; scrolling only moves the cached strip, it never re-rasters
//! glyphs per tick.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tiny_skia::Pixmap;

use ledwall_core::program::model::{parse_color, Content, TextContent};

use super::{ContentPlugin, PluginRenderError, RenderCtx};
use crate::render::font::{self, GLYPH_SPACING, GLYPH_WIDTH};
use crate::render::surface::{blit, new_surface};

pub struct TextPlugin {
    cache: Option<(u64, Pixmap)>,
}

impl TextPlugin {
    pub fn new() -> Self {
        Self { cache: None }
    }

    fn config_key(content: &TextContent) -> u64 {
        let mut hasher = DefaultHasher::new();
        content.string.hash(&mut hasher);
        content.font.size.hash(&mut hasher);
        content.font.color.hash(&mut hasher);
        hasher.finish()
    }

    /// Returns the cached text strip, re-rendering it when the config hash
    /// changed.
    fn strip(&mut self, content: &TextContent) -> Result<&Pixmap, PluginRenderError> {
        let key = Self::config_key(content);
        let stale = match &self.cache {
            Some((cached_key, _)) => *cached_key != key,
            None => true,
        };
        if stale {
            let scale = font::scale_for_size(content.font.size);
            let width = font::text_width(&content.string, scale).max(1);
            let height = font::line_height(scale);
            let mut strip = new_surface(width, height)?;
            font::draw_text(
                &mut strip,
                &content.string,
                0,
                0,
                scale,
                parse_color(&content.font.color),
            );
            self.cache = Some((key, strip));
        }
        // The branch above guarantees the cache is populated.
        Ok(&self.cache.as_ref().unwrap().1)
    }
}

impl Default for TextPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentPlugin for TextPlugin {
    fn render(&mut self, ctx: &mut RenderCtx<'_>) -> Result<(), PluginRenderError> {
        let area_w = ctx.surface.width() as i32;
        let area_h = ctx.surface.height() as i32;

        match ctx.content {
            Content::StaticText(t) => {
                let strip = self.strip(t)?;
                let x = match t.align.as_str() {
                    "left" => 0,
                    "right" => area_w - strip.width() as i32,
                    _ => (area_w - strip.width() as i32) / 2,
                };
                let y = (area_h - strip.height() as i32) / 2;
                blit(ctx.surface, strip, x, y.max(0), 255);
            }
            Content::ScrollingText(t) => {
                let scale = font::scale_for_size(t.font.size);
                let gap = ((GLYPH_WIDTH + GLYPH_SPACING) * scale * 2) as i32;
                let speed = t.speed.max(1) as u64;
                let offset_px = (ctx.elapsed_ms * speed / 1_000) as i32;

                let strip = self.strip(t)?.clone();
                let cycle = strip.width() as i32 + gap;
                let y = (area_h - strip.height() as i32) / 2;

                // Head-to-tail wrap: repeat the strip every `cycle` pixels.
                let mut x = -(offset_px % cycle);
                while x < area_w {
                    blit(ctx.surface, &strip, x, y.max(0), 255);
                    x += cycle;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn on_config_changed(&mut self, _content: &Content) {
        self.cache = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
