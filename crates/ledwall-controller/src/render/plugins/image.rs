//! Still-image rendering.
//!
//! The media file is decoded once and the scaled surface cached; the cache
//! key covers the file name, fit mode, and area size so a program update
//! that changes any of them forces a re-decode.

use tiny_skia::Pixmap;

use ledwall_core::program::model::{Content, ImageContent};

use super::{ContentPlugin, PluginRenderError, RenderCtx};
use crate::render::surface::{blit, new_surface};

pub struct ImagePlugin {
    cache: Option<(String, Pixmap)>,
}

impl ImagePlugin {
    pub fn new() -> Self {
        Self { cache: None }
    }

    fn cache_key(content: &ImageContent, w: u32, h: u32) -> String {
        format!("{}|{}|{w}x{h}", content.file, content.fit)
    }
}

impl Default for ImagePlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes a media file into an unscaled surface.
fn decode(path: &std::path::Path, file: &str) -> Result<Pixmap, PluginRenderError> {
    if !path.exists() {
        return Err(PluginRenderError::MissingMedia(file.to_string()));
    }
    let decoded = image::open(path)
        .map_err(|e| PluginRenderError::Decode {
            file: file.to_string(),
            reason: e.to_string(),
        })?
        .to_rgba8();
    let (w, h) = decoded.dimensions();
    let mut surface = new_surface(w.max(1), h.max(1))?;
    let pixels = surface.pixels_mut();
    for (x, y, px) in decoded.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        pixels[(y * w + x) as usize] = tiny_skia::ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(surface)
}

/// Nearest-neighbour scale to exactly (w, h).  Shared with the video sink.
pub(super) fn scale_nearest(src: &Pixmap, w: u32, h: u32) -> Result<Pixmap, PluginRenderError> {
    let mut out = new_surface(w, h)?;
    let (sw, sh) = (src.width(), src.height());
    let src_px = src.pixels();
    let out_px = out.pixels_mut();
    for y in 0..h {
        let sy = (y as u64 * sh as u64 / h as u64) as u32;
        for x in 0..w {
            let sx = (x as u64 * sw as u64 / w as u64) as u32;
            out_px[(y * w + x) as usize] = src_px[(sy * sw + sx) as usize];
        }
    }
    Ok(out)
}

impl ContentPlugin for ImagePlugin {
    fn render(&mut self, ctx: &mut RenderCtx<'_>) -> Result<(), PluginRenderError> {
        let Content::Image(content) = ctx.content else {
            return Ok(());
        };
        let (w, h) = (ctx.surface.width(), ctx.surface.height());
        let key = Self::cache_key(content, w, h);

        let stale = !matches!(&self.cache, Some((k, _)) if *k == key);
        if stale {
            let decoded = decode(&ctx.media_dir.join(&content.file), &content.file)?;
            let prepared = if content.fit == "center" {
                decoded
            } else {
                scale_nearest(&decoded, w, h)?
            };
            self.cache = Some((key, prepared));
        }

        if let Some((_, surface)) = &self.cache {
            let x = (w as i32 - surface.width() as i32) / 2;
            let y = (h as i32 - surface.height() as i32) / 2;
            blit(ctx.surface, surface, x, y, 255);
        }
        Ok(())
    }

    fn on_config_changed(&mut self, _content: &Content) {
        self.cache = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
