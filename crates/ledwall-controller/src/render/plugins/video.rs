//! Frame sink for video and HDMI-in areas.
//!
//! Decoding happens in an external collaborator which pushes timestamped
//! RGBA frames into the [`VideoHub`](super::VideoHub); this plugin only
//! presents the latest delivered frame.  A frame that arrives late simply
//! overwrites its predecessor in the hub and is never shown — frame-drop,
//! not queueing.

use std::sync::Arc;

use tiny_skia::Pixmap;

use ledwall_core::program::model::Content;

use super::{ContentPlugin, PluginRenderError, RenderCtx, VideoFrame, VideoHub};
use crate::render::surface::{blit, new_surface};

pub struct VideoPlugin {
    /// pts of the frame currently cached as a surface.
    cached_pts: Option<u64>,
    cached: Option<Pixmap>,
}

impl VideoPlugin {
    pub fn new() -> Self {
        Self {
            cached_pts: None,
            cached: None,
        }
    }
}

impl Default for VideoPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// Copies a raw RGBA frame into a premultiplied surface.
fn frame_to_surface(frame: &VideoFrame) -> Result<Pixmap, PluginRenderError> {
    let mut surface = new_surface(frame.width.max(1), frame.height.max(1))?;
    let pixels = surface.pixels_mut();
    for (i, chunk) in frame.rgba.chunks_exact(4).enumerate() {
        if i >= pixels.len() {
            break;
        }
        pixels[i] = tiny_skia::ColorU8::from_rgba(chunk[0], chunk[1], chunk[2], chunk[3]).premultiply();
    }
    Ok(surface)
}

impl ContentPlugin for VideoPlugin {
    fn render(&mut self, ctx: &mut RenderCtx<'_>) -> Result<(), PluginRenderError> {
        let (source, keep_aspect) = match ctx.content {
            Content::Video(v) => (v.source.clone(), v.keep_aspect),
            Content::HdmiIn(h) => (VideoHub::hdmi_source(h.port), true),
            _ => return Ok(()),
        };

        let frame: Arc<VideoFrame> = ctx
            .video
            .latest(&source)
            .ok_or_else(|| PluginRenderError::NoFrame(source.clone()))?;

        if self.cached_pts != Some(frame.pts_ms) || self.cached.is_none() {
            let surface = frame_to_surface(&frame)?;
            let (aw, ah) = (ctx.surface.width(), ctx.surface.height());
            let scaled = if keep_aspect {
                let sx = aw as f32 / surface.width() as f32;
                let sy = ah as f32 / surface.height() as f32;
                let s = sx.min(sy);
                let w = ((surface.width() as f32 * s) as u32).max(1);
                let h = ((surface.height() as f32 * s) as u32).max(1);
                super::image::scale_nearest(&surface, w, h)?
            } else {
                super::image::scale_nearest(&surface, aw, ah)?
            };
            self.cached = Some(scaled);
            self.cached_pts = Some(frame.pts_ms);
        }

        if let Some(surface) = &self.cached {
            let x = (ctx.surface.width() as i32 - surface.width() as i32) / 2;
            let y = (ctx.surface.height() as i32 - surface.height() as i32) / 2;
            blit(ctx.surface, surface, x, y, 255);
        }
        Ok(())
    }

    fn on_config_changed(&mut self, _content: &Content) {
        self.cached = None;
        self.cached_pts = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::plugins::DataFeeds;
    use crate::render::surface::get_pixel;
    use chrono::NaiveDate;
    use ledwall_core::program::model::VideoContent;
    use std::path::Path;

    fn now() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 28)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn render_once(
        hub: &VideoHub,
        plugin: &mut VideoPlugin,
        content: &Content,
        w: u32,
        h: u32,
    ) -> Result<Pixmap, PluginRenderError> {
        let feeds = DataFeeds::new();
        let mut surface = new_surface(w, h).expect("surface");
        plugin.render(&mut RenderCtx {
            surface: &mut surface,
            content,
            elapsed_ms: 0,
            local: now(),
            utc: now(),
            feeds: &feeds,
            video: hub,
            media_dir: Path::new("."),
        })?;
        Ok(surface)
    }

    #[test]
    fn test_missing_source_reports_no_frame() {
        let hub = VideoHub::new();
        let content = Content::Video(VideoContent {
            source: "cam".to_string(),
            keep_aspect: false,
        });
        let err = render_once(&hub, &mut VideoPlugin::new(), &content, 8, 8).expect_err("no frame");
        assert!(matches!(err, PluginRenderError::NoFrame(_)));
    }

    #[test]
    fn test_latest_frame_is_presented() {
        let hub = VideoHub::new();
        let tx = hub.register("cam");
        let content = Content::Video(VideoContent {
            source: "cam".to_string(),
            keep_aspect: false,
        });

        // Red 2x2 frame, then a green one: only green must show.
        tx.send(Some(Arc::new(VideoFrame {
            width: 2,
            height: 2,
            rgba: [255u8, 0, 0, 255].repeat(4),
            pts_ms: 0,
        })))
        .expect("send");
        tx.send(Some(Arc::new(VideoFrame {
            width: 2,
            height: 2,
            rgba: [0u8, 255, 0, 255].repeat(4),
            pts_ms: 40,
        })))
        .expect("send");

        let surface = render_once(&hub, &mut VideoPlugin::new(), &content, 4, 4).expect("render");
        assert_eq!(get_pixel(&surface, 0, 0), Some((0, 255, 0, 255)));
    }
}
