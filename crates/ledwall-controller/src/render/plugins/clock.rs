//! Digital clock and calendar rendering.
//!
//! The face is re-rendered only when the displayed second changes; between
//! seconds the cached surface is reused.

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use tiny_skia::Pixmap;

use ledwall_core::program::model::{parse_color, ClockContent, Content, FontSpec};

use super::{ContentPlugin, PluginRenderError, RenderCtx};
use crate::render::font;
use crate::render::surface::{blit, new_surface};

pub struct ClockPlugin {
    cache: Option<(u32, Pixmap)>,
}

impl ClockPlugin {
    pub fn new() -> Self {
        Self { cache: None }
    }

    fn display_time(content: &ClockContent, local: NaiveDateTime, utc: NaiveDateTime) -> NaiveDateTime {
        match content.utc_offset_minutes {
            Some(minutes) => utc + Duration::minutes(minutes as i64),
            None => local,
        }
    }

    fn lines(content: &ClockContent, shown: NaiveDateTime) -> Vec<String> {
        let mut lines = Vec::new();
        if content.show_time {
            lines.push(format!(
                "{:02}:{:02}:{:02}",
                shown.hour(),
                shown.minute(),
                shown.second()
            ));
        }
        if content.show_date {
            lines.push(format!(
                "{:04}-{:02}-{:02}",
                shown.year(),
                shown.month(),
                shown.day()
            ));
        }
        if content.show_week {
            lines.push(weekday_name(shown).to_string());
        }
        lines
    }
}

/// Formats the calendar line, rejecting malformed strftime strings.  The
/// format attribute comes from network XML; `DelayedFormat` panics on
/// display for bad specifiers, so the items are checked first and a bad
/// format degrades the area like any other plugin failure.
fn format_calendar(shown: NaiveDateTime, fmt: &str) -> Result<String, PluginRenderError> {
    use chrono::format::{Item, StrftimeItems};
    let items: Vec<Item<'_>> = StrftimeItems::new(fmt).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(PluginRenderError::BadFormat(fmt.to_string()));
    }
    Ok(shown.format_with_items(items.into_iter()).to_string())
}

fn weekday_name(t: NaiveDateTime) -> &'static str {
    match t.weekday() {
        chrono::Weekday::Mon => "MONDAY",
        chrono::Weekday::Tue => "TUESDAY",
        chrono::Weekday::Wed => "WEDNESDAY",
        chrono::Weekday::Thu => "THURSDAY",
        chrono::Weekday::Fri => "FRIDAY",
        chrono::Weekday::Sat => "SATURDAY",
        chrono::Weekday::Sun => "SUNDAY",
    }
}

/// Stacks text lines centered in a fresh surface of the given size.
fn render_lines(
    width: u32,
    height: u32,
    lines: &[String],
    font_spec: &FontSpec,
) -> Result<Pixmap, PluginRenderError> {
    let mut surface = new_surface(width.max(1), height.max(1))?;
    let scale = font::scale_for_size(font_spec.size);
    let color = parse_color(&font_spec.color);
    let line_h = font::line_height(scale) as i32 + scale as i32;
    let total_h = line_h * lines.len() as i32;
    let mut y = (height as i32 - total_h) / 2;
    for line in lines {
        let x = (width as i32 - font::text_width(line, scale) as i32) / 2;
        font::draw_text(&mut surface, line, x, y.max(0), scale, color);
        y += line_h;
    }
    Ok(surface)
}

impl Default for ClockPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentPlugin for ClockPlugin {
    fn render(&mut self, ctx: &mut RenderCtx<'_>) -> Result<(), PluginRenderError> {
        let (w, h) = (ctx.surface.width(), ctx.surface.height());
        match ctx.content {
            Content::Clock(c) => {
                let shown = Self::display_time(c, ctx.local, ctx.utc);
                let second = shown.num_seconds_from_midnight();
                let stale = !matches!(&self.cache, Some((s, _)) if *s == second);
                if stale {
                    let face = render_lines(w, h, &Self::lines(c, shown), &c.font)?;
                    self.cache = Some((second, face));
                }
                if let Some((_, face)) = &self.cache {
                    blit(ctx.surface, face, 0, 0, 255);
                }
            }
            Content::Calendar(c) => {
                let line = format_calendar(ctx.local, &c.format)?;
                let face = render_lines(w, h, &[line], &c.font)?;
                blit(ctx.surface, &face, 0, 0, 255);
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
