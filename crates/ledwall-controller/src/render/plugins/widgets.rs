//! Data-driven widgets: sensor, weather, network feed, Modbus register,
//! table, document pager, and the web-URL placeholder.
//!
//! All of them reduce to "latest sample(s) as text lines"; the lines are
//! drawn with the matrix font, one per row, centered.

use ledwall_core::program::model::{parse_color, Content, FontSpec};

use super::{ContentPlugin, DataFeeds, PluginRenderError, RenderCtx};
use crate::render::font;

pub struct WidgetPlugin;

impl WidgetPlugin {
    pub fn new() -> Self {
        Self
    }

    /// Resolves the text lines for the bound content at this tick.
    fn lines(ctx: &RenderCtx<'_>) -> Result<(Vec<String>, FontSpec), PluginRenderError> {
        match ctx.content {
            Content::Sensor(c) => {
                let value = ctx
                    .feeds
                    .get(&c.sensor)
                    .ok_or_else(|| PluginRenderError::NoSample(c.sensor.clone()))?;
                let line = if c.label.is_empty() {
                    value
                } else {
                    format!("{} {}", c.label, value)
                };
                Ok((vec![line], c.font.clone()))
            }
            Content::Weather(c) => {
                let key = format!("weather:{}", c.city);
                let value = ctx
                    .feeds
                    .get(&key)
                    .ok_or(PluginRenderError::NoSample(key))?;
                Ok((vec![c.city.clone(), value], c.font.clone()))
            }
            Content::NetworkData(c) => {
                let value = ctx
                    .feeds
                    .get(&c.feed)
                    .ok_or_else(|| PluginRenderError::NoSample(c.feed.clone()))?;
                Ok((vec![value], c.font.clone()))
            }
            Content::Modbus(c) => {
                let key = DataFeeds::modbus_key(c.unit, c.register);
                let value = ctx
                    .feeds
                    .get(&key)
                    .ok_or(PluginRenderError::NoSample(key))?;
                let line = if c.label.is_empty() {
                    value
                } else {
                    format!("{} {}", c.label, value)
                };
                Ok((vec![line], c.font.clone()))
            }
            Content::Table(c) => {
                let lines = c.rows.iter().map(|row| row.cells.join(" ")).collect();
                Ok((lines, c.font.clone()))
            }
            Content::Document(c) => {
                if c.pages.is_empty() {
                    return Ok((Vec::new(), c.font.clone()));
                }
                let page = (ctx.elapsed_ms / c.page_duration_ms.max(1)) as usize % c.pages.len();
                let lines = c.pages[page].lines().map(str::to_string).collect();
                Ok((lines, c.font.clone()))
            }
            Content::Web(c) => Ok((vec![c.url.clone()], c.font.clone())),
            _ => Ok((Vec::new(), FontSpec::default())),
        }
    }
}

impl Default for WidgetPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentPlugin for WidgetPlugin {
    fn render(&mut self, ctx: &mut RenderCtx<'_>) -> Result<(), PluginRenderError> {
        let (lines, font_spec) = Self::lines(ctx)?;
        if lines.is_empty() {
            return Ok(());
        }

        let scale = font::scale_for_size(font_spec.size);
        let color = parse_color(&font_spec.color);
        let w = ctx.surface.width() as i32;
        let h = ctx.surface.height() as i32;
        let line_h = font::line_height(scale) as i32 + scale as i32;
        let mut y = (h - line_h * lines.len() as i32) / 2;
        for line in &lines {
            let x = (w - font::text_width(line, scale) as i32) / 2;
            font::draw_text(ctx.surface, line, x, y.max(0), scale, color);
            y += line_h;
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::plugins::VideoHub;
    use crate::render::surface::new_surface;
    use chrono::NaiveDate;
    use ledwall_core::program::model::{ModbusContent, SensorContent, TableContent, TableRow};
    use std::path::Path;

    fn now() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 28)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn lines_for(content: &Content, feeds: &DataFeeds, elapsed_ms: u64) -> Result<Vec<String>, PluginRenderError> {
        let video = VideoHub::new();
        let mut surface = new_surface(64, 32).expect("surface");
        let ctx = RenderCtx {
            surface: &mut surface,
            content,
            elapsed_ms,
            local: now(),
            utc: now(),
            feeds,
            video: &video,
            media_dir: Path::new("."),
        };
        WidgetPlugin::lines(&ctx).map(|(lines, _)| lines)
    }

    #[test]
    fn test_sensor_renders_latest_sample_with_label() {
        let feeds = DataFeeds::new();
        feeds.publish("temperature", "21.5");
        let content = Content::Sensor(SensorContent {
            sensor: "temperature".to_string(),
            label: "TEMP".to_string(),
            font: FontSpec::default(),
        });

        assert_eq!(lines_for(&content, &feeds, 0).expect("lines"), vec!["TEMP 21.5"]);
    }

    #[test]
    fn test_sensor_without_sample_fails() {
        let feeds = DataFeeds::new();
        let content = Content::Sensor(SensorContent {
            sensor: "humidity".to_string(),
            label: String::new(),
            font: FontSpec::default(),
        });
        assert!(matches!(
            lines_for(&content, &feeds, 0),
            Err(PluginRenderError::NoSample(_))
        ));
    }

    #[test]
    fn test_modbus_reads_its_register_feed() {
        let feeds = DataFeeds::new();
        feeds.publish(&DataFeeds::modbus_key(3, 40001), "1024");
        let content = Content::Modbus(ModbusContent {
            unit: 3,
            register: 40001,
            label: String::new(),
            font: FontSpec::default(),
        });
        assert_eq!(lines_for(&content, &feeds, 0).expect("lines"), vec!["1024"]);
    }

    #[test]
    fn test_table_joins_cells_per_row() {
        let feeds = DataFeeds::new();
        let content = Content::Table(TableContent {
            rows: vec![
                TableRow { cells: vec!["A".into(), "1".into()] },
                TableRow { cells: vec!["B".into(), "2".into()] },
            ],
            font: FontSpec::default(),
        });
        assert_eq!(lines_for(&content, &feeds, 0).expect("lines"), vec!["A 1", "B 2"]);
    }

    #[test]
    fn test_document_pages_rotate_by_elapsed_time() {
        let feeds = DataFeeds::new();
        let content = Content::Document(ledwall_core::program::model::DocumentContent {
            pages: vec!["ONE".to_string(), "TWO".to_string()],
            page_duration_ms: 1_000,
            font: FontSpec::default(),
        });

        assert_eq!(lines_for(&content, &feeds, 0).expect("lines"), vec!["ONE"]);
        assert_eq!(lines_for(&content, &feeds, 1_500).expect("lines"), vec!["TWO"]);
        assert_eq!(lines_for(&content, &feeds, 2_100).expect("lines"), vec!["ONE"]);
    }
}
