//! Content plugins: one renderer per content capability.
//!
//! The capability set is closed and registered at startup — dispatch is a
//! compile-time match over the content union, no dynamic loading.  Each
//! plugin owns its own cache (rendered text surface, decoded image, scroll
//! offset) keyed by the area it is bound to; the engine creates one plugin
//! instance per area and drops it when the area disappears.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::NaiveDateTime;
use thiserror::Error;
use tiny_skia::Pixmap;
use tokio::sync::watch;

use ledwall_core::program::model::Content;

use super::surface::SurfaceError;

pub mod clock;
pub mod image;
pub mod testpattern;
pub mod text;
pub mod video;
pub mod widgets;

/// Why a plugin could not produce pixels this tick.  The engine paints the
/// area with the fallback color and logs; the frame always completes.
#[derive(Debug, Error)]
pub enum PluginRenderError {
    #[error("media file `{0}` not found")]
    MissingMedia(String),
    #[error("failed to decode `{file}`: {reason}")]
    Decode { file: String, reason: String },
    #[error("no frame available from video source `{0}`")]
    NoFrame(String),
    #[error("no sample for data feed `{0}`")]
    NoSample(String),
    #[error("invalid strftime format `{0}`")]
    BadFormat(String),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

/// Everything a plugin may look at while rendering one area for one tick.
pub struct RenderCtx<'a> {
    /// Area-sized surface, cleared to transparent before the call.
    pub surface: &'a mut Pixmap,
    pub content: &'a Content,
    /// Milliseconds since the current scene phase began.
    pub elapsed_ms: u64,
    pub local: NaiveDateTime,
    pub utc: NaiveDateTime,
    pub feeds: &'a DataFeeds,
    pub video: &'a VideoHub,
    pub media_dir: &'a Path,
}

/// A content renderer bound to one area.
pub trait ContentPlugin: Send {
    /// Renders the area for this tick.
    fn render(&mut self, ctx: &mut RenderCtx<'_>) -> Result<(), PluginRenderError>;

    /// Invalidates caches after the bound content configuration changed.
    fn on_config_changed(&mut self, _content: &Content) {}
}

/// Instantiates the plugin for a content binding.
pub fn plugin_for(content: &Content) -> Box<dyn ContentPlugin> {
    match content {
        Content::StaticText(_) | Content::ScrollingText(_) => Box::new(text::TextPlugin::new()),
        Content::Image(_) => Box::new(image::ImagePlugin::new()),
        Content::Clock(_) | Content::Calendar(_) => Box::new(clock::ClockPlugin::new()),
        Content::Video(_) | Content::HdmiIn(_) => Box::new(video::VideoPlugin::new()),
        Content::SceneTest(_) => Box::new(testpattern::TestPatternPlugin),
        Content::Sensor(_)
        | Content::Weather(_)
        | Content::Table(_)
        | Content::NetworkData(_)
        | Content::Modbus(_)
        | Content::Document(_)
        | Content::Web(_) => Box::new(widgets::WidgetPlugin::new()),
    }
}

// ── Data feeds ────────────────────────────────────────────────────────────────

/// Latest-sample registry for externally sourced values (sensors, weather,
/// network feeds, Modbus registers).  Collaborator tasks publish; widget
/// plugins read the most recent sample.
#[derive(Default)]
pub struct DataFeeds {
    values: RwLock<HashMap<String, String>>,
}

impl DataFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, key: &str, value: impl Into<String>) {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Feed key a Modbus register binding reads from.
    pub fn modbus_key(unit: u8, register: u16) -> String {
        format!("modbus:{unit}:{register}")
    }
}

// ── Video hub ─────────────────────────────────────────────────────────────────

/// One decoded RGBA frame delivered by an external decode collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    /// Presentation timestamp, for observability only; the hub always shows
    /// the latest delivered frame.
    pub pts_ms: u64,
}

type FrameSlot = watch::Receiver<Option<Arc<VideoFrame>>>;

/// Registry of named video sources.  Each source is a depth-1 latest-wins
/// slot: a late frame overwrites the previous one and is simply never shown.
#[derive(Default)]
pub struct VideoHub {
    sources: RwLock<HashMap<String, FrameSlot>>,
}

impl VideoHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source and hands the producer its frame sender.
    pub fn register(&self, name: &str) -> watch::Sender<Option<Arc<VideoFrame>>> {
        let (tx, rx) = watch::channel(None);
        self.sources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), rx);
        tx
    }

    /// Latest frame of a source, if the source exists and has delivered one.
    pub fn latest(&self, name: &str) -> Option<Arc<VideoFrame>> {
        self.sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)?
            .borrow()
            .clone()
    }

    /// Source name an HDMI input port maps to.
    pub fn hdmi_source(port: u8) -> String {
        format!("hdmi{port}")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_feeds_latest_sample_wins() {
        let feeds = DataFeeds::new();
        assert_eq!(feeds.get("temperature"), None);

        feeds.publish("temperature", "21.5");
        feeds.publish("temperature", "22.0");
        assert_eq!(feeds.get("temperature").as_deref(), Some("22.0"));
    }

    #[test]
    fn test_video_hub_shows_latest_frame() {
        let hub = VideoHub::new();
        let tx = hub.register("cam");
        assert!(hub.latest("cam").is_none());

        let frame = Arc::new(VideoFrame {
            width: 2,
            height: 2,
            rgba: vec![0; 16],
            pts_ms: 40,
        });
        tx.send(Some(frame.clone())).expect("send");
        tx.send(Some(Arc::new(VideoFrame { pts_ms: 80, ..(*frame).clone() })))
            .expect("send");

        assert_eq!(hub.latest("cam").expect("frame").pts_ms, 80);
        assert!(hub.latest("other").is_none());
    }

    #[test]
    fn test_plugin_factory_covers_every_content_variant() {
        use ledwall_core::program::model::*;

        let font = FontSpec::default();
        let contents = vec![
            Content::Image(ImageContent { file: "a.png".into(), fit: "stretch".into() }),
            Content::Video(VideoContent { source: "v".into(), keep_aspect: false }),
            Content::StaticText(TextContent {
                string: "x".into(),
                font: font.clone(),
                align: "left".into(),
                speed: 50,
            }),
            Content::Clock(ClockContent {
                show_time: true,
                show_date: false,
                show_week: false,
                utc_offset_minutes: None,
                font: font.clone(),
            }),
            Content::Sensor(SensorContent {
                sensor: "temperature".into(),
                label: String::new(),
                font: font.clone(),
            }),
            Content::SceneTest(SceneTestContent { pattern: "bars".into() }),
            Content::HdmiIn(HdmiInContent { port: 0 }),
        ];
        for content in contents {
            // Must not panic for any variant.
            let _ = plugin_for(&content);
        }
    }
}
