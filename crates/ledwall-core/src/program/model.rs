//! The program data model: Program → Scene → Area → Content.
//!
//! A program is one complete display composition.  It owns an ordered
//! sequence of scenes; each scene owns an ordered sequence of areas; each
//! area binds exactly one content variant.  Areas are never shared across
//! scenes.
//!
//! The structs double as the XML schema: `#[serde(rename = "@…")]` maps
//! struct fields to element attributes, `$value` captures the single tagged
//! content child of an `<content>` element.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of an installed program.
pub type ProgramId = Uuid;

/// Structural validation failures.  A program failing any of these is
/// rejected wholesale — no partial program is ever installed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("program {0} has no scenes")]
    NoScenes(Uuid),
    #[error("area {guid} ({x},{y} {width}x{height}) exceeds the {canvas_width}x{canvas_height} canvas")]
    AreaOutOfBounds {
        guid: Uuid,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        canvas_width: u32,
        canvas_height: u32,
    },
    #[error("area {0} has a zero-sized rectangle")]
    ZeroSizeArea(Uuid),
    #[error("duplicate area guid {0}")]
    DuplicateAreaGuid(Uuid),
}

/// A complete display composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(rename = "@guid")]
    pub guid: Uuid,
    #[serde(rename = "@name", default)]
    pub name: String,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(rename = "scene", default)]
    pub scenes: Vec<Scene>,
}

impl Program {
    /// Checks the structural invariants against the logical canvas.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.  Callers must not
    /// install a program that fails validation.
    pub fn validate(&self, canvas_width: u32, canvas_height: u32) -> Result<(), ValidationError> {
        if self.scenes.is_empty() {
            return Err(ValidationError::NoScenes(self.guid));
        }

        let mut seen = HashSet::new();
        for scene in &self.scenes {
            for area in &scene.areas {
                if !seen.insert(area.guid) {
                    return Err(ValidationError::DuplicateAreaGuid(area.guid));
                }
                let r = &area.rect;
                if r.width == 0 || r.height == 0 {
                    return Err(ValidationError::ZeroSizeArea(area.guid));
                }
                let fits = r.x >= 0
                    && r.y >= 0
                    && r.x as i64 + r.width as i64 <= canvas_width as i64
                    && r.y as i64 + r.height as i64 <= canvas_height as i64;
                if !fits {
                    return Err(ValidationError::AreaOutOfBounds {
                        guid: area.guid,
                        x: r.x,
                        y: r.y,
                        width: r.width,
                        height: r.height,
                        canvas_width,
                        canvas_height,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Playback scheduling policy for a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(rename = "@type", default)]
    pub kind: ScheduleKind,
    /// Expiry ("YYYY-MM-DD HH:MM:SS") for `Priority` schedules.
    #[serde(rename = "@until", default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    /// Trigger name for `Triggered` schedules.
    #[serde(rename = "@trigger", default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Play windows for `Timed` schedules.  Empty means "always".
    #[serde(rename = "window", default, skip_serializing_if = "Vec::is_empty")]
    pub windows: Vec<TimeWindow>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            kind: ScheduleKind::Normal,
            windows: Vec::new(),
            until: None,
            trigger: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    /// Rotate scenes by their durations, forever.
    #[default]
    Normal,
    /// Play only inside the listed date/time/weekday windows.
    Timed,
    /// Inserted ahead of the normal program until `until` passes.
    Priority,
    /// Played when the named trigger fires.
    Triggered,
}

/// One play window of a timed schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// "HH:MM:SS" inclusive start of day window.
    #[serde(rename = "@start")]
    pub start: String,
    /// "HH:MM:SS" exclusive end of day window.
    #[serde(rename = "@end")]
    pub end: String,
    /// Comma-separated weekday names ("Mon,Tue,…"); empty = every day.
    #[serde(rename = "@days", default)]
    pub days: String,
}

/// One scene: an ordered set of areas plus how long it stays up and how it
/// hands over to the next scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(rename = "@name", default)]
    pub name: String,
    /// Display duration in milliseconds before rotating to the next scene.
    #[serde(rename = "@duration", default = "default_scene_duration")]
    pub duration_ms: u64,
    #[serde(default)]
    pub transition: Transition,
    #[serde(rename = "area", default)]
    pub areas: Vec<Area>,
}

fn default_scene_duration() -> u64 {
    10_000
}

/// Scene-to-scene transition descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(rename = "@kind", default)]
    pub kind: TransitionKind,
    #[serde(rename = "@duration", default = "default_transition_duration")]
    pub duration_ms: u64,
}

impl Default for Transition {
    fn default() -> Self {
        Self {
            kind: TransitionKind::Cut,
            duration_ms: default_transition_duration(),
        }
    }
}

fn default_transition_duration() -> u64 {
    500
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    /// Hard cut, no blending.
    #[default]
    Cut,
    /// Linear cross-fade.
    Fade,
    /// Incoming scene slides in from the right.
    SlideLeft,
    /// Incoming scene slides in from the bottom.
    SlideUp,
}

/// A rectangular zone of the canvas bound to one content renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    #[serde(rename = "@guid")]
    pub guid: Uuid,
    #[serde(rename = "@name", default)]
    pub name: String,
    /// Stacking order; later z composites over earlier.
    #[serde(rename = "@z", default)]
    pub z: i32,
    #[serde(rename = "@rotation", default)]
    pub rotation: Rotation,
    #[serde(rename = "@alpha", default = "default_alpha")]
    pub alpha: u8,
    pub rect: Rect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border: Option<BorderEffect>,
    pub content: ContentHolder,
}

fn default_alpha() -> u8 {
    255
}

/// Wrapper element so the tagged content child deserializes by element name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentHolder {
    #[serde(rename = "$value")]
    pub item: Content,
}

/// Position and size of an area, in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    #[serde(rename = "@x", default)]
    pub x: i32,
    #[serde(rename = "@y", default)]
    pub y: i32,
    #[serde(rename = "@width")]
    pub width: u32,
    #[serde(rename = "@height")]
    pub height: u32,
}

/// Area rotation, limited to quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    #[serde(rename = "0")]
    Deg0,
    #[serde(rename = "90")]
    Deg90,
    #[serde(rename = "180")]
    Deg180,
    #[serde(rename = "270")]
    Deg270,
}

/// Frame/neon effect drawn around an area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorderEffect {
    /// "solid" or "neon" (marching segments).
    #[serde(rename = "@effect", default = "default_border_effect")]
    pub effect: String,
    #[serde(rename = "@color", default = "default_color")]
    pub color: String,
    /// Marching speed 0 (static) to 8 (fastest).
    #[serde(rename = "@speed", default)]
    pub speed: u8,
}

fn default_border_effect() -> String {
    "solid".to_string()
}

// ── Content variants ──────────────────────────────────────────────────────────

/// The closed set of content bindings.  The variant tag is the XML element
/// name inside `<content>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Content {
    #[serde(rename = "image")]
    Image(ImageContent),
    #[serde(rename = "video")]
    Video(VideoContent),
    #[serde(rename = "staticText")]
    StaticText(TextContent),
    #[serde(rename = "scrollingText")]
    ScrollingText(TextContent),
    #[serde(rename = "clock")]
    Clock(ClockContent),
    #[serde(rename = "calendar")]
    Calendar(CalendarContent),
    #[serde(rename = "weather")]
    Weather(WeatherContent),
    #[serde(rename = "sensor")]
    Sensor(SensorContent),
    #[serde(rename = "table")]
    Table(TableContent),
    #[serde(rename = "networkData")]
    NetworkData(NetworkDataContent),
    #[serde(rename = "modbus")]
    Modbus(ModbusContent),
    #[serde(rename = "document")]
    Document(DocumentContent),
    #[serde(rename = "web")]
    Web(WebContent),
    #[serde(rename = "hdmiIn")]
    HdmiIn(HdmiInContent),
    #[serde(rename = "sceneTest")]
    SceneTest(SceneTestContent),
}

impl Content {
    /// Short tag used in logs and cache keys.
    pub fn tag(&self) -> &'static str {
        match self {
            Content::Image(_) => "image",
            Content::Video(_) => "video",
            Content::StaticText(_) => "staticText",
            Content::ScrollingText(_) => "scrollingText",
            Content::Clock(_) => "clock",
            Content::Calendar(_) => "calendar",
            Content::Weather(_) => "weather",
            Content::Sensor(_) => "sensor",
            Content::Table(_) => "table",
            Content::NetworkData(_) => "networkData",
            Content::Modbus(_) => "modbus",
            Content::Document(_) => "document",
            Content::Web(_) => "web",
            Content::HdmiIn(_) => "hdmiIn",
            Content::SceneTest(_) => "sceneTest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    /// Media file name, resolved against the media directory.
    #[serde(rename = "@file")]
    pub file: String,
    /// "stretch" or "center".
    #[serde(rename = "@fit", default = "default_fit")]
    pub fit: String,
}

fn default_fit() -> String {
    "stretch".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoContent {
    /// Decode-source name registered with the media hub.
    #[serde(rename = "@source")]
    pub source: String,
    #[serde(rename = "@keepAspect", default)]
    pub keep_aspect: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    /// "left", "center", or "right".
    #[serde(rename = "@align", default = "default_align")]
    pub align: String,
    /// Scroll speed in pixels per second; used by scrolling text only.
    #[serde(rename = "@speed", default = "default_scroll_speed")]
    pub speed: u32,
    #[serde(rename = "string", default)]
    pub string: String,
    #[serde(default)]
    pub font: FontSpec,
}

fn default_align() -> String {
    "center".to_string()
}

fn default_scroll_speed() -> u32 {
    50
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontSpec {
    /// Glyph height in pixels; the 5x7 matrix font is integer-scaled to it.
    #[serde(rename = "@size", default = "default_font_size")]
    pub size: u32,
    #[serde(rename = "@color", default = "default_color")]
    pub color: String,
}

impl Default for FontSpec {
    fn default() -> Self {
        Self {
            size: default_font_size(),
            color: default_color(),
        }
    }
}

fn default_font_size() -> u32 {
    7
}

fn default_color() -> String {
    "#ff0000".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockContent {
    #[serde(rename = "@showTime", default = "default_true")]
    pub show_time: bool,
    #[serde(rename = "@showDate", default)]
    pub show_date: bool,
    #[serde(rename = "@showWeek", default)]
    pub show_week: bool,
    /// Minutes east of UTC; `None` = controller local time.
    #[serde(rename = "@utcOffsetMinutes", default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
    #[serde(default)]
    pub font: FontSpec,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarContent {
    /// chrono strftime format for the date line.
    #[serde(rename = "@format", default = "default_date_format")]
    pub format: String,
    #[serde(default)]
    pub font: FontSpec,
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherContent {
    #[serde(rename = "@city")]
    pub city: String,
    #[serde(default)]
    pub font: FontSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorContent {
    /// Feed key, e.g. "temperature" or "humidity".
    #[serde(rename = "@sensor")]
    pub sensor: String,
    #[serde(rename = "@label", default)]
    pub label: String,
    #[serde(default)]
    pub font: FontSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableContent {
    #[serde(rename = "row", default)]
    pub rows: Vec<TableRow>,
    #[serde(default)]
    pub font: FontSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    #[serde(rename = "cell", default)]
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDataContent {
    /// Feed key the external fetcher publishes under.
    #[serde(rename = "@feed")]
    pub feed: String,
    #[serde(default)]
    pub font: FontSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModbusContent {
    #[serde(rename = "@unit")]
    pub unit: u8,
    #[serde(rename = "@register")]
    pub register: u16,
    #[serde(rename = "@label", default)]
    pub label: String,
    #[serde(default)]
    pub font: FontSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentContent {
    /// How long each page stays up, milliseconds.
    #[serde(rename = "@pageDuration", default = "default_page_duration")]
    pub page_duration_ms: u64,
    #[serde(rename = "page", default)]
    pub pages: Vec<String>,
    #[serde(default)]
    pub font: FontSpec,
}

fn default_page_duration() -> u64 {
    5_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebContent {
    #[serde(rename = "@url")]
    pub url: String,
    #[serde(default)]
    pub font: FontSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HdmiInContent {
    #[serde(rename = "@port", default)]
    pub port: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneTestContent {
    /// "bars", "grid", or "checker".
    #[serde(rename = "@pattern", default = "default_pattern")]
    pub pattern: String,
}

fn default_pattern() -> String {
    "bars".to_string()
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Parses a hex color string `#rrggbb` to (r, g, b), falling back to red.
/// Color attributes come from network XML, so anything that is not six hex
/// digits (wrong length, non-ASCII) takes the fallback instead of erroring.
pub fn parse_color(color: &str) -> (u8, u8, u8) {
    let s = color.trim_start_matches('#');
    match (s.get(0..2), s.get(2..4), s.get(4..6)) {
        (Some(r), Some(g), Some(b)) => (
            u8::from_str_radix(r, 16).unwrap_or(255),
            u8::from_str_radix(g, 16).unwrap_or(0),
            u8::from_str_radix(b, 16).unwrap_or(0),
        ),
        _ => (255, 0, 0),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
