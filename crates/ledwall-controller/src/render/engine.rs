//! The scene compositor.
//!
//! One task owns a double buffer: every tick it snapshots the active
//! program, asks the playback machine which scene (or transition) is due,
//! renders areas in z-order through their plugins, applies brightness and
//! gamma, swaps buffers, and publishes the finished frame.
//!
//! Publication goes through a `tokio::sync::watch` channel: a depth-1
//! latest-wins slot.  If the transport falls behind, the newest frame
//! overwrites the stale one — exactly one frame is dropped per overrun, the
//! queue never grows, and the compositor never blocks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDateTime;
use tiny_skia::Pixmap;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use ledwall_core::program::model::{parse_color, Content, Rotation, Scene};

use super::effects::{blend_scenes, draw_border};
use super::plugins::{plugin_for, ContentPlugin, DataFeeds, RenderCtx, VideoHub};
use super::schedule::{Phase, Playback};
use super::surface::{self, SurfaceError};
use crate::application::store::{HwConfigStore, ProgramStore};

/// One finished output frame, premultiplied RGBA bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Frame {
    pub fn black(width: u32, height: u32) -> Self {
        Self {
            seq: 0,
            width,
            height,
            rgba: vec![0; (width * height * 4) as usize],
        }
    }
}

/// Creates the frame channel seeded with a black frame.
pub fn frame_channel(
    width: u32,
    height: u32,
) -> (watch::Sender<Arc<Frame>>, watch::Receiver<Arc<Frame>>) {
    watch::channel(Arc::new(Frame::black(width, height)))
}

pub struct Compositor {
    programs: Arc<ProgramStore>,
    hwconfig: Arc<HwConfigStore>,
    feeds: Arc<DataFeeds>,
    video: Arc<VideoHub>,
    media_dir: PathBuf,
    fallback_color: (u8, u8, u8),
    width: u32,
    height: u32,

    playback: Playback,
    plugins: HashMap<Uuid, AreaSlot>,

    back: Pixmap,
    front: Pixmap,
    seq: u64,

    frame_tx: watch::Sender<Arc<Frame>>,
    screen_rx: watch::Receiver<bool>,
    brightness_rx: watch::Receiver<u8>,
}

/// A plugin instance plus the content config it was last configured with.
struct AreaSlot {
    plugin: Box<dyn ContentPlugin>,
    config: Content,
}

impl Compositor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        programs: Arc<ProgramStore>,
        hwconfig: Arc<HwConfigStore>,
        feeds: Arc<DataFeeds>,
        video: Arc<VideoHub>,
        media_dir: PathBuf,
        fallback_color: &str,
        width: u32,
        height: u32,
        frame_tx: watch::Sender<Arc<Frame>>,
        screen_rx: watch::Receiver<bool>,
        brightness_rx: watch::Receiver<u8>,
    ) -> Result<Self, SurfaceError> {
        Ok(Self {
            programs,
            hwconfig,
            feeds,
            video,
            media_dir,
            fallback_color: parse_color(fallback_color),
            width,
            height,
            playback: Playback::new(),
            plugins: HashMap::new(),
            back: surface::new_surface(width, height)?,
            front: surface::new_surface(width, height)?,
            seq: 0,
            frame_tx,
            screen_rx,
            brightness_rx,
        })
    }

    pub fn playback_mut(&mut self) -> &mut Playback {
        &mut self.playback
    }

    /// Renders one tick and publishes the frame.  Everything here is
    /// synchronous; the caller owns the cadence.
    pub fn tick(&mut self, now_ms: u64, local: NaiveDateTime, utc: NaiveDateTime) {
        surface::fill(&mut self.back, 0, 0, 0);

        let screen_on = *self.screen_rx.borrow();
        if screen_on {
            let program = self.programs.get_active();
            let phase = self.playback.tick(program.as_deref(), now_ms, local);
            let elapsed = self.playback.phase_elapsed(now_ms);

            if let Some(program) = program {
                self.retain_area_plugins(&program.scenes);
                match phase {
                    Phase::Idle => {}
                    Phase::ScenePlaying { scene } => {
                        if let Some(scene) = program.scenes.get(scene) {
                            let rendered = self.render_scene(scene, elapsed, local, utc);
                            surface::blit(&mut self.back, &rendered, 0, 0, 255);
                        }
                    }
                    Phase::Transitioning { from, to, progress } => {
                        let kind = program
                            .scenes
                            .get(to)
                            .map(|s| s.transition.kind)
                            .unwrap_or_default();
                        let outgoing = match program.scenes.get(from) {
                            Some(scene) => self.render_scene(scene, elapsed, local, utc),
                            None => self.blank(),
                        };
                        let incoming = match program.scenes.get(to) {
                            Some(scene) => self.render_scene(scene, elapsed, local, utc),
                            None => self.blank(),
                        };
                        blend_scenes(&mut self.back, &outgoing, &incoming, kind, progress);
                    }
                }
            }

            let brightness = *self.brightness_rx.borrow();
            surface::apply_brightness(&mut self.back, brightness);
            let hw = self.hwconfig.get();
            surface::apply_gamma(&mut self.back, &hw.gamma);
        }

        std::mem::swap(&mut self.front, &mut self.back);
        self.seq += 1;
        let frame = Arc::new(Frame {
            seq: self.seq,
            width: self.width,
            height: self.height,
            rgba: self.front.data().to_vec(),
        });
        // send_replace delivers even when no receiver is attached yet.
        self.frame_tx.send_replace(frame);
    }

    /// Runs the compositor at `fps` until the frame channel loses all
    /// receivers.
    pub async fn run(mut self, fps: u32) {
        let period = std::time::Duration::from_millis(1_000 / fps.clamp(1, 120) as u64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let epoch = Instant::now();
        debug!(fps, "compositor started");
        loop {
            interval.tick().await;
            let now_ms = epoch.elapsed().as_millis() as u64;
            let local = chrono::Local::now().naive_local();
            let utc = chrono::Utc::now().naive_utc();
            self.tick(now_ms, local, utc);
            if self.frame_tx.is_closed() {
                debug!("frame channel closed, compositor stopping");
                return;
            }
        }
    }

    fn blank(&self) -> Pixmap {
        surface::new_surface(self.width, self.height)
            .unwrap_or_else(|_| self.front.clone())
    }

    /// Renders one scene onto a fresh canvas-sized surface, areas in
    /// z-order.  A failing plugin paints its area with the fallback color;
    /// the scene always completes.
    fn render_scene(
        &mut self,
        scene: &Scene,
        elapsed_ms: u64,
        local: NaiveDateTime,
        utc: NaiveDateTime,
    ) -> Pixmap {
        let mut canvas = self.blank();

        let mut order: Vec<usize> = (0..scene.areas.len()).collect();
        order.sort_by_key(|&i| scene.areas[i].z);

        for i in order {
            let area = &scene.areas[i];
            let rect = area.rect;
            // Quarter-turn rotations swap the pre-rotation surface dims so
            // the rotated result exactly fills the area footprint.
            let (pre_w, pre_h) = match area.rotation {
                Rotation::Deg90 | Rotation::Deg270 => (rect.height, rect.width),
                _ => (rect.width, rect.height),
            };
            let Ok(mut area_surface) = surface::new_surface(pre_w, pre_h) else {
                continue;
            };

            let slot = self
                .plugins
                .entry(area.guid)
                .or_insert_with(|| AreaSlot {
                    plugin: plugin_for(&area.content.item),
                    config: area.content.item.clone(),
                });
            if slot.config != area.content.item {
                slot.plugin.on_config_changed(&area.content.item);
                slot.config = area.content.item.clone();
            }

            let result = slot.plugin.render(&mut RenderCtx {
                surface: &mut area_surface,
                content: &area.content.item,
                elapsed_ms,
                local,
                utc,
                feeds: &self.feeds,
                video: &self.video,
                media_dir: &self.media_dir,
            });

            let mut footprint = match result {
                Ok(()) => surface::rotate(&area_surface, area.rotation),
                Err(e) => {
                    warn!(area = %area.guid, content = area.content.item.tag(), error = %e,
                        "plugin render failed, painting fallback");
                    let (r, g, b) = self.fallback_color;
                    match surface::new_surface(rect.width, rect.height) {
                        Ok(mut fallback) => {
                            surface::fill(&mut fallback, r, g, b);
                            fallback
                        }
                        Err(_) => continue,
                    }
                }
            };

            if let Some(border) = &area.border {
                draw_border(&mut footprint, border, elapsed_ms);
            }

            surface::blit(&mut canvas, &footprint, rect.x, rect.y, area.alpha);
        }

        canvas
    }

    /// Drops plugin instances whose area no longer exists in the program.
    fn retain_area_plugins(&mut self, scenes: &[Scene]) {
        let live: std::collections::HashSet<Uuid> = scenes
            .iter()
            .flat_map(|s| s.areas.iter().map(|a| a.guid))
            .collect();
        self.plugins.retain(|guid, _| live.contains(guid));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
