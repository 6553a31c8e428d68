//! Integration tests for the SDK command path: XML in, pixels out.
//!
//! # Purpose
//!
//! These tests drive the `Dispatcher` through its public API exactly the way
//! the TCP session layer does, with a real `Compositor` attached to the same
//! stores, and verify:
//!
//! - The happy path: `AddProgram` + `SwitchProgram` lights glyph pixels on
//!   the very next compositor tick.
//! - Atomicity: a malformed program document or an invalid hardware config
//!   leaves the active program and the stored config byte-for-byte
//!   untouched.
//! - Degradation: an area whose media file is missing is painted with the
//!   fallback color while the rest of the frame still renders.
//! - Screen power: `CloseScreen` blanks the published frames without
//!   stopping the sequence counter.
//!
//! ```text
//! SdkRequest ─▶ Dispatcher ─▶ ProgramStore / HwConfigStore
//!                                   │
//!                             Compositor::tick ─▶ watch<Arc<Frame>>
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use ledwall_controller::application::dispatch::Dispatcher;
use ledwall_controller::application::services::ScheduleService;
use ledwall_controller::application::store::{HwConfigStore, ProgramStore};
use ledwall_controller::infrastructure::storage::programs::ProgramLibrary;
use ledwall_controller::infrastructure::transport::{TransportCommand, TransportStatus};
use ledwall_controller::render::engine::{frame_channel, Compositor, Frame};
use ledwall_controller::render::plugins::{DataFeeds, VideoHub};
use ledwall_core::protocol::envelope::{element_attr, ResultCode, SdkRequest};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 32;

const HELLO_PROGRAM: &str = r##"
    <program guid="9a52fa6b-6d9c-4b52-9078-d442be46f1b0" name="hello">
      <schedule type="normal"/>
      <scene name="main" duration="10000">
        <area guid="e9063d48-5b13-44ed-8485-67e4d8b7904a" z="0" alpha="255">
          <rect x="0" y="0" width="64" height="32"/>
          <content>
            <staticText align="center">
              <string>HELLO</string>
              <font size="7" color="#ffffff"/>
            </staticText>
          </content>
        </area>
      </scene>
    </program>
"##;

const MISSING_IMAGE_PROGRAM: &str = r##"
    <program guid="11111111-2222-3333-4444-555555555555" name="broken">
      <scene duration="10000">
        <area guid="aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee" z="0" alpha="255">
          <rect x="0" y="0" width="64" height="32"/>
          <content>
            <image file="not-uploaded.png"/>
          </content>
        </area>
      </scene>
    </program>
"##;

struct Rig {
    dispatcher: Dispatcher,
    compositor: Compositor,
    frame_rx: watch::Receiver<Arc<Frame>>,
    programs: Arc<ProgramStore>,
    hwconfig: Arc<HwConfigStore>,
    _command_rx: mpsc::Receiver<TransportCommand>,
    root: PathBuf,
}

impl Drop for Rig {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn rig(fallback_color: &str) -> Rig {
    let root = std::env::temp_dir().join(format!("ledwall_sdk_it_{}", Uuid::new_v4()));
    let library = Arc::new(ProgramLibrary::new(
        root.join("programs"),
        root.join("media"),
        root.join("staging"),
        root.join("hwconfig.toml"),
    ));
    library.ensure_dirs().expect("dirs");

    let programs = Arc::new(ProgramStore::new());
    let hwconfig = Arc::new(HwConfigStore::default());
    let (screen_tx, screen_rx) = watch::channel(true);
    let (brightness_tx, brightness_rx) = watch::channel(100u8);
    let schedule = Arc::new(ScheduleService::new(
        Arc::clone(&hwconfig),
        screen_tx,
        brightness_tx,
    ));
    let (command_tx, command_rx) = mpsc::channel(8);
    let (_status_tx, status_rx) = watch::channel(TransportStatus::default());

    let dispatcher = Dispatcher::new(
        Arc::clone(&programs),
        Arc::clone(&hwconfig),
        schedule,
        Arc::clone(&library),
        command_tx,
        status_rx,
        WIDTH,
        HEIGHT,
        "testwall".to_string(),
        30,
    );

    let (frame_tx, frame_rx) = frame_channel(WIDTH, HEIGHT);
    let compositor = Compositor::new(
        Arc::clone(&programs),
        Arc::clone(&hwconfig),
        Arc::new(DataFeeds::new()),
        Arc::new(VideoHub::new()),
        root.join("media"),
        fallback_color,
        WIDTH,
        HEIGHT,
        frame_tx,
        screen_rx,
        brightness_rx,
    )
    .expect("compositor");

    Rig {
        dispatcher,
        compositor,
        frame_rx,
        programs,
        hwconfig,
        _command_rx: command_rx,
        root,
    }
}

fn request(method: &str, body: &str) -> SdkRequest {
    SdkRequest {
        guid: "it-1".to_string(),
        method: method.to_string(),
        body: body.to_string(),
    }
}

fn noon() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 8, 28)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn lit_pixels(frame: &Frame) -> usize {
    frame
        .rgba
        .chunks_exact(4)
        .filter(|c| c[0] > 0 || c[1] > 0 || c[2] > 0)
        .count()
}

async fn add_and_switch(rig: &Rig, xml: &str) -> String {
    let resp = rig.dispatcher.handle(request("AddProgram", xml)).await;
    assert_eq!(resp.result, ResultCode::Success, "{}", resp.body);
    let id = element_attr(&resp.body, "program", "guid").expect("guid");
    let resp = rig
        .dispatcher
        .handle(request("SwitchProgram", &format!("<program guid=\"{id}\"/>")))
        .await;
    assert_eq!(resp.result, ResultCode::Success);
    id
}

#[tokio::test]
async fn test_add_switch_lights_pixels_on_next_tick() {
    let mut rig = rig("#000000");
    add_and_switch(&rig, HELLO_PROGRAM).await;

    rig.compositor.tick(0, noon(), noon());

    let frame = rig.frame_rx.borrow().clone();
    assert_eq!(frame.seq, 1);
    assert!(lit_pixels(&frame) > 0, "glyphs should light pixels");
}

#[tokio::test]
async fn test_malformed_program_never_disturbs_the_active_one() {
    let mut rig = rig("#000000");
    let id = add_and_switch(&rig, HELLO_PROGRAM).await;

    let resp = rig
        .dispatcher
        .handle(request("AddProgram", "<program><scene></program>"))
        .await;
    assert_eq!(resp.result, ResultCode::ParseError);

    assert_eq!(rig.programs.active_id().map(|u| u.to_string()), Some(id));
    rig.compositor.tick(0, noon(), noon());
    assert!(lit_pixels(&rig.frame_rx.borrow()) > 0);
}

#[tokio::test]
async fn test_invalid_hwconfig_is_rejected_atomically() {
    let rig = rig("#000000");
    let before = rig.hwconfig.get();

    let resp = rig
        .dispatcher
        .handle(request(
            "SetBoxHwConfig",
            r#"<hwconfig>
                 <sendCard index="0"/>
                 <sendCard index="0"/>
               </hwconfig>"#,
        ))
        .await;
    assert_eq!(resp.result, ResultCode::ValidationError);
    assert_eq!(*rig.hwconfig.get(), *before);

    let resp = rig.dispatcher.handle(request("GetBoxHwConfig", "")).await;
    assert_eq!(resp.result, ResultCode::Success);
    assert_eq!(
        element_attr(&resp.body, "hwconfig", "rotation").as_deref(),
        Some(&*before.rotation_quarters.to_string())
    );
}

#[tokio::test]
async fn test_missing_media_paints_fallback_not_garbage() {
    let mut rig = rig("#204060");
    add_and_switch(&rig, MISSING_IMAGE_PROGRAM).await;

    rig.compositor.tick(0, noon(), noon());

    let frame = rig.frame_rx.borrow().clone();
    assert_eq!(frame.seq, 1, "frame is still published");
    assert_eq!(frame.rgba.len(), (WIDTH * HEIGHT * 4) as usize);
    // The failed area is painted with the fallback color.
    assert_eq!(&frame.rgba[..4], &[0x20, 0x40, 0x60, 0xff]);
}

#[tokio::test]
async fn test_close_screen_blanks_frames_but_sequence_advances() {
    let mut rig = rig("#000000");
    add_and_switch(&rig, HELLO_PROGRAM).await;

    let resp = rig.dispatcher.handle(request("CloseScreen", "")).await;
    assert_eq!(resp.result, ResultCode::Success);

    rig.compositor.tick(0, noon(), noon());
    rig.compositor.tick(33, noon(), noon());

    let frame = rig.frame_rx.borrow().clone();
    assert_eq!(frame.seq, 2);
    assert_eq!(lit_pixels(&frame), 0, "screen off renders black");
}

#[tokio::test]
async fn test_latest_frame_wins_on_the_watch_channel() {
    let mut rig = rig("#000000");
    add_and_switch(&rig, HELLO_PROGRAM).await;

    for i in 0..5 {
        rig.compositor.tick(i * 33, noon(), noon());
    }
    // A slow consumer only ever sees the newest frame.
    assert_eq!(rig.frame_rx.borrow().seq, 5);
}
