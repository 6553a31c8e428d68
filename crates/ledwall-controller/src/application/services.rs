//! Background schedule services: screen switch times, scheduled brightness,
//! and the adjustable time base.
//!
//! A single task wakes every 30 seconds, evaluates the switch-time table
//! against the wall clock, and flips the screen-power watch channel; the
//! brightness policy is evaluated on the same cadence.  A manual
//! `OpenScreen`/`CloseScreen` or `SetLuminancePloy` takes effect immediately
//! and holds until the next schedule boundary.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::application::store::HwConfigStore;
use crate::render::schedule::{day_set_contains, time_in_window};

/// One screen on/off window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchTimeEntry {
    /// "HH:MM:SS" power-on time.
    pub on_time: String,
    /// "HH:MM:SS" power-off time.
    pub off_time: String,
    /// Comma-separated weekday names; empty = every day.
    #[serde(default)]
    pub days: String,
}

/// Evaluation cadence for the switch-time and brightness schedules.
pub const EVALUATION_PERIOD: Duration = Duration::from_secs(30);

/// Shared schedule state plus the channels the compositor observes.
pub struct ScheduleService {
    switch_times: RwLock<Vec<SwitchTimeEntry>>,
    /// Offset applied to the OS clock after `SetTimeInfo`, seconds.
    time_offset_secs: RwLock<i64>,
    screen_tx: watch::Sender<bool>,
    brightness_tx: watch::Sender<u8>,
    hwconfig: Arc<HwConfigStore>,
}

impl ScheduleService {
    pub fn new(
        hwconfig: Arc<HwConfigStore>,
        screen_tx: watch::Sender<bool>,
        brightness_tx: watch::Sender<u8>,
    ) -> Self {
        Self {
            switch_times: RwLock::new(Vec::new()),
            time_offset_secs: RwLock::new(0),
            screen_tx,
            brightness_tx,
            hwconfig,
        }
    }

    // ── Switch times ──────────────────────────────────────────────────────────

    pub fn switch_times(&self) -> Vec<SwitchTimeEntry> {
        self.switch_times
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_switch_times(&self, entries: Vec<SwitchTimeEntry>) {
        info!(count = entries.len(), "switch-time schedule replaced");
        *self.switch_times.write().unwrap_or_else(|e| e.into_inner()) = entries;
    }

    /// Manual screen power, effective immediately.
    pub fn set_screen(&self, on: bool) {
        info!(on, "screen power set");
        self.screen_tx.send_replace(on);
    }

    pub fn screen_is_on(&self) -> bool {
        *self.screen_tx.borrow()
    }

    /// What the switch-time table wants right now; `None` with an empty
    /// table (manual control only).
    pub fn scheduled_power(&self, local: NaiveDateTime) -> Option<bool> {
        let entries = self.switch_times.read().unwrap_or_else(|e| e.into_inner());
        if entries.is_empty() {
            return None;
        }
        let on = entries.iter().any(|e| {
            day_set_contains(&e.days, local) && time_in_window(&e.on_time, &e.off_time, local.time())
        });
        Some(on)
    }

    // ── Time base ─────────────────────────────────────────────────────────────

    /// Records the delta between the commanded wall time and the OS clock.
    pub fn set_time(&self, commanded: NaiveDateTime, os_now: NaiveDateTime) {
        let offset = (commanded - os_now).num_seconds();
        info!(offset_secs = offset, "display time base adjusted");
        *self.time_offset_secs.write().unwrap_or_else(|e| e.into_inner()) = offset;
    }

    pub fn adjust(&self, os_now: NaiveDateTime) -> NaiveDateTime {
        let offset = *self.time_offset_secs.read().unwrap_or_else(|e| e.into_inner());
        os_now + chrono::Duration::seconds(offset)
    }

    // ── Evaluation ────────────────────────────────────────────────────────────

    /// One evaluation pass at the given wall time.
    pub fn evaluate(&self, local: NaiveDateTime) {
        if let Some(on) = self.scheduled_power(local) {
            if on != *self.screen_tx.borrow() {
                info!(on, "switch-time schedule flipping screen power");
            }
            self.screen_tx.send_replace(on);
        }

        use chrono::Timelike;
        let policy = self.hwconfig.get().brightness.clone();
        let level = policy.level_at(local.time().hour() as u8, local.time().minute() as u8);
        self.brightness_tx.send_replace(level.min(100));
        debug!(level, mode = ?policy.mode, "brightness evaluated");
    }

    /// Runs the 30-second evaluation loop until the screen channel loses
    /// all receivers.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(EVALUATION_PERIOD);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if self.screen_tx.is_closed() && self.brightness_tx.is_closed() {
                debug!("schedule service stopping");
                return;
            }
            let local = self.adjust(chrono::Local::now().naive_local());
            self.evaluate(local);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
