//! Playback state machine: which scene is on screen, and how far through a
//! transition we are.
//!
//! The machine is pure — it is driven by a millisecond tick counter and a
//! wall-clock sample passed in by the compositor, so tests can step it
//! deterministically.

use std::collections::HashSet;

use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};
use uuid::Uuid;

use ledwall_core::program::model::{Program, Schedule, ScheduleKind};

/// What the compositor should put on screen this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    /// Nothing playable: no program, or the schedule gates it off.
    Idle,
    ScenePlaying { scene: usize },
    Transitioning { from: usize, to: usize, progress: f32 },
}

/// Scene rotation and transition progress for the active program.
pub struct Playback {
    program: Option<Uuid>,
    scene: usize,
    /// Tick-time the current phase began.
    phase_started_ms: u64,
    in_transition: bool,
    transition_to: usize,
    fired_triggers: HashSet<String>,
}

impl Default for Playback {
    fn default() -> Self {
        Self::new()
    }
}

impl Playback {
    pub fn new() -> Self {
        Self {
            program: None,
            scene: 0,
            phase_started_ms: 0,
            in_transition: false,
            transition_to: 0,
            fired_triggers: HashSet::new(),
        }
    }

    /// Marks a named trigger as fired; triggered programs with that name
    /// become playable.
    pub fn fire_trigger(&mut self, name: &str) {
        self.fired_triggers.insert(name.to_string());
    }

    pub fn clear_trigger(&mut self, name: &str) {
        self.fired_triggers.remove(name);
    }

    /// Advances the machine to `now_ms` and reports the phase to render.
    pub fn tick(&mut self, program: Option<&Program>, now_ms: u64, local: NaiveDateTime) -> Phase {
        let Some(program) = program else {
            self.program = None;
            return Phase::Idle;
        };

        if !schedule_allows(&program.schedule, local, &self.fired_triggers) {
            // Leaving the window resets rotation so re-entry starts clean.
            self.program = None;
            return Phase::Idle;
        }

        if self.program != Some(program.guid) {
            self.program = Some(program.guid);
            self.scene = 0;
            self.phase_started_ms = now_ms;
            self.in_transition = false;
        }

        let n = program.scenes.len();
        if n == 0 {
            return Phase::Idle;
        }
        if self.scene >= n {
            self.scene = 0;
            self.phase_started_ms = now_ms;
            self.in_transition = false;
        }

        if self.in_transition {
            let to = self.transition_to.min(n - 1);
            let duration = program.scenes[to].transition.duration_ms.max(1);
            let elapsed = now_ms.saturating_sub(self.phase_started_ms);
            if elapsed >= duration {
                self.in_transition = false;
                self.scene = to;
                self.phase_started_ms += duration;
            } else {
                return Phase::Transitioning {
                    from: self.scene,
                    to,
                    progress: elapsed as f32 / duration as f32,
                };
            }
        }

        let duration = program.scenes[self.scene].duration_ms.max(1);
        let elapsed = now_ms.saturating_sub(self.phase_started_ms);
        if elapsed < duration {
            return Phase::ScenePlaying { scene: self.scene };
        }

        if n == 1 {
            // Single scene loops in place.
            self.phase_started_ms = now_ms;
            return Phase::ScenePlaying { scene: self.scene };
        }

        let to = (self.scene + 1) % n;
        let transition = program.scenes[to].transition;
        self.phase_started_ms += duration;
        if transition.duration_ms == 0 {
            self.scene = to;
            return Phase::ScenePlaying { scene: to };
        }
        self.in_transition = true;
        self.transition_to = to;
        let progress =
            now_ms.saturating_sub(self.phase_started_ms) as f32 / transition.duration_ms as f32;
        Phase::Transitioning {
            from: self.scene,
            to,
            progress: progress.min(1.0),
        }
    }

    /// Elapsed milliseconds within the current phase, for effect timing.
    pub fn phase_elapsed(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.phase_started_ms)
    }
}

/// Whether the schedule permits playback at the given wall time.
pub fn schedule_allows(
    schedule: &Schedule,
    local: NaiveDateTime,
    fired_triggers: &HashSet<String>,
) -> bool {
    match schedule.kind {
        ScheduleKind::Normal => true,
        ScheduleKind::Timed => {
            if schedule.windows.is_empty() {
                return true;
            }
            schedule.windows.iter().any(|w| {
                day_set_contains(&w.days, local) && time_in_window(&w.start, &w.end, local.time())
            })
        }
        ScheduleKind::Priority => match schedule.until.as_deref() {
            None => true,
            Some(until) => match NaiveDateTime::parse_from_str(until, "%Y-%m-%d %H:%M:%S") {
                Ok(deadline) => local < deadline,
                Err(_) => false,
            },
        },
        ScheduleKind::Triggered => match schedule.trigger.as_deref() {
            None => true,
            Some(name) => fired_triggers.contains(name),
        },
    }
}

/// Parses "HH:MM:SS" (seconds optional).
pub fn parse_hms(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Inclusive-start, exclusive-end day window; `end < start` wraps midnight.
pub fn time_in_window(start: &str, end: &str, now: NaiveTime) -> bool {
    let (Some(start), Some(end)) = (parse_hms(start), parse_hms(end)) else {
        return false;
    };
    if start <= end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

/// Comma-separated weekday names ("Mon,Tue"); empty matches every day.
pub fn day_set_contains(days: &str, local: NaiveDateTime) -> bool {
    let days = days.trim();
    if days.is_empty() {
        return true;
    }
    let today = match local.weekday() {
        chrono::Weekday::Mon => "Mon",
        chrono::Weekday::Tue => "Tue",
        chrono::Weekday::Wed => "Wed",
        chrono::Weekday::Thu => "Thu",
        chrono::Weekday::Fri => "Fri",
        chrono::Weekday::Sat => "Sat",
        chrono::Weekday::Sun => "Sun",
    };
    days.split(',').any(|d| d.trim().eq_ignore_ascii_case(today))
}

/// Seconds past midnight; used when deciding clock re-render boundaries.
pub fn second_of_day(local: NaiveDateTime) -> u32 {
    local.time().num_seconds_from_midnight()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ledwall_core::program::model::{
        Scene, Schedule, ScheduleKind, TimeWindow, Transition, TransitionKind,
    };

    fn scene(duration_ms: u64, transition_ms: u64) -> Scene {
        Scene {
            name: String::new(),
            duration_ms,
            transition: Transition {
                kind: TransitionKind::Fade,
                duration_ms: transition_ms,
            },
            areas: Vec::new(),
        }
    }

    fn program(scenes: Vec<Scene>, schedule: Schedule) -> Program {
        Program {
            guid: Uuid::new_v4(),
            name: "t".to_string(),
            schedule,
            scenes,
        }
    }

    fn noon() -> NaiveDateTime {
        // 2026-08-28 is a Friday.
        NaiveDate::from_ymd_opt(2026, 8, 28)
            .expect("date")
            .and_hms_opt(12, 0, 0)
            .expect("time")
    }

    #[test]
    fn test_no_program_is_idle() {
        let mut playback = Playback::new();
        assert_eq!(playback.tick(None, 0, noon()), Phase::Idle);
    }

    #[test]
    fn test_scene_rotation_with_transition() {
        let mut playback = Playback::new();
        let p = program(vec![scene(1_000, 200), scene(1_000, 200)], Schedule::default());

        assert_eq!(playback.tick(Some(&p), 0, noon()), Phase::ScenePlaying { scene: 0 });
        assert_eq!(playback.tick(Some(&p), 900, noon()), Phase::ScenePlaying { scene: 0 });

        // Past the scene duration the fade to scene 1 begins.
        match playback.tick(Some(&p), 1_100, noon()) {
            Phase::Transitioning { from: 0, to: 1, progress } => {
                assert!((progress - 0.5).abs() < 0.01, "progress {progress}");
            }
            other => panic!("expected transition, got {other:?}"),
        }

        // Transition complete; scene 1 plays with its clock rebased.
        assert_eq!(playback.tick(Some(&p), 1_300, noon()), Phase::ScenePlaying { scene: 1 });
        // Scene 1 runs its full second from the end of the transition.
        assert_eq!(playback.tick(Some(&p), 2_100, noon()), Phase::ScenePlaying { scene: 1 });
    }

    #[test]
    fn test_single_scene_loops_forever() {
        let mut playback = Playback::new();
        let p = program(vec![scene(500, 0)], Schedule::default());

        for now in [0u64, 400, 600, 5_000] {
            assert_eq!(playback.tick(Some(&p), now, noon()), Phase::ScenePlaying { scene: 0 });
        }
    }

    #[test]
    fn test_zero_duration_transition_cuts_immediately() {
        let mut playback = Playback::new();
        let p = program(vec![scene(100, 0), scene(100, 0)], Schedule::default());

        playback.tick(Some(&p), 0, noon());
        assert_eq!(playback.tick(Some(&p), 150, noon()), Phase::ScenePlaying { scene: 1 });
    }

    #[test]
    fn test_program_switch_resets_to_first_scene() {
        let mut playback = Playback::new();
        let p1 = program(vec![scene(1_000, 0), scene(1_000, 0)], Schedule::default());
        let p2 = program(vec![scene(1_000, 0)], Schedule::default());

        playback.tick(Some(&p1), 0, noon());
        playback.tick(Some(&p1), 1_500, noon());

        assert_eq!(playback.tick(Some(&p2), 1_600, noon()), Phase::ScenePlaying { scene: 0 });
    }

    #[test]
    fn test_timed_schedule_gates_playback() {
        let mut playback = Playback::new();
        let schedule = Schedule {
            kind: ScheduleKind::Timed,
            windows: vec![TimeWindow {
                start: "08:00:00".to_string(),
                end: "18:00:00".to_string(),
                days: "Mon,Fri".to_string(),
            }],
            until: None,
            trigger: None,
        };
        let p = program(vec![scene(1_000, 0)], schedule);

        // Friday noon is inside the window.
        assert_eq!(playback.tick(Some(&p), 0, noon()), Phase::ScenePlaying { scene: 0 });

        // Friday 19:00 is outside.
        let evening = noon().date().and_hms_opt(19, 0, 0).expect("time");
        assert_eq!(playback.tick(Some(&p), 100, evening), Phase::Idle);

        // Saturday noon fails the weekday check.
        let saturday = NaiveDate::from_ymd_opt(2026, 8, 29)
            .expect("date")
            .and_hms_opt(12, 0, 0)
            .expect("time");
        assert_eq!(playback.tick(Some(&p), 200, saturday), Phase::Idle);
    }

    #[test]
    fn test_priority_schedule_expires() {
        let schedule = Schedule {
            kind: ScheduleKind::Priority,
            windows: Vec::new(),
            until: Some("2026-08-28 13:00:00".to_string()),
            trigger: None,
        };
        let fired = HashSet::new();
        assert!(schedule_allows(&schedule, noon(), &fired));

        let later = noon().date().and_hms_opt(14, 0, 0).expect("time");
        assert!(!schedule_allows(&schedule, later, &fired));
    }

    #[test]
    fn test_triggered_schedule_waits_for_trigger() {
        let mut playback = Playback::new();
        let schedule = Schedule {
            kind: ScheduleKind::Triggered,
            windows: Vec::new(),
            until: None,
            trigger: Some("alarm".to_string()),
        };
        let p = program(vec![scene(1_000, 0)], schedule);

        assert_eq!(playback.tick(Some(&p), 0, noon()), Phase::Idle);
        playback.fire_trigger("alarm");
        assert_eq!(playback.tick(Some(&p), 100, noon()), Phase::ScenePlaying { scene: 0 });
    }

    #[test]
    fn test_overnight_window_wraps_midnight() {
        assert!(time_in_window("22:00:00", "06:00:00", NaiveTime::from_hms_opt(23, 0, 0).unwrap()));
        assert!(time_in_window("22:00:00", "06:00:00", NaiveTime::from_hms_opt(3, 0, 0).unwrap()));
        assert!(!time_in_window("22:00:00", "06:00:00", NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }
}
