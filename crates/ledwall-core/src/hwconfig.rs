//! Hardware configuration: card topology, scan timing, gamma, brightness.
//!
//! These structs serialize to TOML for on-disk persistence (`SaveBoxHwConfig`)
//! and are rebuilt from SDK XML bodies by the dispatcher.  Every mutation path
//! runs [`HardwareConfig::validate`] first; an invalid configuration never
//! replaces the active one.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failures for a hardware configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HwConfigError {
    #[error("duplicate {kind} card index {index}")]
    DuplicateCardIndex { kind: &'static str, index: u16 },
    #[error("{kind} card indices are not contiguous from 0 (got {index}, expected {expected})")]
    NonContiguousCardIndex {
        kind: &'static str,
        index: u16,
        expected: u16,
    },
    #[error("no send cards configured")]
    NoSendCards,
    #[error("unsupported color depth {0} (expected 8, 10, 12, or 16)")]
    BadColorDepth(u8),
    #[error("gamma table must have 256 entries, got {0}")]
    BadGammaLength(usize),
    #[error("brightness level {0} exceeds 100")]
    BadBrightness(u8),
}

/// The full panel electrical/timing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    #[serde(default)]
    pub send_cards: Vec<SendCard>,
    #[serde(default)]
    pub receive_cards: Vec<ReceiveCard>,
    #[serde(default)]
    pub scan_mode: ScanMode,
    #[serde(default = "default_color_depth")]
    pub color_depth: u8,
    /// Per-channel gamma lookup table, 256 entries.
    #[serde(default = "identity_gamma")]
    pub gamma: Vec<u8>,
    #[serde(default = "default_refresh")]
    pub refresh_rate_hz: u16,
    #[serde(default = "default_gray_levels")]
    pub gray_levels: u16,
    #[serde(default)]
    pub brightness: BrightnessPolicy,
    /// Whole-panel rotation in quarter turns (0..=3).
    #[serde(default)]
    pub rotation_quarters: u8,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            send_cards: vec![SendCard::default()],
            receive_cards: vec![ReceiveCard::default()],
            scan_mode: ScanMode::default(),
            color_depth: default_color_depth(),
            gamma: identity_gamma(),
            refresh_rate_hz: default_refresh(),
            gray_levels: default_gray_levels(),
            brightness: BrightnessPolicy::default(),
            rotation_quarters: 0,
        }
    }
}

fn default_color_depth() -> u8 {
    8
}

fn default_refresh() -> u16 {
    1920
}

fn default_gray_levels() -> u16 {
    256
}

/// The identity gamma curve.
pub fn identity_gamma() -> Vec<u8> {
    (0..=255).collect()
}

impl HardwareConfig {
    /// Checks card topology and table invariants.
    ///
    /// # Errors
    ///
    /// Returns the first [`HwConfigError`] found; callers must keep the
    /// previous configuration active on error.
    pub fn validate(&self) -> Result<(), HwConfigError> {
        if self.send_cards.is_empty() {
            return Err(HwConfigError::NoSendCards);
        }
        check_indices("send", self.send_cards.iter().map(|c| c.index))?;
        check_indices("receive", self.receive_cards.iter().map(|c| c.index))?;

        if !matches!(self.color_depth, 8 | 10 | 12 | 16) {
            return Err(HwConfigError::BadColorDepth(self.color_depth));
        }
        if self.gamma.len() != 256 {
            return Err(HwConfigError::BadGammaLength(self.gamma.len()));
        }
        if self.brightness.level > 100 {
            return Err(HwConfigError::BadBrightness(self.brightness.level));
        }
        for slot in &self.brightness.schedule {
            if slot.level > 100 {
                return Err(HwConfigError::BadBrightness(slot.level));
            }
        }
        Ok(())
    }

    /// All card indices addressed by configuration writes, send cards first.
    pub fn card_indices(&self) -> Vec<u16> {
        self.send_cards
            .iter()
            .map(|c| c.index)
            .chain(self.receive_cards.iter().map(|c| c.index + RECEIVE_CARD_BASE))
            .collect()
    }
}

/// Receive-card addresses live above this base so the two index spaces
/// cannot collide on the link.
pub const RECEIVE_CARD_BASE: u16 = 0x100;

/// Card indices must be unique and contiguous starting at 0.  Order within
/// the list does not matter.
fn check_indices(kind: &'static str, indices: impl Iterator<Item = u16>) -> Result<(), HwConfigError> {
    let mut sorted: Vec<u16> = indices.collect();
    sorted.sort_unstable();
    for (expected, &index) in sorted.iter().enumerate() {
        let expected = expected as u16;
        if index == expected {
            continue;
        }
        if sorted[..expected as usize].contains(&index) || sorted.iter().filter(|&&i| i == index).count() > 1 {
            return Err(HwConfigError::DuplicateCardIndex { kind, index });
        }
        return Err(HwConfigError::NonContiguousCardIndex {
            kind,
            index,
            expected,
        });
    }
    Ok(())
}

/// A send card: the controller-side module feeding one panel chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendCard {
    pub index: u16,
    /// Pixel columns this card drives.
    #[serde(default = "default_card_width")]
    pub width: u32,
    /// Pixel rows this card drives.
    #[serde(default = "default_card_height")]
    pub height: u32,
}

impl Default for SendCard {
    fn default() -> Self {
        Self {
            index: 0,
            width: default_card_width(),
            height: default_card_height(),
        }
    }
}

fn default_card_width() -> u32 {
    128
}

fn default_card_height() -> u32 {
    64
}

/// A receive card: the panel-side module behind a send card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveCard {
    pub index: u16,
    /// Send card this receive card is chained to.
    #[serde(default)]
    pub send_card: u16,
}

impl Default for ReceiveCard {
    fn default() -> Self {
        Self {
            index: 0,
            send_card: 0,
        }
    }
}

/// LED panel multiplexing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    Static,
    Scan1In2,
    Scan1In4,
    Scan1In8,
    #[default]
    Scan1In16,
    Scan1In32,
}

impl ScanMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanMode::Static => "static",
            ScanMode::Scan1In2 => "scan_1in2",
            ScanMode::Scan1In4 => "scan_1in4",
            ScanMode::Scan1In8 => "scan_1in8",
            ScanMode::Scan1In16 => "scan_1in16",
            ScanMode::Scan1In32 => "scan_1in32",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "static" => Some(ScanMode::Static),
            "scan_1in2" => Some(ScanMode::Scan1In2),
            "scan_1in4" => Some(ScanMode::Scan1In4),
            "scan_1in8" => Some(ScanMode::Scan1In8),
            "scan_1in16" => Some(ScanMode::Scan1In16),
            "scan_1in32" => Some(ScanMode::Scan1In32),
            _ => None,
        }
    }
}

/// How the output brightness is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrightnessPolicy {
    #[serde(default)]
    pub mode: BrightnessMode,
    /// Manual level, 0–100.
    #[serde(default = "default_brightness")]
    pub level: u8,
    /// Time-of-day slots for `Scheduled` mode.
    #[serde(default)]
    pub schedule: Vec<BrightnessSlot>,
}

impl Default for BrightnessPolicy {
    fn default() -> Self {
        Self {
            mode: BrightnessMode::Manual,
            level: default_brightness(),
            schedule: Vec::new(),
        }
    }
}

fn default_brightness() -> u8 {
    100
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrightnessMode {
    #[default]
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrightnessSlot {
    pub hour: u8,
    pub minute: u8,
    pub level: u8,
}

impl BrightnessPolicy {
    /// Level in effect at the given time of day.  With a schedule, the most
    /// recent slot at or before now wins; before the first slot the last one
    /// applies (wrap around midnight).
    pub fn level_at(&self, hour: u8, minute: u8) -> u8 {
        if self.mode == BrightnessMode::Manual || self.schedule.is_empty() {
            return self.level;
        }
        let now = hour as u16 * 60 + minute as u16;
        let mut best: Option<&BrightnessSlot> = None;
        for slot in &self.schedule {
            let at = slot.hour as u16 * 60 + slot.minute as u16;
            if at <= now {
                best = Some(slot);
            }
        }
        best.or(self.schedule.last()).map_or(self.level, |s| s.level)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(HardwareConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_duplicate_send_card_index_rejected() {
        let mut cfg = HardwareConfig::default();
        cfg.send_cards = vec![
            SendCard { index: 0, ..SendCard::default() },
            SendCard { index: 0, ..SendCard::default() },
        ];
        assert_eq!(
            cfg.validate(),
            Err(HwConfigError::DuplicateCardIndex { kind: "send", index: 0 })
        );
    }

    #[test]
    fn test_gap_in_receive_card_indices_rejected() {
        let mut cfg = HardwareConfig::default();
        cfg.receive_cards = vec![
            ReceiveCard { index: 0, send_card: 0 },
            ReceiveCard { index: 2, send_card: 0 },
        ];
        assert_eq!(
            cfg.validate(),
            Err(HwConfigError::NonContiguousCardIndex {
                kind: "receive",
                index: 2,
                expected: 1
            })
        );
    }

    #[test]
    fn test_out_of_order_but_contiguous_indices_accepted() {
        let mut cfg = HardwareConfig::default();
        cfg.receive_cards = vec![
            ReceiveCard { index: 1, send_card: 0 },
            ReceiveCard { index: 0, send_card: 0 },
            ReceiveCard { index: 2, send_card: 0 },
        ];
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn test_empty_send_cards_rejected() {
        let mut cfg = HardwareConfig::default();
        cfg.send_cards.clear();
        assert_eq!(cfg.validate(), Err(HwConfigError::NoSendCards));
    }

    #[test]
    fn test_bad_color_depth_rejected() {
        let mut cfg = HardwareConfig::default();
        cfg.color_depth = 9;
        assert_eq!(cfg.validate(), Err(HwConfigError::BadColorDepth(9)));
    }

    #[test]
    fn test_short_gamma_table_rejected() {
        let mut cfg = HardwareConfig::default();
        cfg.gamma.truncate(16);
        assert_eq!(cfg.validate(), Err(HwConfigError::BadGammaLength(16)));
    }

    #[test]
    fn test_brightness_over_100_rejected() {
        let mut cfg = HardwareConfig::default();
        cfg.brightness.level = 101;
        assert_eq!(cfg.validate(), Err(HwConfigError::BadBrightness(101)));
    }

    #[test]
    fn test_card_indices_separate_send_and_receive_spaces() {
        let cfg = HardwareConfig::default();
        let idx = cfg.card_indices();
        assert_eq!(idx, vec![0, RECEIVE_CARD_BASE]);
    }

    #[test]
    fn test_toml_round_trip() {
        let cfg = HardwareConfig::default();
        let text = toml::to_string(&cfg).expect("serialize");
        let back: HardwareConfig = toml::from_str(&text).expect("deserialize");
        assert_eq!(cfg, back);
    }

    #[test]
    fn test_manual_brightness_ignores_schedule() {
        let policy = BrightnessPolicy {
            mode: BrightnessMode::Manual,
            level: 40,
            schedule: vec![BrightnessSlot { hour: 8, minute: 0, level: 90 }],
        };
        assert_eq!(policy.level_at(9, 0), 40);
    }

    #[test]
    fn test_scheduled_brightness_picks_most_recent_slot() {
        let policy = BrightnessPolicy {
            mode: BrightnessMode::Scheduled,
            level: 100,
            schedule: vec![
                BrightnessSlot { hour: 8, minute: 0, level: 90 },
                BrightnessSlot { hour: 20, minute: 0, level: 30 },
            ],
        };
        assert_eq!(policy.level_at(12, 0), 90);
        assert_eq!(policy.level_at(21, 30), 30);
        // Before 08:00 the last slot wraps around from the previous evening.
        assert_eq!(policy.level_at(6, 0), 30);
    }
}
