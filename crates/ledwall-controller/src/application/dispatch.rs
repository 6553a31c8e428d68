//! SDK command dispatcher.
//!
//! One flat method-name match, no dispatch hierarchy.  Every handler
//! validates its payload completely before touching any store; a validation
//! failure produces a structured error response and zero state change.
//! Handlers never hold a store lock across an `.await` — stores hand out
//! snapshots and swap whole values.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

use ledwall_core::program::parser::{parse_program_xml, ParseError};
use ledwall_core::protocol::envelope::{
    element_attr, elements_of, tag_attr, xml_escape, ResultCode, SdkRequest, SdkResponse,
};
use ledwall_core::{BrightnessPolicy, ReceiveCard, SendCard};

use crate::application::services::{ScheduleService, SwitchTimeEntry};
use crate::application::store::{HwConfigStore, ProgramStore, StoreError};
use crate::infrastructure::storage::programs::{ProgramLibrary, StorageError};
use crate::infrastructure::transport::{LinkState, TransportCommand, TransportStatus, UpgradeOutcome};
use crate::render::schedule::parse_hms;
use ledwall_core::hwconfig::{BrightnessMode, BrightnessSlot, ScanMode};

/// Protocol interface version reported by `QueryIFVersion`.
pub const IF_VERSION: &str = "1.0";

pub struct Dispatcher {
    programs: Arc<ProgramStore>,
    hwconfig: Arc<HwConfigStore>,
    schedule: Arc<ScheduleService>,
    library: Arc<ProgramLibrary>,
    transport_cmd: mpsc::Sender<TransportCommand>,
    transport_status: watch::Receiver<TransportStatus>,
    canvas_width: u32,
    canvas_height: u32,
    device_name: String,
    fps: u32,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        programs: Arc<ProgramStore>,
        hwconfig: Arc<HwConfigStore>,
        schedule: Arc<ScheduleService>,
        library: Arc<ProgramLibrary>,
        transport_cmd: mpsc::Sender<TransportCommand>,
        transport_status: watch::Receiver<TransportStatus>,
        canvas_width: u32,
        canvas_height: u32,
        device_name: String,
        fps: u32,
    ) -> Self {
        Self {
            programs,
            hwconfig,
            schedule,
            library,
            transport_cmd,
            transport_status,
            canvas_width,
            canvas_height,
            device_name,
            fps,
        }
    }

    /// Routes one parsed request to its handler.
    pub async fn handle(&self, request: SdkRequest) -> SdkResponse {
        let SdkRequest { guid, method, body } = request;
        info!(%guid, %method, "sdk command");
        match method.as_str() {
            "GetAllProgram" => self.get_all_program(&guid, &method),
            "AddProgram" | "UpdateProgram" => self.add_program(&guid, &method, &body),
            "DeleteProgram" => self.delete_program(&guid, &method, &body),
            "SwitchProgram" => self.switch_program(&guid, &method, &body),

            "GetSDKFPGAConfig" => self.get_fpga_config(&guid, &method),
            "SetSDKFPGAConfig" => self.set_fpga_config(&guid, &method, &body).await,
            "GetBoxHwConfig" => self.get_box_hwconfig(&guid, &method),
            "SetBoxHwConfig" => self.set_box_hwconfig(&guid, &method, &body).await,
            "SaveBoxHwConfig" => self.save_box_hwconfig(&guid, &method),

            "GetLuminancePloy" => self.get_luminance(&guid, &method),
            "SetLuminancePloy" => self.set_luminance(&guid, &method, &body),

            "GetSwitchTime" => self.get_switch_time(&guid, &method),
            "SetSwitchTime" => self.set_switch_time(&guid, &method, &body),
            "OpenScreen" => self.set_screen(&guid, &method, true),
            "CloseScreen" => self.set_screen(&guid, &method, false),

            "FirmwareUpgrade" => self.firmware_upgrade(&guid, &method, &body).await,
            "GetUpgradeResult" => self.get_upgrade_result(&guid, &method),

            "QueryIFVersion" => SdkResponse::new(&guid, &method, ResultCode::Success)
                .with_body(format!("<version value=\"{IF_VERSION}\"/>")),
            "GetTimeInfo" => self.get_time_info(&guid, &method),
            "SetTimeInfo" => self.set_time_info(&guid, &method, &body),
            "GetDeviceInfo" => self.get_device_info(&guid, &method),
            "GetFiles" => self.get_files(&guid, &method),
            "DeleteFiles" => self.delete_files(&guid, &method, &body),

            _ => {
                warn!(%method, "unsupported sdk method");
                SdkResponse::new(&guid, &method, ResultCode::Unsupported)
            }
        }
    }

    // ── Programs ──────────────────────────────────────────────────────────────

    fn get_all_program(&self, guid: &str, method: &str) -> SdkResponse {
        let active = self.programs.active_id();
        let body: String = self
            .programs
            .list()
            .iter()
            .map(|p| {
                format!(
                    "<program guid=\"{}\" name=\"{}\" active=\"{}\"/>",
                    p.guid,
                    xml_escape(&p.name),
                    active == Some(p.guid)
                )
            })
            .collect();
        SdkResponse::new(guid, method, ResultCode::Success).with_body(body)
    }

    fn add_program(&self, guid: &str, method: &str, body: &str) -> SdkResponse {
        let program = match parse_program_xml(body, self.canvas_width, self.canvas_height) {
            Ok(program) => program,
            Err(ParseError::Validation(e)) => {
                return SdkResponse::new(guid, method, ResultCode::ValidationError)
                    .with_error_detail(&e.to_string());
            }
            Err(e) => {
                return SdkResponse::new(guid, method, ResultCode::ParseError)
                    .with_error_detail(&e.to_string());
            }
        };

        if let Err(e) = self.library.save_program(&program) {
            warn!(error = %e, "program persist failed");
            return SdkResponse::new(guid, method, ResultCode::HardwareError)
                .with_error_detail(&e.to_string());
        }
        let id = self.programs.load(program);
        SdkResponse::new(guid, method, ResultCode::Success)
            .with_body(format!("<program guid=\"{id}\"/>"))
    }

    fn delete_program(&self, guid: &str, method: &str, body: &str) -> SdkResponse {
        let Some(id) = program_guid(body) else {
            return SdkResponse::new(guid, method, ResultCode::ParseError)
                .with_error_detail("missing or malformed program guid");
        };
        match self.programs.remove(id) {
            Ok(()) => {
                if let Err(e) = self.library.delete_program(id) {
                    warn!(error = %e, "program file delete failed");
                }
                SdkResponse::new(guid, method, ResultCode::Success)
            }
            Err(StoreError::NotFound(_)) => SdkResponse::new(guid, method, ResultCode::NotFound),
        }
    }

    fn switch_program(&self, guid: &str, method: &str, body: &str) -> SdkResponse {
        let Some(id) = program_guid(body) else {
            return SdkResponse::new(guid, method, ResultCode::ParseError)
                .with_error_detail("missing or malformed program guid");
        };
        match self.programs.switch_active(id) {
            Ok(()) => SdkResponse::new(guid, method, ResultCode::Success),
            Err(StoreError::NotFound(_)) => SdkResponse::new(guid, method, ResultCode::NotFound),
        }
    }

    // ── Hardware config ───────────────────────────────────────────────────────

    fn get_fpga_config(&self, guid: &str, method: &str) -> SdkResponse {
        let cfg = self.hwconfig.get();
        SdkResponse::new(guid, method, ResultCode::Success).with_body(format!(
            "<fpga scanMode=\"{}\" colorDepth=\"{}\" refreshRate=\"{}\" grayLevels=\"{}\"/>",
            cfg.scan_mode.as_str(),
            cfg.color_depth,
            cfg.refresh_rate_hz,
            cfg.gray_levels
        ))
    }

    async fn set_fpga_config(&self, guid: &str, method: &str, body: &str) -> SdkResponse {
        let Some(tag) = elements_of(body, "fpga").first().copied() else {
            return SdkResponse::new(guid, method, ResultCode::ParseError)
                .with_error_detail("missing <fpga> element");
        };

        let mut next = (*self.hwconfig.get()).clone();
        if let Some(mode) = tag_attr(tag, "scanMode") {
            match ScanMode::parse(&mode) {
                Some(mode) => next.scan_mode = mode,
                None => {
                    return SdkResponse::new(guid, method, ResultCode::ParseError)
                        .with_error_detail(&format!("unknown scan mode `{mode}`"));
                }
            }
        }
        if let Some(raw) = tag_attr(tag, "colorDepth") {
            let Ok(value) = raw.parse() else {
                return SdkResponse::new(guid, method, ResultCode::ParseError)
                    .with_error_detail(&format!("bad colorDepth `{raw}`"));
            };
            next.color_depth = value;
        }
        if let Some(raw) = tag_attr(tag, "refreshRate") {
            let Ok(value) = raw.parse() else {
                return SdkResponse::new(guid, method, ResultCode::ParseError)
                    .with_error_detail(&format!("bad refreshRate `{raw}`"));
            };
            next.refresh_rate_hz = value;
        }
        if let Some(raw) = tag_attr(tag, "grayLevels") {
            let Ok(value) = raw.parse() else {
                return SdkResponse::new(guid, method, ResultCode::ParseError)
                    .with_error_detail(&format!("bad grayLevels `{raw}`"));
            };
            next.gray_levels = value;
        }

        if let Err(e) = self.hwconfig.replace(next) {
            return SdkResponse::new(guid, method, ResultCode::ValidationError)
                .with_error_detail(&e.to_string());
        }
        self.push_config().await;
        SdkResponse::new(guid, method, ResultCode::Success)
    }

    fn get_box_hwconfig(&self, guid: &str, method: &str) -> SdkResponse {
        let cfg = self.hwconfig.get();
        let mut body = format!("<hwconfig rotation=\"{}\">", cfg.rotation_quarters);
        for card in &cfg.send_cards {
            body.push_str(&format!(
                "<sendCard index=\"{}\" width=\"{}\" height=\"{}\"/>",
                card.index, card.width, card.height
            ));
        }
        for card in &cfg.receive_cards {
            body.push_str(&format!(
                "<receiveCard index=\"{}\" sendCard=\"{}\"/>",
                card.index, card.send_card
            ));
        }
        body.push_str("</hwconfig>");
        SdkResponse::new(guid, method, ResultCode::Success).with_body(body)
    }

    async fn set_box_hwconfig(&self, guid: &str, method: &str, body: &str) -> SdkResponse {
        let mut next = (*self.hwconfig.get()).clone();

        if let Some(raw) = element_attr(body, "hwconfig", "rotation") {
            let Ok(rotation) = raw.parse::<u8>() else {
                return SdkResponse::new(guid, method, ResultCode::ParseError)
                    .with_error_detail(&format!("bad rotation `{raw}`"));
            };
            next.rotation_quarters = rotation % 4;
        }

        let mut send_cards = Vec::new();
        for tag in elements_of(body, "sendCard") {
            let Some(card) = parse_send_card(tag) else {
                return SdkResponse::new(guid, method, ResultCode::ParseError)
                    .with_error_detail("malformed <sendCard>");
            };
            send_cards.push(card);
        }
        let mut receive_cards = Vec::new();
        for tag in elements_of(body, "receiveCard") {
            let Some(card) = parse_receive_card(tag) else {
                return SdkResponse::new(guid, method, ResultCode::ParseError)
                    .with_error_detail("malformed <receiveCard>");
            };
            receive_cards.push(card);
        }
        if !send_cards.is_empty() {
            next.send_cards = send_cards;
        }
        if !receive_cards.is_empty() {
            next.receive_cards = receive_cards;
        }

        if let Err(e) = self.hwconfig.replace(next) {
            return SdkResponse::new(guid, method, ResultCode::ValidationError)
                .with_error_detail(&e.to_string());
        }
        self.push_config().await;
        SdkResponse::new(guid, method, ResultCode::Success)
    }

    fn save_box_hwconfig(&self, guid: &str, method: &str) -> SdkResponse {
        match self.library.save_hwconfig(&self.hwconfig.get()) {
            Ok(()) => SdkResponse::new(guid, method, ResultCode::Success),
            Err(e) => {
                warn!(error = %e, "hwconfig persist failed");
                SdkResponse::new(guid, method, ResultCode::HardwareError)
                    .with_error_detail(&e.to_string())
            }
        }
    }

    /// Hands the validated configuration to the transport.
    async fn push_config(&self) {
        if self
            .transport_cmd
            .send(TransportCommand::WriteConfig(self.hwconfig.get()))
            .await
            .is_err()
        {
            warn!("transport command channel closed, config not pushed");
        }
    }

    // ── Luminance ─────────────────────────────────────────────────────────────

    fn get_luminance(&self, guid: &str, method: &str) -> SdkResponse {
        let policy = self.hwconfig.get().brightness.clone();
        let mode = match policy.mode {
            BrightnessMode::Manual => "manual",
            BrightnessMode::Scheduled => "scheduled",
        };
        let mut body = format!("<luminance mode=\"{mode}\" value=\"{}\">", policy.level);
        for slot in &policy.schedule {
            body.push_str(&format!(
                "<item hour=\"{}\" minute=\"{}\" level=\"{}\"/>",
                slot.hour, slot.minute, slot.level
            ));
        }
        body.push_str("</luminance>");
        SdkResponse::new(guid, method, ResultCode::Success).with_body(body)
    }

    fn set_luminance(&self, guid: &str, method: &str, body: &str) -> SdkResponse {
        let mode = match element_attr(body, "luminance", "mode").as_deref() {
            Some("manual") | None => BrightnessMode::Manual,
            Some("scheduled") => BrightnessMode::Scheduled,
            Some(other) => {
                return SdkResponse::new(guid, method, ResultCode::ParseError)
                    .with_error_detail(&format!("unknown luminance mode `{other}`"));
            }
        };
        let level = match element_attr(body, "luminance", "value") {
            Some(raw) => match raw.parse::<u8>() {
                Ok(level) => level,
                Err(_) => {
                    return SdkResponse::new(guid, method, ResultCode::ParseError)
                        .with_error_detail(&format!("bad luminance value `{raw}`"));
                }
            },
            None => self.hwconfig.get().brightness.level,
        };

        let mut slots = Vec::new();
        for tag in elements_of(body, "item") {
            let parsed = (
                tag_attr(tag, "hour").and_then(|v| v.parse::<u8>().ok()),
                tag_attr(tag, "minute").and_then(|v| v.parse::<u8>().ok()),
                tag_attr(tag, "level").and_then(|v| v.parse::<u8>().ok()),
            );
            let (Some(hour), Some(minute), Some(level)) = parsed else {
                return SdkResponse::new(guid, method, ResultCode::ParseError)
                    .with_error_detail("malformed luminance <item>");
            };
            slots.push(BrightnessSlot { hour, minute, level });
        }

        let policy = BrightnessPolicy {
            mode,
            level,
            schedule: slots,
        };
        if let Err(e) = self.hwconfig.update(move |cfg| cfg.brightness = policy) {
            return SdkResponse::new(guid, method, ResultCode::ValidationError)
                .with_error_detail(&e.to_string());
        }
        // Manual changes take effect now, not at the next 30 s boundary.
        self.schedule
            .evaluate(self.schedule.adjust(chrono::Local::now().naive_local()));
        SdkResponse::new(guid, method, ResultCode::Success)
    }

    // ── Screen schedule ───────────────────────────────────────────────────────

    fn get_switch_time(&self, guid: &str, method: &str) -> SdkResponse {
        let body: String = self
            .schedule
            .switch_times()
            .iter()
            .map(|e| {
                format!(
                    "<item onTime=\"{}\" offTime=\"{}\" days=\"{}\"/>",
                    e.on_time,
                    e.off_time,
                    xml_escape(&e.days)
                )
            })
            .collect();
        SdkResponse::new(guid, method, ResultCode::Success).with_body(body)
    }

    fn set_switch_time(&self, guid: &str, method: &str, body: &str) -> SdkResponse {
        let mut entries = Vec::new();
        for tag in elements_of(body, "item") {
            let (Some(on_time), Some(off_time)) =
                (tag_attr(tag, "onTime"), tag_attr(tag, "offTime"))
            else {
                return SdkResponse::new(guid, method, ResultCode::ParseError)
                    .with_error_detail("switch-time <item> missing onTime/offTime");
            };
            if parse_hms(&on_time).is_none() || parse_hms(&off_time).is_none() {
                return SdkResponse::new(guid, method, ResultCode::ValidationError)
                    .with_error_detail(&format!("bad time in window {on_time}–{off_time}"));
            }
            entries.push(SwitchTimeEntry {
                on_time,
                off_time,
                days: tag_attr(tag, "days").unwrap_or_default(),
            });
        }
        self.schedule.set_switch_times(entries);
        self.schedule
            .evaluate(self.schedule.adjust(chrono::Local::now().naive_local()));
        SdkResponse::new(guid, method, ResultCode::Success)
    }

    fn set_screen(&self, guid: &str, method: &str, on: bool) -> SdkResponse {
        self.schedule.set_screen(on);
        SdkResponse::new(guid, method, ResultCode::Success)
    }

    // ── Firmware ──────────────────────────────────────────────────────────────

    async fn firmware_upgrade(&self, guid: &str, method: &str, body: &str) -> SdkResponse {
        let Some(file) = element_attr(body, "firmware", "file") else {
            return SdkResponse::new(guid, method, ResultCode::ParseError)
                .with_error_detail("missing <firmware file=…>");
        };
        let path = self.library.media_dir().join(&file);
        let image = match tokio::fs::read(&path).await {
            Ok(image) => image,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return SdkResponse::new(guid, method, ResultCode::NotFound)
                    .with_error_detail(&format!("firmware image `{file}` not uploaded"));
            }
            Err(e) => {
                return SdkResponse::new(guid, method, ResultCode::HardwareError)
                    .with_error_detail(&e.to_string());
            }
        };

        if self.transport_status.borrow().state == LinkState::Upgrading {
            return SdkResponse::new(guid, method, ResultCode::Busy)
                .with_error_detail("an upgrade is already in progress");
        }
        match self.transport_cmd.send(TransportCommand::Firmware(image)).await {
            Ok(()) => SdkResponse::new(guid, method, ResultCode::Success),
            Err(_) => SdkResponse::new(guid, method, ResultCode::HardwareError)
                .with_error_detail("card transport unavailable"),
        }
    }

    fn get_upgrade_result(&self, guid: &str, method: &str) -> SdkResponse {
        let status = self.transport_status.borrow().clone();
        let (state, detail) = match &status.upgrade {
            None => ("none", String::new()),
            Some(UpgradeOutcome::InProgress) => ("inProgress", String::new()),
            Some(UpgradeOutcome::Success) => ("success", String::new()),
            Some(UpgradeOutcome::Failed(reason)) => ("failed", reason.clone()),
        };
        SdkResponse::new(guid, method, ResultCode::Success).with_body(format!(
            "<upgrade state=\"{state}\" detail=\"{}\"/>",
            xml_escape(&detail)
        ))
    }

    // ── Device info & time ────────────────────────────────────────────────────

    fn get_time_info(&self, guid: &str, method: &str) -> SdkResponse {
        let now = self.schedule.adjust(chrono::Local::now().naive_local());
        SdkResponse::new(guid, method, ResultCode::Success).with_body(format!(
            "<time value=\"{}\"/>",
            now.format("%Y-%m-%d %H:%M:%S")
        ))
    }

    fn set_time_info(&self, guid: &str, method: &str, body: &str) -> SdkResponse {
        let Some(raw) = element_attr(body, "time", "value") else {
            return SdkResponse::new(guid, method, ResultCode::ParseError)
                .with_error_detail("missing <time value=…>");
        };
        match chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S") {
            Ok(commanded) => {
                self.schedule.set_time(commanded, chrono::Local::now().naive_local());
                SdkResponse::new(guid, method, ResultCode::Success)
            }
            Err(_) => SdkResponse::new(guid, method, ResultCode::ParseError)
                .with_error_detail(&format!("bad time `{raw}`")),
        }
    }

    fn get_device_info(&self, guid: &str, method: &str) -> SdkResponse {
        let status = self.transport_status.borrow().clone();
        SdkResponse::new(guid, method, ResultCode::Success).with_body(format!(
            "<device name=\"{}\" width=\"{}\" height=\"{}\" fps=\"{}\" link=\"{}\" degraded=\"{}\"/>",
            xml_escape(&self.device_name),
            self.canvas_width,
            self.canvas_height,
            self.fps,
            link_state_name(status.state),
            status.degraded_cards.len()
        ))
    }

    // ── Files ─────────────────────────────────────────────────────────────────

    fn get_files(&self, guid: &str, method: &str) -> SdkResponse {
        match self.library.list_media() {
            Ok(files) => {
                let body: String = files
                    .iter()
                    .map(|(name, size)| {
                        format!("<file name=\"{}\" size=\"{size}\"/>", xml_escape(name))
                    })
                    .collect();
                SdkResponse::new(guid, method, ResultCode::Success).with_body(body)
            }
            Err(e) => SdkResponse::new(guid, method, ResultCode::HardwareError)
                .with_error_detail(&e.to_string()),
        }
    }

    fn delete_files(&self, guid: &str, method: &str, body: &str) -> SdkResponse {
        let names: Vec<String> = elements_of(body, "file")
            .iter()
            .filter_map(|tag| tag_attr(tag, "name"))
            .collect();
        if names.is_empty() {
            return SdkResponse::new(guid, method, ResultCode::ParseError)
                .with_error_detail("no <file name=…> entries");
        }
        for name in &names {
            match self.library.delete_media(name) {
                Ok(()) => {}
                Err(StorageError::UnsafeFileName(name)) => {
                    return SdkResponse::new(guid, method, ResultCode::ValidationError)
                        .with_error_detail(&format!("unsafe file name `{name}`"));
                }
                Err(e) => {
                    return SdkResponse::new(guid, method, ResultCode::HardwareError)
                        .with_error_detail(&e.to_string());
                }
            }
        }
        SdkResponse::new(guid, method, ResultCode::Success)
    }
}

// ── Body helpers ──────────────────────────────────────────────────────────────

fn program_guid(body: &str) -> Option<Uuid> {
    element_attr(body, "program", "guid").and_then(|raw| raw.parse().ok())
}

fn parse_send_card(tag: &str) -> Option<SendCard> {
    Some(SendCard {
        index: tag_attr(tag, "index")?.parse().ok()?,
        width: tag_attr(tag, "width").and_then(|v| v.parse().ok()).unwrap_or(128),
        height: tag_attr(tag, "height").and_then(|v| v.parse().ok()).unwrap_or(64),
    })
}

fn parse_receive_card(tag: &str) -> Option<ReceiveCard> {
    Some(ReceiveCard {
        index: tag_attr(tag, "index")?.parse().ok()?,
        send_card: tag_attr(tag, "sendCard").and_then(|v| v.parse().ok()).unwrap_or(0),
    })
}

fn link_state_name(state: LinkState) -> &'static str {
    match state {
        LinkState::Idle => "idle",
        LinkState::Configuring => "configuring",
        LinkState::Streaming => "streaming",
        LinkState::Upgrading => "upgrading",
        LinkState::Error => "error",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
