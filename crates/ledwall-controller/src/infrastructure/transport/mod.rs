//! FPGA card transport: frame streaming, configuration writes, firmware
//! flashing, and link recovery.
//!
//! The transport task owns the card link exclusively.  Pixel frames arrive
//! through the compositor's watch channel (latest-wins); configuration and
//! firmware commands arrive through an mpsc channel and are applied between
//! frames, never interleaved with a partially written one.
//!
//! ```text
//! Idle ──config write──▶ Configuring ──all acks / ack timeout──▶ Streaming
//! Streaming ──firmware──▶ Upgrading ──done/failed──▶ Streaming
//! any ──I/O error──▶ Error ──reconnect (exp. backoff)──▶ Streaming
//! ```

pub mod link;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use ledwall_core::HardwareConfig;

use self::link::{Ack, CardLink, CardLinkFactory, CardMessage, LinkError};
use crate::render::engine::Frame;

/// Observable link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Configuring,
    Streaming,
    Upgrading,
    Error,
}

/// Result of the most recent firmware flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    InProgress,
    Success,
    Failed(String),
}

/// Published on a watch channel after every state change.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportStatus {
    pub state: LinkState,
    /// Cards that missed their config ack; streaming continues without them.
    pub degraded_cards: Vec<u16>,
    pub upgrade: Option<UpgradeOutcome>,
    pub reconnects: u64,
}

impl Default for TransportStatus {
    fn default() -> Self {
        Self {
            state: LinkState::Idle,
            degraded_cards: Vec::new(),
            upgrade: None,
            reconnects: 0,
        }
    }
}

/// Commands the dispatcher sends to the transport.
#[derive(Debug)]
pub enum TransportCommand {
    WriteConfig(Arc<HardwareConfig>),
    Firmware(Vec<u8>),
}

/// Bytes per firmware chunk on the link.
const FIRMWARE_CHUNK: usize = 4096;
/// First reconnect delay; doubles up to the configured cap.
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

enum DriveEnd {
    /// Frame or command source closed; the controller is shutting down.
    SourcesClosed,
}

pub struct Transport<F: CardLinkFactory> {
    factory: F,
    frames: watch::Receiver<Arc<Frame>>,
    commands: mpsc::Receiver<TransportCommand>,
    status_tx: watch::Sender<TransportStatus>,
    ack_timeout: Duration,
    backoff_cap: Duration,
    status: TransportStatus,
}

impl<F: CardLinkFactory> Transport<F> {
    pub fn new(
        factory: F,
        frames: watch::Receiver<Arc<Frame>>,
        commands: mpsc::Receiver<TransportCommand>,
        status_tx: watch::Sender<TransportStatus>,
        ack_timeout: Duration,
        backoff_cap: Duration,
    ) -> Self {
        Self {
            factory,
            frames,
            commands,
            status_tx,
            ack_timeout,
            backoff_cap,
            status: TransportStatus::default(),
        }
    }

    /// Runs the transport until the frame and command sources are gone,
    /// reconnecting on link failure with exponential backoff.
    pub async fn run(mut self) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.factory.connect().await {
                Ok(mut card_link) => {
                    backoff = INITIAL_BACKOFF;
                    info!("card link established");
                    match self.drive(card_link.as_mut()).await {
                        Ok(DriveEnd::SourcesClosed) => {
                            info!("frame/command sources closed, transport stopping");
                            return;
                        }
                        Err(e) => {
                            warn!(error = %e, "card link failed");
                            self.set_state(LinkState::Error);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "card link connect failed");
                    self.set_state(LinkState::Error);
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.backoff_cap);
            self.status.reconnects += 1;
            self.publish();
        }
    }

    /// Streams frames and applies commands over one live link.
    async fn drive(&mut self, card_link: &mut dyn CardLink) -> Result<DriveEnd, LinkError> {
        self.set_state(LinkState::Streaming);
        // The frame present at connect time is sent immediately so a fresh
        // link shows the current picture without waiting for the next tick.
        let first = self.frames.borrow_and_update().clone();
        if first.seq > 0 {
            send_frame(card_link, &first).await?;
        }

        loop {
            tokio::select! {
                changed = self.frames.changed() => {
                    if changed.is_err() {
                        return Ok(DriveEnd::SourcesClosed);
                    }
                    let frame = self.frames.borrow_and_update().clone();
                    send_frame(card_link, &frame).await?;
                }
                command = self.commands.recv() => match command {
                    None => return Ok(DriveEnd::SourcesClosed),
                    Some(TransportCommand::WriteConfig(config)) => {
                        self.apply_config(card_link, &config).await?;
                    }
                    Some(TransportCommand::Firmware(image)) => {
                        self.flash(card_link, &image).await?;
                    }
                },
            }
        }
    }

    /// Writes the configuration to every addressed card and collects acks.
    /// Cards that miss the ack window are marked degraded; streaming resumes
    /// for the rest.
    async fn apply_config(
        &mut self,
        card_link: &mut dyn CardLink,
        config: &HardwareConfig,
    ) -> Result<(), LinkError> {
        self.set_state(LinkState::Configuring);
        let payload = bincode::serialize(config)?;
        let expected = config.card_indices();

        for &card in &expected {
            card_link
                .send(&CardMessage::ConfigWrite {
                    card,
                    payload: payload.clone(),
                })
                .await?;
        }

        let mut acked = Vec::new();
        for _ in 0..expected.len() {
            match card_link.recv_ack(self.ack_timeout).await {
                Ok(Ack { card, ok: true }) => acked.push(card),
                Ok(Ack { card, ok: false }) => {
                    warn!(card, "card rejected configuration");
                }
                Err(LinkError::AckTimeout) => break,
                Err(e) => return Err(e),
            }
        }

        self.status.degraded_cards = expected
            .iter()
            .copied()
            .filter(|card| !acked.contains(card))
            .collect();
        if !self.status.degraded_cards.is_empty() {
            warn!(cards = ?self.status.degraded_cards, "cards unacknowledged, marked degraded");
        }
        self.set_state(LinkState::Streaming);
        Ok(())
    }

    /// Streams the firmware image in chunks.  Pixel streaming is suspended
    /// for the duration and resumes on completion or failure.
    async fn flash(
        &mut self,
        card_link: &mut dyn CardLink,
        image: &[u8],
    ) -> Result<(), LinkError> {
        self.status.upgrade = Some(UpgradeOutcome::InProgress);
        self.set_state(LinkState::Upgrading);

        let chunks: Vec<&[u8]> = image.chunks(FIRMWARE_CHUNK).collect();
        let total = chunks.len();
        let mut outcome = UpgradeOutcome::Success;
        for (i, chunk) in chunks.into_iter().enumerate() {
            card_link
                .send(&CardMessage::FirmwareChunk {
                    offset: (i * FIRMWARE_CHUNK) as u32,
                    data: chunk.to_vec(),
                    last: i + 1 == total,
                })
                .await?;
            match card_link.recv_ack(self.ack_timeout).await {
                Ok(Ack { ok: true, .. }) => {}
                Ok(Ack { card, ok: false }) => {
                    outcome = UpgradeOutcome::Failed(format!("card {card} rejected chunk {i}"));
                    break;
                }
                Err(LinkError::AckTimeout) => {
                    outcome = UpgradeOutcome::Failed(format!("ack timeout at chunk {i}"));
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        info!(?outcome, "firmware flash finished");
        self.status.upgrade = Some(outcome);
        self.set_state(LinkState::Streaming);
        Ok(())
    }

    fn set_state(&mut self, state: LinkState) {
        if self.status.state != state {
            info!(from = ?self.status.state, to = ?state, "transport state change");
            self.status.state = state;
        }
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status.clone());
    }
}

async fn send_frame(card_link: &mut dyn CardLink, frame: &Frame) -> Result<(), LinkError> {
    card_link
        .send(&CardMessage::PixelFrame {
            seq: frame.seq,
            width: frame.width,
            height: frame.height,
            rgba: frame.rgba.clone(),
        })
        .await
}

/// Creates the status channel seeded with the idle status.
pub fn status_channel() -> (watch::Sender<TransportStatus>, watch::Receiver<TransportStatus>) {
    watch::channel(TransportStatus::default())
}
