//! Integration tests for the card transport state machine.
//!
//! # Purpose
//!
//! These tests run the real `Transport` loop against a scripted in-memory
//! `CardLink`, the same way the serial implementation plugs in, and verify:
//!
//! - Reconnection: a link failure mid-stream moves the status to `Error`,
//!   the transport backs off, reconnects, and resumes streaming on the
//!   replacement link.
//! - Degraded cards: a card that never acks a configuration write is marked
//!   degraded while streaming continues for the rest.
//! - Firmware: a fully acked flash reports `Success`; a rejected chunk
//!   reports `Failed` and streaming resumes either way.
//!
//! Time is paused, so backoff sleeps and ack timeouts cost nothing.
//!
//! ```text
//! watch<Arc<Frame>> ──▶ Transport ──▶ CardLink (scripted)
//! mpsc<TransportCommand> ─┘   └──▶ watch<TransportStatus>
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use ledwall_controller::infrastructure::transport::link::{
    Ack, CardLink, CardLinkFactory, CardMessage, LinkError,
};
use ledwall_controller::infrastructure::transport::{
    status_channel, LinkState, Transport, TransportCommand, TransportStatus, UpgradeOutcome,
};
use ledwall_controller::render::engine::Frame;
use ledwall_core::hwconfig::{HardwareConfig, SendCard};

/// Messages every mock link wrote, in order, across reconnects.
type SentLog = Arc<Mutex<Vec<CardMessage>>>;

struct MockLink {
    sent: SentLog,
    /// Scripted ack responses; empty means instant `AckTimeout`.
    acks: Mutex<VecDeque<Ack>>,
    /// Fail the Nth send (0-based) with `Closed`.
    fail_on_send: Option<usize>,
    sends: usize,
}

impl MockLink {
    fn healthy(sent: SentLog) -> Self {
        Self {
            sent,
            acks: Mutex::new(VecDeque::new()),
            fail_on_send: None,
            sends: 0,
        }
    }

    fn with_acks(sent: SentLog, acks: impl IntoIterator<Item = Ack>) -> Self {
        Self {
            acks: Mutex::new(acks.into_iter().collect()),
            ..Self::healthy(sent)
        }
    }

    fn failing_on_send(sent: SentLog, nth: usize) -> Self {
        Self {
            fail_on_send: Some(nth),
            ..Self::healthy(sent)
        }
    }
}

#[async_trait]
impl CardLink for MockLink {
    async fn send(&mut self, message: &CardMessage) -> Result<(), LinkError> {
        if self.fail_on_send == Some(self.sends) {
            return Err(LinkError::Closed);
        }
        self.sends += 1;
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn recv_ack(&mut self, _timeout: Duration) -> Result<Ack, LinkError> {
        self.acks
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(LinkError::AckTimeout)
    }
}

/// Hands out scripted links in order, then healthy ones forever.
struct ScriptedFactory {
    sent: SentLog,
    links: Mutex<VecDeque<MockLink>>,
}

impl ScriptedFactory {
    fn new(sent: SentLog, links: impl IntoIterator<Item = MockLink>) -> Self {
        Self {
            sent,
            links: Mutex::new(links.into_iter().collect()),
        }
    }
}

#[async_trait]
impl CardLinkFactory for ScriptedFactory {
    async fn connect(&self) -> Result<Box<dyn CardLink>, LinkError> {
        let next = self.links.lock().unwrap().pop_front();
        Ok(Box::new(
            next.unwrap_or_else(|| MockLink::healthy(Arc::clone(&self.sent))),
        ))
    }
}

struct Rig {
    frame_tx: watch::Sender<Arc<Frame>>,
    command_tx: mpsc::Sender<TransportCommand>,
    status_rx: watch::Receiver<TransportStatus>,
    sent: SentLog,
    handle: tokio::task::JoinHandle<()>,
}

fn rig(links: Vec<MockLink>, sent: SentLog) -> Rig {
    let (frame_tx, frame_rx) = watch::channel(Arc::new(Frame::black(8, 4)));
    let (command_tx, command_rx) = mpsc::channel(4);
    let (status_tx, status_rx) = status_channel();
    let transport = Transport::new(
        ScriptedFactory::new(Arc::clone(&sent), links),
        frame_rx,
        command_rx,
        status_tx,
        Duration::from_millis(100),
        Duration::from_millis(2_000),
    );
    let handle = tokio::spawn(transport.run());
    Rig {
        frame_tx,
        command_tx,
        status_rx,
        sent,
        handle,
    }
}

fn frame(seq: u64) -> Arc<Frame> {
    Arc::new(Frame {
        seq,
        width: 8,
        height: 4,
        rgba: vec![0; 8 * 4 * 4],
    })
}

fn two_card_config() -> Arc<HardwareConfig> {
    let mut config = HardwareConfig::default();
    config.send_cards = vec![
        SendCard { index: 0, width: 128, height: 64 },
        SendCard { index: 1, width: 128, height: 64 },
    ];
    config.receive_cards.clear();
    config.validate().expect("valid test config");
    Arc::new(config)
}

#[tokio::test(start_paused = true)]
async fn test_link_failure_reconnects_and_resumes_streaming() {
    let sent: SentLog = Arc::default();
    // First link dies on its very first write; the replacement is healthy.
    let mut rig = rig(
        vec![
            MockLink::failing_on_send(Arc::clone(&sent), 0),
            MockLink::healthy(Arc::clone(&sent)),
        ],
        sent,
    );

    rig.frame_tx.send_replace(frame(1));
    rig.status_rx
        .wait_for(|s| s.state == LinkState::Streaming && s.reconnects >= 1)
        .await
        .expect("reconnected");

    // The replacement link received the current frame on connect.
    rig.frame_tx.send_replace(frame(2));
    rig.status_rx
        .wait_for(|s| s.state == LinkState::Streaming)
        .await
        .expect("streaming");

    drop(rig.frame_tx);
    drop(rig.command_tx);
    rig.handle.await.expect("transport stops");

    let log = rig.sent.lock().unwrap();
    assert!(
        log.iter()
            .any(|m| matches!(m, CardMessage::PixelFrame { seq: 1, .. })),
        "replacement link streams the pre-failure frame"
    );
}

#[tokio::test(start_paused = true)]
async fn test_unacked_card_is_degraded_and_streaming_resumes() {
    let sent: SentLog = Arc::default();
    // Card 0 acks the config write; card 1 stays silent and times out.
    let link = MockLink::with_acks(Arc::clone(&sent), [Ack { card: 0, ok: true }]);
    let rig = rig(vec![link], sent);
    let mut status_rx = rig.status_rx.clone();

    rig.command_tx
        .send(TransportCommand::WriteConfig(two_card_config()))
        .await
        .expect("send command");

    let status = status_rx
        .wait_for(|s| !s.degraded_cards.is_empty())
        .await
        .expect("degraded")
        .clone();
    assert_eq!(status.degraded_cards, vec![1]);

    status_rx
        .wait_for(|s| s.state == LinkState::Streaming)
        .await
        .expect("back to streaming");

    drop(rig.frame_tx);
    drop(rig.command_tx);
    rig.handle.await.expect("transport stops");

    let writes = rig
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter(|m| matches!(m, CardMessage::ConfigWrite { .. }))
        .count();
    assert_eq!(writes, 2, "both cards were addressed");
}

#[tokio::test(start_paused = true)]
async fn test_fully_acked_flash_reports_success() {
    let sent: SentLog = Arc::default();
    // 10_000 bytes span three 4 KiB chunks, each acked.
    let acks = (0..3).map(|_| Ack { card: 0, ok: true });
    let rig = rig(vec![MockLink::with_acks(Arc::clone(&sent), acks)], sent);
    let mut status_rx = rig.status_rx.clone();

    rig.command_tx
        .send(TransportCommand::Firmware(vec![0xab; 10_000]))
        .await
        .expect("send command");

    let status = status_rx
        .wait_for(|s| matches!(s.upgrade, Some(UpgradeOutcome::Success)))
        .await
        .expect("upgrade done")
        .clone();
    assert_eq!(status.state, LinkState::Streaming, "streaming resumes");

    drop(rig.frame_tx);
    drop(rig.command_tx);
    rig.handle.await.expect("transport stops");

    let chunks: Vec<bool> = rig
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter_map(|m| match m {
            CardMessage::FirmwareChunk { last, .. } => Some(*last),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec![false, false, true]);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_chunk_fails_the_upgrade() {
    let sent: SentLog = Arc::default();
    let acks = [Ack { card: 0, ok: true }, Ack { card: 0, ok: false }];
    let rig = rig(vec![MockLink::with_acks(Arc::clone(&sent), acks)], sent);
    let mut status_rx = rig.status_rx.clone();

    rig.command_tx
        .send(TransportCommand::Firmware(vec![0xab; 10_000]))
        .await
        .expect("send command");

    let status = status_rx
        .wait_for(|s| matches!(s.upgrade, Some(UpgradeOutcome::Failed(_))))
        .await
        .expect("upgrade failed")
        .clone();
    assert_eq!(status.state, LinkState::Streaming, "streaming still resumes");

    drop(rig.frame_tx);
    drop(rig.command_tx);
    rig.handle.await.expect("transport stops");
}
