//! The card link: message classes, framing, and the link trait.
//!
//! Wire framing is a 4-byte little-endian length prefix followed by a
//! bincode-encoded [`CardMessage`].  This codec is a behavioural stand-in:
//! the byte-exact Cyclone FPGA framing is undocumented and needs a logic
//! analyzer capture before a bit-exact codec can replace it.  Everything
//! above the codec — message classes, acks, timeouts, the state machine —
//! is written against the [`CardLink`] trait so the swap stays local.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("message codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("timed out waiting for card ack")]
    AckTimeout,
    #[error("card link closed")]
    Closed,
    #[error("oversized link frame ({0} bytes)")]
    Oversized(u32),
    #[error("serial open failed: {0}")]
    Serial(#[from] tokio_serial::Error),
}

/// The three distinct message classes of the card protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CardMessage {
    /// One full output frame, premultiplied RGBA.
    PixelFrame {
        seq: u64,
        width: u32,
        height: u32,
        rgba: Vec<u8>,
    },
    /// A configuration write addressed to one card.
    ConfigWrite { card: u16, payload: Vec<u8> },
    /// One chunk of a firmware image.
    FirmwareChunk {
        offset: u32,
        data: Vec<u8>,
        last: bool,
    },
}

/// Acknowledgement from a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub card: u16,
    pub ok: bool,
}

/// Frames larger than this are rejected on decode; a frame for a large
/// panel stays well under it.
pub const MAX_LINK_FRAME: u32 = 64 * 1024 * 1024;

/// Encodes a message with its length prefix.
pub fn encode(message: &CardMessage) -> Result<Vec<u8>, LinkError> {
    let body = bincode::serialize(message)?;
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes one length-prefixed message from a byte slice, returning the
/// message and the bytes consumed; `Ok(None)` when the slice is incomplete.
pub fn decode(buf: &[u8]) -> Result<Option<(CardMessage, usize)>, LinkError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if len > MAX_LINK_FRAME {
        return Err(LinkError::Oversized(len));
    }
    let total = 4 + len as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let message = bincode::deserialize(&buf[4..total])?;
    Ok(Some((message, total)))
}

/// Drains one ack — a fixed-size bincode record behind its own length
/// prefix — from the front of the read buffer.  A corrupt prefix larger
/// than [`MAX_LINK_FRAME`] fails immediately instead of buffering until
/// the ack timeout.
fn take_ack(buf: &mut Vec<u8>) -> Result<Option<Ack>, LinkError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if len > MAX_LINK_FRAME {
        return Err(LinkError::Oversized(len));
    }
    let total = 4 + len as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let ack: Ack = bincode::deserialize(&buf[4..total])?;
    buf.drain(..total);
    Ok(Some(ack))
}

/// An established connection to the card chain.
#[async_trait]
pub trait CardLink: Send {
    /// Writes one message; a message is never partially interleaved with
    /// another.
    async fn send(&mut self, message: &CardMessage) -> Result<(), LinkError>;

    /// Waits for the next ack, failing with [`LinkError::AckTimeout`] after
    /// `timeout`.
    async fn recv_ack(&mut self, timeout: Duration) -> Result<Ack, LinkError>;
}

/// Connects (and reconnects) card links.
#[async_trait]
pub trait CardLinkFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn CardLink>, LinkError>;
}

// ── Serial implementation ─────────────────────────────────────────────────────

/// A card link over a serial device.
pub struct SerialCardLink {
    port: tokio_serial::SerialStream,
    read_buf: Vec<u8>,
}

#[async_trait]
impl CardLink for SerialCardLink {
    async fn send(&mut self, message: &CardMessage) -> Result<(), LinkError> {
        let bytes = encode(message)?;
        self.port.write_all(&bytes).await?;
        Ok(())
    }

    async fn recv_ack(&mut self, timeout: Duration) -> Result<Ack, LinkError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(ack) = take_ack(&mut self.read_buf)? {
                return Ok(ack);
            }
            let mut chunk = [0u8; 256];
            let read = tokio::time::timeout_at(deadline, self.port.read(&mut chunk))
                .await
                .map_err(|_| LinkError::AckTimeout)??;
            if read == 0 {
                return Err(LinkError::Closed);
            }
            self.read_buf.extend_from_slice(&chunk[..read]);
        }
    }
}

/// Factory opening the configured serial device.
pub struct SerialLinkFactory {
    pub device: String,
    pub baud: u32,
}

#[async_trait]
impl CardLinkFactory for SerialLinkFactory {
    async fn connect(&self) -> Result<Box<dyn CardLink>, LinkError> {
        let port = tokio_serial::new(&self.device, self.baud).open_native_async()?;
        Ok(Box::new(SerialCardLink {
            port,
            read_buf: Vec::new(),
        }))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
