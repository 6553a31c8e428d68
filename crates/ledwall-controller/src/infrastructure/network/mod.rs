//! SDK command server: framed TCP transport for the XML protocol.
//!
//! Every frame on the socket is a 4-byte little-endian payload length
//! followed by a one-byte frame type and the payload.  XML commands and
//! responses travel as [`NetFrame::SdkXml`]; media uploads use the
//! start/chunk/end frames so a multi-megabyte image never has to fit in
//! one XML document.  Heartbeats are echoed and carry nothing.

pub mod session;

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::application::dispatch::Dispatcher;
use crate::infrastructure::storage::programs::ProgramLibrary;
use session::Session;

/// Upper bound on a single frame; media arrives chunked far below this.
pub const MAX_NET_FRAME: u32 = 16 * 1024 * 1024;

const FRAME_SDK_XML: u8 = 0;
const FRAME_FILE_START: u8 = 1;
const FRAME_FILE_CHUNK: u8 = 2;
const FRAME_FILE_END: u8 = 3;
const FRAME_HEARTBEAT: u8 = 4;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("xml frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("oversized frame ({0} bytes)")]
    Oversized(u32),
    #[error("unknown frame type {0}")]
    BadFrameType(u8),
}

/// One frame on the SDK socket.
#[derive(Debug, Clone, PartialEq)]
pub enum NetFrame {
    /// A piece of an XML document; a command may span several frames.
    SdkXml(String),
    /// Opens a media upload for this connection.
    FileStart { name: String, size: u64 },
    /// One chunk of the open upload.
    FileChunk(Vec<u8>),
    /// Closes the upload; the digest is logged, the size is verified.
    FileEnd { digest: String },
    /// Keep-alive, echoed back verbatim.
    Heartbeat,
}

/// Encodes one frame: length prefix, type byte, payload.
pub fn encode_frame(frame: &NetFrame) -> Result<Vec<u8>, NetError> {
    let (kind, payload) = match frame {
        NetFrame::SdkXml(xml) => (FRAME_SDK_XML, xml.as_bytes().to_vec()),
        NetFrame::FileStart { name, size } => {
            (FRAME_FILE_START, bincode::serialize(&(name, size))?)
        }
        NetFrame::FileChunk(data) => (FRAME_FILE_CHUNK, data.clone()),
        NetFrame::FileEnd { digest } => (FRAME_FILE_END, bincode::serialize(digest)?),
        NetFrame::Heartbeat => (FRAME_HEARTBEAT, Vec::new()),
    };
    let len = (payload.len() + 1) as u32;
    if len > MAX_NET_FRAME {
        return Err(NetError::Oversized(len));
    }
    let mut out = Vec::with_capacity(4 + len as usize);
    out.extend_from_slice(&len.to_le_bytes());
    out.push(kind);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decodes and drains one frame from the front of `buf`, or returns
/// `Ok(None)` if a complete frame has not arrived yet.
pub fn decode_frame(buf: &mut Vec<u8>) -> Result<Option<NetFrame>, NetError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if len > MAX_NET_FRAME {
        return Err(NetError::Oversized(len));
    }
    if len < 1 {
        return Err(NetError::BadFrameType(0));
    }
    let total = 4 + len as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let kind = buf[4];
    let payload = buf[5..total].to_vec();
    buf.drain(..total);

    let frame = match kind {
        FRAME_SDK_XML => NetFrame::SdkXml(String::from_utf8(payload)?),
        FRAME_FILE_START => {
            let (name, size): (String, u64) = bincode::deserialize(&payload)?;
            NetFrame::FileStart { name, size }
        }
        FRAME_FILE_CHUNK => NetFrame::FileChunk(payload),
        FRAME_FILE_END => NetFrame::FileEnd {
            digest: bincode::deserialize(&payload)?,
        },
        FRAME_HEARTBEAT => NetFrame::Heartbeat,
        other => return Err(NetError::BadFrameType(other)),
    };
    Ok(Some(frame))
}

/// Accept loop; one task per SDK client.
pub struct CommandServer {
    bind_address: String,
    port: u16,
    dispatcher: Arc<Dispatcher>,
    library: Arc<ProgramLibrary>,
}

impl CommandServer {
    pub fn new(
        bind_address: &str,
        port: u16,
        dispatcher: Arc<Dispatcher>,
        library: Arc<ProgramLibrary>,
    ) -> Self {
        Self {
            bind_address: bind_address.to_string(),
            port,
            dispatcher,
            library,
        }
    }

    /// Binds and serves until the listener fails.
    pub async fn run(self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind((self.bind_address.as_str(), self.port)).await?;
        info!(bind = %self.bind_address, port = self.port, "sdk server listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            info!(%peer, "sdk client connected");
            let session = Session::new(Arc::clone(&self.dispatcher), Arc::clone(&self.library));
            tokio::spawn(async move {
                match session.run(stream).await {
                    Ok(()) => info!(%peer, "sdk client disconnected"),
                    Err(e) => warn!(%peer, error = %e, "sdk session failed"),
                }
            });
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
