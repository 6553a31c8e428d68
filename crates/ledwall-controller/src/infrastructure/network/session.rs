//! One SDK client connection.
//!
//! A session owns a per-connection XML accumulator (a command document may
//! arrive split across frames) and at most one open media upload, staged
//! under the session id and committed atomically on [`NetFrame::FileEnd`].
//! A dropped connection aborts any half-finished upload.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use ledwall_core::protocol::envelope::{ResultCode, SdkRequest, SdkResponse};

use crate::application::dispatch::Dispatcher;
use crate::infrastructure::network::{decode_frame, encode_frame, NetError, NetFrame};
use crate::infrastructure::storage::programs::ProgramLibrary;

/// Method name used on responses to file-transfer frames, which carry no
/// XML request of their own.
const TRANSFER_METHOD: &str = "FileTransfer";

struct PendingUpload {
    name: String,
    size: u64,
    received: u64,
}

pub struct Session {
    id: Uuid,
    dispatcher: Arc<Dispatcher>,
    library: Arc<ProgramLibrary>,
    xml_buf: String,
    upload: Option<PendingUpload>,
}

impl Session {
    pub fn new(dispatcher: Arc<Dispatcher>, library: Arc<ProgramLibrary>) -> Self {
        Self {
            id: Uuid::new_v4(),
            dispatcher,
            library,
            xml_buf: String::new(),
            upload: None,
        }
    }

    /// Serves one connection until EOF or a protocol error.
    pub async fn run<S>(mut self, mut stream: S) -> Result<(), NetError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut buf: Vec<u8> = Vec::with_capacity(8 * 1024);
        loop {
            while let Some(frame) = decode_frame(&mut buf)? {
                for response in self.on_frame(frame).await {
                    stream.write_all(&encode_frame(&response)?).await?;
                }
            }
            if stream.read_buf(&mut buf).await? == 0 {
                if let Some(upload) = self.upload.take() {
                    warn!(session = %self.id, name = %upload.name, "connection dropped mid-upload");
                    self.library.stage_abort(self.id);
                }
                return Ok(());
            }
        }
    }

    async fn on_frame(&mut self, frame: NetFrame) -> Vec<NetFrame> {
        match frame {
            NetFrame::Heartbeat => vec![NetFrame::Heartbeat],
            NetFrame::SdkXml(piece) => self.on_xml(piece).await,
            NetFrame::FileStart { name, size } => vec![self.on_file_start(name, size)],
            NetFrame::FileChunk(data) => self.on_file_chunk(&data).into_iter().collect(),
            NetFrame::FileEnd { digest } => vec![self.on_file_end(&digest)],
        }
    }

    // ── XML commands ──────────────────────────────────────────────────────────

    async fn on_xml(&mut self, piece: String) -> Vec<NetFrame> {
        self.xml_buf.push_str(&piece);
        let mut responses = Vec::new();
        while let Some(end) = self.xml_buf.find("</sdk>") {
            let document: String = self.xml_buf.drain(..end + "</sdk>".len()).collect();
            let response = match SdkRequest::parse(&document) {
                Ok(request) => self.dispatcher.handle(request).await,
                Err(e) => {
                    debug!(session = %self.id, error = %e, "bad sdk envelope");
                    SdkResponse::new("", "", ResultCode::ParseError)
                        .with_error_detail(&e.to_string())
                }
            };
            responses.push(NetFrame::SdkXml(response.to_xml()));
        }
        responses
    }

    // ── Media upload ──────────────────────────────────────────────────────────

    fn transfer_response(&self, result: ResultCode, detail: Option<&str>) -> NetFrame {
        let guid = self.id.to_string();
        let response = SdkResponse::new(&guid, TRANSFER_METHOD, result);
        let response = match detail {
            Some(detail) => response.with_error_detail(detail),
            None => response,
        };
        NetFrame::SdkXml(response.to_xml())
    }

    fn on_file_start(&mut self, name: String, size: u64) -> NetFrame {
        if self.upload.is_some() {
            self.library.stage_abort(self.id);
        }
        match self.library.stage_begin(self.id, &name) {
            Ok(()) => {
                info!(session = %self.id, name, size, "media upload started");
                self.upload = Some(PendingUpload {
                    name,
                    size,
                    received: 0,
                });
                self.transfer_response(ResultCode::Success, None)
            }
            Err(e) => {
                warn!(session = %self.id, name, error = %e, "media upload refused");
                self.transfer_response(ResultCode::ValidationError, Some(&e.to_string()))
            }
        }
    }

    fn on_file_chunk(&mut self, data: &[u8]) -> Option<NetFrame> {
        let Some(upload) = self.upload.as_mut() else {
            return Some(
                self.transfer_response(ResultCode::ValidationError, Some("no upload in progress")),
            );
        };
        match self.library.stage_append(self.id, data) {
            Ok(()) => {
                upload.received += data.len() as u64;
                // Chunks are not individually acknowledged.
                None
            }
            Err(e) => {
                warn!(session = %self.id, error = %e, "media chunk write failed");
                self.upload = None;
                self.library.stage_abort(self.id);
                Some(self.transfer_response(ResultCode::HardwareError, Some(&e.to_string())))
            }
        }
    }

    fn on_file_end(&mut self, digest: &str) -> NetFrame {
        let Some(upload) = self.upload.take() else {
            return self
                .transfer_response(ResultCode::ValidationError, Some("no upload in progress"));
        };
        // The digest is recorded for operator forensics; integrity is
        // enforced by the byte-count check in stage_commit.
        info!(session = %self.id, name = %upload.name, digest, "media upload finishing");
        match self.library.stage_commit(self.id, &upload.name, upload.size) {
            Ok(()) => self.transfer_response(ResultCode::Success, None),
            Err(e) => {
                warn!(session = %self.id, name = %upload.name, error = %e, "media commit failed");
                self.transfer_response(ResultCode::ValidationError, Some(&e.to_string()))
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
