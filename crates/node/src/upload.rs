//! Upload sessions: init, chunk*, then finalize or cancel.
//!
//! Every failure after `init` cancels the native session before returning.
//! When that cancel fails too, the error names both failures.

use std::ffi::CString;
use std::path::PathBuf;

use storagelink_bridge::{CancelReason, CancelSignal, Delivery, Race, Ticket, race_with_cancel};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::error::{NodeError, Result, SessionKind};
use crate::native::NativeCall;
use crate::node::StorageNode;
use crate::session::{SessionState, TransferProgress, percent};

/// Block size used when a chunk size of zero is requested.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

pub(crate) fn chunk_size_or_default(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Name hint for the stored content. [`StorageNode::upload_file`] also
    /// reads the file at this path.
    pub filepath: PathBuf,
    /// Bytes per native block; `0` means [`DEFAULT_CHUNK_SIZE`].
    pub chunk_size: usize,
    /// Expected total, used only for the progress percentage.
    pub total_size: Option<u64>,
}

impl UploadOptions {
    pub fn new(filepath: impl Into<PathBuf>) -> Self {
        Self {
            filepath: filepath.into(),
            ..Self::default()
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn total_size(mut self, total_size: u64) -> Self {
        self.total_size = Some(total_size);
        self
    }
}

// ---------------------------------------------------------------------------
// UploadSession
// ---------------------------------------------------------------------------

/// One native upload session.
pub struct UploadSession<'n> {
    node: &'n StorageNode,
    id: String,
    chunk_size: usize,
    total_size: Option<u64>,
    uploaded: u64,
    state: SessionState,
}

impl<'n> UploadSession<'n> {
    /// Opens a session. A failed `init` leaves nothing to clean up.
    pub async fn init(node: &'n StorageNode, options: &UploadOptions) -> Result<Self> {
        let id = node.upload_init(options).await?;
        debug!(session = %id, filepath = %options.filepath.display(), "upload session opened");
        Ok(Self {
            node,
            id,
            chunk_size: chunk_size_or_default(options.chunk_size),
            total_size: options.total_size,
            uploaded: 0,
            state: SessionState::Active,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Bytes pushed so far.
    pub fn uploaded(&self) -> u64 {
        self.uploaded
    }

    pub fn percent(&self) -> Option<f64> {
        percent(self.uploaded, self.total_size)
    }

    /// Sends one block. An empty block is a no-op.
    ///
    /// On failure the session is cancelled.
    pub async fn push(&mut self, chunk: &[u8]) -> Result<TransferProgress> {
        self.ensure_active()?;
        if chunk.is_empty() {
            return Ok(TransferProgress::new(0, self.uploaded, self.total_size));
        }
        if let Err(e) = self.node.upload_chunk(&self.id, chunk).await {
            return Err(self.abandon(e).await);
        }
        self.uploaded += chunk.len() as u64;
        Ok(TransferProgress::new(chunk.len(), self.uploaded, self.total_size))
    }

    /// Completes the upload and returns the content identifier.
    pub async fn finalize(&mut self) -> Result<String> {
        self.ensure_active()?;
        match self.node.upload_finalize(&self.id).await {
            Ok(cid) => {
                self.state = SessionState::Finalized;
                info!(session = %self.id, cid = %cid, bytes = self.uploaded, "upload finalized");
                Ok(cid)
            }
            Err(e) => Err(self.abandon(e).await),
        }
    }

    /// Cancels the native session. Cancelling twice is a no-op.
    pub async fn cancel(&mut self) -> Result<()> {
        match self.state {
            SessionState::Cancelled => return Ok(()),
            SessionState::Finalized => return Err(self.invalid_state()),
            _ => {}
        }
        match self.node.upload_cancel(&self.id).await {
            Ok(()) => {
                self.state = SessionState::Cancelled;
                debug!(session = %self.id, "upload session cancelled");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state == SessionState::Active {
            Ok(())
        } else {
            Err(self.invalid_state())
        }
    }

    fn invalid_state(&self) -> NodeError {
        NodeError::InvalidState {
            session: SessionKind::Upload,
            id: self.id.clone(),
            state: self.state,
        }
    }

    /// Cancels after `error`, returning the error to report.
    async fn abandon(&mut self, error: NodeError) -> NodeError {
        warn!(session = %self.id, error = %error, "upload failed, cancelling session");
        match self.cancel().await {
            Ok(()) => error,
            Err(cancel_error) => NodeError::CleanupFailed {
                session: SessionKind::Upload,
                error: Box::new(error),
                cancel_error: Box::new(cancel_error),
            },
        }
    }

    /// Cancels because the caller's signal fired.
    async fn interrupt(&mut self, reason: CancelReason) -> NodeError {
        debug!(session = %self.id, %reason, "upload interrupted");
        match self.cancel().await {
            Ok(()) => NodeError::Cancelled(reason),
            Err(cancel_error) => NodeError::CancelFailed {
                session: SessionKind::Upload,
                reason,
                cancel_error: Box::new(cancel_error),
            },
        }
    }
}

impl Drop for UploadSession<'_> {
    fn drop(&mut self) {
        if self.state == SessionState::Active {
            warn!(session = %self.id, "upload session dropped while active");
        }
    }
}

// ---------------------------------------------------------------------------
// Node operations
// ---------------------------------------------------------------------------

impl StorageNode {
    /// Opens a native upload session and returns its id.
    pub async fn upload_init(&self, options: &UploadOptions) -> Result<String> {
        let filepath = CString::new(options.filepath.to_string_lossy().into_owned())?;
        let call = NativeCall::UploadInit {
            filepath: &filepath,
            chunk_size: chunk_size_or_default(options.chunk_size),
        };
        self.call(call, None).await
    }

    pub async fn upload_chunk(&self, session_id: &str, chunk: &[u8]) -> Result<()> {
        let session_id = CString::new(session_id)?;
        let call = NativeCall::UploadChunk {
            session_id: &session_id,
            chunk,
        };
        self.call(call, None).await?;
        Ok(())
    }

    /// Finalizes a session and returns the content identifier.
    pub async fn upload_finalize(&self, session_id: &str) -> Result<String> {
        let session_id = CString::new(session_id)?;
        self.call(NativeCall::UploadFinalize { session_id: &session_id }, None)
            .await
    }

    pub async fn upload_cancel(&self, session_id: &str) -> Result<()> {
        let session_id = CString::new(session_id)?;
        self.call(NativeCall::UploadCancel { session_id: &session_id }, None)
            .await?;
        Ok(())
    }

    /// Uploads everything `reader` yields, one chunk-size read at a time.
    ///
    /// `cancel` is checked before each read. Progress carries a percentage
    /// only when `options.total_size` is set; [`Self::upload_path`] fills it
    /// in from the file size.
    pub async fn upload_reader<R>(
        &self,
        cancel: &CancelSignal,
        options: &UploadOptions,
        mut reader: R,
        mut on_progress: impl FnMut(TransferProgress),
    ) -> Result<String>
    where
        R: AsyncRead + Unpin,
    {
        let mut session = UploadSession::init(self, options).await?;
        let mut buf = vec![0u8; session.chunk_size()];

        loop {
            if let Some(reason) = cancel.reason() {
                return Err(session.interrupt(reason).await);
            }
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => return Err(session.abandon(e.into()).await),
            };
            let progress = session.push(&buf[..n]).await?;
            on_progress(progress);
        }

        session.finalize().await
    }

    /// Streams the file at `options.filepath` through a chunked session.
    ///
    /// Unlike [`Self::upload_file`] the bytes are read here and pushed one
    /// chunk at a time. The file size is the progress total unless
    /// `options.total_size` overrides it.
    pub async fn upload_path(
        &self,
        cancel: &CancelSignal,
        options: &UploadOptions,
        on_progress: impl FnMut(TransferProgress),
    ) -> Result<String> {
        let file = tokio::fs::File::open(&options.filepath).await?;
        let size = file.metadata().await?.len();
        let options = UploadOptions {
            total_size: options.total_size.or(Some(size)),
            ..options.clone()
        };
        self.upload_reader(cancel, &options, file, on_progress).await
    }

    /// Uploads an in-memory buffer. Its length is the progress total.
    pub async fn upload_bytes(
        &self,
        cancel: &CancelSignal,
        options: &UploadOptions,
        data: &[u8],
        on_progress: impl FnMut(TransferProgress),
    ) -> Result<String> {
        let options = UploadOptions {
            total_size: Some(data.len() as u64),
            ..options.clone()
        };
        self.upload_reader(cancel, &options, data, on_progress).await
    }

    /// Uploads the file at `options.filepath` in one native call.
    ///
    /// When `cancel` fires, the session is cancelled while the call is still
    /// running. If the upload wins that race its content identifier is
    /// returned, since the content is stored.
    pub async fn upload_file(
        &self,
        cancel: &CancelSignal,
        options: &UploadOptions,
        mut on_progress: impl FnMut(TransferProgress),
    ) -> Result<String> {
        let size = tokio::fs::metadata(&options.filepath).await?.len();
        let mut session = UploadSession::init(self, options).await?;

        let session_id = match CString::new(session.id()) {
            Ok(id) => id,
            Err(e) => return Err(session.abandon(e.into()).await),
        };
        let mut ticket = match self.start_call(NativeCall::UploadFile {
            session_id: &session_id,
        }) {
            Ok(ticket) => ticket,
            Err(e) => return Err(session.abandon(e).await),
        };

        let id = session.id().to_string();
        let race = race_with_cancel(
            drive_upload(&mut ticket, size, &mut on_progress),
            cancel,
            || self.upload_cancel(&id),
        )
        .await;
        drop(ticket);

        match race {
            Race::Completed(Ok(cid)) => {
                session.state = SessionState::Finalized;
                info!(session = %id, cid = %cid, bytes = size, "file uploaded");
                Ok(cid)
            }
            Race::Completed(Err(e)) => Err(session.abandon(e).await),
            Race::CompletedAfterSignal {
                reason,
                result: Ok(cid),
            } => {
                warn!(session = %id, cid = %cid, %reason, "upload completed after cancellation was requested, keeping result");
                session.state = SessionState::Finalized;
                Ok(cid)
            }
            Race::CompletedAfterSignal {
                reason,
                result: Err(e),
            } => {
                debug!(session = %id, error = %e, "upload stopped after cancellation");
                session.state = SessionState::Cancelled;
                Err(NodeError::Cancelled(reason))
            }
            Race::Cancelled {
                reason,
                cancel_result: Ok(()),
            } => {
                session.state = SessionState::Cancelled;
                Err(NodeError::Cancelled(reason))
            }
            Race::Cancelled {
                reason,
                cancel_result: Err(cancel_error),
            } => {
                session.state = SessionState::Failed;
                Err(NodeError::CancelFailed {
                    session: SessionKind::Upload,
                    reason,
                    cancel_error: Box::new(cancel_error),
                })
            }
        }
    }
}

/// Relays progress of a whole-file upload until its terminal delivery.
async fn drive_upload(
    ticket: &mut Ticket,
    size: u64,
    on_progress: &mut impl FnMut(TransferProgress),
) -> Result<String> {
    let mut total = 0u64;
    loop {
        match ticket.next().await? {
            Delivery::Progress(p) if p.len > 0 => {
                total += p.len as u64;
                on_progress(TransferProgress::new(p.len, total, Some(size)));
            }
            Delivery::Progress(_) => {}
            Delivery::Done(result) => return result.map_err(NodeError::Native),
        }
    }
}
