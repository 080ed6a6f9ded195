//! Download sessions, keyed by content identifier.
//!
//! A node holds at most one live session per cid. `download_stream` runs the
//! whole sequence and always releases the session afterwards.

use std::ffi::CString;
use std::io;
use std::path::PathBuf;

use storagelink_bridge::{CancelSignal, Delivery, Race, Ticket, race_with_cancel};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{NodeError, Result, SessionKind};
use crate::native::NativeCall;
use crate::node::{StorageNode, decode};
use crate::session::{SessionState, TransferProgress};
use crate::types::Manifest;
use crate::upload::chunk_size_or_default;

#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadInitOptions {
    /// Bytes per delivered chunk; `0` means the default block size.
    pub chunk_size: usize,
    /// Only serve from the local store, never fetch from the network.
    pub local: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadStreamOptions {
    /// Destination file written by the native side.
    pub filepath: Option<PathBuf>,
    pub chunk_size: usize,
    pub local: bool,
    /// Known total size, used for the progress percentage.
    pub dataset_size: Option<u64>,
    /// Fetch the manifest first to learn the total size.
    pub dataset_size_auto: bool,
}

impl DownloadStreamOptions {
    fn init_options(&self) -> DownloadInitOptions {
        DownloadInitOptions {
            chunk_size: self.chunk_size,
            local: self.local,
        }
    }
}

// ---------------------------------------------------------------------------
// DownloadSession
// ---------------------------------------------------------------------------

/// A manually driven download: `init`, then `next_chunk` until it yields
/// `None`, then `cancel` to release the session.
pub struct DownloadSession<'n> {
    node: &'n StorageNode,
    cid: String,
    options: DownloadInitOptions,
    downloaded: u64,
    state: SessionState,
}

impl<'n> DownloadSession<'n> {
    pub fn new(node: &'n StorageNode, cid: impl Into<String>, options: DownloadInitOptions) -> Self {
        Self {
            node,
            cid: cid.into(),
            options,
            downloaded: 0,
            state: SessionState::Created,
        }
    }

    pub fn cid(&self) -> &str {
        &self.cid
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// Opens the native session. Fetches the manifest from the network
    /// unless the options restrict it to the local store.
    pub async fn init(&mut self, cancel: Option<&CancelSignal>) -> Result<()> {
        if self.state != SessionState::Created {
            return Err(self.invalid_state());
        }
        match self.node.download_init(&self.cid, &self.options, cancel).await {
            Ok(()) => {
                self.state = SessionState::Active;
                Ok(())
            }
            Err(e) => {
                self.state = if e.is_cancelled() {
                    SessionState::Cancelled
                } else {
                    SessionState::Failed
                };
                Err(e)
            }
        }
    }

    /// Next chunk, or `None` once all data was delivered.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.state != SessionState::Active {
            return Err(self.invalid_state());
        }
        match self.node.download_chunk(&self.cid).await {
            Ok(chunk) => {
                if let Some(chunk) = &chunk {
                    self.downloaded += chunk.len() as u64;
                }
                Ok(chunk)
            }
            Err(e) => {
                warn!(cid = %self.cid, error = %e, "download chunk failed, cancelling session");
                match self.cancel().await {
                    Ok(()) => Err(e),
                    Err(cancel_error) => Err(NodeError::CleanupFailed {
                        session: SessionKind::Download,
                        error: Box::new(e),
                        cancel_error: Box::new(cancel_error),
                    }),
                }
            }
        }
    }

    /// Releases the session. Cancelling twice is a no-op.
    pub async fn cancel(&mut self) -> Result<()> {
        match self.state {
            SessionState::Cancelled => Ok(()),
            SessionState::Created => {
                self.state = SessionState::Cancelled;
                Ok(())
            }
            _ => match self.node.download_cancel(&self.cid).await {
                Ok(()) => {
                    self.state = SessionState::Cancelled;
                    Ok(())
                }
                Err(e) => {
                    self.state = SessionState::Failed;
                    Err(e)
                }
            },
        }
    }

    fn invalid_state(&self) -> NodeError {
        NodeError::InvalidState {
            session: SessionKind::Download,
            id: self.cid.clone(),
            state: self.state,
        }
    }
}

impl Drop for DownloadSession<'_> {
    fn drop(&mut self) {
        if self.state == SessionState::Active {
            warn!(cid = %self.cid, "download session dropped while active");
            self.node.release_download(&self.cid);
        }
    }
}

// ---------------------------------------------------------------------------
// Node operations
// ---------------------------------------------------------------------------

impl StorageNode {
    /// Opens a download session for `cid`.
    ///
    /// When `cancel` ends the wait, the native session is cancelled as well.
    pub async fn download_init(
        &self,
        cid: &str,
        options: &DownloadInitOptions,
        cancel: Option<&CancelSignal>,
    ) -> Result<()> {
        let c_cid = CString::new(cid)?;
        self.claim_download(cid)?;

        let call = NativeCall::DownloadInit {
            cid: &c_cid,
            chunk_size: chunk_size_or_default(options.chunk_size),
            local: options.local,
        };
        match self.call(call, cancel).await {
            Ok(_) => {
                debug!(cid, local = options.local, "download session opened");
                Ok(())
            }
            Err(e) => {
                let result = match e.cancel_reason() {
                    Some(reason) => match self.cancel_native_download(cid).await {
                        Ok(()) => Err(e),
                        Err(cancel_error) => Err(NodeError::CancelFailed {
                            session: SessionKind::Download,
                            reason,
                            cancel_error: Box::new(cancel_error),
                        }),
                    },
                    None => Err(e),
                };
                self.release_download(cid);
                result
            }
        }
    }

    /// Fetches the next chunk of an open session.
    pub async fn download_chunk(&self, cid: &str) -> Result<Option<Vec<u8>>> {
        let c_cid = CString::new(cid)?;
        let mut ticket = self.start_call(NativeCall::DownloadChunk { cid: &c_cid })?;
        let mut data: Option<Vec<u8>> = None;
        loop {
            match ticket.next().await? {
                Delivery::Progress(p) => {
                    if let Some(chunk) = p.chunk {
                        data.get_or_insert_with(Vec::new).extend_from_slice(&chunk);
                    }
                }
                Delivery::Done(Ok(_)) => return Ok(data),
                Delivery::Done(Err(message)) => return Err(NodeError::Native(message)),
            }
        }
    }

    /// Cancels the session for `cid` and releases it on this node.
    pub async fn download_cancel(&self, cid: &str) -> Result<()> {
        let result = self.cancel_native_download(cid).await;
        self.release_download(cid);
        result
    }

    async fn cancel_native_download(&self, cid: &str) -> Result<()> {
        let c_cid = CString::new(cid)?;
        self.call(NativeCall::DownloadCancel { cid: &c_cid }, None)
            .await?;
        Ok(())
    }

    /// Retrieves the manifest of `cid`, from the network if needed.
    pub async fn download_manifest(
        &self,
        cid: &str,
        cancel: Option<&CancelSignal>,
    ) -> Result<Manifest> {
        let c_cid = CString::new(cid)?;
        let payload = self
            .call(NativeCall::DownloadManifest { cid: &c_cid }, cancel)
            .await?;
        let mut manifest: Manifest = decode("manifest", &payload)?;
        manifest.cid = cid.to_string();
        Ok(manifest)
    }

    /// Downloads `cid` in one native call.
    ///
    /// Chunks go to `writer` when one is given, and the native side writes
    /// `options.filepath` when that is set. Both may be used at once. A
    /// failing writer is not written to again and its error is returned
    /// after the transfer ends.
    pub async fn download_stream(
        &self,
        cid: &str,
        options: &DownloadStreamOptions,
        writer: Option<&mut (dyn AsyncWrite + Unpin + Send)>,
        cancel: &CancelSignal,
        mut on_progress: impl FnMut(TransferProgress),
    ) -> Result<()> {
        let mut expected = options.dataset_size;
        if options.dataset_size_auto {
            let manifest = self.download_manifest(cid, Some(cancel)).await?;
            expected = Some(manifest.dataset_size);
        }

        self.download_init(cid, &options.init_options(), Some(cancel))
            .await?;
        let result = self
            .stream_session(cid, options, writer, expected, cancel, &mut on_progress)
            .await;

        match (result, self.download_cancel(cid).await) {
            (Ok(()), release) => {
                if let Err(e) = release {
                    debug!(cid, error = %e, "releasing finished download session failed");
                }
                info!(cid, "download complete");
                Ok(())
            }
            (Err(e), Ok(())) => Err(e),
            // The native cancel already failed once; one report is enough.
            (Err(e @ NodeError::CancelFailed { .. }), Err(_)) => Err(e),
            (Err(e), Err(cancel_error)) => Err(NodeError::CleanupFailed {
                session: SessionKind::Download,
                error: Box::new(e),
                cancel_error: Box::new(cancel_error),
            }),
        }
    }

    async fn stream_session(
        &self,
        cid: &str,
        options: &DownloadStreamOptions,
        writer: Option<&mut (dyn AsyncWrite + Unpin + Send)>,
        expected: Option<u64>,
        cancel: &CancelSignal,
        on_progress: &mut impl FnMut(TransferProgress),
    ) -> Result<()> {
        let c_cid = CString::new(cid)?;
        let filepath = options
            .filepath
            .as_ref()
            .map(|p| CString::new(p.to_string_lossy().into_owned()))
            .transpose()?;

        let mut ticket = self.start_call(NativeCall::DownloadStream {
            cid: &c_cid,
            chunk_size: chunk_size_or_default(options.chunk_size),
            local: options.local,
            filepath: filepath.as_deref(),
        })?;

        let race = race_with_cancel(
            drive_download(&mut ticket, writer, expected, on_progress),
            cancel,
            || self.cancel_native_download(cid),
        )
        .await;
        drop(ticket);

        match race {
            Race::Completed(result) => result,
            Race::CompletedAfterSignal {
                reason,
                result: Ok(()),
            } => {
                warn!(cid, %reason, "download completed after cancellation was requested, keeping result");
                Ok(())
            }
            Race::CompletedAfterSignal {
                reason,
                result: Err(e),
            } => {
                debug!(cid, error = %e, "download stopped after cancellation");
                Err(NodeError::Cancelled(reason))
            }
            Race::Cancelled {
                reason,
                cancel_result: Ok(()),
            } => Err(NodeError::Cancelled(reason)),
            Race::Cancelled {
                reason,
                cancel_result: Err(cancel_error),
            } => Err(NodeError::CancelFailed {
                session: SessionKind::Download,
                reason,
                cancel_error: Box::new(cancel_error),
            }),
        }
    }
}

async fn drive_download(
    ticket: &mut Ticket,
    mut writer: Option<&mut (dyn AsyncWrite + Unpin + Send)>,
    expected: Option<u64>,
    on_progress: &mut impl FnMut(TransferProgress),
) -> Result<()> {
    let mut total = 0u64;
    let mut sink_error: Option<io::Error> = None;

    loop {
        match ticket.next().await? {
            Delivery::Progress(p) if p.len > 0 => {
                if let (Some(chunk), Some(w)) = (p.chunk.as_deref(), writer.as_deref_mut()) {
                    if sink_error.is_none() {
                        if let Err(e) = w.write_all(chunk).await {
                            warn!(error = %e, "download sink failed, dropping further chunks");
                            sink_error = Some(e);
                        }
                    }
                }
                total += p.len as u64;
                on_progress(TransferProgress::new(p.len, total, expected));
            }
            Delivery::Progress(_) => {}
            Delivery::Done(Ok(_)) => break,
            Delivery::Done(Err(message)) => return Err(NodeError::Native(message)),
        }
    }

    if let Some(e) = sink_error {
        return Err(e.into());
    }
    if let Some(w) = writer {
        w.flush().await?;
    }
    Ok(())
}
