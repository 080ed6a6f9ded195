//! The native call surface.
//!
//! Every bridged entry point has the same shape: a node context, the
//! operation's arguments, the callback and an opaque user-data pointer. The
//! [`NativeApi`] trait abstracts over that shape so the node layer can run
//! against the real library or an in-process fake.

use std::ffi::{CStr, CString, c_void};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use storagelink_bridge::{CompletionRouter, ReturnCode, TicketId};

/// Which product the native library is. Only symbol naming differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Storage,
    Codex,
}

impl NodeKind {
    /// Symbol prefix of the library's entry points.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Codex => "codex",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Opaque native node context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeContext(NonNull<c_void>);

// The context is only ever passed back to the library, which serialises
// access on its own worker thread.
unsafe impl Send for NodeContext {}
unsafe impl Sync for NodeContext {}

impl NodeContext {
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// One bridged operation with its borrowed arguments.
///
/// Buffers are owned by the caller for the duration of a single call.
#[derive(Debug, Clone, Copy)]
pub enum NativeCall<'a> {
    Start,
    Stop,
    Close,
    Version,
    Revision,
    Repo,
    Spr,
    PeerId,
    UploadInit {
        filepath: &'a CStr,
        chunk_size: usize,
    },
    UploadChunk {
        session_id: &'a CStr,
        chunk: &'a [u8],
    },
    UploadFinalize {
        session_id: &'a CStr,
    },
    UploadCancel {
        session_id: &'a CStr,
    },
    UploadFile {
        session_id: &'a CStr,
    },
    DownloadInit {
        cid: &'a CStr,
        chunk_size: usize,
        local: bool,
    },
    DownloadChunk {
        cid: &'a CStr,
    },
    DownloadStream {
        cid: &'a CStr,
        chunk_size: usize,
        local: bool,
        filepath: Option<&'a CStr>,
    },
    DownloadCancel {
        cid: &'a CStr,
    },
    DownloadManifest {
        cid: &'a CStr,
    },
    List,
    Fetch {
        cid: &'a CStr,
    },
    Space,
    Delete {
        cid: &'a CStr,
    },
    Exists {
        cid: &'a CStr,
    },
    Debug,
    LogLevel {
        level: &'a CStr,
    },
    PeerDebug {
        peer_id: &'a CStr,
    },
    Connect {
        peer_id: &'a CStr,
        addresses: &'a [CString],
    },
}

impl NativeCall<'_> {
    /// Entry point name without the product prefix.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Close => "close",
            Self::Version => "version",
            Self::Revision => "revision",
            Self::Repo => "repo",
            Self::Spr => "spr",
            Self::PeerId => "peer_id",
            Self::UploadInit { .. } => "upload_init",
            Self::UploadChunk { .. } => "upload_chunk",
            Self::UploadFinalize { .. } => "upload_finalize",
            Self::UploadCancel { .. } => "upload_cancel",
            Self::UploadFile { .. } => "upload_file",
            Self::DownloadInit { .. } => "download_init",
            Self::DownloadChunk { .. } => "download_chunk",
            Self::DownloadStream { .. } => "download_stream",
            Self::DownloadCancel { .. } => "download_cancel",
            Self::DownloadManifest { .. } => "download_manifest",
            Self::List => "list",
            Self::Fetch { .. } => "fetch",
            Self::Space => "space",
            Self::Delete { .. } => "delete",
            Self::Exists { .. } => "exists",
            Self::Debug => "debug",
            Self::LogLevel { .. } => "log_level",
            Self::PeerDebug { .. } => "peer_debug",
            Self::Connect { .. } => "connect",
        }
    }
}

/// Callback-driven native node library.
///
/// Implementations deliver every callback for a call to [`router`](Self::router)
/// using the ticket id they were handed.
pub trait NativeApi: Send + Sync {
    fn kind(&self) -> NodeKind;

    /// Router that receives this library's callbacks.
    fn router(&self) -> &Arc<CompletionRouter>;

    /// Creates a node context. Completion is reported through `ticket`
    /// whether or not a context is returned.
    fn create(&self, config_json: &CStr, ticket: TicketId) -> Option<NodeContext>;

    /// Invokes one bridged entry point.
    fn invoke(&self, ctx: NodeContext, call: &NativeCall<'_>, ticket: TicketId) -> ReturnCode;

    /// Releases the context. Synchronous: no callback is awaited.
    fn destroy(&self, ctx: NodeContext) -> ReturnCode;

    /// Full entry point name, used in rejection errors.
    fn operation(&self, name: &str) -> String {
        format!("{}_{}", self.kind().prefix(), name)
    }
}
