//! Node handle and transfer sessions for the Logos Storage and Codex native
//! libraries.
//!
//! [`StorageNode`] owns one native node context. Every operation is a single
//! bridged call through [`storagelink_bridge`], except the upload and download
//! sessions, which sequence several calls and clean up after themselves.
//!
//! The native side is reached through the [`NativeApi`] trait. Real backends
//! live in [`ffi`] behind the `libstorage` and `libcodex` features.

pub mod config;
pub mod debug;
pub mod download;
pub mod error;
pub mod ffi;
pub mod native;
pub mod node;
pub mod p2p;
pub mod session;
pub mod storage;
pub mod types;
pub mod upload;

#[cfg(test)]
mod mock;

pub use config::{LogFormat, LogLevel, NodeConfig, RepoKind};
pub use download::{DownloadInitOptions, DownloadSession, DownloadStreamOptions};
pub use error::{NodeError, Result, SessionKind};
pub use native::{NativeApi, NativeCall, NodeContext, NodeKind};
pub use node::StorageNode;
pub use session::{SessionState, TransferProgress};
pub use storagelink_bridge::{CancelReason, CancelSignal};
pub use types::{DebugInfo, Manifest, PeerRecord, RoutingNode, RoutingTable, Space};
pub use upload::{DEFAULT_CHUNK_SIZE, UploadOptions, UploadSession};
