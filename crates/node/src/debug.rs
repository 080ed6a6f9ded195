//! Diagnostics: node identity, routing table and runtime log level.

use std::ffi::CString;

use tracing::info;

use crate::error::Result;
use crate::native::NativeCall;
use crate::node::{StorageNode, decode};
use crate::types::{DebugInfo, PeerRecord};

impl StorageNode {
    pub async fn debug(&self) -> Result<DebugInfo> {
        let payload = self.call(NativeCall::Debug, None).await?;
        decode("debug info", &payload)
    }

    /// Changes the native runtime log configuration.
    ///
    /// Accepts a plain level such as `INFO`, or topic directives like
    /// `INFO,libstorage:TRACE`.
    pub async fn update_log_level(&self, level: &str) -> Result<()> {
        let c_level = CString::new(level)?;
        self.call(NativeCall::LogLevel { level: &c_level }, None)
            .await?;
        info!(level, "native log level updated");
        Ok(())
    }

    /// Record of a known peer. Only served by builds with peer debugging
    /// enabled.
    pub async fn peer_debug(&self, peer_id: &str) -> Result<PeerRecord> {
        let c_peer_id = CString::new(peer_id)?;
        let payload = self
            .call(NativeCall::PeerDebug { peer_id: &c_peer_id }, None)
            .await?;
        decode("peer record", &payload)
    }
}
