//! Peer connections.

use std::ffi::CString;

use tracing::debug;

use crate::error::Result;
use crate::native::NativeCall;
use crate::node::StorageNode;

impl StorageNode {
    /// Dials `peer_id`.
    ///
    /// With no `addresses` the peer is located through discovery first.
    pub async fn connect<S: AsRef<str>>(&self, peer_id: &str, addresses: &[S]) -> Result<()> {
        let c_peer_id = CString::new(peer_id)?;
        let c_addresses = addresses
            .iter()
            .map(|a| CString::new(a.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.call(
            NativeCall::Connect {
                peer_id: &c_peer_id,
                addresses: &c_addresses,
            },
            None,
        )
        .await?;
        debug!(peer_id, addresses = c_addresses.len(), "connected to peer");
        Ok(())
    }
}
