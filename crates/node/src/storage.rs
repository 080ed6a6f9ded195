//! Local store management.

use std::ffi::CString;

use storagelink_bridge::CancelSignal;
use tracing::debug;

use crate::error::Result;
use crate::native::NativeCall;
use crate::node::{StorageNode, decode};
use crate::types::{ListedManifest, Manifest, Space};

impl StorageNode {
    /// Manifests of all content in the local store.
    pub async fn manifests(&self) -> Result<Vec<Manifest>> {
        let payload = self.call(NativeCall::List, None).await?;
        let items: Vec<ListedManifest> = decode("manifest list", &payload)?;
        Ok(items
            .into_iter()
            .map(|item| Manifest {
                cid: item.cid,
                ..item.manifest
            })
            .collect())
    }

    /// Fetches `cid` from the network into the local store in the
    /// background and returns its manifest.
    pub async fn fetch(&self, cid: &str, cancel: Option<&CancelSignal>) -> Result<Manifest> {
        let c_cid = CString::new(cid)?;
        let payload = self.call(NativeCall::Fetch { cid: &c_cid }, cancel).await?;
        let mut manifest: Manifest = decode("manifest", &payload)?;
        manifest.cid = cid.to_string();
        Ok(manifest)
    }

    pub async fn space(&self) -> Result<Space> {
        let payload = self.call(NativeCall::Space, None).await?;
        decode("space", &payload)
    }

    /// Removes `cid` from the local store.
    pub async fn delete(&self, cid: &str) -> Result<()> {
        let c_cid = CString::new(cid)?;
        self.call(NativeCall::Delete { cid: &c_cid }, None).await?;
        debug!(cid, "content deleted");
        Ok(())
    }

    pub async fn exists(&self, cid: &str) -> Result<bool> {
        let c_cid = CString::new(cid)?;
        let payload = self.call(NativeCall::Exists { cid: &c_cid }, None).await?;
        Ok(payload == "true")
    }
}
