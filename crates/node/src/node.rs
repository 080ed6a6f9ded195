//! Node handle: lifecycle of one native node context.

use std::collections::HashSet;
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use storagelink_bridge::{Bridge, CancelSignal, Ticket};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::native::{NativeApi, NativeCall, NodeContext, NodeKind};

/// Handle to a native storage node.
///
/// The node is inert until [`start`](Self::start). The only teardown path is
/// [`destroy`](Self::destroy), which consumes the handle.
pub struct StorageNode {
    native: Arc<dyn NativeApi>,
    bridge: Bridge,
    ctx: NodeContext,
    running: AtomicBool,
    destroyed: bool,
    active_downloads: Mutex<HashSet<String>>,
}

impl StorageNode {
    /// Creates a node context from `config`.
    pub async fn create(native: Arc<dyn NativeApi>, config: &NodeConfig) -> Result<Self> {
        let json = CString::new(config.to_json()?)?;
        let bridge = Bridge::new(Arc::clone(native.router()));

        let ticket = bridge.router().issue();
        let ctx = native.create(&json, ticket.id());
        if let Err(e) = ticket.wait(None).await {
            if let Some(ctx) = ctx {
                let code = native.destroy(ctx);
                if !code.is_ok() {
                    warn!(kind = %native.kind(), code = code.raw(), "releasing context of failed node returned an error");
                }
            }
            return Err(e.into());
        }

        let ctx = ctx.ok_or_else(|| {
            NodeError::Native(format!("{} returned no context", native.operation("new")))
        })?;
        info!(kind = %native.kind(), data_dir = ?config.data_dir, "node created");

        Ok(Self {
            native,
            bridge,
            ctx,
            running: AtomicBool::new(false),
            destroyed: false,
            active_downloads: Mutex::new(HashSet::new()),
        })
    }

    pub fn kind(&self) -> NodeKind {
        self.native.kind()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn start(&self) -> Result<()> {
        self.call(NativeCall::Start, None).await?;
        self.running.store(true, Ordering::SeqCst);
        info!(kind = %self.kind(), "node started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.call(NativeCall::Stop, None).await?;
        self.running.store(false, Ordering::SeqCst);
        info!(kind = %self.kind(), "node stopped");
        Ok(())
    }

    /// Stops the node if it is running, closes it, then releases the native
    /// context.
    ///
    /// On failure the node stays usable and `destroy` can be retried. Once it
    /// succeeds every further call fails with [`NodeError::Destroyed`], and
    /// destroying again is a no-op.
    pub async fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        if self.is_running() {
            self.stop().await?;
        }
        self.call(NativeCall::Close, None).await?;

        let code = self.native.destroy(self.ctx);
        if !code.is_ok() {
            return Err(NodeError::Rejected {
                operation: self.native.operation("destroy"),
                code: code.raw(),
            });
        }
        self.destroyed = true;
        info!(kind = %self.kind(), "node destroyed");
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub async fn version(&self) -> Result<String> {
        self.call(NativeCall::Version, None).await
    }

    pub async fn revision(&self) -> Result<String> {
        self.call(NativeCall::Revision, None).await
    }

    /// Path of the node's data directory.
    pub async fn repo(&self) -> Result<String> {
        self.call(NativeCall::Repo, None).await
    }

    /// Signed peer record of this node.
    pub async fn spr(&self) -> Result<String> {
        self.call(NativeCall::Spr, None).await
    }

    pub async fn peer_id(&self) -> Result<String> {
        self.call(NativeCall::PeerId, None).await
    }

    /// Runs one bridged call against this node's context.
    pub(crate) async fn call(
        &self,
        call: NativeCall<'_>,
        cancel: Option<&CancelSignal>,
    ) -> Result<String> {
        self.ensure_live()?;
        let operation = self.native.operation(call.name());
        let payload = self
            .bridge
            .call(&operation, cancel, |ticket| {
                self.native.invoke(self.ctx, &call, ticket)
            })
            .await?;
        Ok(payload)
    }

    /// Starts a call whose progress deliveries the caller consumes.
    pub(crate) fn start_call(&self, call: NativeCall<'_>) -> Result<Ticket> {
        self.ensure_live()?;
        let operation = self.native.operation(call.name());
        let ticket = self
            .bridge
            .start(&operation, |ticket| self.native.invoke(self.ctx, &call, ticket))?;
        Ok(ticket)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed {
            return Err(NodeError::Destroyed);
        }
        Ok(())
    }

    /// Marks a download session for `cid` as live.
    pub(crate) fn claim_download(&self, cid: &str) -> Result<()> {
        let mut active = self
            .active_downloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !active.insert(cid.to_string()) {
            return Err(NodeError::DownloadActive(cid.to_string()));
        }
        Ok(())
    }

    pub(crate) fn release_download(&self, cid: &str) {
        self.active_downloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(cid);
    }
}

impl Drop for StorageNode {
    fn drop(&mut self) {
        if !self.destroyed {
            warn!(kind = %self.kind(), "node dropped without destroy, native context leaked");
        }
    }
}

/// Decodes a JSON payload returned by the native side.
pub(crate) fn decode<T: DeserializeOwned>(what: &'static str, payload: &str) -> Result<T> {
    serde_json::from_str(payload).map_err(|source| {
        debug!(what, payload, "undecodable native payload");
        NodeError::Decode { what, source }
    })
}
