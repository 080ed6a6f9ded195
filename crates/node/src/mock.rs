//! In-process fake of the native node library.
//!
//! Every accepted call is answered from a thread the fake owns, the way the
//! real library answers from its worker thread. Content identifiers are
//! derived from the chunk size and the data, so identical uploads agree.

use std::collections::{HashMap, HashSet};
use std::ffi::{CStr, c_void};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serde_json::json;
use sha2::{Digest, Sha256};
use storagelink_bridge::{CallbackStatus, CompletionRouter, ReturnCode, TicketId};

use crate::native::{NativeApi, NativeCall, NodeContext, NodeKind};

pub(crate) const VERSION: &str = "v0.2.1";
pub(crate) const REVISION: &str = "5c2dd9a";

const DEFAULT_BLOCK_RETRIES: u32 = 3;

pub(crate) struct FakeNative {
    kind: NodeKind,
    router: Arc<CompletionRouter>,
    state: Arc<Mutex<FakeState>>,
}

struct FakeState {
    next_ctx: usize,
    nodes: HashMap<usize, FakeNode>,
    rejected: HashSet<String>,
    fail_create: Option<String>,
    fail_cancel: bool,
    cancel_delay: Duration,
    stream_delay: Duration,
    retry_interval: Duration,
    calls: Vec<String>,
    last_config: Option<serde_json::Value>,
    connects: Vec<(String, Vec<String>)>,
}

struct FakeNode {
    data_dir: String,
    peer_id: String,
    block_retries: u32,
    storage_quota: u64,
    started: bool,
    closed: bool,
    log_level: String,
    next_session: u64,
    store: HashMap<String, Stored>,
    uploads: HashMap<String, UploadSlot>,
    downloads: HashMap<String, DownloadSlot>,
}

#[derive(Clone)]
struct Stored {
    data: Arc<Vec<u8>>,
    block_size: usize,
    filename: Option<String>,
}

struct UploadSlot {
    filepath: String,
    chunk_size: usize,
    data: Vec<u8>,
    cancelled: Arc<AtomicBool>,
}

struct DownloadSlot {
    ready: bool,
    offset: usize,
    chunk_size: usize,
    cancelled: Arc<AtomicBool>,
}

/// Answers one ticket.
struct Reply {
    router: Arc<CompletionRouter>,
    ticket: u64,
}

impl Reply {
    fn progress(&self, len: usize, chunk: Option<&[u8]>) {
        self.router.deliver(self.ticket, CallbackStatus::Progress, len, chunk);
    }

    fn ok(&self, payload: &str) {
        self.router
            .deliver(self.ticket, CallbackStatus::Ok, payload.len(), Some(payload.as_bytes()));
    }

    fn err(&self, message: &str) {
        self.router
            .deliver(self.ticket, CallbackStatus::Error, message.len(), Some(message.as_bytes()));
    }

    fn result(&self, result: Result<String, String>) {
        match result {
            Ok(payload) => self.ok(&payload),
            Err(message) => self.err(&message),
        }
    }
}

pub(crate) fn content_id(chunk_size: usize, data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((chunk_size as u64).to_le_bytes());
    hasher.update(data);
    format!("zDv{}", &hex::encode(hasher.finalize())[..44])
}

fn manifest_json(cid: &str, stored: &Stored) -> serde_json::Value {
    json!({
        "treeCid": format!("zDz{}", &cid[3..]),
        "datasetSize": stored.data.len(),
        "blockSize": stored.block_size,
        "filename": stored.filename,
        "mimetype": "application/octet-stream",
        "protected": false,
    })
}

fn text(s: &CStr) -> String {
    s.to_string_lossy().into_owned()
}

impl FakeNative {
    pub(crate) fn new() -> Arc<Self> {
        Self::with_kind(NodeKind::Storage)
    }

    pub(crate) fn with_kind(kind: NodeKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            router: Arc::new(CompletionRouter::new()),
            state: Arc::new(Mutex::new(FakeState {
                next_ctx: 1,
                nodes: HashMap::new(),
                rejected: HashSet::new(),
                fail_create: None,
                fail_cancel: false,
                cancel_delay: Duration::ZERO,
                stream_delay: Duration::ZERO,
                retry_interval: Duration::from_millis(5),
                calls: Vec::new(),
                last_config: None,
                connects: Vec::new(),
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Makes the named entry point return an error code immediately.
    pub(crate) fn reject(&self, name: &str) {
        self.lock().rejected.insert(name.to_string());
    }

    /// Lets a previously rejected entry point through again.
    pub(crate) fn allow(&self, name: &str) {
        self.lock().rejected.remove(name);
    }

    pub(crate) fn fail_create(&self, message: &str) {
        self.lock().fail_create = Some(message.to_string());
    }

    /// Makes upload and download cancel calls fail.
    pub(crate) fn fail_cancel(&self, fail: bool) {
        self.lock().fail_cancel = fail;
    }

    /// Delay before upload and download cancel calls take effect.
    pub(crate) fn set_cancel_delay(&self, delay: Duration) {
        self.lock().cancel_delay = delay;
    }

    /// Delay before each streamed block.
    pub(crate) fn set_stream_delay(&self, delay: Duration) {
        self.lock().stream_delay = delay;
    }

    pub(crate) fn set_retry_interval(&self, interval: Duration) {
        self.lock().retry_interval = interval;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub(crate) fn last_config(&self) -> Option<serde_json::Value> {
        self.lock().last_config.clone()
    }

    pub(crate) fn connects(&self) -> Vec<(String, Vec<String>)> {
        self.lock().connects.clone()
    }

    pub(crate) fn log_levels(&self) -> Vec<String> {
        self.lock().nodes.values().map(|n| n.log_level.clone()).collect()
    }

    /// Open upload sessions across all nodes.
    pub(crate) fn upload_sessions(&self) -> usize {
        self.lock().nodes.values().map(|n| n.uploads.len()).sum()
    }

    /// Live node contexts.
    pub(crate) fn contexts(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Open download sessions across all nodes.
    pub(crate) fn download_sessions(&self) -> usize {
        self.lock().nodes.values().map(|n| n.downloads.len()).sum()
    }

    fn reply(&self, ticket: TicketId) -> Reply {
        Reply {
            router: Arc::clone(&self.router),
            ticket: ticket.get(),
        }
    }

    /// Answers from a fake worker thread with a result computed against the
    /// node's state.
    fn answer<F>(&self, ctx: usize, ticket: TicketId, work: F)
    where
        F: FnOnce(&mut FakeNode) -> Result<String, String> + Send + 'static,
    {
        self.answer_after(Duration::ZERO, ctx, ticket, work);
    }

    fn answer_after<F>(&self, delay: Duration, ctx: usize, ticket: TicketId, work: F)
    where
        F: FnOnce(&mut FakeNode) -> Result<String, String> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let reply = self.reply(ticket);
        thread::spawn(move || {
            thread::sleep(delay);
            let result = {
                let mut state = state.lock().unwrap();
                match state.nodes.get_mut(&ctx) {
                    Some(node) => work(node),
                    None => Err("node context destroyed".to_string()),
                }
            };
            reply.result(result);
        });
    }

    fn cancel_result(&self) -> (Duration, Result<String, String>) {
        let state = self.lock();
        let result = if state.fail_cancel {
            Err("failed to cancel session".to_string())
        } else {
            Ok(String::new())
        };
        (state.cancel_delay, result)
    }

    /// Waits for content the node does not have, then gives up. Stops early
    /// when `cancelled` is set.
    fn fetch_missing(
        &self,
        ticket: TicketId,
        retries: u32,
        cancelled: Option<Arc<AtomicBool>>,
        on_fail: impl FnOnce() + Send + 'static,
    ) {
        let interval = self.lock().retry_interval;
        let reply = self.reply(ticket);
        thread::spawn(move || {
            for _ in 0..retries {
                thread::sleep(interval);
                if cancelled.as_ref().is_some_and(|c| c.load(Ordering::SeqCst)) {
                    on_fail();
                    reply.err("download cancelled");
                    return;
                }
            }
            on_fail();
            reply.err(&format!("failed to fetch manifest: block not found after {retries} retries"));
        });
    }

    fn upload_file(&self, ctx: usize, session_id: String, ticket: TicketId) -> ReturnCode {
        let (filepath, chunk_size, cancelled, delay) = {
            let state = self.lock();
            let Some(slot) = state.nodes.get(&ctx).and_then(|n| n.uploads.get(&session_id)) else {
                drop(state);
                self.reply(ticket).err("upload session not found");
                return ReturnCode::OK;
            };
            (
                slot.filepath.clone(),
                slot.chunk_size,
                Arc::clone(&slot.cancelled),
                state.stream_delay,
            )
        };

        let state = Arc::clone(&self.state);
        let reply = self.reply(ticket);
        thread::spawn(move || {
            let data = match std::fs::read(&filepath) {
                Ok(data) => data,
                Err(e) => return reply.err(&format!("failed to open {filepath}: {e}")),
            };
            for block in data.chunks(chunk_size) {
                thread::sleep(delay);
                if cancelled.load(Ordering::SeqCst) {
                    return reply.err("upload cancelled");
                }
                reply.progress(block.len(), None);
            }

            let cid = content_id(chunk_size, &data);
            let mut state = state.lock().unwrap();
            if let Some(node) = state.nodes.get_mut(&ctx) {
                node.uploads.remove(&session_id);
                let filename = std::path::Path::new(&filepath)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
                node.store.insert(
                    cid.clone(),
                    Stored {
                        data: Arc::new(data),
                        block_size: chunk_size,
                        filename,
                    },
                );
            }
            drop(state);
            reply.ok(&cid);
        });
        ReturnCode::OK
    }

    fn download_init(
        &self,
        ctx: usize,
        cid: String,
        chunk_size: usize,
        local: bool,
        ticket: TicketId,
    ) -> ReturnCode {
        let (have, cancelled, retries) = {
            let mut state = self.lock();
            let Some(node) = state.nodes.get_mut(&ctx) else {
                return ReturnCode::ERR;
            };
            let have = node.store.contains_key(&cid);
            let cancelled = Arc::new(AtomicBool::new(false));
            node.downloads.insert(
                cid.clone(),
                DownloadSlot {
                    ready: have,
                    offset: 0,
                    chunk_size,
                    cancelled: Arc::clone(&cancelled),
                },
            );
            (have, cancelled, node.block_retries)
        };

        if have {
            self.reply(ticket).ok("");
        } else if local {
            if let Some(node) = self.lock().nodes.get_mut(&ctx) {
                node.downloads.remove(&cid);
            }
            self.reply(ticket).err("cid not found in the local store");
        } else {
            let state = Arc::clone(&self.state);
            self.fetch_missing(ticket, retries, Some(cancelled), move || {
                if let Some(node) = state.lock().unwrap().nodes.get_mut(&ctx) {
                    node.downloads.remove(&cid);
                }
            });
        }
        ReturnCode::OK
    }

    fn download_stream(
        &self,
        ctx: usize,
        cid: String,
        filepath: Option<String>,
        ticket: TicketId,
    ) -> ReturnCode {
        let (stored, chunk_size, cancelled, delay) = {
            let state = self.lock();
            let node = state.nodes.get(&ctx);
            let slot = node.and_then(|n| n.downloads.get(&cid)).filter(|s| s.ready);
            let stored = node.and_then(|n| n.store.get(&cid)).cloned();
            match (slot, stored) {
                (Some(slot), Some(stored)) => (
                    stored,
                    slot.chunk_size,
                    Arc::clone(&slot.cancelled),
                    state.stream_delay,
                ),
                _ => {
                    drop(state);
                    self.reply(ticket).err("download session not initialised");
                    return ReturnCode::OK;
                }
            }
        };

        let reply = self.reply(ticket);
        thread::spawn(move || {
            for block in stored.data.chunks(chunk_size) {
                thread::sleep(delay);
                if cancelled.load(Ordering::SeqCst) {
                    return reply.err("download cancelled");
                }
                reply.progress(block.len(), Some(block));
            }
            if let Some(path) = filepath {
                if let Err(e) = std::fs::write(&path, stored.data.as_slice()) {
                    return reply.err(&format!("failed to write {path}: {e}"));
                }
            }
            reply.ok("");
        });
        ReturnCode::OK
    }
}

impl NativeApi for FakeNative {
    fn kind(&self) -> NodeKind {
        self.kind
    }

    fn router(&self) -> &Arc<CompletionRouter> {
        &self.router
    }

    fn create(&self, config_json: &CStr, ticket: TicketId) -> Option<NodeContext> {
        let config: serde_json::Value =
            serde_json::from_str(&config_json.to_string_lossy()).unwrap_or_default();
        let mut state = self.lock();
        state.calls.push("new".to_string());
        state.last_config = Some(config.clone());

        let id = state.next_ctx;
        state.next_ctx += 1;
        let data_dir = config["data-dir"]
            .as_str()
            .unwrap_or("/tmp/storage")
            .to_string();
        let peer_id = format!(
            "16Uiu2{}",
            &hex::encode(Sha256::digest(format!("{id}:{data_dir}")))[..16]
        );
        state.nodes.insert(
            id,
            FakeNode {
                data_dir,
                peer_id,
                block_retries: config["block-retries"]
                    .as_u64()
                    .map_or(DEFAULT_BLOCK_RETRIES, |r| r as u32),
                storage_quota: config["storage-quota"].as_u64().unwrap_or(20 << 30),
                started: false,
                closed: false,
                log_level: "info".to_string(),
                next_session: 0,
                store: HashMap::new(),
                uploads: HashMap::new(),
                downloads: HashMap::new(),
            },
        );
        // The library hands back a context even when it rejects the config.
        let failure = state.fail_create.clone();
        drop(state);

        let reply = self.reply(ticket);
        thread::spawn(move || match failure {
            Some(message) => reply.err(&message),
            None => reply.ok(""),
        });
        NodeContext::from_raw(id as *mut c_void)
    }

    fn invoke(&self, ctx: NodeContext, call: &NativeCall<'_>, ticket: TicketId) -> ReturnCode {
        let ctx = ctx.as_ptr() as usize;
        let name = call.name();
        {
            let mut state = self.lock();
            state.calls.push(name.to_string());
            if state.rejected.contains(name) {
                return ReturnCode::ERR;
            }
            let Some(node) = state.nodes.get(&ctx) else {
                return ReturnCode::ERR;
            };
            let transfer = matches!(
                call,
                NativeCall::UploadInit { .. }
                    | NativeCall::UploadFile { .. }
                    | NativeCall::DownloadInit { .. }
                    | NativeCall::DownloadStream { .. }
                    | NativeCall::DownloadManifest { .. }
                    | NativeCall::Fetch { .. }
            );
            if transfer && !node.started {
                return ReturnCode::ERR;
            }
        }

        match *call {
            NativeCall::Start => self.answer(ctx, ticket, |n| {
                n.started = true;
                Ok(String::new())
            }),
            NativeCall::Stop => self.answer(ctx, ticket, |n| {
                n.started = false;
                Ok(String::new())
            }),
            NativeCall::Close => self.answer(ctx, ticket, |n| {
                if n.started {
                    return Err("node must be stopped before close".to_string());
                }
                n.closed = true;
                Ok(String::new())
            }),
            NativeCall::Version => self.answer(ctx, ticket, |_| Ok(VERSION.to_string())),
            NativeCall::Revision => self.answer(ctx, ticket, |_| Ok(REVISION.to_string())),
            NativeCall::Repo => self.answer(ctx, ticket, |n| Ok(n.data_dir.clone())),
            NativeCall::Spr => self.answer(ctx, ticket, |n| Ok(format!("spr:{}", n.peer_id))),
            NativeCall::PeerId => self.answer(ctx, ticket, |n| Ok(n.peer_id.clone())),

            NativeCall::UploadInit { filepath, chunk_size } => {
                let filepath = text(filepath);
                self.answer(ctx, ticket, move |n| {
                    n.next_session += 1;
                    let id = format!("upload-{}", n.next_session);
                    n.uploads.insert(
                        id.clone(),
                        UploadSlot {
                            filepath,
                            chunk_size,
                            data: Vec::new(),
                            cancelled: Arc::new(AtomicBool::new(false)),
                        },
                    );
                    Ok(id)
                });
            }
            NativeCall::UploadChunk { session_id, chunk } => {
                let session_id = text(session_id);
                let chunk = chunk.to_vec();
                let reply = self.reply(ticket);
                let state = Arc::clone(&self.state);
                thread::spawn(move || {
                    let mut state = state.lock().unwrap();
                    let Some(slot) = state
                        .nodes
                        .get_mut(&ctx)
                        .and_then(|n| n.uploads.get_mut(&session_id))
                    else {
                        drop(state);
                        return reply.err("upload session not found");
                    };
                    slot.data.extend_from_slice(&chunk);
                    let chunk_size = slot.chunk_size;
                    drop(state);
                    if chunk.len() >= chunk_size {
                        for block in chunk.chunks(chunk_size) {
                            reply.progress(block.len(), None);
                        }
                    } else {
                        reply.progress(chunk.len(), None);
                    }
                    reply.ok("");
                });
            }
            NativeCall::UploadFinalize { session_id } => {
                let session_id = text(session_id);
                self.answer(ctx, ticket, move |n| {
                    let slot = n
                        .uploads
                        .remove(&session_id)
                        .ok_or_else(|| "upload session not found".to_string())?;
                    let cid = content_id(slot.chunk_size, &slot.data);
                    let filename = std::path::Path::new(&slot.filepath)
                        .file_name()
                        .map(|f| f.to_string_lossy().into_owned());
                    n.store.insert(
                        cid.clone(),
                        Stored {
                            data: Arc::new(slot.data),
                            block_size: slot.chunk_size,
                            filename,
                        },
                    );
                    Ok(cid)
                });
            }
            NativeCall::UploadCancel { session_id } => {
                let session_id = text(session_id);
                let (delay, result) = self.cancel_result();
                self.answer_after(delay, ctx, ticket, move |n| {
                    result.clone()?;
                    if let Some(slot) = n.uploads.remove(&session_id) {
                        slot.cancelled.store(true, Ordering::SeqCst);
                    }
                    result
                });
            }
            NativeCall::UploadFile { session_id } => {
                return self.upload_file(ctx, text(session_id), ticket);
            }

            NativeCall::DownloadInit { cid, chunk_size, local } => {
                return self.download_init(ctx, text(cid), chunk_size, local, ticket);
            }
            NativeCall::DownloadChunk { cid } => {
                let cid = text(cid);
                let reply = self.reply(ticket);
                let state = Arc::clone(&self.state);
                thread::spawn(move || {
                    let mut state = state.lock().unwrap();
                    let Some(node) = state.nodes.get_mut(&ctx) else {
                        drop(state);
                        return reply.err("node context destroyed");
                    };
                    let data = node.store.get(&cid).map(|s| Arc::clone(&s.data));
                    let slot = node.downloads.get_mut(&cid).filter(|s| s.ready);
                    let (Some(slot), Some(data)) = (slot, data) else {
                        drop(state);
                        return reply.err("download session not initialised");
                    };
                    let start = slot.offset.min(data.len());
                    let end = (start + slot.chunk_size).min(data.len());
                    slot.offset = end;
                    drop(state);
                    if end > start {
                        reply.progress(end - start, Some(&data[start..end]));
                    }
                    reply.ok("");
                });
            }
            NativeCall::DownloadStream { cid, filepath, .. } => {
                return self.download_stream(ctx, text(cid), filepath.map(text), ticket);
            }
            NativeCall::DownloadCancel { cid } => {
                let cid = text(cid);
                let (delay, result) = self.cancel_result();
                self.answer_after(delay, ctx, ticket, move |n| {
                    result.clone()?;
                    if let Some(slot) = n.downloads.remove(&cid) {
                        slot.cancelled.store(true, Ordering::SeqCst);
                    }
                    result
                });
            }
            NativeCall::DownloadManifest { cid } | NativeCall::Fetch { cid } => {
                let cid = text(cid);
                let (found, retries) = {
                    let state = self.lock();
                    let Some(node) = state.nodes.get(&ctx) else {
                        return ReturnCode::ERR;
                    };
                    (node.store.get(&cid).cloned(), node.block_retries)
                };
                match found {
                    Some(stored) => self.reply(ticket).ok(&manifest_json(&cid, &stored).to_string()),
                    None if matches!(call, NativeCall::Fetch { .. }) => {
                        self.reply(ticket).err("block not found")
                    }
                    None => self.fetch_missing(ticket, retries, None, || {}),
                }
            }

            NativeCall::List => self.answer(ctx, ticket, |n| {
                let items: Vec<_> = n
                    .store
                    .iter()
                    .map(|(cid, stored)| json!({"cid": cid, "manifest": manifest_json(cid, stored)}))
                    .collect();
                Ok(serde_json::Value::Array(items).to_string())
            }),
            NativeCall::Space => self.answer(ctx, ticket, |n| {
                let used: usize = n.store.values().map(|s| s.data.len()).sum();
                let blocks: usize = n
                    .store
                    .values()
                    .map(|s| s.data.len().div_ceil(s.block_size.max(1)))
                    .sum();
                Ok(json!({
                    "totalBlocks": blocks,
                    "quotaMaxBytes": n.storage_quota,
                    "quotaUsedBytes": used,
                    "quotaReservedBytes": 0,
                })
                .to_string())
            }),
            NativeCall::Delete { cid } => {
                let cid = text(cid);
                self.answer(ctx, ticket, move |n| {
                    n.store.remove(&cid);
                    Ok(String::new())
                });
            }
            NativeCall::Exists { cid } => {
                let cid = text(cid);
                self.answer(ctx, ticket, move |n| Ok(n.store.contains_key(&cid).to_string()));
            }

            NativeCall::Debug => self.answer(ctx, ticket, |n| {
                Ok(json!({
                    "id": n.peer_id,
                    "addrs": ["/ip4/127.0.0.1/tcp/8070"],
                    "spr": format!("spr:{}", n.peer_id),
                    "announceAddresses": ["/ip4/127.0.0.1/tcp/8070"],
                    "table": {
                        "localNode": {
                            "nodeId": format!("node-{}", n.peer_id),
                            "peerId": n.peer_id,
                            "record": format!("spr:{}", n.peer_id),
                            "address": null,
                            "seen": false,
                        },
                        "nodes": [],
                    },
                })
                .to_string())
            }),
            NativeCall::LogLevel { level } => {
                let level = text(level);
                self.answer(ctx, ticket, move |n| {
                    if level.trim().is_empty() {
                        return Err("invalid log level".to_string());
                    }
                    n.log_level = level;
                    Ok(String::new())
                });
            }
            NativeCall::PeerDebug { peer_id } => {
                let peer_id = text(peer_id);
                self.answer(ctx, ticket, move |n| {
                    if peer_id != n.peer_id {
                        return Err(format!("peer {peer_id} not found"));
                    }
                    Ok(json!({
                        "peerId": n.peer_id,
                        "seqNo": 1,
                        "addresses": ["/ip4/127.0.0.1/tcp/8070"],
                    })
                    .to_string())
                });
            }
            NativeCall::Connect { peer_id, addresses } => {
                let peer_id = text(peer_id);
                let addresses: Vec<String> = addresses.iter().map(|a| text(a)).collect();
                self.lock().connects.push((peer_id.clone(), addresses));
                self.answer(ctx, ticket, move |n| {
                    if peer_id == n.peer_id {
                        return Err("cannot dial self".to_string());
                    }
                    Ok(String::new())
                });
            }
        }
        ReturnCode::OK
    }

    fn destroy(&self, ctx: NodeContext) -> ReturnCode {
        let mut state = self.lock();
        state.calls.push("destroy".to_string());
        let id = ctx.as_ptr() as usize;
        match state.nodes.get(&id) {
            Some(node) if node.closed => {
                state.nodes.remove(&id);
                ReturnCode::OK
            }
            _ => ReturnCode::ERR,
        }
    }
}
