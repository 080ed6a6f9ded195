//! Bindings to the native node libraries.
//!
//! Both products export the same entry points under different prefixes, so
//! one macro generates a backend per product. Each backend routes callbacks
//! through [`CompletionRouter::global`].

use std::ffi::{c_char, c_int, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};

use storagelink_bridge::{CallbackStatus, CompletionRouter, TicketId};
use tracing::error;

#[cfg_attr(not(any(feature = "libstorage", feature = "libcodex")), allow(dead_code))]
type Callback = extern "C" fn(c_int, *const c_char, usize, *mut c_void);

/// Callback handed to every native entry point.
///
/// The payload is copied before returning; the library may free it as soon
/// as this function returns.
extern "C" fn on_native_callback(ret: c_int, msg: *const c_char, len: usize, user_data: *mut c_void) {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let Some(ticket) = TicketId::from_user_data(user_data) else {
            return;
        };
        let payload = if msg.is_null() {
            None
        } else {
            // SAFETY: the library guarantees `msg` points at `len` readable
            // bytes for the duration of the callback.
            Some(unsafe { std::slice::from_raw_parts(msg.cast::<u8>(), len) })
        };
        CompletionRouter::global().deliver(ticket.get(), CallbackStatus::from_raw(ret), len, payload);
    }));
    if outcome.is_err() {
        error!("panic while routing native callback");
    }
}

#[allow(unused_macros)]
macro_rules! native_library {
    (
        $(#[$meta:meta])*
        $name:ident, $sys:ident,
        kind = $kind:expr,
        lib = $lib:literal,
        prefix = $prefix:literal,
        main = $main:literal $(,)?
    ) => {
        mod $sys {
            use std::ffi::{c_char, c_int, c_void};

            use super::Callback;

            #[link(name = $lib)]
            unsafe extern "C" {
                #[link_name = $main]
                pub fn host_main();
                #[link_name = concat!($prefix, "_new")]
                pub fn new(config_json: *const c_char, cb: Callback, ud: *mut c_void) -> *mut c_void;
                #[link_name = concat!($prefix, "_start")]
                pub fn start(ctx: *mut c_void, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_stop")]
                pub fn stop(ctx: *mut c_void, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_close")]
                pub fn close(ctx: *mut c_void, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_destroy")]
                pub fn destroy(ctx: *mut c_void, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_version")]
                pub fn version(ctx: *mut c_void, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_revision")]
                pub fn revision(ctx: *mut c_void, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_repo")]
                pub fn repo(ctx: *mut c_void, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_spr")]
                pub fn spr(ctx: *mut c_void, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_peer_id")]
                pub fn peer_id(ctx: *mut c_void, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_upload_init")]
                pub fn upload_init(ctx: *mut c_void, filepath: *const c_char, chunk_size: usize, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_upload_chunk")]
                pub fn upload_chunk(ctx: *mut c_void, session_id: *const c_char, chunk: *const u8, len: usize, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_upload_finalize")]
                pub fn upload_finalize(ctx: *mut c_void, session_id: *const c_char, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_upload_cancel")]
                pub fn upload_cancel(ctx: *mut c_void, session_id: *const c_char, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_upload_file")]
                pub fn upload_file(ctx: *mut c_void, session_id: *const c_char, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_download_init")]
                pub fn download_init(ctx: *mut c_void, cid: *const c_char, chunk_size: usize, local: bool, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_download_chunk")]
                pub fn download_chunk(ctx: *mut c_void, cid: *const c_char, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_download_stream")]
                pub fn download_stream(ctx: *mut c_void, cid: *const c_char, chunk_size: usize, local: bool, filepath: *const c_char, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_download_cancel")]
                pub fn download_cancel(ctx: *mut c_void, cid: *const c_char, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_download_manifest")]
                pub fn download_manifest(ctx: *mut c_void, cid: *const c_char, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_list")]
                pub fn list(ctx: *mut c_void, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_fetch")]
                pub fn fetch(ctx: *mut c_void, cid: *const c_char, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_space")]
                pub fn space(ctx: *mut c_void, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_delete")]
                pub fn delete(ctx: *mut c_void, cid: *const c_char, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_exists")]
                pub fn exists(ctx: *mut c_void, cid: *const c_char, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_debug")]
                pub fn debug(ctx: *mut c_void, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_log_level")]
                pub fn log_level(ctx: *mut c_void, level: *const c_char, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_peer_debug")]
                pub fn peer_debug(ctx: *mut c_void, peer_id: *const c_char, cb: Callback, ud: *mut c_void) -> c_int;
                #[link_name = concat!($prefix, "_connect")]
                pub fn connect(ctx: *mut c_void, peer_id: *const c_char, addresses: *const *const c_char, len: usize, cb: Callback, ud: *mut c_void) -> c_int;
            }
        }

        $(#[$meta])*
        pub struct $name {
            router: std::sync::Arc<CompletionRouter>,
        }

        impl $name {
            /// Loads the library, running its runtime initialiser once per process.
            pub fn new() -> Self {
                static INIT: std::sync::Once = std::sync::Once::new();
                // SAFETY: the initialiser takes no arguments and is guarded
                // against repeated calls.
                INIT.call_once(|| unsafe { $sys::host_main() });
                Self {
                    router: CompletionRouter::global(),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $crate::native::NativeApi for $name {
            fn kind(&self) -> $crate::native::NodeKind {
                $kind
            }

            fn router(&self) -> &std::sync::Arc<CompletionRouter> {
                &self.router
            }

            fn create(&self, config_json: &std::ffi::CStr, ticket: TicketId) -> Option<$crate::native::NodeContext> {
                // SAFETY: `config_json` outlives the call; the library copies it.
                let ctx = unsafe { $sys::new(config_json.as_ptr(), on_native_callback, ticket.as_user_data()) };
                $crate::native::NodeContext::from_raw(ctx)
            }

            fn invoke(
                &self,
                ctx: $crate::native::NodeContext,
                call: &$crate::native::NativeCall<'_>,
                ticket: TicketId,
            ) -> storagelink_bridge::ReturnCode {
                use $crate::native::NativeCall;

                let c = ctx.as_ptr();
                let cb: Callback = on_native_callback;
                let ud = ticket.as_user_data();
                // SAFETY: every pointer argument borrows a buffer owned by the
                // caller for the duration of the call.
                let code = unsafe {
                    match *call {
                        NativeCall::Start => $sys::start(c, cb, ud),
                        NativeCall::Stop => $sys::stop(c, cb, ud),
                        NativeCall::Close => $sys::close(c, cb, ud),
                        NativeCall::Version => $sys::version(c, cb, ud),
                        NativeCall::Revision => $sys::revision(c, cb, ud),
                        NativeCall::Repo => $sys::repo(c, cb, ud),
                        NativeCall::Spr => $sys::spr(c, cb, ud),
                        NativeCall::PeerId => $sys::peer_id(c, cb, ud),
                        NativeCall::UploadInit { filepath, chunk_size } => {
                            $sys::upload_init(c, filepath.as_ptr(), chunk_size, cb, ud)
                        }
                        NativeCall::UploadChunk { session_id, chunk } => {
                            $sys::upload_chunk(c, session_id.as_ptr(), chunk.as_ptr(), chunk.len(), cb, ud)
                        }
                        NativeCall::UploadFinalize { session_id } => {
                            $sys::upload_finalize(c, session_id.as_ptr(), cb, ud)
                        }
                        NativeCall::UploadCancel { session_id } => {
                            $sys::upload_cancel(c, session_id.as_ptr(), cb, ud)
                        }
                        NativeCall::UploadFile { session_id } => {
                            $sys::upload_file(c, session_id.as_ptr(), cb, ud)
                        }
                        NativeCall::DownloadInit { cid, chunk_size, local } => {
                            $sys::download_init(c, cid.as_ptr(), chunk_size, local, cb, ud)
                        }
                        NativeCall::DownloadChunk { cid } => $sys::download_chunk(c, cid.as_ptr(), cb, ud),
                        NativeCall::DownloadStream { cid, chunk_size, local, filepath } => {
                            let filepath = filepath.unwrap_or(c"");
                            $sys::download_stream(c, cid.as_ptr(), chunk_size, local, filepath.as_ptr(), cb, ud)
                        }
                        NativeCall::DownloadCancel { cid } => $sys::download_cancel(c, cid.as_ptr(), cb, ud),
                        NativeCall::DownloadManifest { cid } => {
                            $sys::download_manifest(c, cid.as_ptr(), cb, ud)
                        }
                        NativeCall::List => $sys::list(c, cb, ud),
                        NativeCall::Fetch { cid } => $sys::fetch(c, cid.as_ptr(), cb, ud),
                        NativeCall::Space => $sys::space(c, cb, ud),
                        NativeCall::Delete { cid } => $sys::delete(c, cid.as_ptr(), cb, ud),
                        NativeCall::Exists { cid } => $sys::exists(c, cid.as_ptr(), cb, ud),
                        NativeCall::Debug => $sys::debug(c, cb, ud),
                        NativeCall::LogLevel { level } => $sys::log_level(c, level.as_ptr(), cb, ud),
                        NativeCall::PeerDebug { peer_id } => $sys::peer_debug(c, peer_id.as_ptr(), cb, ud),
                        NativeCall::Connect { peer_id, addresses } => {
                            if addresses.is_empty() {
                                $sys::connect(c, peer_id.as_ptr(), std::ptr::null(), 0, cb, ud)
                            } else {
                                let ptrs: Vec<*const c_char> =
                                    addresses.iter().map(|a| a.as_ptr()).collect();
                                $sys::connect(c, peer_id.as_ptr(), ptrs.as_ptr(), ptrs.len(), cb, ud)
                            }
                        }
                    }
                };
                storagelink_bridge::ReturnCode(code)
            }

            fn destroy(&self, ctx: $crate::native::NodeContext) -> storagelink_bridge::ReturnCode {
                // SAFETY: the context is not used again after this call.
                // A null user-data pointer routes nowhere.
                let code = unsafe { $sys::destroy(ctx.as_ptr(), on_native_callback, std::ptr::null_mut()) };
                storagelink_bridge::ReturnCode(code)
            }
        }
    };
}

#[cfg(feature = "libstorage")]
native_library!(
    /// Backend for `libstorage`.
    LibStorage, storage_sys,
    kind = crate::native::NodeKind::Storage,
    lib = "storage",
    prefix = "storage",
    main = "libstorageNimMain",
);

#[cfg(feature = "libcodex")]
native_library!(
    /// Backend for `libcodex`.
    LibCodex, codex_sys,
    kind = crate::native::NodeKind::Codex,
    lib = "codex",
    prefix = "codex",
    main = "libcodexNimMain",
);
