//! C-callable reader surface.
//!
//! Bridges the crate to host processes (Python, C, anything with a C FFI)
//! through a minimal handle protocol: `open_reader` registers a
//! [`CacheReader`] under a freshly minted integer handle, `read_message`
//! advances it and hands back a pointer/length pair into the reader's block
//! buffer, `close_reader` drops it. Handles are never reused.
//!
//! The registry supports concurrent open/read/close across independent
//! handles; calls on one handle must not overlap (the returned message
//! pointer is only valid until the next call on that same handle).

use crate::reader::{CacheError, CacheReader};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::ffi::{CStr, c_char};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Clean end-of-stream.
pub const READ_EOF: i32 = 0;
/// Unknown handle, bad argument, or any unclassified failure.
pub const READ_ERR: i32 = -1;
/// The file is corrupt; the handle will not recover.
pub const READ_ERR_CORRUPT: i32 = -2;
/// A block declared more bytes than the source could provide.
pub const READ_ERR_TRUNCATED: i32 = -3;

static READERS: Lazy<Mutex<HashMap<u64, Arc<Mutex<CacheReader>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn register(reader: CacheReader) -> Option<u64> {
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    let mut readers = READERS.lock().ok()?;
    readers.insert(handle, Arc::new(Mutex::new(reader)));
    Some(handle)
}

/// Clone the entry out so the registry lock is not held across a read.
fn lookup(handle: u64) -> Option<Arc<Mutex<CacheReader>>> {
    READERS.lock().ok()?.get(&handle).cloned()
}

/// Open the cache file at `path` and register a reader for it.
///
/// Returns 0 and writes a nonzero handle through `handle_out` on success,
/// -1 on any failure (null argument, non-UTF-8 path, unreadable file,
/// malformed capacity header). `handle_out` is zeroed before any work.
///
/// # Safety
///
/// `path` must be null or a valid nul-terminated C string; `handle_out`
/// must be null or valid for writing a `u64`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn open_reader(path: *const c_char, handle_out: *mut u64) -> i32 {
    if handle_out.is_null() {
        return READ_ERR;
    }
    unsafe { *handle_out = 0 };
    if path.is_null() {
        return READ_ERR;
    }
    let Ok(path) = (unsafe { CStr::from_ptr(path) }).to_str() else {
        return READ_ERR;
    };
    let Ok(reader) = CacheReader::open(path) else {
        return READ_ERR;
    };
    let Some(handle) = register(reader) else {
        return READ_ERR;
    };
    unsafe { *handle_out = handle };
    0
}

/// Advance the reader behind `handle` by one message.
///
/// On success returns the message byte length (> 0) and writes a pointer to
/// its first byte through `message_out`; the pointed-at bytes stay valid
/// only until the next call on the same handle. Returns [`READ_EOF`] with a
/// null pointer at clean end-of-stream, [`READ_ERR_CORRUPT`] on a corrupt
/// block, [`READ_ERR_TRUNCATED`] on a truncated block, and [`READ_ERR`] for
/// unknown handles or any other failure.
///
/// # Safety
///
/// `message_out` must be null or valid for writing a pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn read_message(handle: u64, message_out: *mut *const u8) -> i32 {
    if message_out.is_null() {
        return READ_ERR;
    }
    unsafe { *message_out = ptr::null() };
    let Some(slot) = lookup(handle) else {
        return READ_ERR;
    };
    let Ok(mut reader) = slot.lock() else {
        return READ_ERR;
    };
    match reader.next() {
        Ok(Some(msg)) => {
            let bytes = msg.bytes();
            unsafe { *message_out = bytes.as_ptr() };
            bytes.len() as i32
        }
        Ok(None) => READ_EOF,
        Err(CacheError::CorruptBlock(_)) => READ_ERR_CORRUPT,
        Err(CacheError::UnexpectedEof) => READ_ERR_TRUNCATED,
        Err(_) => READ_ERR,
    }
}

/// Remove `handle` from the registry and release its reader.
///
/// Idempotent: closing an unknown or already-closed handle is a no-op.
#[unsafe(no_mangle)]
pub extern "C" fn close_reader(handle: u64) {
    if let Ok(mut readers) = READERS.lock() {
        readers.remove(&handle);
    }
}
