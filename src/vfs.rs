//! Process-wide in-memory virtual filesystem
//!
//! Files live under [`VSIMEM_PREFIX`](crate::path::VSIMEM_PREFIX) and are
//! shared byte buffers: a dataset opened on a memory file reads the same
//! buffer its [`MemoryFile`](crate::memfile::MemoryFile) appends to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use dashmap::DashMap;
use parking_lot::RwLock;
use crate::path::VSIMEM_PREFIX;

/// Shared, growable file contents
pub type SharedBytes = Arc<RwLock<Vec<u8>>>;

static FILES: OnceLock<DashMap<String, SharedBytes>> = OnceLock::new();
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn files() -> &'static DashMap<String, SharedBytes> {
    FILES.get_or_init(DashMap::new)
}

/// Generates a fresh file name with the given extension
pub fn unique_name(ext: &str) -> String {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    if ext.is_empty() {
        format!("{}{}", VSIMEM_PREFIX, id)
    } else {
        format!("{}{}.{}", VSIMEM_PREFIX, id, ext.trim_start_matches('.'))
    }
}

/// Creates (or replaces) a file holding `bytes`
pub fn create(name: &str, bytes: Vec<u8>) -> SharedBytes {
    let shared = Arc::new(RwLock::new(bytes));
    files().insert(name.to_string(), Arc::clone(&shared));
    shared
}

pub fn get(name: &str) -> Option<SharedBytes> {
    files().get(name).map(|entry| Arc::clone(entry.value()))
}

pub fn exists(name: &str) -> bool {
    files().contains_key(name)
}

/// Unlinks a file; holders of its buffer keep their copy alive
pub fn remove(name: &str) -> bool {
    files().remove(name).is_some()
}
