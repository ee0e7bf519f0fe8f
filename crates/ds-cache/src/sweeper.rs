//! Background eviction sweeper.
//!
//! Enforces two limits: max bytes per kind and max bytes globally. Eviction
//! order is LRU by last-access time (falling back to mtime for files this
//! process has not served). Files with live handles are exempt. The sweeper
//! also clears abandoned tmp files older than the hard build timeout.

use crate::kind::ArtifactKind;
use crate::store::ArtifactStore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Byte caps the sweeper enforces.
#[derive(Debug, Clone)]
pub struct SweepLimits {
    pub max_kind_bytes: u64,
    pub max_total_bytes: u64,
}

/// Periodic eviction thread. Stops when dropped.
pub struct Sweeper {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn the sweeper over a store.
    pub fn spawn(store: Arc<ArtifactStore>, limits: SweepLimits, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        // coarse lock so overlapping sweeps never race each other
        let sweep_lock = Mutex::new(());
        let handle = std::thread::Builder::new()
            .name("ds-cache-sweep".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    if stop_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    let _guard = sweep_lock.lock().expect("sweep lock poisoned");
                    sweep_once(&store, &limits);
                }
            })
            .expect("spawn sweeper thread");
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Entry {
    path: PathBuf,
    size: u64,
    last_used: SystemTime,
}

/// One full sweep. Public for tests; production runs it on the thread.
pub fn sweep_once(store: &Arc<ArtifactStore>, limits: &SweepLimits) {
    let mut all: Vec<Entry> = Vec::new();

    for kind in ArtifactKind::all() {
        let mut entries = list_entries(store, kind);
        let kind_total: u64 = entries.iter().map(|e| e.size).sum();
        if kind_total > limits.max_kind_bytes {
            evict_lru(store, &mut entries, kind_total, limits.max_kind_bytes);
        }
        all.append(&mut entries);
    }

    let total: u64 = all.iter().map(|e| e.size).sum();
    if total > limits.max_total_bytes {
        evict_lru(store, &mut all, total, limits.max_total_bytes);
    }

    clear_stale_tmp(store);
}

fn list_entries(store: &Arc<ArtifactStore>, kind: ArtifactKind) -> Vec<Entry> {
    let dir = store.layout().cache_dir(kind.dir_name());
    let Ok(read_dir) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut entries = Vec::new();
    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.extension().is_none_or(|e| e != "parquet") {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let last_used = store.last_access(&path).unwrap_or(mtime);
        entries.push(Entry {
            path,
            size: meta.len(),
            last_used,
        });
    }
    entries
}

/// Evict least-recently-used entries until the total fits the cap.
fn evict_lru(store: &Arc<ArtifactStore>, entries: &mut Vec<Entry>, mut total: u64, cap: u64) {
    entries.sort_by_key(|e| e.last_used);
    let mut kept = Vec::new();
    for entry in entries.drain(..) {
        if total > cap && !store.is_in_flight(&entry.path) {
            match std::fs::remove_file(&entry.path) {
                Ok(()) => {
                    log::debug!("evicted {}", entry.path.display());
                    store.forget(&entry.path);
                    total -= entry.size;
                }
                Err(e) => log::warn!("eviction of {} failed: {e}", entry.path.display()),
            }
        } else {
            kept.push(entry);
        }
    }
    *entries = kept;
}

/// Remove tmp files no builder can still own.
fn clear_stale_tmp(store: &Arc<ArtifactStore>) {
    let horizon = store.policy().hard_timeout;
    let Ok(read_dir) = std::fs::read_dir(store.layout().tmp_dir()) else {
        return;
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .unwrap_or_default();
        if age > horizon {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("stale tmp cleanup of {} failed: {e}", path.display());
            }
        }
    }
}

#[cfg(test)]
#[path = "sweeper_test.rs"]
mod tests;
