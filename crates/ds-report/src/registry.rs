//! Report discovery and change watching.
//!
//! On startup the registry walks `reports/` and parses every `.sql` file
//! into an immutable record. Readers take an `Arc` snapshot; the dev-mode
//! watcher polls mtime+size at a fixed cadence and publishes a fresh
//! snapshot when anything changed, so in-flight requests holding the old
//! snapshot complete against the IR they started with.

use crate::report::{canonical_report_id, parse_report_file, Report};
use ds_core::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

/// One discovered report file with its parse outcome.
#[derive(Debug, Clone)]
pub struct ReportRecord {
    pub id: String,
    pub path: PathBuf,
    pub mtime: SystemTime,
    pub size: u64,
    /// Parse outcome; kept as a shared error so lint and dispatch surface
    /// the same instance.
    pub parsed: Result<Arc<Report>, Arc<CoreError>>,
}

/// Immutable view of every report at one point in time.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    records: HashMap<String, Arc<ReportRecord>>,
}

impl RegistrySnapshot {
    pub fn get(&self, report_id: &str) -> Option<&Arc<ReportRecord>> {
        self.records.get(report_id)
    }

    /// Parsed report for an id, surfacing parse errors and misses.
    pub fn report(&self, report_id: &str) -> CoreResult<Arc<Report>> {
        let record = self
            .records
            .get(report_id)
            .ok_or_else(|| CoreError::ReportNotFound {
                report: report_id.to_string(),
            })?;
        match &record.parsed {
            Ok(report) => Ok(Arc::clone(report)),
            Err(err) => Err(CoreError::InvalidMetadataBlock {
                block: report_id.to_string(),
                detail: err.to_string(),
            }),
        }
    }

    /// All report ids, sorted for stable iteration.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.records.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<ReportRecord>> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Registry owning the current snapshot and the optional watcher thread.
pub struct ReportRegistry {
    reports_dir: PathBuf,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    watching: AtomicBool,
}

impl ReportRegistry {
    /// Walk the reports directory and build the initial snapshot.
    pub fn open(reports_dir: &Path) -> CoreResult<Self> {
        let snapshot = scan_reports(reports_dir)?;
        Ok(Self {
            reports_dir: reports_dir.to_path_buf(),
            snapshot: RwLock::new(Arc::new(snapshot)),
            watching: AtomicBool::new(false),
        })
    }

    /// Current snapshot; cheap to clone, never mutated.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.snapshot.read().expect("registry lock poisoned"))
    }

    /// Re-walk the reports directory and publish a new snapshot.
    pub fn rescan(&self) -> CoreResult<()> {
        let snapshot = scan_reports(&self.reports_dir)?;
        *self.snapshot.write().expect("registry lock poisoned") = Arc::new(snapshot);
        Ok(())
    }

    /// Spawn the dev-mode polling watcher. Returns a guard; the thread
    /// stops when the guard is dropped.
    pub fn watch(self: &Arc<Self>, cadence: Duration) -> WatchGuard {
        let stop = Arc::new(AtomicBool::new(false));
        let registry = Arc::clone(self);
        let stop_flag = Arc::clone(&stop);
        registry.watching.store(true, Ordering::Relaxed);
        let handle = std::thread::Builder::new()
            .name("ds-report-watch".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    std::thread::sleep(cadence);
                    if stop_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    if registry.changed_on_disk() {
                        log::info!("report change detected, rebuilding registry snapshot");
                        if let Err(e) = registry.rescan() {
                            log::warn!("registry rescan failed: {e}");
                        }
                    }
                }
            })
            .expect("spawn watcher thread");
        WatchGuard {
            stop,
            handle: Some(handle),
        }
    }

    /// Compare the current snapshot against the filesystem by mtime+size.
    fn changed_on_disk(&self) -> bool {
        let snapshot = self.snapshot();
        let mut on_disk = Vec::new();
        if collect_sql_files(&self.reports_dir, &mut on_disk).is_err() {
            return false;
        }
        if on_disk.len() != snapshot.len() {
            return true;
        }
        for path in on_disk {
            let Ok(id) = report_id_for(&self.reports_dir, &path) else {
                return true;
            };
            let Some(record) = snapshot.get(&id) else {
                return true;
            };
            let Ok(meta) = std::fs::metadata(&path) else {
                return true;
            };
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if record.size != meta.len() || record.mtime != mtime {
                return true;
            }
        }
        false
    }
}

/// Stops the watcher thread on drop.
pub struct WatchGuard {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn scan_reports(reports_dir: &Path) -> CoreResult<RegistrySnapshot> {
    let mut files = Vec::new();
    collect_sql_files(reports_dir, &mut files)?;

    let mut records = HashMap::with_capacity(files.len());
    for path in files {
        let id = report_id_for(reports_dir, &path)?;
        let meta = std::fs::metadata(&path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        let parsed = match parse_report_file(&id, &path) {
            Ok(report) => Ok(Arc::new(report)),
            Err(err) => {
                log::warn!("report {id} failed to parse: {err}");
                Err(Arc::new(err))
            }
        };
        records.insert(
            id.clone(),
            Arc::new(ReportRecord {
                id,
                path,
                mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                size: meta.len(),
                parsed,
            }),
        );
    }
    Ok(RegistrySnapshot { records })
}

fn collect_sql_files(dir: &Path, out: &mut Vec<PathBuf>) -> CoreResult<()> {
    if !dir.is_dir() {
        return Err(CoreError::RootLayout {
            missing: dir.display().to_string(),
        });
    }
    for entry in std::fs::read_dir(dir).map_err(|e| CoreError::IoWithPath {
        path: dir.display().to_string(),
        source: e,
    })? {
        let entry = entry.map_err(|e| CoreError::IoWithPath {
            path: dir.display().to_string(),
            source: e,
        })?;
        let path = entry.path();
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| n.starts_with('.')) {
            continue;
        }
        if path.is_dir() {
            collect_sql_files(&path, out)?;
        } else if path.extension().is_some_and(|e| e == "sql") {
            out.push(path);
        }
    }
    Ok(())
}

fn report_id_for(reports_dir: &Path, path: &Path) -> CoreResult<String> {
    let relative = path
        .strip_prefix(reports_dir)
        .map_err(|_| CoreError::ReportNotFound {
            report: path.display().to_string(),
        })?;
    Ok(canonical_report_id(&relative.to_string_lossy()))
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
