//! The artifact store: probe, single-flight build, atomic publish.
//!
//! All cache mutation happens here, under per-fingerprint build tokens.
//! Callers receive ref-counted handles; the sweeper never evicts a file
//! with live handles.

use crate::kind::ArtifactKind;
use crate::token::{shared_error, BuildOutcome, BuildToken};
use ds_core::error::{CoreError, CoreResult};
use ds_core::fingerprint::Fingerprint;
use ds_core::layout::RootLayout;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Policy knobs the store needs from the root config.
#[derive(Debug, Clone)]
pub struct StorePolicy {
    pub default_ttl: Duration,
    pub soft_timeout: Duration,
    pub hard_timeout: Duration,
    pub stale_while_revalidate: bool,
}

/// Content-addressed Parquet store. One per process, behind an `Arc`.
#[derive(Debug)]
pub struct ArtifactStore {
    layout: RootLayout,
    policy: StorePolicy,
    tokens: Mutex<HashMap<Fingerprint, Arc<BuildToken>>>,
    access: Mutex<HashMap<PathBuf, SystemTime>>,
    in_flight: Mutex<HashMap<PathBuf, usize>>,
}

impl ArtifactStore {
    pub fn new(layout: RootLayout, policy: StorePolicy) -> Arc<Self> {
        Arc::new(Self {
            layout,
            policy,
            tokens: Mutex::new(HashMap::new()),
            access: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn layout(&self) -> &RootLayout {
        &self.layout
    }

    pub fn policy(&self) -> &StorePolicy {
        &self.policy
    }

    /// Target path for an artifact.
    pub fn path_for(&self, kind: ArtifactKind, fp: Fingerprint) -> PathBuf {
        self.layout
            .cache_dir(kind.dir_name())
            .join(format!("{}.parquet", fp.to_hex()))
    }

    /// Path rendered relative to the root, the shape manifests carry.
    pub fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.layout.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Probe the cache; on miss, exactly one caller runs `build` while
    /// concurrent callers for the same fingerprint wait and share the
    /// outcome.
    ///
    /// `build` receives the tmp path and must leave the finished Parquet
    /// there; the store fsyncs and renames it into place. `stale_ok` is the
    /// effective stale-while-revalidate setting (report CACHE block
    /// override, else the root config).
    pub fn get_or_build<F>(
        self: &Arc<Self>,
        kind: ArtifactKind,
        fp: Fingerprint,
        ttl: Duration,
        stale_ok: bool,
        node: &str,
        build: F,
    ) -> CoreResult<ArtifactHandle>
    where
        F: FnOnce(&Path) -> CoreResult<()>,
    {
        let target = self.path_for(kind, fp);
        if self.is_fresh(&target, ttl) {
            return Ok(self.handle(target));
        }

        // stale-while-revalidate: serve the expired file if a rebuild is
        // already in flight
        if stale_ok
            && target.is_file()
            && self.tokens.lock().expect("token map poisoned").contains_key(&fp)
        {
            return Ok(self.handle(target));
        }

        let (token, is_builder) = self.claim(fp);
        if !is_builder {
            return match token.wait(self.policy.hard_timeout, node)? {
                BuildOutcome::Published(path) => Ok(self.handle(path)),
                BuildOutcome::Failed(err) => Err(shared_error(&err)),
            };
        }

        let started = Instant::now();
        let result = self.run_build(&target, fp, node, build);
        if started.elapsed() > self.policy.soft_timeout {
            log::warn!(
                "node '{}' exceeded the soft build timeout ({:?})",
                node,
                started.elapsed()
            );
        }

        let mut tokens = self.tokens.lock().expect("token map poisoned");
        tokens.remove(&fp);
        drop(tokens);

        match result {
            Ok(()) => {
                token.complete(BuildOutcome::Published(target.clone()));
                Ok(self.handle(target))
            }
            Err(err) => {
                let shared = Arc::new(err);
                token.complete(BuildOutcome::Failed(Arc::clone(&shared)));
                Err(shared_error(&shared))
            }
        }
    }

    fn claim(&self, fp: Fingerprint) -> (Arc<BuildToken>, bool) {
        let mut tokens = self.tokens.lock().expect("token map poisoned");
        if let Some(token) = tokens.get(&fp) {
            (Arc::clone(token), false)
        } else {
            let token = BuildToken::new();
            tokens.insert(fp, Arc::clone(&token));
            (token, true)
        }
    }

    /// Write to tmp, fsync, rename. The rename is the publication point: a
    /// partially written artifact is never observable under its final name.
    fn run_build<F>(&self, target: &Path, fp: Fingerprint, node: &str, build: F) -> CoreResult<()>
    where
        F: FnOnce(&Path) -> CoreResult<()>,
    {
        let tmp = self.layout.tmp_dir().join(format!(
            "{}.{}_{}.parquet",
            fp.to_hex(),
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed),
        ));

        let started = Instant::now();
        let result = build(&tmp);
        if let Err(err) = result {
            let _ = std::fs::remove_file(&tmp);
            return Err(err);
        }
        if started.elapsed() > self.policy.hard_timeout {
            let _ = std::fs::remove_file(&tmp);
            return Err(CoreError::BuildTimeout {
                node: node.to_string(),
            });
        }
        if !tmp.is_file() {
            return Err(CoreError::CacheCorrupt {
                detail: format!("builder produced no file at {}", tmp.display()),
            });
        }

        let file = std::fs::File::open(&tmp).map_err(|e| CoreError::CacheCorrupt {
            detail: format!("reopen {} for fsync: {e}", tmp.display()),
        })?;
        file.sync_all().map_err(|e| CoreError::CacheCorrupt {
            detail: format!("fsync {}: {e}", tmp.display()),
        })?;
        drop(file);

        std::fs::rename(&tmp, target).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            CoreError::CacheCorrupt {
                detail: format!("publish {}: {e}", target.display()),
            }
        })?;
        Ok(())
    }

    fn is_fresh(&self, path: &Path, ttl: Duration) -> bool {
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        let Ok(mtime) = meta.modified() else {
            return false;
        };
        match mtime.elapsed() {
            Ok(age) => age <= ttl,
            // mtime in the future counts as fresh
            Err(_) => true,
        }
    }

    fn handle(self: &Arc<Self>, path: PathBuf) -> ArtifactHandle {
        self.access
            .lock()
            .expect("access map poisoned")
            .insert(path.clone(), SystemTime::now());
        *self
            .in_flight
            .lock()
            .expect("in-flight map poisoned")
            .entry(path.clone())
            .or_insert(0) += 1;
        ArtifactHandle {
            store: Arc::clone(self),
            path,
        }
    }

    pub(crate) fn release(&self, path: &Path) {
        let mut in_flight = self.in_flight.lock().expect("in-flight map poisoned");
        if let Some(count) = in_flight.get_mut(path) {
            *count -= 1;
            if *count == 0 {
                in_flight.remove(path);
            }
        }
    }

    pub(crate) fn is_in_flight(&self, path: &Path) -> bool {
        self.in_flight
            .lock()
            .expect("in-flight map poisoned")
            .contains_key(path)
    }

    pub(crate) fn last_access(&self, path: &Path) -> Option<SystemTime> {
        self.access
            .lock()
            .expect("access map poisoned")
            .get(path)
            .copied()
    }

    pub(crate) fn forget(&self, path: &Path) {
        self.access.lock().expect("access map poisoned").remove(path);
    }
}

/// Ref-counted borrow of a published artifact. While any handle is alive
/// the sweeper will not evict the file.
#[derive(Debug)]
pub struct ArtifactHandle {
    store: Arc<ArtifactStore>,
    path: PathBuf,
}

impl ArtifactHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Root-relative rendering for manifests and URLs.
    pub fn relative(&self) -> String {
        self.store.relative_path(&self.path)
    }
}

impl Drop for ArtifactHandle {
    fn drop(&mut self) {
        self.store.release(&self.path);
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
