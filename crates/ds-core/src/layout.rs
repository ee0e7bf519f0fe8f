//! On-disk root layout validation and the single-process cache lock.
//!
//! A ducksearch root contains `config.toml`, `reports/`, `composites/`, and
//! a `cache/` tree with one subdirectory per artifact kind. v1 assumes one
//! process owns `cache/`; a `cache/lock` advisory file makes conflicting
//! startups fail fast, and a `cache/.deployment` marker refuses roots whose
//! cache was populated under a different deployment id.

use crate::error::{CoreError, CoreResult};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Subdirectories of `cache/`, one per artifact kind plus `tmp`.
pub const CACHE_SUBDIRS: [&str; 9] = [
    "artifacts",
    "slices",
    "materialize",
    "literal_sources",
    "bindings",
    "facets",
    "charts",
    "manifests",
    "tmp",
];

/// Canonical layout for a ducksearch runtime root.
#[derive(Debug, Clone)]
pub struct RootLayout {
    pub root: PathBuf,
    pub config: PathBuf,
    pub reports: PathBuf,
    pub composites: PathBuf,
    pub cache: PathBuf,
}

impl RootLayout {
    /// Validate the expected runtime root structure.
    ///
    /// A valid root contains `config.toml`, `reports/`, `composites/`, and a
    /// `cache/` directory populated with the required subdirectories.
    pub fn validate(root: &Path) -> CoreResult<Self> {
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };
        let layout = Self {
            config: root.join("config.toml"),
            reports: root.join("reports"),
            composites: root.join("composites"),
            cache: root.join("cache"),
            root,
        };

        let mut missing: Vec<String> = Vec::new();
        if !layout.config.is_file() {
            missing.push(layout.config.display().to_string());
        }
        for dir in [&layout.reports, &layout.composites, &layout.cache] {
            if !dir.is_dir() {
                missing.push(dir.display().to_string());
            }
        }
        for child in layout.cache_children() {
            if !child.is_dir() {
                missing.push(child.display().to_string());
            }
        }
        if !missing.is_empty() {
            return Err(CoreError::RootLayout {
                missing: missing.join(", "),
            });
        }
        Ok(layout)
    }

    /// Validate a root, creating any missing cache subdirectories first.
    pub fn validate_creating_cache(root: &Path) -> CoreResult<Self> {
        let cache = root.join("cache");
        for name in CACHE_SUBDIRS {
            std::fs::create_dir_all(cache.join(name)).map_err(|e| CoreError::IoWithPath {
                path: cache.join(name).display().to_string(),
                source: e,
            })?;
        }
        Self::validate(root)
    }

    /// All per-kind cache directories.
    pub fn cache_children(&self) -> Vec<PathBuf> {
        CACHE_SUBDIRS.iter().map(|n| self.cache.join(n)).collect()
    }

    /// Directory for one artifact kind by its directory name.
    pub fn cache_dir(&self, kind_dir: &str) -> PathBuf {
        self.cache.join(kind_dir)
    }

    /// Scratch directory for in-flight artifact writes.
    pub fn tmp_dir(&self) -> PathBuf {
        self.cache.join("tmp")
    }

    /// Resolve a report id (repo-relative path without `.sql`) to its file.
    pub fn report_path(&self, report_id: &str) -> PathBuf {
        self.reports.join(format!("{report_id}.sql"))
    }

    /// Check the deployment marker, writing it on first use. A cache
    /// populated under a different deployment id must not be reused because
    /// fingerprints computed from secret *names* would collide across
    /// deployments with different secret values.
    pub fn check_deployment(&self, deployment_id: &str) -> CoreResult<()> {
        let marker = self.cache.join(".deployment");
        if marker.is_file() {
            let existing = std::fs::read_to_string(&marker)?;
            let existing = existing.trim();
            if existing != deployment_id {
                return Err(CoreError::ConfigInvalid {
                    detail: format!(
                        "cache belongs to deployment '{existing}', refusing to serve as '{deployment_id}'"
                    ),
                });
            }
            return Ok(());
        }
        std::fs::write(&marker, format!("{deployment_id}\n"))?;
        Ok(())
    }
}

/// Advisory single-process lock on `cache/lock`.
///
/// Held for the lifetime of a serve process; the file is removed on drop.
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
}

impl CacheLock {
    /// Acquire the lock, failing fast if another process holds it.
    pub fn acquire(layout: &RootLayout) -> CoreResult<Self> {
        let path = layout.cache.join("lock");
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CoreError::CacheLocked {
                    path: path.display().to_string(),
                });
            }
            Err(e) => {
                return Err(CoreError::IoWithPath {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { path })
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("could not remove cache lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
#[path = "layout_test.rs"]
mod tests;
