//! Root configuration parsing for config.toml
//!
//! The root config carries the constants referenced by `CONFIG` metadata
//! blocks, cache sizing and TTL policy, the engine pool bound, filestore
//! jails, and the secrets sidecar location. Environment variables
//! `DUCKSEARCH_DEPLOYMENT_ID` and `DUCKSEARCH_SECRETS_FILE` override the
//! corresponding file values.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable overriding `deployment_id`.
pub const ENV_DEPLOYMENT_ID: &str = "DUCKSEARCH_DEPLOYMENT_ID";

/// Environment variable overriding `secrets_file`.
pub const ENV_SECRETS_FILE: &str = "DUCKSEARCH_SECRETS_FILE";

/// Main project configuration from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootConfig {
    /// Project name
    pub name: String,

    /// Deployment identifier salting every fingerprint. Two deployments with
    /// different secret values must not share a cache directory.
    #[serde(default = "default_deployment_id")]
    pub deployment_id: String,

    /// Secrets sidecar file (KEY=VALUE lines), relative to the root
    #[serde(default)]
    pub secrets_file: Option<String>,

    /// Constants available to `{{config NAME}}` placeholders
    #[serde(default)]
    pub constants: BTreeMap<String, String>,

    /// Artifact cache policy
    #[serde(default)]
    pub cache: CacheConfig,

    /// Query engine pool settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Parameter routing limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Jailed static filestore routes
    #[serde(default)]
    pub filestore: Vec<FilestoreJail>,
}

/// Artifact cache policy from the `[cache]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Default artifact TTL; reports may override via their CACHE block
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Global cap across all artifact kinds
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,

    /// Per-kind cap
    #[serde(default = "default_max_kind_bytes")]
    pub max_kind_bytes: u64,

    /// Serve an expired artifact while a rebuild is in flight
    #[serde(default)]
    pub stale_while_revalidate: bool,

    /// Sweeper cadence
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            max_total_bytes: default_max_total_bytes(),
            max_kind_bytes: default_max_kind_bytes(),
            stale_while_revalidate: false,
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

/// Engine pool settings from the `[engine]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum concurrent engine sessions; 0 means 2 x logical cores
    #[serde(default)]
    pub pool_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { pool_size: 0 }
    }
}

impl EngineConfig {
    /// The effective pool bound.
    pub fn effective_pool_size(&self) -> usize {
        if self.pool_size > 0 {
            self.pool_size
        } else {
            2 * std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
        }
    }
}

/// Parameter routing limits from the `[limits]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Largest value set a hybrid param may carry and stay client-side
    #[serde(default = "default_client_values_cap")]
    pub client_values_cap: usize,

    /// Soft per-node build timeout
    #[serde(default = "default_soft_timeout_seconds")]
    pub soft_timeout_seconds: u64,

    /// Hard per-node build timeout; waiters fail with BuildTimeout
    #[serde(default = "default_hard_timeout_seconds")]
    pub hard_timeout_seconds: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            client_values_cap: default_client_values_cap(),
            soft_timeout_seconds: default_soft_timeout_seconds(),
            hard_timeout_seconds: default_hard_timeout_seconds(),
        }
    }
}

/// One jailed filestore route under `/fs/<jail>/...`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilestoreJail {
    /// URL segment identifying the jail
    pub jail: String,

    /// Directory served by the jail, relative to the root
    pub root: String,

    /// Extensions allowed; empty means any not denied
    #[serde(default)]
    pub allow_extensions: Vec<String>,

    /// Extensions always refused
    #[serde(default)]
    pub deny_extensions: Vec<String>,

    /// Largest file the jail will serve
    #[serde(default = "default_filestore_max_bytes")]
    pub max_bytes: u64,
}

fn default_deployment_id() -> String {
    "default".to_string()
}

fn default_ttl_seconds() -> u64 {
    300
}

fn default_max_total_bytes() -> u64 {
    8 * 1024 * 1024 * 1024
}

fn default_max_kind_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_sweep_interval_seconds() -> u64 {
    30
}

fn default_client_values_cap() -> usize {
    256
}

fn default_soft_timeout_seconds() -> u64 {
    30
}

fn default_hard_timeout_seconds() -> u64 {
    300
}

fn default_filestore_max_bytes() -> u64 {
    64 * 1024 * 1024
}

impl RootConfig {
    /// Load config.toml from a root directory, applying environment
    /// overrides.
    pub fn load_from_dir(root: &Path) -> CoreResult<Self> {
        let path = root.join("config.toml");
        Self::load(&path)
    }

    /// Load a config file, applying environment overrides.
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.is_file() {
            return Err(CoreError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut config: RootConfig =
            toml::from_str(&text).map_err(|e| CoreError::ConfigParse {
                detail: e.to_string(),
            })?;
        if let Ok(id) = std::env::var(ENV_DEPLOYMENT_ID) {
            if !id.is_empty() {
                config.deployment_id = id;
            }
        }
        if let Ok(file) = std::env::var(ENV_SECRETS_FILE) {
            if !file.is_empty() {
                config.secrets_file = Some(file);
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> CoreResult<()> {
        if self.deployment_id.is_empty() {
            return Err(CoreError::ConfigInvalid {
                detail: "deployment_id must not be empty".to_string(),
            });
        }
        if self.limits.hard_timeout_seconds < self.limits.soft_timeout_seconds {
            return Err(CoreError::ConfigInvalid {
                detail: "hard_timeout_seconds must be >= soft_timeout_seconds".to_string(),
            });
        }
        for jail in &self.filestore {
            if jail.jail.is_empty() || jail.jail.contains('/') {
                return Err(CoreError::ConfigInvalid {
                    detail: format!("invalid filestore jail name '{}'", jail.jail),
                });
            }
        }
        Ok(())
    }

    /// Resolve the secrets sidecar path against the root, if configured.
    pub fn secrets_file_path(&self, root: &Path) -> Option<PathBuf> {
        self.secrets_file.as_ref().map(|f| {
            let p = Path::new(f);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            }
        })
    }

    /// Look up a `CONFIG` constant by name.
    pub fn constant(&self, name: &str) -> Option<&str> {
        self.constants.get(name).map(String::as_str)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
