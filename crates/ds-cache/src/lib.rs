//! ds-cache - Content-addressed Parquet artifact cache
//!
//! Artifacts are Parquet files named by fingerprint under one directory per
//! kind. The store guarantees at-most-one-concurrent-build-per-fingerprint
//! (single-flight), atomic publication via tmp-write + fsync + rename, TTL
//! expiry, and LRU eviction under byte caps. v1 is single-process; the
//! advisory lock lives in ds-core's layout module.

pub mod kind;
pub mod store;
pub mod sweeper;
pub mod token;

pub use kind::ArtifactKind;
pub use store::{ArtifactHandle, ArtifactStore};
pub use sweeper::Sweeper;
