//! ds-core - Core library for ducksearch
//!
//! This crate provides the shared error taxonomy, root configuration
//! parsing, on-disk layout validation, deterministic fingerprints, and the
//! secrets vault used across all ducksearch components.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod layout;
pub mod secrets;

pub use config::RootConfig;
pub use error::{CoreError, CoreResult};
pub use fingerprint::{Fingerprint, FingerprintBuilder};
pub use layout::RootLayout;
pub use secrets::SecretsVault;
