//! Deterministic fingerprints for plan nodes and report sources.
//!
//! A fingerprint is the SHA-256 of a canonical byte encoding of everything
//! that can change an artifact's bytes: the deployment id, the report source
//! hash, the node kind and name, the fingerprints of upstream nodes, and the
//! applied inputs. Every field is written tagged and length-prefixed so no
//! two distinct tuples share an encoding, and inputs are sorted by name so
//! URL ordering cannot leak into the hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Content address of one artifact. Equal fingerprints mean equal bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint of a raw byte string (used for report sources).
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Lowercase hex rendering, the on-disk file stem.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-char lowercase hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

/// Incremental builder over the canonical tuple encoding.
///
/// Callers push fields in a fixed order; `input` entries may arrive in any
/// order because they are buffered and sorted by name before hashing.
pub struct FingerprintBuilder {
    hasher: Sha256,
    inputs: Vec<(String, Vec<u8>)>,
    upstream: Vec<Fingerprint>,
}

impl FingerprintBuilder {
    pub fn new(deployment_id: &str) -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
            inputs: Vec::new(),
            upstream: Vec::new(),
        };
        builder.write_field(b"deployment", deployment_id.as_bytes());
        builder
    }

    fn write_field(&mut self, tag: &[u8], value: &[u8]) {
        self.hasher.update(tag);
        self.hasher.update([0u8]);
        self.hasher.update((value.len() as u64).to_be_bytes());
        self.hasher.update(value);
    }

    /// The source fingerprint of the report this node belongs to.
    pub fn source(mut self, fp: Fingerprint) -> Self {
        self.write_field(b"source", fp.as_bytes());
        self
    }

    /// Node kind discriminator (e.g. "base", "materialize").
    pub fn kind(mut self, kind: &str) -> Self {
        self.write_field(b"kind", kind.as_bytes());
        self
    }

    /// Node name within the report (CTE name, binding id, ...).
    pub fn name(mut self, name: &str) -> Self {
        self.write_field(b"name", name.as_bytes());
        self
    }

    /// Record one upstream fingerprint; sorted before hashing.
    pub fn upstream(mut self, fp: Fingerprint) -> Self {
        self.upstream.push(fp);
        self
    }

    /// Record one applied input with its canonical value bytes; sorted by
    /// name before hashing.
    pub fn input(mut self, name: &str, canonical_value: Vec<u8>) -> Self {
        self.inputs.push((name.to_string(), canonical_value));
        self
    }

    /// Convenience for string-valued inputs (config constants).
    pub fn input_str(self, name: &str, value: &str) -> Self {
        let mut bytes = Vec::with_capacity(value.len() + 9);
        bytes.push(b's');
        bytes.extend_from_slice(&(value.len() as u64).to_be_bytes());
        bytes.extend_from_slice(value.as_bytes());
        self.input(name, bytes)
    }

    pub fn finish(mut self) -> Fingerprint {
        self.upstream.sort();
        let upstream = std::mem::take(&mut self.upstream);
        for fp in upstream {
            self.write_field(b"upstream", fp.as_bytes());
        }
        self.inputs.sort();
        let inputs = std::mem::take(&mut self.inputs);
        for (name, value) in inputs {
            let mut field = Vec::with_capacity(name.len() + value.len() + 9);
            field.extend_from_slice(name.as_bytes());
            field.push(0u8);
            field.extend_from_slice(&value);
            self.write_field(b"input", &field);
        }
        Fingerprint(self.hasher.finalize().into())
    }
}

#[cfg(test)]
#[path = "fingerprint_test.rs"]
mod tests;
