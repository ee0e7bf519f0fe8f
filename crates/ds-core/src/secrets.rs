//! Secrets vault: name → value resolution with a non-serialization
//! guarantee.
//!
//! Reports declare secrets by name only; values come from the process
//! environment (`DUCKSEARCH_SECRET_<NAME>`) or the sidecar file named in the
//! config. Values never enter URLs, fingerprints, manifests, or logs: the
//! wrapper type refuses to Debug or Serialize itself, error text passes
//! through [`SecretsVault::redact`] before surfacing, and resolved SQL
//! buffers are wiped with [`wipe_string`] after execution.

use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Prefix for environment-sourced secret values.
pub const ENV_SECRET_PREFIX: &str = "DUCKSEARCH_SECRET_";

/// One secret value. Bytes are zeroed on drop.
pub struct SecretValue(Vec<u8>);

impl SecretValue {
    fn new(value: String) -> Self {
        Self(value.into_bytes())
    }

    /// Borrow the raw value. Callers must not persist or log the result.
    pub fn reveal(&self) -> &str {
        // constructed from a String, always valid UTF-8
        std::str::from_utf8(&self.0).unwrap_or("")
    }
}

impl Drop for SecretValue {
    fn drop(&mut self) {
        for byte in self.0.iter_mut() {
            unsafe { std::ptr::write_volatile(byte, 0) };
        }
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Overwrite a string's bytes before releasing it. Used for resolved SQL
/// that contained secret-derived literals.
pub fn wipe_string(s: &mut String) {
    let bytes = unsafe { s.as_bytes_mut() };
    for byte in bytes.iter_mut() {
        unsafe { std::ptr::write_volatile(byte, b' ') };
    }
    s.clear();
}

/// Name → value store for one root. Deliberately not Clone, not Serialize.
pub struct SecretsVault {
    values: HashMap<String, SecretValue>,
}

impl fmt::Debug for SecretsVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretsVault")
            .field("names", &self.names())
            .finish()
    }
}

impl SecretsVault {
    /// Empty vault for roots with no declared secrets.
    pub fn empty() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Resolve every declared name from the environment, then the sidecar
    /// file. A declared name with no value anywhere is an error at startup,
    /// not at request time.
    pub fn load(declared: &[String], sidecar: Option<&Path>) -> CoreResult<Self> {
        let sidecar_values = match sidecar {
            Some(path) if path.is_file() => parse_sidecar(path)?,
            _ => HashMap::new(),
        };

        let mut values = HashMap::new();
        for name in declared {
            let env_key = format!("{ENV_SECRET_PREFIX}{}", name.to_uppercase());
            let value = match std::env::var(&env_key) {
                Ok(v) => Some(v),
                Err(_) => sidecar_values.get(name).cloned(),
            };
            match value {
                Some(v) => {
                    values.insert(name.clone(), SecretValue::new(v));
                }
                None => {
                    return Err(CoreError::SecretUnavailable { name: name.clone() });
                }
            }
        }
        Ok(Self { values })
    }

    /// Declared names, sorted. Safe to log; names salt nothing and leak
    /// nothing.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.values.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn get(&self, name: &str) -> CoreResult<&SecretValue> {
        self.values
            .get(name)
            .ok_or_else(|| CoreError::UndeclaredName {
                kind: "secret".to_string(),
                name: name.to_string(),
            })
    }

    /// Replace every occurrence of a secret value in `text` with a
    /// `[secret:<name>]` marker. Applied to engine error text before it can
    /// reach a log line or an HTTP body.
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (name, value) in &self.values {
            let raw = value.reveal();
            if !raw.is_empty() && out.contains(raw) {
                out = out.replace(raw, &format!("[secret:{name}]"));
            }
        }
        out
    }
}

fn parse_sidecar(path: &Path) -> CoreResult<HashMap<String, String>> {
    let text = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut values = HashMap::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(CoreError::ConfigInvalid {
                detail: format!(
                    "secrets file {}: line {} is not KEY=VALUE",
                    path.display(),
                    lineno + 1
                ),
            });
        };
        values.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(values)
}

#[cfg(test)]
#[path = "secrets_test.rs"]
mod tests;
