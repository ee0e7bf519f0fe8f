//! The response manifest: everything the browser runtime needs to slice,
//! facet, and inspect without the server rendering any data.

use serde::Serialize;
use std::collections::BTreeMap;

/// One column of the base artifact's schema.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

/// JSON body answering `GET /report`.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    /// Canonical report id
    pub report: String,
    /// Root-relative path of the base Parquet artifact
    pub base_parquet: String,
    /// Materialized CTE name → root-relative Parquet path
    pub materialize: BTreeMap<String, String>,
    /// Literal source id → root-relative Parquet path
    pub literal_sources: BTreeMap<String, String>,
    /// Binding id → resolved value
    pub bindings: BTreeMap<String, String>,
    /// Parameters left for the browser to apply
    pub client_params: BTreeMap<String, String>,
    /// View-layer derived parameter declarations, forwarded verbatim
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub derived_params: BTreeMap<String, String>,
    pub ttl_seconds: u64,
    pub schema: Vec<SchemaColumn>,
}
