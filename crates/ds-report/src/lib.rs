//! ds-report - Report parsing for ducksearch
//!
//! Turns an annotated report SQL file into a typed intermediate
//! representation: metadata blocks extracted from `/***NAME ... ***/`
//! islands, a single SQL body with recorded placeholder and CTE spans, and
//! the parameter specifications the resolver needs. Also hosts the report
//! registry and the root-wide linter.

pub mod blocks;
pub mod lint;
pub mod placeholder;
pub mod registry;
pub mod report;
pub mod scan;
pub mod types;

pub use blocks::MetadataBlocks;
pub use placeholder::{PlaceholderKind, PlaceholderSpan};
pub use registry::{RegistrySnapshot, ReportRegistry};
pub use report::{ParamScope, ParamSpec, Report};
pub use scan::{CteSpan, MaterializeKind};
pub use types::{ParamType, ParamValue};
