//! ds-server - HTTP surface for ducksearch
//!
//! Three routes and a health check: `/report` dispatches a report and
//! returns the manifest (JSON, or an HTML shell booting the browser
//! engine), `/cache/...` serves content-addressed artifacts with immutable
//! caching headers, and `/fs/...` is the jailed static filestore. The
//! server never renders report data itself.

pub mod fs;
pub mod html;
pub mod routes;
pub mod service;

pub use routes::build_router;
pub use service::{serve, Service, ServiceState};
