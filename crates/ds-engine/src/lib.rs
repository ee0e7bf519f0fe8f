//! ds-engine - Query engine surface for ducksearch
//!
//! Ducksearch drives an embedded analytic engine (DuckDB) through a small,
//! deliberately narrow surface: short-lived sessions that can attach
//! Parquet artifacts as temp views, run one COPY per plan node, and answer
//! the few lookup queries bindings need. Concurrency is bounded by a FIFO
//! connection pool.

pub mod error;
pub mod pool;
pub mod session;

pub use error::{EngineError, EngineResult};
pub use pool::{EngineGuard, EnginePool};
pub use session::EngineSession;
