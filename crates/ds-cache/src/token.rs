//! Single-flight build tokens.
//!
//! One token exists per in-flight fingerprint. The first claimant becomes
//! the builder; everyone else blocks on the token until it completes, then
//! re-probes the store. A failed build parks its error on the token so all
//! waiters observe the same outcome instead of piling up duplicate builds.

use ds_core::error::CoreError;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Outcome parked on a completed token.
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    Published(PathBuf),
    Failed(Arc<CoreError>),
}

#[derive(Debug, Default)]
struct TokenState {
    outcome: Option<BuildOutcome>,
}

/// Per-fingerprint completion signal shared among waiters.
#[derive(Debug, Default)]
pub struct BuildToken {
    state: Mutex<TokenState>,
    done: Condvar,
}

impl BuildToken {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record the outcome and release every waiter.
    pub fn complete(&self, outcome: BuildOutcome) {
        let mut state = self.state.lock().expect("token lock poisoned");
        state.outcome = Some(outcome);
        drop(state);
        self.done.notify_all();
    }

    /// Block until the builder completes or the deadline passes.
    pub fn wait(&self, timeout: Duration, node: &str) -> Result<BuildOutcome, CoreError> {
        let state = self.state.lock().expect("token lock poisoned");
        let (state, result) = self
            .done
            .wait_timeout_while(state, timeout, |s| s.outcome.is_none())
            .expect("token lock poisoned");
        if result.timed_out() && state.outcome.is_none() {
            return Err(CoreError::BuildTimeout {
                node: node.to_string(),
            });
        }
        Ok(state.outcome.clone().expect("outcome set before wake"))
    }
}

/// Re-materialize a shared build error for one waiter.
///
/// `CoreError` carries `io::Error` in some variants and is deliberately not
/// `Clone`; waiters get an equivalent error with the same stable code.
pub fn shared_error(err: &CoreError) -> CoreError {
    match err {
        CoreError::SqlExecutionError {
            report,
            node,
            detail,
        } => CoreError::SqlExecutionError {
            report: report.clone(),
            node: node.clone(),
            detail: detail.clone(),
        },
        CoreError::EngineUnavailable { detail } => CoreError::EngineUnavailable {
            detail: detail.clone(),
        },
        CoreError::BuildTimeout { node } => CoreError::BuildTimeout { node: node.clone() },
        CoreError::CacheCorrupt { detail } => CoreError::CacheCorrupt {
            detail: detail.clone(),
        },
        other => CoreError::CacheCorrupt {
            detail: format!("shared build failure: {other}"),
        },
    }
}

#[cfg(test)]
#[path = "token_test.rs"]
mod tests;
