//! Bounded engine connection pool with FIFO wake-ups.
//!
//! The pool does not reuse connections: plan executions need fresh session
//! state, so a permit admits the caller to open a new in-memory session and
//! is returned when the guard drops. Admission is strictly
//! first-come-first-served via a ticket queue.

use crate::error::EngineResult;
use crate::session::EngineSession;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Bounded admission pool for engine sessions.
pub struct EnginePool {
    capacity: usize,
    state: Mutex<PoolState>,
    wakeup: Condvar,
    copies: Arc<AtomicU64>,
}

struct PoolState {
    available: usize,
    next_ticket: u64,
    now_serving: u64,
}

impl EnginePool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(PoolState {
                available: capacity,
                next_ticket: 0,
                now_serving: 0,
            }),
            wakeup: Condvar::new(),
            copies: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total COPY executions across every session of this pool. The
    /// single-flight tests assert one per plan node.
    pub fn executions(&self) -> u64 {
        self.copies.load(Ordering::Relaxed)
    }

    /// Block until a permit is free (FIFO) and open a fresh session.
    pub fn acquire(&self) -> EngineResult<EngineGuard<'_>> {
        let my_ticket;
        {
            let mut state = self.state.lock().expect("pool lock poisoned");
            my_ticket = state.next_ticket;
            state.next_ticket += 1;
            while state.now_serving != my_ticket || state.available == 0 {
                state = self.wakeup.wait(state).expect("pool lock poisoned");
            }
            state.available -= 1;
            state.now_serving += 1;
        }
        self.wakeup.notify_all();

        match EngineSession::open(Arc::clone(&self.copies)) {
            Ok(session) => Ok(EngineGuard {
                pool: self,
                session: Some(session),
            }),
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    fn release(&self) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        state.available += 1;
        drop(state);
        self.wakeup.notify_all();
    }
}

/// A checked-out session; returns its permit on drop.
pub struct EngineGuard<'a> {
    pool: &'a EnginePool,
    session: Option<EngineSession>,
}

impl Deref for EngineGuard<'_> {
    type Target = EngineSession;

    fn deref(&self) -> &EngineSession {
        self.session.as_ref().expect("session present until drop")
    }
}

impl Drop for EngineGuard<'_> {
    fn drop(&mut self) {
        self.session.take();
        self.pool.release();
    }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod tests;
