//! Cooperative cancellation.
//!
//! A token moves `NotRequested -> Requested -> Acknowledged` and never back.
//! Work units poll it; nothing is ever forcibly stopped. A module that never
//! polls will run to completion regardless of a request.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CancellationState {
    NotRequested,
    Requested,
    /// A worker has observed the request and stopped starting new work.
    Acknowledged,
}

impl CancellationState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => CancellationState::NotRequested,
            1 => CancellationState::Requested,
            _ => CancellationState::Acknowledged,
        }
    }
}

#[derive(Debug, Default)]
pub struct CancellationToken {
    state: AtomicU8,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `true` only for the call that made the
    /// transition, so callers can run one-shot side effects.
    pub fn request(&self) -> bool {
        self.state
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the request as observed. No effect unless a request is pending.
    pub fn acknowledge(&self) {
        let _ = self
            .state
            .compare_exchange(1, 2, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn is_requested(&self) -> bool {
        self.state.load(Ordering::Acquire) != 0
    }

    pub fn state(&self) -> CancellationState {
        CancellationState::from_u8(self.state.load(Ordering::Acquire))
    }
}
