use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic id source. Each manager (and each job, for its children) owns
/// its own generator so separate instances never share a sequence.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// First call to [`next`](Self::next) returns `first`.
    pub fn starting_at(first: u64) -> Self {
        Self { next: AtomicU64::new(first) }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
