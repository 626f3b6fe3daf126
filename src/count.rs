//! The control block: one heap-allocated share counter per ownership chain.
//!
//! Every live handle in a chain points at the same `ControlBlock`. The
//! counter is the only state in this crate that is mutated without holding a
//! lock; handles in a chain each carry their own mutex, so cross-handle count
//! updates have to be atomic.
use core::sync::atomic::{
    fence, AtomicUsize,
    Ordering::{Acquire, Relaxed, Release},
};

pub(crate) struct ControlBlock {
    shares: AtomicUsize,
}

impl ControlBlock {
    pub(crate) fn new(shares: usize) -> Self {
        ControlBlock {
            shares: AtomicUsize::new(shares),
        }
    }

    /// Add one share. Precondition (upheld by the handle machinery): the
    /// caller already holds a live share, so the count is at least 1 and
    /// cannot concurrently reach zero.
    pub(crate) fn increment(&self) {
        if self.shares.fetch_add(1, Relaxed) > usize::MAX / 2 {
            // Same guard as std::sync::Arc: a count this large means mem::forget
            // abuse, and wrapping would cause a use-after-free.
            std::process::abort();
        }
    }

    /// Drop one share. Returns true to exactly one caller: the one whose
    /// decrement took the count to zero. That caller now owns the managed
    /// object and this block, and must free both; every other caller must
    /// not touch either again.
    pub(crate) fn decrement(&self) -> bool {
        if self.shares.fetch_sub(1, Release) == 1 {
            // Synchronize with the Release above in every other handle's
            // decrement, so their last use of the object happens-before the
            // frees done by our caller.
            fence(Acquire);
            true
        } else {
            false
        }
    }

    /// Snapshot of the count. Relaxed: this is only advisory, and may be
    /// stale the instant it is returned.
    pub(crate) fn get(&self) -> usize {
        self.shares.load(Relaxed)
    }
}
