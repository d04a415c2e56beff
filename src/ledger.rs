//! Modification ledger: in-flight bookkeeping for intercepted patches.
//!
//! The entry handler opens an [`Activation`] carrying the classification for
//! that patch; the matching completion handler consumes it. Carrying the
//! state in the token (instead of one shared slot) removes any ordering
//! assumption between interleaved activations on different CPUs. A shared
//! saturating counter tracks how many activations are in flight; it is
//! diagnostic only and never gates a modification.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::classify::ModState;

/// State captured at entry interception, handed back at completion.
///
/// One token per activation. It is not `Clone`, and [`Ledger::end`] consumes
/// it, so begin/end stay strictly paired.
#[must_use]
#[derive(Debug)]
pub struct Activation {
    state: ModState,
}

impl Activation {
    /// The classification recorded at entry.
    pub fn state(&self) -> ModState {
        self.state
    }
}

/// Counter of overlapping in-flight modifications.
pub struct Ledger {
    depth: AtomicU32,
}

impl Ledger {
    pub const fn new() -> Self {
        Self {
            depth: AtomicU32::new(0),
        }
    }

    /// Open an activation: count it and capture its classification.
    ///
    /// Safe to call from multiple concurrent execution contexts; never
    /// blocks.
    pub fn begin(&self, state: ModState) -> Activation {
        // Saturating increment; the counter is diagnostic, not a gate.
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_add(1));
        Activation { state }
    }

    /// Close an activation, yielding back the state recorded at entry.
    pub fn end(&self, activation: Activation) -> ModState {
        // Saturating decrement keeps the counter non-negative even if an
        // external reset raced with in-flight activations.
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
        activation.state
    }

    /// Number of activations currently in flight.
    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::SeqCst)
    }

    /// Reset the counter to zero (hook installation time).
    pub fn reset(&self) {
        self.depth.store(0, Ordering::SeqCst);
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide ledger used by the installed hook.
pub static LEDGER: Ledger = Ledger::new();
