//! AxVisor runtime code-integrity guard.
//!
//! Kernel text is normally immutable once loaded, but jump-label / static-key
//! patching legitimately rewrites short code sequences in place at
//! unpredictable times. A naive integrity monitor that periodically hashes
//! code regions would raise a false tamper alert on every such patch. This
//! crate intercepts the patch routine, classifies which tracked region the
//! patch targets, and recomputes the affected per-region and aggregate
//! hashes once the patch completes, so the hash database the full-system
//! integrity scanner compares against is always current.
//!
//! # Features
//!
//! - `kernel` - Read code bytes through raw pointers (in-kernel builds)
//! - `symbols` - Kernel symbol table lookup for the hooked patch routine
//! - `kprobe-hook` - Real interception via a kretprobe on the patch routine
//!
//! # Quick Start
//!
//! ```ignore
//! // Initialize the subsystem (call once during boot, after the allocator).
//! axguard::init();
//!
//! // Register the regions to watch.
//! axguard::db::set_core_text(stext, etext - stext);
//! axguard::db::track_module(handle, "ax_net", base, size).unwrap();
//!
//! // Plant the hook on the jump-label patch routine.
//! axguard::jump_label::install().unwrap();
//! ```

#![no_std]

extern crate alloc;

#[macro_use]
extern crate log;

// =============================================================================
// Platform Abstraction (for testing support)
// =============================================================================

pub mod platform;

// =============================================================================
// Symbols Module
// =============================================================================

#[cfg(feature = "symbols")]
pub mod symbols;

// =============================================================================
// Hash Primitive
// =============================================================================

pub mod hash;

// =============================================================================
// Integrity Core
// =============================================================================

pub mod classify;

pub mod db;

pub mod ledger;

pub mod propagate;

// =============================================================================
// Interception Glue
// =============================================================================

pub mod jump_label;

// Re-export key types for convenience
pub use classify::{AddressOracle, ModState, ModuleHandle, classify};

pub use db::{CoreTextRecord, HashDb, KobjRecord, ModuleRecord};

pub use ledger::{Activation, Ledger};

pub use propagate::Completion;

pub use jump_label::{HookError, JumpLabelOp};

// =============================================================================
// Initialization
// =============================================================================

/// Initialize the axguard subsystem.
///
/// This should be called during kernel boot after the memory allocator is
/// ready and before [`jump_label::install`]. It creates the hash database;
/// the broader integrity subsystem then registers the core text range and
/// tracked modules through [`db`].
pub fn init() {
    info!("Initializing axguard...");

    db::init();

    info!("axguard initialization complete");
}
