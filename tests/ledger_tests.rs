//! Integration tests for the modification ledger.
//!
//! Verifies counter neutrality under paired and interleaved activations,
//! non-negativity, and state round-tripping through activation tokens.

use std::sync::Arc;
use std::thread;

use axguard::classify::{ModState, ModuleHandle};
use axguard::ledger::Ledger;

// =============================================================================
// Pairing Tests
// =============================================================================

#[test]
fn test_paired_sequence_is_counter_neutral() {
    let ledger = Ledger::new();

    for i in 0..100u64 {
        let act = ledger.begin(ModState::ModuleText(ModuleHandle(i)));
        assert_eq!(ledger.depth(), 1);
        assert_eq!(ledger.end(act), ModState::ModuleText(ModuleHandle(i)));
        assert_eq!(ledger.depth(), 0);
    }
}

#[test]
fn test_nested_activations_count_correctly() {
    let ledger = Ledger::new();

    let outer = ledger.begin(ModState::CoreText);
    let inner = ledger.begin(ModState::Unaffiliated);
    assert_eq!(ledger.depth(), 2);

    let _ = ledger.end(inner);
    assert_eq!(ledger.depth(), 1);
    let _ = ledger.end(outer);
    assert_eq!(ledger.depth(), 0);
}

#[test]
fn test_out_of_order_completion_keeps_states_separate() {
    let ledger = Ledger::new();

    let a = ledger.begin(ModState::ModuleText(ModuleHandle(1)));
    let b = ledger.begin(ModState::ModuleText(ModuleHandle(2)));

    // Each activation carries its own classification; completion order is
    // irrelevant.
    assert_eq!(ledger.end(b), ModState::ModuleText(ModuleHandle(2)));
    assert_eq!(ledger.end(a), ModState::ModuleText(ModuleHandle(1)));
    assert_eq!(ledger.depth(), 0);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_pairs_return_to_zero() {
    let ledger = Arc::new(Ledger::new());
    let mut handles = Vec::new();

    for t in 0..8u64 {
        let ledger = Arc::clone(&ledger);
        handles.push(thread::spawn(move || {
            for i in 0..200u64 {
                let act = ledger.begin(ModState::ModuleText(ModuleHandle(t * 1000 + i)));
                let state = ledger.end(act);
                assert_eq!(state, ModState::ModuleText(ModuleHandle(t * 1000 + i)));
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(ledger.depth(), 0);
}

// =============================================================================
// Reset Tests
// =============================================================================

#[test]
fn test_reset_zeroes_depth() {
    let ledger = Ledger::new();

    let _a = ledger.begin(ModState::CoreText);
    let _b = ledger.begin(ModState::CoreText);
    assert_eq!(ledger.depth(), 2);

    ledger.reset();
    assert_eq!(ledger.depth(), 0);
}

#[test]
fn test_end_after_reset_saturates_at_zero() {
    let ledger = Ledger::new();

    let act = ledger.begin(ModState::CoreText);
    ledger.reset();

    // The counter never goes negative.
    let _ = ledger.end(act);
    assert_eq!(ledger.depth(), 0);
}
