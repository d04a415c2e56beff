//! Integration tests for the hash propagation engine.
//!
//! Exercises every completion branch: core rehash, full module cascade,
//! kobj drift, module unloaded mid-flight, unaffiliated targets, and the
//! defensive idle branch. Each test uses its own address range so tests can
//! run in parallel against the shared mock memory.

use axguard::classify::{ModState, ModuleHandle};
use axguard::db::HashDb;
use axguard::hash::fast_hash;
use axguard::platform;
use axguard::propagate::{Completion, on_completion};

const CORE_SIZE: u64 = 0x100;
const MOD_SIZE: u64 = 0x40;

struct Layout {
    core: u64,
    mod_a: u64,
    mod_b: u64,
}

/// Map one core region and two module regions at a test-specific base.
fn setup(base: u64) -> (HashDb, Layout) {
    let layout = Layout {
        core: base,
        mod_a: base + 0x10_0000,
        mod_b: base + 0x20_0000,
    };
    platform::mock_map_region(layout.core, &[0x90; CORE_SIZE as usize]);
    platform::mock_map_region(layout.mod_a, &[0xaa; MOD_SIZE as usize]);
    platform::mock_map_region(layout.mod_b, &[0xbb; MOD_SIZE as usize]);

    let mut db = HashDb::new();
    db.set_core_text(layout.core, CORE_SIZE);
    db.track_module(ModuleHandle(1), "mod_a", layout.mod_a, MOD_SIZE)
        .unwrap();
    db.track_module(ModuleHandle(2), "mod_b", layout.mod_b, MOD_SIZE)
        .unwrap();
    (db, layout)
}

fn cleanup(layout: &Layout) {
    platform::mock_unmap_region(layout.core);
    platform::mock_unmap_region(layout.mod_a);
    platform::mock_unmap_region(layout.mod_b);
}

// =============================================================================
// Core Text Tests
// =============================================================================

#[test]
fn test_core_rehash_tracks_patched_bytes() {
    let (mut db, layout) = setup(0x3000_0000);
    let baseline = db.core_text.hash;

    // Patch two bytes of core text, as a jump-label enable would.
    assert!(platform::mock_patch(layout.core + 0x20, &[0xeb, 0x05]));
    assert_eq!(
        on_completion(&mut db, ModState::CoreText),
        Completion::CoreRehashed
    );

    assert_ne!(db.core_text.hash, baseline);

    cleanup(&layout);
}

#[test]
fn test_core_rehash_unchanged_bytes_keeps_hash() {
    // Scenario: no actual byte change between two completions.
    let (mut db, layout) = setup(0x3100_0000);

    assert_eq!(
        on_completion(&mut db, ModState::CoreText),
        Completion::CoreRehashed
    );
    let first = db.core_text.hash;
    assert_eq!(
        on_completion(&mut db, ModState::CoreText),
        Completion::CoreRehashed
    );

    assert_eq!(db.core_text.hash, first);
    assert_eq!(first, fast_hash(&[0x90; CORE_SIZE as usize]));

    cleanup(&layout);
}

#[test]
fn test_core_rehash_is_idempotent_after_patch() {
    let (mut db, layout) = setup(0x3200_0000);

    assert!(platform::mock_patch(layout.core + 8, &[0xcc]));
    let _ = on_completion(&mut db, ModState::CoreText);
    let after_first = db.core_text.hash;
    let _ = on_completion(&mut db, ModState::CoreText);

    assert_eq!(db.core_text.hash, after_first);

    cleanup(&layout);
}

#[test]
fn test_core_rehash_leaves_aggregates_alone() {
    let (mut db, layout) = setup(0x3300_0000);
    let list_hash = db.module_list_hash();
    let kobj_hash = db.module_kobj_hash();

    assert!(platform::mock_patch(layout.core, &[0x0f, 0x1f]));
    let _ = on_completion(&mut db, ModState::CoreText);

    // The core image is tracked standalone; no aggregate depends on it.
    assert_eq!(db.module_list_hash(), list_hash);
    assert_eq!(db.module_kobj_hash(), kobj_hash);

    cleanup(&layout);
}

// =============================================================================
// Module Cascade Tests
// =============================================================================

#[test]
fn test_module_patch_cascades_through_both_aggregates() {
    // One tracked module patched once.
    let (mut db, layout) = setup(0x3400_0000);
    let module_hash_before = db.module(ModuleHandle(1)).unwrap().hash;
    let other_hash_before = db.module(ModuleHandle(2)).unwrap().hash;
    let list_before = db.module_list_hash();
    let kobj_before = db.module_kobj_hash();

    assert!(platform::mock_patch(layout.mod_a + 4, &[0xeb]));
    assert_eq!(
        on_completion(&mut db, ModState::ModuleText(ModuleHandle(1))),
        Completion::ModuleRehashed
    );

    let module = db.module(ModuleHandle(1)).unwrap();
    assert_ne!(module.hash, module_hash_before);
    assert_ne!(db.module_list_hash(), list_before);
    assert_ne!(db.module_kobj_hash(), kobj_before);

    // The kobj mirror carries the freshly committed per-module hash.
    assert_eq!(db.kobj(ModuleHandle(1)).unwrap().hash, module.hash);
    // No other module's record changes.
    assert_eq!(db.module(ModuleHandle(2)).unwrap().hash, other_hash_before);

    cleanup(&layout);
}

#[test]
fn test_module_cascade_matches_fresh_aggregates() {
    let (mut db, layout) = setup(0x3500_0000);

    assert!(platform::mock_patch(layout.mod_b + 1, &[0x00, 0x01]));
    assert_eq!(
        on_completion(&mut db, ModState::ModuleText(ModuleHandle(2))),
        Completion::ModuleRehashed
    );

    assert_eq!(db.module_list_hash(), db.compute_module_aggregate());
    assert_eq!(db.module_kobj_hash(), db.compute_kobj_aggregate());

    cleanup(&layout);
}

#[test]
fn test_kobj_drift_skips_second_cascade() {
    // Module present in the module list, absent from kobjs.
    let (mut db, layout) = setup(0x3600_0000);
    db.drop_kobj(ModuleHandle(1));
    let list_before = db.module_list_hash();
    let kobj_before = db.module_kobj_hash();

    assert!(platform::mock_patch(layout.mod_a, &[0x66]));
    assert_eq!(
        on_completion(&mut db, ModState::ModuleText(ModuleHandle(1))),
        Completion::KobjMismatch
    );

    // Cascade 1 committed, cascade 2 skipped.
    assert_ne!(db.module_list_hash(), list_before);
    assert_eq!(db.module_kobj_hash(), kobj_before);

    cleanup(&layout);
}

#[test]
fn test_module_unloaded_mid_flight_is_a_no_op() {
    let (mut db, layout) = setup(0x3700_0000);
    db.untrack_module(ModuleHandle(1)).unwrap();
    let list_before = db.module_list_hash();
    let kobj_before = db.module_kobj_hash();

    assert_eq!(
        on_completion(&mut db, ModState::ModuleText(ModuleHandle(1))),
        Completion::ModuleUnloaded
    );
    assert_eq!(db.module_list_hash(), list_before);
    assert_eq!(db.module_kobj_hash(), kobj_before);

    cleanup(&layout);
}

// =============================================================================
// No-Op Branch Tests
// =============================================================================

#[test]
fn test_unaffiliated_leaves_database_untouched() {
    // Trampoline outside every tracked region.
    let (mut db, layout) = setup(0x3800_0000);
    let core_before = db.core_text.hash;
    let list_before = db.module_list_hash();
    let kobj_before = db.module_kobj_hash();

    assert_eq!(
        on_completion(&mut db, ModState::Unaffiliated),
        Completion::Unaffiliated
    );

    assert_eq!(db.core_text.hash, core_before);
    assert_eq!(db.module_list_hash(), list_before);
    assert_eq!(db.module_kobj_hash(), kobj_before);

    cleanup(&layout);
}

#[test]
fn test_idle_completion_is_defensive_no_op() {
    let (mut db, layout) = setup(0x3900_0000);
    let core_before = db.core_text.hash;

    assert_eq!(on_completion(&mut db, ModState::None), Completion::Idle);
    assert_eq!(db.core_text.hash, core_before);

    cleanup(&layout);
}
