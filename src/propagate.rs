//! Hash propagation after an observed modification completes.
//!
//! Once the patch has retired, the affected region's bytes are static again,
//! so the engine just rehashes in place and pushes the change through every
//! aggregate that depends on it, in dependency order. Recomputation is
//! idempotent: it is a pure function of current memory contents, so there is
//! no retry logic.

use crate::classify::{ModState, ModuleHandle};
use crate::db::HashDb;
use crate::hash;

/// Which branch the completion handler took.
///
/// Nothing here escalates to a tamper alert; tamper detection is the
/// external full-scan comparison's job. The only error-severity outcome is
/// [`Completion::KobjMismatch`], which reports internal bookkeeping drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Core image text rehashed. The core image is tracked standalone, so
    /// no aggregate cascade follows.
    CoreRehashed,
    /// Module text rehashed and both aggregates recomputed.
    ModuleRehashed,
    /// Module text rehashed and the module-list aggregate recomputed, but
    /// the module is missing from the kobj list: the kobj cascade was
    /// skipped and an error was logged.
    KobjMismatch,
    /// The module vanished from the tracking list between entry and
    /// completion (unloaded mid-flight). No hash work.
    ModuleUnloaded,
    /// Target was not part of any tracked text region. No hash work.
    Unaffiliated,
    /// No modification was in flight. Defensive branch.
    Idle,
}

/// Restore hash consistency after a modification classified as `state`.
pub fn on_completion(db: &mut HashDb, state: ModState) -> Completion {
    match state {
        ModState::CoreText => {
            // The section is static again; no lock or temporary copy needed
            // before rehashing.
            match hash::hash_range(db.core_text.addr, db.core_text.size) {
                Some(h) => db.core_text.hash = h,
                None => log::warn!(
                    "jump_label: core .text {:#x}+{:#x} not readable, keeping previous hash",
                    db.core_text.addr,
                    db.core_text.size
                ),
            }
            log::info!("jump_label: updating kernel core .text section hash");
            Completion::CoreRehashed
        }

        ModState::ModuleText(handle) => rehash_module(db, handle),

        ModState::Unaffiliated => {
            // Dynamic trampolines land here; expected, nothing to update.
            log::info!("jump_label: modification outside tracked text, no hash update");
            Completion::Unaffiliated
        }

        ModState::None => {
            log::info!("jump_label: completion with no modification in flight");
            Completion::Idle
        }
    }
}

fn rehash_module(db: &mut HashDb, handle: ModuleHandle) -> Completion {
    let Some(module) = db.module_mut(handle) else {
        // The handle stopped resolving between entry and completion.
        log::info!(
            "jump_label: module [{:#x}] no longer tracked (unloaded mid-flight)",
            handle.0
        );
        return Completion::ModuleUnloaded;
    };

    let name = module.name.clone();
    let new_hash = match hash::hash_range(module.core_text_base, module.core_text_size) {
        Some(h) => h,
        None => {
            log::warn!(
                "jump_label: module [{}] text {:#x}+{:#x} not readable, keeping previous hash",
                name,
                module.core_text_base,
                module.core_text_size
            );
            module.hash
        }
    };
    module.hash = new_hash;
    log::info!(
        "jump_label: updating module's core .text section hash module[{} : {:#x}]",
        name,
        handle.0
    );

    // The per-module hash is committed; the module-list aggregate now
    // depends on it and must follow before anything reads it.
    db.recompute_module_aggregate();

    // Mirror the fresh hash into the kobj view of the same module, then
    // recompute that list's aggregate.
    match db.kobj_mut(handle) {
        Some(kobj) => {
            kobj.hash = new_hash;
            db.recompute_kobj_aggregate();
            Completion::ModuleRehashed
        }
        None => {
            // Two registries that are supposed to track the same module set
            // disagree. Bookkeeping drift, not evidence of tampering: skip
            // only the kobj cascade, the module-list update stays committed.
            log::error!(
                "jump_label: updated module list hash for module[{}] but it is absent from the kobj list",
                name
            );
            Completion::KobjMismatch
        }
    }
}
