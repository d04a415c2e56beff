//! Integrity hash database.
//!
//! Holds the per-region hash records for the kernel core image and every
//! tracked module, plus two aggregate hashes: one over the module list and
//! one over the mirrored kernel-object (kobj) list. The records themselves
//! are created and removed by the broader integrity subsystem's module
//! tracking; this crate's propagation engine only mutates the `hash` fields
//! in place after an observed modification, and the periodic full-scan
//! comparison pass (external) consumes them.
//!
//! An aggregate hash is stale until every constituent record's hash is up to
//! date; whoever recomputes a constituent must recompute every aggregate
//! that includes it before reporting completion.

use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

use crate::classify::{self, AddressOracle, ModState, ModuleHandle};
use crate::hash::{self, fast_hash};

/// Hash record for the kernel core image's text range.
#[derive(Debug, Clone, Default)]
pub struct CoreTextRecord {
    pub addr: u64,
    pub size: u64,
    pub hash: u64,
}

/// Hash record for one tracked module's core text.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub handle: ModuleHandle,
    pub name: String,
    pub core_text_base: u64,
    pub core_text_size: u64,
    pub hash: u64,
}

impl ModuleRecord {
    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.handle.0.to_le_bytes());
        out.extend_from_slice(&self.core_text_base.to_le_bytes());
        out.extend_from_slice(&self.core_text_size.to_le_bytes());
        out.extend_from_slice(&self.hash.to_le_bytes());
        out.extend_from_slice(self.name.as_bytes());
    }
}

/// Kernel-object view of a tracked module.
///
/// Separately indexed from the module list but tracking the same module set;
/// its `hash` mirrors the per-module text hash.
#[derive(Debug, Clone)]
pub struct KobjRecord {
    pub handle: ModuleHandle,
    pub name: String,
    pub hash: u64,
}

impl KobjRecord {
    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.handle.0.to_le_bytes());
        out.extend_from_slice(&self.hash.to_le_bytes());
        out.extend_from_slice(self.name.as_bytes());
    }
}

/// The hash database.
pub struct HashDb {
    /// Core image text record. Tracked standalone; no aggregate depends on
    /// it.
    pub core_text: CoreTextRecord,
    modules: Vec<ModuleRecord>,
    kobjs: Vec<KobjRecord>,
    module_list_hash: u64,
    module_kobj_hash: u64,
}

impl HashDb {
    pub fn new() -> Self {
        let mut db = Self {
            core_text: CoreTextRecord::default(),
            modules: Vec::new(),
            kobjs: Vec::new(),
            module_list_hash: 0,
            module_kobj_hash: 0,
        };
        db.module_list_hash = db.compute_module_aggregate();
        db.module_kobj_hash = db.compute_kobj_aggregate();
        db
    }

    /// Register the core image's text range and take its baseline hash.
    pub fn set_core_text(&mut self, addr: u64, size: u64) {
        self.core_text.addr = addr;
        self.core_text.size = size;
        self.core_text.hash = hash::hash_range(addr, size).unwrap_or(0);
    }

    /// Start tracking a module: adds it to both the module list and the kobj
    /// mirror list, takes its baseline text hash, and recomputes both
    /// aggregates.
    pub fn track_module(
        &mut self,
        handle: ModuleHandle,
        name: &str,
        core_text_base: u64,
        core_text_size: u64,
    ) -> Result<(), &'static str> {
        if self.modules.iter().any(|m| m.handle == handle) {
            return Err("module already tracked");
        }

        let hash = hash::hash_range(core_text_base, core_text_size).unwrap_or(0);
        self.modules.push(ModuleRecord {
            handle,
            name: String::from(name),
            core_text_base,
            core_text_size,
            hash,
        });
        self.kobjs.push(KobjRecord {
            handle,
            name: String::from(name),
            hash,
        });

        self.recompute_module_aggregate();
        self.recompute_kobj_aggregate();
        log::info!(
            "axguard: tracking module [{} : {:#x}] text {:#x}+{:#x}",
            name,
            handle.0,
            core_text_base,
            core_text_size
        );
        Ok(())
    }

    /// Stop tracking a module: removes it from both lists and recomputes
    /// both aggregates.
    pub fn untrack_module(&mut self, handle: ModuleHandle) -> Result<(), &'static str> {
        let before = self.modules.len();
        self.modules.retain(|m| m.handle != handle);
        if self.modules.len() == before {
            return Err("module not tracked");
        }
        self.kobjs.retain(|k| k.handle != handle);

        self.recompute_module_aggregate();
        self.recompute_kobj_aggregate();
        Ok(())
    }

    /// Drop only the kobj-side record of a module.
    ///
    /// Kobj entries are released by the external registry on their own
    /// schedule; losing one while the module list still carries the module
    /// is exactly the bookkeeping drift the propagation engine reports.
    pub fn drop_kobj(&mut self, handle: ModuleHandle) {
        self.kobjs.retain(|k| k.handle != handle);
        self.recompute_kobj_aggregate();
    }

    pub fn module(&self, handle: ModuleHandle) -> Option<&ModuleRecord> {
        self.modules.iter().find(|m| m.handle == handle)
    }

    pub fn module_mut(&mut self, handle: ModuleHandle) -> Option<&mut ModuleRecord> {
        self.modules.iter_mut().find(|m| m.handle == handle)
    }

    pub fn kobj(&self, handle: ModuleHandle) -> Option<&KobjRecord> {
        self.kobjs.iter().find(|k| k.handle == handle)
    }

    pub fn kobj_mut(&mut self, handle: ModuleHandle) -> Option<&mut KobjRecord> {
        self.kobjs.iter_mut().find(|k| k.handle == handle)
    }

    pub fn modules(&self) -> &[ModuleRecord] {
        &self.modules
    }

    pub fn kobjs(&self) -> &[KobjRecord] {
        &self.kobjs
    }

    /// Aggregate hash over the module list.
    pub fn module_list_hash(&self) -> u64 {
        self.module_list_hash
    }

    /// Aggregate hash over the kobj list.
    pub fn module_kobj_hash(&self) -> u64 {
        self.module_kobj_hash
    }

    /// Hash of the serialized module list, computed fresh.
    pub fn compute_module_aggregate(&self) -> u64 {
        let mut buf = Vec::new();
        for m in &self.modules {
            m.write_bytes(&mut buf);
        }
        fast_hash(&buf)
    }

    /// Hash of the serialized kobj list, computed fresh.
    pub fn compute_kobj_aggregate(&self) -> u64 {
        let mut buf = Vec::new();
        for k in &self.kobjs {
            k.write_bytes(&mut buf);
        }
        fast_hash(&buf)
    }

    /// Commit a freshly computed module-list aggregate.
    pub fn recompute_module_aggregate(&mut self) {
        self.module_list_hash = self.compute_module_aggregate();
    }

    /// Commit a freshly computed kobj-list aggregate.
    pub fn recompute_kobj_aggregate(&mut self) {
        self.module_kobj_hash = self.compute_kobj_aggregate();
    }
}

impl Default for HashDb {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressOracle for HashDb {
    fn is_core_text(&self, addr: u64) -> bool {
        self.core_text.size != 0
            && addr >= self.core_text.addr
            && addr - self.core_text.addr < self.core_text.size
    }

    fn resolve_module(&self, addr: u64) -> Option<ModuleHandle> {
        self.modules
            .iter()
            .find(|m| {
                m.core_text_size != 0
                    && addr >= m.core_text_base
                    && addr - m.core_text_base < m.core_text_size
            })
            .map(|m| m.handle)
    }
}

// =============================================================================
// Global Database
// =============================================================================

/// Process-wide hash database, owned by the broader integrity subsystem.
static HASH_DB: Mutex<Option<HashDb>> = Mutex::new(None);

/// Initialize the global hash database.
pub fn init() {
    let mut db = HASH_DB.lock();
    if db.is_none() {
        *db = Some(HashDb::new());
        log::info!("axguard: hash database initialized");
    }
}

/// Run `f` against the global database.
pub fn with<R>(f: impl FnOnce(&mut HashDb) -> R) -> Result<R, &'static str> {
    let mut guard = HASH_DB.lock();
    let db = guard.as_mut().ok_or("hash database not initialized")?;
    Ok(f(db))
}

/// Classify `addr` against the global database.
///
/// With no database initialized nothing is tracked, so every address is
/// unaffiliated.
pub fn classify_addr(addr: u64) -> ModState {
    let guard = HASH_DB.lock();
    match guard.as_ref() {
        Some(db) => classify::classify(db, addr),
        None => ModState::Unaffiliated,
    }
}

/// Register the core image's text range in the global database.
pub fn set_core_text(addr: u64, size: u64) -> Result<(), &'static str> {
    with(|db| db.set_core_text(addr, size))
}

/// Track a module in the global database.
pub fn track_module(
    handle: ModuleHandle,
    name: &str,
    core_text_base: u64,
    core_text_size: u64,
) -> Result<(), &'static str> {
    with(|db| db.track_module(handle, name, core_text_base, core_text_size))?
}

/// Stop tracking a module in the global database.
pub fn untrack_module(handle: ModuleHandle) -> Result<(), &'static str> {
    with(|db| db.untrack_module(handle))?
}
