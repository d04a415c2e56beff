//! Jump-label patch interception.
//!
//! Plants an entry/return intercept around the kernel's jump-label patch
//! routine. The entry handler classifies the patch target and opens a ledger
//! activation; the return handler closes it and runs the hash propagation
//! engine so the integrity database stays consistent across the legitimate
//! self-modification.
//!
//! The real facility (a kretprobe on the patch routine) lives behind the
//! `kprobe-hook` feature; host tests use a mock facility driven through
//! [`entry_event`] / [`completion_event`].

use spin::Mutex;

use crate::db;
use crate::ledger::{Activation, LEDGER};
use crate::propagate::{self, Completion};

/// Symbol whose activations are intercepted.
pub const HOOK_SYMBOL: &str = "arch_jump_label_transform";

/// Concurrent activations the facility is asked to support.
pub const MAX_ACTIVE: usize = 40;

/// Direction of a jump-label patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpLabelOp {
    /// Patch the site to a jump (static key enabled).
    Enable,
    /// Patch the site back to a nop (static key disabled).
    Disable,
    /// Unrecognized operation argument.
    Unknown,
}

impl JumpLabelOp {
    /// Decode the patch routine's raw operation argument.
    pub fn from_raw(raw: u64) -> Self {
        match raw {
            1 => Self::Enable,
            0 => Self::Disable,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enable => "JUMP_LABEL_JMP",
            Self::Disable => "JUMP_LABEL_NOP",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Error types for hook installation.
#[derive(Debug, Clone)]
pub enum HookError {
    /// The patch routine's symbol could not be resolved.
    SymbolNotFound(&'static str),
    /// The hook is already installed.
    AlreadyInstalled(&'static str),
    /// The interception facility refused to attach.
    Facility(&'static str),
}

impl core::fmt::Display for HookError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::SymbolNotFound(sym) => write!(f, "Symbol not found: {}", sym),
            Self::AlreadyInstalled(sym) => write!(f, "Hook already installed for: {}", sym),
            Self::Facility(msg) => write!(f, "Interception facility error: {}", msg),
        }
    }
}

impl core::error::Error for HookError {}

impl From<HookError> for axerrno::AxError {
    fn from(err: HookError) -> Self {
        match err {
            HookError::SymbolNotFound(_) => axerrno::AxError::NotFound,
            HookError::AlreadyInstalled(_) => axerrno::AxError::AlreadyExists,
            HookError::Facility(_) => axerrno::AxError::ResourceBusy,
        }
    }
}

// =============================================================================
// Activation Flow
// =============================================================================

/// Entry-side handler: runs before the patch executes.
///
/// Logs the impending modification, classifies its target against the live
/// database, and opens a ledger activation carrying the classification.
pub fn entry_event(target: u64, op: JumpLabelOp) -> Activation {
    log::info!(
        "jump_label: new modification: type[{}] code[{:#x}]",
        op.as_str(),
        target
    );

    // Classification takes the db lock once; the ledger counter itself is
    // lock-free and never held across the lookup.
    let state = db::classify_addr(target);
    log::debug!("jump_label: target classified as {}", state.as_str());
    LEDGER.begin(state)
}

/// Completion-side handler: runs after the patch has retired.
///
/// Closes the ledger activation and restores hash consistency for whatever
/// region the entry handler recorded.
pub fn completion_event(activation: Activation) -> Completion {
    let state = LEDGER.end(activation);
    match db::with(|db| propagate::on_completion(db, state)) {
        Ok(completion) => completion,
        Err(msg) => {
            log::warn!("jump_label: completion with {}, skipping hash update", msg);
            Completion::Idle
        }
    }
}

// =============================================================================
// Install / Uninstall
// =============================================================================

struct HookState {
    installed: bool,
    planted_at: u64,
}

static HOOK: Mutex<HookState> = Mutex::new(HookState {
    installed: false,
    planted_at: 0,
});

/// Interception facility operations.
///
/// Abstracts over the real kretprobe facility to enable mock testing.
trait InterceptOps {
    /// Attach entry/return handlers around `symbol`, supporting up to
    /// `max_active` concurrent activations. Returns the planted address.
    fn plant(symbol: &'static str, max_active: usize) -> Result<u64, HookError>;

    /// Detach the hook. Returns the facility's count of activations it
    /// missed (ran out of tracking instances).
    fn remove() -> u32;
}

/// Install the jump-label hook.
///
/// Resets the ledger counter and registers the entry/completion handlers
/// with the interception facility. Fails without retry if the symbol is
/// missing, the facility cannot attach, or the hook is already installed;
/// an existing installation stays active in all failure cases.
pub fn install() -> Result<(), HookError> {
    let mut hook = HOOK.lock();
    if hook.installed {
        return Err(HookError::AlreadyInstalled(HOOK_SYMBOL));
    }

    let addr = Intercept::plant(HOOK_SYMBOL, MAX_ACTIVE)?;
    LEDGER.reset();
    hook.installed = true;
    hook.planted_at = addr;

    log::info!("jump_label: planted hook <{}> at {:#x}", HOOK_SYMBOL, addr);
    Ok(())
}

/// Uninstall the jump-label hook.
///
/// Not-installed is a no-op reported informationally. Otherwise detaches
/// and returns the facility's missed-activation count, which is logged as a
/// diagnostic and not corrected or retried.
pub fn uninstall() -> u32 {
    let mut hook = HOOK.lock();
    if !hook.installed {
        log::info!("jump_label: hook <{}> is NOT installed", HOOK_SYMBOL);
        return 0;
    }

    let missed = Intercept::remove();
    log::info!(
        "jump_label: removing hook <{}> at {:#x} nmissed[{}]",
        HOOK_SYMBOL,
        hook.planted_at,
        missed
    );
    hook.installed = false;
    hook.planted_at = 0;
    missed
}

/// Whether the hook is currently installed.
pub fn is_installed() -> bool {
    HOOK.lock().installed
}

// =============================================================================
// Real Facility (kretprobe on the patch routine)
// =============================================================================

#[cfg(all(not(test), feature = "kprobe-hook"))]
mod real {
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicU32, Ordering};
    use spin::Mutex;

    use super::{HookError, JumpLabelOp};
    use crate::ledger::Activation;

    type LockType = spin::Mutex<()>;

    /// Glue between the generic kprobe library and this crate's memory
    /// handling. The hypervisor maps kernel text writable around patching,
    /// so plain raw copies suffice here.
    #[derive(Clone, Copy, Debug)]
    pub struct GuardKprobeOps;

    impl kprobe::KprobeAuxiliaryOps for GuardKprobeOps {
        fn copy_memory(src: *const u8, dst: *mut u8, len: usize, _user_pid: Option<i32>) {
            unsafe {
                core::ptr::copy_nonoverlapping(src, dst, len);
            }
        }

        fn set_writeable_for_address<F: FnOnce(*mut u8)>(
            address: usize,
            _len: usize,
            _user_pid: Option<i32>,
            action: F,
        ) {
            action(address as *mut u8);
        }
    }

    struct FacilityState {
        manager: kprobe::ProbeManager<LockType, GuardKprobeOps>,
        probe_points: kprobe::ProbePointList<GuardKprobeOps>,
        handle: Option<Arc<kprobe::Kretprobe<LockType, GuardKprobeOps>>>,
    }

    static FACILITY: Mutex<Option<FacilityState>> = Mutex::new(None);

    /// Returns that arrived without recorded entry state, reported at
    /// uninstall like the facility's own missed-activation diagnostic.
    static MISSED: AtomicU32 = AtomicU32::new(0);

    /// Per-instance slot carrying the activation from the entry handler to
    /// the matching return handler. The facility clones this into each of
    /// its tracking instances, so interleaved activations on different CPUs
    /// never share a slot.
    #[derive(Debug)]
    struct JlInstanceData {
        activation: Mutex<Option<Activation>>,
    }

    impl Clone for JlInstanceData {
        fn clone(&self) -> Self {
            // Instances are cloned at registration time, before any
            // activation can be in flight.
            Self {
                activation: Mutex::new(None),
            }
        }
    }

    #[inline]
    fn arg_at(regs: &kprobe::PtRegs, idx: usize) -> u64 {
        #[cfg(target_arch = "aarch64")]
        {
            return regs.regs[idx];
        }
        #[cfg(target_arch = "x86_64")]
        {
            return match idx {
                0 => regs.rdi as u64,
                1 => regs.rsi as u64,
                _ => 0,
            };
        }
        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
        {
            let _ = (regs, idx);
            0
        }
    }

    /// Entry handler: first argument is the jump entry descriptor, second
    /// the operation kind. The descriptor's first word is the address being
    /// patched. The opened activation is stashed in this instance's slot
    /// for the matching return handler.
    fn jump_label_entry_handler(data: &dyn kprobe::ProbeData, pt_regs: &mut kprobe::PtRegs) {
        let Some(slot) = data.as_any().downcast_ref::<JlInstanceData>() else {
            return;
        };
        let entry_ptr = arg_at(pt_regs, 0) as usize;
        if entry_ptr == 0 {
            return;
        }
        let code = unsafe { core::ptr::read_volatile(entry_ptr as *const u64) };
        let op = JumpLabelOp::from_raw(arg_at(pt_regs, 1));

        *slot.activation.lock() = Some(super::entry_event(code, op));
    }

    /// Return handler: the patch has retired, propagate hashes using the
    /// classification this instance recorded at entry.
    fn jump_label_ret_handler(data: &dyn kprobe::ProbeData, _pt_regs: &mut kprobe::PtRegs) {
        let activation = data
            .as_any()
            .downcast_ref::<JlInstanceData>()
            .and_then(|slot| slot.activation.lock().take());
        let Some(activation) = activation else {
            MISSED.fetch_add(1, Ordering::Relaxed);
            log::warn!("jump_label: return with no recorded activation");
            return;
        };
        let _ = super::completion_event(activation);
    }

    pub struct RealIntercept;

    impl super::InterceptOps for RealIntercept {
        fn plant(symbol: &'static str, max_active: usize) -> Result<u64, HookError> {
            let addr = crate::symbols::lookup_addr(symbol)
                .ok_or(HookError::SymbolNotFound(symbol))? as usize;

            let mut facility = FACILITY.lock();
            let state = facility.get_or_insert_with(|| FacilityState {
                manager: kprobe::ProbeManager::new(),
                probe_points: kprobe::ProbePointList::new(),
                handle: None,
            });

            let builder = kprobe::KretprobeBuilder::<LockType>::new(max_active)
                .with_symbol_addr(addr)
                .with_symbol(alloc::string::String::from(symbol))
                .with_enable(true)
                .with_entry_handler(jump_label_entry_handler)
                .with_ret_handler(jump_label_ret_handler)
                .with_data(JlInstanceData {
                    activation: Mutex::new(None),
                });

            let kretprobe = kprobe::register_kretprobe(
                &mut state.manager,
                &mut state.probe_points,
                builder,
            );
            state.handle = Some(kretprobe);
            Ok(addr as u64)
        }

        fn remove() -> u32 {
            let mut facility = FACILITY.lock();
            let Some(state) = facility.as_mut() else {
                return 0;
            };
            if let Some(handle) = state.handle.take() {
                kprobe::unregister_kretprobe(&mut state.manager, &mut state.probe_points, handle);
            }
            MISSED.swap(0, Ordering::Relaxed)
        }
    }
}

#[cfg(all(not(test), feature = "kprobe-hook"))]
type Intercept = real::RealIntercept;

// =============================================================================
// Mock Facility (test environment or no kprobe-hook feature)
// =============================================================================

#[cfg(any(test, not(feature = "kprobe-hook")))]
mod mock {
    use core::sync::atomic::{AtomicU32, Ordering};
    use spin::Mutex;

    use super::HookError;

    /// Synthetic address the mock facility reports planting at.
    const MOCK_PLANT_ADDR: u64 = 0xffff_8000_0421_0000;

    static MOCK_MISSED: AtomicU32 = AtomicU32::new(0);
    static MOCK_PLANT_ERR: Mutex<Option<HookError>> = Mutex::new(None);

    /// Mock interception facility for testing.
    pub struct MockIntercept;

    impl super::InterceptOps for MockIntercept {
        fn plant(_symbol: &'static str, _max_active: usize) -> Result<u64, HookError> {
            if let Some(err) = MOCK_PLANT_ERR.lock().take() {
                return Err(err);
            }
            Ok(MOCK_PLANT_ADDR)
        }

        fn remove() -> u32 {
            MOCK_MISSED.swap(0, Ordering::SeqCst)
        }
    }

    /// Make the next plant attempt fail with `err`.
    pub fn fail_next_plant(err: HookError) {
        *MOCK_PLANT_ERR.lock() = Some(err);
    }

    /// Set the missed-activation count the facility reports at removal.
    pub fn set_missed(count: u32) {
        MOCK_MISSED.store(count, Ordering::SeqCst);
    }
}

#[cfg(any(test, not(feature = "kprobe-hook")))]
pub use mock::{fail_next_plant, set_missed};

#[cfg(any(test, not(feature = "kprobe-hook")))]
type Intercept = mock::MockIntercept;
